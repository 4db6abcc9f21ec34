//! `HttpRecordSource` and `NetworkMonitor` against a local axum server.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use donorlink_core::models::{self, Item, ItemStatus};
use donorlink_core::{
    Backoff, CancellationToken, ConnectivityState, HttpRecordSource, LoaderError, LoaderOptions,
    MonitorConfig, NetworkMonitor, RecordQuery, RemoteQuery, RetryConfig, TtlCache,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn items_json() -> Value {
    json!([
        {
            "id": "4b1f",
            "title": "Bookshelf",
            "description": "Pine, five shelves",
            "category": "furniture",
            "status": "available",
            "donor_name": "Ana",
            "created_at": "2024-05-01T09:30:00Z"
        },
        {
            "id": "9e2a",
            "title": "Rice cooker",
            "status": "available",
            "created_at": "2024-05-02T12:00:00Z"
        }
    ])
}

fn source(base: &str) -> HttpRecordSource<Item> {
    HttpRecordSource::new(base, RecordQuery::available_items()).unwrap()
}

#[tokio::test]
async fn test_fetch_decodes_records() {
    let app = Router::new().route("/rest/v1/items", get(|| async { Json(items_json()) }));
    let base = serve(app).await;

    let items = source(&base).fetch(&CancellationToken::new()).await.unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].title, "Bookshelf");
    assert_eq!(items[1].status, ItemStatus::Available);
    assert!(items[1].donor_name.is_none());
}

#[tokio::test]
async fn test_fetch_sends_filter_and_credentials() {
    async fn handler(
        headers: HeaderMap,
        Query(params): Query<HashMap<String, String>>,
    ) -> impl IntoResponse {
        let key_ok = headers.get("apikey").and_then(|v| v.to_str().ok()) == Some("anon-key");
        let bearer_ok = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            == Some("Bearer anon-key");
        if !key_ok || !bearer_ok {
            return (StatusCode::UNAUTHORIZED, Json(json!({"message": "no api key"})));
        }
        assert_eq!(params.get("status").map(String::as_str), Some("eq.available"));
        assert_eq!(params.get("order").map(String::as_str), Some("created_at.asc"));
        (StatusCode::OK, Json(items_json()))
    }

    let base = serve(Router::new().route("/rest/v1/items", get(handler))).await;

    let anonymous = source(&base).fetch(&CancellationToken::new()).await;
    assert!(matches!(anonymous, Err(LoaderError::Http { status: 401, .. })));

    let keyed = source(&base).with_api_key("anon-key");
    assert_eq!(keyed.fetch(&CancellationToken::new()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_server_error_is_retryable() {
    let app = Router::new().route(
        "/rest/v1/items",
        get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "upstream down") }),
    );
    let base = serve(app).await;

    let err = source(&base).fetch(&CancellationToken::new()).await.unwrap_err();
    match &err {
        LoaderError::Http { status, message } => {
            assert_eq!(*status, 503);
            assert_eq!(message, "upstream down");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_missing_table_is_permanent() {
    let base = serve(Router::new()).await;

    let err = source(&base).fetch(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, LoaderError::Http { status: 404, .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_large_error_body_is_truncated() {
    let app = Router::new().route(
        "/rest/v1/items",
        get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "x".repeat(1 << 20)) }),
    );
    let base = serve(app).await;

    let err = source(&base).fetch(&CancellationToken::new()).await.unwrap_err();
    match err {
        LoaderError::Http { status, message } => {
            assert_eq!(status, 500);
            assert_eq!(message.chars().count(), 200);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_client_timeout_names_duration() {
    let app = Router::new().route(
        "/rest/v1/items",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(items_json())
        }),
    );
    let base = serve(app).await;

    let slow = HttpRecordSource::<Item>::with_timeout(
        &base,
        RecordQuery::available_items(),
        Duration::from_millis(100),
    )
    .unwrap();
    assert_eq!(slow.timeout(), Duration::from_millis(100));

    let options = LoaderOptions::new().with_retry(
        RetryConfig::new()
            .with_max_attempts(2)
            .with_backoff(Backoff::Fixed(Duration::ZERO)),
    );
    let loader =
        models::available_items_loader(Arc::new(slow), Arc::new(TtlCache::new()), options)
            .unwrap();

    let state = loader.load().await;

    assert!(state.using_fallback);
    assert_eq!(state.retry_count, 1);
    assert_eq!(state.error.as_deref(), Some("Request timeout after 100ms"));
}

#[tokio::test]
async fn test_malformed_body_is_decode_error() {
    let app = Router::new().route(
        "/rest/v1/items",
        get(|| async { Json(json!({"items": "not a list"})) }),
    );
    let base = serve(app).await;

    let err = source(&base).fetch(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, LoaderError::Decode { .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_cancellation_interrupts_request() {
    let app = Router::new().route(
        "/rest/v1/items",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Json(items_json())
        }),
    );
    let base = serve(app).await;

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        source(&base).fetch(&token),
    )
    .await
    .expect("fetch should stop once cancelled");
    assert!(matches!(result, Err(LoaderError::Cancelled)));
}

#[tokio::test]
async fn test_loader_serves_live_items() {
    let app = Router::new().route("/rest/v1/items", get(|| async { Json(items_json()) }));
    let base = serve(app).await;

    let cache = Arc::new(TtlCache::new());
    let loader =
        models::available_items_loader(Arc::new(source(&base)), cache.clone(), LoaderOptions::new())
            .unwrap();

    let state = loader.load().await;
    assert!(!state.using_fallback);
    assert_eq!(state.data.len(), 2);
    assert!(cache.contains("available-items"));
}

#[tokio::test]
async fn test_loader_falls_back_when_server_keeps_failing() {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route(
            "/rest/v1/items",
            get(|State(hits): State<Arc<AtomicUsize>>| async move {
                hits.fetch_add(1, Ordering::SeqCst);
                StatusCode::BAD_GATEWAY
            }),
        )
        .with_state(Arc::clone(&hits));
    let base = serve(app).await;

    let options = LoaderOptions::new()
        .with_retry(RetryConfig::new().with_backoff(Backoff::Fixed(Duration::ZERO)));
    let loader =
        models::available_items_loader(Arc::new(source(&base)), Arc::new(TtlCache::new()), options)
            .unwrap();

    let state = loader.load().await;

    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert!(state.using_fallback);
    assert_eq!(state.retry_count, 2);
    assert_eq!(state.data, models::sample_items());
    assert!(state.error.unwrap().starts_with("HTTP 502"));
}

#[tokio::test]
async fn test_monitor_probe_reaches_server() {
    let app = Router::new().route("/health", get(|| async { "ok" }));
    let base = serve(app).await;

    let monitor = Arc::new(
        NetworkMonitor::with_config(
            MonitorConfig::default().with_probe_url(format!("{}/health", base)),
        )
        .unwrap(),
    );
    assert_eq!(monitor.connectivity(), ConnectivityState::Unknown);

    let state = monitor.check_connectivity().await;

    assert_eq!(state, ConnectivityState::Online);
    let status = monitor.current();
    assert!(status.is_online);
    // Loopback round trips are far below the 3g threshold
    assert_eq!(status.effective_type.as_deref(), Some("4g"));
}

#[tokio::test]
async fn test_monitor_treats_not_found_as_reachable() {
    let base = serve(Router::new()).await;

    let monitor = NetworkMonitor::with_config(
        MonitorConfig::default().with_probe_url(format!("{}/missing", base)),
    )
    .unwrap();
    monitor.report_offline();

    assert_eq!(monitor.check_connectivity().await, ConnectivityState::Online);
}

#[tokio::test]
async fn test_monitor_drops_quality_hint_when_unreachable() {
    let healthy = Arc::new(AtomicBool::new(true));
    let app = Router::new()
        .route(
            "/health",
            get(|State(healthy): State<Arc<AtomicBool>>| async move {
                if healthy.load(Ordering::SeqCst) {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                }
            }),
        )
        .with_state(Arc::clone(&healthy));
    let base = serve(app).await;

    let monitor = NetworkMonitor::with_config(
        MonitorConfig::default().with_probe_url(format!("{}/health", base)),
    )
    .unwrap();
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _subscription = monitor.on_change(move |status| {
        sink.lock().unwrap().push(status.clone());
    });

    monitor.check_connectivity().await;
    assert_eq!(monitor.current().effective_type.as_deref(), Some("4g"));

    healthy.store(false, Ordering::SeqCst);
    assert_eq!(monitor.check_connectivity().await, ConnectivityState::Offline);

    let status = monitor.current();
    assert!(!status.is_online);
    assert!(status.effective_type.is_none());
    let last = seen.lock().unwrap().last().cloned().unwrap();
    assert!(!last.is_online);
    assert!(last.effective_type.is_none());
}
