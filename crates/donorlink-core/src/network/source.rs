//! Remote record sources.
//!
//! [`RemoteQuery`] is the seam between the loader and whatever service holds
//! the records. [`HttpRecordSource`] talks to a PostgREST-style REST endpoint;
//! [`query_fn`] adapts a closure, which is what most tests use.

use crate::cancel::CancellationToken;
use crate::config::NetworkConfig;
use crate::{LoaderError, Result};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// An async query returning the full collection of records.
///
/// Implementations should stop work promptly once `token` is cancelled and
/// may report that with [`LoaderError::Cancelled`].
#[async_trait]
pub trait RemoteQuery<T: Send>: Send + Sync {
    async fn fetch(&self, token: &CancellationToken) -> Result<Vec<T>>;

    /// Short label used in log events.
    fn describe(&self) -> String {
        "remote query".to_string()
    }
}

/// Closure-backed [`RemoteQuery`].
pub struct QueryFn<F> {
    f: F,
}

/// Wrap `f` as a [`RemoteQuery`]. `f` receives a clone of the cycle's token.
pub fn query_fn<T, F, Fut>(f: F) -> QueryFn<F>
where
    F: Fn(CancellationToken) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    QueryFn { f }
}

#[async_trait]
impl<T, F, Fut> RemoteQuery<T> for QueryFn<F>
where
    T: Send + 'static,
    F: Fn(CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<T>>> + Send,
{
    async fn fetch(&self, token: &CancellationToken) -> Result<Vec<T>> {
        (self.f)(token.clone()).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

/// A fixed filter/order over one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordQuery {
    pub table: String,
    pub select: String,
    /// Equality filters, applied in order.
    pub filters: Vec<(String, String)>,
    pub order: Option<OrderBy>,
}

impl RecordQuery {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            select: "*".to_string(),
            filters: Vec::new(),
            order: None,
        }
    }

    /// Add an equality filter.
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((column.into(), value.into()));
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order = Some(OrderBy {
            column: column.into(),
            ascending,
        });
        self
    }

    /// Items open for donation, oldest first.
    pub fn available_items() -> Self {
        Self::table("items")
            .eq("status", "available")
            .order_by("created_at", true)
    }

    fn params(&self) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), self.select.clone())];
        for (column, value) in &self.filters {
            params.push((column.clone(), format!("eq.{}", value)));
        }
        if let Some(order) = &self.order {
            let direction = if order.ascending { "asc" } else { "desc" };
            params.push(("order".to_string(), format!("{}.{}", order.column, direction)));
        }
        params
    }

    /// Stable identifier for this query, usable as a cache key.
    pub fn cache_key(&self) -> String {
        let params: Vec<String> = self
            .params()
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        format!("{}?{}", self.table, params.join("&"))
    }

    /// Build `{base}/rest/v1/{table}?...`.
    pub fn to_url(&self, base: &Url) -> Result<Url> {
        let mut base = base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let mut url = base.join(&format!("{}/{}", NetworkConfig::REST_PATH, self.table))?;
        url.query_pairs_mut().extend_pairs(self.params());
        Ok(url)
    }
}

/// Reads a table from a PostgREST-compatible HTTP endpoint.
pub struct HttpRecordSource<T> {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
    query: RecordQuery,
    timeout: Duration,
    _records: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for HttpRecordSource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRecordSource")
            .field("base_url", &self.base_url.as_str())
            .field("query", &self.query)
            .field("timeout", &self.timeout)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl<T> HttpRecordSource<T> {
    pub fn new(base_url: &str, query: RecordQuery) -> Result<Self> {
        Self::with_timeout(base_url, query, NetworkConfig::REQUEST_TIMEOUT)
    }

    /// Create a source whose client gives up on a request after `timeout`.
    pub fn with_timeout(base_url: &str, query: RecordQuery, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| LoaderError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                cause: None,
            })?;

        Ok(Self {
            client,
            base_url,
            api_key: None,
            query,
            timeout,
            _records: PhantomData,
        })
    }

    /// Send `key` as both the `apikey` header and a bearer token.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn query(&self) -> &RecordQuery {
        &self.query
    }

    pub fn url(&self) -> Result<Url> {
        self.query.to_url(&self.base_url)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Map a transport failure, naming the client timeout when that fired.
    fn transport_error(&self, err: reqwest::Error) -> LoaderError {
        if err.is_timeout() {
            LoaderError::Timeout(self.timeout)
        } else {
            err.into()
        }
    }
}

/// Read at most [`NetworkConfig::ERROR_BODY_LIMIT`] bytes of an error body.
async fn error_excerpt(mut response: reqwest::Response) -> String {
    let mut body = Vec::new();
    while body.len() < NetworkConfig::ERROR_BODY_LIMIT {
        match response.chunk().await {
            Ok(Some(chunk)) => body.extend_from_slice(&chunk),
            Ok(None) | Err(_) => break,
        }
    }
    body.truncate(NetworkConfig::ERROR_BODY_LIMIT);
    String::from_utf8_lossy(&body)
        .chars()
        .take(NetworkConfig::ERROR_MESSAGE_CHARS)
        .collect()
}

#[async_trait]
impl<T> RemoteQuery<T> for HttpRecordSource<T>
where
    T: DeserializeOwned + Send + 'static,
{
    async fn fetch(&self, token: &CancellationToken) -> Result<Vec<T>> {
        token.check()?;
        let url = self.url()?;
        debug!(url = %url, "Fetching records");

        let mut request = self.client.get(url).header(ACCEPT, "application/json");
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key).bearer_auth(key);
        }

        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(LoaderError::Cancelled),
            response = request.send() => response.map_err(|e| self.transport_error(e))?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(LoaderError::Cancelled),
                body = error_excerpt(response) => body,
            };
            let message = if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                body
            };
            return Err(LoaderError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let body = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(LoaderError::Cancelled),
            body = response.bytes() => body.map_err(|e| self.transport_error(e))?,
        };

        let records: Vec<T> = serde_json::from_slice(&body)?;
        debug!(count = records.len(), "Fetched records");
        Ok(records)
    }

    fn describe(&self) -> String {
        format!("GET {}", self.query.cache_key())
    }
}
