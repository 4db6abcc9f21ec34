//! ResilientListLoader - cache, retry, cancellation and fallback in one call.
//!
//! A loader owns one resource key. Each `load()` either answers from a fresh
//! cache entry or starts a fetch cycle:
//!
//! ```text
//! Idle -> Loading -> { Fresh | FallbackActive }
//!            ^  |          |            |
//!            +--+----------+------------+   (next load/refetch)
//! ```
//!
//! Starting a cycle cancels the previous one. Only the live cycle may write
//! the shared cache or the observable state, so a late answer from a
//! superseded request is dropped on the floor.

use crate::cache::TtlCache;
use crate::cancel::{CancellationToken, RequestCanceller};
use crate::config::LoaderOptions;
use crate::fallback::FallbackProvider;
use crate::network::{
    FetchOutcome, NetworkMonitor, NetworkStatus, RemoteQuery, RetryConfig, RetryExecutor,
    Subscription,
};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Where a loader sits in its fetch state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoaderPhase {
    Idle,
    Loading,
    Fresh,
    FallbackActive,
}

/// Externally observable loader state.
///
/// `data` is never cleared when a cycle starts, so consumers can keep
/// rendering the previous list while `loading` is set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoaderState<T> {
    pub data: Vec<T>,
    pub loading: bool,
    pub error: Option<String>,
    /// Retries started in the current cycle; the first attempt is 0.
    pub retry_count: u32,
    #[serde(rename = "isUsingFallback")]
    pub using_fallback: bool,
    pub phase: LoaderPhase,
    /// When the last cycle settled.
    pub updated_at: Option<DateTime<Utc>>,
}

impl<T> Default for LoaderState<T> {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            loading: false,
            error: None,
            retry_count: 0,
            using_fallback: false,
            phase: LoaderPhase::Idle,
            updated_at: None,
        }
    }
}

/// Loads one remote collection with caching, retries and graceful fallback.
pub struct ResilientListLoader<T: Send + 'static> {
    key: String,
    source: Arc<dyn RemoteQuery<T>>,
    cache: Arc<TtlCache<Vec<T>>>,
    fallback: Arc<dyn FallbackProvider<T>>,
    executor: RetryExecutor,
    ttl: Duration,
    canceller: RequestCanceller,
    state: watch::Sender<LoaderState<T>>,
    network: Option<Arc<NetworkMonitor>>,
}

impl<T> ResilientListLoader<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Start building a loader for `key`.
    pub fn builder(
        key: impl Into<String>,
        source: Arc<dyn RemoteQuery<T>>,
        fallback: Arc<dyn FallbackProvider<T>>,
    ) -> LoaderBuilder<T> {
        LoaderBuilder {
            key: key.into(),
            source,
            fallback,
            cache: None,
            options: LoaderOptions::default(),
            network: None,
        }
    }

    // === Fetching ===

    /// Get the current list, from cache when fresh, otherwise from the source.
    ///
    /// Never fails: exhausted retries resolve to fallback data with `error`
    /// set. Returns the state as it stands once this call is done; if the
    /// call was superseded that is whatever the newer cycle has published.
    pub async fn load(&self) -> LoaderState<T> {
        self.run_cycle(false).await
    }

    /// Drop the cached entry and fetch from the source regardless of age.
    pub async fn refetch(&self) -> LoaderState<T> {
        if self.canceller.is_disposed() {
            return self.state();
        }
        self.cache.invalidate(&self.key);
        self.run_cycle(true).await
    }

    /// Spawn the initial `load()` on the current runtime.
    pub fn start(self: &Arc<Self>) -> JoinHandle<LoaderState<T>> {
        let loader = Arc::clone(self);
        tokio::spawn(async move { loader.load().await })
    }

    async fn run_cycle(&self, force: bool) -> LoaderState<T> {
        let mut stale = None;
        if !force {
            if let Some(entry) = self.cache.get(&self.key) {
                if entry.is_fresh(self.ttl) {
                    self.serve_from_cache(entry.value, entry.cached_at);
                    return self.state();
                }
                debug!(key = %self.key, age = ?entry.age(), "Cache entry is stale");
                stale = Some(entry.value);
            } else {
                debug!(key = %self.key, "Cache miss");
            }
        }

        let token = match self.canceller.new_token() {
            Ok(token) => token,
            Err(_) => {
                debug!(key = %self.key, "Ignoring load on disposed loader");
                return self.state();
            }
        };

        self.canceller.commit(&token, || {
            self.state.send_modify(|s| {
                s.loading = true;
                s.retry_count = 0;
                s.phase = LoaderPhase::Loading;
                // Stale-while-revalidate: show the old list if we have nothing else
                if s.data.is_empty() {
                    if let Some(stale) = stale {
                        s.data = stale;
                    }
                }
            });
        });

        let (outcome, stats) = self
            .executor
            .execute_with(
                &token,
                || self.source.fetch(&token),
                |retry| {
                    self.canceller.commit(&token, || {
                        self.state.send_modify(|s| s.retry_count = retry);
                    });
                },
            )
            .await;

        match outcome {
            FetchOutcome::Success(records) => self.settle_success(&token, records),
            FetchOutcome::Failure(error) => {
                warn!(
                    key = %self.key,
                    source = %self.source.describe(),
                    attempts = stats.attempts,
                    error = %error,
                    "Live data unavailable, serving fallback"
                );
                self.settle_fallback(&token, error.to_string(), stats.retries);
            }
            FetchOutcome::Cancelled => {
                debug!(key = %self.key, "Fetch cycle superseded");
            }
        }

        self.state()
    }

    fn serve_from_cache(&self, records: Vec<T>, cached_at: DateTime<Utc>) {
        debug!(key = %self.key, "Serving fresh cache entry");
        // A fresh answer makes any in-flight cycle obsolete
        let Ok(token) = self.canceller.new_token() else {
            return;
        };
        self.canceller.commit(&token, || {
            self.state.send_modify(|s| {
                s.data = records;
                s.loading = false;
                s.error = None;
                s.retry_count = 0;
                s.using_fallback = false;
                s.phase = LoaderPhase::Fresh;
                s.updated_at = Some(cached_at);
            });
        });
    }

    fn settle_success(&self, token: &CancellationToken, records: Vec<T>) {
        let committed = self.canceller.commit(token, || {
            self.cache.put(&self.key, records.clone());
            self.state.send_modify(|s| {
                s.data = records;
                s.loading = false;
                s.error = None;
                s.using_fallback = false;
                s.phase = LoaderPhase::Fresh;
                s.updated_at = Some(Utc::now());
            });
        });
        if committed.is_none() {
            debug!(key = %self.key, "Discarding result of superseded fetch");
        }
    }

    fn settle_fallback(&self, token: &CancellationToken, error: String, retries: u32) {
        // The fallback list is never written to the cache
        let committed = self.canceller.commit(token, || {
            let fallback = self.fallback.get_fallback();
            self.state.send_modify(|s| {
                s.data = fallback;
                s.loading = false;
                s.error = Some(error);
                s.retry_count = retries;
                s.using_fallback = true;
                s.phase = LoaderPhase::FallbackActive;
                s.updated_at = Some(Utc::now());
            });
        });
        if committed.is_none() {
            debug!(key = %self.key, "Discarding failure of superseded fetch");
        }
    }

    // === Lifecycle ===

    /// Cancel any in-flight fetch and refuse further ones.
    pub fn dispose(&self) {
        if !self.canceller.is_disposed() {
            debug!(key = %self.key, "Disposing loader");
            self.canceller.dispose();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.canceller.is_disposed()
    }

    // === Observation ===

    /// Snapshot of the current state.
    pub fn state(&self) -> LoaderState<T> {
        self.state.borrow().clone()
    }

    /// Receive every state transition.
    pub fn subscribe(&self) -> watch::Receiver<LoaderState<T>> {
        self.state.subscribe()
    }

    /// Whether `records` are this loader's fallback dataset.
    pub fn is_fallback(&self, records: &[T]) -> bool {
        self.fallback.is_fallback(records)
    }

    /// Connectivity as seen by the attached monitor, if any.
    pub fn network_status(&self) -> Option<NetworkStatus> {
        self.network.as_ref().map(|monitor| monitor.current())
    }

    /// Refetch when the network comes back while fallback data is showing.
    ///
    /// Returns `None` when no monitor is attached. The subscription holds only
    /// a weak reference to the loader.
    pub fn refetch_on_reconnect(self: &Arc<Self>) -> Option<Subscription> {
        let monitor = self.network.as_ref()?;
        let weak: Weak<Self> = Arc::downgrade(self);
        Some(monitor.on_change(move |status| {
            if !status.is_online {
                return;
            }
            let Some(loader) = weak.upgrade() else {
                return;
            };
            let current = loader.state.borrow();
            if !current.using_fallback || current.loading {
                return;
            }
            drop(current);

            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    info!(key = %loader.key, "Network restored, refetching");
                    handle.spawn(async move {
                        loader.refetch().await;
                    });
                }
                Err(_) => warn!(key = %loader.key, "Network restored outside a runtime; not refetching"),
            }
        }))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn retry_config(&self) -> &RetryConfig {
        self.executor.config()
    }

    pub fn cache(&self) -> &Arc<TtlCache<Vec<T>>> {
        &self.cache
    }
}

impl<T: Send + 'static> Drop for ResilientListLoader<T> {
    fn drop(&mut self) {
        self.canceller.dispose();
    }
}

/// Builder for [`ResilientListLoader`].
pub struct LoaderBuilder<T: Send + 'static> {
    key: String,
    source: Arc<dyn RemoteQuery<T>>,
    fallback: Arc<dyn FallbackProvider<T>>,
    cache: Option<Arc<TtlCache<Vec<T>>>>,
    options: LoaderOptions,
    network: Option<Arc<NetworkMonitor>>,
}

impl<T> LoaderBuilder<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Share `cache` with other loaders. Without this the loader gets a
    /// private cache.
    pub fn cache(mut self, cache: Arc<TtlCache<Vec<T>>>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn options(mut self, options: LoaderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.options.ttl = ttl;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.options.retry = retry;
        self
    }

    pub fn network(mut self, monitor: Arc<NetworkMonitor>) -> Self {
        self.network = Some(monitor);
        self
    }

    pub fn build(self) -> Result<ResilientListLoader<T>> {
        self.options.validate()?;
        let (state, _) = watch::channel(LoaderState::default());

        Ok(ResilientListLoader {
            key: self.key,
            source: self.source,
            cache: self.cache.unwrap_or_default(),
            fallback: self.fallback,
            executor: RetryExecutor::new(self.options.retry),
            ttl: self.options.ttl,
            canceller: RequestCanceller::new(),
            state,
            network: self.network,
        })
    }
}
