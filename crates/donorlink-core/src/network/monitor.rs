//! NetworkMonitor - connectivity tracking and change notification.
//!
//! Provides:
//! - A non-blocking read of the latest known connectivity status
//! - Push-style reports from the host platform (online/offline, link hints)
//! - Active probing of well-known endpoints, with a quality hint derived
//!   from the probe round trip
//! - Change callbacks with drop-to-unsubscribe handles

use crate::cancel::CancellationToken;
use crate::config::NetworkConfig;
use crate::{LoaderError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, TryLockError, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Network connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityState {
    /// Network is available.
    Online = 0,
    /// Network is not available.
    Offline = 1,
    /// Nothing observed yet; treated as online.
    Unknown = 2,
}

impl std::fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectivityState::Online => write!(f, "online"),
            ConnectivityState::Offline => write!(f, "offline"),
            ConnectivityState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Atomic wrapper for ConnectivityState.
struct AtomicConnectivityState(AtomicU8);

impl AtomicConnectivityState {
    fn new(state: ConnectivityState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn load(&self) -> ConnectivityState {
        match self.0.load(Ordering::SeqCst) {
            0 => ConnectivityState::Online,
            1 => ConnectivityState::Offline,
            _ => ConnectivityState::Unknown,
        }
    }

    /// Store `state`, returning the previous one.
    fn swap(&self, state: ConnectivityState) -> ConnectivityState {
        match self.0.swap(state as u8, Ordering::SeqCst) {
            0 => ConnectivityState::Online,
            1 => ConnectivityState::Offline,
            _ => ConnectivityState::Unknown,
        }
    }
}

/// Snapshot of what the monitor currently knows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    pub is_online: bool,
    /// Link type, e.g. "wifi" or "ethernet", when the platform reports it.
    pub connection_type: Option<String>,
    /// Quality bucket: "slow-2g", "2g", "3g" or "4g".
    pub effective_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ConnectionHints {
    connection_type: Option<String>,
    effective_type: Option<String>,
}

/// Configuration for connectivity probing.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// URLs to probe for connectivity (in order of preference).
    pub probe_urls: Vec<String>,
    /// Timeout for connectivity probes.
    pub probe_timeout: Duration,
    /// How often to re-check connectivity when offline.
    pub offline_recheck_interval: Duration,
    /// How often to verify connectivity when online.
    pub online_verify_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_urls: Vec::new(),
            probe_timeout: NetworkConfig::PROBE_TIMEOUT,
            offline_recheck_interval: NetworkConfig::OFFLINE_RECHECK_INTERVAL,
            online_verify_interval: NetworkConfig::ONLINE_VERIFY_INTERVAL,
        }
    }
}

impl MonitorConfig {
    pub fn with_probe_url(mut self, url: impl Into<String>) -> Self {
        self.probe_urls.push(url.into());
        self
    }
}

/// Quality bucket for a measured round trip.
pub fn effective_type_for_rtt(rtt: Duration) -> &'static str {
    match rtt.as_millis() {
        ms if ms >= 2000 => "slow-2g",
        ms if ms >= 1400 => "2g",
        ms if ms >= 270 => "3g",
        _ => "4g",
    }
}

type ChangeCallback = Arc<dyn Fn(&NetworkStatus) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    callbacks: HashMap<u64, ChangeCallback>,
}

/// Handle returned by [`NetworkMonitor::on_change`].
///
/// Dropping the handle unsubscribes the callback.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    listeners: Weak<Mutex<Listeners>>,
    id: u64,
}

impl Subscription {
    /// Stop receiving change notifications.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .callbacks
                .remove(&self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Tracks connectivity and notifies subscribers of transitions.
pub struct NetworkMonitor {
    state: AtomicConnectivityState,
    hints: RwLock<ConnectionHints>,
    listeners: Arc<Mutex<Listeners>>,
    probe_client: reqwest::Client,
    config: MonitorConfig,
    /// Token of the running background loop, if any.
    monitoring: Mutex<Option<CancellationToken>>,
    checks: AtomicU64,
}

impl std::fmt::Debug for NetworkMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkMonitor")
            .field("state", &self.connectivity())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl NetworkMonitor {
    /// Create a monitor with no probe URLs (push reports only).
    pub fn new() -> Result<Self> {
        Self::with_config(MonitorConfig::default())
    }

    /// Create with custom configuration.
    pub fn with_config(config: MonitorConfig) -> Result<Self> {
        let probe_client = reqwest::Client::builder()
            .timeout(config.probe_timeout)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| LoaderError::Network {
                message: format!("Failed to create probe client: {}", e),
                cause: None,
            })?;

        Ok(Self {
            state: AtomicConnectivityState::new(ConnectivityState::Unknown),
            hints: RwLock::new(ConnectionHints::default()),
            listeners: Arc::new(Mutex::new(Listeners::default())),
            probe_client,
            config,
            monitoring: Mutex::new(None),
            checks: AtomicU64::new(0),
        })
    }

    // === Status ===

    /// Best-effort, non-blocking read of the current status.
    ///
    /// If the hint fields are momentarily locked by a writer they are reported
    /// as absent; `is_online` is always available.
    pub fn current(&self) -> NetworkStatus {
        let hints = match self.hints.try_read() {
            Ok(hints) => hints.clone(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().clone(),
            Err(TryLockError::WouldBlock) => ConnectionHints::default(),
        };
        NetworkStatus {
            is_online: self.is_online(),
            connection_type: hints.connection_type,
            effective_type: hints.effective_type,
        }
    }

    /// Get current connectivity state.
    pub fn connectivity(&self) -> ConnectivityState {
        self.state.load()
    }

    /// Anything but a confirmed offline counts as online.
    pub fn is_online(&self) -> bool {
        self.state.load() != ConnectivityState::Offline
    }

    // === Platform reports ===

    /// The platform reported that the network is reachable.
    pub fn report_online(&self) {
        self.transition(ConnectivityState::Online);
    }

    /// The platform reported that the network went away.
    pub fn report_offline(&self) {
        self.transition(ConnectivityState::Offline);
    }

    /// The platform reported new link-quality hints.
    pub fn report_connection(
        &self,
        connection_type: Option<String>,
        effective_type: Option<String>,
    ) {
        let changed = {
            let mut hints = self.hints.write().unwrap_or_else(PoisonError::into_inner);
            let next = ConnectionHints {
                connection_type,
                effective_type,
            };
            if *hints == next {
                false
            } else {
                *hints = next;
                true
            }
        };
        if changed {
            debug!("Connection hints changed");
            self.notify();
        }
    }

    fn set_effective_type(&self, effective_type: &str) -> bool {
        let mut hints = self.hints.write().unwrap_or_else(PoisonError::into_inner);
        if hints.effective_type.as_deref() == Some(effective_type) {
            return false;
        }
        hints.effective_type = Some(effective_type.to_string());
        true
    }

    fn clear_effective_type(&self) -> bool {
        let mut hints = self.hints.write().unwrap_or_else(PoisonError::into_inner);
        hints.effective_type.take().is_some()
    }

    fn transition(&self, next: ConnectivityState) {
        let previous = self.state.swap(next);
        if previous == next {
            return;
        }
        match (previous, next) {
            (ConnectivityState::Offline, ConnectivityState::Online) => {
                info!("Network connectivity restored")
            }
            (_, ConnectivityState::Offline) => warn!("Network connectivity lost"),
            _ => debug!("Connectivity {} -> {}", previous, next),
        }
        // Unknown -> Online is not a visible change: both report is_online
        if (previous == ConnectivityState::Offline) != (next == ConnectivityState::Offline) {
            self.notify();
        }
    }

    // === Subscriptions ===

    /// Call `callback` with the new status on every transition.
    pub fn on_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&NetworkStatus) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.callbacks.insert(id, Arc::new(callback));
        Subscription {
            listeners: Arc::downgrade(&self.listeners),
            id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .callbacks
            .len()
    }

    fn notify(&self) {
        let callbacks: Vec<ChangeCallback> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .callbacks
            .values()
            .cloned()
            .collect();
        if callbacks.is_empty() {
            return;
        }
        // Callbacks run without the listener lock so they may (un)subscribe
        let status = self.current();
        for callback in callbacks {
            callback(&status);
        }
    }

    // === Probing ===

    /// Check connectivity by probing the configured endpoints.
    ///
    /// The first endpoint that answers decides the state and its round trip
    /// sets `effective_type`. With no probe URLs configured the current state
    /// is returned unchanged.
    pub async fn check_connectivity(&self) -> ConnectivityState {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if self.config.probe_urls.is_empty() {
            return self.connectivity();
        }

        for url in &self.config.probe_urls {
            let started = Instant::now();
            if self.probe_url(url).await {
                let rtt = started.elapsed();
                debug!(url = %url, rtt = ?rtt, "Probe succeeded");
                let hint_changed = self.set_effective_type(effective_type_for_rtt(rtt));
                let was_offline = self.connectivity() == ConnectivityState::Offline;
                self.transition(ConnectivityState::Online);
                // Coming back from offline already notified with the new hint
                if hint_changed && !was_offline {
                    self.notify();
                }
                return ConnectivityState::Online;
            }
            debug!("Probe failed for {}", url);
        }

        // No round trip was measured, so there is no quality to report
        let hint_cleared = self.clear_effective_type();
        let was_offline = self.connectivity() == ConnectivityState::Offline;
        self.transition(ConnectivityState::Offline);
        if hint_cleared && was_offline {
            self.notify();
        }
        ConnectivityState::Offline
    }

    /// Number of connectivity checks run so far.
    pub fn checks_run(&self) -> u64 {
        self.checks.load(Ordering::SeqCst)
    }

    /// HEAD `url`; any answer short of a server error counts as reachable.
    async fn probe_url(&self, url: &str) -> bool {
        match self.probe_client.head(url).send().await {
            Ok(resp) => {
                let status = resp.status();
                // 403/404 still prove the network path works
                !status.is_server_error()
            }
            Err(e) => {
                debug!("Probe request failed: {}", e);
                false
            }
        }
    }

    // === Background Monitoring ===

    /// Start periodic probing on the current runtime.
    ///
    /// Does nothing while a loop is already running.
    pub fn start_monitoring(self: &Arc<Self>) {
        let token = {
            let mut slot = self.monitoring_slot();
            if slot.is_some() {
                debug!("Background monitoring already active");
                return;
            }
            let token = CancellationToken::new();
            *slot = Some(token.clone());
            token
        };

        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            info!("Starting background connectivity monitoring");

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = monitor.check_connectivity() => {}
                }

                let interval = if monitor.is_online() {
                    monitor.config.online_verify_interval
                } else {
                    monitor.config.offline_recheck_interval
                };
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }

            info!("Background connectivity monitoring stopped");
        });
    }

    /// Stop background monitoring. The running loop exits at its next await.
    pub fn stop_monitoring(&self) {
        if let Some(token) = self.monitoring_slot().take() {
            token.cancel();
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring_slot().is_some()
    }

    fn monitoring_slot(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.monitoring.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
