//! Network utilities for remote record loading.
//!
//! This module provides:
//! - Retry logic with pluggable backoff and per-attempt timeouts
//! - Connectivity monitoring with change notifications
//! - The remote query seam and an HTTP record source

mod monitor;
mod retry;
mod source;

pub use monitor::{
    effective_type_for_rtt, ConnectivityState, MonitorConfig, NetworkMonitor, NetworkStatus,
    Subscription,
};
pub use retry::{Backoff, FetchOutcome, RetryConfig, RetryExecutor, RetryStats};
pub use source::{query_fn, HttpRecordSource, OrderBy, QueryFn, RecordQuery, RemoteQuery};
