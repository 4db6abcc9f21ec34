//! donorlink core - resilient remote-list loading for the donation portal.
//!
//! The portal's screens show lists fetched from a managed record service.
//! This crate is the data-access layer behind those lists: a shared TTL
//! cache, bounded retries, supersession of stale requests, connectivity
//! tracking and a sample dataset to fall back on. Consumers never see an
//! error value; they see a [`LoaderState`].
//!
//! # Example
//!
//! ```rust,ignore
//! use donorlink_core::{models, HttpRecordSource, LoaderOptions, RecordQuery, TtlCache};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> donorlink_core::Result<()> {
//!     let source = HttpRecordSource::new("https://demo.example.co", RecordQuery::available_items())?
//!         .with_api_key("anon-key");
//!     let cache = Arc::new(TtlCache::new());
//!     let loader = models::available_items_loader(Arc::new(source), cache, LoaderOptions::default())?;
//!
//!     let state = loader.load().await;
//!     println!("{} items (fallback: {})", state.data.len(), state.using_fallback);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod cancel;
pub mod config;
pub mod error;
pub mod fallback;
pub mod loader;
pub mod models;
pub mod network;

// Re-export commonly used types
pub use cache::{CacheEntry, TtlCache};
pub use cancel::{CancellationToken, CancelledError, RequestCanceller};
pub use config::{LoaderConfig, LoaderOptions, NetworkConfig};
pub use error::{LoaderError, Result};
pub use fallback::{FallbackProvider, Record, StaticFallback};
pub use loader::{LoaderBuilder, LoaderPhase, LoaderState, ResilientListLoader};
pub use models::{Item, ItemStatus};
pub use network::{
    query_fn, Backoff, ConnectivityState, FetchOutcome, HttpRecordSource, MonitorConfig,
    NetworkMonitor, NetworkStatus, RecordQuery, RemoteQuery, RetryConfig, RetryExecutor,
    RetryStats, Subscription,
};
