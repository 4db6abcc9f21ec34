//! donorlink - load the donation portal's item list from the command line.
//!
//! Drives a `ResilientListLoader` against a live record service and prints
//! the final loader state as JSON on stdout. Logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use donorlink_core::{
    models, Backoff, HttpRecordSource, Item, LoaderConfig, LoaderOptions, MonitorConfig,
    NetworkMonitor, RecordQuery, ResilientListLoader, RetryConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackoffKind {
    Linear,
    Exponential,
}

#[derive(Parser, Debug)]
#[command(name = "donorlink")]
#[command(about = "Load available donation items with caching, retries and fallback")]
struct Args {
    /// Base URL of the record service
    #[arg(long, env = "DONORLINK_URL")]
    url: String,

    /// API key sent as `apikey` and bearer token
    #[arg(long, env = "DONORLINK_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Table holding the items
    #[arg(long, env = "DONORLINK_TABLE", default_value = "items")]
    table: String,

    /// Cache time-to-live in seconds
    #[arg(long, env = "DONORLINK_TTL_SECS", default_value_t = LoaderConfig::DEFAULT_TTL.as_secs())]
    ttl_secs: u64,

    /// Attempts per fetch cycle, including the first
    #[arg(long, env = "DONORLINK_MAX_ATTEMPTS", default_value_t = LoaderConfig::DEFAULT_MAX_ATTEMPTS)]
    max_attempts: u32,

    /// Base delay between attempts in milliseconds
    #[arg(long, env = "DONORLINK_BASE_DELAY_MS", default_value_t = LoaderConfig::DEFAULT_BASE_DELAY.as_millis() as u64)]
    base_delay_ms: u64,

    /// Backoff growth between attempts
    #[arg(long, env = "DONORLINK_BACKOFF", value_enum, default_value_t = BackoffKind::Linear)]
    backoff: BackoffKind,

    /// Give up on a single attempt after this many seconds
    #[arg(long, env = "DONORLINK_ATTEMPT_TIMEOUT_SECS", default_value_t = LoaderConfig::DEFAULT_ATTEMPT_TIMEOUT.as_secs())]
    attempt_timeout_secs: u64,

    /// Number of loads to run (later loads should hit the cache)
    #[arg(long, default_value_t = 1)]
    repeat: u32,

    /// Seconds to wait between repeated loads
    #[arg(long, default_value_t = 0)]
    interval_secs: u64,

    /// Finish with a forced refetch that bypasses the cache
    #[arg(long)]
    refetch: bool,

    /// Probe the service before loading and attach a network monitor
    #[arg(long)]
    probe: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,
}

impl Args {
    fn query(&self) -> RecordQuery {
        RecordQuery {
            table: self.table.clone(),
            ..RecordQuery::available_items()
        }
    }

    fn retry_config(&self) -> RetryConfig {
        let base = Duration::from_millis(self.base_delay_ms);
        let backoff = match self.backoff {
            BackoffKind::Linear => Backoff::linear(base),
            BackoffKind::Exponential => Backoff::exponential(base),
        };
        RetryConfig::new()
            .with_max_attempts(self.max_attempts)
            .with_backoff(backoff)
            .with_attempt_timeout(Duration::from_secs(self.attempt_timeout_secs))
    }

    fn options(&self) -> LoaderOptions {
        LoaderOptions::new()
            .with_ttl(Duration::from_secs(self.ttl_secs))
            .with_retry(self.retry_config())
    }
}

fn init_logging(debug: bool, json: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug, args.json);

    info!("Starting donorlink");

    let query = args.query();
    let mut source = HttpRecordSource::<Item>::new(&args.url, query.clone())
        .with_context(|| format!("Invalid service URL: {}", args.url))?;
    if let Some(key) = &args.api_key {
        source = source.with_api_key(key.clone());
    }

    let mut builder = ResilientListLoader::<Item>::builder(
        query.cache_key(),
        Arc::new(source),
        Arc::new(models::item_fallback()),
    )
    .options(args.options());

    if args.probe {
        let config = MonitorConfig::default().with_probe_url(args.url.clone());
        let monitor = Arc::new(NetworkMonitor::with_config(config)?);
        let state = monitor.check_connectivity().await;
        let status = monitor.current();
        info!(
            state = %state,
            effective_type = ?status.effective_type,
            "Connectivity check complete"
        );
        builder = builder.network(monitor);
    }

    let loader = builder.build().context("Invalid loader options")?;

    let rounds = args.repeat.max(1);
    let mut state = loader.load().await;
    info!(round = 1, items = state.data.len(), phase = ?state.phase, "Load complete");

    for round in 2..=rounds {
        if args.interval_secs > 0 {
            tokio::time::sleep(Duration::from_secs(args.interval_secs)).await;
        }
        state = loader.load().await;
        info!(round, items = state.data.len(), phase = ?state.phase, "Load complete");
    }

    if args.refetch {
        state = loader.refetch().await;
        info!(items = state.data.len(), phase = ?state.phase, "Refetch complete");
    }

    if state.using_fallback {
        warn!(
            error = state.error.as_deref().unwrap_or("unknown"),
            retries = state.retry_count,
            "Live data unavailable; showing sample items"
        );
    }

    println!("{}", serde_json::to_string_pretty(&state)?);

    loader.dispose();
    Ok(())
}
