//! Bounded retry with pluggable backoff.
//!
//! Provides configurable retry behavior for remote queries with:
//! - Linear, capped-exponential, fixed or custom backoff
//! - Optional jitter to prevent thundering herd
//! - A timeout around every attempt
//! - Cancellation that short-circuits both attempts and waits
//! - Statistics tracking

use crate::cancel::CancellationToken;
use crate::config::LoaderConfig;
use crate::error::LoaderError;
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// How long to wait after a failed attempt.
#[derive(Clone)]
pub enum Backoff {
    /// Same delay after every failure.
    Fixed(Duration),
    /// `base * attempt`.
    Linear { base: Duration },
    /// `min(base * 2^attempt, max)`.
    Exponential { base: Duration, max: Duration },
    /// Arbitrary function of the failed attempt number (1-based).
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backoff::Fixed(d) => f.debug_tuple("Fixed").field(d).finish(),
            Backoff::Linear { base } => f.debug_struct("Linear").field("base", base).finish(),
            Backoff::Exponential { base, max } => f
                .debug_struct("Exponential")
                .field("base", base)
                .field("max", max)
                .finish(),
            Backoff::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Linear {
            base: LoaderConfig::DEFAULT_BASE_DELAY,
        }
    }
}

impl Backoff {
    /// Capped exponential backoff with the default ceiling.
    pub fn exponential(base: Duration) -> Self {
        Backoff::Exponential {
            base,
            max: LoaderConfig::DEFAULT_MAX_DELAY,
        }
    }

    pub fn linear(base: Duration) -> Self {
        Backoff::Linear { base }
    }

    /// Delay after the failure of attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed(delay) => *delay,
            Backoff::Linear { base } => base.saturating_mul(attempt),
            Backoff::Exponential { base, max } => 2u32
                .checked_pow(attempt)
                .and_then(|factor| base.checked_mul(factor))
                .map_or(*max, |delay| delay.min(*max)),
            Backoff::Custom(f) => f(attempt),
        }
    }

    fn ceiling(&self) -> Option<Duration> {
        match self {
            Backoff::Exponential { max, .. } => Some(*max),
            _ => None,
        }
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first one).
    pub max_attempts: u32,
    /// Delay policy between attempts.
    pub backoff: Backoff,
    /// Upper bound on a single attempt.
    pub attempt_timeout: Duration,
    /// Whether to add random jitter to delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: LoaderConfig::DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::default(),
            attempt_timeout: LoaderConfig::DEFAULT_ATTEMPT_TIMEOUT,
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the backoff policy.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the per-attempt timeout.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculate the wait after failed attempt `attempt` (1-based).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay = self.backoff.delay(attempt);
        if !self.jitter {
            return delay;
        }

        // Multiply by a factor in 0.5..1.5: same mean, no near-zero waits
        let factor = rand::rng().random_range(0.5..1.5);
        // Saturate instead of overflowing for very long delays
        let jittered = Duration::try_from_secs_f64(delay.as_secs_f64() * factor)
            .unwrap_or(Duration::MAX);
        match self.backoff.ceiling() {
            Some(max) => jittered.min(max),
            None => jittered,
        }
    }
}

/// Result of running an operation under the retry loop.
#[derive(Debug)]
pub enum FetchOutcome<T> {
    Success(T),
    /// Retries exhausted, or a permanent error.
    Failure(LoaderError),
    /// Deliberately superseded; not an error.
    Cancelled,
}

impl<T> FetchOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchOutcome::Cancelled)
    }
}

/// Statistics about a retry operation.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    /// Number of attempts started.
    pub attempts: u32,
    /// Number of retries started (attempts after the first).
    pub retries: u32,
    /// Total backoff delay waited.
    pub total_delay: Duration,
    /// Whether the operation ultimately succeeded.
    pub success: bool,
    /// Last error message if an attempt failed.
    pub last_error: Option<String>,
}

/// Runs an async operation up to `max_attempts` times.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` until it succeeds, fails permanently, exhausts its
    /// attempts, or `token` is cancelled.
    pub async fn execute<F, Fut, T>(
        &self,
        token: &CancellationToken,
        operation: F,
    ) -> (FetchOutcome<T>, RetryStats)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LoaderError>>,
    {
        self.execute_with(token, operation, |_| {}).await
    }

    /// Like [`execute`](Self::execute), calling `on_retry(n)` right before the
    /// n-th retry starts.
    pub async fn execute_with<F, Fut, T>(
        &self,
        token: &CancellationToken,
        mut operation: F,
        mut on_retry: impl FnMut(u32),
    ) -> (FetchOutcome<T>, RetryStats)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LoaderError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let timeout = self.config.attempt_timeout;
        let mut stats = RetryStats::default();
        let mut attempt = 1;

        loop {
            if token.is_cancelled() {
                return (FetchOutcome::Cancelled, stats);
            }
            stats.attempts = attempt;
            debug!(attempt, max_attempts, "Starting attempt");

            let result = tokio::select! {
                biased;
                _ = token.cancelled() => Err(LoaderError::Cancelled),
                timed = tokio::time::timeout(timeout, operation()) => match timed {
                    Ok(result) => result,
                    Err(_) => Err(LoaderError::Timeout(timeout)),
                },
            };

            let error = match result {
                Ok(value) => {
                    stats.success = true;
                    if attempt > 1 {
                        debug!("Operation succeeded after {} attempts", attempt);
                    }
                    return (FetchOutcome::Success(value), stats);
                }
                Err(e) => e,
            };

            // A transport aborted by our own token reports whatever error it likes
            if error.is_cancelled() || token.is_cancelled() {
                debug!(attempt, "Attempt cancelled");
                return (FetchOutcome::Cancelled, stats);
            }

            stats.last_error = Some(error.to_string());

            if !error.is_retryable() {
                debug!("Error is not retryable: {}", error);
                return (FetchOutcome::Failure(error), stats);
            }

            if attempt >= max_attempts {
                warn!(
                    "All {} attempts exhausted. Last error: {}",
                    max_attempts, error
                );
                return (FetchOutcome::Failure(error), stats);
            }

            let delay = self.config.calculate_delay(attempt);
            stats.total_delay += delay;
            warn!(
                "Attempt {}/{} failed: {}. Retrying in {:?}",
                attempt, max_attempts, error, delay
            );

            tokio::select! {
                biased;
                _ = token.cancelled() => return (FetchOutcome::Cancelled, stats),
                _ = tokio::time::sleep(delay) => {}
            }

            attempt += 1;
            stats.retries += 1;
            on_retry(stats.retries);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn quick_config() -> RetryConfig {
        RetryConfig::new()
            .with_max_attempts(3)
            .with_backoff(Backoff::linear(Duration::from_millis(10)))
    }

    #[test]
    fn test_linear_delay() {
        let backoff = Backoff::linear(Duration::from_secs(1));
        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(2), Duration::from_secs(2));
        assert_eq!(backoff.delay(3), Duration::from_secs(3));
    }

    #[test]
    fn test_exponential_delay_capped() {
        let backoff = Backoff::exponential(Duration::from_secs(1));
        assert_eq!(backoff.delay(1), Duration::from_secs(2));
        assert_eq!(backoff.delay(2), Duration::from_secs(4));
        // 1 * 2^3 = 8s, capped at 5s
        assert_eq!(backoff.delay(3), Duration::from_secs(5));
        assert_eq!(backoff.delay(40), Duration::from_secs(5));
    }

    #[test]
    fn test_custom_and_fixed_delay() {
        let custom = Backoff::Custom(Arc::new(|attempt| Duration::from_millis(attempt as u64 * 7)));
        assert_eq!(custom.delay(3), Duration::from_millis(21));
        assert_eq!(Backoff::Fixed(Duration::from_millis(250)).delay(9), Duration::from_millis(250));
    }

    #[test]
    fn test_jitter_saturates_huge_delays() {
        let config = RetryConfig::new()
            .with_backoff(Backoff::Fixed(Duration::MAX))
            .with_jitter(true);
        for _ in 0..20 {
            assert!(config.calculate_delay(1) >= Duration::MAX / 4);
        }

        let saturated = RetryConfig::new()
            .with_backoff(Backoff::linear(Duration::MAX / 2))
            .with_jitter(true);
        assert!(saturated.calculate_delay(u32::MAX) > Duration::ZERO);
    }

    #[test]
    fn test_delay_with_jitter() {
        let config = RetryConfig::new()
            .with_backoff(Backoff::linear(Duration::from_secs(2)))
            .with_jitter(true);

        for _ in 0..20 {
            let delay = config.calculate_delay(1);
            assert!(
                delay >= Duration::from_secs(1) && delay <= Duration::from_secs(3),
                "Delay {:?} should be between 1s and 3s",
                delay
            );
        }

        let capped = RetryConfig::new()
            .with_backoff(Backoff::exponential(Duration::from_secs(4)))
            .with_jitter(true);
        for _ in 0..20 {
            assert!(capped.calculate_delay(3) <= LoaderConfig::DEFAULT_MAX_DELAY);
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_try() {
        let executor = RetryExecutor::new(quick_config());
        let token = CancellationToken::new();

        let (outcome, stats) = executor
            .execute(&token, || async { Ok::<_, LoaderError>(42) })
            .await;

        assert!(matches!(outcome, FetchOutcome::Success(42)));
        assert_eq!(stats.attempts, 1);
        assert_eq!(stats.retries, 0);
        assert!(stats.success);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let executor = RetryExecutor::new(quick_config());
        let token = CancellationToken::new();
        let counter = AtomicU32::new(0);
        let mut retries_seen = Vec::new();

        let (outcome, stats) = executor
            .execute_with(
                &token,
                || {
                    let count = counter.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if count < 2 {
                            Err(LoaderError::query("temporary failure"))
                        } else {
                            Ok(42)
                        }
                    }
                },
                |n| retries_seen.push(n),
            )
            .await;

        assert!(matches!(outcome, FetchOutcome::Success(42)));
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.retries, 2);
        assert_eq!(retries_seen, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausted_with_linear_waits() {
        let executor = RetryExecutor::new(
            RetryConfig::new()
                .with_max_attempts(3)
                .with_backoff(Backoff::linear(Duration::from_millis(1000))),
        );
        let token = CancellationToken::new();
        let counter = AtomicU32::new(0);
        let started = Instant::now();

        let (outcome, stats) = executor
            .execute(&token, || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<i32, _>(LoaderError::query("always fails")) }
            })
            .await;

        assert!(matches!(outcome, FetchOutcome::Failure(LoaderError::Query(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.total_delay, Duration::from_millis(3000));
        assert_eq!(stats.last_error.as_deref(), Some("always fails"));
        assert!(started.elapsed() >= Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn test_retry_non_retryable_error() {
        let executor = RetryExecutor::new(quick_config());
        let token = CancellationToken::new();

        let (outcome, stats) = executor
            .execute(&token, || async {
                Err::<i32, _>(LoaderError::Decode {
                    message: "unexpected token".into(),
                })
            })
            .await;

        assert!(matches!(outcome, FetchOutcome::Failure(LoaderError::Decode { .. })));
        assert_eq!(stats.attempts, 1);
        assert!(!stats.success);
    }

    #[tokio::test]
    async fn test_cancelled_error_short_circuits() {
        let executor = RetryExecutor::new(quick_config());
        let token = CancellationToken::new();
        let counter = AtomicU32::new(0);

        let (outcome, stats) = executor
            .execute(&token, || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<i32, _>(LoaderError::Cancelled) }
            })
            .await;

        assert!(outcome.is_cancelled());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(stats.last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let executor = RetryExecutor::new(
            RetryConfig::new().with_backoff(Backoff::Fixed(Duration::from_secs(60))),
        );
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let (outcome, stats) = executor
            .execute(&token, || async { Err::<i32, _>(LoaderError::query("down")) })
            .await;

        assert!(outcome.is_cancelled());
        assert_eq!(stats.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_attempt() {
        let executor = RetryExecutor::new(quick_config());
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            canceller.cancel();
        });

        let (outcome, _) = executor
            .execute(&token, || async {
                std::future::pending::<()>().await;
                Ok::<i32, LoaderError>(1)
            })
            .await;

        assert!(outcome.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_retried() {
        let executor = RetryExecutor::new(
            quick_config().with_attempt_timeout(Duration::from_secs(2)),
        );
        let token = CancellationToken::new();
        let counter = AtomicU32::new(0);

        let (outcome, stats) = executor
            .execute(&token, || {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if count == 0 {
                        std::future::pending::<()>().await;
                    }
                    Ok::<_, LoaderError>("late but fine")
                }
            })
            .await;

        assert!(matches!(outcome, FetchOutcome::Success("late but fine")));
        assert_eq!(stats.attempts, 2);
        assert!(stats.last_error.unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn test_pre_cancelled_token_never_calls_operation() {
        let executor = RetryExecutor::new(quick_config());
        let token = CancellationToken::new();
        token.cancel();
        let counter = AtomicU32::new(0);

        let (outcome, stats) = executor
            .execute(&token, || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, LoaderError>(()) }
            })
            .await;

        assert!(outcome.is_cancelled());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(stats.attempts, 0);
    }
}
