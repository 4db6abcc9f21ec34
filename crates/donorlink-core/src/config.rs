//! Centralized configuration for donorlink.
//!
//! Constant tables hold the defaults; [`LoaderOptions`] is the runtime,
//! builder-style configuration handed to a loader.

use crate::network::RetryConfig;
use std::time::Duration;

/// Defaults for the resilient list loader.
pub struct LoaderConfig;

impl LoaderConfig {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
    pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
    /// Ceiling for the capped-exponential backoff.
    pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(5000);
    pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const FALLBACK_ID_PREFIX: &'static str = "fallback-";
    pub const AVAILABLE_ITEMS_KEY: &'static str = "available-items";
}

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
    pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
    pub const OFFLINE_RECHECK_INTERVAL: Duration = Duration::from_secs(30);
    pub const ONLINE_VERIFY_INTERVAL: Duration = Duration::from_secs(300);
    pub const USER_AGENT: &'static str = "donorlink/0.1";
    pub const REST_PATH: &'static str = "rest/v1";
    /// Bytes of a failed response body read for the error message.
    pub const ERROR_BODY_LIMIT: usize = 1024;
    /// Characters of that body kept in the message.
    pub const ERROR_MESSAGE_CHARS: usize = 200;
}

/// Runtime options for a [`crate::ResilientListLoader`].
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// How long a fetched list stays fresh in the cache.
    pub ttl: Duration,
    /// Retry policy applied to each fetch cycle.
    pub retry: RetryConfig,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            ttl: LoaderConfig::DEFAULT_TTL,
            retry: RetryConfig::default(),
        }
    }
}

impl LoaderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache time-to-live.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Reject option combinations that can never produce a fetch.
    pub fn validate(&self) -> crate::Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(crate::LoaderError::Config {
                message: "max_attempts must be at least 1".to_string(),
            });
        }
        if self.retry.attempt_timeout.is_zero() {
            return Err(crate::LoaderError::Config {
                message: "attempt_timeout must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = LoaderOptions::default();
        assert_eq!(options.ttl, LoaderConfig::DEFAULT_TTL);
        assert_eq!(options.retry.max_attempts, LoaderConfig::DEFAULT_MAX_ATTEMPTS);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let options = LoaderOptions::new().with_retry(RetryConfig::new().with_max_attempts(0));
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let options = LoaderOptions::new()
            .with_retry(RetryConfig::new().with_attempt_timeout(Duration::ZERO));
        assert!(options.validate().is_err());
    }
}
