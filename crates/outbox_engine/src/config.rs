//! Configuration for the sync engine.

use std::path::PathBuf;
use std::time::Duration;

/// Where the remote store lives and how to authenticate.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Base URL of the backend (e.g., "https://project.example.co").
    pub base_url: String,
    /// API key sent as `apikey` and bearer token.
    pub api_key: String,
    /// Path prefix of the REST interface.
    pub rest_path: String,
    /// Timeout for establishing connections.
    pub connect_timeout: Duration,
}

impl RemoteConfig {
    /// Creates a new remote configuration.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            rest_path: "/rest/v1".into(),
            connect_timeout: Duration::from_secs(3),
        }
    }

    /// Sets the REST path prefix.
    pub fn with_rest_path(mut self, path: impl Into<String>) -> Self {
        self.rest_path = path.into();
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Configuration for the sync layer.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Directory of the durable outbox.
    pub store_path: PathBuf,
    /// Interval between background drain passes.
    pub tick_interval: Duration,
    /// Timeout of the synchronous attempt in the queued write paths.
    pub fast_path_timeout: Duration,
    /// Timeout of a background delivery and of the no-queue `upsert`.
    pub delivery_timeout: Duration,
    /// Timeout of a connectivity probe.
    pub probe_timeout: Duration,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Whether to start the background worker on construction.
    pub start_worker: bool,
}

impl SyncConfig {
    /// Creates a configuration storing the outbox under `store_path`.
    pub fn new(store_path: impl Into<PathBuf>) -> Self {
        Self {
            store_path: store_path.into(),
            tick_interval: Duration::from_secs(5),
            fast_path_timeout: Duration::from_secs(4),
            delivery_timeout: Duration::from_secs(15),
            probe_timeout: Duration::from_secs(2),
            retry: RetryConfig::default(),
            start_worker: true,
        }
    }

    /// Sets the drain interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Sets the fast-path timeout.
    pub fn with_fast_path_timeout(mut self, timeout: Duration) -> Self {
        self.fast_path_timeout = timeout;
        self
    }

    /// Sets the background delivery timeout.
    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// Sets the probe timeout.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets whether the worker starts on construction.
    pub fn with_worker(mut self, start: bool) -> Self {
        self.start_worker = start;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(".outbox")
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Failed attempts after which an entry is given up.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration that gives up after the first failure.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets whether delays are jittered.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.add_jitter = jitter;
        self
    }

    /// Returns true once `attempts` failed attempts use up the budget.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    /// Calculates the delay after the given number of failed attempts.
    ///
    /// Jitter (up to 25%) is applied before the cap, so with a multiplier of
    /// at least 1.25 delays never shrink from one attempt to the next.
    pub fn delay_for_attempt(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempts - 1).unwrap_or(i32::MAX);
        let mut delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);

        if self.add_jitter {
            delay_secs *= 1.0 + 0.25 * rand::random::<f64>();
        }

        let capped = delay_secs.min(self.max_delay.as_secs_f64()).max(0.0);
        if capped.is_finite() {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(6)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new("/var/lib/app/outbox")
            .with_tick_interval(Duration::from_secs(1))
            .with_fast_path_timeout(Duration::from_millis(500))
            .with_worker(false);

        assert_eq!(config.store_path, PathBuf::from("/var/lib/app/outbox"));
        assert_eq!(config.tick_interval, Duration::from_secs(1));
        assert_eq!(config.fast_path_timeout, Duration::from_millis(500));
        assert!(!config.start_worker);
        assert_eq!(config.retry.max_attempts, 6);
    }

    #[test]
    fn remote_config_defaults() {
        let config = RemoteConfig::new("https://db.example.com", "key");
        assert_eq!(config.rest_path, "/rest/v1");
        assert_eq!(config.api_key, "key");
    }

    #[test]
    fn retry_config_no_retry() {
        let config = RetryConfig::no_retry();
        assert!(config.is_exhausted(1));
        assert!(!config.is_exhausted(0));
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0)
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn retry_delay_with_jitter_bounds() {
        let config = RetryConfig::new(5).with_initial_delay(Duration::from_millis(100));

        let delay = config.delay_for_attempt(1);
        assert!(delay >= Duration::from_millis(100));
        assert!(delay <= Duration::from_millis(125));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0);

        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(5));
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_secs(5));
    }

    proptest! {
        #[test]
        fn retry_delays_never_shrink(
            initial_ms in 1u64..10_000,
            max_ms in 1u64..600_000,
            multiplier in 1.3f64..4.0,
            attempts in 1u32..30,
        ) {
            let config = RetryConfig::new(30)
                .with_initial_delay(Duration::from_millis(initial_ms))
                .with_max_delay(Duration::from_millis(max_ms))
                .with_backoff_multiplier(multiplier);

            let current = config.delay_for_attempt(attempts);
            let next = config.delay_for_attempt(attempts + 1);
            prop_assert!(next >= current);
            prop_assert!(next <= Duration::from_millis(max_ms));
        }
    }
}
