use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the certificate provisioner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionerConfig {
    /// Attempts made by the outward get-or-generate path
    /// Default: 3
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Fixed delay between attempts (milliseconds)
    /// Default: 500ms
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Upper bound of random jitter added to each delay (milliseconds)
    /// Default: 0 (no jitter)
    #[serde(default)]
    pub retry_jitter_ms: u64,

    /// Lock TTL (milliseconds). `None` derives it from the retry budget.
    #[serde(default)]
    pub lock_ttl_ms: Option<u64>,

    /// Certificates expiring within this window are not considered active (seconds)
    /// Default: 600 (10 minutes)
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,

    /// Signing algorithm passed to generation commands
    /// Default: "RS256"
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    /// Circuit breaker guarding generation commands
    #[serde(default)]
    pub breaker: BreakerConfig,
}

/// Thresholds for the generation circuit breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Failures within `window_secs` that open the circuit
    /// Default: 5
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: usize,

    /// Window for counting failures (seconds)
    /// Default: 600
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// How long the circuit stays open before a trial command (seconds)
    /// Default: 300
    #[serde(default = "default_open_secs")]
    pub open_secs: u64,

    /// Successful trial commands needed to close the circuit again
    /// Default: 1
    #[serde(default = "default_half_open_successes")]
    pub half_open_successes: usize,
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_grace_period_secs() -> u64 {
    600
}

fn default_algorithm() -> String {
    "RS256".to_string()
}

fn default_failure_threshold() -> usize {
    5
}

fn default_window_secs() -> u64 {
    600
}

fn default_open_secs() -> u64 {
    300
}

fn default_half_open_successes() -> usize {
    1
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            window_secs: default_window_secs(),
            open_secs: default_open_secs(),
            half_open_successes: default_half_open_successes(),
        }
    }
}

impl BreakerConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_secs)
    }
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            retry_count: default_retry_count(),
            retry_backoff_ms: default_retry_backoff_ms(),
            retry_jitter_ms: 0,
            lock_ttl_ms: None,
            grace_period_secs: default_grace_period_secs(),
            algorithm: default_algorithm(),
            breaker: BreakerConfig::default(),
        }
    }
}

impl ProvisionerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry(mut self, count: u32, backoff_ms: u64) -> Self {
        self.retry_count = count;
        self.retry_backoff_ms = backoff_ms;
        self
    }

    pub fn with_retry_jitter_ms(mut self, ms: u64) -> Self {
        self.retry_jitter_ms = ms;
        self
    }

    pub fn with_lock_ttl_ms(mut self, ms: u64) -> Self {
        self.lock_ttl_ms = Some(ms);
        self
    }

    pub fn with_grace_period_secs(mut self, secs: u64) -> Self {
        self.grace_period_secs = secs;
        self
    }

    pub fn with_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.algorithm = algorithm.into();
        self
    }

    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    /// Lock TTL. Defaults to five times the whole retry budget so a lock
    /// cannot expire while its holder is still inside one provisioning flow.
    pub fn lock_ttl(&self) -> Duration {
        match self.lock_ttl_ms {
            Some(ms) => Duration::from_millis(ms),
            None => {
                let budget = self.retry_backoff_ms + self.retry_jitter_ms;
                Duration::from_millis(u64::from(self.retry_count.max(1)) * budget * 5)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_lock_ttl_covers_retry_budget() {
        let config = ProvisionerConfig::default();
        assert_eq!(config.lock_ttl(), Duration::from_millis(7500));
        assert_eq!(config.grace_period(), Duration::from_secs(600));
        assert_eq!(config.algorithm, "RS256");
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: ProvisionerConfig =
            serde_json::from_str(r#"{"retry_count": 5, "lock_ttl_ms": 1000}"#).unwrap();
        assert_eq!(config.retry_count, 5);
        assert_eq!(config.retry_backoff_ms, 500);
        assert_eq!(config.lock_ttl(), Duration::from_millis(1000));
        assert_eq!(config.breaker.failure_threshold, 5);
    }
}
