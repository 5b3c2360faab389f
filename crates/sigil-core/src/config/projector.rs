use serde::{Deserialize, Serialize};

/// Configuration for the projection handler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectorConfig {
    /// Maximum number of events applied per transaction
    /// Default: 1000
    #[serde(default = "default_batch_events_max")]
    pub batch_events_max: usize,

    /// Poll interval when caught up and no append notification arrives (milliseconds)
    /// Default: 10ms
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Pause after a failed run before the continuous loop tries again (milliseconds)
    /// Default: 1000ms
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,

    /// How long catch-up waits for the per-tenant lane lock
    /// Default: 5000ms
    #[serde(default = "default_lane_timeout_ms")]
    pub lane_timeout_ms: u64,
}

fn default_batch_events_max() -> usize {
    1000
}

fn default_poll_interval_ms() -> u64 {
    10
}

fn default_error_backoff_ms() -> u64 {
    1000
}

fn default_lane_timeout_ms() -> u64 {
    5000
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            batch_events_max: default_batch_events_max(),
            poll_interval_ms: default_poll_interval_ms(),
            error_backoff_ms: default_error_backoff_ms(),
            lane_timeout_ms: default_lane_timeout_ms(),
        }
    }
}

impl ProjectorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_events_max(mut self, max: usize) -> Self {
        self.batch_events_max = max;
        self
    }

    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_error_backoff_ms(mut self, ms: u64) -> Self {
        self.error_backoff_ms = ms;
        self
    }
}
