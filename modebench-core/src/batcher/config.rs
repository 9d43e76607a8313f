//! Configuration for the request batcher.

use std::time::Duration;

use crate::error::RequestError;

/// Configuration for the request batcher
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Count-triggered flush threshold
    pub max_batch_size: usize,

    /// Time-triggered flush bound, measured from the first request of a batch
    pub max_wait_time: Duration,

    /// Upper bound on an idle wait, so a stop signal is always observed
    pub poll_interval: Duration,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 8,
            max_wait_time: Duration::from_millis(50),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl BatcherConfig {
    /// Create config from environment variables
    ///
    /// - `MODEBENCH_MAX_BATCH_SIZE` (default: 8)
    /// - `MODEBENCH_MAX_WAIT_MS` (default: 50)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("MODEBENCH_MAX_BATCH_SIZE") {
            if let Ok(n) = val.parse() {
                config.max_batch_size = n;
            }
        }

        if let Ok(val) = std::env::var("MODEBENCH_MAX_WAIT_MS") {
            if let Ok(ms) = val.parse() {
                config.max_wait_time = Duration::from_millis(ms);
            }
        }

        config
    }

    /// Builder: set the count-triggered flush threshold
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    /// Builder: set the time-triggered flush bound
    pub fn with_max_wait_time(mut self, max_wait_time: Duration) -> Self {
        self.max_wait_time = max_wait_time;
        self
    }

    pub fn validate(&self) -> Result<(), RequestError> {
        if self.max_batch_size == 0 {
            return Err(RequestError::validation("max_batch_size must be at least 1"));
        }
        if self.poll_interval.is_zero() {
            return Err(RequestError::validation("poll_interval must be non-zero"));
        }
        Ok(())
    }
}
