use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Rate limiting of the retry queue
///
/// The effective requeue delay of a key is the larger of its per-key
/// exponential backoff and the delay imposed by the overall token bucket.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QueueConfig {
    /// Per-key backoff after the first failure (milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Per-key backoff ceiling (milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Overall requeue rate (tokens per second)
    #[serde(default = "default_qps")]
    pub qps: f64,

    /// Overall token bucket size
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            qps: default_qps(),
            burst: default_burst(),
        }
    }
}

impl QueueConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.base_delay_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "queue.base_delay_ms must be greater than 0".into(),
            )));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(Error::Config(ConfigError::Message(format!(
                "queue.max_delay_ms ({}) must be >= queue.base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            ))));
        }
        if !(self.qps.is_finite() && self.qps > 0.0) {
            return Err(Error::Config(ConfigError::Message(
                "queue.qps must be a positive number".into(),
            )));
        }
        if self.burst == 0 {
            return Err(Error::Config(ConfigError::Message(
                "queue.burst must be greater than 0".into(),
            )));
        }
        Ok(())
    }
}

fn default_base_delay_ms() -> u64 {
    5
}
// 1000 seconds
fn default_max_delay_ms() -> u64 {
    1_000_000
}
fn default_qps() -> f64 {
    10.0
}
fn default_burst() -> u32 {
    100
}
