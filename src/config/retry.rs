use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Basic exponential backoff template
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct BackoffPolicy {
    /// Backoff base (unit: milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff time (unit: milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl BackoffPolicy {
    /// Delay before attempt number `attempt` (0-based): `base * 2^attempt`, capped.
    pub fn delay_for(
        &self,
        attempt: u32,
    ) -> Duration {
        Duration::from_millis(exponential_delay_ms(
            self.base_delay_ms,
            self.max_delay_ms,
            attempt,
        ))
    }

    pub(crate) fn validate(
        &self,
        name: &str,
    ) -> Result<()> {
        if self.base_delay_ms == 0 {
            return Err(Error::Config(ConfigError::Message(format!(
                "{name}.base_delay_ms must be greater than 0"
            ))));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(Error::Config(ConfigError::Message(format!(
                "{name}.max_delay_ms ({}) must be >= base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            ))));
        }
        Ok(())
    }
}

/// `base * 2^attempt`, saturating and capped at `max`
pub(crate) fn exponential_delay_ms(
    base: u64,
    max: u64,
    attempt: u32,
) -> u64 {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    base.saturating_mul(factor).min(max)
}

/// Dispatch failure policy
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default)]
pub struct RetryPolicy {
    /// Consecutive failures after which a key is dropped (0 means unlimited retries)
    #[serde(default)]
    pub max_retries: u32,
}

impl RetryPolicy {
    /// Whether a key that has already been requeued `requeues` times may be retried again
    pub fn allows_retry(
        &self,
        requeues: u32,
    ) -> bool {
        self.max_retries == 0 || requeues < self.max_retries
    }

    pub(crate) fn validate(&self) -> Result<()> {
        Ok(())
    }
}

fn default_base_delay_ms() -> u64 {
    100
}
fn default_max_delay_ms() -> u64 {
    30_000
}
