use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use super::BackoffPolicy;
use crate::Error;
use crate::Result;

/// Change cache (informer) settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CacheConfig {
    /// Upper bound on the initial list before `start` gives up (milliseconds)
    #[serde(default = "default_sync_timeout_ms")]
    pub sync_timeout_ms: u64,

    /// Periodic re-notification of every cached object (milliseconds, 0 disables)
    ///
    /// Resync events carry an unchanged resource version and are dropped by the
    /// dedup filter; they only matter to handlers that observe raw updates.
    #[serde(default)]
    pub resync_period_ms: u64,

    /// Backoff applied between relist attempts after a subscription loss
    #[serde(default = "default_relist_backoff")]
    pub relist_backoff: BackoffPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sync_timeout_ms: default_sync_timeout_ms(),
            resync_period_ms: 0,
            relist_backoff: default_relist_backoff(),
        }
    }
}

impl CacheConfig {
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    /// `None` when periodic resync is disabled
    pub fn resync_period(&self) -> Option<Duration> {
        (self.resync_period_ms > 0).then(|| Duration::from_millis(self.resync_period_ms))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.sync_timeout_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "cache.sync_timeout_ms must be greater than 0".into(),
            )));
        }
        self.relist_backoff.validate("cache.relist_backoff")
    }
}

fn default_sync_timeout_ms() -> u64 {
    30_000
}

fn default_relist_backoff() -> BackoffPolicy {
    BackoffPolicy {
        base_delay_ms: 100,
        max_delay_ms: 30_000,
    }
}
