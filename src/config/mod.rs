//! Configuration management for the CRD watcher.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Environment variable overrides
//! - Configuration file support
//! - Component-wise validation
mod cache;
mod queue;
mod retry;
pub use cache::*;
pub use queue::*;
pub use retry::*;


use std::env;
use std::fmt::Debug;

use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::CONFIG_ENV_PREFIX;
use crate::constants::CONFIG_PATH_ENV;
use crate::Error;
use crate::Result;

/// Main configuration container for the watcher components
///
/// Combines all subsystem configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables prefixed with `CRD_WATCH__` (highest priority)
#[derive(Serialize, Deserialize, Clone)]
pub struct WatcherConfig {
    /// Change cache (informer) settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Retry queue rate limiting
    #[serde(default)]
    pub queue: QueueConfig,

    /// Dispatch failure policy
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Number of concurrent dispatch workers
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            queue: QueueConfig::default(),
            retry: RetryPolicy::default(),
            workers: default_workers(),
        }
    }
}

impl Debug for WatcherConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("WatcherConfig")
            .field("cache", &self.cache)
            .field("queue", &self.queue)
            .field("retry", &self.retry)
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

impl WatcherConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Sources are merged in the following order (later sources override earlier):
    /// 1. Type defaults (lowest priority)
    /// 2. Configuration file from `CONFIG_PATH` environment variable (if set)
    /// 3. Environment variables with `CRD_WATCH__` prefix (highest priority)
    ///
    /// # Note
    /// Callers MUST call `validate()` before using the configuration.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("CRD_WATCH__QUEUE__BASE_DELAY_MS", "10");
    /// let cfg = WatcherConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var(CONFIG_PATH_ENV) {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(env_source());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional configuration overrides from file without validation.
    ///
    /// Merging order (later sources override earlier):
    /// 1. Current configuration values
    /// 2. New configuration file
    /// 3. Latest environment variables (highest priority)
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates configuration and returns validated instance.
    pub fn validate(self) -> Result<Self> {
        if self.workers == 0 {
            return Err(Error::Config(ConfigError::Message(
                "workers must be greater than 0".into(),
            )));
        }
        self.cache.validate()?;
        self.queue.validate()?;
        self.retry.validate()?;
        Ok(self)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(CONFIG_ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}

fn default_workers() -> usize {
    1
}
