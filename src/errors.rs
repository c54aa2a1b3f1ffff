//! CRD Watcher Error Hierarchy
//!
//! Defines the error types surfaced by the watch-to-callback pipeline,
//! categorized by the component that produces them.

use std::time::Duration;

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by a registered callback.
///
/// Callback failures never leave the dispatch worker: they are logged and
/// converted into a rate-limited requeue of the key.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Remote store list/watch failures
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Lifecycle and cache synchronization failures
    #[error(transparent)]
    Watcher(#[from] WatcherError),

    /// Malformed resource definitions
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Configuration loading and validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Unrecoverable failures
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// List request rejected or failed in transport
    #[error("List request failed: {0}")]
    ListFailed(String),

    /// Watch subscription could not be established
    #[error("Watch request failed: {0}")]
    WatchFailed(String),

    /// The requested resource version is no longer available; a relist is required
    #[error("Watch expired at resource version {resource_version}")]
    WatchExpired { resource_version: String },

    /// Store connection lost
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    /// Initial list never completed
    #[error("Failed to sync CRD informer cache within {0:?}")]
    CacheSyncTimeout(Duration),

    /// Informer exited before the cache synced
    #[error("CRD informer stopped before the cache synced")]
    CacheSyncAborted,

    /// Lifecycle call issued in the wrong state
    #[error("Operation `{operation}` is invalid in state {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    /// A definition without any version entry has no addressable coordinate
    #[error("CRD {name} declares no versions")]
    NoVersions { name: String },
}
