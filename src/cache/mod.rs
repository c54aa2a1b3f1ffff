//! Change cache: a local mirror of the owned definitions kept in sync with
//! the remote store through a list-then-watch informer.
//!
//! ```text
//!  DefinitionStore ── list ──┐
//!                  ── watch ─┤
//!                            ▼
//!                       ┌──────────┐  on_add / on_update / on_delete
//!                       │ Informer │ ─────────────────────────────────▶ ResourceEventHandler
//!                       └────┬─────┘
//!                            │ writes
//!                            ▼
//!                       ┌──────────┐  get(key)
//!                       │ Indexer  │ ◀───────── ChangeCache (readers)
//!                       └──────────┘
//! ```
mod indexer;
mod informer;
pub use indexer::*;
pub use informer::*;

#[cfg(test)]
mod informer_test;

use std::sync::Arc;
use std::time::Duration;

#[cfg(test)]
use mockall::automock;
use tokio::sync::watch;

use crate::ResourceDefinition;
use crate::Result;
use crate::WatcherError;

/// Receives changes applied to the change cache
#[cfg_attr(test, automock)]
pub trait ResourceEventHandler: Send + Sync + 'static {
    fn on_add(
        &self,
        obj: &Arc<ResourceDefinition>,
    );

    /// Also invoked for relists and periodic resyncs, where `old` and `new`
    /// may carry the same resource version
    fn on_update(
        &self,
        old: &Arc<ResourceDefinition>,
        new: &Arc<ResourceDefinition>,
    );

    fn on_delete(
        &self,
        obj: &Arc<ResourceDefinition>,
    );
}

/// Read-only handle on the informer's indexer
#[derive(Debug, Clone)]
pub struct ChangeCache {
    indexer: Arc<Indexer>,
    synced: watch::Receiver<bool>,
}

impl ChangeCache {
    pub(crate) fn new(
        indexer: Arc<Indexer>,
        synced: watch::Receiver<bool>,
    ) -> Self {
        Self { indexer, synced }
    }

    /// Latest mirrored copy of `key`
    pub fn get(
        &self,
        key: &str,
    ) -> Option<Arc<ResourceDefinition>> {
        self.indexer.get(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.indexer.keys()
    }

    pub fn len(&self) -> usize {
        self.indexer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexer.is_empty()
    }

    /// Whether the initial list has been applied
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Waits until the initial list has been applied.
    ///
    /// # Errors
    /// - `WatcherError::CacheSyncTimeout` when `timeout` elapses first
    /// - `WatcherError::CacheSyncAborted` when the informer stopped first
    pub async fn wait_for_sync(
        &self,
        timeout: Duration,
    ) -> Result<()> {
        let mut synced = self.synced.clone();
        let result = match tokio::time::timeout(timeout, synced.wait_for(|s| *s)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(WatcherError::CacheSyncAborted.into()),
            Err(_) => Err(WatcherError::CacheSyncTimeout(timeout).into()),
        };
        result
    }
}
