//! Lifecycle controller for the watch-to-callback pipeline.
//!
//! ## Example Usage
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use crd_watch::{CallbackError, CrdWatcher, MemoryDefinitionStore, ResourceDefinition, WatcherConfig};
//! # async fn demo() -> crd_watch::Result<()> {
//! let store = Arc::new(MemoryDefinitionStore::new());
//! let watcher = CrdWatcher::new(store, WatcherConfig::new()?)?;
//! watcher.register_callback(
//!     "widgets.kro.run",
//!     |definition: Arc<ResourceDefinition>| async move {
//!         println!("reconciling {}", definition.name());
//!         Ok::<(), CallbackError>(())
//!     },
//! );
//! watcher.start().await?;
//! watcher.stop().await;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing::info_span;
use tracing::warn;
use tracing::Instrument;

use super::DedupFilter;
use super::DispatchWorker;
use crate::constants::WATCHER_NAME;
use crate::default_controller_rate_limiter;
use crate::CallbackRegistry;
use crate::ChangeCache;
use crate::DefinitionCallback;
use crate::DefinitionStore;
use crate::Error;
use crate::Informer;
use crate::LabelSelector;
use crate::RateLimitingQueue;
use crate::Result;
use crate::WatcherConfig;
use crate::WatcherError;

/// Lifecycle states of a [`CrdWatcher`]. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl WatcherState {
    pub fn as_str(self) -> &'static str {
        match self {
            WatcherState::Created => "Created",
            WatcherState::Starting => "Starting",
            WatcherState::Running => "Running",
            WatcherState::Stopping => "Stopping",
            WatcherState::Stopped => "Stopped",
        }
    }
}

impl fmt::Display for WatcherState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Watches owned CRDs and invokes the callback registered for each changed one.
///
/// A watcher runs once: `start` is accepted only in [`WatcherState::Created`]
/// and a stopped watcher cannot be restarted.
pub struct CrdWatcher {
    config: WatcherConfig,
    cache: ChangeCache,
    queue: RateLimitingQueue<String>,
    callbacks: Arc<CallbackRegistry>,
    /// Taken by `start`
    informer: Mutex<Option<Informer>>,
    state: Mutex<WatcherState>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CrdWatcher {
    /// Watches definitions carrying the owned label
    ///
    /// # Errors
    /// Returns `Error::Config` when `config` does not validate.
    pub fn new(
        store: Arc<dyn DefinitionStore>,
        config: WatcherConfig,
    ) -> Result<Self> {
        Self::with_selector(store, LabelSelector::owned(), config)
    }

    pub fn with_selector(
        store: Arc<dyn DefinitionStore>,
        selector: LabelSelector,
        config: WatcherConfig,
    ) -> Result<Self> {
        let config = config.validate()?;
        let queue = RateLimitingQueue::new(
            WATCHER_NAME,
            default_controller_rate_limiter(&config.queue),
        );
        let informer = Informer::new(
            store,
            selector,
            config.cache.clone(),
            Arc::new(DedupFilter::new(queue.clone())),
        );

        Ok(Self {
            cache: informer.cache(),
            config,
            queue,
            callbacks: Arc::new(CallbackRegistry::new()),
            informer: Mutex::new(Some(informer)),
            state: Mutex::new(WatcherState::Created),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Starts the informer, waits for the initial sync and launches the
    /// dispatch workers.
    ///
    /// # Errors
    /// - `WatcherError::InvalidState` unless the watcher is `Created`
    /// - `WatcherError::CacheSyncTimeout` when the initial list does not
    ///   complete within `cache.sync_timeout_ms`; nothing is left running
    pub async fn start(&self) -> Result<()> {
        self.transition("start", WatcherState::Created, WatcherState::Starting)?;
        info!(name = WATCHER_NAME, "Starting CRD watcher");

        let informer = self
            .informer
            .lock()
            .take()
            .ok_or_else(|| Error::Fatal("CRD informer already consumed".to_string()))?;
        let span = info_span!("informer", name = WATCHER_NAME);
        let handle = tokio::spawn(informer.run(self.shutdown.clone()).instrument(span));
        self.tasks.lock().push(handle);

        if let Err(e) = self.cache.wait_for_sync(self.config.cache.sync_timeout()).await {
            error!(error = %e, "Failed to sync CRD informer cache");
            self.shutdown.cancel();
            self.queue.shutdown();
            self.join_tasks().await;
            *self.state.lock() = WatcherState::Stopped;
            return Err(e);
        }

        // Workers are tracked before `Running` is visible, so a concurrent
        // `stop` always joins them. A `stop` that came first wins.
        {
            let mut state = self.state.lock();
            if *state != WatcherState::Starting {
                return Err(WatcherError::InvalidState {
                    operation: "start",
                    state: state.as_str(),
                }
                .into());
            }

            let mut tasks = self.tasks.lock();
            for id in 0..self.config.workers {
                let worker = DispatchWorker::new(
                    id,
                    self.queue.clone(),
                    self.cache.clone(),
                    Arc::clone(&self.callbacks),
                    self.config.retry,
                );
                let span = info_span!("worker", name = WATCHER_NAME, id);
                tasks.push(tokio::spawn(worker.run().instrument(span)));
            }
            *state = WatcherState::Running;
        }
        info!(workers = self.config.workers, "CRD watcher started successfully");
        Ok(())
    }

    /// Stops watching and waits for the informer and workers to exit.
    ///
    /// Keys already queued are still dispatched; an in-flight callback is
    /// awaited, never interrupted. Calling `stop` again is a no-op.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            match *state {
                WatcherState::Stopping | WatcherState::Stopped => return,
                _ => *state = WatcherState::Stopping,
            }
        }
        info!(name = WATCHER_NAME, "Stopping CRD watcher");

        self.shutdown.cancel();
        self.queue.shutdown();
        self.join_tasks().await;

        *self.state.lock() = WatcherState::Stopped;
        info!(name = WATCHER_NAME, "CRD watcher stopped");
    }

    /// Installs `callback` for the definition `name`, replacing any previous one.
    ///
    /// Takes effect for the next dispatch of `name`, including keys already queued.
    pub fn register_callback(
        &self,
        name: impl Into<String>,
        callback: impl DefinitionCallback,
    ) {
        self.callbacks.register(name, Arc::new(callback));
    }

    /// Removes the callback for `name`; returns whether one was registered
    pub fn unregister_callback(
        &self,
        name: &str,
    ) -> bool {
        self.callbacks.unregister(name)
    }

    pub fn state(&self) -> WatcherState {
        *self.state.lock()
    }

    /// Read handle on the mirrored definitions
    pub fn cache(&self) -> &ChangeCache {
        &self.cache
    }

    /// Keys waiting for a worker
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    #[cfg(test)]
    pub(crate) fn tracked_tasks(&self) -> usize {
        self.tasks.lock().len()
    }

    fn transition(
        &self,
        operation: &'static str,
        from: WatcherState,
        to: WatcherState,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if *state != from {
            return Err(WatcherError::InvalidState {
                operation,
                state: state.as_str(),
            }
            .into());
        }
        *state = to;
        Ok(())
    }

    async fn join_tasks(&self) {
        let handles = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "CRD watcher task ended abnormally");
            }
        }
    }
}

impl Drop for CrdWatcher {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.queue.shutdown();
    }
}

impl fmt::Debug for CrdWatcher {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("CrdWatcher")
            .field("state", &self.state())
            .field("cache", &self.cache.len())
            .field("queue", &self.queue)
            .field("callbacks", &self.callbacks)
            .finish_non_exhaustive()
    }
}
