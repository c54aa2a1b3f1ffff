use std::sync::Arc;

use futures::future;
use futures::StreamExt;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio::time::Interval;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::ChangeCache;
use super::Delta;
use super::Indexer;
use super::ResourceEventHandler;
use crate::metrics::CACHE_EVENTS;
use crate::metrics::WATCH_RESTARTS;
use crate::CacheConfig;
use crate::DefinitionStore;
use crate::LabelSelector;
use crate::ResourceDefinition;
use crate::Result;
use crate::WatchEvent;
use crate::WatchEventType;
use crate::WatchPayload;

/// How a list-then-watch round ended
#[derive(Debug, PartialEq, Eq)]
enum WatchOutcome {
    /// Shutdown requested
    Stopped,
    /// The store closed the subscription
    Closed,
}

/// Keeps an [`Indexer`] in sync with the store and notifies a handler of
/// every change applied to it.
pub struct Informer {
    store: Arc<dyn DefinitionStore>,
    selector: LabelSelector,
    config: CacheConfig,
    indexer: Arc<Indexer>,
    handler: Arc<dyn ResourceEventHandler>,
    synced_tx: watch::Sender<bool>,
    synced_rx: watch::Receiver<bool>,
}

impl Informer {
    pub fn new(
        store: Arc<dyn DefinitionStore>,
        selector: LabelSelector,
        config: CacheConfig,
        handler: Arc<dyn ResourceEventHandler>,
    ) -> Self {
        let (synced_tx, synced_rx) = watch::channel(false);
        Self {
            store,
            selector,
            config,
            indexer: Arc::new(Indexer::new()),
            handler,
            synced_tx,
            synced_rx,
        }
    }

    /// Read handle, usable before and after `run` starts
    pub fn cache(&self) -> ChangeCache {
        ChangeCache::new(Arc::clone(&self.indexer), self.synced_rx.clone())
    }

    /// Runs list-then-watch rounds until `shutdown` is cancelled.
    ///
    /// A failed or closed round is followed by a fresh list after the relist
    /// backoff; failures never terminate the loop.
    pub async fn run(
        self,
        shutdown: CancellationToken,
    ) {
        info!(selector = %self.selector, "Starting CRD informer");
        let mut failures: u32 = 0;

        loop {
            let delay = match self.list_and_watch(&shutdown, &mut failures).await {
                Ok(WatchOutcome::Stopped) => break,
                Ok(WatchOutcome::Closed) => {
                    debug!("CRD watch closed by the store, relisting");
                    WATCH_RESTARTS.with_label_values(&["closed"]).inc();
                    self.config.relist_backoff.delay_for(0)
                }
                Err(e) => {
                    let delay = self.config.relist_backoff.delay_for(failures);
                    failures = failures.saturating_add(1);
                    warn!(error = %e, attempt = failures, ?delay, "CRD list/watch failed, relisting after backoff");
                    WATCH_RESTARTS.with_label_values(&["error"]).inc();
                    delay
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("CRD informer stopped");
    }

    /// Resets `failures` once the list succeeds
    async fn list_and_watch(
        &self,
        shutdown: &CancellationToken,
        failures: &mut u32,
    ) -> Result<WatchOutcome> {
        let list = tokio::select! {
            _ = shutdown.cancelled() => return Ok(WatchOutcome::Stopped),
            list = self.store.list(&self.selector) => list?,
        };
        *failures = 0;
        trace!(items = list.items.len(), resource_version = %list.resource_version, "CRD list received");

        let items = list.items.into_iter().filter_map(decode).map(Arc::new).collect();
        for delta in self.indexer.replace(items) {
            self.notify(delta);
        }

        if !*self.synced_rx.borrow() {
            info!(items = self.indexer.len(), "CRD informer cache synced");
            self.synced_tx.send_replace(true);
        }

        let mut stream = tokio::select! {
            _ = shutdown.cancelled() => return Ok(WatchOutcome::Stopped),
            stream = self.store.watch(&self.selector, &list.resource_version) => stream?,
        };

        let mut resync = self.config.resync_period().map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(WatchOutcome::Stopped),
                _ = next_tick(&mut resync) => self.resync(),
                item = stream.next() => match item {
                    None => return Ok(WatchOutcome::Closed),
                    Some(Err(e)) => return Err(e.into()),
                    Some(Ok(event)) => self.apply(event),
                },
            }
        }
    }

    fn apply(
        &self,
        event: WatchEvent,
    ) {
        let WatchEvent {
            event_type,
            payload,
            resource_version,
        } = event;

        let Some(definition) = decode(payload) else {
            return;
        };
        let definition = Arc::new(definition);
        trace!(name = %definition.name(), ?event_type, %resource_version, "CRD watch event");
        CACHE_EVENTS
            .with_label_values(&[event_type_label(event_type)])
            .inc();

        match event_type {
            WatchEventType::Added | WatchEventType::Modified => {
                match self.indexer.upsert(Arc::clone(&definition)) {
                    Some(old) => self.handler.on_update(&old, &definition),
                    None => self.handler.on_add(&definition),
                }
            }
            WatchEventType::Deleted => {
                let removed = self.indexer.remove(definition.name()).unwrap_or(definition);
                self.handler.on_delete(&removed);
            }
        }
    }

    fn notify(
        &self,
        delta: Delta,
    ) {
        match delta {
            Delta::Added(obj) => self.handler.on_add(&obj),
            Delta::Updated { old, new } => self.handler.on_update(&old, &new),
            Delta::Deleted(obj) => self.handler.on_delete(&obj),
        }
    }

    fn resync(&self) {
        trace!(items = self.indexer.len(), "CRD informer resync");
        for obj in self.indexer.list() {
            self.handler.on_update(&obj, &obj);
        }
    }
}

/// Keeps definitions, drops (and logs) objects of any other shape
fn decode(payload: WatchPayload) -> Option<ResourceDefinition> {
    match payload {
        WatchPayload::Definition(definition) => Some(*definition),
        WatchPayload::Unrecognized { kind, .. } => {
            error!(%kind, "Failed to cast object to CRD, dropping it");
            None
        }
    }
}

fn event_type_label(event_type: WatchEventType) -> &'static str {
    match event_type {
        WatchEventType::Added => "added",
        WatchEventType::Modified => "modified",
        WatchEventType::Deleted => "deleted",
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending::<()>().await,
    }
}

impl std::fmt::Debug for Informer {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Informer")
            .field("selector", &self.selector)
            .field("config", &self.config)
            .field("items", &self.indexer.len())
            .finish_non_exhaustive()
    }
}
