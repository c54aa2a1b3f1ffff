use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use futures::future;
use futures::stream;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;

use super::DefinitionStore;
use super::LabelSelector;
use super::ListResult;
use super::WatchEvent;
use super::WatchEventType;
use super::WatchPayload;
use super::WatchStream;
use crate::ResourceDefinition;
use crate::Result;
use crate::StoreError;

const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Unfiltered change as recorded by the store
#[derive(Debug, Clone)]
struct StoreEvent {
    revision: u64,
    event_type: WatchEventType,
    payload: WatchPayload,
    /// State before a modification, used to translate label transitions
    previous: Option<ResourceDefinition>,
}

struct StoreState {
    objects: BTreeMap<String, ResourceDefinition>,
    revision: u64,
    history: Vec<StoreEvent>,
    /// Watches starting at or below this revision can no longer be served
    compacted: u64,
    disconnect: CancellationToken,
}

/// In-process store with list/watch semantics.
///
/// Every mutation bumps a store-wide revision which becomes the object's
/// resource version. Watches replay the recorded history after the requested
/// revision and then follow live changes. A watcher whose selector stops
/// matching a modified object observes a `Deleted` event, one that starts
/// matching observes `Added`.
pub struct MemoryDefinitionStore {
    state: Mutex<StoreState>,
    /// Most recent events kept for replay
    history_limit: usize,
    events: broadcast::Sender<StoreEvent>,
    fail_lists: AtomicBool,
    list_calls: AtomicUsize,
    watch_calls: AtomicUsize,
}

impl Default for MemoryDefinitionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDefinitionStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// `capacity` bounds how far a watcher may lag before its stream reports
    /// `StoreError::WatchExpired`, and how many past events are kept for
    /// replay. Older events are compacted away.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (events, _) = broadcast::channel(capacity);
        Self {
            state: Mutex::new(StoreState {
                objects: BTreeMap::new(),
                revision: 0,
                history: Vec::new(),
                compacted: 0,
                disconnect: CancellationToken::new(),
            }),
            events,
            history_limit: capacity,
            fail_lists: AtomicBool::new(false),
            list_calls: AtomicUsize::new(0),
            watch_calls: AtomicUsize::new(0),
        }
    }

    /// Creates or replaces `definition`, returning the stored copy with its new
    /// resource version
    pub fn apply(
        &self,
        mut definition: ResourceDefinition,
    ) -> ResourceDefinition {
        let mut state = self.state.lock();
        state.revision += 1;
        definition.metadata.resource_version = state.revision.to_string();

        let previous = state
            .objects
            .insert(definition.metadata.name.clone(), definition.clone());
        let event_type = if previous.is_some() {
            WatchEventType::Modified
        } else {
            WatchEventType::Added
        };
        trace!(name = %definition.metadata.name, revision = state.revision, ?event_type, "store apply");

        let event = StoreEvent {
            revision: state.revision,
            event_type,
            payload: definition.clone().into(),
            previous,
        };
        self.publish(&mut state, event);
        definition
    }

    /// Removes `name`, returning the deleted object if it existed
    pub fn delete(
        &self,
        name: &str,
    ) -> Option<ResourceDefinition> {
        let mut state = self.state.lock();
        let mut removed = state.objects.remove(name)?;
        state.revision += 1;
        removed.metadata.resource_version = state.revision.to_string();
        trace!(name, revision = state.revision, "store delete");

        let event = StoreEvent {
            revision: state.revision,
            event_type: WatchEventType::Deleted,
            payload: removed.clone().into(),
            previous: None,
        };
        self.publish(&mut state, event);
        Some(removed)
    }

    /// Emits an arbitrary object on every watch without storing it
    pub fn inject_raw(
        &self,
        event_type: WatchEventType,
        raw: serde_json::Value,
    ) {
        let mut state = self.state.lock();
        state.revision += 1;
        let event = StoreEvent {
            revision: state.revision,
            event_type,
            payload: WatchPayload::from_value(raw),
            previous: None,
        };
        self.publish(&mut state, event);
    }

    pub fn get(
        &self,
        name: &str,
    ) -> Option<ResourceDefinition> {
        self.state.lock().objects.get(name).cloned()
    }

    /// Ends every active watch stream
    pub fn disconnect_watchers(&self) {
        let mut state = self.state.lock();
        let previous = std::mem::replace(&mut state.disconnect, CancellationToken::new());
        previous.cancel();
        debug!("store disconnected all watchers");
    }

    /// Drops the recorded history; watches resuming from an older revision
    /// fail with `WatchExpired`
    pub fn compact(&self) {
        let mut state = self.state.lock();
        state.history.clear();
        state.compacted = state.revision;
    }

    /// Makes subsequent `list` calls fail until reset
    pub fn fail_lists(
        &self,
        fail: bool,
    ) {
        self.fail_lists.store(fail, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn watch_calls(&self) -> usize {
        self.watch_calls.load(Ordering::SeqCst)
    }

    fn publish(
        &self,
        state: &mut StoreState,
        event: StoreEvent,
    ) {
        state.history.push(event.clone());
        if state.history.len() > self.history_limit {
            let excess = state.history.len() - self.history_limit;
            let dropped: Vec<StoreEvent> = state.history.drain(..excess).collect();
            if let Some(last) = dropped.last() {
                state.compacted = last.revision;
            }
        }
        // No receivers is fine; the event is in the history
        let _ = self.events.send(event);
    }
}

/// Translates a store event into what a watcher with `selector` observes
fn filter_event(
    selector: &LabelSelector,
    event: StoreEvent,
) -> Option<WatchEvent> {
    let resource_version = event.revision.to_string();
    let event_type = match &event.payload {
        WatchPayload::Unrecognized { .. } => Some(event.event_type),
        WatchPayload::Definition(definition) => {
            let now = selector.matches(&definition.metadata.labels);
            match event.event_type {
                WatchEventType::Modified => {
                    let was = event
                        .previous
                        .as_ref()
                        .is_some_and(|p| selector.matches(&p.metadata.labels));
                    match (was, now) {
                        (true, true) => Some(WatchEventType::Modified),
                        (false, true) => Some(WatchEventType::Added),
                        (true, false) => Some(WatchEventType::Deleted),
                        (false, false) => None,
                    }
                }
                other => now.then_some(other),
            }
        }
    }?;

    Some(WatchEvent {
        event_type,
        payload: event.payload,
        resource_version,
    })
}

#[async_trait]
impl DefinitionStore for MemoryDefinitionStore {
    async fn list(
        &self,
        selector: &LabelSelector,
    ) -> Result<ListResult> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_lists.load(Ordering::SeqCst) {
            return Err(StoreError::ListFailed("list rejected by store".to_string()).into());
        }

        let state = self.state.lock();
        let items = state
            .objects
            .values()
            .filter(|d| selector.matches(&d.metadata.labels))
            .cloned()
            .map(WatchPayload::from)
            .collect();

        Ok(ListResult {
            items,
            resource_version: state.revision.to_string(),
        })
    }

    async fn watch(
        &self,
        selector: &LabelSelector,
        resource_version: &str,
    ) -> Result<WatchStream> {
        self.watch_calls.fetch_add(1, Ordering::SeqCst);

        let since: u64 = if resource_version.is_empty() {
            0
        } else {
            resource_version
                .parse()
                .map_err(|_| StoreError::WatchFailed(format!("invalid resource version {resource_version}")))?
        };

        // Subscribe under the state lock so nothing published between the
        // history snapshot and the subscription is lost or duplicated.
        let (replay, receiver, disconnect) = {
            let state = self.state.lock();
            if since < state.compacted {
                return Err(StoreError::WatchExpired {
                    resource_version: resource_version.to_string(),
                }
                .into());
            }
            let replay: Vec<StoreEvent> = state
                .history
                .iter()
                .filter(|e| e.revision > since)
                .cloned()
                .collect();
            (replay, self.events.subscribe(), state.disconnect.clone())
        };

        let expired_at = resource_version.to_string();
        let live = BroadcastStream::new(receiver).map(move |item| match item {
            Ok(event) => Ok(event),
            Err(BroadcastStreamRecvError::Lagged(missed)) => {
                debug!(missed, "watcher lagged behind the store");
                Err(StoreError::WatchExpired {
                    resource_version: expired_at.clone(),
                })
            }
        });

        let selector = selector.clone();
        let stream = stream::iter(replay.into_iter().map(Ok))
            .chain(live)
            .filter_map(move |item| {
                future::ready(match item {
                    Ok(event) => filter_event(&selector, event).map(Ok),
                    Err(e) => Some(Err(e)),
                })
            })
            .take_until(disconnect.cancelled_owned());

        Ok(Box::pin(stream))
    }
}
