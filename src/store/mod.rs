//! Interface of the remote cluster-state store.
//!
//! The watcher only needs two calls from the store: a filtered `list` that
//! returns a consistent snapshot together with its resource version, and a
//! filtered `watch` that streams every change after a given resource version.
//! Losing the watch stream (end of stream or an `Err` item) makes the
//! informer fall back to a fresh list.
mod memory;
pub use memory::*;


use std::collections::BTreeMap;
use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
#[cfg(test)]
use mockall::automock;

use crate::constants::OWNED_LABEL;
use crate::constants::OWNED_LABEL_VALUE;
use crate::ResourceDefinition;
use crate::Result;
use crate::StoreError;

/// Single equality match on a label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSelector {
    pub key: String,
    pub value: String,
}

impl LabelSelector {
    pub fn new(
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Selector for definitions managed by the orchestrator
    pub fn owned() -> Self {
        Self::new(OWNED_LABEL, OWNED_LABEL_VALUE)
    }

    pub fn matches(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> bool {
        labels.get(&self.key).is_some_and(|v| *v == self.value)
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
}

/// Object carried by a watch event or list result
#[derive(Debug, Clone, PartialEq)]
pub enum WatchPayload {
    Definition(Box<ResourceDefinition>),
    /// Object that does not have the shape of a resource definition
    Unrecognized {
        kind: String,
        raw: serde_json::Value,
    },
}

impl WatchPayload {
    /// Decodes a raw store object, keeping it as `Unrecognized` on shape mismatch
    pub fn from_value(raw: serde_json::Value) -> Self {
        match serde_json::from_value::<ResourceDefinition>(raw.clone()) {
            Ok(definition) => WatchPayload::Definition(Box::new(definition)),
            Err(_) => WatchPayload::Unrecognized {
                kind: raw
                    .get("kind")
                    .and_then(|k| k.as_str())
                    .unwrap_or("unknown")
                    .to_string(),
                raw,
            },
        }
    }
}

impl From<ResourceDefinition> for WatchPayload {
    fn from(definition: ResourceDefinition) -> Self {
        WatchPayload::Definition(Box::new(definition))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WatchEvent {
    pub event_type: WatchEventType,
    pub payload: WatchPayload,
    /// Store revision at which the event happened
    pub resource_version: String,
}

/// Consistent snapshot returned by `list`
#[derive(Debug, Clone, Default)]
pub struct ListResult {
    pub items: Vec<WatchPayload>,
    /// Revision of the snapshot, used to resume the watch
    pub resource_version: String,
}

pub type WatchStream =
    Pin<Box<dyn Stream<Item = std::result::Result<WatchEvent, StoreError>> + Send>>;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait DefinitionStore: Send + Sync + 'static {
    /// Lists every definition matching `selector`
    async fn list(
        &self,
        selector: &LabelSelector,
    ) -> Result<ListResult>;

    /// Streams changes to definitions matching `selector` that happened after
    /// `resource_version`
    async fn watch(
        &self,
        selector: &LabelSelector,
        resource_version: &str,
    ) -> Result<WatchStream>;
}
