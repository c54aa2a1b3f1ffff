use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

use crate::ResourceDefinition;

/// Difference produced when a fresh list replaces the indexer contents
#[derive(Debug, Clone)]
pub enum Delta {
    Added(Arc<ResourceDefinition>),
    Updated {
        old: Arc<ResourceDefinition>,
        new: Arc<ResourceDefinition>,
    },
    Deleted(Arc<ResourceDefinition>),
}

/// Local mirror of the watched definitions, keyed by name.
///
/// Only the informer writes; readers may run concurrently with writes.
#[derive(Debug, Default)]
pub struct Indexer {
    items: DashMap<String, Arc<ResourceDefinition>>,
}

impl Indexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(
        &self,
        key: &str,
    ) -> Option<Arc<ResourceDefinition>> {
        self.items.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Inserts or replaces, returning the previous copy
    pub(crate) fn upsert(
        &self,
        definition: Arc<ResourceDefinition>,
    ) -> Option<Arc<ResourceDefinition>> {
        self.items.insert(definition.name().to_string(), definition)
    }

    pub(crate) fn remove(
        &self,
        key: &str,
    ) -> Option<Arc<ResourceDefinition>> {
        self.items.remove(key).map(|(_, v)| v)
    }

    /// Replaces the whole content with a fresh snapshot.
    ///
    /// Every listed object yields `Added` or `Updated` (even when unchanged),
    /// every cached object missing from the snapshot yields `Deleted`.
    pub(crate) fn replace(
        &self,
        items: Vec<Arc<ResourceDefinition>>,
    ) -> Vec<Delta> {
        let mut deltas = Vec::with_capacity(items.len());
        let mut listed = HashSet::with_capacity(items.len());

        for new in items {
            listed.insert(new.name().to_string());
            match self.upsert(Arc::clone(&new)) {
                Some(old) => deltas.push(Delta::Updated { old, new }),
                None => deltas.push(Delta::Added(new)),
            }
        }

        let stale: Vec<String> = self
            .items
            .iter()
            .filter(|entry| !listed.contains(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        for key in stale {
            if let Some(old) = self.remove(&key) {
                deltas.push(Delta::Deleted(old));
            }
        }

        deltas
    }

    pub fn keys(&self) -> Vec<String> {
        self.items.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn list(&self) -> Vec<Arc<ResourceDefinition>> {
        self.items.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
