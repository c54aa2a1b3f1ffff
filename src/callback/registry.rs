use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::DefinitionCallback;

/// Maps definition names to their callback.
///
/// Every call performs a single map mutation or read under the lock; lookups
/// hand out a clone of the `Arc` so the callback runs without holding it.
#[derive(Default)]
pub struct CallbackRegistry {
    callbacks: RwLock<HashMap<String, Arc<dyn DefinitionCallback>>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `callback` for `name`, replacing any previous one
    pub fn register(
        &self,
        name: impl Into<String>,
        callback: Arc<dyn DefinitionCallback>,
    ) {
        let name = name.into();
        debug!(crd_name = %name, "Registering callback for CRD");
        self.callbacks.write().insert(name, callback);
    }

    /// Removes the callback for `name`; returns whether one was registered
    pub fn unregister(
        &self,
        name: &str,
    ) -> bool {
        debug!(crd_name = %name, "Unregistering callback for CRD");
        self.callbacks.write().remove(name).is_some()
    }

    pub fn lookup(
        &self,
        name: &str,
    ) -> Option<Arc<dyn DefinitionCallback>> {
        self.callbacks.read().get(name).cloned()
    }

    pub fn is_registered(
        &self,
        name: &str,
    ) -> bool {
        self.callbacks.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.callbacks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.read().is_empty()
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let callbacks = self.callbacks.read();
        let mut names: Vec<&String> = callbacks.keys().collect();
        names.sort();
        f.debug_struct("CallbackRegistry").field("names", &names).finish()
    }
}
