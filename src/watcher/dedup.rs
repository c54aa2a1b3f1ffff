use std::sync::Arc;

use tracing::debug;
use tracing::trace;

use crate::RateLimitingQueue;
use crate::ResourceDefinition;
use crate::ResourceEventHandler;

/// Turns cache updates that carry a new resource version into queued keys.
///
/// Relists and periodic resyncs deliver updates whose version did not change;
/// those are dropped. Additions and deletions are not dispatched.
pub struct DedupFilter {
    queue: RateLimitingQueue<String>,
}

impl DedupFilter {
    pub fn new(queue: RateLimitingQueue<String>) -> Self {
        Self { queue }
    }

    /// Whether the change from `old` to `new` warrants a dispatch
    pub fn should_enqueue(
        old: &ResourceDefinition,
        new: &ResourceDefinition,
    ) -> bool {
        old.resource_version() != new.resource_version()
    }
}

impl ResourceEventHandler for DedupFilter {
    fn on_add(
        &self,
        obj: &Arc<ResourceDefinition>,
    ) {
        trace!(name = %obj.name(), "CRD added, not dispatched");
    }

    fn on_update(
        &self,
        old: &Arc<ResourceDefinition>,
        new: &Arc<ResourceDefinition>,
    ) {
        if !Self::should_enqueue(old, new) {
            return;
        }

        debug!(
            name = %new.name(),
            old_resource_version = %old.resource_version(),
            new_resource_version = %new.resource_version(),
            "CRD updated"
        );
        self.queue.add(new.name().to_string());
    }

    fn on_delete(
        &self,
        obj: &Arc<ResourceDefinition>,
    ) {
        trace!(name = %obj.name(), "CRD deleted, not dispatched");
    }
}
