use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Once;

use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

use crate::constants::OWNED_LABEL;
use crate::constants::OWNED_LABEL_VALUE;
use crate::CallbackError;
use crate::DefinitionCallback;
use crate::DefinitionNames;
use crate::DefinitionSpec;
use crate::DefinitionVersion;
use crate::ObjectMeta;
use crate::ResourceDefinition;

static INIT_LOGGER: Once = Once::new();

/// Installs a test-writer tracing subscriber once per test binary.
pub(crate) fn enable_logger() {
    INIT_LOGGER.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Owned definition `name` at resource version `rv`, serving `v1alpha1`.
pub(crate) fn owned_definition(
    name: &str,
    rv: &str,
) -> ResourceDefinition {
    let mut labels = BTreeMap::new();
    labels.insert(OWNED_LABEL.to_string(), OWNED_LABEL_VALUE.to_string());

    ResourceDefinition {
        metadata: ObjectMeta {
            name: name.to_string(),
            resource_version: rv.to_string(),
            labels,
            generation: 1,
        },
        spec: DefinitionSpec {
            group: "kro.run".to_string(),
            names: DefinitionNames {
                plural: name.split('.').next().unwrap_or(name).to_string(),
                singular: name.to_string(),
                kind: "Widget".to_string(),
            },
            versions: vec![DefinitionVersion {
                name: "v1alpha1".to_string(),
                served: true,
                storage: true,
            }],
            schema: serde_json::Value::Null,
        },
    }
}

/// Same definition without the owned label.
pub(crate) fn foreign_definition(
    name: &str,
    rv: &str,
) -> ResourceDefinition {
    let mut definition = owned_definition(name, rv);
    definition.metadata.labels.clear();
    definition
}

/// Callback recording the resource versions it observed.
///
/// The first `failures` invocations return an error.
#[derive(Clone, Default)]
pub(crate) struct RecordingCallback {
    pub(crate) seen: Arc<Mutex<Vec<String>>>,
    failures: Arc<Mutex<u32>>,
}

impl RecordingCallback {
    pub(crate) fn failing(failures: u32) -> Self {
        Self {
            seen: Arc::default(),
            failures: Arc::new(Mutex::new(failures)),
        }
    }

    pub(crate) fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

#[async_trait::async_trait]
impl DefinitionCallback for RecordingCallback {
    async fn on_change(
        &self,
        definition: Arc<ResourceDefinition>,
    ) -> Result<(), CallbackError> {
        self.seen.lock().push(definition.resource_version().to_string());
        let mut failures = self.failures.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err("reconcile failed".into());
        }
        Ok(())
    }
}

/// Polls `condition` every 5ms until it holds or `timeout` elapses.
pub(crate) async fn wait_until<F>(
    condition: F,
    timeout: std::time::Duration,
) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
}
