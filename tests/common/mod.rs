use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Once;
use std::time::Duration;

use crd_watch::CallbackError;
use crd_watch::DefinitionNames;
use crd_watch::DefinitionSpec;
use crd_watch::DefinitionVersion;
use crd_watch::ObjectMeta;
use crd_watch::ResourceDefinition;
use crd_watch::WatcherConfig;
use crd_watch::OWNED_LABEL;
use crd_watch::OWNED_LABEL_VALUE;
use futures::future::Ready;
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

static LOGGER_INIT: Once = Once::new();

pub fn enable_logger() {
    LOGGER_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// `{plural}.kro.run`, optionally carrying the owned label
pub fn definition(
    plural: &str,
    owned: bool,
) -> ResourceDefinition {
    let mut labels = BTreeMap::new();
    if owned {
        labels.insert(OWNED_LABEL.to_string(), OWNED_LABEL_VALUE.to_string());
    }
    ResourceDefinition {
        metadata: ObjectMeta {
            name: format!("{plural}.kro.run"),
            labels,
            ..Default::default()
        },
        spec: DefinitionSpec {
            group: "kro.run".to_string(),
            names: DefinitionNames {
                plural: plural.to_string(),
                singular: plural.trim_end_matches('s').to_string(),
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

pub fn fast_config() -> WatcherConfig {
    let mut config = WatcherConfig::default();
    config.cache.sync_timeout_ms = 1000;
    config.cache.relist_backoff.base_delay_ms = 10;
    config.cache.relist_backoff.max_delay_ms = 50;
    config.queue.base_delay_ms = 5;
    config.queue.max_delay_ms = 100;
    config
}

/// Records `name@resource_version` for every invocation and fails the first
/// `failures` of them.
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<String>>>,
    failures: Arc<Mutex<u32>>,
}

impl Recorder {
    pub fn failing(failures: u32) -> Self {
        Self {
            seen: Arc::default(),
            failures: Arc::new(Mutex::new(failures)),
        }
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }

    pub fn callback(
        &self
    ) -> impl Fn(Arc<ResourceDefinition>) -> Ready<Result<(), CallbackError>> + Send + Sync + 'static {
        let recorder = self.clone();
        move |definition: Arc<ResourceDefinition>| {
            recorder
                .seen
                .lock()
                .push(format!("{}@{}", definition.name(), definition.resource_version()));
            let mut failures = recorder.failures.lock();
            let result: Result<(), CallbackError> = if *failures > 0 {
                *failures -= 1;
                Err("transient failure".into())
            } else {
                Ok(())
            };
            futures::future::ready(result)
        }
    }
}

/// Polls `condition` until it holds or `timeout` elapses
pub async fn eventually<F>(
    condition: F,
    timeout: Duration,
) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
