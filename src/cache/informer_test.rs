use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::test_utils::enable_logger;
use crate::test_utils::owned_definition;
use crate::test_utils::wait_until;
use crate::BackoffPolicy;
use crate::CacheConfig;
use crate::DefinitionStore;
use crate::Error;
use crate::LabelSelector;
use crate::MemoryDefinitionStore;
use crate::MockDefinitionStore;
use crate::ResourceDefinition;
use crate::StoreError;
use crate::WatchEventType;
use crate::WatcherError;

/// Records handler calls as `kind:name:old_rv->new_rv`
#[derive(Default)]
struct RecordingHandler {
    calls: Mutex<Vec<String>>,
}

impl RecordingHandler {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn count(
        &self,
        prefix: &str,
    ) -> usize {
        self.calls.lock().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

impl ResourceEventHandler for RecordingHandler {
    fn on_add(
        &self,
        obj: &Arc<ResourceDefinition>,
    ) {
        self.calls
            .lock()
            .push(format!("add:{}:{}", obj.name(), obj.resource_version()));
    }

    fn on_update(
        &self,
        old: &Arc<ResourceDefinition>,
        new: &Arc<ResourceDefinition>,
    ) {
        self.calls.lock().push(format!(
            "update:{}:{}->{}",
            new.name(),
            old.resource_version(),
            new.resource_version()
        ));
    }

    fn on_delete(
        &self,
        obj: &Arc<ResourceDefinition>,
    ) {
        self.calls.lock().push(format!("delete:{}", obj.name()));
    }
}

fn test_config() -> CacheConfig {
    CacheConfig {
        sync_timeout_ms: 1000,
        resync_period_ms: 0,
        relist_backoff: BackoffPolicy {
            base_delay_ms: 10,
            max_delay_ms: 40,
        },
    }
}

/// Spawns an informer over `store`, returning its cache, handler and shutdown token
fn spawn_informer(
    store: Arc<dyn DefinitionStore>,
    config: CacheConfig,
) -> (
    ChangeCache,
    Arc<RecordingHandler>,
    CancellationToken,
    tokio::task::JoinHandle<()>,
) {
    enable_logger();
    let handler = Arc::new(RecordingHandler::default());
    let informer = Informer::new(store, LabelSelector::owned(), config, handler.clone());
    let cache = informer.cache();
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(informer.run(shutdown.clone()));
    (cache, handler, shutdown, handle)
}

#[tokio::test]
async fn test_initial_list_populates_cache_and_signals_sync() {
    let store = Arc::new(MemoryDefinitionStore::new());
    store.apply(owned_definition("widgets", ""));
    store.apply(owned_definition("gadgets", ""));

    let (cache, handler, shutdown, _handle) = spawn_informer(store, test_config());

    cache.wait_for_sync(Duration::from_secs(1)).await.unwrap();
    assert!(cache.has_synced());
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.get("widgets").unwrap().resource_version(), "1");
    assert_eq!(handler.count("add:"), 2);

    shutdown.cancel();
}

#[tokio::test]
async fn test_watch_events_update_cache_and_notify_handler() {
    let store = Arc::new(MemoryDefinitionStore::new());
    store.apply(owned_definition("widgets", ""));

    let (cache, handler, shutdown, _handle) = spawn_informer(store.clone(), test_config());
    cache.wait_for_sync(Duration::from_secs(1)).await.unwrap();

    store.apply(owned_definition("widgets", ""));
    assert!(
        wait_until(
            || cache.get("widgets").is_some_and(|d| d.resource_version() == "2"),
            Duration::from_secs(1)
        )
        .await
    );
    assert!(handler.calls().contains(&"update:widgets:1->2".to_string()));

    store.delete("widgets");
    assert!(wait_until(|| cache.get("widgets").is_none(), Duration::from_secs(1)).await);
    assert_eq!(handler.count("delete:widgets"), 1);

    shutdown.cancel();
}

#[tokio::test]
async fn test_unrecognized_payload_is_dropped() {
    let store = Arc::new(MemoryDefinitionStore::new());
    let (cache, handler, shutdown, _handle) = spawn_informer(store.clone(), test_config());
    cache.wait_for_sync(Duration::from_secs(1)).await.unwrap();

    store.inject_raw(
        WatchEventType::Modified,
        serde_json::json!({ "kind": "ConfigMap", "metadata": { "name": "cm" } }),
    );
    store.apply(owned_definition("widgets", ""));

    assert!(wait_until(|| cache.get("widgets").is_some(), Duration::from_secs(1)).await);
    assert!(cache.get("cm").is_none());
    assert_eq!(handler.calls(), vec!["add:widgets:2".to_string()]);

    shutdown.cancel();
}

#[tokio::test]
async fn test_subscription_loss_triggers_relist_and_converges() {
    let store = Arc::new(MemoryDefinitionStore::new());
    store.apply(owned_definition("widgets", ""));
    store.apply(owned_definition("stale", ""));

    let (cache, handler, shutdown, _handle) = spawn_informer(store.clone(), test_config());
    cache.wait_for_sync(Duration::from_secs(1)).await.unwrap();
    assert_eq!(store.list_calls(), 1);

    // Drop the subscription, then change the store behind the cache's back
    store.disconnect_watchers();
    store.delete("stale");

    assert!(wait_until(|| cache.get("stale").is_none(), Duration::from_secs(2)).await);
    assert!(store.list_calls() >= 2);
    // Unchanged objects come back from the relist as same-version updates
    assert!(handler.calls().contains(&"update:widgets:1->1".to_string()));

    shutdown.cancel();
}

#[tokio::test]
async fn test_list_failure_delays_sync_until_store_recovers() {
    let store = Arc::new(MemoryDefinitionStore::new());
    store.fail_lists(true);
    store.apply(owned_definition("widgets", ""));

    let (cache, _handler, shutdown, _handle) = spawn_informer(store.clone(), test_config());

    let result = cache.wait_for_sync(Duration::from_millis(100)).await;
    assert!(matches!(
        result,
        Err(Error::Watcher(WatcherError::CacheSyncTimeout(_)))
    ));
    assert!(!cache.has_synced());

    store.fail_lists(false);
    cache.wait_for_sync(Duration::from_secs(1)).await.unwrap();
    assert!(cache.get("widgets").is_some());

    shutdown.cancel();
}

#[tokio::test]
async fn test_shutdown_before_sync_aborts_waiters() {
    let mut store = MockDefinitionStore::new();
    store
        .expect_list()
        .returning(|_| Err(StoreError::Unavailable("connection refused".to_string()).into()));
    store.expect_watch().never();

    let (cache, _handler, shutdown, handle) = spawn_informer(Arc::new(store), test_config());

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("informer should stop promptly")
        .unwrap();

    let result = cache.wait_for_sync(Duration::from_secs(1)).await;
    assert!(matches!(
        result,
        Err(Error::Watcher(WatcherError::CacheSyncAborted))
    ));
}

#[tokio::test]
async fn test_periodic_resync_re_emits_cached_objects() {
    let store = Arc::new(MemoryDefinitionStore::new());
    store.apply(owned_definition("widgets", ""));

    let config = CacheConfig {
        resync_period_ms: 20,
        ..test_config()
    };
    let (cache, handler, shutdown, _handle) = spawn_informer(store, config);
    cache.wait_for_sync(Duration::from_secs(1)).await.unwrap();

    assert!(
        wait_until(
            || handler.count("update:widgets:1->1") >= 2,
            Duration::from_secs(1)
        )
        .await
    );

    shutdown.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_successful_list_resets_relist_backoff() {
    let list_times = Arc::new(Mutex::new(Vec::new()));
    let recorded = list_times.clone();
    let mut calls = 0u32;
    let mut store = MockDefinitionStore::new();
    store.expect_list().returning(move |_| {
        calls += 1;
        recorded.lock().push(tokio::time::Instant::now());
        if calls <= 2 {
            Err(StoreError::Unavailable("connection refused".to_string()).into())
        } else {
            Ok(crate::ListResult::default())
        }
    });
    store.expect_watch().returning(|_, _| {
        let stream: crate::WatchStream = Box::pin(futures::stream::iter(vec![Err(
            StoreError::Unavailable("stream reset".to_string()),
        )]));
        Ok(stream)
    });
    let config = CacheConfig {
        sync_timeout_ms: 1000,
        resync_period_ms: 0,
        relist_backoff: BackoffPolicy {
            base_delay_ms: 100,
            max_delay_ms: 10_000,
        },
    };

    let (cache, _handler, shutdown, handle) = spawn_informer(Arc::new(store), config);
    cache.wait_for_sync(Duration::from_secs(5)).await.unwrap();
    assert!(wait_until(|| list_times.lock().len() >= 4, Duration::from_secs(5)).await);
    shutdown.cancel();
    handle.await.unwrap();

    let times = list_times.lock().clone();
    // Two failed lists escalate the delay to 200ms
    assert!(times[2] - times[1] >= Duration::from_millis(200));
    // The successful third list resets it to the base delay
    let after_success = times[3] - times[2];
    assert!(after_success >= Duration::from_millis(100));
    assert!(after_success < Duration::from_millis(200));
}
