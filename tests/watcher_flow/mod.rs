use std::sync::Arc;
use std::time::Duration;

use crd_watch::CrdWatcher;
use crd_watch::Error;
use crd_watch::GroupVersionResource;
use crd_watch::MemoryDefinitionStore;
use crd_watch::WatcherError;
use crd_watch::WatcherState;

use crate::common::definition;
use crate::common::enable_logger;
use crate::common::eventually;
use crate::common::fast_config;
use crate::common::Recorder;

const WIDGETS: &str = "widgets.kro.run";
const GADGETS: &str = "gadgets.kro.run";

#[tokio::test]
async fn updates_reach_only_the_matching_callback() {
    enable_logger();
    let store = Arc::new(MemoryDefinitionStore::new());
    store.apply(definition("widgets", true));
    store.apply(definition("gadgets", true));

    let widgets = Recorder::default();
    let gadgets = Recorder::default();
    let watcher = CrdWatcher::new(store.clone(), fast_config()).unwrap();
    watcher.register_callback(WIDGETS, widgets.callback());
    watcher.register_callback(GADGETS, gadgets.callback());
    watcher.start().await.unwrap();

    let updated = store.apply(definition("widgets", true));
    let expected = format!("{WIDGETS}@{}", updated.resource_version());

    assert!(eventually(|| widgets.seen() == vec![expected.clone()], Duration::from_secs(2)).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(gadgets.seen().is_empty());

    watcher.stop().await;
    assert_eq!(watcher.state(), WatcherState::Stopped);
}

#[tokio::test]
async fn transient_failures_are_retried_with_latest_state() {
    enable_logger();
    let store = Arc::new(MemoryDefinitionStore::new());
    store.apply(definition("widgets", true));

    let widgets = Recorder::failing(2);
    let watcher = CrdWatcher::new(store.clone(), fast_config()).unwrap();
    watcher.register_callback(WIDGETS, widgets.callback());
    watcher.start().await.unwrap();

    let updated = store.apply(definition("widgets", true));
    let expected = format!("{WIDGETS}@{}", updated.resource_version());

    assert!(eventually(|| widgets.seen().len() == 3, Duration::from_secs(2)).await);
    assert!(widgets.seen().iter().all(|seen| *seen == expected));

    watcher.stop().await;
}

#[tokio::test]
async fn losing_the_owned_label_removes_definition_from_cache() {
    enable_logger();
    let store = Arc::new(MemoryDefinitionStore::new());
    store.apply(definition("widgets", true));

    let watcher = CrdWatcher::new(store.clone(), fast_config()).unwrap();
    watcher.start().await.unwrap();
    assert!(watcher.cache().get(WIDGETS).is_some());

    store.apply(definition("widgets", false));

    assert!(eventually(|| watcher.cache().get(WIDGETS).is_none(), Duration::from_secs(2)).await);
    watcher.stop().await;
}

#[tokio::test]
async fn cached_definition_resolves_to_its_group_version_resource() {
    enable_logger();
    let store = Arc::new(MemoryDefinitionStore::new());
    store.apply(definition("widgets", true));

    let watcher = CrdWatcher::new(store.clone(), fast_config()).unwrap();
    watcher.start().await.unwrap();

    let cached = watcher.cache().get(WIDGETS).unwrap();
    let gvr = GroupVersionResource::from_definition(&cached).unwrap();
    assert_eq!(gvr.to_string(), "kro.run/v1alpha1, Resource=widgets");

    watcher.stop().await;
}

#[tokio::test]
async fn unreachable_store_fails_start() {
    enable_logger();
    let store = Arc::new(MemoryDefinitionStore::new());
    store.fail_lists(true);

    let mut config = fast_config();
    config.cache.sync_timeout_ms = 100;
    let watcher = CrdWatcher::new(store.clone(), config).unwrap();

    let result = watcher.start().await;

    assert!(matches!(
        result,
        Err(Error::Watcher(WatcherError::CacheSyncTimeout(_)))
    ));
    assert_eq!(watcher.state(), WatcherState::Stopped);
    assert!(store.list_calls() >= 1);
    assert_eq!(store.watch_calls(), 0);
}
