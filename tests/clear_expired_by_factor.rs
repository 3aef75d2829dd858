use bytes::Bytes;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use sweepkv::events::{
    EventHookRegistry, EventManager, EventName, HookError, Listener, ListenerHandle,
    RegistryError, RegistryId,
};
use sweepkv::plugin::{
    ClearExpiredByFactor, Plugin, PluginError, PluginOptions, SeededRandom, DEFAULT_PRIORITY,
};
use sweepkv::storage::{Cache, CacheError, ClearExpired, Storage, StorageEngine, SweepError};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn plugin_with_factor(factor: u32) -> ClearExpiredByFactor {
    ClearExpiredByFactor::with_random_source(
        Arc::new(PluginOptions::new(factor)),
        Arc::new(SeededRandom::new(2024)),
    )
}

/// Registry wrapper that counts calls into the inner registry.
#[derive(Default)]
struct CountingRegistry {
    inner: EventManager,
    subscribes: AtomicUsize,
    unsubscribes: AtomicUsize,
}

impl EventHookRegistry for CountingRegistry {
    fn id(&self) -> RegistryId {
        self.inner.id()
    }

    fn subscribe(&self, event: EventName, listener: Listener, priority: i32) -> ListenerHandle {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        self.inner.subscribe(event, listener, priority)
    }

    fn unsubscribe(&self, handle: ListenerHandle) -> Result<(), RegistryError> {
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        self.inner.unsubscribe(handle)
    }
}

/// Key-value backend whose sweeps can be counted and made to fail.
#[derive(Default)]
struct FlakySweepBackend {
    engine: StorageEngine,
    sweeps: AtomicU64,
    fail: bool,
}

impl ClearExpired for FlakySweepBackend {
    fn clear_expired(&self) -> Result<u64, SweepError> {
        self.sweeps.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(SweepError::Failed("index locked".into()));
        }
        self.engine.clear_expired()
    }
}

impl Storage for FlakySweepBackend {
    fn set_item(&self, key: Bytes, value: Bytes, ttl: Option<Duration>) -> bool {
        self.engine.set_item(key, value, ttl)
    }

    fn add_item(&self, key: Bytes, value: Bytes, ttl: Option<Duration>) -> bool {
        self.engine.add_item(key, value, ttl)
    }

    fn get_item(&self, key: &Bytes) -> Option<Bytes> {
        self.engine.get_item(key)
    }

    fn remove_item(&self, key: &Bytes) -> bool {
        self.engine.remove_item(key)
    }

    fn expiry_sweep(&self) -> Option<&dyn ClearExpired> {
        Some(self)
    }
}

/// Backend with no notion of expiry.
#[derive(Default)]
struct NoExpiryBackend {
    engine: StorageEngine,
}

impl Storage for NoExpiryBackend {
    fn set_item(&self, key: Bytes, value: Bytes, _ttl: Option<Duration>) -> bool {
        self.engine.set(key, value)
    }

    fn add_item(&self, key: Bytes, value: Bytes, _ttl: Option<Duration>) -> bool {
        self.engine.add(key, value)
    }

    fn get_item(&self, key: &Bytes) -> Option<Bytes> {
        self.engine.get(key)
    }

    fn remove_item(&self, key: &Bytes) -> bool {
        self.engine.delete(key)
    }
}

// ---------------------------------------------------------------------------
// Attachment protocol
// ---------------------------------------------------------------------------

#[test]
fn double_attach_fails_without_subscribing() {
    let registry = CountingRegistry::default();
    let plugin = plugin_with_factor(1);

    plugin.attach(&registry, DEFAULT_PRIORITY).unwrap();
    assert_eq!(registry.subscribes.load(Ordering::SeqCst), 4);

    let second = plugin.attach(&registry, DEFAULT_PRIORITY);
    assert_eq!(second, Err(PluginError::AlreadyAttached(registry.id())));
    assert_eq!(registry.subscribes.load(Ordering::SeqCst), 4);
    assert_eq!(registry.inner.listener_count(), 4);
}

#[test]
fn detach_without_attach_makes_no_unsubscribe_calls() {
    let registry = CountingRegistry::default();
    let plugin = plugin_with_factor(1);

    assert_eq!(
        plugin.detach(&registry),
        Err(PluginError::NotAttached(registry.id()))
    );
    assert_eq!(registry.unsubscribes.load(Ordering::SeqCst), 0);
}

#[test]
fn attach_detach_attach_leaves_exactly_four_listeners() {
    let registry = CountingRegistry::default();
    let plugin = plugin_with_factor(1);

    plugin.attach(&registry, DEFAULT_PRIORITY).unwrap();
    plugin.detach(&registry).unwrap();
    assert_eq!(registry.unsubscribes.load(Ordering::SeqCst), 4);
    assert_eq!(registry.inner.listener_count(), 0);

    plugin.attach(&registry, DEFAULT_PRIORITY).unwrap();
    assert_eq!(registry.inner.listener_count(), 4);
    for name in EventName::ALL {
        assert_eq!(registry.inner.listener_count_for(name), 1);
    }
}

#[test]
fn concurrent_attach_to_distinct_registries() {
    let plugin = Arc::new(plugin_with_factor(1));
    let registries: Vec<Arc<EventManager>> =
        (0..16).map(|_| Arc::new(EventManager::new())).collect();

    let handles: Vec<_> = registries
        .iter()
        .map(|registry| {
            let plugin = Arc::clone(&plugin);
            let registry = Arc::clone(registry);
            thread::spawn(move || plugin.attach(&*registry, DEFAULT_PRIORITY))
        })
        .collect();

    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    assert_eq!(plugin.attachment_count(), 16);
    for registry in &registries {
        assert_eq!(registry.listener_count(), 4);
    }
}

#[test]
fn racing_attach_on_one_registry_has_single_winner() {
    let plugin = Arc::new(plugin_with_factor(1));
    let registry = Arc::new(EventManager::new());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let plugin = Arc::clone(&plugin);
            let registry = Arc::clone(&registry);
            thread::spawn(move || plugin.attach(&*registry, DEFAULT_PRIORITY))
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| *e == PluginError::AlreadyAttached(registry.id())));
    assert_eq!(registry.listener_count(), 4);
}

// ---------------------------------------------------------------------------
// Write path
// ---------------------------------------------------------------------------

#[test]
fn factor_one_sweeps_once_per_set() {
    let cache = Cache::new(StorageEngine::new());
    let plugin = plugin_with_factor(1);
    cache.add_plugin(&plugin, DEFAULT_PRIORITY).unwrap();

    cache
        .set_item_with_ttl(Bytes::from("stale"), Bytes::from("x"), Duration::ZERO)
        .unwrap();
    assert_eq!(cache.storage().stats().sweeps, 1);

    assert!(cache.set_item(Bytes::from("fresh"), Bytes::from("y")).unwrap());
    assert_eq!(cache.storage().stats().sweeps, 2);
    assert_eq!(cache.storage().len(), 1);
}

#[test]
fn every_write_kind_reaches_the_plugin() {
    let cache = Cache::new(FlakySweepBackend::default());
    let plugin = plugin_with_factor(1);
    cache.add_plugin(&plugin, DEFAULT_PRIORITY).unwrap();

    cache.set_item(Bytes::from("a"), Bytes::from("1")).unwrap();
    cache
        .set_items(vec![(Bytes::from("b"), Bytes::from("2"))], None)
        .unwrap();
    cache.add_item(Bytes::from("c"), Bytes::from("3")).unwrap();
    cache
        .add_items(vec![(Bytes::from("d"), Bytes::from("4"))], None)
        .unwrap();

    assert_eq!(cache.storage().sweeps.load(Ordering::SeqCst), 4);

    // Reads and removals are not writes
    cache.get_item(&Bytes::from("a"));
    cache.remove_item(&Bytes::from("a"));
    assert_eq!(cache.storage().sweeps.load(Ordering::SeqCst), 4);
}

#[test]
fn sweep_failure_fails_the_write() {
    let cache = Cache::new(FlakySweepBackend {
        fail: true,
        ..Default::default()
    });
    let plugin = plugin_with_factor(1);
    cache.add_plugin(&plugin, DEFAULT_PRIORITY).unwrap();

    let result = cache.set_item(Bytes::from("key"), Bytes::from("value"));
    match result {
        Err(CacheError::Hook(HookError::Sweep(SweepError::Failed(msg)))) => {
            assert_eq!(msg, "index locked")
        }
        other => panic!("expected sweep failure, got {:?}", other),
    }

    // The value itself was committed
    assert_eq!(cache.get_item(&Bytes::from("key")), Some(Bytes::from("value")));
}

#[test]
fn backend_without_sweep_capability_is_ignored() {
    let cache = Cache::new(NoExpiryBackend::default());
    let plugin = plugin_with_factor(1);
    cache.add_plugin(&plugin, DEFAULT_PRIORITY).unwrap();

    for i in 0..100 {
        cache
            .set_item(Bytes::from(format!("k{}", i)), Bytes::from("v"))
            .unwrap();
    }
    assert_eq!(cache.storage().engine.stats().sweeps, 0);
}

#[test]
fn factor_zero_never_sweeps_through_cache() {
    let cache = Cache::new(StorageEngine::new());
    let plugin = plugin_with_factor(0);
    cache.add_plugin(&plugin, DEFAULT_PRIORITY).unwrap();

    for i in 0..10_000 {
        cache
            .set_item(Bytes::from(format!("k{}", i % 100)), Bytes::from("v"))
            .unwrap();
    }
    assert_eq!(cache.storage().stats().sweeps, 0);
}

#[test]
fn hot_reload_takes_effect_on_next_write() {
    let cache = Cache::new(StorageEngine::new());
    let options = Arc::new(PluginOptions::new(0));
    let plugin = ClearExpiredByFactor::new(Arc::clone(&options));
    cache.add_plugin(&plugin, DEFAULT_PRIORITY).unwrap();

    cache.set_item(Bytes::from("a"), Bytes::from("1")).unwrap();
    assert_eq!(cache.storage().stats().sweeps, 0);

    options.set_clearing_factor(1);
    cache.set_item(Bytes::from("b"), Bytes::from("2")).unwrap();
    assert_eq!(cache.storage().stats().sweeps, 1);
}

#[test]
fn detached_plugin_stops_sweeping() {
    let cache = Cache::new(StorageEngine::new());
    let plugin = plugin_with_factor(1);

    cache.add_plugin(&plugin, DEFAULT_PRIORITY).unwrap();
    cache.set_item(Bytes::from("a"), Bytes::from("1")).unwrap();
    cache.remove_plugin(&plugin).unwrap();
    cache.set_item(Bytes::from("b"), Bytes::from("2")).unwrap();

    assert_eq!(cache.storage().stats().sweeps, 1);
    assert!(matches!(
        cache.remove_plugin(&plugin),
        Err(PluginError::NotAttached(_))
    ));
}

#[test]
fn one_plugin_many_caches() {
    let plugin = plugin_with_factor(1);
    let first = Cache::new(StorageEngine::new());
    let second = Cache::new(StorageEngine::new());

    first.add_plugin(&plugin, DEFAULT_PRIORITY).unwrap();
    second.add_plugin(&plugin, DEFAULT_PRIORITY).unwrap();
    first.remove_plugin(&plugin).unwrap();

    first.set_item(Bytes::from("a"), Bytes::from("1")).unwrap();
    second.set_item(Bytes::from("a"), Bytes::from("1")).unwrap();

    assert_eq!(first.storage().stats().sweeps, 0);
    assert_eq!(second.storage().stats().sweeps, 1);
}

#[tokio::test]
async fn concurrent_writers_each_sweep_inline() {
    let cache = Arc::new(Cache::new(StorageEngine::new()));
    let plugin = plugin_with_factor(1);
    cache.add_plugin(&plugin, DEFAULT_PRIORITY).unwrap();

    let mut tasks = Vec::new();
    for writer in 0..8 {
        let cache = Arc::clone(&cache);
        tasks.push(tokio::task::spawn_blocking(move || {
            for j in 0..250 {
                cache
                    .set_item_with_ttl(
                        Bytes::from(format!("w{}:{}", writer, j)),
                        Bytes::from("v"),
                        Duration::ZERO,
                    )
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let stats = cache.storage().stats();
    assert_eq!(stats.sweeps, 2_000);
    // Each key expired on insert and was taken by its own writer's sweep
    assert_eq!(stats.keys, 0);
}
