//! Evented Cache Facade
//!
//! [`Cache`] is the write path plugins hook into. Every write commits to the
//! backend first, then fires exactly one post-write event:
//!
//! | Call               | Event           |
//! |--------------------|-----------------|
//! | `set_item*`        | `setItem.post`  |
//! | `set_items`        | `setItems.post` |
//! | `add_item*`        | `addItem.post`  |
//! | `add_items`        | `addItems.post` |
//!
//! Listeners run before the call returns. If one fails, the call returns
//! [`CacheError::Hook`] even though the data is already stored: a `set` can
//! fail because a maintenance sweep it triggered failed.

use crate::events::{EventManager, EventName, HookError, PostEvent};
use crate::plugin::{Plugin, PluginError};
use crate::storage::Storage;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by cache write operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A post-write listener failed after the write committed
    #[error("post-write hook failed: {0}")]
    Hook(#[from] HookError),
}

/// A storage backend plus the event registry its writes fire through.
///
/// # Example
///
/// ```
/// use sweepkv::plugin::{ClearExpiredByFactor, PluginOptions};
/// use sweepkv::storage::{Cache, StorageEngine};
/// use bytes::Bytes;
/// use std::sync::Arc;
///
/// let cache = Cache::new(StorageEngine::new());
/// let plugin = ClearExpiredByFactor::new(Arc::new(PluginOptions::new(100)));
/// cache.add_plugin(&plugin, 1).unwrap();
///
/// cache.set_item(Bytes::from("name"), Bytes::from("Ariz")).unwrap();
/// assert_eq!(cache.get_item(&Bytes::from("name")), Some(Bytes::from("Ariz")));
/// ```
pub struct Cache<S> {
    storage: S,
    events: Arc<EventManager>,
}

impl<S: std::fmt::Debug> std::fmt::Debug for Cache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("storage", &self.storage)
            .field("events", &self.events)
            .finish()
    }
}

impl<S: Storage> Cache<S> {
    /// Wraps `storage` with a fresh event registry.
    pub fn new(storage: S) -> Self {
        Self::with_events(storage, Arc::new(EventManager::new()))
    }

    /// Wraps `storage` with an existing registry.
    pub fn with_events(storage: S, events: Arc<EventManager>) -> Self {
        Self { storage, events }
    }

    /// The backend.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// The registry this cache fires its post-write events through.
    pub fn events(&self) -> &Arc<EventManager> {
        &self.events
    }

    /// Attaches `plugin` to this cache's registry.
    pub fn add_plugin(&self, plugin: &dyn Plugin, priority: i32) -> Result<(), PluginError> {
        plugin.attach(&*self.events, priority)
    }

    /// Detaches `plugin` from this cache's registry.
    pub fn remove_plugin(&self, plugin: &dyn Plugin) -> Result<(), PluginError> {
        plugin.detach(&*self.events)
    }

    fn fire(&self, name: EventName, items: usize) -> Result<(), CacheError> {
        let event = PostEvent::new(name, &self.storage, items);
        self.events.trigger(&event)?;
        Ok(())
    }

    /// Stores `value` under `key`. Returns `true` if the key was new.
    pub fn set_item(&self, key: Bytes, value: Bytes) -> Result<bool, CacheError> {
        let created = self.storage.set_item(key, value, None);
        self.fire(EventName::SetItemPost, 1)?;
        Ok(created)
    }

    /// Stores `value` under `key`, expiring after `ttl`.
    pub fn set_item_with_ttl(
        &self,
        key: Bytes,
        value: Bytes,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let created = self.storage.set_item(key, value, Some(ttl));
        self.fire(EventName::SetItemPost, 1)?;
        Ok(created)
    }

    /// Stores every pair, then fires a single `setItems.post`.
    ///
    /// Returns the number of keys that were newly created.
    pub fn set_items<I>(&self, items: I, ttl: Option<Duration>) -> Result<usize, CacheError>
    where
        I: IntoIterator<Item = (Bytes, Bytes)>,
    {
        let mut written = 0;
        let mut created = 0;
        for (key, value) in items {
            if self.storage.set_item(key, value, ttl) {
                created += 1;
            }
            written += 1;
        }
        self.fire(EventName::SetItemsPost, written)?;
        Ok(created)
    }

    /// Stores `value` only if `key` is absent. Returns `true` if stored.
    pub fn add_item(&self, key: Bytes, value: Bytes) -> Result<bool, CacheError> {
        let added = self.storage.add_item(key, value, None);
        self.fire(EventName::AddItemPost, usize::from(added))?;
        Ok(added)
    }

    /// Like [`add_item`](Self::add_item), expiring after `ttl`.
    pub fn add_item_with_ttl(
        &self,
        key: Bytes,
        value: Bytes,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let added = self.storage.add_item(key, value, Some(ttl));
        self.fire(EventName::AddItemPost, usize::from(added))?;
        Ok(added)
    }

    /// Adds every absent pair, then fires a single `addItems.post`.
    ///
    /// Returns the keys that were not added because they already existed.
    pub fn add_items<I>(&self, items: I, ttl: Option<Duration>) -> Result<Vec<Bytes>, CacheError>
    where
        I: IntoIterator<Item = (Bytes, Bytes)>,
    {
        let mut added = 0;
        let mut rejected = Vec::new();
        for (key, value) in items {
            if self.storage.add_item(key.clone(), value, ttl) {
                added += 1;
            } else {
                rejected.push(key);
            }
        }
        self.fire(EventName::AddItemsPost, added)?;
        Ok(rejected)
    }

    /// Reads a live value. Fires no events.
    pub fn get_item(&self, key: &Bytes) -> Option<Bytes> {
        self.storage.get_item(key)
    }

    /// Removes a key. Fires no events.
    pub fn remove_item(&self, key: &Bytes) -> bool {
        self.storage.remove_item(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{listener, EventHookRegistry};
    use crate::storage::StorageEngine;
    use std::sync::Mutex;

    fn recording_cache() -> (Cache<StorageEngine>, Arc<Mutex<Vec<(EventName, usize)>>>) {
        let cache = Cache::new(StorageEngine::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        for name in EventName::ALL {
            let log = Arc::clone(&log);
            cache.events().subscribe(
                name,
                listener(move |event| {
                    log.lock().unwrap().push((event.name(), event.items()));
                    Ok(())
                }),
                1,
            );
        }
        (cache, log)
    }

    #[test]
    fn test_each_write_fires_its_event_once() {
        let (cache, log) = recording_cache();

        cache.set_item(Bytes::from("a"), Bytes::from("1")).unwrap();
        cache
            .set_item_with_ttl(Bytes::from("b"), Bytes::from("2"), Duration::from_secs(60))
            .unwrap();
        cache.add_item(Bytes::from("c"), Bytes::from("3")).unwrap();
        cache
            .set_items(
                vec![
                    (Bytes::from("d"), Bytes::from("4")),
                    (Bytes::from("e"), Bytes::from("5")),
                ],
                None,
            )
            .unwrap();
        cache
            .add_items(vec![(Bytes::from("f"), Bytes::from("6"))], None)
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                (EventName::SetItemPost, 1),
                (EventName::SetItemPost, 1),
                (EventName::AddItemPost, 1),
                (EventName::SetItemsPost, 2),
                (EventName::AddItemsPost, 1),
            ]
        );
    }

    #[test]
    fn test_reads_fire_nothing() {
        let (cache, log) = recording_cache();
        cache.storage().set(Bytes::from("a"), Bytes::from("1"));

        assert_eq!(cache.get_item(&Bytes::from("a")), Some(Bytes::from("1")));
        assert!(cache.remove_item(&Bytes::from("a")));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_add_items_returns_rejected_keys() {
        let cache = Cache::new(StorageEngine::new());
        cache.set_item(Bytes::from("taken"), Bytes::from("x")).unwrap();

        let rejected = cache
            .add_items(
                vec![
                    (Bytes::from("taken"), Bytes::from("y")),
                    (Bytes::from("free"), Bytes::from("z")),
                ],
                None,
            )
            .unwrap();

        assert_eq!(rejected, vec![Bytes::from("taken")]);
        assert_eq!(cache.get_item(&Bytes::from("taken")), Some(Bytes::from("x")));
        assert_eq!(cache.get_item(&Bytes::from("free")), Some(Bytes::from("z")));
    }

    #[test]
    fn test_max_ttl_writes_are_stored() {
        let (cache, log) = recording_cache();

        assert!(cache
            .set_item_with_ttl(Bytes::from("a"), Bytes::from("1"), Duration::MAX)
            .unwrap());
        assert!(cache
            .add_item_with_ttl(Bytes::from("b"), Bytes::from("2"), Duration::MAX)
            .unwrap());
        cache
            .set_items(vec![(Bytes::from("c"), Bytes::from("3"))], Some(Duration::MAX))
            .unwrap();

        assert_eq!(cache.get_item(&Bytes::from("a")), Some(Bytes::from("1")));
        assert_eq!(cache.get_item(&Bytes::from("c")), Some(Bytes::from("3")));
        assert_eq!(log.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_listener_error_fails_committed_write() {
        let cache = Cache::new(StorageEngine::new());
        cache.events().subscribe(
            EventName::SetItemPost,
            listener(|_| Err(HookError::Listener("nope".into()))),
            1,
        );

        let result = cache.set_item(Bytes::from("key"), Bytes::from("value"));
        assert!(matches!(result, Err(CacheError::Hook(HookError::Listener(_)))));

        // The write itself committed before the hook ran
        assert_eq!(cache.get_item(&Bytes::from("key")), Some(Bytes::from("value")));
    }
}
