//! Event-Hook Registry
//!
//! The registry is the contract a plugin needs from the write path: subscribe
//! a callback to a named post-write event at a priority, and later unsubscribe
//! it with the handle that subscription returned.
//!
//! [`EventManager`] is the in-process implementation used by [`Cache`].
//!
//! ## Ordering
//!
//! ```text
//!   trigger(setItem.post)
//!        │
//!        ▼
//!   ┌──────────┐   ┌──────────┐   ┌──────────┐
//!   │ prio 100 │──>│  prio 1  │──>│  prio 1  │   (ties: subscription order)
//!   └──────────┘   └──────────┘   └──────────┘
//!                        │
//!                        └── first Err stops the chain
//! ```
//!
//! [`Cache`]: crate::storage::Cache

use crate::events::{EventName, HookError, PostEvent};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::trace;

/// Source of process-unique registry identities.
static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a registry instance.
///
/// Plugins key their bookkeeping on this, never on the registry's address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistryId(u64);

impl RegistryId {
    /// Allocates a fresh identity. Never returns the same value twice.
    pub fn next() -> Self {
        Self(NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RegistryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "registry#{}", self.0)
    }
}

/// Opaque token returned by [`EventHookRegistry::subscribe`].
///
/// Only meaningful to `unsubscribe` on the registry that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
    registry: RegistryId,
    event: EventName,
    id: u64,
}

impl ListenerHandle {
    /// The event this handle is subscribed to.
    pub fn event(&self) -> EventName {
        self.event
    }
}

impl fmt::Display for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.registry, self.event, self.id)
    }
}

/// A callback invoked synchronously for each matching post-write event.
pub type Listener = Arc<dyn Fn(&PostEvent<'_>) -> Result<(), HookError> + Send + Sync>;

/// Wraps a closure as a [`Listener`].
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&PostEvent<'_>) -> Result<(), HookError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Errors raised by a registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The handle was never issued by this registry, or was already removed
    #[error("unknown listener handle: {0}")]
    UnknownHandle(ListenerHandle),
}

/// The subscribe/unsubscribe contract plugins attach through.
pub trait EventHookRegistry: Send + Sync {
    /// Stable identity of this registry.
    fn id(&self) -> RegistryId;

    /// Registers `listener` for `event`. Higher priorities fire first.
    fn subscribe(&self, event: EventName, listener: Listener, priority: i32) -> ListenerHandle;

    /// Removes a previously registered listener.
    fn unsubscribe(&self, handle: ListenerHandle) -> Result<(), RegistryError>;
}

/// A registered listener with its ordering keys.
struct Subscription {
    id: u64,
    priority: i32,
    listener: Listener,
}

/// In-process event registry.
///
/// Listener lists are kept sorted so that triggering is a straight walk.
/// `trigger` clones the list out from under the lock before invoking anything,
/// so listeners may subscribe or unsubscribe from inside a callback.
pub struct EventManager {
    id: RegistryId,
    next_handle: AtomicU64,
    listeners: RwLock<HashMap<EventName, Vec<Subscription>>>,
}

impl fmt::Debug for EventManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventManager")
            .field("id", &self.id)
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new()
    }
}

impl EventManager {
    /// Creates an empty registry with a fresh identity.
    pub fn new() -> Self {
        Self {
            id: RegistryId::next(),
            next_handle: AtomicU64::new(1),
            listeners: RwLock::new(HashMap::new()),
        }
    }

    /// Fires `event` to every listener subscribed to its name.
    ///
    /// Listeners run in priority order on the caller's thread. The first
    /// error stops the chain and is returned.
    pub fn trigger(&self, event: &PostEvent<'_>) -> Result<(), HookError> {
        let snapshot: Vec<Listener> = {
            let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
            match listeners.get(&event.name()) {
                Some(subs) => subs.iter().map(|s| Arc::clone(&s.listener)).collect(),
                None => return Ok(()),
            }
        };

        trace!(event = %event.name(), listeners = snapshot.len(), "Triggering event");

        for callback in snapshot {
            callback(event)?;
        }
        Ok(())
    }

    /// Total number of active listeners across all events.
    pub fn listener_count(&self) -> usize {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        listeners.values().map(Vec::len).sum()
    }

    /// Number of active listeners for one event.
    pub fn listener_count_for(&self, event: EventName) -> usize {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        listeners.get(&event).map_or(0, Vec::len)
    }

    /// Drops every listener for `event`. Their handles become unknown.
    pub fn clear_listeners(&self, event: EventName) {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        listeners.remove(&event);
    }
}

impl EventHookRegistry for EventManager {
    fn id(&self) -> RegistryId {
        self.id
    }

    fn subscribe(&self, event: EventName, listener: Listener, priority: i32) -> ListenerHandle {
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);

        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let subs = listeners.entry(event).or_default();

        // Insert after every listener with priority >= ours so ties keep
        // subscription order.
        let pos = subs.partition_point(|s| s.priority >= priority);
        subs.insert(
            pos,
            Subscription {
                id,
                priority,
                listener,
            },
        );

        ListenerHandle {
            registry: self.id,
            event,
            id,
        }
    }

    fn unsubscribe(&self, handle: ListenerHandle) -> Result<(), RegistryError> {
        if handle.registry != self.id {
            return Err(RegistryError::UnknownHandle(handle));
        }

        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let subs = listeners
            .get_mut(&handle.event)
            .ok_or(RegistryError::UnknownHandle(handle))?;
        let pos = subs
            .iter()
            .position(|s| s.id == handle.id)
            .ok_or(RegistryError::UnknownHandle(handle))?;
        subs.remove(pos);

        if subs.is_empty() {
            listeners.remove(&handle.event);
        }
        Ok(())
    }
}
