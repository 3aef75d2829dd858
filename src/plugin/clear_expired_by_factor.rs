//! Probabilistic Expiry Sweeping
//!
//! Instead of a dedicated sweeper task, this plugin piggybacks on normal write
//! traffic: after each set/add it rolls a `1..=clearing_factor` die and, on a
//! 1, asks the backend to clear expired entries.
//!
//! ## How It Works
//!
//! ```text
//!   write commits ──> *.post event ──> on_post_write
//!                                          │
//!                      backend can't sweep ├──> return
//!                      factor == 0         ├──> return
//!                      draw(1..=factor)!=1 ├──> return
//!                                          │
//!                                          └──> clear_expired()  (inline)
//! ```
//!
//! Each decision is independent: no counters, no back-off. A factor of N gives
//! every qualifying write a 1/N chance of paying for a full sweep. The sweep
//! runs on the writer's thread, so its latency lands on that write.
//!
//! ## Attachment Bookkeeping
//!
//! The plugin remembers the four listener handles it got from each registry,
//! keyed by [`RegistryId`]. A slot is reserved before subscribing so that the
//! "already attached?" check and the insert are one atomic step, while the
//! map lock is not held across calls into the registry.

use crate::events::{
    listener, EventHookRegistry, EventName, HookError, Listener, ListenerHandle, PostEvent,
    RegistryError, RegistryId,
};
use crate::plugin::{Plugin, PluginError, PluginOptions, RandomSource, ThreadRandom};
use crate::storage::SweepError;
use std::collections::hash_map::{Entry, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

/// Per-registry attachment state.
#[derive(Debug)]
enum Attachment {
    /// Slot reserved, subscriptions in flight
    Pending,
    /// Subscribed; one handle per post-write event
    Active(Vec<ListenerHandle>),
}

/// A `Pending` slot plus the handles subscribed under it so far.
///
/// Dropped without [`commit`](Self::commit) (a registry panicked mid-attach),
/// it unsubscribes what it collected and frees the slot.
struct Reservation<'a> {
    plugin: &'a ClearExpiredByFactor,
    registry: &'a dyn EventHookRegistry,
    id: RegistryId,
    handles: Vec<ListenerHandle>,
    armed: bool,
}

impl Reservation<'_> {
    fn commit(mut self) {
        let handles = std::mem::take(&mut self.handles);
        self.plugin
            .attachments()
            .insert(self.id, Attachment::Active(handles));
        self.armed = false;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        for handle in self.handles.drain(..) {
            let _ = self.registry.unsubscribe(handle);
        }
        self.plugin.attachments().remove(&self.id);
        debug!(registry = %self.id, "Rolled back partial attach");
    }
}

/// The sampling decision shared by every listener this plugin subscribes.
struct Trigger {
    options: Arc<PluginOptions>,
    random: Arc<dyn RandomSource>,
}

impl Trigger {
    fn on_post_write(&self, event: &PostEvent<'_>) -> Result<(), SweepError> {
        let Some(sweeper) = event.storage().expiry_sweep() else {
            return Ok(());
        };

        let factor = self.options.clearing_factor();
        if factor == 0 {
            return Ok(());
        }

        if self.random.draw(factor) != 1 {
            trace!(event = %event.name(), factor, "Sweep not triggered");
            return Ok(());
        }

        match sweeper.clear_expired() {
            Ok(removed) => {
                debug!(event = %event.name(), factor, removed, "Cleared expired items");
                Ok(())
            }
            Err(e) => {
                debug!(event = %event.name(), factor, error = %e, "Expiry sweep failed");
                Err(e)
            }
        }
    }
}

/// Clears expired items with probability `1/clearing_factor` after each write.
///
/// # Example
///
/// ```
/// use sweepkv::plugin::{ClearExpiredByFactor, PluginOptions};
/// use sweepkv::storage::{Cache, StorageEngine};
/// use bytes::Bytes;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let options = Arc::new(PluginOptions::new(1));
/// let plugin = ClearExpiredByFactor::new(Arc::clone(&options));
///
/// let cache = Cache::new(StorageEngine::new());
/// cache.add_plugin(&plugin, 1).unwrap();
///
/// // Factor 1: every write sweeps, so the already-expired key never lingers
/// cache.set_item_with_ttl(Bytes::from("stale"), Bytes::from("x"), Duration::ZERO).unwrap();
/// cache.set_item(Bytes::from("fresh"), Bytes::from("y")).unwrap();
/// assert_eq!(cache.storage().len(), 1);
/// assert_eq!(cache.storage().stats().sweeps, 2);
///
/// // Hot reload: disable sweeping
/// options.set_clearing_factor(0);
/// ```
pub struct ClearExpiredByFactor {
    trigger: Arc<Trigger>,
    attachments: Mutex<HashMap<RegistryId, Attachment>>,
}

impl std::fmt::Debug for ClearExpiredByFactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClearExpiredByFactor")
            .field("options", &self.trigger.options)
            .field("attachments", &self.attachment_count())
            .finish()
    }
}

impl ClearExpiredByFactor {
    /// Creates a plugin drawing from the thread-local RNG.
    pub fn new(options: Arc<PluginOptions>) -> Self {
        Self::with_random_source(options, Arc::new(ThreadRandom))
    }

    /// Creates a plugin drawing from `random`.
    pub fn with_random_source(options: Arc<PluginOptions>, random: Arc<dyn RandomSource>) -> Self {
        Self {
            trigger: Arc::new(Trigger { options, random }),
            attachments: Mutex::new(HashMap::new()),
        }
    }

    /// The live options. Updates apply to the next write.
    pub fn options(&self) -> &Arc<PluginOptions> {
        &self.trigger.options
    }

    /// Runs the sampling decision for one post-write event.
    ///
    /// Sweep errors are returned unchanged.
    pub fn on_post_write(&self, event: &PostEvent<'_>) -> Result<(), SweepError> {
        self.trigger.on_post_write(event)
    }

    /// Whether this plugin currently has listeners on `registry`.
    pub fn is_attached(&self, registry: &dyn EventHookRegistry) -> bool {
        matches!(
            self.attachments().get(&registry.id()),
            Some(Attachment::Active(_))
        )
    }

    /// Number of registries this plugin is attached to.
    pub fn attachment_count(&self) -> usize {
        self.attachments()
            .values()
            .filter(|a| matches!(a, Attachment::Active(_)))
            .count()
    }

    fn attachments(&self) -> MutexGuard<'_, HashMap<RegistryId, Attachment>> {
        self.attachments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn listener(&self) -> Listener {
        let trigger = Arc::clone(&self.trigger);
        listener(move |event| trigger.on_post_write(event).map_err(HookError::from))
    }
}

impl Plugin for ClearExpiredByFactor {
    fn attach(&self, registry: &dyn EventHookRegistry, priority: i32) -> Result<(), PluginError> {
        let id = registry.id();

        match self.attachments().entry(id) {
            Entry::Occupied(_) => return Err(PluginError::AlreadyAttached(id)),
            Entry::Vacant(slot) => {
                slot.insert(Attachment::Pending);
            }
        }

        let mut reservation = Reservation {
            plugin: self,
            registry,
            id,
            handles: Vec::with_capacity(EventName::ALL.len()),
            armed: true,
        };

        let callback = self.listener();
        for event in EventName::ALL {
            let handle = registry.subscribe(event, Arc::clone(&callback), priority);
            reservation.handles.push(handle);
        }

        reservation.commit();
        debug!(registry = %id, priority, "Attached clear-expired-by-factor plugin");
        Ok(())
    }

    fn detach(&self, registry: &dyn EventHookRegistry) -> Result<(), PluginError> {
        let id = registry.id();

        let handles = {
            let mut attachments = self.attachments();
            match attachments.remove(&id) {
                Some(Attachment::Active(handles)) => handles,
                Some(Attachment::Pending) => {
                    attachments.insert(id, Attachment::Pending);
                    return Err(PluginError::NotAttached(id));
                }
                None => return Err(PluginError::NotAttached(id)),
            }
        };

        // Try every handle so one stale token doesn't strand the others
        let mut first_error: Option<RegistryError> = None;
        for handle in handles {
            if let Err(e) = registry.unsubscribe(handle) {
                debug!(registry = %id, error = %e, "Unsubscribe failed during detach");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => {
                debug!(registry = %id, "Detached clear-expired-by-factor plugin");
                Ok(())
            }
        }
    }
}
