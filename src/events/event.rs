//! Post-write event types.
//!
//! A [`PostEvent`] is fired after a write has committed to the backend and
//! before the write call returns to its caller. Listeners receive a borrowed
//! view of the backend so they can query its capabilities.

use crate::storage::{Storage, SweepError};
use std::fmt;
use thiserror::Error;

/// The write-path lifecycle events a listener can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventName {
    /// A single item was set
    SetItemPost,
    /// A batch of items was set
    SetItemsPost,
    /// A single item was added (only if absent)
    AddItemPost,
    /// A batch of items was added
    AddItemsPost,
}

impl EventName {
    /// All post-write events, in declaration order.
    pub const ALL: [EventName; 4] = [
        EventName::SetItemPost,
        EventName::SetItemsPost,
        EventName::AddItemPost,
        EventName::AddItemsPost,
    ];

    /// Returns the wire name of the event.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::SetItemPost => "setItem.post",
            EventName::SetItemsPost => "setItems.post",
            EventName::AddItemPost => "addItem.post",
            EventName::AddItemsPost => "addItems.post",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification fired after a write operation has committed.
#[derive(Clone, Copy)]
pub struct PostEvent<'a> {
    name: EventName,
    storage: &'a dyn Storage,
    items: usize,
}

impl<'a> PostEvent<'a> {
    /// Creates an event for a write of `items` entries to `storage`.
    pub fn new(name: EventName, storage: &'a dyn Storage, items: usize) -> Self {
        Self {
            name,
            storage,
            items,
        }
    }

    /// The event that fired.
    pub fn name(&self) -> EventName {
        self.name
    }

    /// The backend that completed the write.
    pub fn storage(&self) -> &'a dyn Storage {
        self.storage
    }

    /// Number of entries the write committed.
    pub fn items(&self) -> usize {
        self.items
    }
}

impl fmt::Debug for PostEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostEvent")
            .field("name", &self.name)
            .field("items", &self.items)
            .finish_non_exhaustive()
    }
}

/// Errors a listener can raise while handling an event.
///
/// The first error aborts the remaining listeners and is returned to the
/// caller of the write.
#[derive(Debug, Error)]
pub enum HookError {
    /// An expiry sweep triggered by the listener failed
    #[error(transparent)]
    Sweep(#[from] SweepError),

    /// Any other listener failure
    #[error("listener failed: {0}")]
    Listener(String),
}
