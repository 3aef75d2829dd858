//! Storage Module
//!
//! Backend contract, the in-memory backend, and the evented cache facade that
//! fires post-write events.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Cache<S>                             │
//! │   set_item / set_items / add_item / add_items               │
//! │        │                                                    │
//! │        ├──> S: Storage (write commits here)                 │
//! │        │                                                    │
//! │        └──> EventManager::trigger(*.post)                   │
//! │                   │                                         │
//! │                   └──> ClearExpiredByFactor (1/N chance)    │
//! │                              │                              │
//! │                              └──> S::expiry_sweep()?        │
//! │                                     .clear_expired()        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Capabilities
//!
//! Sweeping is an optional capability. A backend advertises it by
//! implementing [`ClearExpired`] and returning itself from
//! [`Storage::expiry_sweep`]; the default returns `None`.
//!
//! ## Example
//!
//! ```
//! use sweepkv::storage::{ClearExpired, StorageEngine};
//! use bytes::Bytes;
//! use std::time::Duration;
//!
//! let engine = StorageEngine::new();
//! engine.set_with_ttl(Bytes::from("session"), Bytes::from("abc"), Duration::ZERO);
//! engine.set(Bytes::from("name"), Bytes::from("Ariz"));
//!
//! assert_eq!(engine.clear_expired().unwrap(), 1);
//! assert_eq!(engine.len(), 1);
//! ```

pub mod cache;
pub mod engine;

use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

pub use cache::{Cache, CacheError};
pub use engine::{Entry, StorageEngine, StorageStats};

/// Errors raised by an expiry sweep.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SweepError {
    /// The backend could not complete the sweep
    #[error("expiry sweep failed: {0}")]
    Failed(String),
}

/// A backend that can evict every entry whose TTL has elapsed.
pub trait ClearExpired {
    /// Removes expired entries, returning how many were removed.
    fn clear_expired(&self) -> Result<u64, SweepError>;
}

/// The key-value contract a [`Cache`] writes through.
pub trait Storage: Send + Sync {
    /// Stores `value` under `key`, replacing any existing entry.
    ///
    /// Returns `true` if the key was newly created.
    fn set_item(&self, key: Bytes, value: Bytes, ttl: Option<Duration>) -> bool;

    /// Stores `value` only if `key` holds no live entry.
    ///
    /// Returns `true` if the value was stored.
    fn add_item(&self, key: Bytes, value: Bytes, ttl: Option<Duration>) -> bool;

    /// Reads the live value for `key`.
    fn get_item(&self, key: &Bytes) -> Option<Bytes>;

    /// Removes `key`. Returns `true` if it existed.
    fn remove_item(&self, key: &Bytes) -> bool;

    /// The backend's expiry-sweep capability, if it has one.
    fn expiry_sweep(&self) -> Option<&dyn ClearExpired> {
        None
    }
}
