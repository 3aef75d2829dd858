//! Storage Plugins
//!
//! A plugin attaches listeners to an [`EventHookRegistry`] and removes them
//! again on detach. Attaching the same plugin to the same registry twice is a
//! caller bug and fails without touching the existing listeners.
//!
//! ## Example
//!
//! ```
//! use sweepkv::events::EventManager;
//! use sweepkv::plugin::{ClearExpiredByFactor, Plugin, PluginError, PluginOptions, DEFAULT_PRIORITY};
//! use std::sync::Arc;
//!
//! let events = EventManager::new();
//! let plugin = ClearExpiredByFactor::new(Arc::new(PluginOptions::new(100)));
//!
//! plugin.attach(&events, DEFAULT_PRIORITY).unwrap();
//! assert_eq!(events.listener_count(), 4);
//!
//! let again = plugin.attach(&events, DEFAULT_PRIORITY);
//! assert!(matches!(again, Err(PluginError::AlreadyAttached(_))));
//!
//! plugin.detach(&events).unwrap();
//! assert_eq!(events.listener_count(), 0);
//! ```

pub mod clear_expired_by_factor;
pub mod options;
pub mod random;

use crate::events::{EventHookRegistry, RegistryError, RegistryId};
use thiserror::Error;

pub use clear_expired_by_factor::ClearExpiredByFactor;
pub use options::{PluginOptions, DEFAULT_CLEARING_FACTOR};
pub use random::{RandomSource, SeededRandom, ThreadRandom};

/// Priority plugins attach at unless told otherwise.
pub const DEFAULT_PRIORITY: i32 = 1;

/// Errors from attaching or detaching a plugin.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PluginError {
    /// The plugin already has listeners on this registry
    #[error("plugin already attached to {0}")]
    AlreadyAttached(RegistryId),

    /// The plugin has no listeners on this registry
    #[error("plugin not attached to {0}")]
    NotAttached(RegistryId),

    /// The registry rejected an unsubscribe during detach
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// A component that hooks into a registry's write-path events.
pub trait Plugin: Send + Sync {
    /// Subscribes this plugin's listeners to `registry` at `priority`.
    fn attach(&self, registry: &dyn EventHookRegistry, priority: i32) -> Result<(), PluginError>;

    /// Removes every listener this plugin subscribed to `registry`.
    fn detach(&self, registry: &dyn EventHookRegistry) -> Result<(), PluginError>;
}
