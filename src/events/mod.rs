//! Write-Path Events
//!
//! Post-write lifecycle events and the registry that dispatches them.
//!
//! A write through [`Cache`](crate::storage::Cache) commits to the backend,
//! then fires exactly one [`PostEvent`] through its [`EventManager`]. Every
//! listener runs synchronously on the writer's thread before the write call
//! returns, so a listener error becomes the write's error.

pub mod event;
pub mod registry;

pub use event::{EventName, HookError, PostEvent};
pub use registry::{
    listener, EventHookRegistry, EventManager, Listener, ListenerHandle, RegistryError, RegistryId,
};
