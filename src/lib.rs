//! # sweepkv - Write-Amortized Expiry for an In-Memory Cache
//!
//! sweepkv is an in-memory key-value cache whose expired entries are cleaned
//! up by the writes themselves. A plugin listens to post-write events and,
//! with probability `1/clearing_factor`, runs a full expiry sweep before the
//! write returns. No background sweeper task is needed.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               sweepkv                                   │
//! │                                                                         │
//! │  ┌─────────────┐   write    ┌──────────────────────────────────────┐    │
//! │  │   Caller    │──────────> │            Cache<S>                  │    │
//! │  └─────────────┘            │  ┌────────────────┐  ┌────────────┐  │    │
//! │         ▲                   │  │ S: Storage     │  │EventManager│  │    │
//! │         │ Ok / CacheError   │  │ (StorageEngine)│  │  *.post    │  │    │
//! │         └───────────────────│  └────────────────┘  └─────┬──────┘  │    │
//! │                             └────────────────────────────┼─────────┘    │
//! │                                                          ▼              │
//! │                             ┌──────────────────────────────────────┐    │
//! │                             │        ClearExpiredByFactor          │    │
//! │                             │  draw(1..=N) == 1 → clear_expired()  │    │
//! │                             └──────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use sweepkv::plugin::{ClearExpiredByFactor, PluginOptions, DEFAULT_PRIORITY};
//! use sweepkv::storage::{Cache, StorageEngine};
//! use bytes::Bytes;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let cache = Cache::new(StorageEngine::new());
//!
//! // Sweep on roughly one write in a hundred
//! let plugin = ClearExpiredByFactor::new(Arc::new(PluginOptions::new(100)));
//! cache.add_plugin(&plugin, DEFAULT_PRIORITY).unwrap();
//!
//! cache
//!     .set_item_with_ttl(Bytes::from("session"), Bytes::from("abc"), Duration::from_secs(60))
//!     .unwrap();
//!
//! cache.remove_plugin(&plugin).unwrap();
//! ```
//!
//! ## Module Overview
//!
//! - [`events`]: post-write events and the priority-ordered registry
//! - [`storage`]: backend contract, in-memory engine, evented cache facade
//! - [`plugin`]: plugin contract, options, and the clearing-factor plugin
//!
//! ## Design Highlights
//!
//! ### Memoryless Sampling
//!
//! Every qualifying write draws independently. There are no shared counters
//! to synchronize between concurrent writers.
//!
//! ### Inline Sweeps
//!
//! A triggered sweep runs on the writer's thread and adds its latency to that
//! write. Sweep failures surface as the write's error.
//!
//! ### Static Capabilities
//!
//! Whether a backend can sweep is declared through
//! [`Storage::expiry_sweep`](storage::Storage::expiry_sweep); backends
//! without the capability are skipped silently.

pub mod events;
pub mod plugin;
pub mod storage;

// Re-export commonly used types for convenience
pub use events::{EventHookRegistry, EventManager, EventName, PostEvent};
pub use plugin::{ClearExpiredByFactor, Plugin, PluginError, PluginOptions};
pub use storage::{Cache, CacheError, ClearExpired, Storage, StorageEngine, SweepError};

/// Version of sweepkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
