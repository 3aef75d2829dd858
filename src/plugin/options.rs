//! Plugin options.

use std::sync::atomic::{AtomicU32, Ordering};

/// Clearing factor used when none is configured: sweeping disabled.
pub const DEFAULT_CLEARING_FACTOR: u32 = 0;

/// Runtime-tunable plugin options.
///
/// Share one instance through an `Arc` to hot-reload the factor: a write
/// through [`set_clearing_factor`](Self::set_clearing_factor) is seen by the
/// next sampling decision.
#[derive(Debug)]
pub struct PluginOptions {
    /// Denominator of the sweep probability. 0 disables, 1 sweeps on every write.
    clearing_factor: AtomicU32,
}

impl Default for PluginOptions {
    fn default() -> Self {
        Self::new(DEFAULT_CLEARING_FACTOR)
    }
}

impl PluginOptions {
    /// Creates options with the given clearing factor.
    pub fn new(clearing_factor: u32) -> Self {
        Self {
            clearing_factor: AtomicU32::new(clearing_factor),
        }
    }

    /// Current clearing factor.
    pub fn clearing_factor(&self) -> u32 {
        self.clearing_factor.load(Ordering::Relaxed)
    }

    /// Replaces the clearing factor.
    pub fn set_clearing_factor(&self, clearing_factor: u32) {
        self.clearing_factor.store(clearing_factor, Ordering::Relaxed);
    }
}
