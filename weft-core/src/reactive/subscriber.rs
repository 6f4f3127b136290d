//! Identity types for the reactive system.
//!
//! Every effect and every trackable target (a raw aggregate, a signal, a
//! memo) gets a process-unique id when created. The dependency store indexes
//! purely by these ids so it never holds on to the objects themselves.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for an effect.
///
/// Used as the subscriber handle in the dependency store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectId(u64);

impl EffectId {
    /// Generate a new unique effect ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across runtimes.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for EffectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Unique identifier for something that can be read reactively.
///
/// Raw aggregates carry one from construction, so every wrapper over the same
/// raw object shares its dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(u64);

impl TargetId {
    /// Generate a new unique target ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for TargetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effect_ids_are_unique() {
        let id1 = EffectId::new();
        let id2 = EffectId::new();
        let id3 = EffectId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn target_ids_increase() {
        let first = TargetId::new();
        let second = TargetId::new();
        assert!(second > first);
    }
}
