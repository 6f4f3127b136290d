//! Dependency Store
//!
//! Pure bookkeeping: which effects subscribe to which `(target, key)` pairs,
//! and, in the other direction, which pairs each effect subscribes to. The
//! reverse index is what makes cleanup cheap: an effect about to re-run (or
//! being stopped) removes itself from exactly the sets it is in, instead of
//! scanning every subscriber set in the store.
//!
//! Entries are created lazily on first track. A subscriber set that becomes
//! empty during cleanup is dropped, so a target nobody reads costs nothing.

use std::collections::HashMap;

use indexmap::IndexSet;
use smallvec::SmallVec;

use super::subscriber::{EffectId, TargetId};
use super::value::Key;

/// The key half of a dependency.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DepKey {
    /// A specific field, index or entry.
    Key(Key),
    /// The structure of the target: its size and the set of keys it has.
    Iterate,
}

impl From<Key> for DepKey {
    fn from(key: Key) -> Self {
        DepKey::Key(key)
    }
}

/// A `(target, key)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dep {
    pub target: TargetId,
    pub key: DepKey,
}

impl Dep {
    pub fn new(target: TargetId, key: impl Into<DepKey>) -> Self {
        Self {
            target,
            key: key.into(),
        }
    }

    pub fn iterate(target: TargetId) -> Self {
        Self {
            target,
            key: DepKey::Iterate,
        }
    }
}

/// What kind of write caused a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOp {
    /// An existing entry changed value.
    Set,
    /// A new entry appeared.
    Add,
    /// An entry went away.
    Delete,
    /// Every entry went away.
    Clear,
}

/// Outcome of a write through a wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerResult {
    /// The write was applied but nothing observable changed.
    Unchanged,
    /// The write changed something and subscribers were notified.
    Triggered(TriggerOp),
    /// The wrapper is readonly; nothing was written.
    Rejected,
}

impl TriggerResult {
    pub fn is_triggered(&self) -> bool {
        matches!(self, TriggerResult::Triggered(_))
    }
}

type SubscriberSet = IndexSet<EffectId>;

/// Bidirectional index between dependencies and effects.
#[derive(Debug, Default)]
pub struct DepStore {
    targets: HashMap<TargetId, HashMap<DepKey, SubscriberSet>>,
    deps_of: HashMap<EffectId, SmallVec<[Dep; 4]>>,
}

impl DepStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `effect` read `dep`. Returns `false` if it was already
    /// subscribed.
    pub fn track(&mut self, dep: Dep, effect: EffectId) -> bool {
        let inserted = self
            .targets
            .entry(dep.target)
            .or_default()
            .entry(dep.key.clone())
            .or_default()
            .insert(effect);

        if inserted {
            self.deps_of.entry(effect).or_default().push(dep);
        }
        inserted
    }

    /// Remove `effect` from every subscriber set it is part of and forget its
    /// key set. Returns how many subscriptions were dropped.
    pub fn cleanup(&mut self, effect: EffectId) -> usize {
        let Some(deps) = self.deps_of.remove(&effect) else {
            return 0;
        };

        for dep in &deps {
            let Some(keys) = self.targets.get_mut(&dep.target) else {
                continue;
            };
            if let Some(set) = keys.get_mut(&dep.key) {
                set.shift_remove(&effect);
                if set.is_empty() {
                    keys.remove(&dep.key);
                }
            }
            if keys.is_empty() {
                self.targets.remove(&dep.target);
            }
        }

        deps.len()
    }

    /// Append the subscribers of `(target, key)` to `batch`, preserving
    /// subscriber-set order and skipping effects already in the batch.
    pub fn collect(&self, target: TargetId, key: &DepKey, batch: &mut IndexSet<EffectId>) {
        if let Some(set) = self.targets.get(&target).and_then(|keys| keys.get(key)) {
            batch.extend(set.iter().copied());
        }
    }

    /// Append every subscriber of any key of `target` to `batch`.
    pub fn collect_target(&self, target: TargetId, batch: &mut IndexSet<EffectId>) {
        if let Some(keys) = self.targets.get(&target) {
            for set in keys.values() {
                batch.extend(set.iter().copied());
            }
        }
    }

    /// Number of effects subscribed to `(target, key)`.
    pub fn subscriber_count(&self, target: TargetId, key: &DepKey) -> usize {
        self.targets
            .get(&target)
            .and_then(|keys| keys.get(key))
            .map_or(0, IndexSet::len)
    }

    /// Whether `effect` currently subscribes to `dep`.
    pub fn is_subscribed(&self, effect: EffectId, dep: &Dep) -> bool {
        self.targets
            .get(&dep.target)
            .and_then(|keys| keys.get(&dep.key))
            .is_some_and(|set| set.contains(&effect))
    }

    /// The dependencies recorded for `effect` since its last cleanup.
    pub fn deps_of(&self, effect: EffectId) -> &[Dep] {
        self.deps_of.get(&effect).map_or(&[], |deps| deps.as_slice())
    }

    /// Number of targets with at least one subscriber.
    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    pub fn clear(&mut self) {
        self.targets.clear();
        self.deps_of.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_is_bidirectional() {
        let mut store = DepStore::new();
        let effect = EffectId::new();
        let target = TargetId::new();
        let dep = Dep::new(target, Key::from("a"));

        assert!(store.track(dep.clone(), effect));
        assert!(!store.track(dep.clone(), effect));

        assert!(store.is_subscribed(effect, &dep));
        assert_eq!(store.deps_of(effect), &[dep.clone()]);
        assert_eq!(store.subscriber_count(target, &dep.key), 1);
    }

    #[test]
    fn cleanup_removes_every_subscription() {
        let mut store = DepStore::new();
        let effect = EffectId::new();
        let other = EffectId::new();
        let target = TargetId::new();

        store.track(Dep::new(target, Key::from("a")), effect);
        store.track(Dep::iterate(target), effect);
        store.track(Dep::new(target, Key::from("a")), other);

        assert_eq!(store.cleanup(effect), 2);
        assert!(store.deps_of(effect).is_empty());
        assert_eq!(store.subscriber_count(target, &DepKey::Iterate), 0);
        assert_eq!(store.subscriber_count(target, &DepKey::Key(Key::from("a"))), 1);
    }

    #[test]
    fn empty_targets_are_dropped() {
        let mut store = DepStore::new();
        let effect = EffectId::new();
        store.track(Dep::iterate(TargetId::new()), effect);
        assert_eq!(store.target_count(), 1);

        store.cleanup(effect);
        assert_eq!(store.target_count(), 0);
    }

    #[test]
    fn collect_deduplicates_in_order() {
        let mut store = DepStore::new();
        let target = TargetId::new();
        let (a, b, c) = (EffectId::new(), EffectId::new(), EffectId::new());

        store.track(Dep::new(target, Key::from("x")), a);
        store.track(Dep::new(target, Key::from("x")), b);
        store.track(Dep::iterate(target), b);
        store.track(Dep::iterate(target), c);

        let mut batch = IndexSet::new();
        store.collect(target, &DepKey::Key(Key::from("x")), &mut batch);
        store.collect(target, &DepKey::Iterate, &mut batch);

        assert_eq!(batch.into_iter().collect::<Vec<_>>(), vec![a, b, c]);
    }
}
