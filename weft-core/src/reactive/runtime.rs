//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects wrapped state,
//! effects and the scheduler. It owns every piece of shared mutable state the
//! reactive system needs:
//!
//! - the dependency store,
//! - the context stack (which effect is running),
//! - the registry of live effects,
//! - the raw-to-wrapper cache,
//! - the job queue.
//!
//! # How It Works
//!
//! 1. When an effect reads through a wrapper, the runtime records the
//!    `(target, key)` dependency against the effect on top of the context
//!    stack.
//!
//! 2. When a wrapper is written, the runtime:
//!    a. Collects the subscribers of every affected key into one
//!       deduplicated batch, in subscriber-set order
//!    b. Resolves them against the effect registry
//!    c. Notifies each one; an effect either runs right away or hands itself
//!       to its custom scheduler
//!
//! No lock is held while user code runs, so effects are free to read and
//! write reactive state, create and stop other effects, and flush the queue.
//!
//! # Lifecycle
//!
//! A runtime is created explicitly and shared by cloning the handle. Effects
//! stay registered until stopped; [`Runtime::shutdown`] stops all of them and
//! clears the store, the cache and the queue.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexSet;
use parking_lot::Mutex;

use super::context::{ContextStack, Frame};
use super::dep::{Dep, DepKey, DepStore, TriggerOp};
use super::effect::{Effect, EffectOptions};
use super::subscriber::{EffectId, TargetId};
use super::wrapper::WrapperCache;
use crate::config::RuntimeConfig;
use crate::scheduler::{Job, Scheduler, Task};

pub(crate) struct RuntimeInner {
    pub(crate) config: RuntimeConfig,
    pub(crate) store: Mutex<DepStore>,
    pub(crate) context: ContextStack,
    pub(crate) effects: Mutex<HashMap<EffectId, Effect>>,
    pub(crate) wrappers: Mutex<WrapperCache>,
    pub(crate) scheduler: Scheduler,
}

/// Handle to a reactive runtime.
///
/// Clones share the same runtime.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a runtime with the given configuration.
    pub fn with_config(config: RuntimeConfig) -> Self {
        let scheduler = Scheduler::new(config.recursion_limit);
        Self {
            inner: Arc::new(RuntimeInner {
                config,
                store: Mutex::new(DepStore::new()),
                context: ContextStack::new(),
                effects: Mutex::new(HashMap::new()),
                wrappers: Mutex::new(WrapperCache::default()),
                scheduler,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<RuntimeInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<RuntimeInner> {
        Arc::downgrade(&self.inner)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ------------------------------------------------------------------
    // Tracking
    // ------------------------------------------------------------------

    /// Record that the running effect, if any, read `(target, key)`.
    pub fn track(&self, target: TargetId, key: impl Into<DepKey>) {
        let Some(effect) = self.inner.context.current_effect() else {
            return;
        };
        // Stopped effects are unregistered and must not subscribe again.
        if !self.inner.effects.lock().contains_key(&effect) {
            return;
        }
        let dep = Dep::new(target, key);
        if self.inner.store.lock().track(dep.clone(), effect) {
            tracing::trace!(%effect, target = %dep.target, key = ?dep.key, "tracked");
        }
    }

    /// Notify the subscribers of `keys` on `target`.
    ///
    /// A [`TriggerOp::Clear`] notifies every subscriber of the target and
    /// ignores `keys`.
    pub fn trigger(&self, target: TargetId, op: TriggerOp, keys: &[DepKey]) {
        let mut batch = IndexSet::new();
        {
            let store = self.inner.store.lock();
            match op {
                TriggerOp::Clear => store.collect_target(target, &mut batch),
                _ => {
                    for key in keys {
                        store.collect(target, key, &mut batch);
                    }
                }
            }
        }
        if batch.is_empty() {
            return;
        }
        tracing::trace!(%target, ?op, subscribers = batch.len(), "trigger");

        let effects: Vec<Effect> = {
            let registry = self.inner.effects.lock();
            batch
                .iter()
                .filter_map(|id| registry.get(id).cloned())
                .collect()
        };

        for effect in effects {
            effect.notify(self);
        }
    }

    /// Run `f` without recording any dependencies.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _ctx = self.inner.context.enter(Frame::Untracked);
        f()
    }

    /// The effect reads are currently recorded against.
    pub fn current_effect(&self) -> Option<EffectId> {
        self.inner.context.current_effect()
    }

    /// Whether a read right now would be recorded.
    pub fn is_tracking(&self) -> bool {
        self.current_effect().is_some()
    }

    pub fn context_depth(&self) -> usize {
        self.inner.context.depth()
    }

    // ------------------------------------------------------------------
    // Effects
    // ------------------------------------------------------------------

    /// Create an effect with default options. It runs immediately.
    pub fn effect<F>(&self, f: F) -> Effect
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.create_effect(f, EffectOptions::default())
    }

    /// Create and register an effect.
    pub fn create_effect<F>(&self, f: F, options: EffectOptions) -> Effect
    where
        F: Fn() + Send + Sync + 'static,
    {
        let lazy = options.lazy;
        let effect = Effect::new_in(self, f, options);
        self.inner
            .effects
            .lock()
            .insert(effect.id(), effect.clone());
        tracing::debug!(effect = %effect.id(), lazy, "effect created");

        if !lazy {
            effect.run();
        }
        effect
    }

    /// Stop an effect. Equivalent to [`Effect::stop`].
    pub fn stop_effect(&self, effect: &Effect) {
        effect.stop();
    }

    pub(crate) fn cleanup_effect(&self, effect: EffectId) {
        let dropped = self.inner.store.lock().cleanup(effect);
        if dropped > 0 {
            tracing::trace!(%effect, dropped, "dependencies cleaned up");
        }
    }

    pub(crate) fn unregister_effect(&self, effect: EffectId) {
        self.inner.effects.lock().remove(&effect);
    }

    /// Number of live (not stopped) effects.
    pub fn effect_count(&self) -> usize {
        self.inner.effects.lock().len()
    }

    /// Number of dependencies `effect` recorded on its latest run.
    pub fn dependency_count(&self, effect: &Effect) -> usize {
        self.inner.store.lock().deps_of(effect.id()).len()
    }

    pub fn dependencies(&self, effect: &Effect) -> Vec<Dep> {
        self.inner.store.lock().deps_of(effect.id()).to_vec()
    }

    /// Number of effects subscribed to `(target, key)`.
    pub fn subscriber_count(&self, target: TargetId, key: &DepKey) -> usize {
        self.inner.store.lock().subscriber_count(target, key)
    }

    /// Whether `effect` subscribes to `(target, key)`.
    pub fn is_subscribed(&self, effect: &Effect, target: TargetId, key: impl Into<DepKey>) -> bool {
        self.inner
            .store
            .lock()
            .is_subscribed(effect.id(), &Dep::new(target, key))
    }

    // ------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// Queue a job. Returns `false` if it was already queued.
    pub fn queue_job(&self, job: Job) -> bool {
        self.inner.scheduler.queue_job(job)
    }

    /// Run `f` after the queued jobs of the next flush.
    pub fn next_tick<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let task: Task = Arc::new(f);
        self.inner.scheduler.queue_post_flush(task);
    }

    /// Flush the job queue. Returns the number of jobs run.
    pub fn flush_jobs(&self) -> usize {
        self.inner.scheduler.flush()
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Stop every live effect and clear all runtime state.
    pub fn shutdown(&self) {
        let effects: Vec<Effect> = self.inner.effects.lock().values().cloned().collect();
        let count = effects.len();
        for effect in effects {
            effect.stop();
        }
        self.inner.store.lock().clear();
        self.inner.wrappers.lock().clear();
        self.inner.scheduler.clear();
        tracing::debug!(effects = count, "runtime shut down");
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("effects", &self.effect_count())
            .field("targets", &self.inner.store.lock().target_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Key;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_effect(rt: &Runtime, target: TargetId, key: &'static str) -> (Effect, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let effect = rt.effect({
            let rt = rt.clone();
            let runs = runs.clone();
            move || {
                runs.fetch_add(1, Ordering::SeqCst);
                rt.track(target, Key::from(key));
            }
        });
        (effect, runs)
    }

    #[test]
    fn track_outside_effect_is_noop() {
        let rt = Runtime::new();
        let target = TargetId::new();
        rt.track(target, DepKey::Iterate);
        assert_eq!(rt.subscriber_count(target, &DepKey::Iterate), 0);
    }

    #[test]
    fn trigger_runs_subscribers() {
        let rt = Runtime::new();
        let target = TargetId::new();
        let (effect, runs) = counting_effect(&rt, target, "a");

        assert!(rt.is_subscribed(&effect, target, Key::from("a")));
        rt.trigger(target, TriggerOp::Set, &[DepKey::Key(Key::from("a"))]);
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        rt.trigger(target, TriggerOp::Set, &[DepKey::Key(Key::from("b"))]);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn clear_triggers_every_key() {
        let rt = Runtime::new();
        let target = TargetId::new();
        let (_a, runs_a) = counting_effect(&rt, target, "a");
        let (_b, runs_b) = counting_effect(&rt, target, "b");

        rt.trigger(target, TriggerOp::Clear, &[]);
        assert_eq!(runs_a.load(Ordering::SeqCst), 2);
        assert_eq!(runs_b.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn untracked_reads_are_not_recorded() {
        let rt = Runtime::new();
        let target = TargetId::new();
        let effect = rt.effect({
            let rt = rt.clone();
            move || rt.untracked(|| rt.track(target, DepKey::Iterate))
        });
        assert_eq!(effect.dependency_count(), 0);
    }

    #[test]
    fn shutdown_stops_everything() {
        let rt = Runtime::new();
        let target = TargetId::new();
        let (effect, runs) = counting_effect(&rt, target, "a");
        assert_eq!(rt.effect_count(), 1);

        rt.shutdown();
        assert_eq!(rt.effect_count(), 0);
        assert!(!effect.is_active());

        rt.trigger(target, TriggerOp::Set, &[DepKey::Key(Key::from("a"))]);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
