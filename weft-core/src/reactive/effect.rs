//! Effect Implementation
//!
//! An Effect is a re-runnable computation that subscribes to whatever it
//! reads.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies (unless it is lazy).
//!
//! 2. Before every run, the effect removes itself from the subscriber sets
//!    it joined last time. Reads during the run re-subscribe it, so after the
//!    run its subscriptions are exactly what this run read.
//!
//! 3. When a dependency changes, the effect is notified. Without a custom
//!    scheduler it re-runs on the spot; with one, the scheduler decides.
//!
//! # Re-entrancy
//!
//! An effect never runs inside itself. If a run writes to something the same
//! run already read, the resulting notification is dropped (and logged), or,
//! for effects created with `allow_recurse`, turned into one more run after
//! the current one finishes, bounded by the runtime's recursion limit.
//!
//! # Panics
//!
//! A panic inside the effect function propagates to whoever started the run.
//! Guards restore the context stack and the idle state on the way out; the
//! dependencies recorded before the panic stay subscribed.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use super::context::Frame;
use super::dep::Dep;
use super::runtime::{Runtime, RuntimeInner};
use super::subscriber::EffectId;

/// Custom scheduling hook. Receives the triggered effect instead of it being
/// run directly.
pub type SchedulerFn = Arc<dyn Fn(&Effect) + Send + Sync>;

/// Options for [`Runtime::create_effect`].
#[derive(Clone, Default)]
pub struct EffectOptions {
    /// Do not run on creation.
    pub lazy: bool,

    /// Turn self-triggers during a run into one follow-up run.
    pub allow_recurse: bool,

    /// Called instead of running the effect when it is triggered.
    pub scheduler: Option<SchedulerFn>,

    /// Called once when the effect is stopped.
    pub on_stop: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl EffectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    pub fn allow_recurse(mut self) -> Self {
        self.allow_recurse = true;
        self
    }

    pub fn scheduler<F>(mut self, scheduler: F) -> Self
    where
        F: Fn(&Effect) + Send + Sync + 'static,
    {
        self.scheduler = Some(Arc::new(scheduler));
        self
    }

    pub fn on_stop<F>(mut self, on_stop: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_stop = Some(Arc::new(on_stop));
        self
    }
}

impl fmt::Debug for EffectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectOptions")
            .field("lazy", &self.lazy)
            .field("allow_recurse", &self.allow_recurse)
            .field("scheduler", &self.scheduler.is_some())
            .field("on_stop", &self.on_stop.is_some())
            .finish()
    }
}

struct EffectInner {
    id: EffectId,
    runtime: Weak<RuntimeInner>,
    run: Box<dyn Fn() + Send + Sync>,
    options: EffectOptions,
    active: AtomicBool,
    running: AtomicBool,
    pending: AtomicBool,
    run_count: AtomicUsize,
}

/// A re-runnable computation that subscribes to the dependencies it reads.
///
/// `Effect` is a handle; clones share state. The runtime keeps every active
/// effect alive until it is stopped or the runtime shuts down.
///
/// # Example
///
/// ```rust
/// use weft_core::{Object, Runtime};
///
/// let rt = Runtime::new();
/// let state = rt.reactive(Object::record_from([("count", 0)]));
///
/// let effect = rt.effect({
///     let state = state.clone();
///     move || {
///         let _ = state.get("count");
///     }
/// });
///
/// state.set("count", 5);
/// assert_eq!(effect.run_count(), 2);
/// ```
#[derive(Clone)]
pub struct Effect(Arc<EffectInner>);

impl Effect {
    pub(crate) fn new_in<F>(runtime: &Runtime, run: F, options: EffectOptions) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self(Arc::new(EffectInner {
            id: EffectId::new(),
            runtime: runtime.downgrade(),
            run: Box::new(run),
            options,
            active: AtomicBool::new(true),
            running: AtomicBool::new(false),
            pending: AtomicBool::new(false),
            run_count: AtomicUsize::new(0),
        }))
    }

    /// Get the effect's unique ID.
    pub fn id(&self) -> EffectId {
        self.0.id
    }

    /// The runtime this effect belongs to, if it is still alive.
    pub fn runtime(&self) -> Option<Runtime> {
        self.0.runtime.upgrade().map(Runtime::from_inner)
    }

    /// Execute the effect function, re-collecting its dependencies.
    ///
    /// Does nothing once the effect is stopped, and does not nest inside a
    /// run of the same effect.
    pub fn run(&self) {
        let Some(runtime) = self.runtime() else {
            return;
        };
        if !self.is_active() {
            return;
        }

        if self.0.running.swap(true, Ordering::SeqCst) {
            if self.0.options.allow_recurse {
                self.0.pending.store(true, Ordering::SeqCst);
                tracing::trace!(effect = %self.0.id, "re-run deferred until current run ends");
            } else {
                tracing::debug!(effect = %self.0.id, "effect triggered itself while running; skipped");
            }
            return;
        }
        let _running = RunningGuard(&self.0.running);

        let limit = runtime.config().recursion_limit;
        let mut reruns = 0;
        loop {
            self.0.pending.store(false, Ordering::SeqCst);

            // Cleanup before the run, so this run's reads are the only ones
            // left afterwards.
            runtime.cleanup_effect(self.0.id);
            {
                let _ctx = runtime.inner.context.enter(Frame::Effect(self.0.id));
                (self.0.run)();
            }
            self.0.run_count.fetch_add(1, Ordering::SeqCst);
            if !self.is_active() {
                // Stopped from inside its own run; drop what it read after.
                runtime.cleanup_effect(self.0.id);
                break;
            }
            tracing::trace!(effect = %self.0.id, deps = runtime.dependency_count(self), "effect ran");

            if !self.0.pending.load(Ordering::SeqCst) || !self.is_active() {
                break;
            }
            reruns += 1;
            if reruns >= limit {
                tracing::warn!(effect = %self.0.id, limit, "maximum recursive updates exceeded");
                break;
            }
        }
    }

    /// React to a triggered dependency: skip, schedule or run.
    pub(crate) fn notify(&self, runtime: &Runtime) {
        if !self.is_active() {
            return;
        }
        if !self.0.options.allow_recurse
            && runtime.inner.context.current_effect() == Some(self.0.id)
        {
            tracing::debug!(effect = %self.0.id, "effect triggered itself while running; skipped");
            return;
        }
        match &self.0.options.scheduler {
            Some(scheduler) => scheduler(self),
            None => self.run(),
        }
    }

    /// Stop the effect.
    ///
    /// It is removed from every subscriber set before this returns and is
    /// never invoked again.
    pub fn stop(&self) {
        if !self.0.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(runtime) = self.runtime() {
            runtime.cleanup_effect(self.0.id);
            runtime.unregister_effect(self.0.id);
        }
        tracing::debug!(effect = %self.0.id, "effect stopped");
        if let Some(on_stop) = &self.0.options.on_stop {
            on_stop();
        }
    }

    /// Whether the effect is still active.
    pub fn is_active(&self) -> bool {
        self.0.active.load(Ordering::SeqCst)
    }

    /// Whether the effect function is executing right now.
    pub fn is_running(&self) -> bool {
        self.0.running.load(Ordering::SeqCst)
    }

    /// Get the number of completed runs.
    pub fn run_count(&self) -> usize {
        self.0.run_count.load(Ordering::SeqCst)
    }

    /// Get the number of dependencies recorded by the latest run.
    pub fn dependency_count(&self) -> usize {
        self.runtime()
            .map_or(0, |runtime| runtime.dependency_count(self))
    }

    /// The dependencies recorded by the latest run.
    pub fn dependencies(&self) -> Vec<Dep> {
        self.runtime()
            .map(|runtime| runtime.dependencies(self))
            .unwrap_or_default()
    }

    pub fn options(&self) -> &EffectOptions {
        &self.0.options
    }
}

impl PartialEq for Effect {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Effect {}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.0.id)
            .field("run_count", &self.run_count())
            .field("active", &self.is_active())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Resets the running flag when the run ends, including during unwinding.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{DepKey, Key, Object, Value};
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::atomic::AtomicI64;

    #[test]
    fn effect_runs_on_creation() {
        let rt = Runtime::new();
        let effect = rt.effect(|| {});
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_lazy_does_not_run_on_creation() {
        let rt = Runtime::new();
        let effect = rt.create_effect(|| {}, EffectOptions::new().lazy());
        assert_eq!(effect.run_count(), 0);

        // Manually execute
        effect.run();
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_does_not_run_after_stop() {
        let rt = Runtime::new();
        let state = rt.reactive(Object::record_from([("n", 0)]));
        let effect = rt.effect({
            let state = state.clone();
            move || {
                state.get("n");
            }
        });

        effect.stop();
        assert!(!effect.is_active());
        assert_eq!(effect.dependency_count(), 0);

        state.set("n", 1);
        effect.run();
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn stop_during_own_run_drops_later_reads() {
        let rt = Runtime::new();
        let state = rt.reactive(Object::record_from([("a", 0), ("b", 0)]));
        let slot: Arc<parking_lot::Mutex<Option<Effect>>> = Arc::default();

        let effect = rt.create_effect(
            {
                let state = state.clone();
                let slot = slot.clone();
                move || {
                    state.get("a");
                    if let Some(me) = slot.lock().clone() {
                        me.stop();
                    }
                    state.get("b");
                }
            },
            EffectOptions::new().lazy(),
        );
        *slot.lock() = Some(effect.clone());

        effect.run();
        slot.lock().take();
        assert!(!effect.is_active());
        assert_eq!(effect.dependency_count(), 0);
        assert_eq!(rt.subscriber_count(state.id(), &DepKey::Key(Key::from("b"))), 0);

        state.set("b", 1);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn nested_effect_restores_outer_frame() {
        let rt = Runtime::new();
        let state = rt.reactive(Object::record_from([("a", 0), ("b", 0), ("c", 0)]));

        let inner = rt.create_effect(
            {
                let state = state.clone();
                move || {
                    state.get("b");
                }
            },
            EffectOptions::new().lazy(),
        );
        let outer = rt.effect({
            let state = state.clone();
            let inner = inner.clone();
            move || {
                state.get("a");
                inner.run();
                state.get("c");
            }
        });

        assert_eq!(rt.context_depth(), 0);
        assert!(rt.is_subscribed(&outer, state.id(), Key::from("a")));
        assert!(rt.is_subscribed(&outer, state.id(), Key::from("c")));
        assert!(!rt.is_subscribed(&outer, state.id(), Key::from("b")));
        assert!(rt.is_subscribed(&inner, state.id(), Key::from("b")));
        assert_eq!(inner.dependency_count(), 1);

        state.set("b", 1);
        assert_eq!(outer.run_count(), 1);
        assert_eq!(inner.run_count(), 2);
    }

    #[test]
    fn on_stop_fires_once() {
        let rt = Runtime::new();
        let stops = Arc::new(AtomicUsize::new(0));
        let effect = rt.create_effect(
            || {},
            EffectOptions::new().on_stop({
                let stops = stops.clone();
                move || {
                    stops.fetch_add(1, Ordering::SeqCst);
                }
            }),
        );

        effect.stop();
        effect.stop();
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn scheduler_replaces_direct_run() {
        let rt = Runtime::new();
        let state = rt.reactive(Object::record_from([("n", 0)]));
        let scheduled = Arc::new(AtomicUsize::new(0));

        let effect = rt.create_effect(
            {
                let state = state.clone();
                move || {
                    state.get("n");
                }
            },
            EffectOptions::new().scheduler({
                let scheduled = scheduled.clone();
                move |_| {
                    scheduled.fetch_add(1, Ordering::SeqCst);
                }
            }),
        );

        state.set("n", 1);
        state.set("n", 2);
        assert_eq!(scheduled.load(Ordering::SeqCst), 2);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn self_trigger_is_skipped() {
        let rt = Runtime::new();
        let state = rt.reactive(Object::record_from([("n", 0)]));
        let effect = rt.effect({
            let state = state.clone();
            move || {
                let n = state.get("n").as_int().unwrap_or(0);
                state.set("n", n + 1);
            }
        });

        assert_eq!(effect.run_count(), 1);
        assert_eq!(state.get("n"), Value::Int(1));
    }

    #[test]
    fn allow_recurse_reruns_until_stable() {
        let rt = Runtime::new();
        let state = rt.reactive(Object::record_from([("n", 0)]));
        let effect = rt.create_effect(
            {
                let state = state.clone();
                move || {
                    let n = state.get("n").as_int().unwrap_or(0);
                    if n < 3 {
                        state.set("n", n + 1);
                    }
                }
            },
            EffectOptions::new().allow_recurse(),
        );

        assert_eq!(state.get("n"), Value::Int(3));
        assert_eq!(effect.run_count(), 4);
    }

    #[test]
    fn panic_leaves_effect_idle_with_partial_deps() {
        let rt = Runtime::new();
        let state = rt.reactive(Object::record_from([("a", 0), ("b", 0), ("fail", 0)]));
        let seen = Arc::new(AtomicI64::new(0));

        let effect = rt.effect({
            let state = state.clone();
            let seen = seen.clone();
            move || {
                let a = state.get("a").as_int().unwrap_or(0);
                seen.store(a, Ordering::SeqCst);
                if state.get("fail") == Value::Int(1) {
                    panic!("render failed");
                }
                state.get("b");
            }
        });
        assert_eq!(effect.dependency_count(), 3);

        let result = catch_unwind(AssertUnwindSafe(|| state.set("fail", 1)));
        assert!(result.is_err());
        assert!(!effect.is_running());
        assert_eq!(rt.context_depth(), 0);

        // Only the reads that completed before the panic are still tracked.
        assert_eq!(effect.dependency_count(), 2);
        state.set("fail", 0);
        state.set("a", 7);
        assert_eq!(seen.load(Ordering::SeqCst), 7);
        assert_eq!(effect.dependency_count(), 3);
    }
}
