//! Memo Implementation
//!
//! A Memo is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Memos Work
//!
//! 1. A memo owns a lazy effect that runs the computation. The effect has a
//!    custom scheduler, so a dependency change never recomputes directly.
//!
//! 2. When a dependency changes, the scheduler marks the memo dirty and
//!    triggers whatever read the memo.
//!
//! 3. On the next read, a dirty memo re-runs its effect, caches the result
//!    and becomes clean. A memo nobody reads stays dirty and costs nothing.
//!
//! Reading a memo inside an effect subscribes the effect to the memo, not to
//! the memo's own inputs.
//!
//! # Stopping
//!
//! A stopped memo keeps its cached value. If it was dirty when stopped, the
//! next read computes once more without tracking and the result is final.

use std::fmt::{self, Debug};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::{Mutex, RwLock};

use super::dep::TriggerOp;
use super::effect::{Effect, EffectOptions};
use super::runtime::Runtime;
use super::signal::value_key;
use super::subscriber::TargetId;

/// Dirty state for a memo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoState {
    /// The cached value is up-to-date.
    Clean,

    /// The memo needs to recompute before it is read.
    Dirty,
}

type ComputeFn<T> = Arc<dyn Fn() -> T + Send + Sync>;

struct MemoInner<T> {
    id: TargetId,
    runtime: Runtime,
    compute: ComputeFn<T>,
    value: RwLock<Option<T>>,
    state: Mutex<MemoState>,
    effect: OnceLock<Effect>,
}

impl<T> MemoInner<T> {
    fn store(&self, value: T) {
        *self.value.write() = Some(value);
        *self.state.lock() = MemoState::Clean;
    }
}

impl<T> Drop for MemoInner<T> {
    fn drop(&mut self) {
        if let Some(effect) = self.effect.get() {
            effect.stop();
        }
    }
}

/// A cached derived value that recomputes only when dependencies change.
///
/// Dependents are notified when the memo is invalidated, before the new
/// value is known.
///
/// # Example
///
/// ```rust
/// use weft_core::Runtime;
///
/// let rt = Runtime::new();
/// let count = rt.signal(2);
/// let doubled = rt.memo({
///     let count = count.clone();
///     move || count.get() * 2
/// });
///
/// assert_eq!(doubled.get(), 4);
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<MemoInner<T>>,
}

impl Runtime {
    /// Create a memo owned by this runtime. The computation runs on first
    /// read.
    pub fn memo<T, F>(&self, compute: F) -> Memo<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Memo::new(self, compute)
    }
}

impl<T> Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new<F>(runtime: &Runtime, compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let inner = Arc::new(MemoInner {
            id: TargetId::new(),
            runtime: runtime.clone(),
            compute: Arc::new(compute),
            value: RwLock::new(None),
            state: Mutex::new(MemoState::Dirty),
            effect: OnceLock::new(),
        });

        let on_run: Weak<MemoInner<T>> = Arc::downgrade(&inner);
        let on_trigger = on_run.clone();
        let options = EffectOptions::new().lazy().scheduler(move |_| {
            let Some(memo) = on_trigger.upgrade() else {
                return;
            };
            {
                let mut state = memo.state.lock();
                if *state == MemoState::Dirty {
                    return;
                }
                *state = MemoState::Dirty;
            }
            memo.runtime.trigger(memo.id, TriggerOp::Set, &[value_key()]);
        });

        let effect = runtime.create_effect(
            move || {
                if let Some(memo) = on_run.upgrade() {
                    let value = (memo.compute)();
                    memo.store(value);
                }
            },
            options,
        );
        let _ = inner.effect.set(effect);

        Self { inner }
    }

    /// The target id readers of this memo subscribe to.
    pub fn id(&self) -> TargetId {
        self.inner.id
    }

    /// Get the current value, recomputing if necessary.
    pub fn get(&self) -> T {
        self.inner.runtime.track(self.inner.id, value_key());
        self.get_untracked()
    }

    /// Get the current value without subscribing the running effect.
    pub fn get_untracked(&self) -> T {
        if self.state() == MemoState::Dirty && self.is_active() {
            if let Some(effect) = self.inner.effect.get() {
                effect.run();
            }
        }
        if self.state() == MemoState::Clean {
            if let Some(value) = self.inner.value.read().clone() {
                return value;
            }
        }

        // Stopped while dirty, or read from inside its own computation.
        let value = self.inner.runtime.untracked(|| (self.inner.compute)());
        if !self.is_active() {
            self.inner.store(value.clone());
        }
        value
    }

    /// Mark the memo as needing recomputation.
    pub fn mark_dirty(&self) {
        *self.inner.state.lock() = MemoState::Dirty;
    }

    pub fn state(&self) -> MemoState {
        *self.inner.state.lock()
    }

    /// Whether the memo has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.read().is_some()
    }

    /// Number of effects reading this memo.
    pub fn dependent_count(&self) -> usize {
        self.inner
            .runtime
            .subscriber_count(self.inner.id, &value_key())
    }

    pub fn is_active(&self) -> bool {
        self.inner.effect.get().is_some_and(Effect::is_active)
    }

    /// Stop recomputing. The cached value stays readable.
    pub fn stop(&self) {
        if let Some(effect) = self.inner.effect.get() {
            effect.stop();
        }
    }
}

impl<T> Clone for Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Memo<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("has_value", &self.has_value())
            .field("dependent_count", &self.dependent_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
