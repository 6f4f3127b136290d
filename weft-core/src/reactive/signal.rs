//! Signal Implementation
//!
//! A Signal is a single reactive cell. It holds a typed value and tracks
//! which effects read it.
//!
//! # How Signals Work
//!
//! 1. A signal is a target of its own with a single key, `value`.
//!
//! 2. Reading it within a running effect subscribes the effect to that key.
//!
//! 3. Writing a different value triggers the key. Writing an equal value is
//!    a no-op.
//!
//! Signals sit beside the wrapper layer for state that is not an aggregate:
//! a counter, a flag, the currently selected id.

use std::fmt::{self, Debug};
use std::sync::Arc;

use parking_lot::RwLock;

use super::dep::{DepKey, TriggerOp};
use super::runtime::Runtime;
use super::subscriber::TargetId;
use super::value::Key;

pub(crate) fn value_key() -> DepKey {
    DepKey::Key(Key::from("value"))
}

struct SignalInner<T> {
    id: TargetId,
    runtime: Runtime,
    value: RwLock<T>,
}

/// A reactive cell holding a value of type `T`.
///
/// # Example
///
/// ```rust
/// use weft_core::Runtime;
///
/// let rt = Runtime::new();
/// let count = rt.signal(0);
///
/// count.set(5);
/// assert_eq!(count.get(), 5);
/// ```
pub struct Signal<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    inner: Arc<SignalInner<T>>,
}

impl Runtime {
    /// Create a signal owned by this runtime.
    pub fn signal<T>(&self, value: T) -> Signal<T>
    where
        T: Clone + Send + Sync + PartialEq + 'static,
    {
        Signal::new(self, value)
    }
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    pub fn new(runtime: &Runtime, value: T) -> Self {
        Self {
            inner: Arc::new(SignalInner {
                id: TargetId::new(),
                runtime: runtime.clone(),
                value: RwLock::new(value),
            }),
        }
    }

    /// The target id dependencies are recorded against.
    pub fn id(&self) -> TargetId {
        self.inner.id
    }

    /// Get the current value, subscribing the running effect.
    pub fn get(&self) -> T {
        self.inner.runtime.track(self.inner.id, value_key());
        self.get_untracked()
    }

    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Replace the value. Returns whether subscribers were notified.
    pub fn set(&self, value: T) -> bool {
        {
            let mut guard = self.inner.value.write();
            if *guard == value {
                return false;
            }
            *guard = value;
        }
        self.inner
            .runtime
            .trigger(self.inner.id, TriggerOp::Set, &[value_key()]);
        true
    }

    /// Update the value from the current one.
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&T) -> T,
    {
        let next = {
            let guard = self.inner.value.read();
            f(&guard)
        };
        self.set(next)
    }

    /// Number of effects currently reading this signal.
    pub fn subscriber_count(&self) -> usize {
        self.inner.runtime.subscriber_count(self.inner.id, &value_key())
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + Send + Sync + PartialEq + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("value", &self.get_untracked())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn signal_get_and_set() {
        let rt = Runtime::new();
        let signal = rt.signal(0);
        assert_eq!(signal.get(), 0);

        assert!(signal.set(42));
        assert_eq!(signal.get(), 42);
    }

    #[test]
    fn signal_update() {
        let rt = Runtime::new();
        let signal = rt.signal(10);
        signal.update(|v| v + 5);
        assert_eq!(signal.get(), 15);
    }

    #[test]
    fn signal_notifies_effects() {
        let rt = Runtime::new();
        let signal = rt.signal(0);
        let call_count = Arc::new(AtomicI32::new(0));

        let _effect = rt.effect({
            let signal = signal.clone();
            let call_count = call_count.clone();
            move || {
                signal.get();
                call_count.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert_eq!(signal.subscriber_count(), 1);

        signal.set(1);
        assert_eq!(call_count.load(Ordering::SeqCst), 2);

        signal.set(2);
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn equal_write_is_silent() {
        let rt = Runtime::new();
        let signal = rt.signal("a".to_string());
        let call_count = Arc::new(AtomicI32::new(0));

        let _effect = rt.effect({
            let signal = signal.clone();
            let call_count = call_count.clone();
            move || {
                signal.get();
                call_count.fetch_add(1, Ordering::SeqCst);
            }
        });

        assert!(!signal.set("a".to_string()));
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stopped_effect_unsubscribes() {
        let rt = Runtime::new();
        let signal = rt.signal(0);
        let effect = rt.effect({
            let signal = signal.clone();
            move || {
                signal.get();
            }
        });

        effect.stop();
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn signal_clone_shares_state() {
        let rt = Runtime::new();
        let signal1 = rt.signal(0);
        let signal2 = signal1.clone();

        signal1.set(42);
        assert_eq!(signal2.get(), 42);
        assert_eq!(signal1.id(), signal2.id());
    }

    #[test]
    fn signal_ids_are_unique() {
        let rt = Runtime::new();
        let s1 = rt.signal(0);
        let s2 = rt.signal(0);
        assert_ne!(s1.id(), s2.id());
    }
}
