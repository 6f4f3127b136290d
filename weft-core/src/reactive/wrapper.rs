//! Reactive Wrappers
//!
//! A [`Reactive`] is an interception layer over a raw [`Object`]. Reads
//! through it record a dependency on `(raw object, key)`; writes through it
//! apply to the raw object and then trigger whoever depended on the key.
//!
//! # Identity
//!
//! There is at most one live wrapper per raw object and mode: wrapping the
//! same object twice returns the same wrapper, and wrapping a wrapper returns
//! it unchanged. Dependencies are keyed by the raw object's id, so every
//! wrapper over one object shares them.
//!
//! # Modes
//!
//! - `Deep`: nested aggregates are wrapped lazily, on read.
//! - `Shallow`: reads and writes are tracked, nested aggregates come back raw.
//! - `Readonly`: writes are rejected. Over a raw object nothing is tracked;
//!   layered over a reactive wrapper, reads go through that wrapper and are
//!   tracked there.
//!
//! The per-kind behaviour lives in [`handlers`](super::handlers); this module
//! only routes to it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use super::dep::{DepKey, TriggerOp, TriggerResult};
use super::handlers::{self, Handler};
use super::runtime::Runtime;
use super::subscriber::TargetId;
use super::value::{Key, Object, ObjectKind, Value};

/// How a wrapper treats reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WrapMode {
    Deep,
    Shallow,
    Readonly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    raw: TargetId,
    mode: WrapMode,
    layered: bool,
}

/// Raw-to-wrapper cache. Holds weak references so a wrapper nobody uses can
/// be dropped; the next wrap creates a fresh one with the same dependencies.
#[derive(Default)]
pub(crate) struct WrapperCache {
    entries: HashMap<CacheKey, Weak<ReactiveInner>>,
}

impl WrapperCache {
    fn get(&self, key: &CacheKey) -> Option<Reactive> {
        self.entries.get(key).and_then(Weak::upgrade).map(Reactive)
    }

    fn insert(&mut self, key: CacheKey, wrapper: &Reactive) {
        if self.entries.len() >= 64 && self.entries.len().is_power_of_two() {
            self.entries.retain(|_, weak| weak.strong_count() > 0);
        }
        self.entries.insert(key, Arc::downgrade(&wrapper.0));
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

enum Source {
    Raw,
    Wrapped(Reactive),
}

pub(crate) struct ReactiveInner {
    runtime: Runtime,
    mode: WrapMode,
    raw: Object,
    source: Source,
}

/// A wrapped aggregate.
///
/// Cloning clones the handle; equality is identity.
#[derive(Clone)]
pub struct Reactive(Arc<ReactiveInner>);

impl Runtime {
    /// Wrap a value deeply. Values that are not aggregates, and objects
    /// marked raw, come back unchanged; wrappers come back as they are.
    pub fn wrap(&self, value: impl Into<Value>) -> Value {
        self.wrap_value(value.into(), WrapMode::Deep)
    }

    /// Wrap a value in the given mode. See [`Runtime::wrap`].
    pub fn wrap_value(&self, value: Value, mode: WrapMode) -> Value {
        match value {
            Value::Object(object) if !object.is_marked_raw() => {
                Value::Reactive(self.wrap_object(&object, mode))
            }
            Value::Reactive(wrapper) if mode == WrapMode::Readonly => {
                Value::Reactive(wrapper.to_readonly())
            }
            other => other,
        }
    }

    /// Deep reactive wrapper over `object`.
    pub fn reactive(&self, object: Object) -> Reactive {
        self.wrap_object(&object, WrapMode::Deep)
    }

    /// Shallow reactive wrapper over `object`.
    pub fn shallow_reactive(&self, object: Object) -> Reactive {
        self.wrap_object(&object, WrapMode::Shallow)
    }

    /// Readonly wrapper over `object`.
    pub fn readonly(&self, object: Object) -> Reactive {
        self.wrap_object(&object, WrapMode::Readonly)
    }

    fn wrap_object(&self, object: &Object, mode: WrapMode) -> Reactive {
        let key = CacheKey {
            raw: object.id(),
            mode,
            layered: false,
        };
        let mut cache = self.inner.wrappers.lock();
        if let Some(existing) = cache.get(&key) {
            return existing;
        }

        let wrapper = Reactive(Arc::new(ReactiveInner {
            runtime: self.clone(),
            mode,
            raw: object.clone(),
            source: Source::Raw,
        }));
        cache.insert(key, &wrapper);
        tracing::trace!(target = %object.id(), ?mode, "wrapped");
        wrapper
    }
}

/// The raw value behind any number of wrapper layers.
pub fn unwrap(value: &Value) -> Value {
    match value {
        Value::Reactive(wrapper) => Value::Object(wrapper.to_raw()),
        other => other.clone(),
    }
}

/// Whether `value` is a wrapper.
pub fn is_wrapped(value: &Value) -> bool {
    matches!(value, Value::Reactive(_))
}

/// Whether `value` is a readonly wrapper.
pub fn is_readonly(value: &Value) -> bool {
    matches!(value, Value::Reactive(wrapper) if wrapper.is_readonly())
}

impl Reactive {
    /// The id of the raw object; dependencies are recorded against it.
    pub fn id(&self) -> TargetId {
        self.0.raw.id()
    }

    pub fn kind(&self) -> ObjectKind {
        self.0.raw.kind()
    }

    pub fn mode(&self) -> WrapMode {
        self.0.mode
    }

    pub fn is_readonly(&self) -> bool {
        self.0.mode == WrapMode::Readonly
    }

    pub fn runtime(&self) -> &Runtime {
        &self.0.runtime
    }

    /// The raw object, read without tracking.
    pub fn to_raw(&self) -> Object {
        let mut current = self.clone();
        loop {
            let next = match &current.0.source {
                Source::Raw => return current.0.raw.clone(),
                Source::Wrapped(inner) => inner.clone(),
            };
            current = next;
        }
    }

    /// The wrapper directly underneath this one, if it is layered.
    pub fn inner(&self) -> Option<&Reactive> {
        match &self.0.source {
            Source::Raw => None,
            Source::Wrapped(inner) => Some(inner),
        }
    }

    /// A readonly view of this wrapper. Reads through the view are tracked
    /// by this wrapper.
    pub fn to_readonly(&self) -> Reactive {
        if self.is_readonly() {
            return self.clone();
        }
        let runtime = &self.0.runtime;
        let key = CacheKey {
            raw: self.id(),
            mode: WrapMode::Readonly,
            layered: true,
        };
        let mut cache = runtime.inner.wrappers.lock();
        if let Some(existing) = cache.get(&key) {
            return existing;
        }

        let wrapper = Reactive(Arc::new(ReactiveInner {
            runtime: runtime.clone(),
            mode: WrapMode::Readonly,
            raw: self.0.raw.clone(),
            source: Source::Wrapped(self.clone()),
        }));
        cache.insert(key, &wrapper);
        wrapper
    }

    fn handler(&self) -> &'static dyn Handler {
        handlers::for_kind(self.kind())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Read an entry. Nested aggregates come back wrapped in this wrapper's
    /// mode. Sets report membership as a boolean.
    pub fn get(&self, key: impl Into<Key>) -> Value {
        let key = key.into();
        let value = match &self.0.source {
            Source::Wrapped(inner) => inner.get(key),
            Source::Raw => self.handler().get(self, &key),
        };
        self.wrap_child(value)
    }

    pub fn has(&self, key: impl Into<Key>) -> bool {
        let key = key.into();
        match &self.0.source {
            Source::Wrapped(inner) => inner.has(key),
            Source::Raw => self.handler().has(self, &key),
        }
    }

    pub fn len(&self) -> usize {
        match &self.0.source {
            Source::Wrapped(inner) => inner.len(),
            Source::Raw => self.handler().len(self),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The keys present, in order. Depends on the structure of the target.
    pub fn keys(&self) -> Vec<Key> {
        match &self.0.source {
            Source::Wrapped(inner) => inner.keys(),
            Source::Raw => self.handler().keys(self),
        }
    }

    /// Every value, in order. Depends on the structure and on each entry.
    /// For sets, the members themselves.
    pub fn values(&self) -> Vec<Value> {
        if self.kind() == ObjectKind::Set {
            return self.keys().into_iter().map(Value::from).collect();
        }
        self.keys().into_iter().map(|key| self.get(key)).collect()
    }

    /// Every `(key, value)` pair, in order.
    pub fn entries(&self) -> Vec<(Key, Value)> {
        self.keys()
            .into_iter()
            .map(|key| {
                let value = self.get(key.clone());
                (key, value)
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Write an entry. For sets, a truthy value adds the key and `Null` or
    /// `false` removes it.
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) -> TriggerResult {
        let key = key.into();
        if self.is_readonly() {
            return self.reject("set", &key);
        }
        let value = value.into();
        // Shallow wrappers store what they are given.
        let value = match self.0.mode {
            WrapMode::Shallow => value,
            _ => unwrap(&value),
        };
        self.handler().set(self, key, value)
    }

    /// Remove an entry. Sequences shift later elements down.
    pub fn delete(&self, key: impl Into<Key>) -> TriggerResult {
        let key = key.into();
        if self.is_readonly() {
            return self.reject("delete", &key);
        }
        self.handler().delete(self, &key)
    }

    /// Remove every entry.
    pub fn clear(&self) -> TriggerResult {
        if self.is_readonly() {
            return self.reject("clear", &Key::from("*"));
        }
        self.handler().clear(self)
    }

    /// Add a member to a set.
    pub fn add(&self, key: impl Into<Key>) -> TriggerResult {
        self.set(key, true)
    }

    /// Append to a sequence.
    pub fn push(&self, value: impl Into<Value>) -> TriggerResult {
        let len = self.0.runtime.untracked(|| self.len());
        self.set(len, value)
    }

    /// Remove and return the last element of a sequence.
    pub fn pop(&self) -> Value {
        let len = self.0.runtime.untracked(|| self.len());
        let Some(last) = len.checked_sub(1) else {
            return Value::Null;
        };
        let value = self.0.raw.peek(&Key::from(last));
        if self.delete(last).is_triggered() {
            self.wrap_child(value)
        } else {
            Value::Null
        }
    }

    /// Remove the element at `index` of a sequence, shifting later ones down.
    pub fn remove_at(&self, index: usize) -> Value {
        let value = self.0.raw.peek(&Key::from(index));
        if self.delete(index).is_triggered() {
            self.wrap_child(value)
        } else {
            Value::Null
        }
    }

    fn reject(&self, op: &str, key: &Key) -> TriggerResult {
        if self.0.runtime.config().warn_readonly_writes {
            tracing::warn!(target = %self.id(), op, %key, "write rejected: target is readonly");
        }
        TriggerResult::Rejected
    }

    // ------------------------------------------------------------------
    // Plumbing for handlers
    // ------------------------------------------------------------------

    pub(crate) fn raw(&self) -> &Object {
        &self.0.raw
    }

    pub(crate) fn track(&self, key: impl Into<DepKey>) {
        if self.0.mode != WrapMode::Readonly {
            self.0.runtime.track(self.id(), key);
        }
    }

    pub(crate) fn trigger(&self, op: TriggerOp, keys: &[DepKey]) -> TriggerResult {
        self.0.runtime.trigger(self.id(), op, keys);
        TriggerResult::Triggered(op)
    }

    fn wrap_child(&self, value: Value) -> Value {
        match self.0.mode {
            WrapMode::Shallow => value,
            mode => self.0.runtime.wrap_value(value, mode),
        }
    }

    /// Snapshot the raw contents as JSON, untracked.
    pub fn to_json(&self) -> serde_json::Value {
        self.to_raw().to_json()
    }
}

impl PartialEq for Reactive {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Reactive {}

impl fmt::Debug for Reactive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactive")
            .field("target", &self.id())
            .field("kind", &self.kind())
            .field("mode", &self.0.mode)
            .field("layered", &self.inner().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::HostId;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter(rt: &Runtime, read: impl Fn() + Send + Sync + 'static) -> Arc<AtomicUsize> {
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();
        rt.effect(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            read();
        });
        runs
    }

    fn record(json: serde_json::Value) -> Object {
        Value::from(json).as_object().cloned().unwrap()
    }

    #[test]
    fn wrapping_is_idempotent() {
        let rt = Runtime::new();
        let raw = record(json!({ "a": 1 }));

        let first = rt.wrap(raw.clone());
        let second = rt.wrap(first.clone());
        let third = rt.wrap(raw.clone());

        assert_eq!(first, second);
        assert_eq!(first, third);
        assert_eq!(unwrap(&first), Value::Object(raw));
    }

    #[test]
    fn non_aggregates_pass_through() {
        let rt = Runtime::new();
        assert_eq!(rt.wrap(3), Value::Int(3));
        assert_eq!(rt.wrap(HostId::from_raw(4)), Value::Host(HostId::from_raw(4)));
        assert!(!is_wrapped(&rt.wrap("text")));
    }

    #[test]
    fn marked_raw_objects_are_not_wrapped() {
        let rt = Runtime::new();
        let raw = Object::record();
        raw.mark_raw();
        assert_eq!(rt.wrap(raw.clone()), Value::Object(raw));
    }

    #[test]
    fn nested_reads_wrap_lazily_and_stably() {
        let rt = Runtime::new();
        let state = rt.reactive(record(json!({ "user": { "name": "ada" } })));

        let user = state.get("user");
        assert!(is_wrapped(&user));
        assert_eq!(user, state.get("user"));
        assert_eq!(user.as_reactive().unwrap().get("name"), Value::from("ada"));
    }

    #[test]
    fn writes_store_raw_values() {
        let rt = Runtime::new();
        let state = rt.reactive(Object::record());
        let child = rt.reactive(Object::record());

        state.set("child", child.clone());
        let stored = state.raw().peek(&Key::from("child"));
        assert!(stored.as_object().is_some());
        assert_eq!(state.get("child"), Value::Reactive(child));
    }

    #[test]
    fn unchanged_write_does_not_trigger() {
        let rt = Runtime::new();
        let state = rt.reactive(record(json!({ "n": 1 })));
        let runs = counter(&rt, {
            let state = state.clone();
            move || {
                state.get("n");
            }
        });

        assert_eq!(state.set("n", 1), TriggerResult::Unchanged);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        assert_eq!(state.set("n", 2), TriggerResult::Triggered(TriggerOp::Set));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn adding_a_key_triggers_iteration() {
        let rt = Runtime::new();
        let state = rt.reactive(Object::record());
        let runs = counter(&rt, {
            let state = state.clone();
            move || {
                state.keys();
            }
        });

        state.set("fresh", 1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        state.set("fresh", 2);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        state.delete("fresh");
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn shallow_returns_nested_raw() {
        let rt = Runtime::new();
        let state = rt.shallow_reactive(record(json!({ "inner": { "x": 1 } })));
        assert!(state.get("inner").as_object().is_some());
    }

    #[test]
    fn readonly_rejects_writes() {
        let rt = Runtime::new();
        let view = rt.readonly(record(json!({ "x": 1 })));

        assert_eq!(view.set("x", 2), TriggerResult::Rejected);
        assert_eq!(view.delete("x"), TriggerResult::Rejected);
        assert_eq!(view.get("x"), Value::Int(1));
        assert!(is_readonly(&Value::Reactive(view)));
    }

    #[test]
    fn readonly_over_reactive_tracks_and_unwraps_fully() {
        let rt = Runtime::new();
        let raw = record(json!({ "x": 1, "nested": { "y": 2 } }));
        let state = rt.reactive(raw.clone());
        let view = state.to_readonly();

        assert_eq!(view, state.to_readonly());
        assert_eq!(view.inner(), Some(&state));
        assert_eq!(unwrap(&Value::Reactive(view.clone())), Value::Object(raw));

        let nested = view.get("nested");
        assert!(is_readonly(&nested));

        let runs = counter(&rt, {
            let view = view.clone();
            move || {
                view.get("x");
            }
        });
        state.set("x", 5);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
