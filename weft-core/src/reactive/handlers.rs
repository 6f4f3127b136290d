//! Per-kind interception.
//!
//! Each aggregate kind decides which dependency a read records and which
//! dependencies a write triggers. The rules:
//!
//! | kind     | read key          | size / keys read | write                                   |
//! |----------|-------------------|------------------|-----------------------------------------|
//! | record   | the field         | `Iterate`        | add/delete: field + `Iterate`; set: field |
//! | sequence | the index         | `length`         | every shifted index + `length` + `Iterate` |
//! | map      | the entry key     | `Iterate`        | entry + `Iterate`                        |
//! | set      | the member        | `Iterate`        | member + `Iterate`                       |
//!
//! Map sets trigger `Iterate` even when only a value changed, since value
//! iteration depends on it. A clear triggers every subscriber of the target.
//!
//! Handlers never hold the object lock while triggering.

use super::dep::{DepKey, TriggerOp, TriggerResult};
use super::value::{is_truthy, Key, ObjectData, ObjectKind, Value};
use super::wrapper::Reactive;

pub(crate) trait Handler: Sync {
    fn get(&self, target: &Reactive, key: &Key) -> Value;

    fn has(&self, target: &Reactive, key: &Key) -> bool;

    fn len(&self, target: &Reactive) -> usize {
        target.track(DepKey::Iterate);
        target.raw().len()
    }

    fn keys(&self, target: &Reactive) -> Vec<Key> {
        target.track(DepKey::Iterate);
        target.raw().read().keys()
    }

    fn set(&self, target: &Reactive, key: Key, value: Value) -> TriggerResult;

    fn delete(&self, target: &Reactive, key: &Key) -> TriggerResult;

    fn clear(&self, target: &Reactive) -> TriggerResult {
        {
            let mut data = target.raw().write();
            if data.is_empty() {
                return TriggerResult::Unchanged;
            }
            data.clear();
        }
        target.trigger(TriggerOp::Clear, &[])
    }
}

pub(crate) fn for_kind(kind: ObjectKind) -> &'static dyn Handler {
    match kind {
        ObjectKind::Record => &RecordHandler,
        ObjectKind::Sequence => &SequenceHandler,
        ObjectKind::Map => &MapHandler,
        ObjectKind::Set => &SetHandler,
    }
}

fn key_dep(key: Key) -> DepKey {
    DepKey::Key(key)
}

// ---- Records ----

struct RecordHandler;

impl Handler for RecordHandler {
    fn get(&self, target: &Reactive, key: &Key) -> Value {
        let field = key.as_field();
        target.track(Key::Str(field.clone()));
        target.raw().peek(&Key::Str(field))
    }

    fn has(&self, target: &Reactive, key: &Key) -> bool {
        let field = Key::Str(key.as_field());
        target.track(field.clone());
        target.raw().read().contains(&field)
    }

    fn set(&self, target: &Reactive, key: Key, value: Value) -> TriggerResult {
        let field = key.as_field();
        let op = {
            let mut data = target.raw().write();
            let Some(fields) = data.as_record_mut() else {
                return TriggerResult::Unchanged;
            };
            match fields.get_mut(&field) {
                Some(old) if *old == value => return TriggerResult::Unchanged,
                Some(old) => {
                    *old = value;
                    TriggerOp::Set
                }
                None => {
                    fields.insert(field.clone(), value);
                    TriggerOp::Add
                }
            }
        };

        let key = key_dep(Key::Str(field));
        match op {
            TriggerOp::Add => target.trigger(op, &[key, DepKey::Iterate]),
            _ => target.trigger(op, &[key]),
        }
    }

    fn delete(&self, target: &Reactive, key: &Key) -> TriggerResult {
        let field = key.as_field();
        let removed = target
            .raw()
            .write()
            .as_record_mut()
            .and_then(|fields| fields.shift_remove(&field));
        if removed.is_none() {
            return TriggerResult::Unchanged;
        }
        target.trigger(TriggerOp::Delete, &[key_dep(Key::Str(field)), DepKey::Iterate])
    }
}

// ---- Sequences ----

struct SequenceHandler;

fn length_key() -> Key {
    Key::from(Key::LENGTH)
}

/// Whether growing `target` to `len` stays within the configured limit.
fn within_limit(target: &Reactive, len: usize) -> bool {
    let limit = target.runtime().config().max_sequence_len;
    if len > limit {
        tracing::warn!(target = %target.id(), len, limit, "sequence growth refused");
        return false;
    }
    true
}

impl SequenceHandler {
    fn set_length(&self, target: &Reactive, new_len: usize) -> TriggerResult {
        if !within_limit(target, new_len) {
            return TriggerResult::Unchanged;
        }
        let old_len = {
            let mut data = target.raw().write();
            let Some(items) = data.as_sequence_mut() else {
                return TriggerResult::Unchanged;
            };
            let old_len = items.len();
            if old_len == new_len {
                return TriggerResult::Unchanged;
            }
            items.resize(new_len, Value::Null);
            old_len
        };

        let mut keys: Vec<DepKey> = (new_len..old_len).map(|i| key_dep(Key::from(i))).collect();
        keys.push(key_dep(length_key()));
        keys.push(DepKey::Iterate);
        let op = if new_len < old_len {
            TriggerOp::Delete
        } else {
            TriggerOp::Add
        };
        target.trigger(op, &keys)
    }
}

impl Handler for SequenceHandler {
    fn get(&self, target: &Reactive, key: &Key) -> Value {
        if key.is_length() {
            return Value::from(self.len(target));
        }
        match key.as_index() {
            Some(index) => {
                target.track(Key::from(index));
                target.raw().peek(&Key::from(index))
            }
            None => Value::Null,
        }
    }

    fn has(&self, target: &Reactive, key: &Key) -> bool {
        match key.as_index() {
            Some(index) => {
                target.track(Key::from(index));
                index < target.raw().len()
            }
            None => false,
        }
    }

    fn len(&self, target: &Reactive) -> usize {
        target.track(length_key());
        target.raw().len()
    }

    fn set(&self, target: &Reactive, key: Key, value: Value) -> TriggerResult {
        if key.is_length() {
            let Some(new_len) = value.as_int().and_then(|n| usize::try_from(n).ok()) else {
                tracing::warn!(target = %target.id(), value = value.type_name(), "invalid sequence length");
                return TriggerResult::Unchanged;
            };
            return self.set_length(target, new_len);
        }
        let Some(index) = key.as_index() else {
            tracing::warn!(target = %target.id(), %key, "non-index key on a sequence");
            return TriggerResult::Unchanged;
        };

        let old_len = {
            let mut data = target.raw().write();
            let Some(items) = data.as_sequence_mut() else {
                return TriggerResult::Unchanged;
            };
            let old_len = items.len();
            if index < old_len {
                if items[index] == value {
                    return TriggerResult::Unchanged;
                }
                items[index] = value;
            } else {
                if !within_limit(target, index.saturating_add(1)) {
                    return TriggerResult::Unchanged;
                }
                items.resize(index, Value::Null);
                items.push(value);
            }
            old_len
        };

        if index < old_len {
            return target.trigger(TriggerOp::Set, &[key_dep(Key::from(index))]);
        }
        let mut keys: Vec<DepKey> = (old_len..=index).map(|i| key_dep(Key::from(i))).collect();
        keys.push(key_dep(length_key()));
        keys.push(DepKey::Iterate);
        target.trigger(TriggerOp::Add, &keys)
    }

    fn delete(&self, target: &Reactive, key: &Key) -> TriggerResult {
        let Some(index) = key.as_index() else {
            return TriggerResult::Unchanged;
        };
        let old_len = {
            let mut data = target.raw().write();
            let Some(items) = data.as_sequence_mut() else {
                return TriggerResult::Unchanged;
            };
            if index >= items.len() {
                return TriggerResult::Unchanged;
            }
            let old_len = items.len();
            items.remove(index);
            old_len
        };

        let mut keys: Vec<DepKey> = (index..old_len).map(|i| key_dep(Key::from(i))).collect();
        keys.push(key_dep(length_key()));
        keys.push(DepKey::Iterate);
        target.trigger(TriggerOp::Delete, &keys)
    }
}

// ---- Maps ----

struct MapHandler;

impl Handler for MapHandler {
    fn get(&self, target: &Reactive, key: &Key) -> Value {
        target.track(key.clone());
        target.raw().peek(key)
    }

    fn has(&self, target: &Reactive, key: &Key) -> bool {
        target.track(key.clone());
        target.raw().read().contains(key)
    }

    fn set(&self, target: &Reactive, key: Key, value: Value) -> TriggerResult {
        let op = {
            let mut data = target.raw().write();
            let Some(entries) = data.as_map_mut() else {
                return TriggerResult::Unchanged;
            };
            match entries.get_mut(&key) {
                Some(old) if *old == value => return TriggerResult::Unchanged,
                Some(old) => {
                    *old = value;
                    TriggerOp::Set
                }
                None => {
                    entries.insert(key.clone(), value);
                    TriggerOp::Add
                }
            }
        };
        target.trigger(op, &[key_dep(key), DepKey::Iterate])
    }

    fn delete(&self, target: &Reactive, key: &Key) -> TriggerResult {
        let removed = target
            .raw()
            .write()
            .as_map_mut()
            .and_then(|entries| entries.shift_remove(key));
        if removed.is_none() {
            return TriggerResult::Unchanged;
        }
        target.trigger(TriggerOp::Delete, &[key_dep(key.clone()), DepKey::Iterate])
    }
}

// ---- Sets ----

struct SetHandler;

impl Handler for SetHandler {
    fn get(&self, target: &Reactive, key: &Key) -> Value {
        Value::Bool(self.has(target, key))
    }

    fn has(&self, target: &Reactive, key: &Key) -> bool {
        target.track(key.clone());
        target.raw().read().contains(key)
    }

    fn set(&self, target: &Reactive, key: Key, value: Value) -> TriggerResult {
        if !is_truthy(&value) {
            return self.delete(target, &key);
        }
        let added = target
            .raw()
            .write()
            .as_set_mut()
            .is_some_and(|members| members.insert(key.clone()));
        if !added {
            return TriggerResult::Unchanged;
        }
        target.trigger(TriggerOp::Add, &[key_dep(key), DepKey::Iterate])
    }

    fn delete(&self, target: &Reactive, key: &Key) -> TriggerResult {
        let removed = target
            .raw()
            .write()
            .as_set_mut()
            .is_some_and(|members| members.shift_remove(key));
        if !removed {
            return TriggerResult::Unchanged;
        }
        target.trigger(TriggerOp::Delete, &[key_dep(key.clone()), DepKey::Iterate])
    }
}

// ---- Tests ----

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Object, Runtime};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn watch<F>(rt: &Runtime, read: F) -> Arc<AtomicUsize>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let runs = Arc::new(AtomicUsize::new(0));
        let r = runs.clone();
        rt.effect(move || {
            r.fetch_add(1, Ordering::SeqCst);
            read();
        });
        runs
    }

    #[test]
    fn sequence_growth_is_capped() {
        let config = crate::RuntimeConfig {
            max_sequence_len: 8,
            ..Default::default()
        };
        let rt = Runtime::with_config(config);
        let items = rt.reactive(Object::sequence_from([1, 2]));

        assert!(!items.set(1_000_000usize, 3).is_triggered());
        assert!(!items.set(Key::LENGTH, 9).is_triggered());
        assert_eq!(items.len(), 2);

        assert!(items.set(7usize, 3).is_triggered());
        assert_eq!(items.len(), 8);
    }

    #[test]
    fn record_set_existing_does_not_trigger_iteration() {
        let rt = Runtime::new();
        let state = rt.reactive(Object::record_from([("a", 1)]));
        let iter_runs = watch(&rt, {
            let state = state.clone();
            move || {
                state.len();
            }
        });

        state.set("a", 2);
        assert_eq!(iter_runs.load(Ordering::SeqCst), 1);
        state.set("b", 1);
        assert_eq!(iter_runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn sequence_push_triggers_length() {
        let rt = Runtime::new();
        let list = rt.reactive(Object::sequence_from([1, 2]));
        let runs = watch(&rt, {
            let list = list.clone();
            move || {
                list.len();
            }
        });

        list.push(3);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(list.get(Key::LENGTH), Value::Int(3));
    }

    #[test]
    fn sequence_index_write_is_precise() {
        let rt = Runtime::new();
        let list = rt.reactive(Object::sequence_from([1, 2, 3]));
        let first = watch(&rt, {
            let list = list.clone();
            move || {
                list.get(0);
            }
        });
        let length = watch(&rt, {
            let list = list.clone();
            move || {
                list.len();
            }
        });

        list.set(2, 30);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(length.load(Ordering::SeqCst), 1);

        list.set(0, 10);
        assert_eq!(first.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn sequence_remove_shifts_and_triggers_later_indices() {
        let rt = Runtime::new();
        let list = rt.reactive(Object::sequence_from(["a", "b", "c"]));
        let first = watch(&rt, {
            let list = list.clone();
            move || {
                list.get(0);
            }
        });
        let last = watch(&rt, {
            let list = list.clone();
            move || {
                list.get(2);
            }
        });

        assert_eq!(list.remove_at(1), Value::from("b"));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(last.load(Ordering::SeqCst), 2);
        assert_eq!(list.get(1), Value::from("c"));
    }

    #[test]
    fn truncating_length_triggers_dropped_indices() {
        let rt = Runtime::new();
        let list = rt.reactive(Object::sequence_from([1, 2, 3, 4]));
        let tail = watch(&rt, {
            let list = list.clone();
            move || {
                list.get(3);
            }
        });

        assert_eq!(list.set(Key::LENGTH, 2), TriggerResult::Triggered(TriggerOp::Delete));
        assert_eq!(tail.load(Ordering::SeqCst), 2);
        assert_eq!(list.len(), 2);
        assert_eq!(list.pop(), Value::Int(2));
    }

    #[test]
    fn map_size_uses_the_iteration_key() {
        let rt = Runtime::new();
        let map = rt.reactive(Object::map());
        let size = watch(&rt, {
            let map = map.clone();
            move || {
                map.len();
            }
        });

        map.set(1, "one");
        assert_eq!(size.load(Ordering::SeqCst), 2);
        map.set(1, "uno");
        assert_eq!(size.load(Ordering::SeqCst), 3);
        map.delete(1);
        assert_eq!(size.load(Ordering::SeqCst), 4);
        assert!(map.is_empty());
    }

    #[test]
    fn set_membership() {
        let rt = Runtime::new();
        let set = rt.reactive(Object::set());
        let member = watch(&rt, {
            let set = set.clone();
            move || {
                set.has("x");
            }
        });

        assert_eq!(set.add("x"), TriggerResult::Triggered(TriggerOp::Add));
        assert_eq!(set.add("x"), TriggerResult::Unchanged);
        assert_eq!(member.load(Ordering::SeqCst), 2);

        set.set("x", false);
        assert!(!set.has("x"));
        assert_eq!(member.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn clear_notifies_every_reader() {
        let rt = Runtime::new();
        let state = rt.reactive(Object::record_from([("a", 1), ("b", 2)]));
        let reader = watch(&rt, {
            let state = state.clone();
            move || {
                state.get("b");
            }
        });

        assert_eq!(state.clear(), TriggerResult::Triggered(TriggerOp::Clear));
        assert_eq!(reader.load(Ordering::SeqCst), 2);
        assert_eq!(state.clear(), TriggerResult::Unchanged);
    }
}
