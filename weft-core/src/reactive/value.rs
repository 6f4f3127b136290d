//! Dynamic values held by reactive state.
//!
//! Application state is a tree of [`Value`]s. Scalars are plain data; the
//! aggregate kinds (records, sequences, maps, sets) live behind an
//! identity-bearing [`Object`] handle so that the wrapper layer can attach
//! dependencies to "this particular record" rather than to its contents.
//!
//! Two further kinds are deliberately opaque: [`Value::Host`] points at a node
//! of the external host tree and [`Value::Func`] holds a callback. Neither is
//! ever wrapped.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::subscriber::TargetId;
use super::wrapper::Reactive;
use crate::render::HostId;

// ----------------------------------------------------------------------------
// Keys
// ----------------------------------------------------------------------------

/// A scalar key.
///
/// Used for record fields, sequence indices, map and set entries, and as the
/// identity key of a VNode in a list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Bool(bool),
    Int(i64),
    Str(Arc<str>),
}

impl Key {
    /// The pseudo-field of a sequence that reads and writes its length.
    pub const LENGTH: &'static str = "length";

    /// Interpret the key as a record field name.
    pub fn as_field(&self) -> Arc<str> {
        match self {
            Key::Str(s) => Arc::clone(s),
            Key::Int(i) => Arc::from(i.to_string()),
            Key::Bool(b) => Arc::from(b.to_string()),
        }
    }

    /// Interpret the key as a sequence index.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Key::Int(i) => usize::try_from(*i).ok(),
            Key::Str(s) => s.parse().ok(),
            Key::Bool(_) => None,
        }
    }

    /// Whether this is the `length` pseudo-field.
    pub fn is_length(&self) -> bool {
        matches!(self, Key::Str(s) if &**s == Self::LENGTH)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Bool(b) => write!(f, "{b}"),
            Key::Int(i) => write!(f, "{i}"),
            Key::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Str(Arc::from(s))
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Str(Arc::from(s))
    }
}

impl From<Arc<str>> for Key {
    fn from(s: Arc<str>) -> Self {
        Key::Str(s)
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Key::Int(i)
    }
}

impl From<i32> for Key {
    fn from(i: i32) -> Self {
        Key::Int(i64::from(i))
    }
}

impl From<u32> for Key {
    fn from(i: u32) -> Self {
        Key::Int(i64::from(i))
    }
}

impl From<usize> for Key {
    fn from(i: usize) -> Self {
        Key::Int(i64::try_from(i).unwrap_or(i64::MAX))
    }
}

impl From<bool> for Key {
    fn from(b: bool) -> Self {
        Key::Bool(b)
    }
}

// ----------------------------------------------------------------------------
// Callbacks
// ----------------------------------------------------------------------------

/// A shareable callback, compared by identity.
///
/// Event listeners in VNode props are callbacks; two renders that hand the
/// same `Callback` to a node produce no host operation.
#[derive(Clone)]
pub struct Callback(Arc<dyn Fn(&Value) + Send + Sync>);

impl Callback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, arg: &Value) {
        (self.0)(arg)
    }

    pub fn ptr_eq(&self, other: &Callback) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback({:p})", Arc::as_ptr(&self.0) as *const ())
    }
}

// ----------------------------------------------------------------------------
// Raw aggregates
// ----------------------------------------------------------------------------

/// The shape of a raw aggregate. Fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// Keyed record with string fields, insertion ordered.
    Record,
    /// Ordered sequence indexed from zero.
    Sequence,
    /// Map from scalar keys to values, insertion ordered.
    Map,
    /// Set of scalar keys, insertion ordered.
    Set,
}

/// Storage for a raw aggregate.
#[derive(Debug)]
pub(crate) enum ObjectData {
    Record(IndexMap<Arc<str>, Value>),
    Sequence(Vec<Value>),
    Map(IndexMap<Key, Value>),
    Set(IndexSet<Key>),
}

impl ObjectData {
    pub(crate) fn as_record_mut(&mut self) -> Option<&mut IndexMap<Arc<str>, Value>> {
        match self {
            ObjectData::Record(fields) => Some(fields),
            _ => None,
        }
    }

    pub(crate) fn as_sequence_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            ObjectData::Sequence(items) => Some(items),
            _ => None,
        }
    }

    pub(crate) fn as_map_mut(&mut self) -> Option<&mut IndexMap<Key, Value>> {
        match self {
            ObjectData::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub(crate) fn as_set_mut(&mut self) -> Option<&mut IndexSet<Key>> {
        match self {
            ObjectData::Set(members) => Some(members),
            _ => None,
        }
    }

    /// The keys present, in order.
    pub(crate) fn keys(&self) -> Vec<Key> {
        match self {
            ObjectData::Record(fields) => fields.keys().cloned().map(Key::Str).collect(),
            ObjectData::Sequence(items) => (0..items.len()).map(Key::from).collect(),
            ObjectData::Map(entries) => entries.keys().cloned().collect(),
            ObjectData::Set(members) => members.iter().cloned().collect(),
        }
    }

    pub(crate) fn contains(&self, key: &Key) -> bool {
        match self {
            ObjectData::Record(fields) => fields.contains_key(&key.as_field()),
            ObjectData::Sequence(items) => key.as_index().is_some_and(|i| i < items.len()),
            ObjectData::Map(entries) => entries.contains_key(key),
            ObjectData::Set(members) => members.contains(key),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        match self {
            ObjectData::Record(fields) => fields.is_empty(),
            ObjectData::Sequence(items) => items.is_empty(),
            ObjectData::Map(entries) => entries.is_empty(),
            ObjectData::Set(members) => members.is_empty(),
        }
    }

    pub(crate) fn clear(&mut self) {
        match self {
            ObjectData::Record(fields) => fields.clear(),
            ObjectData::Sequence(items) => items.clear(),
            ObjectData::Map(entries) => entries.clear(),
            ObjectData::Set(members) => members.clear(),
        }
    }
}

/// Same-value truthiness used by set writes: `Null` and `false` are falsy.
pub(crate) fn is_truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

struct ObjectInner {
    id: TargetId,
    kind: ObjectKind,
    skip: AtomicBool,
    data: RwLock<ObjectData>,
}

/// A raw aggregate with identity.
///
/// Cloning an `Object` clones the handle, not the contents.
#[derive(Clone)]
pub struct Object(Arc<ObjectInner>);

impl Object {
    fn from_data(kind: ObjectKind, data: ObjectData) -> Self {
        Self(Arc::new(ObjectInner {
            id: TargetId::new(),
            kind,
            skip: AtomicBool::new(false),
            data: RwLock::new(data),
        }))
    }

    /// An empty record.
    pub fn record() -> Self {
        Self::record_from(std::iter::empty::<(&str, Value)>())
    }

    /// A record populated from `(field, value)` pairs.
    pub fn record_from<K, V, I>(fields: I) -> Self
    where
        K: Into<Arc<str>>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let fields = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::from_data(ObjectKind::Record, ObjectData::Record(fields))
    }

    /// An empty sequence.
    pub fn sequence() -> Self {
        Self::sequence_from(std::iter::empty::<Value>())
    }

    /// A sequence populated from values.
    pub fn sequence_from<V, I>(items: I) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        let items = items.into_iter().map(Into::into).collect();
        Self::from_data(ObjectKind::Sequence, ObjectData::Sequence(items))
    }

    /// An empty map.
    pub fn map() -> Self {
        Self::map_from(std::iter::empty::<(Key, Value)>())
    }

    /// A map populated from `(key, value)` pairs.
    pub fn map_from<K, V, I>(entries: I) -> Self
    where
        K: Into<Key>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let entries = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::from_data(ObjectKind::Map, ObjectData::Map(entries))
    }

    /// An empty set.
    pub fn set() -> Self {
        Self::set_from(std::iter::empty::<Key>())
    }

    /// A set populated from keys.
    pub fn set_from<K, I>(members: I) -> Self
    where
        K: Into<Key>,
        I: IntoIterator<Item = K>,
    {
        let members = members.into_iter().map(Into::into).collect();
        Self::from_data(ObjectKind::Set, ObjectData::Set(members))
    }

    /// The identity used for dependency tracking.
    pub fn id(&self) -> TargetId {
        self.0.id
    }

    pub fn kind(&self) -> ObjectKind {
        self.0.kind
    }

    /// Opt this object out of wrapping. Wrapping it afterwards returns it
    /// unchanged.
    pub fn mark_raw(&self) -> &Self {
        self.0.skip.store(true, Ordering::Relaxed);
        self
    }

    pub fn is_marked_raw(&self) -> bool {
        self.0.skip.load(Ordering::Relaxed)
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Number of entries, read without tracking.
    pub fn len(&self) -> usize {
        match &*self.read() {
            ObjectData::Record(fields) => fields.len(),
            ObjectData::Sequence(items) => items.len(),
            ObjectData::Map(entries) => entries.len(),
            ObjectData::Set(members) => members.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read a single entry without tracking. Sets report membership as a
    /// boolean.
    pub fn peek(&self, key: &Key) -> Value {
        match &*self.read() {
            ObjectData::Record(fields) => fields.get(&key.as_field()).cloned().unwrap_or_default(),
            ObjectData::Sequence(items) => key
                .as_index()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or_default(),
            ObjectData::Map(entries) => entries.get(key).cloned().unwrap_or_default(),
            ObjectData::Set(members) => Value::Bool(members.contains(key)),
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, ObjectData> {
        self.0.data.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, ObjectData> {
        self.0.data.write()
    }

    /// Snapshot the object as JSON, untracked. Map keys are stringified and
    /// sets become arrays.
    pub fn to_json(&self) -> serde_json::Value {
        match &*self.read() {
            ObjectData::Record(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_json()))
                    .collect(),
            ),
            ObjectData::Sequence(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            ObjectData::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_json()))
                    .collect(),
            ),
            ObjectData::Set(members) => serde_json::Value::Array(
                members.iter().map(|k| Value::from(k.clone()).to_json()).collect(),
            ),
        }
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.0.id)
            .field("kind", &self.0.kind)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Values
// ----------------------------------------------------------------------------

/// A dynamically typed value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    /// A raw aggregate.
    Object(Object),
    /// A wrapped aggregate.
    Reactive(Reactive),
    /// A node of the host tree. Never wrapped.
    Host(HostId),
    /// A callback. Never wrapped.
    Func(Callback),
}

impl Value {
    /// Human readable name of the variant, for logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Object(_) => "object",
            Value::Reactive(_) => "reactive",
            Value::Host(_) => "host",
            Value::Func(_) => "func",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_reactive(&self) -> Option<&Reactive> {
        match self {
            Value::Reactive(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_callback(&self) -> Option<&Callback> {
        match self {
            Value::Func(f) => Some(f),
            _ => None,
        }
    }

    /// Render a scalar for display in host text or attributes. Aggregates
    /// render as an empty string.
    pub fn display(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => s.to_string(),
            Value::Object(_) | Value::Reactive(_) | Value::Host(_) | Value::Func(_) => {
                String::new()
            }
        }
    }

    /// Snapshot as JSON, untracked. Host nodes and callbacks become null.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null | Value::Host(_) | Value::Func(_) => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.to_string()),
            Value::Object(o) => o.to_json(),
            Value::Reactive(r) => r.to_raw().to_json(),
        }
    }
}

/// Same-value comparison: scalars compare by value (with `NaN` equal to
/// itself), everything else by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Reactive(a), Value::Reactive(b)) => a == b,
            (Value::Host(a), Value::Host(b)) => a == b,
            (Value::Func(a), Value::Func(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i64::try_from(i).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<Arc<str>> for Value {
    fn from(s: Arc<str>) -> Self {
        Value::Str(s)
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Value::Object(o)
    }
}

impl From<Reactive> for Value {
    fn from(r: Reactive) -> Self {
        Value::Reactive(r)
    }
}

impl From<Callback> for Value {
    fn from(f: Callback) -> Self {
        Value::Func(f)
    }
}

impl From<HostId> for Value {
    fn from(id: HostId) -> Self {
        Value::Host(id)
    }
}

impl From<Key> for Value {
    fn from(key: Key) -> Self {
        match key {
            Key::Bool(b) => Value::Bool(b),
            Key::Int(i) => Value::Int(i),
            Key::Str(s) => Value::Str(s),
        }
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// JSON objects become records and arrays become sequences, recursively.
impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::from(s),
            serde_json::Value::Array(items) => {
                Value::Object(Object::sequence_from(items.into_iter().map(Value::from)))
            }
            serde_json::Value::Object(fields) => Value::Object(Object::record_from(
                fields.into_iter().map(|(k, v)| (k, Value::from(v))),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nan_is_same_value_as_itself() {
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_ne!(Value::Float(0.0), Value::Int(0));
    }

    #[test]
    fn objects_compare_by_identity() {
        let a = Object::record();
        let b = Object::record();
        assert_eq!(Value::from(a.clone()), Value::from(a.clone()));
        assert_ne!(Value::from(a), Value::from(b));
    }

    #[test]
    fn callbacks_compare_by_identity() {
        let f = Callback::new(|_| {});
        let g = Callback::new(|_| {});
        assert_eq!(Value::from(f.clone()), Value::from(f));
        assert_ne!(Value::from(g.clone()), Value::from(Callback::new(|_| {})));
    }

    #[test]
    fn json_builds_nested_aggregates() {
        let value = Value::from(json!({ "todos": [{ "done": false }], "count": 2 }));
        let record = value.as_object().unwrap();
        assert_eq!(record.kind(), ObjectKind::Record);
        assert_eq!(record.peek(&Key::from("count")), Value::Int(2));

        let todos = record.peek(&Key::from("todos"));
        assert_eq!(todos.as_object().unwrap().kind(), ObjectKind::Sequence);
        assert_eq!(value.to_json(), json!({ "todos": [{ "done": false }], "count": 2 }));
    }

    #[test]
    fn key_conversions() {
        assert_eq!(Key::from(3usize).as_index(), Some(3));
        assert_eq!(Key::from("7").as_index(), Some(7));
        assert_eq!(Key::from(-1).as_index(), None);
        assert_eq!(&*Key::from(5).as_field(), "5");
        assert!(Key::from("length").is_length());
    }

    #[test]
    fn set_peek_reports_membership() {
        let set = Object::set_from(["a", "b"]);
        assert_eq!(set.peek(&Key::from("a")), Value::Bool(true));
        assert_eq!(set.peek(&Key::from("z")), Value::Bool(false));
        assert_eq!(set.len(), 2);
    }
}
