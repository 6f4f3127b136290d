//! Reactive Primitives
//!
//! This module implements the reactive system: wrapped state, effects, and
//! the derived primitives built on them.
//!
//! # Concepts
//!
//! ## Wrappers
//!
//! A [`Reactive`] wraps a raw aggregate (record, sequence, map or set). Reads
//! through it are recorded as dependencies of the running effect; writes
//! through it notify exactly the effects that read what changed.
//!
//! ## Effects
//!
//! An [`Effect`] is a re-runnable computation. Each run forgets the
//! dependencies of the previous run and records new ones, so an effect only
//! ever depends on what its latest run read.
//!
//! ## Signals, Memos and Watchers
//!
//! A [`Signal`] is a single typed cell. A [`Memo`] caches a derived value and
//! recomputes it lazily. A watcher runs a callback with the new and previous
//! value of a getter.
//!
//! # Implementation Notes
//!
//! All state lives in a [`Runtime`]: the dependency store, the stack of
//! running effects, the effect registry, the wrapper cache and the job queue.
//! Runtimes are independent of each other and of the thread they are used
//! from.

mod context;
mod dep;
mod effect;
mod handlers;
mod memo;
mod runtime;
mod signal;
mod subscriber;
mod value;
mod watch;
mod wrapper;

pub use context::{ContextGuard, ContextStack, Frame};
pub use dep::{Dep, DepKey, DepStore, TriggerOp, TriggerResult};
pub use effect::{Effect, EffectOptions, SchedulerFn};
pub use memo::{Memo, MemoState};
pub use runtime::Runtime;
pub use signal::Signal;
pub use subscriber::{EffectId, TargetId};
pub use value::{Callback, Key, Object, ObjectKind, Value};
pub use watch::{traverse, Flush, WatchHandle, WatchOptions};
pub use wrapper::{is_readonly, is_wrapped, unwrap, Reactive, WrapMode};
