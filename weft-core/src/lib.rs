//! Weft Core
//!
//! This crate provides the core runtime for the Weft reactive view framework.
//! It implements:
//!
//! - Fine-grained reactivity over records, sequences, maps and sets
//! - Effects, signals, memos and watchers with precise dependency tracking
//! - A batched job scheduler
//! - Virtual nodes, components and a keyed patch engine over a pluggable
//!   host tree
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Wrappers, dependency tracking, effects and derived state
//! - `scheduler`: Ordered, deduplicated job queue with pre and post flush hooks
//! - `render`: Virtual nodes, components, the renderer and the in-memory host
//! - `config`: Runtime tunables
//! - `error`: Errors raised by reconciliation
//!
//! # Example
//!
//! ```rust
//! use std::sync::atomic::{AtomicI64, Ordering};
//! use std::sync::Arc;
//!
//! use weft_core::{Object, Runtime};
//!
//! let rt = Runtime::new();
//! let state = rt.reactive(Object::record_from([("count", 1)]));
//!
//! // A derived value
//! let doubled = {
//!     let state = state.clone();
//!     rt.memo(move || state.get("count").as_int().unwrap_or(0) * 2)
//! };
//!
//! // An effect that re-runs when `count` changes
//! let seen = Arc::new(AtomicI64::new(0));
//! let sink = seen.clone();
//! let _effect = rt.effect(move || sink.store(doubled.get(), Ordering::SeqCst));
//! assert_eq!(seen.load(Ordering::SeqCst), 2);
//!
//! state.set("count", 5);
//! assert_eq!(seen.load(Ordering::SeqCst), 10);
//! ```

pub mod config;
pub mod error;
pub mod reactive;
pub mod render;
pub mod scheduler;

pub use config::RuntimeConfig;
pub use error::{Error, Result};
pub use reactive::{
    Callback, Effect, EffectOptions, Flush, Key, Memo, Object, Reactive, Runtime, Signal, Value,
    WatchHandle, WatchOptions,
};
pub use render::{h, text, Component, HostAdapter, HostId, MemoryHost, Renderer, VNode};
