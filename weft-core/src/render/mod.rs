//! Rendering
//!
//! This module turns vnode trees into host mutations.
//!
//! # Pipeline
//!
//! ```text
//! state write ──► render effect queued ──► flush
//!                                           │
//!        host ops ◄── patch(old, new) ◄── render fn
//! ```
//!
//! - [`VNode`]s are plain values built fresh on every render.
//! - The [`Renderer`] diffs each new tree against the previous one and
//!   applies the difference through a [`HostAdapter`].
//! - [`Component`]s pair a setup function with a render effect, so a
//!   component re-renders exactly when something it rendered from changes.
//! - [`MemoryHost`] is an in-memory host that records every operation.

mod component;
mod host;
mod keyed;
mod memory;
mod patch;
mod vnode;

pub use component::{Component, InstanceId, RenderFn, SetupContext};
pub use host::{HostAdapter, HostId};
pub use memory::{dispatch, HostOp, MemoryHost};
pub use patch::Renderer;
pub use vnode::{event_name, h, listener_key, placeholder, text, Children, NodeKind, PropKind, Props, VNode};
