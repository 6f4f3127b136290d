//! Error types for the render pipeline.
//!
//! The reactive layer never fails: reads and writes on things that are not
//! aggregates pass straight through, and writes to readonly wrappers are
//! rejected with a warning. What can fail is reconciliation against a host
//! tree whose state does not match what the renderer believes, which is
//! always a precondition violation on the caller's side.

use thiserror::Error;

use crate::render::{HostId, InstanceId};

/// Errors raised while mounting, patching or unmounting a tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The host adapter has no node with this handle.
    #[error("unknown host node {0}")]
    UnknownNode(HostId),

    /// The node exists but is not attached to a parent.
    #[error("host node {0} is not attached to a parent")]
    Detached(HostId),

    /// An anchor was passed that is not a child of the target parent.
    #[error("anchor {anchor} is not a child of {parent}")]
    AnchorNotChild { parent: HostId, anchor: HostId },

    /// A vnode was patched or unmounted before it was ever mounted.
    #[error("vnode `{0}` has no host node; it was never mounted")]
    Unmounted(String),

    /// A component vnode refers to an instance that was already torn down.
    #[error("component instance {0} no longer exists")]
    MissingInstance(InstanceId),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
