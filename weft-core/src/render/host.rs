//! Host adapter interface.
//!
//! The renderer never touches a concrete tree. Everything it does to the
//! outside world goes through a [`HostAdapter`], which owns the real nodes
//! and hands out opaque [`HostId`] handles for them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::reactive::Value;

/// Handle to a node owned by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostId(u32);

impl HostId {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }

    pub(crate) fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Node-level operations the renderer needs from a host tree.
///
/// Creation cannot fail. Everything that takes an existing handle reports
/// unknown or misplaced nodes as an [`Error`](crate::Error).
pub trait HostAdapter: Send {
    fn create_element(&mut self, tag: &str) -> HostId;

    fn create_text(&mut self, text: &str) -> HostId;

    /// Comments back placeholder vnodes.
    fn create_comment(&mut self, text: &str) -> HostId;

    /// Replace the content of a text node.
    fn set_text(&mut self, node: HostId, text: &str) -> Result<()>;

    /// Replace every child of an element with a single run of text.
    fn set_element_text(&mut self, el: HostId, text: &str) -> Result<()>;

    /// Insert `node` into `parent` before `anchor`, or at the end when there
    /// is no anchor. A node that is already attached is moved.
    fn insert(&mut self, node: HostId, parent: HostId, anchor: Option<HostId>) -> Result<()>;

    /// Detach `node` from its parent.
    fn remove(&mut self, node: HostId) -> Result<()>;

    fn parent(&self, node: HostId) -> Option<HostId>;

    fn next_sibling(&self, node: HostId) -> Option<HostId>;

    /// Apply a single prop change. `prev` and `next` are `None` when the prop
    /// is being added or removed.
    fn patch_prop(
        &mut self,
        el: HostId,
        key: &str,
        prev: Option<&Value>,
        next: Option<&Value>,
    ) -> Result<()>;
}
