//! In-memory host tree.
//!
//! [`MemoryHost`] is a complete [`HostAdapter`] over a plain node table. It
//! records every mutation as a [`HostOp`], which makes it the reference
//! host for tests: a test can assert exactly which operations a patch
//! produced and that a node kept its identity across renders.

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::host::{HostAdapter, HostId};
use super::vnode::{event_name, PropKind};
use crate::error::{Error, Result};
use crate::reactive::{unwrap, Callback, Value};

/// One recorded host mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HostOp {
    CreateElement { node: HostId, tag: String },
    CreateText { node: HostId, text: String },
    CreateComment { node: HostId, text: String },
    SetText { node: HostId, text: String },
    SetElementText { node: HostId, text: String },
    Insert { node: HostId, parent: HostId, anchor: Option<HostId> },
    Remove { node: HostId },
    SetAttr { node: HostId, name: String, value: String },
    RemoveAttr { node: HostId, name: String },
    SetClass { node: HostId, value: Option<String> },
    SetStyle { node: HostId, name: String, value: Option<String> },
    AddListener { node: HostId, event: String },
    RemoveListener { node: HostId, event: String },
}

impl HostOp {
    /// Whether this op brought a node into existence.
    pub fn is_create(&self) -> bool {
        matches!(
            self,
            HostOp::CreateElement { .. } | HostOp::CreateText { .. } | HostOp::CreateComment { .. }
        )
    }

    pub fn is_remove(&self) -> bool {
        matches!(self, HostOp::Remove { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeType {
    Element(String),
    Text,
    Comment,
}

#[derive(Debug)]
struct Node {
    ty: NodeType,
    text: String,
    parent: Option<HostId>,
    children: Vec<HostId>,
    attrs: IndexMap<String, String>,
    class: Option<String>,
    style: IndexMap<String, String>,
    listeners: IndexMap<String, Callback>,
}

impl Node {
    fn new(ty: NodeType, text: &str) -> Self {
        Self {
            ty,
            text: text.to_string(),
            parent: None,
            children: Vec::new(),
            attrs: IndexMap::new(),
            class: None,
            style: IndexMap::new(),
            listeners: IndexMap::new(),
        }
    }
}

/// A host tree held entirely in memory.
///
/// Handles index a node table that only grows: removed nodes stay in it,
/// detached, so a handle is never reused. Meant for tests and short-lived
/// trees.
#[derive(Debug, Default)]
pub struct MemoryHost {
    nodes: Vec<Node>,
    ops: Vec<HostOp>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a detached root element to render into. Not recorded as an op.
    pub fn create_root(&mut self) -> HostId {
        self.push(Node::new(NodeType::Element("root".to_string()), ""))
    }

    fn push(&mut self, node: Node) -> HostId {
        let id = HostId::from_raw(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    fn node(&self, id: HostId) -> Result<&Node> {
        self.nodes.get(id.index()).ok_or(Error::UnknownNode(id))
    }

    fn node_mut(&mut self, id: HostId) -> Result<&mut Node> {
        self.nodes.get_mut(id.index()).ok_or(Error::UnknownNode(id))
    }

    fn detach(&mut self, node: HostId) -> Result<Option<HostId>> {
        let Some(parent) = self.node_mut(node)?.parent.take() else {
            return Ok(None);
        };
        self.node_mut(parent)?.children.retain(|child| *child != node);
        Ok(Some(parent))
    }

    // ---- Inspection ----

    /// Every op recorded since the last [`take_ops`](Self::take_ops).
    pub fn ops(&self) -> &[HostOp] {
        &self.ops
    }

    pub fn take_ops(&mut self) -> Vec<HostOp> {
        std::mem::take(&mut self.ops)
    }

    /// The recorded ops as JSON.
    pub fn ops_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.ops).unwrap_or(serde_json::Value::Null)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn tag(&self, node: HostId) -> Option<&str> {
        match &self.node(node).ok()?.ty {
            NodeType::Element(tag) => Some(tag),
            _ => None,
        }
    }

    pub fn children(&self, node: HostId) -> Vec<HostId> {
        self.node(node).map(|n| n.children.clone()).unwrap_or_default()
    }

    pub fn attr(&self, node: HostId, name: &str) -> Option<&str> {
        self.node(node).ok()?.attrs.get(name).map(String::as_str)
    }

    pub fn class(&self, node: HostId) -> Option<&str> {
        self.node(node).ok()?.class.as_deref()
    }

    pub fn style(&self, node: HostId, name: &str) -> Option<&str> {
        self.node(node).ok()?.style.get(name).map(String::as_str)
    }

    /// The listener registered for `event`, if any.
    pub fn listener(&self, node: HostId, event: &str) -> Option<Callback> {
        self.node(node).ok()?.listeners.get(event).cloned()
    }

    /// Concatenated text of `node` and everything under it. Comments
    /// contribute nothing.
    pub fn text_content(&self, node: HostId) -> String {
        let mut out = String::new();
        self.collect_text(node, &mut out);
        out
    }

    fn collect_text(&self, node: HostId, out: &mut String) {
        let Ok(n) = self.node(node) else {
            return;
        };
        match n.ty {
            NodeType::Comment => {}
            NodeType::Text => out.push_str(&n.text),
            NodeType::Element(_) => {
                out.push_str(&n.text);
                for child in &n.children {
                    self.collect_text(*child, out);
                }
            }
        }
    }

    /// Markup for the subtree under `node`, for snapshot-style assertions.
    pub fn serialize(&self, node: HostId) -> String {
        let mut out = String::new();
        self.write_markup(node, &mut out);
        out
    }

    fn write_markup(&self, node: HostId, out: &mut String) {
        let Ok(n) = self.node(node) else {
            return;
        };
        match &n.ty {
            NodeType::Text => out.push_str(&n.text),
            NodeType::Comment => {
                out.push_str("<!--");
                out.push_str(&n.text);
                out.push_str("-->");
            }
            NodeType::Element(tag) => {
                out.push('<');
                out.push_str(tag);
                if let Some(class) = &n.class {
                    out.push_str(&format!(" class=\"{class}\""));
                }
                if !n.style.is_empty() {
                    let style: Vec<String> =
                        n.style.iter().map(|(k, v)| format!("{k}: {v}")).collect();
                    out.push_str(&format!(" style=\"{}\"", style.join("; ")));
                }
                for (name, value) in &n.attrs {
                    out.push_str(&format!(" {name}=\"{value}\""));
                }
                out.push('>');
                out.push_str(&n.text);
                for child in &n.children {
                    self.write_markup(*child, out);
                }
                out.push_str(&format!("</{tag}>"));
            }
        }
    }

    // ---- Props ----

    fn patch_class(&mut self, el: HostId, next: Option<&Value>) -> Result<()> {
        let value = next.map(normalize_class).filter(|class| !class.is_empty());
        self.node_mut(el)?.class = value.clone();
        self.ops.push(HostOp::SetClass { node: el, value });
        Ok(())
    }

    fn patch_style(&mut self, el: HostId, next: Option<&Value>) -> Result<()> {
        let next = next.map(style_entries).unwrap_or_default();
        let node = self.node_mut(el)?;
        let prev = std::mem::replace(&mut node.style, next.clone());

        for name in prev.keys().filter(|name| !next.contains_key(*name)) {
            self.ops.push(HostOp::SetStyle {
                node: el,
                name: name.clone(),
                value: None,
            });
        }
        for (name, value) in &next {
            if prev.get(name) != Some(value) {
                self.ops.push(HostOp::SetStyle {
                    node: el,
                    name: name.clone(),
                    value: Some(value.clone()),
                });
            }
        }
        Ok(())
    }

    fn patch_listener(&mut self, el: HostId, event: String, next: Option<&Value>) -> Result<()> {
        let next = next.and_then(Value::as_callback).cloned();
        let node = self.node_mut(el)?;

        // The old listener goes first, so a replaced handler can never fire.
        if let Some(prev) = node.listeners.shift_remove(&event) {
            if next.as_ref().is_some_and(|next| next.ptr_eq(&prev)) {
                node.listeners.insert(event, prev);
                return Ok(());
            }
            self.ops.push(HostOp::RemoveListener {
                node: el,
                event: event.clone(),
            });
        }
        if let Some(next) = next {
            self.node_mut(el)?.listeners.insert(event.clone(), next);
            self.ops.push(HostOp::AddListener { node: el, event });
        }
        Ok(())
    }

    fn patch_attr(&mut self, el: HostId, name: &str, next: Option<&Value>) -> Result<()> {
        let node = self.node_mut(el)?;
        match next.and_then(attr_value) {
            Some(value) => {
                node.attrs.insert(name.to_string(), value.clone());
                self.ops.push(HostOp::SetAttr {
                    node: el,
                    name: name.to_string(),
                    value,
                });
            }
            None => {
                if node.attrs.shift_remove(name).is_some() {
                    self.ops.push(HostOp::RemoveAttr {
                        node: el,
                        name: name.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// `Null` and `false` remove an attribute; `true` sets it empty.
fn attr_value(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::Bool(true) => Some(String::new()),
        other => Some(other.display()),
    }
}

/// A class prop is a string, a sequence of class names, or a record whose
/// truthy fields are class names.
fn normalize_class(value: &Value) -> String {
    match unwrap(value).to_json() {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_str())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        serde_json::Value::Object(fields) => fields
            .iter()
            .filter(|(_, on)| !matches!(on, serde_json::Value::Null | serde_json::Value::Bool(false)))
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(" "),
        _ => String::new(),
    }
}

/// A style prop is a `name: value; ...` string or a record.
fn style_entries(value: &Value) -> IndexMap<String, String> {
    match unwrap(value).to_json() {
        serde_json::Value::String(s) => s
            .split(';')
            .filter_map(|decl| decl.split_once(':'))
            .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
            .filter(|(name, _)| !name.is_empty())
            .collect(),
        serde_json::Value::Object(fields) => fields
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(name, v)| {
                let value = match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (name, value)
            })
            .collect(),
        _ => IndexMap::new(),
    }
}

impl HostAdapter for MemoryHost {
    fn create_element(&mut self, tag: &str) -> HostId {
        let node = self.push(Node::new(NodeType::Element(tag.to_string()), ""));
        self.ops.push(HostOp::CreateElement {
            node,
            tag: tag.to_string(),
        });
        node
    }

    fn create_text(&mut self, text: &str) -> HostId {
        let node = self.push(Node::new(NodeType::Text, text));
        self.ops.push(HostOp::CreateText {
            node,
            text: text.to_string(),
        });
        node
    }

    fn create_comment(&mut self, text: &str) -> HostId {
        let node = self.push(Node::new(NodeType::Comment, text));
        self.ops.push(HostOp::CreateComment {
            node,
            text: text.to_string(),
        });
        node
    }

    fn set_text(&mut self, node: HostId, text: &str) -> Result<()> {
        self.node_mut(node)?.text = text.to_string();
        self.ops.push(HostOp::SetText {
            node,
            text: text.to_string(),
        });
        Ok(())
    }

    fn set_element_text(&mut self, el: HostId, text: &str) -> Result<()> {
        let children = std::mem::take(&mut self.node_mut(el)?.children);
        for child in children {
            self.node_mut(child)?.parent = None;
        }
        self.node_mut(el)?.text = text.to_string();
        self.ops.push(HostOp::SetElementText {
            node: el,
            text: text.to_string(),
        });
        Ok(())
    }

    fn insert(&mut self, node: HostId, parent: HostId, anchor: Option<HostId>) -> Result<()> {
        self.node(node)?;
        self.node(parent)?;
        if let Some(anchor) = anchor {
            if !self.node(parent)?.children.contains(&anchor) {
                return Err(Error::AnchorNotChild { parent, anchor });
            }
        }

        self.detach(node)?;
        let siblings = &mut self.node_mut(parent)?.children;
        let index = anchor
            .and_then(|anchor| siblings.iter().position(|child| *child == anchor))
            .unwrap_or(siblings.len());
        siblings.insert(index, node);
        self.node_mut(node)?.parent = Some(parent);

        self.ops.push(HostOp::Insert {
            node,
            parent,
            anchor,
        });
        Ok(())
    }

    fn remove(&mut self, node: HostId) -> Result<()> {
        if self.detach(node)?.is_none() {
            return Err(Error::Detached(node));
        }
        self.ops.push(HostOp::Remove { node });
        Ok(())
    }

    fn parent(&self, node: HostId) -> Option<HostId> {
        self.node(node).ok()?.parent
    }

    fn next_sibling(&self, node: HostId) -> Option<HostId> {
        let parent = self.parent(node)?;
        let siblings = &self.node(parent).ok()?.children;
        let index = siblings.iter().position(|child| *child == node)?;
        siblings.get(index + 1).copied()
    }

    fn patch_prop(
        &mut self,
        el: HostId,
        key: &str,
        _prev: Option<&Value>,
        next: Option<&Value>,
    ) -> Result<()> {
        match PropKind::of(key) {
            PropKind::Class => self.patch_class(el, next),
            PropKind::Style => self.patch_style(el, next),
            PropKind::Listener => match event_name(key) {
                Some(event) => self.patch_listener(el, event, next),
                None => Ok(()),
            },
            PropKind::Attribute => self.patch_attr(el, key, next),
        }
    }
}

/// Invoke the listener for `event` on `node` with `arg`. The host lock is
/// released before the listener runs, so the listener may write state that
/// re-renders into the same host. Returns whether a listener was found.
pub fn dispatch(host: &Mutex<MemoryHost>, node: HostId, event: &str, arg: &Value) -> bool {
    let listener = host.lock().listener(node, event);
    match listener {
        Some(listener) => {
            listener.call(arg);
            true
        }
        None => false,
    }
}
