//! Virtual nodes.
//!
//! A [`VNode`] describes one node of a render output. Trees are built fresh
//! on every render with the [`h`], [`text`] and [`placeholder`] builders and
//! handed to the renderer, which fills in the host back-reference (`el`)
//! while patching. The previous tree is kept only until the next patch of
//! the same position completes.
//!
//! ```rust
//! use weft_core::render::{h, text};
//!
//! let list = h("ul").children([
//!     Some(h("li").key(1).child(text("one"))),
//!     None,
//!     Some(h("li").key(2).child(text("two"))),
//! ]);
//! assert_eq!(list.child_nodes().len(), 3);
//! ```

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use super::component::{Component, InstanceId};
use super::host::HostId;
use crate::reactive::{Callback, Key, Value};

/// Props of an element or component, in declaration order.
pub type Props = IndexMap<Arc<str>, Value>;

/// What a vnode is.
#[derive(Clone)]
pub enum NodeKind {
    Element(Arc<str>),
    Text(Arc<str>),
    /// Stands in for an absent child so sibling positions stay stable.
    Placeholder,
    Component(Component),
}

impl NodeKind {
    fn same_type(&self, other: &NodeKind) -> bool {
        match (self, other) {
            (NodeKind::Element(a), NodeKind::Element(b)) => a == b,
            (NodeKind::Text(_), NodeKind::Text(_)) => true,
            (NodeKind::Placeholder, NodeKind::Placeholder) => true,
            (NodeKind::Component(a), NodeKind::Component(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Element(tag) => write!(f, "Element({tag})"),
            NodeKind::Text(text) => write!(f, "Text({text:?})"),
            NodeKind::Placeholder => f.write_str("Placeholder"),
            NodeKind::Component(c) => write!(f, "Component({})", c.name()),
        }
    }
}

/// Children of an element.
#[derive(Debug, Clone, Default)]
pub enum Children {
    #[default]
    None,
    /// The element's whole content is one run of text.
    Text(Arc<str>),
    Nodes(Vec<VNode>),
}

/// How a prop is applied to a host element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropKind {
    Class,
    Style,
    /// `on<Event>`.
    Listener,
    Attribute,
}

impl PropKind {
    pub fn of(key: &str) -> Self {
        match key {
            "class" => PropKind::Class,
            "style" => PropKind::Style,
            _ if is_listener(key) => PropKind::Listener,
            _ => PropKind::Attribute,
        }
    }
}

fn is_listener(key: &str) -> bool {
    key.strip_prefix("on")
        .and_then(|rest| rest.chars().next())
        .is_some_and(char::is_uppercase)
}

/// The event name of an `on<Event>` prop: `onClick` is `click`.
pub fn event_name(key: &str) -> Option<String> {
    if !is_listener(key) {
        return None;
    }
    let rest = &key[2..];
    let mut chars = rest.chars();
    let first = chars.next()?;
    Some(first.to_lowercase().chain(chars).collect())
}

/// The prop key for an event name: `click` is `onClick`.
pub fn listener_key(event: &str) -> String {
    let mut chars = event.chars();
    match chars.next() {
        Some(first) => format!("on{}{}", first.to_uppercase(), chars.as_str()),
        None => "on".to_string(),
    }
}

/// A node of a render output.
#[derive(Debug, Clone)]
pub struct VNode {
    pub kind: NodeKind,
    pub key: Option<Key>,
    pub props: Props,
    pub children: Children,
    /// The host node this vnode produced. Set by the renderer.
    pub el: Option<HostId>,
    /// The component instance this vnode mounted. Set by the renderer.
    pub instance: Option<InstanceId>,
}

/// An element vnode.
pub fn h(tag: &str) -> VNode {
    VNode::new(NodeKind::Element(Arc::from(tag)))
}

/// A text vnode.
pub fn text(content: impl Into<String>) -> VNode {
    VNode::new(NodeKind::Text(Arc::from(content.into())))
}

/// An empty placeholder.
pub fn placeholder() -> VNode {
    VNode::new(NodeKind::Placeholder)
}

impl VNode {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            key: None,
            props: Props::new(),
            children: Children::None,
            el: None,
            instance: None,
        }
    }

    /// A vnode that mounts `component`.
    pub fn component(component: &Component) -> Self {
        Self::new(NodeKind::Component(component.clone()))
    }

    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn prop(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.props.insert(Arc::from(key), value.into());
        self
    }

    pub fn class(self, class: impl Into<Value>) -> Self {
        self.prop("class", class)
    }

    pub fn style(self, style: impl Into<Value>) -> Self {
        self.prop("style", style)
    }

    /// Attach a listener for `event`.
    pub fn on(self, event: &str, callback: Callback) -> Self {
        let key = listener_key(event);
        self.prop(&key, callback)
    }

    /// Set the element's content to a single run of text.
    pub fn text(mut self, content: impl Into<String>) -> Self {
        self.children = Children::Text(Arc::from(content.into()));
        self
    }

    /// Append a child slot. `None` becomes a placeholder.
    pub fn child(mut self, child: impl Into<Option<VNode>>) -> Self {
        let node = child.into().unwrap_or_else(placeholder);
        match &mut self.children {
            Children::Nodes(nodes) => nodes.push(node),
            _ => self.children = Children::Nodes(vec![node]),
        }
        self
    }

    /// Append child slots. `None` entries become placeholders.
    pub fn children<I, C>(self, children: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Option<VNode>>,
    {
        children.into_iter().fold(self, |node, child| node.child(child))
    }

    /// Same type and same key: the renderer patches one into the other
    /// instead of replacing.
    pub fn same_type(&self, other: &VNode) -> bool {
        self.key == other.key && self.kind.same_type(&other.kind)
    }

    pub fn is_component(&self) -> bool {
        matches!(self.kind, NodeKind::Component(_))
    }

    /// The child vnodes, empty unless the children are nodes.
    pub fn child_nodes(&self) -> &[VNode] {
        match &self.children {
            Children::Nodes(nodes) => nodes,
            _ => &[],
        }
    }

    /// Short description for errors and logs.
    pub fn describe(&self) -> String {
        let base = match &self.kind {
            NodeKind::Element(tag) => format!("<{tag}>"),
            NodeKind::Text(_) => "#text".to_string(),
            NodeKind::Placeholder => "#placeholder".to_string(),
            NodeKind::Component(c) => format!("<{}/>", c.name()),
        };
        match &self.key {
            Some(key) => format!("{base} key={key}"),
            None => base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prop_classification() {
        assert_eq!(PropKind::of("class"), PropKind::Class);
        assert_eq!(PropKind::of("style"), PropKind::Style);
        assert_eq!(PropKind::of("onClick"), PropKind::Listener);
        assert_eq!(PropKind::of("one"), PropKind::Attribute);
        assert_eq!(PropKind::of("on"), PropKind::Attribute);
        assert_eq!(PropKind::of("id"), PropKind::Attribute);
    }

    #[test]
    fn event_names_round_trip() {
        assert_eq!(event_name("onClick").as_deref(), Some("click"));
        assert_eq!(event_name("onMouseDown").as_deref(), Some("mouseDown"));
        assert_eq!(event_name("online"), None);
        assert_eq!(listener_key("click"), "onClick");
    }

    #[test]
    fn absent_children_become_placeholders() {
        let node = h("div").children([Some(text("a")), None]);
        let kinds: Vec<_> = node
            .child_nodes()
            .iter()
            .map(|c| matches!(c.kind, NodeKind::Placeholder))
            .collect();
        assert_eq!(kinds, vec![false, true]);
    }

    #[test]
    fn same_type_requires_matching_key() {
        assert!(h("li").key(1).same_type(&h("li").key(1)));
        assert!(!h("li").key(1).same_type(&h("li").key(2)));
        assert!(!h("li").same_type(&h("p")));
        assert!(text("a").same_type(&text("b")));
    }
}
