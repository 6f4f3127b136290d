//! Patch Engine
//!
//! The renderer turns a new vnode tree into host mutations by comparing it
//! with the tree it rendered last time.
//!
//! # How Patching Works
//!
//! `patch(old, new, parent, anchor)`:
//!
//! 1. No old node: mount. Create the host node, mount its children, apply
//!    its props, insert it before `anchor`.
//!
//! 2. Old and new differ in type or key: replace. Remember where the old
//!    node sat, unmount it, mount the new one in its place.
//!
//! 3. Same type: update in place. The new vnode inherits the old host node;
//!    changed props are re-applied, removed props are cleared, and children
//!    are reconciled (see [`keyed`](super::keyed) for lists).
//!
//! After a patch the new vnode carries the host node it produced and the
//! old vnode is gone.
//!
//! # Locking
//!
//! The host is locked per operation and instance state only long enough to
//! take or put back a subtree, so render effects that run in the middle of
//! a patch can patch the same host.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::component::{Component, Instance, InstanceId};
use super::host::{HostAdapter, HostId};
use super::vnode::{Children, NodeKind, Props, VNode};
use crate::error::{Error, Result};
use crate::reactive::{EffectOptions, Key, Object, Runtime};
use crate::scheduler::Job;

pub(crate) struct RendererInner<H> {
    runtime: Runtime,
    host: Arc<Mutex<H>>,
    instances: Mutex<HashMap<InstanceId, Arc<Instance>>>,
    roots: Mutex<HashMap<HostId, VNode>>,
}

/// Renders vnode trees into a host.
///
/// `Renderer` is a handle; clones share the same instances and roots.
///
/// # Example
///
/// ```rust
/// use weft_core::render::{h, text, MemoryHost, Renderer};
/// use weft_core::Runtime;
///
/// let rt = Runtime::new();
/// let renderer = Renderer::new(&rt, MemoryHost::new());
/// let root = renderer.host().lock().create_root();
///
/// renderer.render(Some(h("p").child(text("hello"))), root).unwrap();
/// assert_eq!(renderer.host().lock().text_content(root), "hello");
/// ```
pub struct Renderer<H> {
    inner: Arc<RendererInner<H>>,
}

impl<H> Clone for Renderer<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: HostAdapter + 'static> Renderer<H> {
    pub fn new(runtime: &Runtime, host: H) -> Self {
        Self::with_shared_host(runtime, Arc::new(Mutex::new(host)))
    }

    /// Render into a host that is also held elsewhere.
    pub fn with_shared_host(runtime: &Runtime, host: Arc<Mutex<H>>) -> Self {
        Self {
            inner: Arc::new(RendererInner {
                runtime: runtime.clone(),
                host,
                instances: Mutex::new(HashMap::new()),
                roots: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    pub fn host(&self) -> &Arc<Mutex<H>> {
        &self.inner.host
    }

    fn with_host<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
        f(&mut self.inner.host.lock())
    }

    // ------------------------------------------------------------------
    // Entry points
    // ------------------------------------------------------------------

    /// Render `vnode` as the content of `container`, patching whatever was
    /// rendered there before. `None` unmounts it.
    pub fn render(&self, vnode: Option<VNode>, container: HostId) -> Result<()> {
        let old = self.inner.roots.lock().remove(&container);
        tracing::debug!(%container, mount = old.is_none(), "render root");

        match vnode {
            Some(mut vnode) => {
                let result = self.patch(old, &mut vnode, container, None);
                self.inner.roots.lock().insert(container, vnode);
                result
            }
            None => match old {
                Some(old) => self.unmount(old, true),
                None => Ok(()),
            },
        }
    }

    /// Run every queued re-render. Returns the number of jobs run.
    pub fn flush(&self) -> usize {
        self.inner.runtime.flush_jobs()
    }

    /// The host node at the root of `container`'s rendered tree.
    pub fn root(&self, container: HostId) -> Option<HostId> {
        let (el, instance) = {
            let roots = self.inner.roots.lock();
            let root = roots.get(&container)?;
            (root.el, root.instance.filter(|_| root.is_component()))
        };
        match instance {
            Some(id) => self.instance_el(id),
            None => el,
        }
    }

    /// Number of mounted component instances.
    pub fn instance_count(&self) -> usize {
        self.inner.instances.lock().len()
    }

    /// Patch `old` into `new` under `parent`. See the module docs.
    pub fn patch(
        &self,
        old: Option<VNode>,
        new: &mut VNode,
        parent: HostId,
        anchor: Option<HostId>,
    ) -> Result<()> {
        let Some(old) = old else {
            return self.mount(new, parent, anchor);
        };

        if !old.same_type(new) {
            let next = self
                .host_el(&old)
                .and_then(|el| self.with_host(|host| host.next_sibling(el)));
            tracing::trace!(old = %old.describe(), new = %new.describe(), "replace");
            self.unmount(old, true)?;
            return self.mount(new, parent, next.or(anchor));
        }

        match new.kind.clone() {
            NodeKind::Text(next) => {
                let el = old.el.ok_or_else(|| Error::Unmounted(old.describe()))?;
                new.el = Some(el);
                if let NodeKind::Text(prev) = &old.kind {
                    if *prev != next {
                        self.with_host(|host| host.set_text(el, &next))?;
                    }
                }
                Ok(())
            }
            NodeKind::Placeholder => {
                new.el = Some(old.el.ok_or_else(|| Error::Unmounted(old.describe()))?);
                Ok(())
            }
            NodeKind::Element(_) => self.patch_element(old, new),
            NodeKind::Component(_) => self.update_component(old, new),
        }
    }

    // ------------------------------------------------------------------
    // Mount
    // ------------------------------------------------------------------

    pub(crate) fn mount(&self, vnode: &mut VNode, parent: HostId, anchor: Option<HostId>) -> Result<()> {
        let el = match vnode.kind.clone() {
            NodeKind::Text(content) => self.with_host(|host| host.create_text(&content)),
            NodeKind::Placeholder => self.with_host(|host| host.create_comment("")),
            NodeKind::Element(tag) => return self.mount_element(&tag, vnode, parent, anchor),
            NodeKind::Component(component) => {
                return self.mount_component(&component, vnode, parent, anchor)
            }
        };
        vnode.el = Some(el);
        self.with_host(|host| host.insert(el, parent, anchor))
    }

    fn mount_element(
        &self,
        tag: &str,
        vnode: &mut VNode,
        parent: HostId,
        anchor: Option<HostId>,
    ) -> Result<()> {
        let el = self.with_host(|host| host.create_element(tag));
        vnode.el = Some(el);

        match &mut vnode.children {
            Children::None => {}
            Children::Text(content) => {
                let content = content.clone();
                self.with_host(|host| host.set_element_text(el, &content))?;
            }
            Children::Nodes(children) => self.mount_children(children, el, None)?,
        }
        for (key, value) in &vnode.props {
            self.with_host(|host| host.patch_prop(el, key, None, Some(value)))?;
        }
        self.with_host(|host| host.insert(el, parent, anchor))
    }

    pub(crate) fn mount_children(
        &self,
        children: &mut [VNode],
        parent: HostId,
        anchor: Option<HostId>,
    ) -> Result<()> {
        for child in children {
            self.mount(child, parent, anchor)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    fn patch_element(&self, old: VNode, new: &mut VNode) -> Result<()> {
        let el = old.el.ok_or_else(|| Error::Unmounted(old.describe()))?;
        new.el = Some(el);
        self.patch_props(el, &old.props, &new.props)?;
        self.patch_children(old.children, &mut new.children, el)
    }

    fn patch_props(&self, el: HostId, old: &Props, new: &Props) -> Result<()> {
        for (key, next) in new {
            let prev = old.get(key);
            if prev != Some(next) {
                self.with_host(|host| host.patch_prop(el, key, prev, Some(next)))?;
            }
        }
        for (key, prev) in old {
            if !new.contains_key(key) {
                self.with_host(|host| host.patch_prop(el, key, Some(prev), None))?;
            }
        }
        Ok(())
    }

    fn patch_children(&self, old: Children, new: &mut Children, el: HostId) -> Result<()> {
        match new {
            Children::Text(next) => {
                let changed = match old {
                    Children::Nodes(prev) => {
                        self.unmount_all(prev)?;
                        true
                    }
                    Children::Text(prev) => prev != *next,
                    Children::None => true,
                };
                if changed {
                    let next = next.clone();
                    self.with_host(|host| host.set_element_text(el, &next))?;
                }
                Ok(())
            }
            Children::Nodes(next) => match old {
                Children::Nodes(prev) => {
                    if has_keys(&prev) || has_keys(next) {
                        self.patch_keyed_children(prev, next, el, None)
                    } else {
                        self.patch_unkeyed_children(prev, next, el, None)
                    }
                }
                Children::Text(_) => {
                    self.with_host(|host| host.set_element_text(el, ""))?;
                    self.mount_children(next, el, None)
                }
                Children::None => self.mount_children(next, el, None),
            },
            Children::None => match old {
                Children::Nodes(prev) => self.unmount_all(prev),
                Children::Text(_) => self.with_host(|host| host.set_element_text(el, "")),
                Children::None => Ok(()),
            },
        }
    }

    // ------------------------------------------------------------------
    // Unmount
    // ------------------------------------------------------------------

    /// Tear `vnode` down. With `remove`, its host node is detached as well;
    /// without, only component instances underneath are stopped (an
    /// ancestor's removal takes the host nodes with it).
    pub(crate) fn unmount(&self, mut vnode: VNode, remove: bool) -> Result<()> {
        if let NodeKind::Component(_) = vnode.kind {
            let id = vnode
                .instance
                .ok_or_else(|| Error::Unmounted(vnode.describe()))?;
            return self.unmount_component(id, remove);
        }

        if let Children::Nodes(children) = std::mem::take(&mut vnode.children) {
            for child in children {
                self.unmount(child, false)?;
            }
        }
        if remove {
            let el = vnode.el.ok_or_else(|| Error::Unmounted(vnode.describe()))?;
            self.with_host(|host| host.remove(el))?;
        }
        Ok(())
    }

    pub(crate) fn unmount_all(&self, vnodes: Vec<VNode>) -> Result<()> {
        for vnode in vnodes {
            self.unmount(vnode, true)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Host node lookup
    // ------------------------------------------------------------------

    /// The host node `vnode` currently occupies. For a component, the root
    /// host node of its latest render.
    pub(crate) fn host_el(&self, vnode: &VNode) -> Option<HostId> {
        match vnode.instance {
            Some(id) if vnode.is_component() => self.instance_el(id),
            _ => vnode.el,
        }
    }

    fn instance_el(&self, id: InstanceId) -> Option<HostId> {
        let instance = self.inner.instances.lock().get(&id).cloned()?;
        let (el, root_instance) = {
            let state = instance.state.lock();
            (state.el, state.root_instance)
        };
        match root_instance {
            Some(child) => self.instance_el(child),
            None => el,
        }
    }

    /// Move the host node of `vnode` before `anchor`.
    pub(crate) fn move_node(&self, vnode: &VNode, parent: HostId, anchor: Option<HostId>) -> Result<()> {
        let el = self
            .host_el(vnode)
            .ok_or_else(|| Error::Unmounted(vnode.describe()))?;
        self.with_host(|host| host.insert(el, parent, anchor))
    }

    // ------------------------------------------------------------------
    // Components
    // ------------------------------------------------------------------

    fn instance(&self, id: InstanceId) -> Result<Arc<Instance>> {
        self.inner
            .instances
            .lock()
            .get(&id)
            .cloned()
            .ok_or(Error::MissingInstance(id))
    }

    fn mount_component(
        &self,
        component: &Component,
        vnode: &mut VNode,
        container: HostId,
        anchor: Option<HostId>,
    ) -> Result<()> {
        let runtime = &self.inner.runtime;
        let props = runtime.shallow_reactive(Object::record_from(
            vnode.props.iter().map(|(k, v)| (k.clone(), v.clone())),
        ));
        let instance = Arc::new(Instance::new(runtime, component, props, container, anchor));
        let id = instance.id;
        vnode.instance = Some(id);
        self.inner.instances.lock().insert(id, instance.clone());

        let options = {
            let rt = runtime.clone();
            let target = Arc::downgrade(&instance);
            EffectOptions::new().lazy().scheduler(move |_| {
                let Some(instance) = target.upgrade() else {
                    return;
                };
                let target = target.clone();
                rt.queue_job(Job::new(instance.job, instance.id.raw(), move || {
                    if let Some(instance) = target.upgrade() {
                        instance.run();
                    }
                }));
            })
        };
        let renderer = Arc::downgrade(&self.inner);
        let target = Arc::downgrade(&instance);
        let effect = runtime.create_effect(
            move || {
                let (Some(inner), Some(instance)) = (renderer.upgrade(), target.upgrade()) else {
                    return;
                };
                if let Err(err) = (Renderer { inner }).render_instance(&instance) {
                    tracing::error!(
                        instance = %instance.id,
                        component = instance.component.name(),
                        %err,
                        "render failed"
                    );
                    instance.state.lock().error = Some(err);
                }
            },
            options,
        );
        let _ = instance.effect.set(effect);

        tracing::debug!(instance = %id, component = component.name(), "mounting component");
        instance.run();
        if let Some(err) = instance.take_error() {
            return Err(err);
        }
        vnode.el = self.instance_el(id);
        Ok(())
    }

    /// Render an instance's next tree and patch it over the previous one.
    fn render_instance(&self, instance: &Instance) -> Result<()> {
        let mut next = (instance.render)();
        let (prev, container, anchor) = {
            let mut state = instance.state.lock();
            // A failure from an earlier scheduled render was already logged.
            state.error = None;
            (state.subtree.take(), state.container, state.anchor)
        };

        // The mount anchor only holds for the first render; later renders
        // replace in place.
        let result = match prev {
            None => self.patch(None, &mut next, container, anchor),
            Some(prev) => {
                let parent = self
                    .host_el(&prev)
                    .and_then(|el| self.with_host(|host| host.parent(el)))
                    .unwrap_or(container);
                self.patch(Some(prev), &mut next, parent, None)
            }
        };

        let el = self.host_el(&next);
        let root_instance = next.instance.filter(|_| next.is_component());
        let mut state = instance.state.lock();
        state.subtree = Some(next);
        state.el = el;
        state.root_instance = root_instance;
        state.mounted = true;
        result
    }

    fn update_component(&self, old: VNode, new: &mut VNode) -> Result<()> {
        let id = old
            .instance
            .ok_or_else(|| Error::Unmounted(old.describe()))?;
        new.instance = Some(id);
        let instance = self.instance(id)?;

        if self.update_props(&instance, &new.props) {
            self.inner.runtime.scheduler().invalidate(instance.job);
            tracing::trace!(instance = %id, "props changed; re-rendering child");
            instance.run();
            if let Some(err) = instance.take_error() {
                return Err(err);
            }
        }
        new.el = self.instance_el(id);
        Ok(())
    }

    /// Push the parent's props into the instance. Returns whether anything
    /// changed.
    fn update_props(&self, instance: &Instance, next: &Props) -> bool {
        let props = &instance.props;
        let mut changed = false;
        for (key, value) in next {
            changed |= props.set(key.clone(), value.clone()).is_triggered();
        }

        let stale: Vec<Key> = self
            .inner
            .runtime
            .untracked(|| props.keys())
            .into_iter()
            .filter(|key| !next.contains_key(&*key.as_field()))
            .collect();
        for key in stale {
            changed |= props.delete(key).is_triggered();
        }
        changed
    }

    fn unmount_component(&self, id: InstanceId, remove: bool) -> Result<()> {
        let instance = self
            .inner
            .instances
            .lock()
            .remove(&id)
            .ok_or(Error::MissingInstance(id))?;
        instance.stop();
        self.inner.runtime.scheduler().invalidate(instance.job);

        let subtree = {
            let mut state = instance.state.lock();
            state.mounted = false;
            state.subtree.take()
        };
        tracing::debug!(instance = %id, component = instance.component.name(), "component unmounted");
        match subtree {
            Some(subtree) => self.unmount(subtree, remove),
            None => Ok(()),
        }
    }
}

fn has_keys(children: &[VNode]) -> bool {
    children.iter().any(|child| child.key.is_some())
}

impl<H> fmt::Debug for Renderer<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Renderer")
            .field("roots", &self.inner.roots.lock().len())
            .field("instances", &self.inner.instances.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Callback;
    use crate::render::memory::{HostOp, MemoryHost};
    use crate::render::vnode::{h, placeholder, text};

    fn setup() -> (Renderer<MemoryHost>, HostId) {
        let rt = Runtime::new();
        let renderer = Renderer::new(&rt, MemoryHost::new());
        let root = renderer.host().lock().create_root();
        (renderer, root)
    }

    fn ops(renderer: &Renderer<MemoryHost>) -> Vec<HostOp> {
        renderer.host().lock().take_ops()
    }

    #[test]
    fn mount_builds_the_tree() {
        let (renderer, root) = setup();
        let tree = h("div")
            .prop("id", "app")
            .child(h("span").text("a"))
            .child(text("b"));

        renderer.render(Some(tree), root).unwrap();
        assert_eq!(
            renderer.host().lock().serialize(root),
            "<root><div id=\"app\"><span>a</span>b</div></root>"
        );
    }

    #[test]
    fn identical_render_is_a_noop() {
        let (renderer, root) = setup();
        let tree = || h("div").class("x").child(h("p").text("a"));

        renderer.render(Some(tree()), root).unwrap();
        ops(&renderer);
        renderer.render(Some(tree()), root).unwrap();
        assert!(ops(&renderer).is_empty());
    }

    #[test]
    fn type_change_replaces_in_place() {
        let (renderer, root) = setup();
        renderer
            .render(Some(h("div").children([Some(h("a")), Some(h("b")), Some(h("c"))])), root)
            .unwrap();
        let before = renderer.host().lock().children(renderer.root(root).unwrap());

        renderer
            .render(Some(h("div").children([Some(h("a")), Some(h("x")), Some(h("c"))])), root)
            .unwrap();
        let host = renderer.host().lock();
        let after = host.children(renderer.root(root).unwrap());
        assert_eq!(after[0], before[0]);
        assert_ne!(after[1], before[1]);
        assert_eq!(after[2], before[2]);
        assert_eq!(host.tag(after[1]), Some("x"));
    }

    #[test]
    fn props_are_diffed() {
        let (renderer, root) = setup();
        renderer
            .render(Some(h("div").prop("id", "a").prop("title", "t")), root)
            .unwrap();
        ops(&renderer);

        renderer
            .render(Some(h("div").prop("id", "b")), root)
            .unwrap();
        let el = renderer.root(root).unwrap();
        assert_eq!(
            ops(&renderer),
            vec![
                HostOp::SetAttr { node: el, name: "id".into(), value: "b".into() },
                HostOp::RemoveAttr { node: el, name: "title".into() },
            ]
        );
    }

    #[test]
    fn earlier_render_failure_does_not_fail_a_later_update() {
        let (renderer, root) = setup();
        let label = Component::new("Label", |ctx| {
            let props = ctx.props().clone();
            Box::new(move || h("span").text(props.get("label").display()))
        });

        renderer
            .render(Some(VNode::component(&label).prop("label", "one")), root)
            .unwrap();
        let instances: Vec<_> = renderer.inner.instances.lock().values().cloned().collect();
        for instance in instances {
            instance.state.lock().error = Some(Error::Unmounted("<span>".to_string()));
        }

        renderer
            .render(Some(VNode::component(&label).prop("label", "two")), root)
            .unwrap();
        assert_eq!(renderer.host().lock().text_content(root), "two");
    }

    #[test]
    fn same_listener_is_not_repatched() {
        let (renderer, root) = setup();
        let click = Callback::new(|_| {});
        renderer
            .render(Some(h("button").on("click", click.clone())), root)
            .unwrap();
        ops(&renderer);

        renderer
            .render(Some(h("button").on("click", click)), root)
            .unwrap();
        assert!(ops(&renderer).is_empty());
    }

    #[test]
    fn text_children_switch_with_nodes() {
        let (renderer, root) = setup();
        renderer.render(Some(h("p").text("plain")), root).unwrap();
        renderer
            .render(Some(h("p").child(h("b").text("bold"))), root)
            .unwrap();
        let el = renderer.root(root).unwrap();
        assert_eq!(renderer.host().lock().serialize(el), "<p><b>bold</b></p>");

        renderer.render(Some(h("p").text("again")), root).unwrap();
        assert_eq!(renderer.host().lock().serialize(el), "<p>again</p>");
    }

    #[test]
    fn absent_slots_keep_sibling_positions() {
        let (renderer, root) = setup();
        renderer
            .render(Some(h("div").children([None, Some(h("b"))])), root)
            .unwrap();
        let el = renderer.root(root).unwrap();
        let b = renderer.host().lock().children(el)[1];
        ops(&renderer);

        renderer
            .render(Some(h("div").children([Some(h("a")), Some(h("b"))])), root)
            .unwrap();
        let host = renderer.host().lock();
        assert_eq!(host.children(el)[1], b);
        assert_eq!(host.serialize(el), "<div><a></a><b></b></div>");
        drop(host);
        let ops = ops(&renderer);
        assert_eq!(ops.iter().filter(|op| op.is_remove()).count(), 1);
        assert_eq!(ops.iter().filter(|op| op.is_create()).count(), 1);
    }

    #[test]
    fn placeholder_renders_as_comment() {
        let (renderer, root) = setup();
        renderer
            .render(Some(h("div").child(placeholder())), root)
            .unwrap();
        assert_eq!(
            renderer.host().lock().serialize(root),
            "<root><div><!----></div></root>"
        );
    }

    #[test]
    fn render_none_unmounts() {
        let (renderer, root) = setup();
        renderer.render(Some(h("div")), root).unwrap();
        renderer.render(None, root).unwrap();
        assert!(renderer.host().lock().children(root).is_empty());
        assert_eq!(renderer.root(root), None);
    }

    #[test]
    fn patching_an_unmounted_vnode_is_an_error() {
        let (renderer, root) = setup();
        let mut next = h("div");
        let err = renderer.patch(Some(h("div")), &mut next, root, None).unwrap_err();
        assert_eq!(err, Error::Unmounted("<div>".to_string()));
    }
}
