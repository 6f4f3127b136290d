//! Components
//!
//! A [`Component`] is a setup function. Setup runs once per mounted
//! instance, receives a [`SetupContext`] and returns the render closure for
//! that instance. The closure is bound to a render effect: every time it
//! runs it returns one vnode tree, and it re-runs whenever anything it read
//! on the previous run changes.
//!
//! # Scheduling
//!
//! Render effects never run inside the write that invalidated them. They
//! queue a job keyed by the instance, ordered by instance id, so any number
//! of writes before a flush produce one re-render and parents re-render
//! before their children.
//!
//! When a parent re-render passes changed props to a child, the child
//! re-renders right away as part of the parent's patch, and its queued job
//! (if any) is dropped.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use super::host::HostId;
use super::vnode::VNode;
use crate::error::Error;
use crate::reactive::{Effect, Reactive, Runtime};
use crate::scheduler::JobId;

/// The render closure returned by a component's setup.
pub type RenderFn = Box<dyn Fn() -> VNode + Send + Sync>;

type SetupFn = Box<dyn Fn(&SetupContext) -> RenderFn + Send + Sync>;

struct ComponentDef {
    name: Arc<str>,
    setup: SetupFn,
}

/// A component definition. Cloning shares the definition; two component
/// vnodes are the same type when they point at the same definition.
#[derive(Clone)]
pub struct Component(Arc<ComponentDef>);

impl Component {
    pub fn new<F>(name: &str, setup: F) -> Self
    where
        F: Fn(&SetupContext) -> RenderFn + Send + Sync + 'static,
    {
        Self(Arc::new(ComponentDef {
            name: Arc::from(name),
            setup: Box::new(setup),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn ptr_eq(&self, other: &Component) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn setup(&self, ctx: &SetupContext) -> RenderFn {
        (self.0.setup)(ctx)
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Component").field(&self.0.name).finish()
    }
}

/// What setup gets to work with.
pub struct SetupContext {
    runtime: Runtime,
    props: Reactive,
    instance: InstanceId,
}

impl SetupContext {
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// The instance's props. Shallow: reads are tracked, values come back
    /// as the parent passed them.
    pub fn props(&self) -> &Reactive {
        &self.props
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }
}

/// Unique identifier for a mounted component instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "i{}", self.0)
    }
}

pub(crate) struct InstanceState {
    /// The last rendered tree. Taken out while it is being patched.
    pub(crate) subtree: Option<VNode>,
    pub(crate) container: HostId,
    pub(crate) anchor: Option<HostId>,
    /// Root host node of the subtree, kept current across re-renders.
    pub(crate) el: Option<HostId>,
    /// Set when the subtree root is itself a component.
    pub(crate) root_instance: Option<InstanceId>,
    pub(crate) mounted: bool,
    /// Failure of the latest render, for whoever started it.
    pub(crate) error: Option<Error>,
}

/// A mounted component.
pub(crate) struct Instance {
    pub(crate) id: InstanceId,
    pub(crate) component: Component,
    pub(crate) props: Reactive,
    pub(crate) render: RenderFn,
    pub(crate) effect: OnceLock<Effect>,
    pub(crate) job: JobId,
    pub(crate) state: Mutex<InstanceState>,
}

impl Instance {
    pub(crate) fn new(
        runtime: &Runtime,
        component: &Component,
        props: Reactive,
        container: HostId,
        anchor: Option<HostId>,
    ) -> Self {
        let id = InstanceId::new();
        let ctx = SetupContext {
            runtime: runtime.clone(),
            props: props.clone(),
            instance: id,
        };
        // Setup runs once; nothing it reads belongs to any render effect.
        let render = runtime.untracked(|| component.setup(&ctx));

        Self {
            id,
            component: component.clone(),
            props,
            render,
            effect: OnceLock::new(),
            job: JobId::new(),
            state: Mutex::new(InstanceState {
                subtree: None,
                container,
                anchor,
                el: None,
                root_instance: None,
                mounted: false,
                error: None,
            }),
        }
    }

    pub(crate) fn take_error(&self) -> Option<Error> {
        self.state.lock().error.take()
    }

    pub(crate) fn is_mounted(&self) -> bool {
        self.state.lock().mounted
    }

    pub(crate) fn run(&self) {
        if let Some(effect) = self.effect.get() {
            effect.run();
        }
    }

    pub(crate) fn stop(&self) {
        if let Some(effect) = self.effect.get() {
            effect.stop();
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("component", &self.component.name())
            .field("mounted", &self.is_mounted())
            .finish()
    }
}
