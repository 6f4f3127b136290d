//! Watchers
//!
//! A watcher is an effect split in two: a getter that runs tracked and
//! produces a value, and a callback that runs untracked with the new and
//! previous value whenever the getter's dependencies change.
//!
//! # Flush Timing
//!
//! - `Sync`: the callback runs inside the trigger.
//! - `Pre`: the callback is queued before the next flush's jobs, so it sees
//!   state before components re-render.
//! - `Post`: the callback is queued after the next flush's jobs.
//!
//! A deep watcher reads every nested entry of its value, so a write anywhere
//! underneath fires it. Its callback runs on every trigger even when the
//! top-level value is the same wrapper.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::effect::{Effect, EffectOptions};
use super::runtime::Runtime;
use super::subscriber::TargetId;
use super::value::Value;
use super::wrapper::Reactive;
use crate::scheduler::Task;

/// When a triggered watcher's callback runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flush {
    Sync,
    #[default]
    Pre,
    Post,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    /// Run the callback once on creation, with no previous value.
    pub immediate: bool,
    /// Read the whole value tree.
    pub deep: bool,
    pub flush: Flush,
}

impl WatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    pub fn deep(mut self) -> Self {
        self.deep = true;
        self
    }

    pub fn flush(mut self, flush: Flush) -> Self {
        self.flush = flush;
        self
    }
}

type WatchCallback = Arc<dyn Fn(&Value, Option<&Value>) + Send + Sync>;

struct WatchState {
    effect: Effect,
    callback: WatchCallback,
    deep: bool,
    latest: Arc<Mutex<Value>>,
    previous: Mutex<Option<Value>>,
}

impl WatchState {
    fn job(&self) {
        if !self.effect.is_active() {
            return;
        }
        self.effect.run();
        let new = self.latest.lock().clone();
        let old = self.previous.lock().replace(new.clone());
        if self.deep || old.as_ref() != Some(&new) {
            match self.effect.runtime() {
                Some(runtime) => runtime.untracked(|| (self.callback)(&new, old.as_ref())),
                None => (self.callback)(&new, old.as_ref()),
            }
        }
    }
}

/// Handle returned by [`Runtime::watch`].
#[derive(Clone)]
pub struct WatchHandle {
    effect: Effect,
}

impl WatchHandle {
    /// Stop watching. The callback never runs again, including for jobs
    /// already queued.
    pub fn stop(&self) {
        self.effect.stop();
    }

    pub fn is_active(&self) -> bool {
        self.effect.is_active()
    }

    pub fn effect(&self) -> &Effect {
        &self.effect
    }
}

impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle")
            .field("effect", &self.effect.id())
            .field("active", &self.is_active())
            .finish()
    }
}

impl Runtime {
    /// Watch the value produced by `getter`.
    pub fn watch<G, C>(&self, getter: G, callback: C, options: WatchOptions) -> WatchHandle
    where
        G: Fn() -> Value + Send + Sync + 'static,
        C: Fn(&Value, Option<&Value>) + Send + Sync + 'static,
    {
        let latest = Arc::new(Mutex::new(Value::Null));
        let deep = options.deep;

        // The scheduler needs the state and the state needs the effect.
        let slot: Arc<Mutex<Option<Arc<WatchState>>>> = Arc::new(Mutex::new(None));
        let queued = Arc::new(AtomicBool::new(false));

        let scheduler = {
            let rt = self.clone();
            let slot = slot.clone();
            move |_: &Effect| {
                let Some(state) = slot.lock().clone() else {
                    return;
                };
                match options.flush {
                    Flush::Sync => state.job(),
                    flush => {
                        if queued.swap(true, Ordering::SeqCst) {
                            return;
                        }
                        let queued = queued.clone();
                        let task: Task = Arc::new(move || {
                            queued.store(false, Ordering::SeqCst);
                            state.job();
                        });
                        if flush == Flush::Pre {
                            rt.scheduler().queue_pre_flush(task);
                        } else {
                            rt.scheduler().queue_post_flush(task);
                        }
                    }
                }
            }
        };

        let effect = self.create_effect(
            {
                let latest = latest.clone();
                move || {
                    let value = getter();
                    if deep {
                        traverse(&value);
                    }
                    *latest.lock() = value;
                }
            },
            EffectOptions::new()
                .lazy()
                .scheduler(scheduler)
                .on_stop({
                    // Breaks the state <-> scheduler cycle.
                    let slot = slot.clone();
                    move || {
                        slot.lock().take();
                    }
                }),
        );

        let state = Arc::new(WatchState {
            effect: effect.clone(),
            callback: Arc::new(callback),
            deep,
            latest,
            previous: Mutex::new(None),
        });
        *slot.lock() = Some(state.clone());

        if options.immediate {
            state.job();
        } else {
            effect.run();
            let first = state.latest.lock().clone();
            *state.previous.lock() = Some(first);
        }
        tracing::debug!(effect = %effect.id(), ?options, "watcher created");

        WatchHandle { effect }
    }

    /// Watch every nested entry of `source`.
    pub fn watch_deep<C>(&self, source: &Reactive, callback: C, options: WatchOptions) -> WatchHandle
    where
        C: Fn(&Value, Option<&Value>) + Send + Sync + 'static,
    {
        let source = source.clone();
        self.watch(
            move || Value::Reactive(source.clone()),
            callback,
            options.deep(),
        )
    }
}

/// Read every entry of `value`, recursively, so the running effect depends
/// on all of it. Cycles are visited once.
pub fn traverse(value: &Value) {
    let mut seen = HashSet::new();
    traverse_into(value, &mut seen);
}

fn traverse_into(value: &Value, seen: &mut HashSet<TargetId>) {
    let Value::Reactive(wrapper) = value else {
        return;
    };
    if !seen.insert(wrapper.id()) {
        return;
    }
    for child in wrapper.values() {
        traverse_into(&child, seen);
    }
}
