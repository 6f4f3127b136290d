//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a wrapped value is read,
//! we can register the current effect as a subscriber.
//!
//! # Implementation
//!
//! Each runtime owns an explicit stack of frames. Running an effect pushes
//! its frame; the returned guard pops it again. Because the previous frame is
//! still underneath, an effect that runs another effect (a parent render
//! mounting a child component, say) gets its own frame back afterwards
//! rather than an empty marker.
//!
//! An `Untracked` frame suspends tracking for the duration of a closure
//! without losing the effect underneath it.

use parking_lot::Mutex;

use super::subscriber::EffectId;

/// An entry in the reactive context stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    /// Reads are recorded against this effect.
    Effect(EffectId),
    /// Reads are not recorded.
    Untracked,
}

/// The per-runtime context stack.
#[derive(Debug, Default)]
pub struct ContextStack {
    frames: Mutex<Vec<Frame>>,
}

impl ContextStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a frame. The frame is popped when the returned guard is dropped,
    /// including during unwinding.
    pub fn enter(&self, frame: Frame) -> ContextGuard<'_> {
        self.frames.lock().push(frame);
        ContextGuard { stack: self, frame }
    }

    /// The effect reads should currently be recorded against, if any.
    pub fn current_effect(&self) -> Option<EffectId> {
        match self.frames.lock().last() {
            Some(Frame::Effect(id)) => Some(*id),
            _ => None,
        }
    }

    /// Whether `effect` has a frame anywhere on the stack.
    pub fn is_running(&self, effect: EffectId) -> bool {
        self.frames.lock().contains(&Frame::Effect(effect))
    }

    pub fn depth(&self) -> usize {
        self.frames.lock().len()
    }
}

/// Guard that pops its frame when dropped.
pub struct ContextGuard<'a> {
    stack: &'a ContextStack,
    frame: Frame,
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        let popped = self.stack.frames.lock().pop();

        // Guards drop in reverse order of creation, so anything else on top
        // means a guard escaped its scope.
        debug_assert_eq!(
            popped,
            Some(self.frame),
            "reactive context mismatch: expected {:?}",
            self.frame
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_tracks_effect() {
        let stack = ContextStack::new();
        let id = EffectId::new();

        assert!(stack.current_effect().is_none());

        {
            let _ctx = stack.enter(Frame::Effect(id));
            assert_eq!(stack.current_effect(), Some(id));
            assert!(stack.is_running(id));
        }

        assert!(stack.current_effect().is_none());
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn nested_frames_restore_previous() {
        let stack = ContextStack::new();
        let outer = EffectId::new();
        let inner = EffectId::new();

        let _outer = stack.enter(Frame::Effect(outer));
        {
            let _inner = stack.enter(Frame::Effect(inner));
            assert_eq!(stack.current_effect(), Some(inner));
            assert!(stack.is_running(outer));
        }

        // After inner context drops, outer should be current
        assert_eq!(stack.current_effect(), Some(outer));
    }

    #[test]
    fn untracked_frame_hides_effect() {
        let stack = ContextStack::new();
        let id = EffectId::new();

        let _effect = stack.enter(Frame::Effect(id));
        {
            let _paused = stack.enter(Frame::Untracked);
            assert!(stack.current_effect().is_none());
        }
        assert_eq!(stack.current_effect(), Some(id));
    }

    #[test]
    fn frame_is_popped_on_panic() {
        let stack = ContextStack::new();
        let id = EffectId::new();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ctx = stack.enter(Frame::Effect(id));
            panic!("boom");
        }));

        assert!(result.is_err());
        assert_eq!(stack.depth(), 0);
    }
}
