//! Call-stack scoped execution context.
//!
//! Engines keep their "currently active" frames in a `ContextStack`. Entering
//! a callback hands out a `Scoped` guard; a frame pushed through the guard is
//! popped when the guard drops, including during unwinding. Nothing here is
//! global or thread-local: whoever holds the guard holds the context.

use std::fmt;

/// Stack of active frames; the innermost frame is the current one.
pub struct ContextStack<T> {
    frames: Vec<T>,
}

impl<T> ContextStack<T> {
    /// Creates an empty stack.
    #[must_use]
    pub const fn new() -> Self {
        Self { frames: Vec::new() }
    }

    /// Pushes a frame that outlives any guard. Remove it with `pop` or `clear`.
    pub fn push(&mut self, frame: T) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<T> {
        self.frames.pop()
    }

    /// Drops every frame.
    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn current(&self) -> Option<&T> {
        self.frames.last()
    }

    pub fn current_mut(&mut self) -> Option<&mut T> {
        self.frames.last_mut()
    }

    /// Outermost frame.
    pub fn root(&self) -> Option<&T> {
        self.frames.first()
    }

    pub fn root_mut(&mut self) -> Option<&mut T> {
        self.frames.first_mut()
    }

    /// Number of frames on the stack.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[T] {
        &self.frames
    }

    /// Enters the existing context without pushing; the guard pops nothing.
    pub fn enter(&mut self) -> Scoped<'_, T> {
        Scoped {
            stack: self,
            owns_frame: false,
        }
    }

    /// Pushes `frame` and returns a guard that pops it on drop.
    pub fn push_scoped(&mut self, frame: T) -> Scoped<'_, T> {
        self.frames.push(frame);
        Scoped {
            stack: self,
            owns_frame: true,
        }
    }
}

impl<T> Default for ContextStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for ContextStack<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextStack")
            .field("frames", &self.frames)
            .finish()
    }
}

/// Guard over a `ContextStack` for the duration of one callback.
pub struct Scoped<'a, T> {
    stack: &'a mut ContextStack<T>,
    owns_frame: bool,
}

impl<T> Scoped<'_, T> {
    /// Pushes a nested frame, popped when the returned guard drops.
    pub fn nest(&mut self, frame: T) -> Scoped<'_, T> {
        self.stack.push_scoped(frame)
    }

    pub fn current(&self) -> Option<&T> {
        self.stack.current()
    }

    pub fn current_mut(&mut self) -> Option<&mut T> {
        self.stack.current_mut()
    }

    pub fn depth(&self) -> usize {
        self.stack.depth()
    }

    pub fn frames(&self) -> &[T] {
        self.stack.frames()
    }

    /// Returns true if this guard pops a frame when dropped.
    pub const fn owns_frame(&self) -> bool {
        self.owns_frame
    }
}

impl<T> Drop for Scoped<'_, T> {
    fn drop(&mut self) {
        if self.owns_frame {
            self.stack.frames.pop();
        }
    }
}
