//! Value stack and call frame management
//!
//! # Architecture
//!
//! A single value stack is shared by every active native call. Each call owns
//! a window of it, starting at its frame's base:
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │ result / scratch values (top)       │  ← len()
//! │ arg₂                                │
//! │ arg₁                                │  ← frame.base (index 1)
//! ├─────────────────────────────────────┤
//! │ callee function                     │
//! │ caller's values                     │
//! │   ...                               │
//! └─────────────────────────────────────┘
//! ```
//!
//! Positive indices are 1-based from the frame base, negative indices count
//! down from the top. The host sees a root frame with base 0.

use crate::defaults::DEFAULT_MAX_STACK_SIZE;
use crate::value::{GcRef, Value};
use crate::{VmError, VmResult};

/// Activation record of one native call
#[derive(Debug, Clone, Copy)]
pub struct CallFrame {
    /// Function being executed (None for the host root frame)
    pub function: Option<GcRef>,

    /// Absolute slot of the first argument
    pub base: usize,
}

impl CallFrame {
    /// Create a new call frame
    pub fn new(function: Option<GcRef>, base: usize) -> Self {
        Self { function, base }
    }
}

/// Value stack plus call frames
pub struct Stack {
    /// Stack slots
    slots: Vec<Value>,

    /// Call frames; the first entry is the host root frame
    frames: Vec<CallFrame>,

    /// Maximum stack size (in slots)
    max_size: usize,
}

impl Stack {
    /// Create a new stack with default size
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_STACK_SIZE)
    }

    /// Create a stack with a specific maximum size
    pub fn with_capacity(max_size: usize) -> Self {
        let mut frames = Vec::with_capacity(32);
        frames.push(CallFrame::new(None, 0));
        Self {
            slots: Vec::with_capacity(256),
            frames,
            max_size,
        }
    }

    // ========================================================================
    // Slot Operations
    // ========================================================================

    /// Push a value onto the stack
    #[inline]
    pub fn push(&mut self, value: Value) {
        self.slots.push(value);
    }

    /// Pop a value from the current frame
    pub fn pop(&mut self) -> VmResult<Value> {
        if self.slots.len() <= self.base() {
            return Err(VmError::StackUnderflow);
        }
        self.slots.pop().ok_or(VmError::StackUnderflow)
    }

    /// Absolute top of the stack
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the stack holds no values at all
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of values in the current frame
    #[inline]
    pub fn frame_len(&self) -> usize {
        self.slots.len() - self.base()
    }

    /// Check that `extra` more slots fit under the limit
    pub fn check(&self, extra: usize) -> VmResult<()> {
        if self.slots.len() + extra > self.max_size {
            return Err(VmError::StackOverflow);
        }
        Ok(())
    }

    /// Value at an absolute slot
    #[inline]
    pub fn get(&self, slot: usize) -> Option<&Value> {
        self.slots.get(slot)
    }

    /// Overwrite an absolute slot
    pub fn set(&mut self, slot: usize, value: Value) {
        if let Some(s) = self.slots.get_mut(slot) {
            *s = value;
        }
    }

    /// Insert at an absolute slot, shifting values above it up
    pub fn insert(&mut self, slot: usize, value: Value) {
        self.slots.insert(slot.min(self.slots.len()), value);
    }

    /// Remove an absolute slot, shifting values above it down
    pub fn remove(&mut self, slot: usize) -> Option<Value> {
        if slot < self.slots.len() {
            Some(self.slots.remove(slot))
        } else {
            None
        }
    }

    /// Shrink or grow (with nils) to an absolute top
    pub fn resize(&mut self, top: usize) {
        self.slots.resize(top, Value::Nil);
    }

    /// Remove and return all values from an absolute slot to the top
    pub fn split_off(&mut self, slot: usize) -> Vec<Value> {
        self.slots.split_off(slot.min(self.slots.len()))
    }

    /// All live slots
    pub fn values(&self) -> &[Value] {
        &self.slots
    }

    // ========================================================================
    // Index Translation
    // ========================================================================

    /// Translate a frame-relative index into an absolute slot
    pub fn resolve(&self, index: i32) -> Option<usize> {
        let base = self.base();
        let top = self.slots.len();
        if index > 0 {
            let slot = base + index as usize - 1;
            (slot < top).then_some(slot)
        } else if index < 0 {
            let depth = index.unsigned_abs() as usize;
            (depth <= top - base).then(|| top - depth)
        } else {
            None
        }
    }

    /// Convert a frame-relative index into a positive one
    pub fn abs_index(&self, index: i32) -> i32 {
        if index < 0 {
            self.frame_len() as i32 + index + 1
        } else {
            index
        }
    }

    // ========================================================================
    // Call Frame Operations
    // ========================================================================

    /// Push a new call frame
    pub fn push_frame(&mut self, frame: CallFrame) {
        self.frames.push(frame);
    }

    /// Pop the current call frame; the root frame is never popped
    pub fn pop_frame(&mut self) -> Option<CallFrame> {
        if self.frames.len() > 1 {
            self.frames.pop()
        } else {
            None
        }
    }

    /// Get the current call frame
    #[inline]
    pub fn current_frame(&self) -> &CallFrame {
        // The root frame is pushed at construction and never popped.
        &self.frames[self.frames.len() - 1]
    }

    /// Base slot of the current frame
    #[inline]
    pub fn base(&self) -> usize {
        self.current_frame().base
    }

    /// Number of native calls in progress
    #[inline]
    pub fn depth(&self) -> usize {
        self.frames.len() - 1
    }

    /// Drop frames above a saved depth
    pub fn unwind_to(&mut self, depth: usize) {
        self.frames.truncate(depth + 1);
    }

    /// All call frames
    pub fn frames(&self) -> &[CallFrame] {
        &self.frames
    }

    /// Get stack statistics
    pub fn stats(&self) -> StackStats {
        StackStats {
            size: self.slots.len(),
            max_size: self.max_size,
            frame_count: self.depth(),
        }
    }
}

impl Default for Stack {
    fn default() -> Self {
        Self::new()
    }
}

/// Stack statistics
#[derive(Debug, Clone, Copy)]
pub struct StackStats {
    /// Current number of slots in use
    pub size: usize,
    /// Maximum number of slots
    pub max_size: usize,
    /// Number of active native calls
    pub frame_count: usize,
}
