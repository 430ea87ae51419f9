//! Engine configuration

use crate::defaults::{DEFAULT_GC_THRESHOLD, DEFAULT_MAX_CALL_DEPTH, DEFAULT_MAX_STACK_SIZE};

/// Options for creating a [`State`](super::State)
#[derive(Debug, Clone)]
pub struct VmOptions {
    /// Live-object count that triggers the first automatic collection
    pub gc_threshold: usize,

    /// Maximum number of value stack slots
    pub max_stack_size: usize,

    /// Maximum depth of nested native calls
    pub max_call_depth: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            gc_threshold: DEFAULT_GC_THRESHOLD,
            max_stack_size: DEFAULT_MAX_STACK_SIZE,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

impl VmOptions {
    /// Create options with a specific GC threshold
    pub fn with_gc_threshold(gc_threshold: usize) -> Self {
        Self {
            gc_threshold,
            ..Default::default()
        }
    }

    /// Create options with a specific stack limit
    pub fn with_stack_limit(max_stack_size: usize) -> Self {
        Self {
            max_stack_size,
            ..Default::default()
        }
    }

    /// Create options with a specific call depth limit
    pub fn with_call_depth(max_call_depth: usize) -> Self {
        Self {
            max_call_depth,
            ..Default::default()
        }
    }
}
