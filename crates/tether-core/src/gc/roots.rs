//! GC root tracking
//!
//! Roots are the starting points for GC traversal:
//! - Value stack slots and the closures of active frames
//! - Registry references and named registry entries
//! - The globals table
//! - A raised error value that has not been delivered yet

use crate::value::{GcRef, Value};

/// Root set for garbage collection
#[derive(Default)]
pub struct RootSet {
    /// Stack roots (values on the value stack and frame closures)
    stack_roots: Vec<GcRef>,

    /// Global roots (registry, globals, pending error)
    global_roots: Vec<GcRef>,
}

impl RootSet {
    /// Create a new root set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stack root
    pub fn add_stack_root(&mut self, value: &Value) {
        if let Some(r) = value.gc_ref() {
            self.stack_roots.push(r);
        }
    }

    /// Add a global root
    pub fn add_global_root(&mut self, value: &Value) {
        if let Some(r) = value.gc_ref() {
            self.global_roots.push(r);
        }
    }

    /// Add a heap reference as a global root
    pub fn add_global_ref(&mut self, r: GcRef) {
        self.global_roots.push(r);
    }

    /// Iterate over all roots
    pub fn iter(&self) -> impl Iterator<Item = GcRef> + '_ {
        self.stack_roots
            .iter()
            .chain(self.global_roots.iter())
            .copied()
    }

    /// Get total number of roots
    pub fn len(&self) -> usize {
        self.stack_roots.len() + self.global_roots.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
