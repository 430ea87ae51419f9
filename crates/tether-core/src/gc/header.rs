//! GC object header
//!
//! Every heap slot carries a header with the collector's per-object state.

/// Collector metadata stored alongside each heap slot
#[derive(Debug, Clone, Copy, Default)]
pub struct GcHeader {
    /// Mark bit for GC (true = reachable)
    marked: bool,

    /// Set once the object's finalizer has been scheduled
    finalized: bool,

    /// Bumped every time the slot is reclaimed
    generation: u32,
}

impl GcHeader {
    /// Check if this object is marked
    #[inline]
    pub fn is_marked(&self) -> bool {
        self.marked
    }

    /// Mark this object as reachable
    #[inline]
    pub fn mark(&mut self) {
        self.marked = true;
    }

    /// Unmark this object (for next GC cycle)
    #[inline]
    pub fn unmark(&mut self) {
        self.marked = false;
    }

    /// Whether the finalizer already ran or is pending
    #[inline]
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Record that the finalizer has been scheduled
    #[inline]
    pub fn set_finalized(&mut self) {
        self.finalized = true;
    }

    /// Current slot generation
    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Reset the header for the next occupant of the slot
    pub(crate) fn recycle(&mut self) {
        self.marked = false;
        self.finalized = false;
        self.generation = self.generation.wrapping_add(1);
    }
}
