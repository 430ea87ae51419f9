//! Slot arena holding every collected object
//!
//! Objects are addressed by [`GcRef`] (slot index + generation). Freed slots go
//! on a free list and are reused with a bumped generation, so a stale reference
//! resolves to `None` instead of aliasing a newer object.

use super::header::GcHeader;
use crate::object::{Function, Object, Table, UserData};
use crate::value::GcRef;

struct Slot {
    header: GcHeader,
    object: Option<Object>,
}

/// Arena of collected objects
#[derive(Default)]
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    total_allocations: usize,
}

impl Heap {
    /// Create an empty heap
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object and return its reference
    pub fn allocate(&mut self, object: Object) -> GcRef {
        self.live += 1;
        self.total_allocations += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.object = Some(object);
            return GcRef::new(index, slot.header.generation());
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            header: GcHeader::default(),
            object: Some(object),
        });
        GcRef::new(index, 0)
    }

    fn slot(&self, r: GcRef) -> Option<&Slot> {
        self.slots
            .get(r.index as usize)
            .filter(|s| s.header.generation() == r.generation && s.object.is_some())
    }

    fn slot_mut(&mut self, r: GcRef) -> Option<&mut Slot> {
        self.slots
            .get_mut(r.index as usize)
            .filter(|s| s.header.generation() == r.generation && s.object.is_some())
    }

    /// Resolve a reference
    pub fn get(&self, r: GcRef) -> Option<&Object> {
        self.slot(r).and_then(|s| s.object.as_ref())
    }

    /// Resolve a reference mutably
    pub fn get_mut(&mut self, r: GcRef) -> Option<&mut Object> {
        self.slot_mut(r).and_then(|s| s.object.as_mut())
    }

    /// Resolve a table reference
    pub fn table(&self, r: GcRef) -> Option<&Table> {
        match self.get(r) {
            Some(Object::Table(t)) => Some(t),
            _ => None,
        }
    }

    /// Resolve a table reference mutably
    pub fn table_mut(&mut self, r: GcRef) -> Option<&mut Table> {
        match self.get_mut(r) {
            Some(Object::Table(t)) => Some(t),
            _ => None,
        }
    }

    /// Resolve a function reference
    pub fn function(&self, r: GcRef) -> Option<&Function> {
        match self.get(r) {
            Some(Object::Function(f)) => Some(f),
            _ => None,
        }
    }

    /// Resolve a userdata reference
    pub fn userdata(&self, r: GcRef) -> Option<&UserData> {
        match self.get(r) {
            Some(Object::UserData(u)) => Some(u),
            _ => None,
        }
    }

    /// Resolve a userdata reference mutably
    pub fn userdata_mut(&mut self, r: GcRef) -> Option<&mut UserData> {
        match self.get_mut(r) {
            Some(Object::UserData(u)) => Some(u),
            _ => None,
        }
    }

    /// Header of a live object
    pub fn header(&self, r: GcRef) -> Option<&GcHeader> {
        self.slot(r).map(|s| &s.header)
    }

    /// Mutable header of a live object
    pub fn header_mut(&mut self, r: GcRef) -> Option<&mut GcHeader> {
        self.slot_mut(r).map(|s| &mut s.header)
    }

    /// Whether the reference still resolves and is marked
    pub fn is_marked(&self, r: GcRef) -> bool {
        self.header(r).map_or(false, GcHeader::is_marked)
    }

    /// References to every live object
    pub fn refs(&self) -> Vec<GcRef> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.object.is_some())
            .map(|(i, s)| GcRef::new(i as u32, s.header.generation()))
            .collect()
    }

    /// Clear all mark bits
    pub fn unmark_all(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.header.unmark();
        }
    }

    /// Remove an object from the heap, returning it to the caller to drop
    pub fn free(&mut self, r: GcRef) -> Option<Object> {
        let slot = self.slot_mut(r)?;
        let object = slot.object.take();
        slot.header.recycle();
        self.free.push(r.index);
        self.live -= 1;
        object
    }

    /// Remove every object, returning them to the caller to drop
    pub fn drain(&mut self) -> Vec<Object> {
        self.live = 0;
        self.free.clear();
        self.slots.drain(..).filter_map(|s| s.object).collect()
    }

    /// Number of live objects
    pub fn allocation_count(&self) -> usize {
        self.live
    }

    /// Number of allocations since creation
    pub fn total_allocations(&self) -> usize {
        self.total_allocations
    }
}
