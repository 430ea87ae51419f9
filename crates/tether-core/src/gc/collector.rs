//! Mark-sweep garbage collector
//!
//! A cycle runs in four steps:
//! 1. Mark everything reachable from the root set. Weak parts of weak tables
//!    are not traversed.
//! 2. Clear weak-table entries whose weak part refers to an unmarked object.
//! 3. Resurrect unmarked objects that have a `__gc` metamethod and were never
//!    finalized, and hand them back to the caller for finalization.
//! 4. Free the remaining unmarked objects.
//!
//! Freed objects are returned rather than dropped so the engine can drop them
//! after releasing its internal borrow.

use super::heap::Heap;
use super::roots::RootSet;
use crate::defaults::DEFAULT_GC_THRESHOLD;
use crate::object::{Object, WeakMode};
use crate::value::{GcRef, Value};
use std::time::{Duration, Instant};

/// Garbage collector statistics
#[derive(Debug, Clone, Default)]
pub struct GcStats {
    /// Total number of collections
    pub collections: usize,

    /// Total objects freed
    pub objects_freed: usize,

    /// Total finalizers scheduled
    pub finalizers_scheduled: usize,

    /// Total pause time across all collections
    pub total_pause_time: Duration,

    /// Last collection duration
    pub last_pause_time: Duration,

    /// Objects marked in last collection
    pub last_marked_count: usize,

    /// Objects freed in last collection
    pub last_freed_count: usize,

    /// Live objects after last collection
    pub live_objects: usize,
}

impl GcStats {
    fn update(&mut self, pause_time: Duration, marked: usize, freed: usize, live_objects: usize) {
        self.collections += 1;
        self.objects_freed += freed;
        self.total_pause_time += pause_time;
        self.last_pause_time = pause_time;
        self.last_marked_count = marked;
        self.last_freed_count = freed;
        self.live_objects = live_objects;
    }
}

/// Heap statistics
#[derive(Debug, Clone)]
pub struct HeapStats {
    /// Number of live objects
    pub allocation_count: usize,

    /// Number of allocations since the engine was created
    pub total_allocations: usize,

    /// Live object count that triggers the next automatic collection
    pub threshold: usize,
}

/// Object scheduled for finalization: the object and its `__gc` handler
pub struct Finalization {
    /// The resurrected object
    pub object: Value,
    /// The handler to call with the object as its only argument
    pub handler: Value,
}

/// Outcome of one collection cycle
#[derive(Default)]
pub struct Collection {
    /// Objects removed from the heap, to be dropped by the caller
    pub freed: Vec<Object>,
    /// Objects whose finalizers must run
    pub finalize: Vec<Finalization>,
}

/// Mark-sweep garbage collector
pub struct GarbageCollector {
    /// Live-object count that triggers automatic collection
    threshold: usize,

    /// Lower bound for the adaptive threshold
    min_threshold: usize,

    /// Statistics
    stats: GcStats,
}

impl GarbageCollector {
    /// Create a collector with an initial threshold
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            min_threshold: threshold,
            stats: GcStats::default(),
        }
    }

    /// Set GC threshold
    pub fn set_threshold(&mut self, objects: usize) {
        self.threshold = objects;
        self.min_threshold = objects;
    }

    /// Check if we should collect
    pub fn should_collect(&self, heap: &Heap) -> bool {
        heap.allocation_count() >= self.threshold
    }

    /// Run one full collection cycle
    pub fn collect(&mut self, heap: &mut Heap, roots: &RootSet) -> Collection {
        let start = Instant::now();

        heap.unmark_all();
        let mut weak_tables = Vec::new();
        let mut marked = mark(heap, roots.iter().collect(), &mut weak_tables);

        clear_weak_entries(heap, &weak_tables);

        let finalize = resurrect_finalizable(heap);
        if !finalize.is_empty() {
            let revived = finalize.iter().filter_map(|f| f.object.gc_ref()).collect();
            marked += mark(heap, revived, &mut Vec::new());
        }

        let freed = sweep(heap);

        let live = heap.allocation_count();
        self.stats.finalizers_scheduled += finalize.len();
        self.stats.update(start.elapsed(), marked, freed.len(), live);

        // Adjust threshold (grow by 2x current usage)
        self.threshold = (live * 2).max(self.min_threshold);

        tracing::debug!(
            target: "tether::gc",
            marked,
            freed = freed.len(),
            finalizers = finalize.len(),
            live,
            "collection finished"
        );

        Collection { freed, finalize }
    }

    /// Get GC statistics
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// Get heap statistics
    pub fn heap_stats(&self, heap: &Heap) -> HeapStats {
        HeapStats {
            allocation_count: heap.allocation_count(),
            total_allocations: heap.total_allocations(),
            threshold: self.threshold,
        }
    }
}

impl Default for GarbageCollector {
    fn default() -> Self {
        Self::new(DEFAULT_GC_THRESHOLD)
    }
}

/// Weak mode of a table, read from its metatable's `__mode` field
pub(crate) fn weak_mode(heap: &Heap, table: GcRef) -> WeakMode {
    let mode = heap
        .table(table)
        .and_then(|t| t.metatable)
        .and_then(|mt| heap.table(mt))
        .map(|mt| mt.get_str("__mode"));
    match mode {
        Some(Value::String(s)) => WeakMode::parse(&s),
        _ => WeakMode::default(),
    }
}

/// Mark phase: returns the number of newly marked objects
fn mark(heap: &mut Heap, mut worklist: Vec<GcRef>, weak_tables: &mut Vec<(GcRef, WeakMode)>) -> usize {
    let mut marked = 0;
    let mut children = Vec::new();

    while let Some(r) = worklist.pop() {
        match heap.header_mut(r) {
            Some(header) if !header.is_marked() => header.mark(),
            _ => continue,
        }
        marked += 1;

        let mode = weak_mode(heap, r);
        if mode.is_weak() {
            weak_tables.push((r, mode));
        }

        children.clear();
        match heap.get(r) {
            Some(Object::Table(table)) => {
                children.extend(table.metatable);
                for (key, value) in table.entries() {
                    if !mode.keys {
                        children.extend(key.and_then(|k| k.gc_ref()));
                    }
                    if !mode.values {
                        children.extend(value.gc_ref());
                    }
                }
            }
            Some(Object::Function(function)) => {
                children.extend(function.upvalues.iter().filter_map(Value::gc_ref));
            }
            Some(Object::UserData(userdata)) => {
                children.extend(userdata.metatable);
                children.extend(userdata.user_value.gc_ref());
            }
            None => {}
        }
        worklist.extend(children.iter().copied().filter(|c| !heap.is_marked(*c)));
    }

    marked
}

fn clear_weak_entries(heap: &mut Heap, weak_tables: &[(GcRef, WeakMode)]) {
    for &(r, mode) in weak_tables {
        let dead: Vec<GcRef> = match heap.table(r) {
            Some(table) => table
                .entries()
                .flat_map(|(key, value)| {
                    let key = key.and_then(|k| k.gc_ref()).filter(|_| mode.keys);
                    let value = value.gc_ref().filter(|_| mode.values);
                    key.into_iter().chain(value)
                })
                .filter(|c| !heap.is_marked(*c))
                .collect(),
            None => continue,
        };
        if dead.is_empty() {
            continue;
        }
        if let Some(table) = heap.table_mut(r) {
            table.retain_live(mode, |v| v.gc_ref().map_or(false, |c| dead.contains(&c)));
        }
    }
}

fn resurrect_finalizable(heap: &mut Heap) -> Vec<Finalization> {
    let mut finalize = Vec::new();
    for r in heap.refs() {
        let header = match heap.header(r) {
            Some(h) => *h,
            None => continue,
        };
        if header.is_marked() || header.is_finalized() {
            continue;
        }
        let (object, metatable) = match heap.get(r) {
            Some(Object::Table(t)) => (Value::Table(r), t.metatable),
            Some(Object::UserData(u)) => (Value::UserData(r), u.metatable),
            _ => continue,
        };
        let handler = match metatable.and_then(|mt| heap.table(mt)) {
            Some(mt) => mt.get_str("__gc"),
            None => continue,
        };
        if !matches!(handler, Value::Function(_)) {
            continue;
        }
        if let Some(header) = heap.header_mut(r) {
            header.set_finalized();
        }
        finalize.push(Finalization { object, handler });
    }
    finalize
}

fn sweep(heap: &mut Heap) -> Vec<Object> {
    let mut freed = Vec::new();
    for r in heap.refs() {
        if !heap.is_marked(r) {
            freed.extend(heap.free(r));
        }
    }
    freed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Function, Table};
    use crate::value::TableKey;
    use std::rc::Rc;

    fn string_key(s: &str) -> TableKey {
        TableKey::String(Rc::from(s))
    }

    #[test]
    fn test_gc_frees_unrooted() {
        let mut gc = GarbageCollector::default();
        let mut heap = Heap::new();
        let kept = heap.allocate(Object::Table(Table::default()));
        heap.allocate(Object::Table(Table::default()));

        let mut roots = RootSet::new();
        roots.add_global_ref(kept);
        let collection = gc.collect(&mut heap, &roots);

        assert_eq!(collection.freed.len(), 1);
        assert_eq!(heap.allocation_count(), 1);
        assert_eq!(gc.stats().collections, 1);
        assert_eq!(gc.stats().last_freed_count, 1);
    }

    #[test]
    fn test_gc_traces_nested_and_cycles() {
        let mut gc = GarbageCollector::default();
        let mut heap = Heap::new();
        let a = heap.allocate(Object::Table(Table::default()));
        let b = heap.allocate(Object::Table(Table::default()));
        let f = heap.allocate(Object::Function(Function::new(
            Rc::new(|_| Ok(0)),
            vec![Value::Table(a)],
        )));
        heap.table_mut(a).unwrap().set(string_key("b"), Value::Table(b));
        heap.table_mut(b).unwrap().set(string_key("a"), Value::Table(a));

        let mut roots = RootSet::new();
        roots.add_global_ref(f);
        let collection = gc.collect(&mut heap, &roots);
        assert!(collection.freed.is_empty());

        let collection = gc.collect(&mut heap, &RootSet::new());
        assert_eq!(collection.freed.len(), 3);
    }

    #[test]
    fn test_gc_clears_weak_values() {
        let mut gc = GarbageCollector::default();
        let mut heap = Heap::new();
        let weak = heap.allocate(Object::Table(Table::default()));
        let meta = heap.allocate(Object::Table(Table::default()));
        let target = heap.allocate(Object::Table(Table::default()));
        heap.table_mut(meta).unwrap().set(string_key("__mode"), Value::string("v"));
        heap.table_mut(weak).unwrap().metatable = Some(meta);
        heap.table_mut(weak).unwrap().set(string_key("x"), Value::Table(target));

        let mut roots = RootSet::new();
        roots.add_global_ref(weak);
        gc.collect(&mut heap, &roots);

        assert!(heap.get(target).is_none());
        assert_eq!(heap.table(weak).unwrap().get_str("x"), Value::Nil);
    }

    #[test]
    fn test_gc_resurrects_finalizable_once() {
        let mut gc = GarbageCollector::default();
        let mut heap = Heap::new();
        let handler = heap.allocate(Object::Function(Function::new(Rc::new(|_| Ok(0)), vec![])));
        let meta = heap.allocate(Object::Table(Table::default()));
        heap.table_mut(meta).unwrap().set(string_key("__gc"), Value::Function(handler));
        let mut object = Table::default();
        object.metatable = Some(meta);
        let object = heap.allocate(Object::Table(object));

        let collection = gc.collect(&mut heap, &RootSet::new());
        assert_eq!(collection.finalize.len(), 1);
        assert!(heap.get(object).is_some());

        let collection = gc.collect(&mut heap, &RootSet::new());
        assert!(collection.finalize.is_empty());
        assert!(heap.get(object).is_none());
    }

    #[test]
    fn test_gc_threshold_adapts() {
        let mut gc = GarbageCollector::new(2);
        let mut heap = Heap::new();
        let mut roots = RootSet::new();
        for _ in 0..3 {
            roots.add_global_ref(heap.allocate(Object::Table(Table::default())));
        }
        assert!(gc.should_collect(&heap));
        gc.collect(&mut heap, &roots);
        assert_eq!(gc.heap_stats(&heap).threshold, 6);
        assert!(!gc.should_collect(&heap));
    }
}
