//! Collection entry points and `__gc` finalizers

use super::State;
use crate::gc::{Collection, Finalization, GcStats, HeapStats};
use crate::value::Value;

impl State {
    /// Run a full collection cycle
    ///
    /// Unreachable objects are freed after the engine has been released, so
    /// host payload destructors may call back into it. Userdata whose
    /// metatable has a `__gc` handler is kept for one more cycle and the
    /// handler runs in protected mode; errors it raises are logged and
    /// otherwise ignored. Nested requests made while finalizers run are
    /// ignored.
    pub fn collect_garbage(&self) {
        let collection = {
            let mut inner = self.inner.borrow_mut();
            if inner.collecting {
                return;
            }
            inner.collecting = true;
            let roots = inner.roots();
            let inner = &mut *inner;
            let collection = inner.gc.collect(&mut inner.heap, &roots);
            collection
        };
        let Collection { freed, finalize } = collection;
        drop(freed);
        for Finalization { object, handler } in finalize {
            self.run_finalizer(object, handler);
        }
        self.inner.borrow_mut().collecting = false;
    }

    /// Collect if enough objects were allocated since the last cycle
    pub(crate) fn check_gc(&self) {
        let due = {
            let inner = self.inner.borrow();
            !inner.collecting && inner.gc.should_collect(&inner.heap)
        };
        if due {
            self.collect_garbage();
        }
    }

    fn run_finalizer(&self, object: Value, handler: Value) {
        let top = self.get_top();
        self.push_raw(handler);
        self.push_raw(object);
        if self.pcall(1, 0).is_err() {
            let message = self
                .to_string(-1)
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("({} error object)", self.type_name(-1)));
            tracing::warn!(target: "tether::gc", %message, "error in __gc metamethod");
        }
        self.set_top(top);
    }

    /// Get GC statistics
    pub fn gc_stats(&self) -> GcStats {
        self.inner.borrow().gc.stats().clone()
    }

    /// Get heap statistics
    pub fn heap_stats(&self) -> HeapStats {
        let inner = self.inner.borrow();
        inner.gc.heap_stats(&inner.heap)
    }

    /// Set the live-object count that triggers automatic collection
    pub fn set_gc_threshold(&self, objects: usize) {
        self.inner.borrow_mut().gc.set_threshold(objects);
    }
}
