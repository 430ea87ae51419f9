//! Registry: values anchored beyond the lifetime of a single call
//!
//! Numbered references live in an arena with a free list; each slot is handed
//! out once and becomes reusable only after it is released. Named entries hold
//! per-engine singletons such as class metatables and internal weak tables.

use super::State;
use crate::value::{Type, Value};
use crate::VmResult;
use rustc_hash::FxHashMap;
use std::rc::Rc;

/// Numbered registry reference
pub type RegistryRef = i32;

/// Reference returned for nil values; it never occupies a slot
pub const REF_NIL: RegistryRef = -1;

#[derive(Default)]
pub(crate) struct Registry {
    refs: Vec<Option<Value>>,
    free: Vec<usize>,
    named: FxHashMap<Rc<str>, Value>,
    live: usize,
}

impl Registry {
    pub(crate) fn reference(&mut self, value: Value) -> RegistryRef {
        if value.is_nil() {
            return REF_NIL;
        }
        self.live += 1;
        let slot = match self.free.pop() {
            Some(slot) => {
                self.refs[slot] = Some(value);
                slot
            }
            None => {
                self.refs.push(Some(value));
                self.refs.len() - 1
            }
        };
        slot as RegistryRef + 1
    }

    /// Release a reference; returns false when it was not live
    pub(crate) fn unreference(&mut self, r: RegistryRef) -> bool {
        if r < 1 {
            return false;
        }
        let slot = r as usize - 1;
        match self.refs.get_mut(slot).and_then(Option::take) {
            Some(_) => {
                self.free.push(slot);
                self.live -= 1;
                true
            }
            None => false,
        }
    }

    pub(crate) fn get(&self, r: RegistryRef) -> Value {
        if r < 1 {
            return Value::Nil;
        }
        self.refs
            .get(r as usize - 1)
            .and_then(Option::clone)
            .unwrap_or_default()
    }

    pub(crate) fn named(&self, name: &str) -> Value {
        self.named.get(name).cloned().unwrap_or_default()
    }

    pub(crate) fn set_named(&mut self, name: &str, value: Value) {
        if value.is_nil() {
            self.named.remove(name);
        } else {
            self.named.insert(Rc::from(name), value);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.live
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &Value> + '_ {
        self.refs.iter().flatten().chain(self.named.values())
    }
}

impl State {
    /// Pop the top value and anchor it in the registry
    ///
    /// Returns [`REF_NIL`] without occupying a slot when the value is nil.
    pub fn reference(&self) -> VmResult<RegistryRef> {
        let mut inner = self.inner.borrow_mut();
        let value = inner.stack.pop()?;
        let r = inner.registry.reference(value);
        tracing::trace!(target: "tether::handle", reference = r, "registry slot acquired");
        Ok(r)
    }

    /// Release a registry reference; releasing twice is a no-op
    pub fn unreference(&self, r: RegistryRef) -> bool {
        let released = self.inner.borrow_mut().registry.unreference(r);
        if released {
            tracing::trace!(target: "tether::handle", reference = r, "registry slot released");
        }
        released
    }

    /// Push the value anchored by a registry reference
    pub fn push_reference(&self, r: RegistryRef) -> Type {
        let mut inner = self.inner.borrow_mut();
        let value = inner.registry.get(r);
        let t = value.type_of();
        inner.stack.push(value);
        t
    }

    /// Number of live numbered references
    pub fn registry_len(&self) -> usize {
        self.inner.borrow().registry.len()
    }

    /// Pop the top value into a named registry entry
    pub fn set_named(&self, name: &str) -> VmResult<()> {
        let mut inner = self.inner.borrow_mut();
        let value = inner.stack.pop()?;
        inner.registry.set_named(name, value);
        Ok(())
    }

    /// Push a named registry entry (nil when absent)
    pub fn push_named(&self, name: &str) -> Type {
        let mut inner = self.inner.borrow_mut();
        let value = inner.registry.named(name);
        let t = value.type_of();
        inner.stack.push(value);
        t
    }

    /// Create the metatable registered under `name`, or fetch the existing one
    ///
    /// Pushes the metatable and returns true when it was newly created. A new
    /// metatable gets its `__name` field set to `name`.
    pub fn new_metatable(&self, name: &str) -> VmResult<bool> {
        if self.push_named(name) != Type::Nil {
            return Ok(false);
        }
        self.pop(1)?;
        self.new_table();
        self.push_string(name);
        self.set_field(-2, "__name")?;
        self.push_value(-1);
        self.set_named(name)?;
        tracing::debug!(target: "tether::class", name, "metatable created");
        Ok(true)
    }

    /// Push the metatable registered under `name` (nil when absent)
    pub fn get_named_metatable(&self, name: &str) -> Type {
        self.push_named(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_reuses_slots() {
        let mut registry = Registry::default();
        let a = registry.reference(Value::Integer(1));
        let b = registry.reference(Value::Integer(2));
        assert_eq!((a, b), (1, 2));
        assert_eq!(registry.len(), 2);

        assert!(registry.unreference(a));
        assert!(!registry.unreference(a));
        assert_eq!(registry.len(), 1);

        let c = registry.reference(Value::Integer(3));
        assert_eq!(c, a);
        assert_eq!(registry.get(c), Value::Integer(3));
    }

    #[test]
    fn test_registry_nil_reference() {
        let mut registry = Registry::default();
        assert_eq!(registry.reference(Value::Nil), REF_NIL);
        assert_eq!(registry.len(), 0);
        assert!(!registry.unreference(REF_NIL));
        assert_eq!(registry.get(REF_NIL), Value::Nil);
    }

    #[test]
    fn test_registry_named_entries() {
        let mut registry = Registry::default();
        registry.set_named("a", Value::Boolean(true));
        assert_eq!(registry.named("a"), Value::Boolean(true));
        assert_eq!(registry.values().count(), 1);
        registry.set_named("a", Value::Nil);
        assert_eq!(registry.named("a"), Value::Nil);
    }
}
