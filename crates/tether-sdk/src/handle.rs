//! References to script values that outlive the stack
//!
//! A [`Persistent`] anchors its value in the registry and keeps it alive. A
//! [`Weak`] only remembers the value in a weak-valued table, so the value may
//! be collected while the handle exists.
//!
//! Handles belong to the engine they were created on. Pushing one onto a
//! different engine is a programmer error and panics.

use crate::convert::IntoStack;
use crate::error::BindResult;
use crate::table::push_weak_table;
use std::sync::atomic::{AtomicI64, Ordering};
use tether_core::{RegistryRef, State, Type, WeakState, REF_NIL};

/// Registry name of the table backing weak handles and weak references
pub const WEAK_TABLE: &str = "tether.internal.weaktable";

// ============================================================================
// Persistent
// ============================================================================

/// Strong reference to a script value
///
/// Occupies one registry slot, released exactly once when dropped.
#[derive(Debug)]
pub struct Persistent {
    state: WeakState,
    reference: RegistryRef,
}

impl Persistent {
    /// Anchor the value at `index`
    pub fn new(state: &State, index: i32) -> BindResult<Self> {
        state.push_value(index);
        let reference = state.reference()?;
        Ok(Self {
            state: state.downgrade(),
            reference,
        })
    }

    /// Push the referenced value
    pub fn push(&self, state: &State) -> Type {
        assert_eq!(state.id(), self.state.id(), "handle used with another engine");
        state.push_reference(self.reference)
    }

    /// The engine this handle belongs to, while it is open
    pub fn state(&self) -> Option<State> {
        self.state.upgrade()
    }

    /// Whether the handle refers to nil
    pub fn is_nil(&self) -> bool {
        self.reference == REF_NIL
    }
}

impl Drop for Persistent {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            state.unreference(self.reference);
        }
    }
}

impl IntoStack for &Persistent {
    fn push_to(self, state: &State) {
        Persistent::push(self, state);
    }
}

// ============================================================================
// Weak
// ============================================================================

static NEXT_WEAK_KEY: AtomicI64 = AtomicI64::new(1);

/// Non-owning reference to a script value
#[derive(Debug)]
pub struct Weak {
    state: WeakState,
    key: i64,
}

impl Weak {
    /// Remember the value at `index` without keeping it alive
    pub fn new(state: &State, index: i32) -> BindResult<Self> {
        let index = state.abs_index(index);
        let key = NEXT_WEAK_KEY.fetch_add(1, Ordering::Relaxed);
        push_weak_table(state, WEAK_TABLE, "v")?;
        state.push_integer(key);
        state.push_value(index);
        state.raw_set(-3)?;
        state.pop(1)?;
        Ok(Self {
            state: state.downgrade(),
            key,
        })
    }

    /// Push the value, or nil once it has been collected
    pub fn push(&self, state: &State) -> Type {
        assert_eq!(state.id(), self.state.id(), "handle used with another engine");
        if push_weak_table(state, WEAK_TABLE, "v").is_err() {
            state.push_nil();
            return Type::Nil;
        }
        let t = state.raw_get_i(-1, self.key).unwrap_or(Type::Nil);
        let _ = state.remove(-2);
        t
    }

    /// Whether the value is still alive
    pub fn exists(&self) -> bool {
        let Some(state) = self.state.upgrade() else {
            return false;
        };
        let top = state.get_top();
        let alive = self.push(&state) != Type::Nil;
        state.set_top(top);
        alive
    }

    /// The engine this handle belongs to, while it is open
    pub fn state(&self) -> Option<State> {
        self.state.upgrade()
    }
}

impl Drop for Weak {
    fn drop(&mut self) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let top = state.get_top();
        if push_weak_table(&state, WEAK_TABLE, "v").is_ok() {
            state.push_nil();
            let _ = state.raw_set_i(-2, self.key);
        }
        state.set_top(top);
    }
}

impl IntoStack for &Weak {
    fn push_to(self, state: &State) {
        Weak::push(self, state);
    }
}

// ============================================================================
// Keyed Weak References
// ============================================================================

/// Remember the value at `index` under a host-chosen `key`, weakly
pub fn create_weak_reference(state: &State, key: usize, index: i32) -> BindResult<()> {
    let index = state.abs_index(index);
    push_weak_table(state, WEAK_TABLE, "v")?;
    state.push_light_userdata(key);
    state.push_value(index);
    state.raw_set(-3)?;
    state.pop(1)?;
    Ok(())
}

/// Push the value remembered under `key` (nil when gone or never created)
pub fn push_weak_reference(state: &State, key: usize) -> Type {
    if push_weak_table(state, WEAK_TABLE, "v").is_err() {
        state.push_nil();
        return Type::Nil;
    }
    state.push_light_userdata(key);
    let t = state.raw_get(-2).unwrap_or(Type::Nil);
    let _ = state.remove(-2);
    t
}

/// Whether a live value is remembered under `key`
pub fn weak_reference_exists(state: &State, key: usize) -> bool {
    let top = state.get_top();
    let alive = push_weak_reference(state, key) != Type::Nil;
    state.set_top(top);
    alive
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistent_releases_slot() {
        let state = State::new();
        let baseline = state.registry_len();
        state.new_table();
        let handle = Persistent::new(&state, -1).unwrap();
        state.pop(1).unwrap();
        assert_eq!(state.registry_len(), baseline + 1);

        state.collect_garbage();
        assert_eq!(handle.push(&state), Type::Table);
        state.pop(1).unwrap();

        drop(handle);
        assert_eq!(state.registry_len(), baseline);
    }

    #[test]
    fn test_persistent_nil_takes_no_slot() {
        let state = State::new();
        state.push_nil();
        let handle = Persistent::new(&state, 1).unwrap();
        assert!(handle.is_nil());
        assert_eq!(state.registry_len(), 0);
    }

    #[test]
    #[should_panic(expected = "handle used with another engine")]
    fn test_persistent_bound_to_engine() {
        let a = State::new();
        let b = State::new();
        a.push_integer(1);
        let handle = Persistent::new(&a, 1).unwrap();
        handle.push(&b);
    }

    #[test]
    fn test_weak_is_cleared_by_collection() {
        let state = State::new();
        state.new_table();
        let weak = Weak::new(&state, -1).unwrap();
        assert!(weak.exists());

        weak.push(&state);
        assert!(state.raw_equal(1, 2));
        state.set_top(0);

        state.collect_garbage();
        assert!(!weak.exists());
        assert_eq!(weak.push(&state), Type::Nil);
    }

    #[test]
    fn test_keyed_weak_reference() {
        let state = State::new();
        state.new_table();
        create_weak_reference(&state, 0x1234, 1).unwrap();
        assert!(weak_reference_exists(&state, 0x1234));
        assert!(!weak_reference_exists(&state, 0x5678));

        state.pop(1).unwrap();
        state.collect_garbage();
        assert!(!weak_reference_exists(&state, 0x1234));
        assert_eq!(state.get_top(), 0);
    }

    #[test]
    fn test_handles_outlive_engine() {
        let state = State::new();
        state.new_table();
        let strong = Persistent::new(&state, 1).unwrap();
        let weak = Weak::new(&state, 1).unwrap();
        drop(state);
        assert!(strong.state().is_none());
        assert!(!weak.exists());
    }
}
