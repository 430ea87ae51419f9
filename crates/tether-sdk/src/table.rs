//! Batched table access
//!
//! Raw helpers read and write without metamethods. Protected helpers go
//! through normal indexing inside a protected call, so a raising `__index` or
//! `__newindex` handler becomes an error value on the stack instead of
//! unwinding into host code.
//!
//! Key/value batches are flattened tuples: `("key1", 1, "key2", 2)` holds two
//! pairs, and each pair is processed independently in order.

use crate::convert::{FromStack, IntoStack};
use crate::error::{error_message, BindError, BindResult, ProtectedError};
use crate::stack::{pop, push, reserve};
use tether_core::{State, Type, VmError};

/// Message left on the stack when fetched values do not convert
pub const CONVERT_VALUES_ERROR: &str = "error converting values";

// ============================================================================
// Raw Access
// ============================================================================

/// Store every key/value pair of `pairs` into the table at `index`
pub fn raw_set<P: IntoStack>(state: &State, index: i32, pairs: P) -> BindResult<()> {
    debug_assert_eq!(P::COUNT % 2, 0, "raw_set expects key/value pairs");
    let table = state.abs_index(index);
    reserve(state, P::COUNT + 2)?;
    let base = state.get_top();
    push(state, pairs);
    let mut result = Ok(());
    for i in 0..(P::COUNT / 2) as i32 {
        let key = base + 1 + 2 * i;
        state.push_value(key);
        state.push_value(key + 1);
        if let Err(err) = state.raw_set(table) {
            result = Err(BindError::from_vm(state, err));
            break;
        }
    }
    state.set_top(base);
    result
}

/// Push `t[key]` for every key of `keys`, in order
pub fn raw_get<K: IntoStack>(state: &State, index: i32, keys: K) -> BindResult<()> {
    let table = state.abs_index(index);
    reserve(state, 2 * K::COUNT)?;
    let base = state.get_top();
    push(state, keys);
    for i in 1..=K::COUNT as i32 {
        state.push_value(base + i);
        if let Err(err) = state.raw_get(table) {
            state.set_top(base);
            return Err(BindError::from_vm(state, err));
        }
    }
    for _ in 0..K::COUNT {
        state.remove(base + 1)?;
    }
    Ok(())
}

/// Fetch `keys` without metamethods and convert the values
///
/// The stack depth is unchanged whatever the outcome.
pub fn raw_get_and_pop<V: FromStack, K: IntoStack>(state: &State, index: i32, keys: K) -> BindResult<V> {
    let top = state.get_top();
    raw_get(state, index, keys)?;
    let values = pop::<V>(state);
    state.set_top(top);
    values.ok_or(BindError::Values)
}

// ============================================================================
// Protected Access
// ============================================================================

fn protected_error(state: &State) -> ProtectedError {
    ProtectedError {
        message: error_message(state, -1),
    }
}

fn overflow_error() -> ProtectedError {
    ProtectedError {
        message: VmError::StackOverflow.to_string(),
    }
}

/// Assign every pair of `pairs` to the table at `index`, honoring
/// `__newindex`
///
/// All assignments run in one protected call. A failure stops the batch but
/// keeps the writes that already happened; the error value is left on the
/// stack. When the stack has no room for the batch nothing is pushed.
pub fn pset<P: IntoStack>(state: &State, index: i32, pairs: P) -> Result<(), ProtectedError> {
    debug_assert_eq!(P::COUNT % 2, 0, "pset expects key/value pairs");
    if !state.check_stack(P::COUNT + 1) {
        return Err(overflow_error());
    }
    let pair_count = P::COUNT / 2;
    state.push_value(index);
    push(state, pairs);
    state.push_closure(
        move |s: &State| {
            for i in 0..pair_count {
                s.push_upvalue(1);
                s.push_upvalue(2 + 2 * i);
                s.push_upvalue(3 + 2 * i);
                s.set_table(-3)?;
                s.pop(1)?;
            }
            Ok(0)
        },
        1 + P::COUNT,
    );
    state.pcall(0, 0).map_err(|_| protected_error(state))
}

/// Push `t[key]` for every key of `keys`, honoring `__index`
///
/// On failure nothing but the error value is pushed, and nothing at all
/// when the stack has no room for the keys.
pub fn pget<K: IntoStack>(state: &State, index: i32, keys: K) -> Result<(), ProtectedError> {
    let key_count = K::COUNT;
    if !state.check_stack(key_count + 1) {
        return Err(overflow_error());
    }
    state.push_value(index);
    push(state, keys);
    state.push_closure(
        move |s: &State| {
            for i in 0..key_count {
                s.push_upvalue(1);
                s.push_upvalue(2 + i);
                s.get_table(-2)?;
                s.remove(-2)?;
            }
            Ok(key_count)
        },
        1 + key_count,
    );
    state.pcall(0, key_count as i32).map_err(|_| protected_error(state))
}

/// Fetch `keys` through normal indexing and convert the values
///
/// When the values do not convert they are replaced by the single error
/// value `error converting values`.
pub fn pget_and_pop<V: FromStack, K: IntoStack>(state: &State, index: i32, keys: K) -> Result<V, ProtectedError> {
    pget(state, index, keys)?;
    if let Some(values) = pop::<V>(state) {
        return Ok(values);
    }
    state.set_top(-(K::COUNT as i32) - 1);
    state.push_string(CONVERT_VALUES_ERROR);
    Err(ProtectedError {
        message: CONVERT_VALUES_ERROR.to_string(),
    })
}

// ============================================================================
// Weak Tables
// ============================================================================

/// Push the table registered under `name`, creating it with weak `mode`
/// (`"k"`, `"v"` or `"kv"`) on first use
pub fn push_weak_table(state: &State, name: &str, mode: &str) -> BindResult<()> {
    if state.push_named(name) == Type::Table {
        return Ok(());
    }
    state.pop(1)?;
    state.new_table();
    state.new_table();
    state.push_string(mode);
    state.set_field(-2, "__mode")?;
    state.set_metatable(-2)?;
    state.push_value(-1);
    state.set_named(name)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::to;

    #[test]
    fn test_raw_set_then_get() {
        let state = State::new();
        state.new_table();
        raw_set(&state, 1, ("a", 1i64, 2i64, "two")).unwrap();
        assert_eq!(state.get_top(), 1);
        raw_get(&state, 1, ("a", 2i64, "missing")).unwrap();
        assert_eq!(state.get_top(), 4);
        assert_eq!(to::<i64>(&state, 2), Some(1));
        assert_eq!(to::<String>(&state, 3).as_deref(), Some("two"));
        assert!(state.is_nil(4));
    }

    #[test]
    fn test_raw_set_rejects_nil_key() {
        let state = State::new();
        state.new_table();
        let err = raw_set(&state, -1, ("ok", 1i64, crate::Nil, 2i64)).unwrap_err();
        assert_eq!(err.to_string(), "index is nil");
        assert_eq!(state.get_top(), 1);
        assert_eq!(raw_get_and_pop::<i64, _>(&state, 1, "ok").ok(), Some(1));
    }

    #[test]
    fn test_raw_get_and_pop_keeps_depth_on_failure() {
        let state = State::new();
        state.new_table();
        raw_set(&state, 1, ("key", "value")).unwrap();
        let result = raw_get_and_pop::<i64, _>(&state, 1, "key");
        assert!(matches!(result, Err(BindError::Values)));
        assert_eq!(state.get_top(), 1);
    }

    #[test]
    fn test_raw_access_ignores_metamethods() {
        let state = State::new();
        state.new_table();
        state.new_table();
        state.push_function(|s: &State| Err(s.raise_message("should not run")));
        state.set_field(-2, "__index").unwrap();
        state.set_metatable(1).unwrap();
        let value = raw_get_and_pop::<Option<i64>, _>(&state, 1, "absent").unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn test_pget_runs_index_handler() {
        let state = State::new();
        state.new_table();
        state.new_table();
        state.push_function(|s: &State| {
            let key = s.to_string(2).unwrap_or_default();
            s.push_string(&format!("got {}", key));
            Ok(1)
        });
        state.set_field(-2, "__index").unwrap();
        state.set_metatable(1).unwrap();

        let value: String = pget_and_pop(&state, 1, "x").unwrap();
        assert_eq!(value, "got x");
        assert_eq!(state.get_top(), 1);
    }

    #[test]
    fn test_pset_is_not_atomic() {
        let state = State::new();
        state.new_table();
        let err = pset(&state, 1, ("first", 1i64, crate::Nil, 2i64)).unwrap_err();
        assert_eq!(err.message, "index is nil");
        assert_eq!(state.get_top(), 2);
        state.pop(1).unwrap();
        assert_eq!(raw_get_and_pop::<i64, _>(&state, 1, "first").ok(), Some(1));
    }

    #[test]
    fn test_protected_index_on_non_table() {
        let state = State::new();
        state.push_integer(3);
        let err = pget(&state, 1, "field").unwrap_err();
        assert_eq!(err.message, "attempt to index a number value");
        assert_eq!(state.get_top(), 2);
    }

    #[test]
    fn test_batches_respect_stack_limit() {
        let state = State::with_options(tether_core::VmOptions::with_stack_limit(6));
        state.new_table();
        raw_set(&state, 1, ("a", 1i64)).unwrap();

        let err = raw_set(&state, 1, ("a", 1i64, "b", 2i64)).unwrap_err();
        assert!(matches!(err, BindError::Vm(VmError::StackOverflow)));
        assert!(matches!(raw_get(&state, 1, ("a", "b", "c")), Err(BindError::Vm(VmError::StackOverflow))));
        assert_eq!(state.get_top(), 1);

        let err = pget(&state, 1, ("a", "b", "c", "d", "e")).unwrap_err();
        assert_eq!(err.message, "stack overflow");
        let err = pset(&state, 1, ("a", 1i64, "b", 2i64, "c", 3i64)).unwrap_err();
        assert_eq!(err.message, "stack overflow");
        assert_eq!(state.get_top(), 1);

        pget(&state, 1, ("a", "b")).unwrap();
        assert_eq!(state.get_top(), 3);
    }

    #[test]
    fn test_weak_table_is_shared() {
        let state = State::new();
        push_weak_table(&state, "test.weak", "v").unwrap();
        push_weak_table(&state, "test.weak", "v").unwrap();
        assert!(state.raw_equal(1, 2));
        assert_eq!(state.get_metafield(1, "__mode"), Type::String);
    }
}
