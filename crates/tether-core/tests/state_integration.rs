//! Integration tests for the stack and call API
//!
//! Tests cover:
//! - Native functions calling each other through globals
//! - Registry references across calls
//! - Protected calls leaving error values on the stack

use tether_core::{ErrorOnStack, State, Type, VmError, MULTRET, REF_NIL};

#[test]
fn test_native_functions_through_globals() {
    let state = State::new();
    state.push_function(|s: &State| {
        let n = s.to_integer(1).unwrap_or(0);
        s.push_integer(n * 2);
        Ok(1)
    });
    state.set_global("double").unwrap();

    state.push_function(|s: &State| {
        s.get_global("double")?;
        s.push_value(1);
        s.call(1, 1)?;
        s.push_integer(1);
        let total = s.to_integer(-2).unwrap_or(0) + s.to_integer(-1).unwrap_or(0);
        s.push_integer(total);
        Ok(1)
    });
    state.push_integer(20);
    state.call(1, 1).unwrap();

    assert_eq!(state.to_integer(-1), Some(41));
    assert_eq!(state.get_top(), 1);
}

#[test]
fn test_registry_reference_lifecycle() {
    let state = State::new();
    state.push_string("anchored");
    let r = state.reference().unwrap();
    assert_eq!(state.get_top(), 0);

    state.collect_garbage();
    assert_eq!(state.push_reference(r), Type::String);
    assert_eq!(state.to_string(-1).as_deref(), Some("anchored"));

    assert!(state.unreference(r));
    assert!(!state.unreference(r));
    assert_eq!(state.push_reference(r), Type::Nil);

    state.push_nil();
    assert_eq!(state.reference().unwrap(), REF_NIL);
}

#[test]
fn test_unprotected_error_carries_value() {
    let state = State::new();
    state.push_function(|s: &State| Err(s.raise_message("boom")));
    let err = state.call(0, 0).unwrap_err();
    assert!(matches!(err, VmError::Raised));

    state.push_error(err);
    assert_eq!(state.to_string(-1).as_deref(), Some("boom"));
}

#[test]
fn test_pcall_preserves_values_below_function() {
    let state = State::new();
    state.push_integer(1);
    state.push_integer(2);
    state.push_function(|s: &State| {
        s.push_integer(3);
        s.push_integer(4);
        Err(s.raise_message("failed midway"))
    });
    state.push_integer(10);

    assert_eq!(state.pcall(1, MULTRET), Err(ErrorOnStack));
    assert_eq!(state.get_top(), 3);
    assert_eq!(state.to_integer(2), Some(2));
    assert_eq!(state.to_string(3).as_deref(), Some("failed midway"));
}

#[test]
fn test_non_raised_errors_become_messages() {
    let state = State::new();
    state.push_function(|s: &State| {
        s.push_integer(1);
        s.push_string("k");
        s.raw_get(-2)?;
        Ok(1)
    });
    assert!(state.pcall(0, 1).is_err());
    assert_eq!(
        state.to_string(-1).as_deref(),
        Some("table expected, got number")
    );
}
