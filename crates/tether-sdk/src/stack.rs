//! Stack helpers built on the conversion traits

use crate::convert::{FromStack, IntoStack};
use crate::error::{BindError, BindResult};
use std::borrow::Cow;
use std::fmt;
use tether_core::{State, VmError};

/// Push one or more host values
pub fn push<T: IntoStack>(state: &State, value: T) {
    value.push_to(state);
}

/// Fail with `stack overflow` unless `slots` more values fit on the stack
pub fn reserve(state: &State, slots: usize) -> BindResult<()> {
    if state.check_stack(slots) {
        Ok(())
    } else {
        Err(BindError::Vm(VmError::StackOverflow))
    }
}

/// Convert the value(s) at `index` without touching the stack
pub fn to<T: FromStack>(state: &State, index: i32) -> Option<T> {
    T::from_stack(state, index)
}

/// Convert and pop the top [`FromStack::COUNT`] values
///
/// On failure nothing is popped.
pub fn pop<T: FromStack>(state: &State) -> Option<T> {
    if T::COUNT == 0 {
        return T::from_stack(state, 0);
    }
    if state.get_top() < T::COUNT as i32 {
        return None;
    }
    let value = T::from_stack(state, -(T::COUNT as i32))?;
    state.set_top(-(T::COUNT as i32) - 1);
    Some(value)
}

/// Push a message built with `format!`
pub fn push_formatted(state: &State, args: fmt::Arguments<'_>) {
    match args.as_str() {
        Some(s) => state.push_string(s),
        None => state.push_string(&args.to_string()),
    }
}

/// A value already on the stack
///
/// Pushing copies the slot; reading yields its absolute index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackIndex(pub i32);

impl IntoStack for StackIndex {
    fn push_to(self, state: &State) {
        state.push_value(self.0);
    }
}

impl FromStack for StackIndex {
    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("value")
    }

    fn from_stack(state: &State, index: i32) -> Option<Self> {
        state
            .is_valid(index)
            .then(|| StackIndex(state.abs_index(index)))
    }
}

/// Upvalue `n` (1-based) of the running native function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upvalue(pub usize);

impl IntoStack for Upvalue {
    fn push_to(self, state: &State) {
        state.push_upvalue(self.0);
    }
}

/// Restores the stack top when dropped
///
/// ```ignore
/// let _guard = StackGuard::new(&state);
/// state.push_integer(1);
/// // the pushed value is gone once the guard is dropped
/// ```
#[must_use = "the stack is restored when the guard is dropped"]
pub struct StackGuard<'a> {
    state: &'a State,
    top: i32,
}

impl<'a> StackGuard<'a> {
    /// Remember the current top
    pub fn new(state: &'a State) -> Self {
        Self {
            state,
            top: state.get_top(),
        }
    }

    /// The top recorded at creation
    pub fn top(&self) -> i32 {
        self.top
    }
}

impl Drop for StackGuard<'_> {
    fn drop(&mut self) {
        self.state.set_top(self.top);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_multiple_in_order() {
        let state = State::new();
        push(&state, (1i64, "b", true));
        let (a, b, c): (i64, String, bool) = pop(&state).unwrap();
        assert_eq!((a, b.as_str(), c), (1, "b", true));
        assert_eq!(state.get_top(), 0);
    }

    #[test]
    fn test_failed_pop_leaves_stack() {
        let state = State::new();
        push(&state, "text");
        assert_eq!(pop::<bool>(&state), None);
        assert_eq!(state.get_top(), 1);
        assert_eq!(pop::<(i64, i64)>(&state), None);
        assert_eq!(state.get_top(), 1);
    }

    #[test]
    fn test_stack_index_copies_slot() {
        let state = State::new();
        push(&state, 10i64);
        push(&state, StackIndex(1));
        assert_eq!(to::<i64>(&state, -1), Some(10));
        assert_eq!(to::<StackIndex>(&state, -1), Some(StackIndex(2)));
        assert_eq!(to::<StackIndex>(&state, 3), None);
    }

    #[test]
    fn test_push_formatted() {
        let state = State::new();
        push_formatted(&state, format_args!("{} + {} = {}", 1, 2, 3));
        assert_eq!(to::<String>(&state, 1).as_deref(), Some("1 + 2 = 3"));
    }

    #[test]
    fn test_guard_restores_top() {
        let state = State::new();
        push(&state, 1i64);
        {
            let guard = StackGuard::new(&state);
            push(&state, (2i64, 3i64));
            assert_eq!(guard.top(), 1);
        }
        assert_eq!(state.get_top(), 1);
    }

    #[test]
    fn test_upvalue_pushes_captured_value() {
        let state = State::new();
        push(&state, "captured");
        state.push_closure(
            |s: &State| {
                push(s, Upvalue(1));
                Ok(1)
            },
            1,
        );
        state.call(0, 1).unwrap();
        assert_eq!(to::<String>(&state, -1).as_deref(), Some("captured"));
    }
}
