//! Per-invocation state of a bound native function

use std::borrow::Cow;
use tether_core::State;

/// State of one call into a bound native function
///
/// A context is created when the function is entered and dropped before any
/// error is handed back to the engine; it owns nothing but a cheap handle to
/// the engine.
///
/// A body that takes `&mut CallContext` can fail the call on its own: push an
/// error value and set [`CallContext::has_error`].
#[derive(Debug)]
pub struct CallContext {
    /// Engine running the call
    pub state: State,
    /// Flags given when the function was pushed
    pub create_flags: u32,
    /// The body pushed an error value that should be raised
    pub has_error: bool,
    /// 1-based position of the argument that failed to convert (0 when none)
    pub invalid_arg: usize,
    /// Expected type name of the argument that failed to convert
    pub invalid_arg_name: Cow<'static, str>,
}

impl CallContext {
    /// Create the context for a call on `state`
    pub fn new(state: &State, create_flags: u32) -> Self {
        Self {
            state: state.clone(),
            create_flags,
            has_error: false,
            invalid_arg: 0,
            invalid_arg_name: Cow::Borrowed(""),
        }
    }

    /// Push `message` as the call's error value
    pub fn throw(&mut self, message: &str) {
        self.state.push_string(message);
        self.has_error = true;
    }

    /// Record a failed argument conversion
    pub(crate) fn reject_arg(&mut self, position: usize, expected: Cow<'static, str>) {
        self.invalid_arg = position;
        self.invalid_arg_name = expected;
    }
}
