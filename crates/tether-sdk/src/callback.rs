//! Binding host functions as script-callable natives
//!
//! Any `Fn(A1, .., An) -> R` whose arguments implement [`FromStack`] and whose
//! result implements [`IntoStack`] (or is a `Result` of one) can be pushed as
//! a native function. The first parameter may instead be `&State` or
//! `&mut CallContext`; these pseudo-arguments take no stack position and do
//! not count toward the arity.
//!
//! ```ignore
//! push_callback(&state, |a: i64, b: i64| a + b);
//! push_callback(&state, |ctx: &mut CallContext, name: String| {
//!     if name.is_empty() {
//!         ctx.throw("empty name");
//!     }
//! });
//! ```

use crate::context::CallContext;
use crate::convert::{FromStack, IntoStack};
use crate::error::{error_message, BindError, BindResult};
use crate::stack::{pop, push, push_formatted, reserve};
use std::fmt::Display;
use std::rc::Rc;
use tether_core::{NativeFn, State, VmResult};

// ============================================================================
// Return Values
// ============================================================================

/// Marker for results that are pushed as they are
#[doc(hidden)]
pub struct Plain;

/// Marker for `Result` returns, whose `Err` becomes a script error
#[doc(hidden)]
pub struct Fallible;

/// Result of a bound function
pub trait ReturnValue<Marker> {
    /// Push the result; returns how many values were pushed
    fn push_return(self, ctx: &mut CallContext) -> usize;
}

impl<T: IntoStack> ReturnValue<Plain> for T {
    fn push_return(self, ctx: &mut CallContext) -> usize {
        self.push_to(&ctx.state);
        T::COUNT
    }
}

impl<T: IntoStack, E: Display> ReturnValue<Fallible> for Result<T, E> {
    fn push_return(self, ctx: &mut CallContext) -> usize {
        match self {
            Ok(value) => {
                value.push_to(&ctx.state);
                T::COUNT
            }
            Err(err) => {
                ctx.throw(&err.to_string());
                0
            }
        }
    }
}

// ============================================================================
// Callbacks
// ============================================================================

/// A host function that can be bound as a native
///
/// Implemented for closures and functions of up to eight arguments; `Marker`
/// only disambiguates the implementations.
pub trait IntoCallback<Marker>: 'static {
    /// Stack positions the arguments occupy
    const ARITY: usize;

    /// Convert the arguments, run the function and push its result
    ///
    /// Returns None when an argument failed to convert; the failing position
    /// and expected type are recorded in `ctx` and the function did not run.
    fn invoke(&self, ctx: &mut CallContext) -> Option<usize>;
}

/// Pseudo-argument marker: the function takes `&State` first
#[doc(hidden)]
pub struct WithState;

/// Pseudo-argument marker: the function takes `&mut CallContext` first
#[doc(hidden)]
pub struct WithContext;

macro_rules! convert_args {
    ($ctx:ident; $($arg:ident),*) => {
        #[allow(unused_mut)]
        let mut position: usize = 1;
        $(
            let $arg = match $arg::from_stack(&$ctx.state, position as i32) {
                Some(value) => value,
                None => {
                    $ctx.reject_arg(position, $arg::type_name());
                    return None;
                }
            };
            position += $arg::COUNT;
        )*
        let _ = position;
    };
}

macro_rules! impl_callback {
    ($($arg:ident),*) => {
        impl<Func, Ret, RetMarker, $($arg,)*> IntoCallback<(Plain, RetMarker, Ret, $($arg,)*)> for Func
        where
            Func: Fn($($arg),*) -> Ret + 'static,
            Ret: ReturnValue<RetMarker>,
            $($arg: FromStack,)*
        {
            const ARITY: usize = 0 $(+ $arg::COUNT)*;

            #[allow(non_snake_case)]
            fn invoke(&self, ctx: &mut CallContext) -> Option<usize> {
                convert_args!(ctx; $($arg),*);
                let ret = (self)($($arg),*);
                Some(ret.push_return(ctx))
            }
        }

        impl<Func, Ret, RetMarker, $($arg,)*> IntoCallback<(WithState, RetMarker, Ret, $($arg,)*)> for Func
        where
            Func: Fn(&State, $($arg),*) -> Ret + 'static,
            Ret: ReturnValue<RetMarker>,
            $($arg: FromStack,)*
        {
            const ARITY: usize = 0 $(+ $arg::COUNT)*;

            #[allow(non_snake_case)]
            fn invoke(&self, ctx: &mut CallContext) -> Option<usize> {
                convert_args!(ctx; $($arg),*);
                let ret = (self)(&ctx.state, $($arg),*);
                Some(ret.push_return(ctx))
            }
        }

        impl<Func, Ret, RetMarker, $($arg,)*> IntoCallback<(WithContext, RetMarker, Ret, $($arg,)*)> for Func
        where
            Func: Fn(&mut CallContext, $($arg),*) -> Ret + 'static,
            Ret: ReturnValue<RetMarker>,
            $($arg: FromStack,)*
        {
            const ARITY: usize = 0 $(+ $arg::COUNT)*;

            #[allow(non_snake_case)]
            fn invoke(&self, ctx: &mut CallContext) -> Option<usize> {
                convert_args!(ctx; $($arg),*);
                let ret = (self)(ctx, $($arg),*);
                Some(ret.push_return(ctx))
            }
        }
    };
}

impl_callback!();
impl_callback!(A1);
impl_callback!(A1, A2);
impl_callback!(A1, A2, A3);
impl_callback!(A1, A2, A3, A4);
impl_callback!(A1, A2, A3, A4, A5);
impl_callback!(A1, A2, A3, A4, A5, A6);
impl_callback!(A1, A2, A3, A4, A5, A6, A7);
impl_callback!(A1, A2, A3, A4, A5, A6, A7, A8);

/// Owns a bound function and the flags it was pushed with
///
/// The holder lives inside the script function object and is dropped when
/// the engine reclaims it.
pub struct CallbackHolder<F> {
    callback: F,
    flags: u32,
}

impl<F> CallbackHolder<F> {
    /// Wrap `callback`
    pub fn new(callback: F, flags: u32) -> Self {
        Self { callback, flags }
    }

    /// Run the bound function against the current frame
    pub fn dispatch<M>(&self, state: &State) -> VmResult<usize>
    where
        F: IntoCallback<M>,
    {
        let got = state.get_top().max(0) as usize;
        if got < F::ARITY {
            push_formatted(
                state,
                format_args!("insufficient args, expecting {} but got {}", F::ARITY, got),
            );
            return Err(state.error());
        }

        let mut ctx = CallContext::new(state, self.flags);
        let outcome = self.callback.invoke(&mut ctx);
        let CallContext {
            has_error,
            invalid_arg,
            invalid_arg_name,
            ..
        } = ctx;

        match outcome {
            Some(_) if has_error => Err(state.error()),
            Some(results) => Ok(results),
            None => {
                let observed = state.type_name(invalid_arg as i32);
                push_formatted(
                    state,
                    format_args!(
                        "error converting arg at index {} from {} to {}",
                        invalid_arg, observed, invalid_arg_name
                    ),
                );
                Err(state.error())
            }
        }
    }
}

/// A bound function ready to be pushed, possibly several times
#[derive(Clone)]
pub struct NativeCallback {
    func: NativeFn,
}

impl NativeCallback {
    /// Bind `callback` with creation flags
    pub fn with_flags<M, F: IntoCallback<M>>(callback: F, flags: u32) -> Self {
        let holder = CallbackHolder::new(callback, flags);
        Self {
            func: Rc::new(move |state: &State| holder.dispatch(state)),
        }
    }
}

impl IntoStack for NativeCallback {
    fn push_to(self, state: &State) {
        let func = self.func;
        state.push_function(move |s: &State| func(s));
    }
}

/// Bind a host function so it can be pushed
pub fn native<M, F: IntoCallback<M>>(callback: F) -> NativeCallback {
    NativeCallback::with_flags(callback, 0)
}

/// Push a host function as a native
pub fn push_callback<M, F: IntoCallback<M>>(state: &State, callback: F) {
    native(callback).push_to(state);
}

/// Call the function below the arguments in protected mode and pop its
/// results
///
/// The function must already be on top of the stack. On failure the error
/// value stays on the stack: the script error for a failed call, or
/// `error converting return value from X to Y` when the results do not
/// convert, naming the first result that fails. When the stack has no room
/// for the call the function is left in place and nothing is pushed.
pub fn pcall_function<A: IntoStack, R: FromStack>(state: &State, args: A) -> BindResult<R> {
    reserve(state, A::COUNT.max(R::COUNT))?;
    push(state, args);
    if state.pcall(A::COUNT as i32, R::COUNT as i32).is_err() {
        return Err(BindError::Protected(error_message(state, -1)));
    }
    if let Some(results) = pop::<R>(state) {
        return Ok(results);
    }
    let first = -(R::COUNT as i32);
    let (slot, to) =
        R::mismatch(state, first).unwrap_or_else(|| (state.abs_index(first), R::type_name()));
    let from = state.type_name(slot);
    state.set_top(-(R::COUNT as i32) - 1);
    push_formatted(
        state,
        format_args!("error converting return value from {} to {}", from, to),
    );
    Err(BindError::Conversion {
        from: from.to_string(),
        to: to.into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::to;

    fn run<M, F: IntoCallback<M>>(callback: F, args: impl IntoStack) -> Result<i32, String> {
        let state = State::new();
        push_callback(&state, callback);
        push(&state, args);
        let nargs = state.get_top() - 1;
        match state.pcall(nargs, tether_core::MULTRET) {
            Ok(()) => Ok(state.get_top()),
            Err(_) => Err(error_message(&state, -1)),
        }
    }

    fn arity<M, F: IntoCallback<M>>(_: &F) -> usize {
        F::ARITY
    }

    #[test]
    fn test_arity_counts_positions() {
        assert_eq!(arity(&|a: i64, b: i64| a + b), 2);
        assert_eq!(arity(&|_: &State, _: (i64, bool)| ()), 2);
        assert_eq!(arity(&|_: &mut CallContext| ()), 0);
    }

    #[test]
    fn test_insufficient_args() {
        let err = run(|a: i64, b: i64| a + b, 1i64).unwrap_err();
        assert_eq!(err, "insufficient args, expecting 2 but got 1");
    }

    #[test]
    fn test_conversion_error_names_position() {
        let err = run(|_: i64, _: bool| (), (1i64, "yes")).unwrap_err();
        assert_eq!(err, "error converting arg at index 2 from string to boolean");
    }

    #[test]
    fn test_pseudo_args_take_no_position() {
        let results = run(
            |state: &State, n: i64| {
                assert_eq!(state.get_top(), 1);
                n * 2
            },
            21i64,
        );
        assert_eq!(results, Ok(1));
    }

    #[test]
    fn test_context_error() {
        let err = run(
            |ctx: &mut CallContext, n: i64| {
                if n < 0 {
                    ctx.throw("negative");
                }
            },
            -1i64,
        )
        .unwrap_err();
        assert_eq!(err, "negative");
    }

    #[test]
    fn test_result_error_is_raised() {
        let err = run(|n: i64| -> Result<i64, String> { Err(format!("bad {}", n)) }, 5i64).unwrap_err();
        assert_eq!(err, "bad 5");
    }

    #[test]
    fn test_tuple_result_pushes_each_element() {
        let results = run(|| (1i64, "two"), ());
        assert_eq!(results, Ok(2));
    }

    #[test]
    fn test_pcall_result_conversion_failure() {
        let state = State::new();
        push_callback(&state, || 42i64);
        let result = pcall_function::<(), bool>(&state, ());
        assert!(matches!(result, Err(BindError::Conversion { .. })));
        assert_eq!(state.get_top(), 1);
        assert_eq!(
            to::<String>(&state, 1).as_deref(),
            Some("error converting return value from number to boolean")
        );
    }

    #[test]
    fn test_pcall_reports_first_failing_result() {
        let state = State::new();
        push_callback(&state, || (1i64, "x"));
        let result = pcall_function::<(), (i64, i64)>(&state, ());
        assert!(matches!(
            result,
            Err(BindError::Conversion { ref from, ref to }) if from == "string" && to == "integer"
        ));
        assert_eq!(
            to::<String>(&state, 1).as_deref(),
            Some("error converting return value from string to integer")
        );
    }

    #[test]
    fn test_pcall_without_room_pushes_nothing() {
        let state = State::with_options(tether_core::VmOptions::with_stack_limit(3));
        push_callback(&state, |a: i64, b: i64, c: i64| a + b + c);
        let result = pcall_function::<_, i64>(&state, (1i64, 2i64, 3i64));
        assert!(matches!(result, Err(BindError::Vm(tether_core::VmError::StackOverflow))));
        assert_eq!(state.get_top(), 1);
    }
}
