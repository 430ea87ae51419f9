//! Calling script functions from host code
//!
//! A script function converted into a [`Callback`] can be stored and invoked
//! later like a host closure. Calls never fail on the host side: when the
//! script raises, the results do not convert, or the function or engine is
//! gone, the failure is logged and `R::default()` is returned.

use crate::callback;
use crate::convert::{FromStack, IntoStack};
use crate::handle::{Persistent, Weak};
use crate::stack::StackGuard;
use std::borrow::Cow;
use std::fmt;
use std::marker::PhantomData;
use tether_core::{State, Type};

/// Script function kept alive by the host
#[derive(Debug)]
pub struct PersistentFunction {
    handle: Persistent,
}

impl PersistentFunction {
    /// Anchor the function at `index`; None when the value is not a function
    pub fn new(state: &State, index: i32) -> Option<Self> {
        if state.type_of(index) != Type::Function {
            return None;
        }
        let handle = Persistent::new(state, index).ok()?;
        Some(Self { handle })
    }

    /// Call with `args` and convert the results
    pub fn call<A: IntoStack, R: FromStack + Default>(&self, args: A) -> R {
        match self.handle.state() {
            Some(state) => call_script(&state, |s| self.handle.push(s) == Type::Function, args),
            None => R::default(),
        }
    }
}

/// Script function the host refers to without keeping it alive
#[derive(Debug)]
pub struct WeakFunction {
    handle: Weak,
}

impl WeakFunction {
    /// Remember the function at `index`; None when the value is not a
    /// function
    pub fn new(state: &State, index: i32) -> Option<Self> {
        if state.type_of(index) != Type::Function {
            return None;
        }
        let handle = Weak::new(state, index).ok()?;
        Some(Self { handle })
    }

    /// Whether the function is still alive
    pub fn exists(&self) -> bool {
        self.handle.exists()
    }

    /// Call with `args` and convert the results; a collected function is not
    /// called
    pub fn call<A: IntoStack, R: FromStack + Default>(&self, args: A) -> R {
        match self.handle.state() {
            Some(state) => call_script(&state, |s| self.handle.push(s) == Type::Function, args),
            None => R::default(),
        }
    }
}

fn call_script<A, R>(state: &State, push_function: impl FnOnce(&State) -> bool, args: A) -> R
where
    A: IntoStack,
    R: FromStack + Default,
{
    let _guard = StackGuard::new(state);
    if !push_function(state) {
        tracing::trace!(target: "tether::callback", "script function is gone; returning default");
        return R::default();
    }
    match callback::pcall_function::<A, R>(state, args) {
        Ok(results) => results,
        Err(err) => {
            tracing::warn!(target: "tether::callback", error = %err, "script function call failed");
            R::default()
        }
    }
}

// ============================================================================
// Typed Callbacks
// ============================================================================

enum Target {
    Persistent(PersistentFunction),
    Weak(WeakFunction),
}

/// Script function typed as a host closure `Fn(A) -> R`
///
/// Converting with [`FromStack`] keeps the function alive for the lifetime
/// of the callback; [`to_weak_function`] does not.
pub struct Callback<A, R> {
    target: Target,
    _signature: PhantomData<fn(A) -> R>,
}

impl<A: IntoStack, R: FromStack + Default> Callback<A, R> {
    /// Invoke the script function
    pub fn call(&self, args: A) -> R {
        match &self.target {
            Target::Persistent(f) => f.call(args),
            Target::Weak(f) => f.call(args),
        }
    }
}

impl<A, R> Callback<A, R> {
    /// Whether the callback does not keep its function alive
    pub fn is_weak(&self) -> bool {
        matches!(self.target, Target::Weak(_))
    }

    /// Whether the function can still be called
    pub fn exists(&self) -> bool {
        match &self.target {
            Target::Persistent(f) => f.handle.state().is_some(),
            Target::Weak(f) => f.exists(),
        }
    }
}

impl<A, R> fmt::Debug for Callback<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback").field("weak", &self.is_weak()).finish()
    }
}

impl<A, R> FromStack for Callback<A, R> {
    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("function")
    }

    fn from_stack(state: &State, index: i32) -> Option<Self> {
        PersistentFunction::new(state, index).map(|f| Callback {
            target: Target::Persistent(f),
            _signature: PhantomData,
        })
    }
}

impl<A, R> IntoStack for &Callback<A, R> {
    fn push_to(self, state: &State) {
        match &self.target {
            Target::Persistent(f) => {
                f.handle.push(state);
            }
            Target::Weak(f) => {
                f.handle.push(state);
            }
        }
    }
}

/// Convert the function at `index` without extending its lifetime
pub fn to_weak_function<A, R>(state: &State, index: i32) -> Option<Callback<A, R>> {
    WeakFunction::new(state, index).map(|f| Callback {
        target: Target::Weak(f),
        _signature: PhantomData,
    })
}
