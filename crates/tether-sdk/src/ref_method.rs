//! Methods that tie an argument's lifetime to the receiver
//!
//! A host object that stores a script value it was handed (a child widget, a
//! delegate) usually holds it as a `Weak` or a plain host handle. Wrapping
//! the method in a [`RefMethod`] additionally records the argument in the
//! receiver's custom data, so the script value lives exactly as long as the
//! receiver references it.

use crate::callback::{IntoCallback, NativeCallback};
use crate::convert::IntoStack;
use crate::index::{push_custom_data_table, push_refs_table};
use tether_core::{State, Type, VmResult, MULTRET};

/// Custom data field holding the arguments retained by [`RefType::Ref`]
pub const REFS_KEY: &str = "__refs";

/// What a [`RefMethod`] does with its argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefType {
    /// Keep the argument alive
    Ref,
    /// Stop keeping the argument alive
    Deref,
    /// Keep the argument alive under `key`, replacing the previous one
    Reset(&'static str),
}

/// A bound method wrapped to retain or release its first argument
pub struct RefMethod {
    method: NativeCallback,
    ref_type: RefType,
    ref_arg: i32,
}

impl RefMethod {
    /// Wrap `method`, whose receiver is argument 1 and whose retained value
    /// is argument 2
    pub fn new<M, F: IntoCallback<M>>(method: F, ref_type: RefType) -> Self {
        Self {
            method: crate::callback::native(method),
            ref_type,
            ref_arg: 2,
        }
    }
}

impl IntoStack for RefMethod {
    fn push_to(self, state: &State) {
        let RefMethod {
            method,
            ref_type,
            ref_arg,
        } = self;
        method.push_to(state);
        state.push_closure(
            move |s: &State| {
                store_arg(s, ref_arg, ref_type)?;
                let nargs = s.get_top();
                s.push_upvalue(1);
                s.insert(1)?;
                s.call(nargs, MULTRET)?;
                Ok(s.get_top() as usize)
            },
            1,
        );
    }
}

fn store_arg(state: &State, ref_arg: i32, ref_type: RefType) -> VmResult<()> {
    if state.type_of(1) != Type::UserData {
        return Ok(());
    }
    let top = state.get_top();
    match ref_type {
        RefType::Ref | RefType::Deref if state.is_nil(ref_arg) => {}
        RefType::Ref | RefType::Deref => {
            push_refs_table(state, REFS_KEY, 1).map_err(|e| e.into_vm(state))?;
            state.push_value(ref_arg);
            if ref_type == RefType::Ref {
                state.push_boolean(true);
            } else {
                state.push_nil();
            }
            state.raw_set(-3)?;
        }
        RefType::Reset(key) => {
            push_custom_data_table(state, 1).map_err(|e| e.into_vm(state))?;
            state.push_string(key);
            state.push_value(ref_arg);
            state.raw_set(-3)?;
        }
    }
    state.set_top(top);
    Ok(())
}
