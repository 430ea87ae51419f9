//! tether SDK - binding host code to the tether engine
//!
//! This crate layers typed conversions on top of the engine's value stack:
//! - [`IntoStack`] / [`FromStack`] conversions for primitives, containers and
//!   wrapped host objects
//! - Binding host closures as script functions with checked arguments
//! - Strong and weak handles to script values
//! - Raw and protected table access
//! - Host classes with properties, inheritance and finalization
//!
//! # Example
//!
//! ```ignore
//! use tether_sdk::prelude::*;
//!
//! let state = State::new();
//! push_callback(&state, |a: i64, b: i64| a + b);
//! let sum: i64 = pcall_function(&state, (2i64, 3i64))?;
//! assert_eq!(sum, 5);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod callback;
pub mod context;
pub mod convert;
pub mod error;
pub mod function;
pub mod handle;
pub mod index;
pub mod metatable;
pub mod ref_method;
pub mod stack;
pub mod table;

pub use callback::{native, pcall_function, push_callback, CallbackHolder, IntoCallback, NativeCallback, ReturnValue};
pub use context::CallContext;
pub use convert::{FromStack, IntoStack, LightUserData, Nil};
pub use error::{BindError, BindResult, ProtectedError};
pub use function::{to_weak_function, Callback, PersistentFunction, WeakFunction};
pub use handle::{create_weak_reference, push_weak_reference, weak_reference_exists, Persistent, Weak};
pub use index::{push_custom_data_table, raw_set_property, MemberHolder, Property, RefMode};
pub use metatable::{new_userdata, to_instance, Class, Inherits, MetaTable};
pub use ref_method::{RefMethod, RefType};
pub use stack::{pop, push, push_formatted, reserve, to, StackGuard, StackIndex, Upvalue};
pub use table::{pget, pget_and_pop, pset, push_weak_table, raw_get, raw_get_and_pop, raw_set};

pub use tether_core::{State, Type, Value, VmError, VmOptions, VmResult, MULTRET};

/// Everything needed to bind a host type
pub mod prelude {
    pub use crate::{
        native, pcall_function, pget, pget_and_pop, pop, pset, push, push_callback, raw_get, raw_get_and_pop, raw_set,
        raw_set_property, to, BindError, BindResult, CallContext, Callback, Class, FromStack, Inherits,
        IntoStack, MetaTable, Nil, Persistent, Property, RefMethod, RefMode, RefType, State, Weak,
    };
}
