//! tether engine core
//!
//! This crate provides the embedded scripting engine that host code binds to:
//! - Value representation and heap objects (tables, functions, userdata)
//! - A value stack with per-call frames and 1-based / negative indexing
//! - A registry for anchoring values beyond a single call
//! - Weak tables, metatables and `__gc` finalization
//! - Protected calls that turn raised errors into on-stack error values
//!
//! The engine is single-threaded: [`State`] is a reference-counted handle and
//! is neither `Send` nor `Sync`.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod defaults;
pub mod gc;
pub mod object;
pub mod stack;
pub mod value;
pub mod vm;

pub use gc::{GcStats, HeapStats};
pub use object::{NativeFn, WeakMode};
pub use stack::{CallFrame, Stack, StackStats};
pub use value::{GcRef, TableKey, Type, Value};
pub use vm::{ErrorOnStack, RegistryRef, State, StateId, VmOptions, WeakState, MULTRET, REF_NIL};

/// Engine errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum VmError {
    /// Value stack or call depth limit exceeded
    #[error("stack overflow")]
    StackOverflow,

    /// Not enough values in the current frame
    #[error("stack underflow")]
    StackUnderflow,

    /// An error value was raised; it is held by the state until a protected
    /// call delivers it onto the stack
    #[error("error object raised")]
    Raised,

    /// A heap reference outlived its object
    #[error("reference to a collected object")]
    DanglingReference,

    /// Type error
    #[error("{0}")]
    TypeError(String),

    /// Runtime error
    #[error("{0}")]
    RuntimeError(String),
}

/// Engine result
pub type VmResult<T> = Result<T, VmError>;
