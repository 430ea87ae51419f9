//! Engine state
//!
//! The [`State`] API is split by concern:
//! - `state`: construction, stack manipulation, conversions, userdata, globals
//! - `table`: raw and metamethod-aware table access, metatables
//! - `call`: native functions, calls, protected calls and raising errors
//! - `registry`: numbered references and named registry entries
//! - `collect`: garbage collection and `__gc` finalizers

mod call;
mod collect;
mod options;
mod registry;
mod state;
mod table;

pub use call::{ErrorOnStack, MULTRET};
pub use options::VmOptions;
pub use registry::{RegistryRef, REF_NIL};
pub use state::{State, StateId, WeakState};
