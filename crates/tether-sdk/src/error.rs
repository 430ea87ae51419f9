//! Error types for the binding layer

use tether_core::{State, VmError};

/// Result type for binding operations
pub type BindResult<T> = Result<T, BindError>;

/// Binding error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum BindError {
    /// A value could not be converted to the requested host type
    #[error("error converting {from} to {to}")]
    Conversion {
        /// Script type name of the value
        from: String,
        /// Expected type name
        to: String,
    },

    /// Values fetched from a table did not convert
    #[error("error converting values")]
    Values,

    /// A protected operation failed; the error value is on the stack
    #[error("{0}")]
    Protected(String),

    /// Engine error
    #[error(transparent)]
    Vm(#[from] VmError),
}

/// A protected table operation failed
///
/// The error value that caused the failure has been left on top of the stack;
/// `message` is its string form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ProtectedError {
    /// Error message observed on the stack
    pub message: String,
}

impl BindError {
    /// Turn an engine error into a binding error, resolving a raised value
    /// into its message
    pub(crate) fn from_vm(state: &State, err: VmError) -> Self {
        match err {
            VmError::Raised => {
                state.push_error(VmError::Raised);
                let message = error_message(state, -1);
                state.set_top(-2);
                BindError::Vm(VmError::RuntimeError(message))
            }
            other => BindError::Vm(other),
        }
    }

    /// Turn into an engine error raised from inside a native function
    pub(crate) fn into_vm(self, state: &State) -> VmError {
        match self {
            BindError::Vm(err) => err,
            other => state.raise_message(&other.to_string()),
        }
    }
}

impl From<ProtectedError> for BindError {
    fn from(err: ProtectedError) -> Self {
        BindError::Protected(err.message)
    }
}

/// String form of the error value at `index`
pub(crate) fn error_message(state: &State, index: i32) -> String {
    match state.to_string(index) {
        Some(message) => message.to_string(),
        None => format!("({} error object)", state.type_name(index)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raised_value_becomes_message() {
        let state = State::new();
        let err = state.raise_message("index is nil");
        let err = BindError::from_vm(&state, err);
        assert_eq!(err.to_string(), "index is nil");
        assert_eq!(state.get_top(), 0);
    }

    #[test]
    fn test_binding_error_raises_its_message() {
        let state = State::new();
        let err = BindError::Values.into_vm(&state);
        state.push_error(err);
        assert_eq!(error_message(&state, -1), "error converting values");
    }

    #[test]
    fn test_protected_error_converts() {
        let err: BindError = ProtectedError {
            message: "boom".to_string(),
        }
        .into();
        assert!(matches!(err, BindError::Protected(ref m) if m == "boom"));
    }
}
