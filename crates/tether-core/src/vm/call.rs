//! Native functions, calls and error propagation
//!
//! Errors are ordinary values. A raise stores the value in the state and
//! returns [`VmError::Raised`], which native code propagates with `?`. A
//! protected call stops the propagation, unwinds the frames and stack above
//! the callee, and leaves the error value on the stack.

use super::State;
use crate::object::{Function, NativeFn, Object};
use crate::stack::CallFrame;
use crate::value::{Type, Value};
use crate::{VmError, VmResult};
use std::rc::Rc;

/// Result count meaning "keep every value the callee returned"
pub const MULTRET: i32 = -1;

/// A protected call failed; the error value is on top of the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("protected call failed; error value is on the stack")]
pub struct ErrorOnStack;

impl State {
    /// Push a native function without upvalues
    pub fn push_function<F>(&self, f: F)
    where
        F: Fn(&State) -> VmResult<usize> + 'static,
    {
        self.push_closure(f, 0);
    }

    /// Pop `n` values and push a native closure capturing them as upvalues
    ///
    /// The deepest popped value becomes upvalue 1.
    pub fn push_closure<F>(&self, f: F, n: usize)
    where
        F: Fn(&State) -> VmResult<usize> + 'static,
    {
        self.check_gc();
        let mut inner = self.inner.borrow_mut();
        let n = n.min(inner.stack.frame_len());
        let top = inner.stack.len();
        let upvalues = inner.stack.split_off(top - n);
        let func: NativeFn = Rc::new(f);
        let r = inner.allocate(Object::Function(Function::new(func, upvalues)));
        inner.stack.push(Value::Function(r));
    }

    /// Push upvalue `n` (1-based) of the running function
    ///
    /// Pushes nil and returns [`Type::None`] when there is no such upvalue.
    pub fn push_upvalue(&self, n: usize) -> Type {
        let mut inner = self.inner.borrow_mut();
        let value = inner
            .stack
            .current_frame()
            .function
            .and_then(|f| inner.heap.function(f))
            .and_then(|f| n.checked_sub(1).and_then(|i| f.upvalues.get(i)))
            .cloned();
        match value {
            Some(value) => {
                let t = value.type_of();
                inner.stack.push(value);
                t
            }
            None => {
                inner.stack.push(Value::Nil);
                Type::None
            }
        }
    }

    /// Number of upvalues of the running function
    pub fn upvalue_count(&self) -> usize {
        let inner = self.inner.borrow();
        inner
            .stack
            .current_frame()
            .function
            .and_then(|f| inner.heap.function(f))
            .map_or(0, |f| f.upvalues.len())
    }

    /// Number of native calls in progress
    pub fn call_depth(&self) -> usize {
        self.inner.borrow().stack.depth()
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Call the function below `nargs` arguments on top of the stack
    ///
    /// The function and arguments are replaced by `nresults` results (padded
    /// with nil or truncated), or by every result for [`MULTRET`]. A value
    /// that is not a function is called through its `__call` metamethod.
    /// A native that returns with the stack above the configured limit fails
    /// with `stack overflow`.
    pub fn call(&self, nargs: i32, nresults: i32) -> VmResult<()> {
        let (func, func_slot) = self.enter(nargs.max(0) as usize)?;
        let result = func(self);
        drop(func);
        self.leave(func_slot, nresults, result)
    }

    /// Call in protected mode
    ///
    /// On failure the stack is cut back to where the function was, the error
    /// value is pushed and [`ErrorOnStack`] is returned.
    pub fn pcall(&self, nargs: i32, nresults: i32) -> Result<(), ErrorOnStack> {
        let (depth, func_slot) = {
            let inner = self.inner.borrow();
            let below = inner.stack.len().saturating_sub(nargs.max(0) as usize + 1);
            (inner.stack.depth(), below.max(inner.stack.base()))
        };
        match self.call(nargs, nresults) {
            Ok(()) => Ok(()),
            Err(err) => {
                {
                    let mut inner = self.inner.borrow_mut();
                    inner.stack.unwind_to(depth);
                    inner.stack.resize(func_slot);
                }
                tracing::trace!(target: "tether::callback", error = %err, "protected call caught an error");
                self.push_error(err);
                Err(ErrorOnStack)
            }
        }
    }

    fn enter(&self, nargs: usize) -> VmResult<(NativeFn, usize)> {
        let mut inner = self.inner.borrow_mut();
        if inner.stack.frame_len() < nargs + 1 {
            return Err(VmError::StackUnderflow);
        }
        let func_slot = inner.stack.len() - nargs - 1;
        let callee = inner.stack.get(func_slot).cloned().unwrap_or_default();
        let function = match callee {
            Value::Function(r) => r,
            other => {
                let handler = inner.metafield(&other, "__call");
                match handler {
                    Value::Function(r) => {
                        inner.stack.insert(func_slot, Value::Function(r));
                        r
                    }
                    _ => {
                        let message = format!("attempt to call a {} value", other.type_name());
                        drop(inner);
                        return Err(self.raise_message(&message));
                    }
                }
            }
        };
        if inner.stack.depth() >= inner.options.max_call_depth {
            return Err(VmError::StackOverflow);
        }
        inner.stack.check(0)?;
        let func = inner
            .heap
            .function(function)
            .ok_or(VmError::DanglingReference)?
            .func
            .clone();
        inner.stack.push_frame(CallFrame::new(Some(function), func_slot + 1));
        Ok((func, func_slot))
    }

    fn leave(&self, func_slot: usize, nresults: i32, result: VmResult<usize>) -> VmResult<()> {
        let mut inner = self.inner.borrow_mut();
        let base = inner.stack.base();
        inner.stack.pop_frame();
        let n = match result {
            Ok(n) => n,
            Err(err) => {
                inner.stack.resize(func_slot);
                return Err(err);
            }
        };
        if inner.stack.check(0).is_err() {
            inner.stack.resize(func_slot);
            return Err(VmError::StackOverflow);
        }
        let top = inner.stack.len();
        let n = n.min(top.saturating_sub(base));
        let results = inner.stack.split_off(top - n);
        inner.stack.resize(func_slot);
        if nresults == MULTRET {
            for value in results {
                inner.stack.push(value);
            }
        } else {
            let mut results = results.into_iter();
            for _ in 0..nresults.max(0) {
                inner.stack.push(results.next().unwrap_or_default());
            }
        }
        Ok(())
    }

    // ========================================================================
    // Errors
    // ========================================================================

    /// Pop the top value and raise it as an error
    ///
    /// Return the result from the native function with `?` or `Err(..)`.
    pub fn error(&self) -> VmError {
        let mut inner = self.inner.borrow_mut();
        let value = inner.stack.pop().unwrap_or_default();
        inner.raised = Some(value);
        VmError::Raised
    }

    /// Raise a string error
    pub fn raise_message(&self, message: &str) -> VmError {
        self.push_string(message);
        self.error()
    }

    /// Push the value carried by an error
    ///
    /// For [`VmError::Raised`] this is the raised value; any other error is
    /// pushed as its message string.
    pub fn push_error(&self, err: VmError) {
        let mut inner = self.inner.borrow_mut();
        let value = match err {
            VmError::Raised => inner.raised.take().unwrap_or_default(),
            other => Value::string(&other.to_string()),
        };
        inner.stack.push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::VmOptions;

    #[test]
    fn test_call_adjusts_results() {
        let state = State::new();
        state.push_function(|s: &State| {
            let a = s.to_integer(1).unwrap_or(0);
            let b = s.to_integer(2).unwrap_or(0);
            s.push_integer(a + b);
            s.push_integer(a * b);
            Ok(2)
        });
        state.push_integer(3);
        state.push_integer(4);
        state.call(2, 1).unwrap();
        assert_eq!(state.get_top(), 1);
        assert_eq!(state.to_integer(1), Some(7));
        state.pop(1).unwrap();

        state.push_function(|_: &State| Ok(0));
        state.call(0, 3).unwrap();
        assert_eq!(state.get_top(), 3);
        assert!(state.is_nil(-1));
    }

    #[test]
    fn test_call_multret_keeps_everything() {
        let state = State::new();
        state.push_function(|s: &State| {
            for i in 0..4 {
                s.push_integer(i);
            }
            Ok(4)
        });
        state.call(0, MULTRET).unwrap();
        assert_eq!(state.get_top(), 4);
    }

    #[test]
    fn test_frames_isolate_arguments() {
        let state = State::new();
        state.push_string("caller");
        state.push_function(|s: &State| {
            s.push_integer(s.get_top() as i64);
            Ok(1)
        });
        state.push_nil();
        state.call(1, 1).unwrap();
        assert_eq!(state.to_integer(-1), Some(1));
        assert_eq!(state.get_top(), 2);
    }

    #[test]
    fn test_pcall_calling_nil() {
        let state = State::new();
        state.push_nil();
        assert_eq!(state.pcall(0, 0), Err(ErrorOnStack));
        assert_eq!(state.get_top(), 1);
        assert_eq!(state.to_string(-1).as_deref(), Some("attempt to call a nil value"));
    }

    #[test]
    fn test_pcall_delivers_raised_value() {
        let state = State::new();
        state.push_integer(99);
        state.push_function(|s: &State| {
            s.new_table();
            s.push_integer(1);
            s.set_field(-2, "code")?;
            Err(s.error())
        });
        state.push_string("ignored");
        assert!(state.pcall(1, 0).is_err());
        assert_eq!(state.get_top(), 2);
        assert_eq!(state.type_of(-1), Type::Table);
        assert_eq!(state.to_integer(1), Some(99));
    }

    #[test]
    fn test_nested_error_unwinds_frames() {
        let state = State::new();
        state.push_function(|s: &State| {
            s.push_function(|s: &State| Err(s.raise_message("inner failure")));
            s.call(0, 0)?;
            Ok(0)
        });
        assert!(state.pcall(0, 0).is_err());
        assert_eq!(state.call_depth(), 0);
        assert_eq!(state.to_string(-1).as_deref(), Some("inner failure"));
    }

    #[test]
    fn test_call_metamethod() {
        let state = State::new();
        state.new_table();
        state.new_table();
        state.push_function(|s: &State| {
            s.push_integer(s.get_top() as i64);
            Ok(1)
        });
        state.set_field(-2, "__call").unwrap();
        state.set_metatable(-2).unwrap();
        state.push_integer(5);
        state.call(1, 1).unwrap();
        // receiver plus the explicit argument
        assert_eq!(state.to_integer(-1), Some(2));
    }

    #[test]
    fn test_upvalues() {
        let state = State::new();
        state.push_string("first");
        state.push_integer(2);
        state.push_closure(
            |s: &State| {
                assert_eq!(s.upvalue_count(), 2);
                s.push_upvalue(1);
                assert_eq!(s.push_upvalue(3), Type::None);
                s.pop(1)?;
                Ok(1)
            },
            2,
        );
        assert_eq!(state.get_top(), 1);
        state.call(0, 1).unwrap();
        assert_eq!(state.to_string(-1).as_deref(), Some("first"));
    }

    #[test]
    fn test_call_depth_limit() {
        fn recurse(s: &State) -> VmResult<usize> {
            s.push_function(recurse);
            s.call(0, 0)?;
            Ok(0)
        }
        let state = State::with_options(VmOptions::with_call_depth(16));
        state.push_function(recurse);
        assert!(state.pcall(0, 0).is_err());
        assert_eq!(state.to_string(-1).as_deref(), Some("stack overflow"));
        assert_eq!(state.call_depth(), 0);
    }

    #[test]
    fn test_native_growing_past_stack_limit() {
        let state = State::with_options(VmOptions::with_stack_limit(8));
        state.push_function(|s: &State| {
            for i in 0..20 {
                s.push_integer(i);
            }
            Ok(1)
        });
        assert!(state.pcall(0, 1).is_err());
        assert_eq!(state.to_string(-1).as_deref(), Some("stack overflow"));
        assert_eq!(state.get_top(), 1);
        assert!(state.check_stack(7));
    }
}
