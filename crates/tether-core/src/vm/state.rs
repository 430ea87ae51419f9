//! Engine state and stack API
//!
//! [`State`] is a cheap, clonable handle onto one engine instance. Every
//! operation borrows the shared interior for the duration of a single step and
//! releases it before running native code, dropping host payloads or running
//! finalizers, so callbacks may freely re-enter the engine.

use super::options::VmOptions;
use super::registry::Registry;
use crate::gc::{GarbageCollector, Heap, RootSet};
use crate::object::{Object, Table, UserData};
use crate::stack::{Stack, StackStats};
use crate::value::{GcRef, Type, Value};
use crate::{VmError, VmResult};
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for an engine instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateId(u64);

impl StateId {
    /// Create a new unique state ID
    pub fn new() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        StateId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for StateId {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct Inner {
    pub(crate) id: StateId,
    pub(crate) heap: Heap,
    pub(crate) gc: GarbageCollector,
    pub(crate) stack: Stack,
    pub(crate) registry: Registry,
    pub(crate) globals: GcRef,
    /// Error value in flight between a raise and the protected call that
    /// catches it
    pub(crate) raised: Option<Value>,
    pub(crate) options: VmOptions,
    pub(crate) collecting: bool,
}

impl Inner {
    /// Value at a frame-relative index; nil outside the frame
    pub(crate) fn value_at(&self, index: i32) -> Value {
        self.stack
            .resolve(index)
            .and_then(|slot| self.stack.get(slot))
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn metatable_of(&self, value: &Value) -> Option<GcRef> {
        match value {
            Value::Table(r) => self.heap.table(*r)?.metatable,
            Value::UserData(r) => self.heap.userdata(*r)?.metatable,
            _ => None,
        }
    }

    /// Raw field of a value's metatable (nil when absent)
    pub(crate) fn metafield(&self, value: &Value, name: &str) -> Value {
        self.metatable_of(value)
            .and_then(|mt| self.heap.table(mt))
            .map(|mt| mt.get_str(name))
            .unwrap_or_default()
    }

    pub(crate) fn table_ref(&self, index: i32) -> VmResult<GcRef> {
        match self.value_at(index) {
            Value::Table(r) => Ok(r),
            other => Err(VmError::TypeError(format!(
                "table expected, got {}",
                other.type_name()
            ))),
        }
    }

    pub(crate) fn allocate(&mut self, object: Object) -> GcRef {
        self.heap.allocate(object)
    }

    pub(crate) fn roots(&self) -> RootSet {
        let mut roots = RootSet::new();
        for value in self.stack.values() {
            roots.add_stack_root(value);
        }
        for frame in self.stack.frames() {
            if let Some(function) = frame.function {
                roots.add_global_ref(function);
            }
        }
        for value in self.registry.values() {
            roots.add_global_root(value);
        }
        roots.add_global_ref(self.globals);
        if let Some(raised) = &self.raised {
            roots.add_global_root(raised);
        }
        roots
    }
}

/// Handle onto one engine instance
///
/// Clones share the same engine. The engine is torn down when the last
/// `State` is dropped; handles held by host objects use [`WeakState`] so they
/// do not keep it alive.
#[derive(Clone)]
pub struct State {
    pub(crate) inner: Rc<RefCell<Inner>>,
}

/// Non-owning handle onto an engine instance
#[derive(Clone)]
pub struct WeakState {
    inner: Weak<RefCell<Inner>>,
    id: StateId,
}

impl WeakState {
    /// Get a strong handle if the engine is still open
    pub fn upgrade(&self) -> Option<State> {
        self.inner.upgrade().map(|inner| State { inner })
    }

    /// Identifier of the engine this handle points to
    pub fn id(&self) -> StateId {
        self.id
    }
}

impl std::fmt::Debug for WeakState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakState").field("id", &self.id).finish()
    }
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State").field("id", &self.id()).finish()
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    /// Create an engine with default options
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    /// Create an engine with explicit options
    pub fn with_options(options: VmOptions) -> Self {
        let mut heap = Heap::new();
        let globals = heap.allocate(Object::Table(Table::default()));
        let inner = Inner {
            id: StateId::new(),
            heap,
            gc: GarbageCollector::new(options.gc_threshold),
            stack: Stack::with_capacity(options.max_stack_size),
            registry: Registry::default(),
            globals,
            raised: None,
            options,
            collecting: false,
        };
        tracing::debug!(target: "tether::gc", id = inner.id.as_u64(), "state created");
        Self {
            inner: Rc::new(RefCell::new(inner)),
        }
    }

    /// Identifier of this engine
    pub fn id(&self) -> StateId {
        self.inner.borrow().id
    }

    /// Create a non-owning handle
    pub fn downgrade(&self) -> WeakState {
        WeakState {
            inner: Rc::downgrade(&self.inner),
            id: self.id(),
        }
    }

    /// Whether two handles refer to the same engine
    pub fn same_state(&self, other: &State) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Options this engine was created with
    pub fn options(&self) -> VmOptions {
        self.inner.borrow().options.clone()
    }

    // ========================================================================
    // Stack Manipulation
    // ========================================================================

    /// Number of values in the current frame
    pub fn get_top(&self) -> i32 {
        self.inner.borrow().stack.frame_len() as i32
    }

    /// Grow (with nils) or shrink the current frame
    ///
    /// Negative values count from the current top, so `set_top(-2)` pops one.
    pub fn set_top(&self, index: i32) {
        let mut inner = self.inner.borrow_mut();
        let base = inner.stack.base();
        let top = if index >= 0 {
            base + index as usize
        } else {
            let len = inner.stack.frame_len() as i32;
            base + (len + index + 1).max(0) as usize
        };
        inner.stack.resize(top);
    }

    /// Convert a relative index into a positive one
    pub fn abs_index(&self, index: i32) -> i32 {
        self.inner.borrow().stack.abs_index(index)
    }

    /// Whether `index` addresses a value in the current frame
    pub fn is_valid(&self, index: i32) -> bool {
        self.inner.borrow().stack.resolve(index).is_some()
    }

    /// Check that `extra` more values fit on the stack
    pub fn check_stack(&self, extra: usize) -> bool {
        self.inner.borrow().stack.check(extra).is_ok()
    }

    /// Pop `n` values
    pub fn pop(&self, n: usize) -> VmResult<()> {
        let mut inner = self.inner.borrow_mut();
        if n > inner.stack.frame_len() {
            return Err(VmError::StackUnderflow);
        }
        let top = inner.stack.len() - n;
        inner.stack.resize(top);
        Ok(())
    }

    /// Pop the top value and return it
    pub fn pop_value(&self) -> VmResult<Value> {
        self.inner.borrow_mut().stack.pop()
    }

    /// Copy of the value at `index` (nil outside the frame)
    pub fn value(&self, index: i32) -> Value {
        self.inner.borrow().value_at(index)
    }

    /// Push a value
    pub fn push_raw(&self, value: Value) {
        self.inner.borrow_mut().stack.push(value);
    }

    /// Push nil
    pub fn push_nil(&self) {
        self.push_raw(Value::Nil);
    }

    /// Push a boolean
    pub fn push_boolean(&self, b: bool) {
        self.push_raw(Value::Boolean(b));
    }

    /// Push an integer
    pub fn push_integer(&self, n: i64) {
        self.push_raw(Value::Integer(n));
    }

    /// Push a float
    pub fn push_number(&self, n: f64) {
        self.push_raw(Value::Number(n));
    }

    /// Push a string
    pub fn push_string(&self, s: &str) {
        self.push_raw(Value::string(s));
    }

    /// Push an uncollected host token
    pub fn push_light_userdata(&self, p: usize) {
        self.push_raw(Value::LightUserData(p));
    }

    /// Push a copy of the value at `index`
    pub fn push_value(&self, index: i32) {
        let mut inner = self.inner.borrow_mut();
        let value = inner.value_at(index);
        inner.stack.push(value);
    }

    /// Move the top value into `index`, shifting values above it up
    pub fn insert(&self, index: i32) -> VmResult<()> {
        let mut inner = self.inner.borrow_mut();
        let slot = inner.stack.resolve(index).ok_or(VmError::StackUnderflow)?;
        let value = inner.stack.pop()?;
        inner.stack.insert(slot, value);
        Ok(())
    }

    /// Remove the value at `index`, shifting values above it down
    pub fn remove(&self, index: i32) -> VmResult<()> {
        let mut inner = self.inner.borrow_mut();
        let slot = inner.stack.resolve(index).ok_or(VmError::StackUnderflow)?;
        inner.stack.remove(slot);
        Ok(())
    }

    /// Pop the top value into `index`
    pub fn replace(&self, index: i32) -> VmResult<()> {
        let mut inner = self.inner.borrow_mut();
        let slot = inner.stack.resolve(index).ok_or(VmError::StackUnderflow)?;
        let value = inner.stack.pop()?;
        inner.stack.set(slot, value);
        Ok(())
    }

    /// Stack statistics
    pub fn stack_stats(&self) -> StackStats {
        self.inner.borrow().stack.stats()
    }

    // ========================================================================
    // Type Queries and Conversions
    // ========================================================================

    /// Type of the value at `index`; [`Type::None`] outside the frame
    pub fn type_of(&self, index: i32) -> Type {
        let inner = self.inner.borrow();
        match inner.stack.resolve(index).and_then(|slot| inner.stack.get(slot)) {
            Some(value) => value.type_of(),
            None => Type::None,
        }
    }

    /// Name of the type of the value at `index`
    pub fn type_name(&self, index: i32) -> &'static str {
        self.type_of(index).name()
    }

    /// Whether the value at `index` is nil or absent
    pub fn is_nil(&self, index: i32) -> bool {
        matches!(self.type_of(index), Type::Nil | Type::None)
    }

    /// Truthiness of the value at `index`
    pub fn to_boolean(&self, index: i32) -> bool {
        self.value(index).is_truthy()
    }

    /// Integer value at `index`, accepting integral floats and numeric strings
    pub fn to_integer(&self, index: i32) -> Option<i64> {
        self.value(index).to_integer()
    }

    /// Float value at `index`, accepting numeric strings
    pub fn to_number(&self, index: i32) -> Option<f64> {
        self.value(index).to_number()
    }

    /// String value at `index`, accepting numbers
    pub fn to_string(&self, index: i32) -> Option<Rc<str>> {
        self.value(index).to_str()
    }

    /// Host token at `index`
    pub fn to_light_userdata(&self, index: i32) -> Option<usize> {
        match self.value(index) {
            Value::LightUserData(p) => Some(p),
            _ => None,
        }
    }

    /// Identity of the collected object at `index`
    pub fn to_identity(&self, index: i32) -> Option<u64> {
        self.value(index).gc_ref().map(|r| r.identity())
    }

    /// Primitive equality without metamethods
    pub fn raw_equal(&self, a: i32, b: i32) -> bool {
        let inner = self.inner.borrow();
        match (inner.stack.resolve(a), inner.stack.resolve(b)) {
            (Some(_), Some(_)) => inner.value_at(a).raw_equal(&inner.value_at(b)),
            _ => false,
        }
    }

    // ========================================================================
    // Userdata
    // ========================================================================

    /// Push a new userdata owning `value`
    pub fn new_userdata<T: 'static>(&self, value: T) {
        self.check_gc();
        let mut inner = self.inner.borrow_mut();
        let r = inner.allocate(Object::UserData(UserData::new(value)));
        inner.stack.push(Value::UserData(r));
    }

    fn userdata_ref(&self, index: i32) -> Option<GcRef> {
        match self.value(index) {
            Value::UserData(r) => Some(r),
            _ => None,
        }
    }

    /// Payload of the userdata at `index`
    ///
    /// Returns None for non-userdata values and for payloads already released
    /// by [`State::take_userdata`].
    pub fn userdata(&self, index: i32) -> Option<Rc<dyn Any>> {
        let r = self.userdata_ref(index)?;
        self.inner.borrow().heap.userdata(r)?.payload.clone()
    }

    /// Payload type and byte size of the userdata at `index`
    pub fn userdata_info(&self, index: i32) -> Option<(TypeId, usize)> {
        let r = self.userdata_ref(index)?;
        let inner = self.inner.borrow();
        let ud = inner.heap.userdata(r)?;
        Some((ud.type_id, ud.size))
    }

    /// Detach the payload of the userdata at `index`
    ///
    /// Later lookups through [`State::userdata`] return None.
    pub fn take_userdata(&self, index: i32) -> Option<Rc<dyn Any>> {
        let r = self.userdata_ref(index)?;
        let payload = self.inner.borrow_mut().heap.userdata_mut(r)?.payload.take();
        payload
    }

    /// Pop the top value into the user value slot of the userdata at `index`
    pub fn set_user_value(&self, index: i32) -> VmResult<()> {
        let r = self
            .userdata_ref(index)
            .ok_or_else(|| VmError::TypeError(format!("userdata expected, got {}", self.type_name(index))))?;
        let mut inner = self.inner.borrow_mut();
        let value = inner.stack.pop()?;
        let ud = inner.heap.userdata_mut(r).ok_or(VmError::DanglingReference)?;
        ud.user_value = value;
        Ok(())
    }

    /// Push the user value of the userdata at `index` (nil when unset)
    pub fn get_user_value(&self, index: i32) -> Type {
        let mut inner = self.inner.borrow_mut();
        let value = match inner.value_at(index) {
            Value::UserData(r) => inner
                .heap
                .userdata(r)
                .map(|ud| ud.user_value.clone())
                .unwrap_or_default(),
            _ => Value::Nil,
        };
        let t = value.type_of();
        inner.stack.push(value);
        t
    }

    // ========================================================================
    // Globals
    // ========================================================================

    /// Push the globals table
    pub fn push_globals(&self) {
        let mut inner = self.inner.borrow_mut();
        let globals = inner.globals;
        inner.stack.push(Value::Table(globals));
    }

    /// Push the global `name`
    pub fn get_global(&self, name: &str) -> VmResult<Type> {
        self.push_globals();
        let t = self.get_field(-1, name)?;
        self.remove(-2)?;
        Ok(t)
    }

    /// Pop the top value into the global `name`
    pub fn set_global(&self, name: &str) -> VmResult<()> {
        self.push_globals();
        self.insert(-2)?;
        self.set_field(-2, name)?;
        self.pop(1)
    }
}
