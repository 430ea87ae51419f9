//! Heap object model
//!
//! The collector manages three kinds of objects:
//! - [`Table`]: associative array with an array part and a hash part
//! - [`Function`]: native closure plus captured upvalues
//! - [`UserData`]: opaque host payload with an optional metatable

use crate::value::{GcRef, TableKey, Value};
use crate::vm::State;
use crate::VmResult;
use rustc_hash::FxHashMap;
use std::any::{Any, TypeId};
use std::rc::Rc;

/// Signature of every function callable from scripts.
///
/// The function receives the engine with its own frame active: index 1 is the
/// first argument. It returns how many values on top of its frame are results.
pub type NativeFn = Rc<dyn Fn(&State) -> VmResult<usize>>;

/// Weakness of a table, read from the `__mode` field of its metatable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeakMode {
    /// Keys do not keep their referents alive
    pub keys: bool,
    /// Values do not keep their referents alive
    pub values: bool,
}

impl WeakMode {
    /// Parse a `__mode` string such as `"k"`, `"v"` or `"kv"`
    pub fn parse(mode: &str) -> Self {
        Self {
            keys: mode.contains('k'),
            values: mode.contains('v'),
        }
    }

    /// Whether any part is weak
    pub fn is_weak(&self) -> bool {
        self.keys || self.values
    }
}

/// Associative array
#[derive(Default)]
pub struct Table {
    array: Vec<Value>,
    hash: FxHashMap<TableKey, Value>,
    pub(crate) metatable: Option<GcRef>,
}

impl Table {
    /// Create a table with preallocated array and hash parts
    pub fn with_capacity(narr: usize, nrec: usize) -> Self {
        let mut hash = FxHashMap::default();
        hash.reserve(nrec);
        Self {
            array: Vec::with_capacity(narr),
            hash,
            metatable: None,
        }
    }

    /// Read an entry without metamethods
    pub fn get(&self, key: &TableKey) -> Value {
        if let TableKey::Integer(i) = key {
            if *i >= 1 && (*i as usize) <= self.array.len() {
                return self.array[*i as usize - 1].clone();
            }
        }
        self.hash.get(key).cloned().unwrap_or(Value::Nil)
    }

    /// Read a string-keyed entry
    pub fn get_str(&self, key: &str) -> Value {
        self.get(&TableKey::String(Rc::from(key)))
    }

    /// Write an entry without metamethods; assigning nil removes it
    pub fn set(&mut self, key: TableKey, value: Value) {
        if let TableKey::Integer(i) = key {
            let len = self.array.len();
            if i >= 1 && (i as usize) <= len {
                self.array[i as usize - 1] = value;
                if i as usize == len {
                    self.trim_array();
                }
                return;
            }
            if i >= 1 && i as usize == len + 1 {
                if value.is_nil() {
                    self.hash.remove(&key);
                } else {
                    self.hash.remove(&key);
                    self.array.push(value);
                    self.migrate_from_hash();
                }
                return;
            }
        }
        if value.is_nil() {
            self.hash.remove(&key);
        } else {
            self.hash.insert(key, value);
        }
    }

    fn trim_array(&mut self) {
        while matches!(self.array.last(), Some(Value::Nil)) {
            self.array.pop();
        }
    }

    fn migrate_from_hash(&mut self) {
        loop {
            let next = TableKey::Integer(self.array.len() as i64 + 1);
            match self.hash.remove(&next) {
                Some(value) => self.array.push(value),
                None => break,
            }
        }
    }

    /// Border of the sequence part
    pub fn len(&self) -> usize {
        self.array.len()
    }

    /// Whether the table has no entries at all
    pub fn is_empty(&self) -> bool {
        self.array.is_empty() && self.hash.is_empty()
    }

    /// Snapshot of all entries, sequence part first
    pub fn pairs(&self) -> Vec<(Value, Value)> {
        let mut entries = Vec::with_capacity(self.array.len() + self.hash.len());
        for (i, value) in self.array.iter().enumerate() {
            if !value.is_nil() {
                entries.push((Value::Integer(i as i64 + 1), value.clone()));
            }
        }
        for (key, value) in &self.hash {
            entries.push((key.to_value(), value.clone()));
        }
        entries
    }

    /// Entry following `key` in traversal order; nil starts the traversal
    ///
    /// Returns None at the end of the traversal or when `key` is not present.
    pub fn next(&self, key: &Value) -> Option<(Value, Value)> {
        let start = match TableKey::from_value(key) {
            None if key.is_nil() => 0,
            None => return None,
            Some(TableKey::Integer(i)) if i >= 1 && (i as usize) <= self.array.len() => i as usize,
            Some(k) => {
                let mut rest = self.hash.iter().skip_while(|(hk, _)| **hk != k);
                rest.next()?;
                return rest.next().map(|(k, v)| (k.to_value(), v.clone()));
            }
        };
        for (i, value) in self.array.iter().enumerate().skip(start) {
            if !value.is_nil() {
                return Some((Value::Integer(i as i64 + 1), value.clone()));
            }
        }
        self.hash.iter().next().map(|(k, v)| (k.to_value(), v.clone()))
    }

    /// Get the metatable reference
    pub fn metatable(&self) -> Option<GcRef> {
        self.metatable
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (Option<&TableKey>, &Value)> + '_ {
        self.array
            .iter()
            .map(|v| (None, v))
            .chain(self.hash.iter().map(|(k, v)| (Some(k), v)))
    }

    /// Drop every entry for which `dead` reports a collected referent
    pub(crate) fn retain_live(&mut self, mode: WeakMode, dead: impl Fn(&Value) -> bool) {
        if mode.values {
            for value in self.array.iter_mut() {
                if dead(value) {
                    *value = Value::Nil;
                }
            }
            self.trim_array();
        }
        self.hash.retain(|key, value| {
            let key_dead = mode.keys && dead(&key.to_value());
            let value_dead = mode.values && dead(value);
            !key_dead && !value_dead
        });
    }
}

/// Native function object
pub struct Function {
    pub(crate) func: NativeFn,
    pub(crate) upvalues: Vec<Value>,
}

impl Function {
    /// Create a function with captured upvalues
    pub fn new(func: NativeFn, upvalues: Vec<Value>) -> Self {
        Self { func, upvalues }
    }

    /// Get the captured upvalues
    pub fn upvalues(&self) -> &[Value] {
        &self.upvalues
    }
}

/// Host payload owned by the collector
pub struct UserData {
    pub(crate) payload: Option<Rc<dyn Any>>,
    pub(crate) type_id: TypeId,
    pub(crate) size: usize,
    pub(crate) metatable: Option<GcRef>,
    pub(crate) user_value: Value,
}

impl UserData {
    /// Wrap a payload of type `T`
    pub fn new<T: 'static>(value: T) -> Self {
        Self {
            payload: Some(Rc::new(value)),
            type_id: TypeId::of::<T>(),
            size: std::mem::size_of::<T>(),
            metatable: None,
            user_value: Value::Nil,
        }
    }

    /// Type of the payload this userdata was created with
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Size in bytes of the payload this userdata was created with
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the payload has already been released by a finalizer
    pub fn is_released(&self) -> bool {
        self.payload.is_none()
    }
}

/// Any object stored in the heap
pub enum Object {
    /// Table object
    Table(Table),
    /// Function object
    Function(Function),
    /// Userdata object
    UserData(UserData),
}

impl Object {
    /// Metatable reference, for objects that can carry one
    pub fn metatable(&self) -> Option<GcRef> {
        match self {
            Object::Table(t) => t.metatable,
            Object::UserData(u) => u.metatable,
            Object::Function(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(i: i64) -> TableKey {
        TableKey::Integer(i)
    }

    #[test]
    fn test_table_sequence_grows_into_array() {
        let mut table = Table::default();
        table.set(key(1), Value::Integer(10));
        table.set(key(2), Value::Integer(20));
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(&key(2)), Value::Integer(20));
    }

    #[test]
    fn test_table_migrates_out_of_order_keys() {
        let mut table = Table::default();
        table.set(key(3), Value::Integer(3));
        table.set(key(2), Value::Integer(2));
        assert_eq!(table.len(), 0);
        table.set(key(1), Value::Integer(1));
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(&key(3)), Value::Integer(3));
    }

    #[test]
    fn test_table_nil_removes_and_trims() {
        let mut table = Table::default();
        table.set(key(1), Value::Integer(1));
        table.set(key(2), Value::Integer(2));
        table.set(key(2), Value::Nil);
        assert_eq!(table.len(), 1);
        table.set(TableKey::String(Rc::from("a")), Value::Boolean(true));
        table.set(TableKey::String(Rc::from("a")), Value::Nil);
        assert_eq!(table.get_str("a"), Value::Nil);
        assert_eq!(table.pairs().len(), 1);
    }

    #[test]
    fn test_table_next_visits_every_entry() {
        let mut table = Table::default();
        table.set(key(1), Value::Integer(10));
        table.set(key(2), Value::Integer(20));
        table.set(TableKey::String(Rc::from("a")), Value::Integer(30));
        table.set(TableKey::String(Rc::from("b")), Value::Integer(40));

        let mut seen = 0;
        let mut cursor = Value::Nil;
        while let Some((k, _)) = table.next(&cursor) {
            seen += 1;
            cursor = k;
        }
        assert_eq!(seen, 4);
        assert!(table.next(&Value::string("missing")).is_none());
    }

    #[test]
    fn test_weak_mode_parse() {
        assert_eq!(WeakMode::parse("v"), WeakMode { keys: false, values: true });
        assert_eq!(WeakMode::parse("kv"), WeakMode { keys: true, values: true });
        assert!(!WeakMode::parse("").is_weak());
    }

    #[test]
    fn test_retain_live_clears_weak_values() {
        let mut table = Table::default();
        let dead = GcRef::new(4, 0);
        table.set(TableKey::String(Rc::from("gone")), Value::Table(dead));
        table.set(TableKey::String(Rc::from("kept")), Value::Integer(1));
        table.retain_live(WeakMode::parse("v"), |v| v.gc_ref() == Some(dead));
        assert_eq!(table.get_str("gone"), Value::Nil);
        assert_eq!(table.get_str("kept"), Value::Integer(1));
    }

    #[test]
    fn test_userdata_records_payload_shape() {
        let ud = UserData::new(7u64);
        assert_eq!(ud.size(), 8);
        assert_eq!(ud.type_id(), TypeId::of::<u64>());
        assert!(!ud.is_released());
    }
}
