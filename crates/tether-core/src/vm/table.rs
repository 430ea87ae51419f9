//! Table access: raw operations, metamethod-aware indexing and metatables

use super::State;
use crate::defaults::MAX_TAG_LOOP;
use crate::object::{Object, Table};
use crate::value::{GcRef, TableKey, Type, Value};
use crate::{VmError, VmResult};

impl State {
    /// Push a new empty table
    pub fn new_table(&self) {
        self.create_table(0, 0);
    }

    /// Push a new table with preallocated array and hash parts
    pub fn create_table(&self, narr: usize, nrec: usize) {
        self.check_gc();
        let mut inner = self.inner.borrow_mut();
        let r = inner.allocate(Object::Table(Table::with_capacity(narr, nrec)));
        inner.stack.push(Value::Table(r));
    }

    // ========================================================================
    // Raw Access
    // ========================================================================

    /// Replace the key on top with `t[key]`, without metamethods
    pub fn raw_get(&self, index: i32) -> VmResult<Type> {
        let mut inner = self.inner.borrow_mut();
        let table = inner.table_ref(index)?;
        let key = inner.stack.pop()?;
        let value = raw_lookup(inner.heap.table(table), &key);
        let t = value.type_of();
        inner.stack.push(value);
        Ok(t)
    }

    /// Push `t[n]`, without metamethods
    pub fn raw_get_i(&self, index: i32, n: i64) -> VmResult<Type> {
        let mut inner = self.inner.borrow_mut();
        let table = inner.table_ref(index)?;
        let value = raw_lookup(inner.heap.table(table), &Value::Integer(n));
        let t = value.type_of();
        inner.stack.push(value);
        Ok(t)
    }

    /// Pop a key and a value (value on top) and store `t[key] = value`,
    /// without metamethods
    pub fn raw_set(&self, index: i32) -> VmResult<()> {
        let table = self.inner.borrow().table_ref(index)?;
        let value = self.pop_value()?;
        let key = self.pop_value()?;
        self.raw_store(table, key, value)
    }

    /// Pop a value and store `t[n] = value`, without metamethods
    pub fn raw_set_i(&self, index: i32, n: i64) -> VmResult<()> {
        let table = self.inner.borrow().table_ref(index)?;
        let value = self.pop_value()?;
        self.raw_store(table, Value::Integer(n), value)
    }

    /// Raw length: sequence border of a table, byte length of a string, or
    /// payload size of a userdata
    pub fn raw_len(&self, index: i32) -> usize {
        let inner = self.inner.borrow();
        match inner.value_at(index) {
            Value::Table(r) => inner.heap.table(r).map_or(0, Table::len),
            Value::String(s) => s.len(),
            Value::UserData(r) => inner.heap.userdata(r).map_or(0, |ud| ud.size),
            _ => 0,
        }
    }

    /// Pop a key and push the next key/value pair of the table at `index`
    ///
    /// Returns false, pushing nothing, when the traversal is over.
    pub fn next(&self, index: i32) -> VmResult<bool> {
        let mut inner = self.inner.borrow_mut();
        let table = inner.table_ref(index)?;
        let key = inner.stack.pop()?;
        let entry = inner.heap.table(table).and_then(|t| t.next(&key));
        match entry {
            Some((k, v)) => {
                inner.stack.push(k);
                inner.stack.push(v);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn raw_store(&self, table: GcRef, key: Value, value: Value) -> VmResult<()> {
        let key = match TableKey::from_value(&key) {
            Some(key) => key,
            None if key.is_nil() => return Err(self.raise_message("index is nil")),
            None => return Err(self.raise_message("index is NaN")),
        };
        let mut inner = self.inner.borrow_mut();
        inner
            .heap
            .table_mut(table)
            .ok_or(VmError::DanglingReference)?
            .set(key, value);
        Ok(())
    }

    // ========================================================================
    // Metamethod-aware Access
    // ========================================================================

    /// Replace the key on top with `t[key]`, honoring `__index`
    pub fn get_table(&self, index: i32) -> VmResult<Type> {
        let object = self.value(index);
        let key = self.pop_value()?;
        self.index_and_push(object, key)
    }

    /// Push `t[name]`, honoring `__index`
    pub fn get_field(&self, index: i32, name: &str) -> VmResult<Type> {
        let object = self.value(index);
        self.index_and_push(object, Value::string(name))
    }

    /// Pop a key and a value (value on top) and store `t[key] = value`,
    /// honoring `__newindex`
    pub fn set_table(&self, index: i32) -> VmResult<()> {
        let object = self.value(index);
        let value = self.pop_value()?;
        let key = self.pop_value()?;
        self.assign(object, key, value)
    }

    /// Pop a value and store `t[name] = value`, honoring `__newindex`
    pub fn set_field(&self, index: i32, name: &str) -> VmResult<()> {
        let object = self.value(index);
        let value = self.pop_value()?;
        self.assign(object, Value::string(name), value)
    }

    fn index_and_push(&self, object: Value, key: Value) -> VmResult<Type> {
        let value = self.index(object, key)?;
        let t = value.type_of();
        self.push_raw(value);
        Ok(t)
    }

    fn index(&self, mut object: Value, key: Value) -> VmResult<Value> {
        for _ in 0..MAX_TAG_LOOP {
            let handler = {
                let inner = self.inner.borrow();
                let handler = inner.metafield(&object, "__index");
                match &object {
                    Value::Table(r) => {
                        let raw = raw_lookup(inner.heap.table(*r), &key);
                        if !raw.is_nil() || handler.is_nil() {
                            return Ok(raw);
                        }
                    }
                    other if handler.is_nil() => {
                        let message = format!("attempt to index a {} value", other.type_name());
                        drop(inner);
                        return Err(self.raise_message(&message));
                    }
                    _ => {}
                }
                handler
            };
            if let Value::Function(_) = handler {
                self.push_raw(handler);
                self.push_raw(object);
                self.push_raw(key);
                self.call(2, 1)?;
                return self.pop_value();
            }
            object = handler;
        }
        Err(self.raise_message("'__index' chain too long; possible loop"))
    }

    fn assign(&self, mut object: Value, key: Value, value: Value) -> VmResult<()> {
        for _ in 0..MAX_TAG_LOOP {
            let handler = {
                let inner = self.inner.borrow();
                let handler = inner.metafield(&object, "__newindex");
                match &object {
                    Value::Table(r) => {
                        let table = *r;
                        if handler.is_nil() || !raw_lookup(inner.heap.table(table), &key).is_nil() {
                            drop(inner);
                            return self.raw_store(table, key, value);
                        }
                    }
                    other if handler.is_nil() => {
                        let message = format!("attempt to index a {} value", other.type_name());
                        drop(inner);
                        return Err(self.raise_message(&message));
                    }
                    _ => {}
                }
                handler
            };
            if let Value::Function(_) = handler {
                self.push_raw(handler);
                self.push_raw(object);
                self.push_raw(key);
                self.push_raw(value);
                return self.call(3, 0);
            }
            object = handler;
        }
        Err(self.raise_message("'__newindex' chain too long; possible loop"))
    }

    // ========================================================================
    // Metatables
    // ========================================================================

    /// Pop a table (or nil) and make it the metatable of the value at `index`
    pub fn set_metatable(&self, index: i32) -> VmResult<()> {
        let target = self.value(index);
        let metatable = match self.pop_value()? {
            Value::Table(r) => Some(r),
            Value::Nil => None,
            other => {
                return Err(VmError::TypeError(format!(
                    "nil or table expected, got {}",
                    other.type_name()
                )))
            }
        };
        let mut inner = self.inner.borrow_mut();
        match target {
            Value::Table(r) => {
                inner.heap.table_mut(r).ok_or(VmError::DanglingReference)?.metatable = metatable;
            }
            Value::UserData(r) => {
                inner.heap.userdata_mut(r).ok_or(VmError::DanglingReference)?.metatable = metatable;
            }
            other => {
                return Err(VmError::TypeError(format!(
                    "cannot set the metatable of a {} value",
                    other.type_name()
                )))
            }
        }
        Ok(())
    }

    /// Push the metatable of the value at `index`; returns false, pushing
    /// nothing, when it has none
    pub fn get_metatable(&self, index: i32) -> bool {
        let mut inner = self.inner.borrow_mut();
        let value = inner.value_at(index);
        match inner.metatable_of(&value) {
            Some(mt) => {
                inner.stack.push(Value::Table(mt));
                true
            }
            None => false,
        }
    }

    /// Push the field `name` of the metatable of the value at `index`
    ///
    /// Returns [`Type::Nil`], pushing nothing, when there is no such field.
    pub fn get_metafield(&self, index: i32, name: &str) -> Type {
        let mut inner = self.inner.borrow_mut();
        let value = inner.value_at(index);
        let field = inner.metafield(&value, name);
        let t = field.type_of();
        if t != Type::Nil {
            inner.stack.push(field);
        }
        t
    }
}

fn raw_lookup(table: Option<&Table>, key: &Value) -> Value {
    match (table, TableKey::from_value(key)) {
        (Some(table), Some(key)) => table.get(&key),
        _ => Value::Nil,
    }
}
