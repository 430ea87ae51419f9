//! Member dispatch for wrapped objects
//!
//! Every class metatable gets an `__index` and a `__newindex` handler that
//! capture the metatable. Reading `object[key]` looks, for each class from
//! the object's own up to its root base:
//!
//! 1. at the raw metatable entry (methods and constants)
//! 2. at the `__properties` table, whose [`MemberHolder`]s run host accessors
//! 3. at `__super`, the base class metatable
//!
//! and finally at the object's custom data table. Writing skips step 1 and
//! stores unknown keys in the custom data table, which is the userdata's
//! user value and is created on first use.

use crate::convert::{FromStack, IntoStack};
use crate::error::BindResult;
use crate::metatable::{to_instance, Class};
use std::borrow::Cow;
use std::rc::Rc;
use tether_core::defaults::MAX_TAG_LOOP;
use tether_core::{State, Type, VmResult};

/// Metatable field holding the property table
pub const PROPERTIES_KEY: &str = "__properties";

/// Metatable field holding the base class metatable
pub const SUPER_KEY: &str = "__super";

/// Custom data field holding cached member values
pub const MEMBERS_KEY: &str = "__members";

// ============================================================================
// Custom Data
// ============================================================================

/// Push the custom data table of the userdata at `index`, creating it if
/// needed
pub fn push_custom_data_table(state: &State, index: i32) -> BindResult<()> {
    let index = state.abs_index(index);
    if state.get_user_value(index) == Type::Table {
        return Ok(());
    }
    state.pop(1)?;
    state.new_table();
    state.push_value(-1);
    state.set_user_value(index)?;
    Ok(())
}

/// Push the table stored under `key` in the custom data of the userdata at
/// `owner`, creating both if needed
pub fn push_refs_table(state: &State, key: &str, owner: i32) -> BindResult<()> {
    let owner = state.abs_index(owner);
    push_custom_data_table(state, owner)?;
    state.push_string(key);
    if state.raw_get(-2)? == Type::Table {
        state.remove(-2)?;
        return Ok(());
    }
    state.pop(1)?;
    state.new_table();
    state.push_string(key);
    state.push_value(-2);
    state.raw_set(-4)?;
    state.remove(-2)?;
    Ok(())
}

// ============================================================================
// Properties
// ============================================================================

/// Whether a property's script value is cached on the object
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RefMode {
    /// Always call the getter
    #[default]
    Never,
    /// Never call the getter; reads return the last assigned script value,
    /// which the object keeps alive
    Always,
    /// Call the getter once and cache what it returned
    FirstGet,
}

type Getter<T> = Rc<dyn Fn(&State, &T)>;
type Setter<T> = Rc<dyn Fn(&State, &T, i32) -> bool>;

/// Host accessors for one property of class `T`
pub struct Property<T> {
    getter: Option<Getter<T>>,
    setter: Option<Setter<T>>,
    value_type: Cow<'static, str>,
    ref_mode: RefMode,
}

impl<T: Class> Property<T> {
    /// Property that scripts can read but not assign
    pub fn read_only<V, G>(getter: G) -> Self
    where
        V: IntoStack,
        G: Fn(&T) -> V + 'static,
    {
        Self {
            getter: Some(Rc::new(move |state: &State, object: &T| getter(object).push_to(state))),
            setter: None,
            value_type: Cow::Borrowed("value"),
            ref_mode: RefMode::Never,
        }
    }

    /// Property with a getter and a setter
    pub fn read_write<V, G, S>(getter: G, setter: S) -> Self
    where
        V: IntoStack + FromStack,
        G: Fn(&T) -> V + 'static,
        S: Fn(&T, V) + 'static,
    {
        Self {
            getter: Some(Rc::new(move |state: &State, object: &T| getter(object).push_to(state))),
            setter: Some(convert_setter(setter)),
            value_type: V::type_name(),
            ref_mode: RefMode::Never,
        }
    }

    /// Property whose assigned script value is kept on the object and read
    /// back as is
    ///
    /// The setter still receives the converted value, which makes this the
    /// natural fit for script callbacks stored by the host.
    pub fn stored<V, S>(setter: S) -> Self
    where
        V: FromStack,
        S: Fn(&T, V) + 'static,
    {
        Self {
            getter: None,
            setter: Some(convert_setter(setter)),
            value_type: V::type_name(),
            ref_mode: RefMode::Always,
        }
    }

    /// Change the caching mode
    pub fn with_ref_mode(mut self, ref_mode: RefMode) -> Self {
        self.ref_mode = ref_mode;
        self
    }

    fn receiver(state: &State, access: &'static str) -> Option<Rc<T>> {
        let object = to_instance::<T>(state, 1);
        if object.is_none() {
            tracing::debug!(
                target: "tether::class",
                class = T::NAME,
                access,
                receiver = state.type_name(1),
                "property accessed on a foreign value"
            );
        }
        object
    }
}

fn convert_setter<T, V, S>(setter: S) -> Setter<T>
where
    T: 'static,
    V: FromStack,
    S: Fn(&T, V) + 'static,
{
    Rc::new(move |state: &State, object: &T, index: i32| match V::from_stack(state, index) {
        Some(value) => {
            setter(object, value);
            true
        }
        None => false,
    })
}

/// Type-erased property accessors, run with the object at 1 and the key
/// at 2 (and the assigned value at 3)
pub trait Member {
    /// Push the property value
    fn index(&self, state: &State) -> VmResult<usize>;

    /// Assign the property
    fn new_index(&self, state: &State) -> VmResult<usize>;
}

impl<T: Class> Member for Property<T> {
    fn index(&self, state: &State) -> VmResult<usize> {
        let Some(object) = Self::receiver(state, "get") else {
            state.push_nil();
            return Ok(1);
        };

        if self.ref_mode != RefMode::Never {
            push_refs_table(state, MEMBERS_KEY, 1).map_err(|e| e.into_vm(state))?;
            state.push_value(2);
            let cached = state.raw_get(-2)?;
            if cached != Type::Nil || self.ref_mode == RefMode::Always {
                return Ok(1);
            }
            state.pop(1)?;
        }

        match &self.getter {
            Some(getter) => getter(state, &object),
            None => state.push_nil(),
        }
        if self.ref_mode == RefMode::FirstGet {
            state.push_value(2);
            state.push_value(-2);
            state.raw_set(-4)?;
        }
        Ok(1)
    }

    fn new_index(&self, state: &State) -> VmResult<usize> {
        let Some(object) = Self::receiver(state, "set") else {
            return Ok(0);
        };
        let Some(setter) = &self.setter else {
            return Err(state.raise_message("unaccepted assignment"));
        };
        if !setter(state, &object, 3) {
            let message = format!("error converting {} to {}", state.type_name(3), self.value_type);
            return Err(state.raise_message(&message));
        }
        if self.ref_mode == RefMode::Always {
            push_refs_table(state, MEMBERS_KEY, 1).map_err(|e| e.into_vm(state))?;
            state.push_value(2);
            state.push_value(3);
            state.raw_set(-3)?;
            state.pop(1)?;
        }
        Ok(0)
    }
}

/// Userdata payload carrying one property's accessors
pub struct MemberHolder {
    member: Rc<dyn Member>,
}

impl MemberHolder {
    /// Wrap a property
    pub fn new<T: Class>(property: Property<T>) -> Self {
        Self {
            member: Rc::new(property),
        }
    }
}

/// Register `members` in the property table of the metatable at `metatable`
pub fn raw_set_property<T: Class>(
    state: &State,
    metatable: i32,
    members: Vec<(&str, Property<T>)>,
) -> BindResult<()> {
    let metatable = state.abs_index(metatable);
    state.push_string(PROPERTIES_KEY);
    if state.raw_get(metatable)? != Type::Table {
        state.pop(1)?;
        state.new_table();
        state.push_string(PROPERTIES_KEY);
        state.push_value(-2);
        state.raw_set(metatable)?;
    }
    for (name, property) in members {
        state.push_string(name);
        state.new_userdata(MemberHolder::new(property));
        state.raw_set(-3)?;
    }
    state.pop(1)?;
    Ok(())
}

fn member_at(state: &State, metatable: i32, key: i32) -> VmResult<Option<Rc<dyn Member>>> {
    let top = state.get_top();
    state.push_string(PROPERTIES_KEY);
    let mut member = None;
    if state.raw_get(metatable)? == Type::Table {
        state.push_value(key);
        state.raw_get(-2)?;
        member = state
            .userdata(-1)
            .and_then(|payload| payload.downcast::<MemberHolder>().ok())
            .map(|holder| holder.member.clone());
    }
    state.set_top(top);
    Ok(member)
}

// ============================================================================
// Handlers
// ============================================================================

/// `__index` handler of class metatables; upvalue 1 is the class metatable
pub(crate) fn lookup(state: &State) -> VmResult<usize> {
    state.set_top(2);
    state.push_upvalue(1);
    for _ in 0..MAX_TAG_LOOP {
        state.push_value(2);
        if state.raw_get(3)? != Type::Nil {
            return Ok(1);
        }
        state.pop(1)?;

        if let Some(member) = member_at(state, 3, 2)? {
            state.set_top(2);
            return member.index(state);
        }

        state.push_string(SUPER_KEY);
        if state.raw_get(3)? != Type::Table {
            state.set_top(2);
            if state.get_user_value(1) == Type::Table {
                state.push_value(2);
                state.raw_get(-2)?;
            }
            return Ok(1);
        }
        state.replace(3)?;
    }
    Err(state.raise_message("'__index' chain too long; possible loop"))
}

/// `__newindex` handler of class metatables; upvalue 1 is the class
/// metatable
pub(crate) fn assign(state: &State) -> VmResult<usize> {
    state.set_top(3);
    state.push_upvalue(1);
    for _ in 0..MAX_TAG_LOOP {
        if let Some(member) = member_at(state, 4, 2)? {
            state.set_top(3);
            return member.new_index(state);
        }

        state.push_string(SUPER_KEY);
        if state.raw_get(4)? != Type::Table {
            state.set_top(3);
            push_custom_data_table(state, 1).map_err(|e| e.into_vm(state))?;
            state.push_value(2);
            state.push_value(3);
            state.raw_set(-3)?;
            return Ok(0);
        }
        state.replace(4)?;
    }
    Err(state.raise_message("'__newindex' chain too long; possible loop"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Gauge {
        level: Cell<i64>,
    }

    impl Class for Gauge {
        const NAME: &'static str = "Gauge";
    }

    fn level() -> Property<Gauge> {
        Property::read_write(|g: &Gauge| g.level.get(), |g: &Gauge, v: i64| g.level.set(v))
    }

    #[test]
    fn test_property_on_foreign_receiver() {
        let state = State::new();
        state.new_table();
        state.push_string("level");
        assert_eq!(level().index(&state).unwrap(), 1);
        assert!(state.is_nil(-1));

        state.set_top(2);
        state.push_integer(5);
        assert_eq!(level().new_index(&state).unwrap(), 0);
        assert_eq!(state.get_top(), 3);
    }
}
