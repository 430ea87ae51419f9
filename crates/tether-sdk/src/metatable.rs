//! Wrapping host objects as script values
//!
//! A host type implementing [`Class`] gets one metatable, registered under
//! [`Class::NAME`], that tags its instances, dispatches members and drops the
//! host object when the script value is finalized.
//!
//! Instances are shared: the userdata owns an `Rc<T>` and a weak-valued
//! wrapper table maps each allocation to its live script value, so pushing
//! the same `Rc<T>` twice yields the same userdata. Either side may outlive
//! the other.
//!
//! ```ignore
//! struct Counter { value: Cell<i64> }
//!
//! impl Class for Counter {
//!     const NAME: &'static str = "Counter";
//!
//!     fn build_metatable(state: &State, metatable: i32) -> BindResult<()> {
//!         raw_set(state, metatable, ("bump", native(|c: Rc<Counter>| c.value.set(c.value.get() + 1))))
//!     }
//! }
//!
//! let counter = MetaTable::<Counter>::new_instance(&state, Counter { value: Cell::new(0) })?;
//! ```

use crate::convert::{FromStack, IntoStack};
use crate::error::BindResult;
use crate::index;
use crate::stack::StackGuard;
use crate::table::push_weak_table;
use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::marker::PhantomData;
use std::mem;
use std::rc::Rc;
use tether_core::defaults::MAX_TAG_LOOP;
use tether_core::{State, Type, VmResult};

/// Registry name of the table mapping host allocations to their wrappers
pub const WRAPPER_TABLE: &str = "tether.internal.wrappertable";

const UPCAST_KEY: &str = "__upcast";

/// A host type exposed to scripts
pub trait Class: 'static {
    /// Metatable name, also used in conversion diagnostics
    const NAME: &'static str;

    /// Install methods and properties into the freshly created metatable
    /// at `metatable`
    fn build_metatable(state: &State, metatable: i32) -> BindResult<()> {
        let _ = (state, metatable);
        Ok(())
    }
}

/// `Self` derives from the class `B`
///
/// Lets an instance of `Self` be passed where a `B` is expected.
pub trait Inherits<B: Class>: Class {
    /// The base part of `this`
    fn upcast(this: &Rc<Self>) -> Rc<B>;
}

/// Userdata payload of a wrapped object
struct Instance {
    object: Rc<dyn Any>,
}

/// Converts an object of a class to an object of its direct base
struct Upcast(fn(Rc<dyn Any>) -> Option<Rc<dyn Any>>);

fn upcast_to<T: Inherits<B>, B: Class>(object: Rc<dyn Any>) -> Option<Rc<dyn Any>> {
    let derived = object.downcast::<T>().ok()?;
    let base: Rc<dyn Any> = T::upcast(&derived);
    Some(base)
}

/// `__gc` handler of class metatables
fn finalize(state: &State) -> VmResult<usize> {
    let payload = state.take_userdata(1);
    drop(payload);
    Ok(0)
}

/// Class metatable operations for `T`
pub struct MetaTable<T>(PhantomData<T>);

impl<T: Class> MetaTable<T> {
    /// Push the metatable of `T`, creating it on first use
    ///
    /// Returns true when it was created.
    pub fn push(state: &State) -> BindResult<bool> {
        let created = state.new_metatable(T::NAME)?;
        if created {
            finish_metatable(state, T::NAME, |metatable| {
                install_handlers(state, metatable)?;
                T::build_metatable(state, metatable)
            })?;
            tracing::debug!(target: "tether::class", class = T::NAME, "class metatable created");
        }
        Ok(created)
    }

    /// Push the metatable of `T` as a subclass of `B`, creating it on first
    /// use
    ///
    /// The base metatable is created too when needed. Lookups that miss on
    /// `T` continue on `B`.
    pub fn push_with_base<B: Class>(state: &State) -> BindResult<bool>
    where
        T: Inherits<B>,
    {
        let created = state.new_metatable(T::NAME)?;
        if created {
            finish_metatable(state, T::NAME, |metatable| {
                install_handlers(state, metatable)?;

                MetaTable::<B>::push(state)?;
                state.push_string(index::SUPER_KEY);
                state.push_value(-2);
                state.raw_set(metatable)?;
                state.new_table();
                state.insert(-2)?;
                state.set_field(-2, "__index")?;
                state.set_metatable(metatable)?;

                state.push_string(UPCAST_KEY);
                state.new_userdata(Upcast(upcast_to::<T, B>));
                state.raw_set(metatable)?;

                T::build_metatable(state, metatable)
            })?;
            tracing::debug!(target: "tether::class", class = T::NAME, base = B::NAME, "class inherits");
        }
        Ok(created)
    }

    /// Wrap a new host object, push its script value and return the shared
    /// handle
    pub fn new_instance(state: &State, value: T) -> BindResult<Rc<T>> {
        let object = Rc::new(value);
        Self::push_instance(state, object.clone())?;
        Ok(object)
    }

    /// Push the script value of `object`, wrapping it if it has none
    ///
    /// On failure nothing is pushed.
    pub fn push_instance(state: &State, object: Rc<T>) -> BindResult<()> {
        let top = state.get_top();
        let result = Self::wrap(state, object);
        if result.is_err() {
            state.set_top(top);
        }
        result
    }

    fn wrap(state: &State, object: Rc<T>) -> BindResult<()> {
        let key = Rc::as_ptr(&object) as *const () as usize;
        push_weak_table(state, WRAPPER_TABLE, "v")?;
        state.push_light_userdata(key);
        if state.raw_get(-2)? == Type::UserData {
            state.remove(-2)?;
            return Ok(());
        }
        state.pop(1)?;

        state.new_userdata(Instance { object });
        if state.get_named_metatable(T::NAME) != Type::Table {
            state.pop(1)?;
            Self::push(state)?;
        }
        state.set_metatable(-2)?;
        state.push_light_userdata(key);
        state.push_value(-2);
        state.raw_set(-4)?;
        state.remove(-2)?;
        tracing::trace!(target: "tether::class", class = T::NAME, "host object wrapped");
        Ok(())
    }

    /// Whether the metatable at `index` is the metatable of `T` or of a
    /// class derived from it
    pub fn is_base_of(state: &State, index: i32) -> bool {
        let _guard = StackGuard::new(state);
        state.push_value(index);
        for _ in 0..MAX_TAG_LOOP {
            if state.type_of(-1) != Type::Table {
                return false;
            }
            state.push_string("__name");
            if state.raw_get(-2).is_err() {
                return false;
            }
            if state.to_string(-1).as_deref() == Some(T::NAME) {
                return true;
            }
            state.pop(1).ok();
            state.push_string(index::SUPER_KEY);
            if state.raw_get(-2).is_err() || state.replace(-2).is_err() {
                return false;
            }
        }
        false
    }
}

/// Complete a metatable that was just registered under `name` and sits on
/// top of the stack
///
/// The stack ends at the metatable. If `build` fails the registration is
/// withdrawn and the metatable popped, so the next use starts over.
fn finish_metatable(
    state: &State,
    name: &str,
    build: impl FnOnce(i32) -> BindResult<()>,
) -> BindResult<()> {
    let metatable = state.get_top();
    if let Err(err) = build(metatable) {
        state.set_top(metatable - 1);
        state.push_nil();
        state.set_named(name)?;
        tracing::debug!(target: "tether::class", class = name, error = %err, "class metatable withdrawn");
        return Err(err);
    }
    state.set_top(metatable);
    Ok(())
}

fn install_handlers(state: &State, metatable: i32) -> BindResult<()> {
    state.push_string("__gc");
    state.push_function(finalize);
    state.raw_set(metatable)?;

    state.push_string("__index");
    state.push_value(metatable);
    state.push_closure(index::lookup, 1);
    state.raw_set(metatable)?;

    state.push_string("__newindex");
    state.push_value(metatable);
    state.push_closure(index::assign, 1);
    state.raw_set(metatable)?;
    Ok(())
}

/// Create a wrapped host object on the stack
pub fn new_userdata<T: Class>(state: &State, value: T) -> BindResult<Rc<T>> {
    MetaTable::<T>::new_instance(state, value)
}

/// The host object of class `T` (or derived from it) at `index`
///
/// Checks the payload type and size before following the metatable chain,
/// so a userdata that was not created by [`MetaTable`] never converts.
pub fn to_instance<T: Class>(state: &State, index: i32) -> Option<Rc<T>> {
    let (type_id, size) = state.userdata_info(index)?;
    if type_id != TypeId::of::<Instance>() || size != mem::size_of::<Instance>() {
        return None;
    }
    let instance = state.userdata(index)?.downcast::<Instance>().ok()?;
    let mut object = instance.object.clone();

    let _guard = StackGuard::new(state);
    if !state.get_metatable(index) {
        return None;
    }
    for _ in 0..MAX_TAG_LOOP {
        state.push_string("__name");
        state.raw_get(-2).ok()?;
        let matches = state.to_string(-1).as_deref() == Some(T::NAME);
        state.pop(1).ok()?;
        if matches {
            return object.downcast::<T>().ok();
        }

        state.push_string(UPCAST_KEY);
        state.raw_get(-2).ok()?;
        let upcast = state.userdata(-1)?.downcast::<Upcast>().ok()?;
        state.pop(1).ok()?;
        object = (upcast.0)(object)?;

        state.push_string(index::SUPER_KEY);
        if state.raw_get(-2).ok()? != Type::Table {
            return None;
        }
        state.replace(-2).ok()?;
    }
    None
}

impl<T: Class> IntoStack for Rc<T> {
    fn push_to(self, state: &State) {
        if let Err(err) = MetaTable::<T>::push_instance(state, self) {
            tracing::warn!(target: "tether::class", class = T::NAME, error = %err, "failed to wrap host object");
            state.push_nil();
        }
    }
}

impl<T: Class> FromStack for Rc<T> {
    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed(T::NAME)
    }

    fn from_stack(state: &State, index: i32) -> Option<Self> {
        to_instance::<T>(state, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::to;
    use std::cell::Cell;

    struct Base {
        id: i64,
    }

    impl Class for Base {
        const NAME: &'static str = "Base";
    }

    struct Derived {
        base: Rc<Base>,
    }

    impl Class for Derived {
        const NAME: &'static str = "Derived";
    }

    impl Inherits<Base> for Derived {
        fn upcast(this: &Rc<Self>) -> Rc<Base> {
            this.base.clone()
        }
    }

    struct Broken;

    impl Class for Broken {
        const NAME: &'static str = "Broken";

        fn build_metatable(state: &State, metatable: i32) -> BindResult<()> {
            state.push_nil();
            state.push_integer(1);
            state.raw_set(metatable)?;
            Ok(())
        }
    }

    struct BrokenChild;

    impl Class for BrokenChild {
        const NAME: &'static str = "BrokenChild";
    }

    impl Inherits<Broken> for BrokenChild {
        fn upcast(_this: &Rc<Self>) -> Rc<Broken> {
            Rc::new(Broken)
        }
    }

    #[test]
    fn test_failed_build_withdraws_class() {
        let state = State::new();
        state.push_integer(1);
        assert!(MetaTable::<Broken>::push(&state).is_err());
        assert_eq!(state.get_top(), 1);
        assert_eq!(state.get_named_metatable("Broken"), Type::Nil);
        state.pop(1).unwrap();
        assert_eq!(state.get_top(), 1);

        assert!(MetaTable::<Broken>::push(&state).is_err());
        assert_eq!(state.get_top(), 1);

        assert!(MetaTable::<BrokenChild>::push_with_base::<Broken>(&state).is_err());
        assert_eq!(state.get_top(), 1);
        assert_eq!(state.get_named_metatable("BrokenChild"), Type::Nil);
        state.pop(1).unwrap();
    }

    #[test]
    fn test_failed_wrap_pushes_single_nil() {
        let state = State::new();
        state.push_integer(1);
        assert!(MetaTable::<Broken>::new_instance(&state, Broken).is_err());
        assert_eq!(state.get_top(), 1);

        Rc::new(Broken).push_to(&state);
        assert_eq!(state.get_top(), 2);
        assert!(state.is_nil(2));
        assert_eq!(state.to_integer(1), Some(1));
    }

    #[test]
    fn test_metatable_created_once() {
        let state = State::new();
        assert!(MetaTable::<Base>::push(&state).unwrap());
        assert!(!MetaTable::<Base>::push(&state).unwrap());
        assert!(state.raw_equal(1, 2));
        assert_eq!(state.get_top(), 2);
    }

    #[test]
    fn test_instance_identity() {
        let state = State::new();
        let object = MetaTable::<Base>::new_instance(&state, Base { id: 1 }).unwrap();
        object.clone().push_to(&state);
        assert!(state.raw_equal(1, 2));
        assert_eq!(to::<Rc<Base>>(&state, 1).map(|b| b.id), Some(1));
    }

    #[test]
    fn test_derived_converts_to_base_only() {
        let state = State::new();
        MetaTable::<Derived>::push_with_base::<Base>(&state).unwrap();
        state.pop(1).unwrap();
        MetaTable::<Derived>::new_instance(
            &state,
            Derived {
                base: Rc::new(Base { id: 7 }),
            },
        )
        .unwrap();
        MetaTable::<Base>::new_instance(&state, Base { id: 8 }).unwrap();

        assert_eq!(to::<Rc<Base>>(&state, 1).map(|b| b.id), Some(7));
        assert!(to::<Rc<Derived>>(&state, 1).is_some());
        assert!(to::<Rc<Derived>>(&state, 2).is_none());
        assert_eq!(state.get_top(), 2);

        state.get_metatable(1);
        assert!(MetaTable::<Base>::is_base_of(&state, -1));
        assert!(MetaTable::<Derived>::is_base_of(&state, -1));
        state.get_metatable(2);
        assert!(!MetaTable::<Derived>::is_base_of(&state, -1));
    }

    #[test]
    fn test_foreign_userdata_is_rejected() {
        let state = State::new();
        state.new_userdata(5u32);
        MetaTable::<Base>::push(&state).unwrap();
        state.set_metatable(1).unwrap();
        assert!(to::<Rc<Base>>(&state, 1).is_none());
    }

    #[test]
    fn test_collection_drops_host_object() {
        struct Tracked(Rc<Cell<bool>>);
        impl Class for Tracked {
            const NAME: &'static str = "Tracked";
        }
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.set(true);
            }
        }

        let dropped = Rc::new(Cell::new(false));
        let state = State::new();
        let object = MetaTable::<Tracked>::new_instance(&state, Tracked(dropped.clone())).unwrap();
        state.pop(1).unwrap();
        state.collect_garbage();
        assert!(!dropped.get());

        drop(object);
        assert!(dropped.get());
    }
}
