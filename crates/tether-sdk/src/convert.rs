//! Conversion between host values and engine stack values
//!
//! [`IntoStack`] pushes a host value as one or more stack slots and
//! [`FromStack`] reads one back. Both are resolved at compile time, so a
//! bound function's argument list becomes a fixed sequence of converters.
//!
//! Composite conversions (tuples, containers) go left to right and stop at the
//! first failure; whatever was converted before is discarded.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;
use std::rc::Rc;
use tether_core::{State, Type, Value, VmResult};

// ============================================================================
// Traits
// ============================================================================

/// Push a host value onto the engine stack
///
/// Pushing cannot fail: every implementation writes exactly [`Self::COUNT`]
/// slots.
pub trait IntoStack {
    /// Number of slots written
    const COUNT: usize = 1;

    /// Push `self` onto the stack
    fn push_to(self, state: &State);
}

/// Read a host value from the engine stack
pub trait FromStack: Sized {
    /// Number of slots read
    const COUNT: usize = 1;

    /// Name used in conversion diagnostics
    fn type_name() -> Cow<'static, str>;

    /// Convert the value(s) starting at `index`; the stack is left untouched
    fn from_stack(state: &State, index: i32) -> Option<Self>;

    /// The first slot that does not convert, as an absolute index, with the
    /// type expected there
    fn mismatch(state: &State, index: i32) -> Option<(i32, Cow<'static, str>)> {
        match Self::from_stack(state, index) {
            Some(_) => None,
            None => Some((state.abs_index(index), Self::type_name())),
        }
    }
}

// ============================================================================
// Primitives
// ============================================================================

/// Placeholder for the script `nil`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Nil;

impl IntoStack for Nil {
    fn push_to(self, state: &State) {
        state.push_nil();
    }
}

impl FromStack for Nil {
    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("nil")
    }

    fn from_stack(state: &State, index: i32) -> Option<Self> {
        (state.type_of(index) == Type::Nil).then_some(Nil)
    }
}

impl IntoStack for () {
    const COUNT: usize = 0;

    fn push_to(self, _state: &State) {}
}

impl FromStack for () {
    const COUNT: usize = 0;

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("nothing")
    }

    fn from_stack(_state: &State, _index: i32) -> Option<Self> {
        Some(())
    }
}

impl IntoStack for bool {
    fn push_to(self, state: &State) {
        state.push_boolean(self);
    }
}

impl FromStack for bool {
    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("boolean")
    }

    fn from_stack(state: &State, index: i32) -> Option<Self> {
        match state.value(index) {
            Value::Boolean(b) => Some(b),
            _ => None,
        }
    }
}

macro_rules! impl_integer {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoStack for $ty {
                fn push_to(self, state: &State) {
                    state.push_integer(i64::from(self));
                }
            }

            impl FromStack for $ty {
                fn type_name() -> Cow<'static, str> {
                    Cow::Borrowed("integer")
                }

                fn from_stack(state: &State, index: i32) -> Option<Self> {
                    state.to_integer(index).and_then(|n| <$ty>::try_from(n).ok())
                }
            }
        )*
    };
}

impl_integer!(i8, i16, i32, i64, u8, u16, u32);

impl IntoStack for isize {
    fn push_to(self, state: &State) {
        state.push_integer(self as i64);
    }
}

impl FromStack for isize {
    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("integer")
    }

    fn from_stack(state: &State, index: i32) -> Option<Self> {
        state.to_integer(index).and_then(|n| isize::try_from(n).ok())
    }
}

// Unsigned 64-bit values are stored in the integer's bit pattern, so values
// above `i64::MAX` read back as negative integers from script code.
macro_rules! impl_wide_unsigned {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoStack for $ty {
                fn push_to(self, state: &State) {
                    state.push_integer(self as u64 as i64);
                }
            }

            impl FromStack for $ty {
                fn type_name() -> Cow<'static, str> {
                    Cow::Borrowed("integer")
                }

                fn from_stack(state: &State, index: i32) -> Option<Self> {
                    state.to_integer(index).and_then(|n| <$ty>::try_from(n as u64).ok())
                }
            }
        )*
    };
}

impl_wide_unsigned!(u64, usize);

macro_rules! impl_float {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoStack for $ty {
                fn push_to(self, state: &State) {
                    state.push_number(self as f64);
                }
            }

            impl FromStack for $ty {
                fn type_name() -> Cow<'static, str> {
                    Cow::Borrowed("number")
                }

                fn from_stack(state: &State, index: i32) -> Option<Self> {
                    state.to_number(index).map(|n| n as $ty)
                }
            }
        )*
    };
}

impl_float!(f32, f64);

impl IntoStack for &str {
    fn push_to(self, state: &State) {
        state.push_string(self);
    }
}

impl IntoStack for String {
    fn push_to(self, state: &State) {
        state.push_string(&self);
    }
}

impl IntoStack for &String {
    fn push_to(self, state: &State) {
        state.push_string(self);
    }
}

impl FromStack for String {
    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("string")
    }

    fn from_stack(state: &State, index: i32) -> Option<Self> {
        state.to_string(index).map(|s| s.to_string())
    }
}

impl IntoStack for Rc<str> {
    fn push_to(self, state: &State) {
        state.push_raw(Value::String(self));
    }
}

impl FromStack for Rc<str> {
    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("string")
    }

    fn from_stack(state: &State, index: i32) -> Option<Self> {
        state.to_string(index)
    }
}

/// Uncollected host token, pushed as a light userdata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LightUserData(pub usize);

impl IntoStack for LightUserData {
    fn push_to(self, state: &State) {
        state.push_light_userdata(self.0);
    }
}

impl FromStack for LightUserData {
    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("lightuserdata")
    }

    fn from_stack(state: &State, index: i32) -> Option<Self> {
        state.to_light_userdata(index).map(LightUserData)
    }
}

/// Raw engine values pass through unchanged
impl IntoStack for Value {
    fn push_to(self, state: &State) {
        state.push_raw(self);
    }
}

impl FromStack for Value {
    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("value")
    }

    fn from_stack(state: &State, index: i32) -> Option<Self> {
        state.is_valid(index).then(|| state.value(index))
    }
}

// ============================================================================
// Containers
// ============================================================================

impl<T: IntoStack> IntoStack for Option<T> {
    const COUNT: usize = T::COUNT;

    fn push_to(self, state: &State) {
        match self {
            Some(value) => value.push_to(state),
            None => {
                for _ in 0..T::COUNT {
                    state.push_nil();
                }
            }
        }
    }
}

/// `None` when the first slot is nil
impl<T: FromStack> FromStack for Option<T> {
    const COUNT: usize = T::COUNT;

    fn type_name() -> Cow<'static, str> {
        T::type_name()
    }

    fn from_stack(state: &State, index: i32) -> Option<Self> {
        if state.is_nil(index) {
            return Some(None);
        }
        T::from_stack(state, index).map(Some)
    }
}

impl<T: IntoStack> IntoStack for Vec<T> {
    fn push_to(self, state: &State) {
        let () = Element::<T>::PUSHES_ONE;
        push_sequence(state, self.len(), self);
    }
}

impl<T: FromStack> FromStack for Vec<T> {
    fn type_name() -> Cow<'static, str> {
        Cow::Owned(format!("array<{}>", T::type_name()))
    }

    fn from_stack(state: &State, index: i32) -> Option<Self> {
        let () = Element::<T>::READS_ONE;
        let mut out = Vec::new();
        for_each_sequence(state, index, |item| {
            out.push(item);
        })?;
        Some(out)
    }
}

impl<T: IntoStack> IntoStack for BTreeSet<T> {
    fn push_to(self, state: &State) {
        let () = Element::<T>::PUSHES_ONE;
        push_sequence(state, self.len(), self);
    }
}

impl<T: FromStack + Ord> FromStack for BTreeSet<T> {
    fn type_name() -> Cow<'static, str> {
        Cow::Owned(format!("set<{}>", T::type_name()))
    }

    fn from_stack(state: &State, index: i32) -> Option<Self> {
        let () = Element::<T>::READS_ONE;
        let mut out = BTreeSet::new();
        for_each_sequence(state, index, |item| {
            out.insert(item);
        })?;
        Some(out)
    }
}

impl<K: IntoStack, V: IntoStack, S> IntoStack for HashMap<K, V, S> {
    fn push_to(self, state: &State) {
        let ((), ()) = (Element::<K>::PUSHES_ONE, Element::<V>::PUSHES_ONE);
        push_pairs(state, self.len(), self);
    }
}

impl<K, V, S> FromStack for HashMap<K, V, S>
where
    K: FromStack + Eq + Hash,
    V: FromStack,
    S: BuildHasher + Default,
{
    fn type_name() -> Cow<'static, str> {
        Cow::Owned(format!("map<{}, {}>", K::type_name(), V::type_name()))
    }

    fn from_stack(state: &State, index: i32) -> Option<Self> {
        let ((), ()) = (Element::<K>::READS_ONE, Element::<V>::READS_ONE);
        let mut out = HashMap::with_hasher(S::default());
        for_each_pair(state, index, |key, value| {
            out.insert(key, value);
        })?;
        Some(out)
    }
}

impl<K: IntoStack, V: IntoStack> IntoStack for BTreeMap<K, V> {
    fn push_to(self, state: &State) {
        let ((), ()) = (Element::<K>::PUSHES_ONE, Element::<V>::PUSHES_ONE);
        push_pairs(state, self.len(), self);
    }
}

impl<K: FromStack + Ord, V: FromStack> FromStack for BTreeMap<K, V> {
    fn type_name() -> Cow<'static, str> {
        Cow::Owned(format!("map<{}, {}>", K::type_name(), V::type_name()))
    }

    fn from_stack(state: &State, index: i32) -> Option<Self> {
        let ((), ()) = (Element::<K>::READS_ONE, Element::<V>::READS_ONE);
        let mut out = BTreeMap::new();
        for_each_pair(state, index, |key, value| {
            out.insert(key, value);
        })?;
        Some(out)
    }
}

/// Compile-time slot checks for container elements
///
/// A table entry holds one value, so an element type that spans several
/// stack slots (a tuple, `()`) is rejected when the container impl is
/// instantiated.
struct Element<T>(PhantomData<T>);

impl<T: IntoStack> Element<T> {
    const PUSHES_ONE: () = assert!(T::COUNT == 1, "container elements must push exactly one slot");
}

impl<T: FromStack> Element<T> {
    const READS_ONE: () = assert!(T::COUNT == 1, "container elements must read exactly one slot");
}

fn push_sequence<T: IntoStack>(state: &State, len: usize, items: impl IntoIterator<Item = T>) {
    state.create_table(len, 0);
    let table = state.get_top();
    for (i, item) in items.into_iter().enumerate() {
        item.push_to(state);
        store_entry(state, table, state.raw_set_i(table, i as i64 + 1));
    }
}

fn push_pairs<K: IntoStack, V: IntoStack>(
    state: &State,
    len: usize,
    pairs: impl IntoIterator<Item = (K, V)>,
) {
    state.create_table(0, len);
    let table = state.get_top();
    for (key, value) in pairs {
        key.push_to(state);
        value.push_to(state);
        store_entry(state, table, state.raw_set(table));
    }
}

/// Drop a rejected entry (nil or NaN key) and leave the table on top
fn store_entry(state: &State, table: i32, result: VmResult<()>) {
    if let Err(err) = result {
        tracing::debug!(target: "tether::convert", error = %err, "container entry dropped");
        state.set_top(table);
    }
}

/// Visit the values of a sequence table in order
///
/// Fails on a non-table, a key outside `1..=n`, or an element that does not
/// convert. The stack is restored in every case.
fn for_each_sequence<T: FromStack>(state: &State, index: i32, mut visit: impl FnMut(T)) -> Option<()> {
    if state.type_of(index) != Type::Table {
        return None;
    }
    let index = state.abs_index(index);
    let top = state.get_top();
    let mut expected = 1;
    state.push_nil();
    let result = loop {
        match state.next(index) {
            Ok(true) => {}
            Ok(false) => break Some(()),
            Err(_) => break None,
        }
        if state.type_of(-2) != Type::Number || state.to_integer(-2) != Some(expected) {
            break None;
        }
        match T::from_stack(state, -1) {
            Some(item) => visit(item),
            None => break None,
        }
        expected += 1;
        state.set_top(-2);
    };
    state.set_top(top);
    result
}

/// Visit every key/value pair of a table
fn for_each_pair<K: FromStack, V: FromStack>(
    state: &State,
    index: i32,
    mut visit: impl FnMut(K, V),
) -> Option<()> {
    if state.type_of(index) != Type::Table {
        return None;
    }
    let index = state.abs_index(index);
    let top = state.get_top();
    state.push_nil();
    let result = loop {
        match state.next(index) {
            Ok(true) => {}
            Ok(false) => break Some(()),
            Err(_) => break None,
        }
        match (K::from_stack(state, -2), V::from_stack(state, -1)) {
            (Some(key), Some(value)) => visit(key, value),
            _ => break None,
        }
        state.set_top(-2);
    };
    state.set_top(top);
    result
}

// ============================================================================
// Tuples
// ============================================================================

macro_rules! impl_tuple {
    ($($name:ident),+) => {
        impl<$($name: IntoStack),+> IntoStack for ($($name,)+) {
            const COUNT: usize = 0 $(+ $name::COUNT)+;

            #[allow(non_snake_case)]
            fn push_to(self, state: &State) {
                let ($($name,)+) = self;
                $($name.push_to(state);)+
            }
        }

        impl<$($name: FromStack),+> FromStack for ($($name,)+) {
            const COUNT: usize = 0 $(+ $name::COUNT)+;

            fn type_name() -> Cow<'static, str> {
                let names: Vec<Cow<'static, str>> = vec![$($name::type_name()),+];
                Cow::Owned(format!("({})", names.join(", ")))
            }

            #[allow(non_snake_case, unused_assignments)]
            fn from_stack(state: &State, index: i32) -> Option<Self> {
                let mut index = state.abs_index(index);
                $(
                    let $name = $name::from_stack(state, index)?;
                    index += $name::COUNT as i32;
                )+
                Some(($($name,)+))
            }

            #[allow(unused_assignments)]
            fn mismatch(state: &State, index: i32) -> Option<(i32, Cow<'static, str>)> {
                let mut index = state.abs_index(index);
                $(
                    if let Some(found) = $name::mismatch(state, index) {
                        return Some(found);
                    }
                    index += $name::COUNT as i32;
                )+
                None
            }
        }
    };
}

impl_tuple!(A);
impl_tuple!(A, B);
impl_tuple!(A, B, C);
impl_tuple!(A, B, C, D);
impl_tuple!(A, B, C, D, E);
impl_tuple!(A, B, C, D, E, F);
impl_tuple!(A, B, C, D, E, F, G);
impl_tuple!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;

    fn round_trip<T: IntoStack + FromStack>(value: T) -> Option<T> {
        let state = State::new();
        value.push_to(&state);
        let count = <T as FromStack>::COUNT as i32;
        let out = T::from_stack(&state, -count);
        assert_eq!(state.get_top(), count);
        out
    }

    #[test]
    fn test_primitives() {
        assert_eq!(round_trip(42i64), Some(42));
        assert_eq!(round_trip(-7i8), Some(-7));
        assert_eq!(round_trip(2.5f64), Some(2.5));
        assert_eq!(round_trip(true), Some(true));
        assert_eq!(round_trip(String::from("hi")), Some(String::from("hi")));
        assert_eq!(round_trip(Nil), Some(Nil));
    }

    #[test]
    fn test_integer_range_checked() {
        let state = State::new();
        state.push_integer(300);
        assert_eq!(u8::from_stack(&state, 1), None);
        assert_eq!(u16::from_stack(&state, 1), Some(300));
        state.push_integer(-1);
        assert_eq!(u32::from_stack(&state, 2), None);
    }

    #[test]
    fn test_integer_extremes() {
        assert_eq!(round_trip(i64::MAX), Some(i64::MAX));
        assert_eq!(round_trip(i64::MIN), Some(i64::MIN));
        assert_eq!(round_trip(u64::MAX), Some(u64::MAX));
        assert_eq!(round_trip(1u64 << 63), Some(1u64 << 63));
        assert_eq!(round_trip((1u64 << 63) + 1), Some((1u64 << 63) + 1));
        assert_eq!(round_trip(usize::MAX), Some(usize::MAX));
        assert_eq!(round_trip(isize::MIN), Some(isize::MIN));
        assert_eq!(round_trip(u32::MAX), Some(u32::MAX));

        let state = State::new();
        u64::MAX.push_to(&state);
        assert_eq!(state.type_of(1), Type::Number);
        assert_eq!(i64::from_stack(&state, 1), Some(-1));
        assert_eq!(u32::from_stack(&state, 1), None);
    }

    #[test]
    fn test_boolean_is_strict() {
        let state = State::new();
        state.push_integer(1);
        state.push_nil();
        assert_eq!(bool::from_stack(&state, 1), None);
        assert_eq!(bool::from_stack(&state, 2), None);
    }

    #[test]
    fn test_string_coercions() {
        let state = State::new();
        state.push_string("12");
        state.push_integer(3);
        state.push_string("x");
        assert_eq!(i64::from_stack(&state, 1), Some(12));
        assert_eq!(String::from_stack(&state, 2).as_deref(), Some("3"));
        assert_eq!(i64::from_stack(&state, 3), None);
    }

    #[test]
    fn test_option_maps_nil() {
        let state = State::new();
        state.push_nil();
        state.push_string("no");
        assert_eq!(Option::<i64>::from_stack(&state, 1), Some(None));
        assert_eq!(Option::<i64>::from_stack(&state, 2), None);
        assert_eq!(Option::<i64>::from_stack(&state, 5), Some(None));
    }

    #[test]
    fn test_vec_requires_sequence() {
        let state = State::new();
        vec![1i64, 2, 3].push_to(&state);
        assert_eq!(Vec::<i64>::from_stack(&state, 1), Some(vec![1, 2, 3]));

        state.push_string("x");
        state.push_integer(1);
        state.raw_set(1).unwrap();
        assert_eq!(Vec::<i64>::from_stack(&state, 1), None);
        assert_eq!(state.get_top(), 1);
    }

    #[test]
    fn test_vec_rejects_bad_element() {
        let state = State::new();
        vec!["1", "two"].push_to(&state);
        assert_eq!(Vec::<i64>::from_stack(&state, 1), None);
        assert_eq!(Vec::<String>::from_stack(&state, 1).map(|v| v.len()), Some(2));
    }

    #[test]
    fn test_set_and_maps() {
        let set: BTreeSet<i64> = [3, 1, 2].into_iter().collect();
        assert_eq!(round_trip(set.clone()), Some(set));

        let mut map = BTreeMap::new();
        map.insert(String::from("a"), 1i64);
        map.insert(String::from("b"), 2i64);
        assert_eq!(round_trip(map.clone()), Some(map));

        let mut fx: FxHashMap<i64, bool> = FxHashMap::default();
        fx.insert(10, true);
        assert_eq!(round_trip(fx.clone()), Some(fx));
    }

    #[test]
    fn test_tuple_reads_consecutive_slots() {
        let state = State::new();
        (1i64, "two", 3.5f64).push_to(&state);
        assert_eq!(state.get_top(), 3);
        let (a, b, c) = <(i64, String, f64)>::from_stack(&state, 1).unwrap();
        assert_eq!((a, b.as_str(), c), (1, "two", 3.5));
        assert_eq!(<(i64, i64)>::from_stack(&state, 1), None);
        assert_eq!(<(i64, String, f64)>::mismatch(&state, 1), None);

        let (slot, expected) = <(i64, i64, String)>::mismatch(&state, 1).unwrap();
        assert_eq!((slot, expected.as_ref()), (2, "integer"));
    }

    #[test]
    fn test_option_spans_inner_slots() {
        assert_eq!(<Option<(i64, i64)> as IntoStack>::COUNT, 2);
        assert_eq!(<Option<(i64, i64)> as FromStack>::COUNT, 2);

        let state = State::new();
        Some((1i64, 2i64)).push_to(&state);
        assert_eq!(state.get_top(), 2);
        None::<(i64, i64)>.push_to(&state);
        assert_eq!(state.get_top(), 4);
        assert_eq!(<Option<(i64, i64)>>::from_stack(&state, 1), Some(Some((1, 2))));
        assert_eq!(<Option<(i64, i64)>>::from_stack(&state, 3), Some(None));

        (Some((5i64, 6i64)), 7i64).push_to(&state);
        assert_eq!(state.get_top(), 7);
        let (pair, last) = <(Option<(i64, i64)>, i64)>::from_stack(&state, 5).unwrap();
        assert_eq!((pair, last), (Some((5, 6)), 7));
    }

    #[test]
    fn test_pairs_drop_rejected_keys() {
        let state = State::new();
        push_pairs(&state, 3, vec![(f64::NAN, 1i64), (2.0f64, 3i64), (4.0f64, 5i64)]);
        assert_eq!(state.get_top(), 1);
        push_pairs(&state, 1, vec![(Nil, 1i64)]);
        assert_eq!(state.get_top(), 2);

        let map = BTreeMap::<i64, i64>::from_stack(&state, 1).unwrap();
        assert_eq!(map.into_iter().collect::<Vec<_>>(), vec![(2, 3), (4, 5)]);
        assert_eq!(BTreeMap::<i64, i64>::from_stack(&state, 2).map(|m| m.len()), Some(0));
    }

    #[test]
    fn test_unit_occupies_nothing() {
        let state = State::new();
        ().push_to(&state);
        assert_eq!(state.get_top(), 0);
        assert_eq!(<()>::from_stack(&state, -1), Some(()));
    }
}
