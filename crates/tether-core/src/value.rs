//! Value representation
//!
//! Every slot of the value stack, every table entry and every upvalue holds a
//! [`Value`]. Scalars and strings are stored inline; tables, functions and
//! userdata live in the collected heap and are referenced through a
//! generation-checked [`GcRef`].
//!
//! # Numbers
//!
//! Integers and floats are distinct representations but share the script
//! type `number`. Table keys normalize floats that hold an exact integer so
//! `t[1]` and `t[1.0]` address the same entry.

use std::fmt;
use std::rc::Rc;

/// Reference to an object in the collected heap.
///
/// The generation makes a stale reference detectable after its slot has been
/// reclaimed and reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GcRef {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl GcRef {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Address-like identity of the referenced object, stable while it lives.
    pub fn identity(&self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }
}

/// Script-visible type of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    /// Returned for indices outside the current frame
    None,
    /// `nil`
    Nil,
    /// `true` / `false`
    Boolean,
    /// Opaque host pointer that is not collected
    LightUserData,
    /// Integer or float
    Number,
    /// Immutable byte string
    String,
    /// Associative array
    Table,
    /// Native function or closure
    Function,
    /// Collected host payload
    UserData,
}

impl Type {
    /// The name scripts see for this type, used in diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            Type::None => "no value",
            Type::Nil => "nil",
            Type::Boolean => "boolean",
            Type::LightUserData => "lightuserdata",
            Type::Number => "number",
            Type::String => "string",
            Type::Table => "table",
            Type::Function => "function",
            Type::UserData => "userdata",
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A script value.
#[derive(Clone, Default)]
pub enum Value {
    /// Absence of a value
    #[default]
    Nil,
    /// Boolean
    Boolean(bool),
    /// 64-bit integer
    Integer(i64),
    /// 64-bit float
    Number(f64),
    /// Interned-by-refcount string
    String(Rc<str>),
    /// Heap table
    Table(GcRef),
    /// Heap function
    Function(GcRef),
    /// Heap userdata
    UserData(GcRef),
    /// Uncollected pointer-sized host token
    LightUserData(usize),
}

impl Value {
    /// Create a string value
    pub fn string(s: &str) -> Self {
        Value::String(Rc::from(s))
    }

    /// Get the script type of this value
    pub const fn type_of(&self) -> Type {
        match self {
            Value::Nil => Type::Nil,
            Value::Boolean(_) => Type::Boolean,
            Value::Integer(_) | Value::Number(_) => Type::Number,
            Value::String(_) => Type::String,
            Value::Table(_) => Type::Table,
            Value::Function(_) => Type::Function,
            Value::UserData(_) => Type::UserData,
            Value::LightUserData(_) => Type::LightUserData,
        }
    }

    /// Get the script type name of this value
    pub const fn type_name(&self) -> &'static str {
        self.type_of().name()
    }

    /// Check if this value is nil
    #[inline]
    pub const fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Script truthiness: only `nil` and `false` are false
    #[inline]
    pub const fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }

    /// Heap reference held by this value, if any
    pub const fn gc_ref(&self) -> Option<GcRef> {
        match self {
            Value::Table(r) | Value::Function(r) | Value::UserData(r) => Some(*r),
            _ => None,
        }
    }

    /// Convert to an integer, accepting integral floats and numeric strings
    pub fn to_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Number(n) => float_to_integer(*n),
            Value::String(s) => match parse_number(s)? {
                Value::Integer(i) => Some(i),
                Value::Number(n) => float_to_integer(n),
                _ => None,
            },
            _ => None,
        }
    }

    /// Convert to a float, accepting numeric strings
    pub fn to_number(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Number(n) => Some(*n),
            Value::String(s) => match parse_number(s)? {
                Value::Integer(i) => Some(i as f64),
                Value::Number(n) => Some(n),
                _ => None,
            },
            _ => None,
        }
    }

    /// Convert to a string, accepting numbers
    pub fn to_str(&self) -> Option<Rc<str>> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Integer(i) => Some(Rc::from(i.to_string())),
            Value::Number(n) => Some(Rc::from(format_float(*n))),
            _ => None,
        }
    }

    /// Primitive equality without metamethods
    pub fn raw_equal(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Integer(a), Value::Number(b)) | (Value::Number(b), Value::Integer(a)) => {
                (*a as f64) == *b && float_to_integer(*b) == Some(*a)
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Table(a), Value::Table(b))
            | (Value::Function(a), Value::Function(b))
            | (Value::UserData(a), Value::UserData(b)) => a == b,
            (Value::LightUserData(a), Value::LightUserData(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.raw_equal(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Number(n) => write!(f, "{}", format_float(*n)),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Table(r) => write!(f, "table: {:#x}", r.identity()),
            Value::Function(r) => write!(f, "function: {:#x}", r.identity()),
            Value::UserData(r) => write!(f, "userdata: {:#x}", r.identity()),
            Value::LightUserData(p) => write!(f, "lightuserdata: {:#x}", p),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Hashable form of a non-nil, non-NaN value used by the table hash part.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TableKey {
    /// Boolean key
    Boolean(bool),
    /// Integer key (also used for integral floats)
    Integer(i64),
    /// Non-integral float key, stored by bit pattern
    Number(u64),
    /// String key
    String(Rc<str>),
    /// Table identity key
    Table(GcRef),
    /// Function identity key
    Function(GcRef),
    /// Userdata identity key
    UserData(GcRef),
    /// Light userdata key
    LightUserData(usize),
}

impl TableKey {
    /// Build a key, returning `None` for `nil` and NaN.
    pub fn from_value(value: &Value) -> Option<Self> {
        Some(match value {
            Value::Nil => return None,
            Value::Boolean(b) => TableKey::Boolean(*b),
            Value::Integer(i) => TableKey::Integer(*i),
            Value::Number(n) => {
                if n.is_nan() {
                    return None;
                }
                match float_to_integer(*n) {
                    Some(i) => TableKey::Integer(i),
                    None => TableKey::Number(n.to_bits()),
                }
            }
            Value::String(s) => TableKey::String(s.clone()),
            Value::Table(r) => TableKey::Table(*r),
            Value::Function(r) => TableKey::Function(*r),
            Value::UserData(r) => TableKey::UserData(*r),
            Value::LightUserData(p) => TableKey::LightUserData(*p),
        })
    }

    /// Convert back into a value
    pub fn to_value(&self) -> Value {
        match self {
            TableKey::Boolean(b) => Value::Boolean(*b),
            TableKey::Integer(i) => Value::Integer(*i),
            TableKey::Number(bits) => Value::Number(f64::from_bits(*bits)),
            TableKey::String(s) => Value::String(s.clone()),
            TableKey::Table(r) => Value::Table(*r),
            TableKey::Function(r) => Value::Function(*r),
            TableKey::UserData(r) => Value::UserData(*r),
            TableKey::LightUserData(p) => Value::LightUserData(*p),
        }
    }

    /// Heap reference held by this key, if any
    pub fn gc_ref(&self) -> Option<GcRef> {
        match self {
            TableKey::Table(r) | TableKey::Function(r) | TableKey::UserData(r) => Some(*r),
            _ => None,
        }
    }
}

fn float_to_integer(n: f64) -> Option<i64> {
    if n.fract() == 0.0 && n >= i64::MIN as f64 && n < i64::MAX as f64 {
        Some(n as i64)
    } else {
        None
    }
}

/// Parse a numeric string the way scripts coerce them.
pub fn parse_number(s: &str) -> Option<Value> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::Integer(i));
    }
    let hex = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"));
    if let Some(digits) = hex {
        return i64::from_str_radix(digits, 16).ok().map(Value::Integer);
    }
    // Rust accepts "inf"/"nan" spellings that scripts do not.
    if s.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        return None;
    }
    s.parse::<f64>().ok().map(Value::Number)
}

/// Format a float with the `%.14g` convention, keeping a `.0` on integral values.
pub fn format_float(n: f64) -> String {
    if n.is_nan() {
        return if n.is_sign_negative() { "-nan".into() } else { "nan".into() };
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf".into() } else { "-inf".into() };
    }
    if n.fract() == 0.0 && n.abs() < 1e15 {
        return format!("{:.1}", n);
    }
    let formatted = format!("{:.14e}", n);
    let (mantissa, exponent) = match formatted.split_once('e') {
        Some(parts) => parts,
        None => return formatted,
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);
    if (-5..14).contains(&exponent) {
        let decimals = (13 - exponent).max(0) as usize;
        let fixed = format!("{:.*}", decimals, n);
        trim_fraction(&fixed)
    } else {
        format!("{}e{:+03}", trim_fraction(mantissa), exponent)
    }
}

fn trim_fraction(s: &str) -> String {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s.to_string()
    }
}
