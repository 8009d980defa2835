//! Value type definitions for Tributary.
//!
//! This module defines the `Value` enum which represents anything that can
//! be stored in a tuple field, and the coercion rules used when a value is
//! assigned to an attribute of a declared type.

use crate::types::DataType;
use alloc::string::{String, ToString};
use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};

/// A value that can be stored in a tuple field.
#[derive(Clone, Debug)]
pub enum Value {
    /// Null value
    Null,
    /// Boolean value
    Boolean(bool),
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit floating point
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Symbolic identifier
    Symbol(String),
    /// DateTime stored as Unix timestamp in milliseconds
    DateTime(i64),
}

impl Value {
    /// Returns the data type of this value, or None if it's Null.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(DataType::Boolean),
            Value::Integer(_) => Some(DataType::Integer),
            Value::Float(_) => Some(DataType::Float),
            Value::String(_) => Some(DataType::String),
            Value::Symbol(_) => Some(DataType::Symbol),
            Value::DateTime(_) => Some(DataType::DateTime),
        }
    }

    /// Creates a symbol value.
    pub fn symbol(name: impl Into<String>) -> Self {
        Value::Symbol(name.into())
    }

    /// Returns true if this value is Null.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the integer value if this is an Integer, None otherwise.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the text of a String or Symbol value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) | Value::Symbol(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Converts this value to the given data type.
    ///
    /// Null converts to every type. Returns None when the value has no
    /// sensible representation in the target type.
    pub fn coerce(&self, target: DataType) -> Option<Value> {
        if self.is_null() || self.data_type() == Some(target) {
            return Some(self.clone());
        }

        match target {
            DataType::Boolean => match self {
                Value::Integer(0) => Some(Value::Boolean(false)),
                Value::Integer(1) => Some(Value::Boolean(true)),
                Value::String(s) | Value::Symbol(s) => match s.trim() {
                    "true" | "t" | "1" => Some(Value::Boolean(true)),
                    "false" | "f" | "0" => Some(Value::Boolean(false)),
                    _ => None,
                },
                _ => None,
            },
            DataType::Integer => match self {
                Value::Float(f) if f.is_finite() && *f == (*f as i64) as f64 => {
                    Some(Value::Integer(*f as i64))
                }
                Value::DateTime(ms) => Some(Value::Integer(*ms)),
                Value::String(s) | Value::Symbol(s) => s.trim().parse().ok().map(Value::Integer),
                _ => None,
            },
            DataType::Float => match self {
                Value::Integer(i) => Some(Value::Float(*i as f64)),
                Value::String(s) | Value::Symbol(s) => s.trim().parse().ok().map(Value::Float),
                _ => None,
            },
            DataType::String => Some(Value::String(self.to_string())),
            DataType::Symbol => Some(Value::Symbol(self.to_string())),
            DataType::DateTime => match self {
                Value::Integer(ms) => Some(Value::DateTime(*ms)),
                Value::String(s) => s.trim().parse().ok().map(Value::DateTime),
                _ => None,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(s) | Value::Symbol(s) => write!(f, "{}", s),
            Value::DateTime(ms) => write!(f, "{}", ms),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Integer(i), Value::Float(f)) | (Value::Float(f), Value::Integer(i)) => {
                cmp_integer_float(*i, *f) == Ordering::Equal
            }
            (Value::Float(a), Value::Float(b)) => {
                // NaN equals itself so values can key hash maps
                if a.is_nan() && b.is_nan() {
                    true
                } else {
                    a == b
                }
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Integers and floats share a tag so equal numbers hash alike
        let tag = match self {
            Value::Float(_) => Value::Integer(0).type_order(),
            _ => self.type_order(),
        };
        tag.hash(state);
        match self {
            Value::Null => {}
            Value::Boolean(b) => b.hash(state),
            Value::Integer(i) => i.hash(state),
            Value::Float(f) => match float_as_integer(*f) {
                Some(i) => i.hash(state),
                None if f.is_nan() => f64::NAN.to_bits().hash(state),
                None => f.to_bits().hash(state),
            },
            Value::String(s) | Value::Symbol(s) => s.hash(state),
            Value::DateTime(d) => d.hash(state),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Integer(a), Value::Float(b)) => cmp_integer_float(*a, *b),
            (Value::Float(a), Value::Integer(b)) => cmp_integer_float(*b, *a).reverse(),
            (Value::Float(a), Value::Float(b)) => match (a.is_nan(), b.is_nan()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            },
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Symbol(a), Value::Symbol(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            // Different types: order by type discriminant
            _ => self.type_order().cmp(&other.type_order()),
        }
    }
}

/// 2^63, the first float above `i64::MAX`.
const I64_LIMIT: f64 = 9_223_372_036_854_775_808.0;

/// Compares an integer with a float without rounding either. NaN sorts
/// above every number.
fn cmp_integer_float(i: i64, f: f64) -> Ordering {
    if f.is_nan() || f >= I64_LIMIT {
        return Ordering::Less;
    }
    if f < -I64_LIMIT {
        return Ordering::Greater;
    }
    // In range here, so the cast truncates exactly (`f64::trunc` needs std).
    let whole = (f as i64) as f64;
    match i.cmp(&(whole as i64)) {
        Ordering::Equal => 0.0.partial_cmp(&(f - whole)).unwrap_or(Ordering::Equal),
        unequal => unequal,
    }
}

/// The integer equal to `f`, if there is one.
fn float_as_integer(f: f64) -> Option<i64> {
    if f.is_finite() && (f as i64) as f64 == f && (-I64_LIMIT..I64_LIMIT).contains(&f) {
        Some(f as i64)
    } else {
        None
    }
}

impl Value {
    /// Returns a type ordering value for comparing different types.
    fn type_order(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) => 2,
            Value::Float(_) => 3,
            Value::String(_) => 4,
            Value::Symbol(_) => 5,
            Value::DateTime(_) => 6,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}
