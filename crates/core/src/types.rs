//! Data type definitions for Tributary.
//!
//! This module defines the value types an attribute can declare. Values
//! assigned to an attribute are coerced to its declared type.

/// Supported attribute data types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Boolean type (true/false)
    Boolean,
    /// 64-bit signed integer
    Integer,
    /// 64-bit floating point number
    Float,
    /// UTF-8 string
    String,
    /// Interned-style identifier, stored as a string
    Symbol,
    /// Date and time stored as Unix timestamp (milliseconds)
    DateTime,
}
