//! Tributary Core - value types, identities and errors.
//!
//! This crate provides the foundational types shared by the Tributary
//! crates:
//!
//! - `DataType`: Attribute value types (Boolean, Integer, Float, String, Symbol, DateTime)
//! - `Value`: Runtime values stored in tuple fields, with type coercion
//! - `ObjectId`: Process-unique identities for graph objects and retainers
//! - `Error`: Error taxonomy for graph operations
//!
//! # Example
//!
//! ```rust
//! use tributary_core::{DataType, Value};
//!
//! let v = Value::from("42").coerce(DataType::Integer);
//! assert_eq!(v, Some(Value::Integer(42)));
//! ```

#![no_std]

extern crate alloc;

mod error;
mod id;
mod types;
mod value;

pub use error::{Error, Result};
pub use id::{next_object_id, ObjectId};
pub use types::DataType;
pub use value::Value;
