//! Error types for Tributary.

use crate::id::ObjectId;
use crate::types::DataType;
use crate::value::Value;
use alloc::string::String;
use thiserror::Error;

/// Result type alias for Tributary operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Error types for relational graph operations.
///
/// None of these are recovered from internally; they all surface to the
/// caller that triggered them.
#[derive(Debug, Error)]
pub enum Error {
    /// The retainer already holds the object.
    #[error("object {object} is already retained by {retainer}")]
    AlreadyRetained { object: ObjectId, retainer: ObjectId },

    /// The retainer does not hold the object.
    #[error("object {object} is not retained by {retainer}")]
    NotRetainedBy { object: ObjectId, retainer: ObjectId },

    /// Subscribing to an object that the subscriber does not retain.
    #[error("retainer {retainer} must retain object {owner} before subscribing to it")]
    Unauthorized { owner: ObjectId, retainer: ObjectId },

    /// The operation needs materialized state but the object is not retained.
    #[error("{operation} requires object {object} to be retained")]
    NotLive { object: ObjectId, operation: &'static str },

    /// Inserting a tuple built for a different set.
    #[error("tuple does not belong to set {set}")]
    ForeignTuple { set: String },

    /// Inserting a tuple whose id is already present.
    #[error("set {set} already contains a tuple with id {key}")]
    DuplicateKey { set: String, key: Value },

    /// Deleting a tuple that is not a member.
    #[error("tuple is not a member of set {set}")]
    NotAMember { set: String },

    /// The operation has no meaning for this kind of relation.
    #[error("{operation} is not supported by {relation}")]
    Unsupported {
        relation: &'static str,
        operation: &'static str,
    },

    /// No operand of the relation defines the attribute.
    #[error("attribute {name} not found in {relation}")]
    AttributeNotFound { relation: String, name: String },

    /// Invalid set or attribute declaration.
    #[error("invalid schema: {message}")]
    InvalidSchema { message: String },

    /// A value could not be converted to the attribute's declared type.
    #[error("cannot assign {value:?} to {attribute}: expected {expected:?}")]
    TypeMismatch {
        attribute: String,
        expected: DataType,
        value: Value,
    },
}

impl Error {
    /// Creates a not-live error.
    pub fn not_live(object: ObjectId, operation: &'static str) -> Self {
        Error::NotLive { object, operation }
    }

    /// Creates a foreign tuple error.
    pub fn foreign_tuple(set: impl Into<String>) -> Self {
        Error::ForeignTuple { set: set.into() }
    }

    /// Creates a duplicate key error.
    pub fn duplicate_key(set: impl Into<String>, key: Value) -> Self {
        Error::DuplicateKey {
            set: set.into(),
            key,
        }
    }

    /// Creates a non-member error.
    pub fn not_a_member(set: impl Into<String>) -> Self {
        Error::NotAMember { set: set.into() }
    }

    /// Creates an unsupported operation error.
    pub fn unsupported(relation: &'static str, operation: &'static str) -> Self {
        Error::Unsupported {
            relation,
            operation,
        }
    }

    /// Creates an attribute not found error.
    pub fn attribute_not_found(relation: impl Into<String>, name: impl Into<String>) -> Self {
        Error::AttributeNotFound {
            relation: relation.into(),
            name: name.into(),
        }
    }

    /// Creates an invalid schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Error::InvalidSchema {
            message: message.into(),
        }
    }

    /// Creates a type mismatch error.
    pub fn type_mismatch(attribute: impl Into<String>, expected: DataType, value: Value) -> Self {
        Error::TypeMismatch {
            attribute: attribute.into(),
            expected,
            value,
        }
    }

    /// Returns true for errors caused by breaking the retain/release contract.
    pub fn is_lifetime_violation(&self) -> bool {
        matches!(
            self,
            Error::AlreadyRetained { .. }
                | Error::NotRetainedBy { .. }
                | Error::Unauthorized { .. }
                | Error::NotLive { .. }
        )
    }
}
