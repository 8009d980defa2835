//! Attribute definitions.
//!
//! An attribute is a named, typed column owned by exactly one set. Its
//! identity is the owning set's `ObjectId` plus its name, which is how
//! composite tuples and predicates find the right field.

use crate::predicate::{Comparison, Operand, Predicate, PredicateRef};
use alloc::format;
use alloc::rc::Rc;
use alloc::string::String;
use core::fmt;
use tributary_core::{DataType, Error, ObjectId, Result, Value};

/// Shared handle to an attribute.
pub type AttributeRef = Rc<Attribute>;

/// Transform applied to every value assigned to an attribute, after coercion.
pub type TransformFn = Rc<dyn Fn(Value) -> Value>;

/// Sort direction for ordering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

impl Direction {
    /// Applies this direction to an ascending comparison result.
    #[inline]
    pub fn apply(self, ordering: core::cmp::Ordering) -> core::cmp::Ordering {
        match self {
            Direction::Ascending => ordering,
            Direction::Descending => ordering.reverse(),
        }
    }
}

/// Default value of an attribute for newly built tuples.
#[derive(Clone)]
pub enum DefaultValue {
    /// A literal value.
    Value(Value),
    /// A value computed each time a tuple is built.
    Computed(Rc<dyn Fn() -> Value>),
}

impl DefaultValue {
    /// Produces the default value.
    pub fn produce(&self) -> Value {
        match self {
            DefaultValue::Value(v) => v.clone(),
            DefaultValue::Computed(f) => f(),
        }
    }
}

/// Whether a field is stored or derived.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttributeKind {
    Concrete,
    Synthetic,
}

/// Declaration of an attribute, before it is bound to a set.
#[derive(Clone)]
pub struct AttributeSpec {
    pub(crate) name: String,
    pub(crate) data_type: DataType,
    pub(crate) default: Option<DefaultValue>,
    pub(crate) transform: Option<TransformFn>,
    pub(crate) direction: Direction,
}

impl AttributeSpec {
    /// Declares an attribute with the given name and type.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            default: None,
            transform: None,
            direction: Direction::Ascending,
        }
    }

    /// Sets a literal default value.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Value(value.into()));
        self
    }

    /// Sets a default computed when each tuple is built.
    pub fn default_with<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Value + 'static,
    {
        self.default = Some(DefaultValue::Computed(Rc::new(f)));
        self
    }

    /// Sets a transform applied to every assigned value.
    pub fn transform<F>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Value + 'static,
    {
        self.transform = Some(Rc::new(f));
        self
    }

    /// Sorts this attribute descending by default.
    pub fn descending(mut self) -> Self {
        self.direction = Direction::Descending;
        self
    }

    pub(crate) fn bind(self, owner: ObjectId, owner_name: &str, kind: AttributeKind) -> Attribute {
        Attribute {
            owner,
            owner_name: owner_name.into(),
            name: self.name,
            data_type: self.data_type,
            default: self.default,
            transform: self.transform,
            direction: self.direction,
            kind,
        }
    }
}

impl From<(&str, DataType)> for AttributeSpec {
    fn from((name, data_type): (&str, DataType)) -> Self {
        AttributeSpec::new(name, data_type)
    }
}

/// A typed column of a set.
pub struct Attribute {
    owner: ObjectId,
    owner_name: String,
    name: String,
    data_type: DataType,
    default: Option<DefaultValue>,
    transform: Option<TransformFn>,
    direction: Direction,
    kind: AttributeKind,
}

impl Attribute {
    /// Returns the ID of the owning set.
    #[inline]
    pub fn owner_id(&self) -> ObjectId {
        self.owner
    }

    /// Returns the name of the owning set.
    #[inline]
    pub fn owner_name(&self) -> &str {
        &self.owner_name
    }

    /// Returns the attribute name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `set.attribute`.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.owner_name, self.name)
    }

    /// Returns the declared data type.
    #[inline]
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Returns the default sort direction.
    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Returns whether values are stored or derived.
    #[inline]
    pub fn kind(&self) -> AttributeKind {
        self.kind
    }

    /// Returns true for derived attributes.
    #[inline]
    pub fn is_synthetic(&self) -> bool {
        self.kind == AttributeKind::Synthetic
    }

    /// Returns the value a new tuple gets when none is supplied.
    pub fn default_value(&self) -> Value {
        self.default
            .as_ref()
            .map(DefaultValue::produce)
            .unwrap_or(Value::Null)
    }

    /// Coerces a value to this attribute's type and applies the transform.
    pub fn convert(&self, value: Value) -> Result<Value> {
        let coerced = value
            .coerce(self.data_type)
            .ok_or_else(|| Error::type_mismatch(self.qualified_name(), self.data_type, value))?;
        Ok(match &self.transform {
            Some(transform) => transform(coerced),
            None => coerced,
        })
    }

    /// Returns true if this attribute is owned by the given set and named `name`.
    pub fn is(&self, owner: ObjectId, name: &str) -> bool {
        self.owner == owner && self.name == name
    }
}

/// Predicate and sort-key builders.
pub trait AttributeExt {
    /// Ascending sort key.
    fn asc(&self) -> SortKey;
    /// Descending sort key.
    fn desc(&self) -> SortKey;
    /// `self = other`
    fn equals(&self, other: impl Into<Operand>) -> PredicateRef;
    /// `self != other`
    fn not_equals(&self, other: impl Into<Operand>) -> PredicateRef;
    /// `self > other`
    fn gt(&self, other: impl Into<Operand>) -> PredicateRef;
    /// `self < other`
    fn lt(&self, other: impl Into<Operand>) -> PredicateRef;
    /// `self >= other`
    fn ge(&self, other: impl Into<Operand>) -> PredicateRef;
    /// `self <= other`
    fn le(&self, other: impl Into<Operand>) -> PredicateRef;
}

impl AttributeExt for AttributeRef {
    fn asc(&self) -> SortKey {
        SortKey::new(self.clone(), Direction::Ascending)
    }

    fn desc(&self) -> SortKey {
        SortKey::new(self.clone(), Direction::Descending)
    }

    fn equals(&self, other: impl Into<Operand>) -> PredicateRef {
        Predicate::compare(Comparison::Eq, self.clone(), other)
    }

    fn not_equals(&self, other: impl Into<Operand>) -> PredicateRef {
        Predicate::compare(Comparison::Ne, self.clone(), other)
    }

    fn gt(&self, other: impl Into<Operand>) -> PredicateRef {
        Predicate::compare(Comparison::Gt, self.clone(), other)
    }

    fn lt(&self, other: impl Into<Operand>) -> PredicateRef {
        Predicate::compare(Comparison::Lt, self.clone(), other)
    }

    fn ge(&self, other: impl Into<Operand>) -> PredicateRef {
        Predicate::compare(Comparison::Ge, self.clone(), other)
    }

    fn le(&self, other: impl Into<Operand>) -> PredicateRef {
        Predicate::compare(Comparison::Le, self.clone(), other)
    }
}

impl PartialEq for Attribute {
    fn eq(&self, other: &Self) -> bool {
        self.owner == other.owner && self.name == other.name
    }
}

impl Eq for Attribute {}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attribute")
            .field("name", &self.qualified_name())
            .field("data_type", &self.data_type)
            .field("direction", &self.direction)
            .field("kind", &self.kind)
            .finish()
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner_name, self.name)
    }
}

/// One ordering key: an attribute and a direction.
#[derive(Clone, Debug)]
pub struct SortKey {
    pub attribute: AttributeRef,
    pub direction: Direction,
}

impl SortKey {
    /// Creates a sort key.
    pub fn new(attribute: AttributeRef, direction: Direction) -> Self {
        Self {
            attribute,
            direction,
        }
    }
}

impl From<AttributeRef> for SortKey {
    fn from(attribute: AttributeRef) -> Self {
        let direction = attribute.direction();
        SortKey::new(attribute, direction)
    }
}

impl From<&AttributeRef> for SortKey {
    fn from(attribute: &AttributeRef) -> Self {
        SortKey::from(attribute.clone())
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            Direction::Ascending => write!(f, "{} asc", self.attribute),
            Direction::Descending => write!(f, "{} desc", self.attribute),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;
    use core::cmp::Ordering;

    fn bind(spec: AttributeSpec) -> Attribute {
        spec.bind(7, "users", AttributeKind::Concrete)
    }

    #[test]
    fn test_identity_is_owner_and_name() {
        let a = bind(AttributeSpec::new("id", DataType::Integer));
        let b = bind(AttributeSpec::new("id", DataType::String));
        let c = AttributeSpec::new("id", DataType::Integer).bind(8, "photos", AttributeKind::Concrete);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.is(7, "id"));
    }

    #[test]
    fn test_convert_coerces_then_transforms() {
        let attr = bind(
            AttributeSpec::new("name", DataType::String)
                .transform(|v| Value::String(v.to_string().to_uppercase())),
        );
        assert_eq!(attr.convert(Value::from("nathan")).unwrap(), Value::from("NATHAN"));
    }

    #[test]
    fn test_convert_rejects_bad_values() {
        let attr = bind(AttributeSpec::new("id", DataType::Integer));
        let err = attr.convert(Value::from("abc")).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { expected: DataType::Integer, .. }));
    }

    #[test]
    fn test_defaults() {
        let literal = bind(AttributeSpec::new("state", DataType::Symbol).default_value(Value::symbol("draft")));
        assert_eq!(literal.default_value(), Value::symbol("draft"));

        let computed = bind(AttributeSpec::new("created_at", DataType::DateTime).default_with(|| Value::DateTime(5)));
        assert_eq!(computed.default_value(), Value::DateTime(5));

        let none = bind(AttributeSpec::new("bio", DataType::String));
        assert!(none.default_value().is_null());
    }

    #[test]
    fn test_direction() {
        assert_eq!(Direction::Descending.apply(Ordering::Less), Ordering::Greater);
        let attr = Rc::new(bind(AttributeSpec::new("rank", DataType::Integer).descending()));
        let key = SortKey::from(&attr);
        assert_eq!(key.direction, Direction::Descending);
        assert_eq!(attr.asc().direction, Direction::Ascending);
        assert_eq!(key.to_string(), "users.rank desc");
    }
}
