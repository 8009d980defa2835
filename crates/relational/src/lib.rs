//! Tributary Relational - incrementally maintained relations.
//!
//! Application code declares base sets of typed tuples and composes derived
//! relations over them. Once a relation is retained it materializes its
//! tuples and keeps them correct as the sets beneath it change, publishing
//! the minimal insert, delete and update events at every node.
//!
//! # Core Concepts
//!
//! - `Set`: A base collection of primitive tuples with a unique id attribute
//! - `Tuple`: A row; primitive, composite (join output) or projected
//! - `Attribute`: A typed column identified by its owning set and name
//! - `Signal`: A reactive value read from a tuple, a relation or other signals
//! - `Predicate`: Comparisons over attributes, signals and literals
//! - `Relation`: The common interface of sets and derived relations
//!
//! # Derived Relations
//!
//! - `Selection`: Tuples matching a predicate
//! - `SetProjection` / `AttributesProjection`: Distinct projected tuples
//! - `InnerJoin`: Composite tuples for every matching pair
//! - `Ordering`: Tuples sorted by sort keys
//! - `SingletonRelation`: The first tuple of a relation
//!
//! # Example
//!
//! ```rust
//! use tributary_core::{DataType, Value};
//! use tributary_reactive::{Retainable, Retainer};
//! use tributary_relational::{AttributeExt, Relation, RelationExt, SetBuilder};
//!
//! let users = SetBuilder::new("users")?
//!     .attribute("id", DataType::Integer)?
//!     .attribute("name", DataType::String)?
//!     .build()?;
//! let root = Retainer::root();
//! users.retain(&root)?;
//!
//! let name = users.attribute("name")?;
//! let bobs = users.select(&name.equals("bob"));
//! bobs.retain(&root)?;
//!
//! users.create([("id", Value::from(1)), ("name", Value::from("bob"))])?;
//! users.create([("id", Value::from(2)), ("name", Value::from("ann"))])?;
//! assert_eq!(bobs.len(), 1);
//! # Ok::<(), tributary_core::Error>(())
//! ```

#![no_std]

extern crate alloc;

pub mod association;
pub mod attribute;
pub mod describe;
pub mod field;
pub mod operators;
pub mod predicate;
pub mod relation;
pub mod set;
pub mod signal;
pub mod store;
pub mod tuple;

pub use association::{belongs_to, has_many, has_one};
pub use attribute::{
    Attribute, AttributeExt, AttributeKind, AttributeRef, AttributeSpec, DefaultValue, Direction, SortKey,
    TransformFn,
};
pub use describe::QueryDescription;
pub use field::{PrimitiveField, SyntheticField, SyntheticFn};
pub use operators::{AttributesProjection, InnerJoin, Ordering, Selection, SetProjection, SingletonRelation};
pub use predicate::{Comparison, Operand, Predicate, PredicateRef};
pub use relation::{Finder, JoinBuilder, Relation, RelationEvents, RelationExt, RelationRef};
pub use set::{AfterCreateFn, Set, SetBuilder};
pub use signal::{DeriveFn, Signal, SignalChange, SignalRef};
pub use store::TupleStore;
pub use tuple::{Lookup, Tuple, TupleKey, TupleRef, TupleUpdate};
