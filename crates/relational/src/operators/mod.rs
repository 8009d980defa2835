//! Derived relations.
//!
//! Each operator materializes its tuples when first retained and then keeps
//! them current from its operands' events:
//! - Selection: tuples matching a predicate
//! - SetProjection / AttributesProjection: distinct projected tuples with multiplicity
//! - InnerJoin: composite tuples for matching pairs
//! - Ordering: tuples sorted by sort keys
//! - SingletonRelation: the first tuple only

mod filter;
mod join;
mod order;
mod project;
mod singleton;

pub use filter::Selection;
pub use join::InnerJoin;
pub use order::Ordering;
pub use project::{AttributesProjection, SetProjection};
pub use singleton::SingletonRelation;
