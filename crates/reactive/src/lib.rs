//! Tributary Reactive - object lifetimes and event fan-out.
//!
//! This crate implements the two primitives every node of a Tributary
//! relational graph is built on.
//!
//! # Core Concepts
//!
//! - `Retainable`: Explicit shared ownership. An object does no work until
//!   it is first retained, and is finalized once it is no longer reachable
//!   from an external root, even if retain cycles keep its refcount above
//!   zero.
//! - `Retainer`: Identity of a holder, either an external root or another
//!   graph object.
//! - `SubscriptionNode`: An ordered observer list owned by one object. Only
//!   retainers of the owner may subscribe.
//! - `Subscription`: Handle used to destroy a registration.
//!
//! # Example
//!
//! ```ignore
//! use tributary_reactive::{Lifecycle, Retainable, Retainer, SubscriptionNode};
//!
//! let root = Retainer::root();
//! relation.retain(&root)?;
//!
//! let sub = relation.on_insert(&root, |tuple| println!("inserted {:?}", tuple))?;
//! // ...
//! sub.destroy();
//! relation.release(&root)?;
//! ```

#![no_std]

extern crate alloc;

pub mod retainable;
pub mod subscription;

pub use retainable::{Lifecycle, Retainable, Retainer};
pub use subscription::{EventCallback, Subscription, SubscriptionId, SubscriptionNode};
