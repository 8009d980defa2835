//! Association builders.
//!
//! Plain functions that wire the usual foreign-key relations between a
//! tuple and a set. The owner side is read through a signal, so re-keying
//! the owner re-matches the association.

use crate::attribute::{AttributeExt, AttributeRef};
use crate::operators::{Selection, SingletonRelation};
use crate::relation::RelationExt;
use crate::set::Set;
use crate::tuple::TupleRef;
use alloc::rc::Rc;

/// Tuples of `target` whose `foreign_key` equals `owner[owner_key]`.
///
/// # Example
///
/// ```ignore
/// let photos_of_user = has_many(&user, &users_id, &photos, &photos_user_id);
/// ```
pub fn has_many(
    owner: &TupleRef,
    owner_key: &AttributeRef,
    target: &Rc<Set>,
    foreign_key: &AttributeRef,
) -> Rc<Selection> {
    target.select(&foreign_key.equals(owner.signal(owner_key)))
}

/// The first tuple of `target` whose `foreign_key` equals `owner[owner_key]`.
pub fn has_one(
    owner: &TupleRef,
    owner_key: &AttributeRef,
    target: &Rc<Set>,
    foreign_key: &AttributeRef,
) -> Rc<SingletonRelation> {
    has_many(owner, owner_key, target, foreign_key).singleton()
}

/// The tuple of `target` whose `target_key` equals `tuple[foreign_key]`.
pub fn belongs_to(
    tuple: &TupleRef,
    foreign_key: &AttributeRef,
    target: &Rc<Set>,
    target_key: &AttributeRef,
) -> Rc<SingletonRelation> {
    target
        .select(&target_key.equals(tuple.signal(foreign_key)))
        .singleton()
}
