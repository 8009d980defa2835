//! The relation abstraction and its query builders.
//!
//! Every relation, base or derived, answers two questions: what are your
//! tuples right now, and what changed. Unretained relations compute their
//! tuples on demand from their operands (`initial_read`); retained ones
//! keep a materialized `TupleStore` current by listening to their operands
//! and publish `on_insert`, `on_delete` and `on_tuple_update` to their own
//! observers.

use crate::attribute::{AttributeRef, SortKey};
use crate::describe::QueryDescription;
use crate::operators::{AttributesProjection, InnerJoin, Ordering, Selection, SetProjection, SingletonRelation};
use crate::predicate::PredicateRef;
use crate::set::Set;
use crate::signal::{Signal, SignalRef};
use crate::store::TupleStore;
use crate::tuple::{Tuple, TupleRef, TupleUpdate};
use alloc::rc::{Rc, Weak};
use alloc::string::String;
use alloc::vec::Vec;
use tributary_core::{Error, Result, Value};
use tributary_reactive::{Lifecycle, Retainable, Retainer, Subscription, SubscriptionNode};

/// Shared handle to any relation.
pub type RelationRef = Rc<dyn Relation>;

/// The three event nodes every relation publishes.
pub struct RelationEvents {
    pub(crate) on_insert: SubscriptionNode<TupleRef>,
    pub(crate) on_delete: SubscriptionNode<TupleRef>,
    pub(crate) on_tuple_update: SubscriptionNode<TupleUpdate>,
}

impl RelationEvents {
    pub(crate) fn new(owner: &Lifecycle) -> Self {
        Self {
            on_insert: SubscriptionNode::new(owner),
            on_delete: SubscriptionNode::new(owner),
            on_tuple_update: SubscriptionNode::new(owner),
        }
    }

    /// Total number of subscriptions across the three nodes.
    pub fn subscription_count(&self) -> usize {
        self.on_insert.len() + self.on_delete.len() + self.on_tuple_update.len()
    }
}

/// How `find` locates a tuple.
#[derive(Clone, Debug)]
pub enum Finder {
    /// Match the owning set's id attribute.
    Key(Value),
    /// First tuple satisfying the predicate.
    Matching(PredicateRef),
}

impl From<Value> for Finder {
    fn from(key: Value) -> Self {
        Finder::Key(key)
    }
}

impl From<i64> for Finder {
    fn from(key: i64) -> Self {
        Finder::Key(Value::Integer(key))
    }
}

impl From<i32> for Finder {
    fn from(key: i32) -> Self {
        Finder::Key(Value::from(key))
    }
}

impl From<&str> for Finder {
    fn from(key: &str) -> Self {
        Finder::Key(Value::from(key))
    }
}

impl From<PredicateRef> for Finder {
    fn from(predicate: PredicateRef) -> Self {
        Finder::Matching(predicate)
    }
}

impl From<&PredicateRef> for Finder {
    fn from(predicate: &PredicateRef) -> Self {
        Finder::Matching(predicate.clone())
    }
}

/// A set of tuples, base or derived.
pub trait Relation: Retainable {
    /// Upcast used for retaining relations held as trait objects.
    fn as_retainable(&self) -> &dyn Retainable;

    /// Event nodes published by this relation.
    fn events(&self) -> &RelationEvents;

    /// Materialized tuples, meaningful while live.
    fn store(&self) -> &TupleStore;

    /// Computes the current tuples from the operands without materializing.
    fn initial_read(&self) -> Vec<TupleRef>;

    /// Resolves an attribute by name through the operands.
    fn attribute(&self, name: &str) -> Result<AttributeRef>;

    /// The base sets this relation is ultimately built from.
    fn composed_sets(&self) -> Vec<Rc<Set>>;

    /// A structural description of the query.
    fn describe(&self) -> QueryDescription;

    /// Inserts tuples that are not yet present into the underlying set.
    fn merge(&self, _tuples: Vec<TupleRef>) -> Result<Vec<TupleRef>> {
        Err(Error::unsupported(self.relation_kind(), "merge"))
    }

    /// The single set whose tuples this relation yields.
    fn base_set(&self) -> Result<Rc<Set>> {
        Err(Error::unsupported(self.relation_kind(), "base_set"))
    }

    fn relation_kind(&self) -> &'static str {
        self.lifecycle().kind()
    }

    fn has_attribute(&self, name: &str) -> bool {
        self.attribute(name).is_ok()
    }

    /// Current tuples: the materialized store while live, otherwise an
    /// on-demand read.
    fn tuples(&self) -> Vec<TupleRef> {
        if self.is_live() {
            self.store().snapshot()
        } else {
            self.initial_read()
        }
    }

    fn first(&self) -> Option<TupleRef> {
        if self.is_live() {
            self.store().first()
        } else {
            self.initial_read().into_iter().next()
        }
    }

    fn len(&self) -> usize {
        if self.is_live() {
            self.store().len()
        } else {
            self.initial_read().len()
        }
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if the tuple, by identity, is currently a member.
    fn contains(&self, tuple: &Tuple) -> bool {
        if self.is_live() {
            self.store().contains(tuple.id())
        } else {
            self.initial_read().iter().any(|t| t.id() == tuple.id())
        }
    }

    fn find(&self, finder: Finder) -> Option<TupleRef> {
        match finder {
            Finder::Key(key) => self
                .tuples()
                .into_iter()
                .find(|t| t.key_value().is_some_and(|k| k == key)),
            Finder::Matching(predicate) => self.tuples().into_iter().find(|t| predicate.eval(t)),
        }
    }
}

/// Builder methods available on any relation handle.
pub trait RelationExt {
    /// Returns the handle as a type-erased relation.
    fn to_relation(&self) -> RelationRef;

    /// Tuples of this relation satisfying the predicate.
    fn select(&self, predicate: &PredicateRef) -> Rc<Selection> {
        Selection::new(self.to_relation(), predicate.clone())
    }

    /// Starts an inner join; finish it with `on`.
    fn join<O: RelationExt + ?Sized>(&self, other: &O) -> JoinBuilder {
        JoinBuilder {
            left: self.to_relation(),
            right: other.to_relation(),
        }
    }

    /// The distinct tuples of `set` that this relation's tuples contain.
    fn project_set(&self, set: &Rc<Set>) -> Rc<SetProjection> {
        SetProjection::new(self.to_relation(), set.clone())
    }

    /// The distinct value combinations of the given attributes.
    fn project(&self, attributes: &[AttributeRef]) -> Rc<AttributesProjection> {
        AttributesProjection::new(self.to_relation(), attributes.to_vec())
    }

    /// This relation's tuples in sort-key order.
    fn order_by<K, I>(&self, keys: I) -> Rc<Ordering>
    where
        K: Into<SortKey>,
        I: IntoIterator<Item = K>,
    {
        Ordering::new(self.to_relation(), keys.into_iter().map(Into::into).collect())
    }

    /// At most the first tuple of this relation.
    fn singleton(&self) -> Rc<SingletonRelation> {
        SingletonRelation::new(self.to_relation())
    }

    /// A signal tracking `attribute` of this relation's first tuple.
    fn signal(&self, attribute: &AttributeRef) -> SignalRef {
        Signal::relation(self.to_relation(), attribute.clone())
    }

    /// Subscribes to insertions. The relation must be retained by `retainer`.
    fn on_insert<F>(&self, retainer: &Retainer, callback: F) -> Result<Subscription>
    where
        F: Fn(&TupleRef) + 'static,
    {
        let relation = self.to_relation();
        if !relation.is_live() {
            return Err(Error::not_live(relation.object_id(), "on_insert"));
        }
        relation.events().on_insert.subscribe(retainer, callback)
    }

    /// Subscribes to deletions. The relation must be retained by `retainer`.
    fn on_delete<F>(&self, retainer: &Retainer, callback: F) -> Result<Subscription>
    where
        F: Fn(&TupleRef) + 'static,
    {
        let relation = self.to_relation();
        if !relation.is_live() {
            return Err(Error::not_live(relation.object_id(), "on_delete"));
        }
        relation.events().on_delete.subscribe(retainer, callback)
    }

    /// Subscribes to field updates of member tuples. The relation must be
    /// retained by `retainer`.
    fn on_tuple_update<F>(&self, retainer: &Retainer, callback: F) -> Result<Subscription>
    where
        F: Fn(&TupleUpdate) + 'static,
    {
        let relation = self.to_relation();
        if !relation.is_live() {
            return Err(Error::not_live(relation.object_id(), "on_tuple_update"));
        }
        relation.events().on_tuple_update.subscribe(retainer, callback)
    }
}

impl<R: Relation + 'static> RelationExt for Rc<R> {
    fn to_relation(&self) -> RelationRef {
        self.clone()
    }
}

impl RelationExt for RelationRef {
    fn to_relation(&self) -> RelationRef {
        self.clone()
    }
}

/// An inner join waiting for its predicate.
pub struct JoinBuilder {
    left: RelationRef,
    right: RelationRef,
}

impl JoinBuilder {
    pub fn on(self, predicate: &PredicateRef) -> Rc<InnerJoin> {
        InnerJoin::new(self.left, self.right, predicate.clone())
    }
}

/// Resolves an attribute through a list of operands, left to right.
pub(crate) fn resolve_attribute(kind: &str, operands: &[&RelationRef], name: &str) -> Result<AttributeRef> {
    operands
        .iter()
        .find_map(|operand| operand.attribute(name).ok())
        .ok_or_else(|| Error::attribute_not_found(String::from(kind), name))
}

/// Wraps a handler so it runs against the upgraded owner, if still alive.
pub(crate) fn forward<T, E>(this: &Weak<T>, handler: fn(&T, &E)) -> impl Fn(&E) + 'static
where
    T: 'static,
    E: 'static,
{
    let this = this.clone();
    move |event: &E| {
        if let Some(target) = this.upgrade() {
            handler(&target, event);
        }
    }
}

/// Retains `tuple` on behalf of a relation. Event handlers cannot return
/// errors, so failures are logged.
pub(crate) fn retain_member(owner: &Lifecycle, tuple: &TupleRef) {
    if let Err(err) = tuple.retain(&owner.as_retainer()) {
        tracing::warn!(relation = owner.id(), tuple = tuple.id(), error = %err, "failed to retain member tuple");
    }
}

/// Releases `tuple` on behalf of a relation.
pub(crate) fn release_member(owner: &Lifecycle, tuple: &TupleRef) {
    if let Err(err) = tuple.release(&owner.as_retainer()) {
        tracing::warn!(relation = owner.id(), tuple = tuple.id(), error = %err, "failed to release member tuple");
    }
}

/// Merges set lists keeping first occurrences.
pub(crate) fn union_sets(lists: impl IntoIterator<Item = Vec<Rc<Set>>>) -> Vec<Rc<Set>> {
    let mut out: Vec<Rc<Set>> = Vec::new();
    for set in lists.into_iter().flatten() {
        if !out.iter().any(|s| s.object_id() == set.object_id()) {
            out.push(set);
        }
    }
    out
}
