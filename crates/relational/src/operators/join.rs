//! Incremental inner join.
//!
//! When the predicate equates an attribute of each operand (directly or
//! inside a conjunction), both sides are kept in hash indexes on those
//! attributes so an arriving tuple only probes the matching bucket of the
//! other side. Any other predicate falls back to scanning the other
//! operand. Either way the full predicate decides every pair.

use crate::attribute::AttributeRef;
use crate::describe::QueryDescription;
use crate::predicate::{Predicate, PredicateRef};
use crate::relation::{
    forward, release_member, resolve_attribute, retain_member, union_sets, Relation, RelationEvents, RelationRef,
};
use crate::set::Set;
use crate::store::TupleStore;
use crate::tuple::{Tuple, TupleRef, TupleUpdate};
use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use alloc::string::ToString;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::RefCell;
use hashbrown::{HashMap, HashSet};
use tributary_core::{ObjectId, Result, Value};
use tributary_reactive::{Lifecycle, Retainable, Subscription};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

/// Operand tuples bucketed by the value of one attribute.
struct JoinIndex {
    attribute: AttributeRef,
    buckets: HashMap<Value, Vec<TupleRef>>,
    keys: HashMap<ObjectId, Value>,
}

impl JoinIndex {
    fn build(attribute: AttributeRef, tuples: Vec<TupleRef>) -> Self {
        let mut index = JoinIndex {
            attribute,
            buckets: HashMap::new(),
            keys: HashMap::new(),
        };
        for tuple in &tuples {
            index.insert(tuple);
        }
        index
    }

    /// The indexed value of `tuple`. Null never equals anything, so null
    /// keys are neither stored nor probed.
    fn key_of(&self, tuple: &Tuple) -> Option<Value> {
        tuple.value(&self.attribute).filter(|v| !v.is_null())
    }

    fn insert(&mut self, tuple: &TupleRef) {
        let Some(key) = self.key_of(tuple) else {
            return;
        };
        self.keys.insert(tuple.id(), key.clone());
        self.buckets.entry(key).or_default().push(tuple.clone());
    }

    fn remove(&mut self, tuple: &Tuple) {
        let Some(key) = self.keys.remove(&tuple.id()) else {
            return;
        };
        if let Some(bucket) = self.buckets.get_mut(&key) {
            bucket.retain(|t| t.id() != tuple.id());
            if bucket.is_empty() {
                self.buckets.remove(&key);
            }
        }
    }

    fn probe(&self, key: &Value) -> Vec<TupleRef> {
        self.buckets.get(key).cloned().unwrap_or_default()
    }
}

/// Pairs of tuples from two operands satisfying a predicate, exposed as
/// composite tuples.
///
/// Each matching pair is materialized once; its composite tuple keeps its
/// identity for as long as the pair matches. Field updates of either half
/// are re-checked against the predicate and either relayed with the
/// composite as subject or turned into a delete.
pub struct InnerJoin {
    lifecycle: Lifecycle,
    this: Weak<InnerJoin>,
    operand_1: RelationRef,
    operand_2: RelationRef,
    predicate: PredicateRef,
    equi_keys: Option<(AttributeRef, AttributeRef)>,
    left_index: RefCell<Option<JoinIndex>>,
    right_index: RefCell<Option<JoinIndex>>,
    pairs: RefCell<HashMap<(ObjectId, ObjectId), TupleRef>>,
    /// Partner ids of every paired tuple, per side.
    left_partners: RefCell<HashMap<ObjectId, HashSet<ObjectId>>>,
    right_partners: RefCell<HashMap<ObjectId, HashSet<ObjectId>>>,
    store: TupleStore,
    events: RelationEvents,
}

impl InnerJoin {
    pub fn new(operand_1: RelationRef, operand_2: RelationRef, predicate: PredicateRef) -> Rc<Self> {
        let equi_keys = equi_keys(&operand_1, &operand_2, &predicate);
        Rc::new_cyclic(|this| {
            let lifecycle = Lifecycle::new("InnerJoin");
            let events = RelationEvents::new(&lifecycle);
            InnerJoin {
                lifecycle,
                this: this.clone(),
                operand_1,
                operand_2,
                predicate,
                equi_keys,
                left_index: RefCell::new(None),
                right_index: RefCell::new(None),
                pairs: RefCell::new(HashMap::new()),
                left_partners: RefCell::new(HashMap::new()),
                right_partners: RefCell::new(HashMap::new()),
                store: TupleStore::new(),
                events,
            }
        })
    }

    #[inline]
    pub fn left(&self) -> &RelationRef {
        &self.operand_1
    }

    #[inline]
    pub fn right(&self) -> &RelationRef {
        &self.operand_2
    }

    #[inline]
    pub fn predicate(&self) -> &PredicateRef {
        &self.predicate
    }

    /// Returns true if the join probes hash indexes instead of scanning.
    pub fn is_indexed(&self) -> bool {
        self.equi_keys.is_some()
    }

    fn operand(&self, side: Side) -> &RelationRef {
        match side {
            Side::Left => &self.operand_1,
            Side::Right => &self.operand_2,
        }
    }

    fn index(&self, side: Side) -> &RefCell<Option<JoinIndex>> {
        match side {
            Side::Left => &self.left_index,
            Side::Right => &self.right_index,
        }
    }

    fn other(side: Side) -> Side {
        match side {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    /// Tuples of the opposite operand that may pair with `tuple`.
    fn candidates(&self, side: Side, tuple: &Tuple) -> Vec<TupleRef> {
        let other = Self::other(side);
        {
            let own = self.index(side).borrow();
            let theirs = self.index(other).borrow();
            if let (Some(own), Some(theirs)) = (own.as_ref(), theirs.as_ref()) {
                return match own.key_of(tuple) {
                    Some(key) => theirs.probe(&key),
                    None => Vec::new(),
                };
            }
        }
        self.operand(other).tuples()
    }

    fn arrange(side: Side, tuple: &TupleRef, partner: &TupleRef) -> (TupleRef, TupleRef) {
        match side {
            Side::Left => (tuple.clone(), partner.clone()),
            Side::Right => (partner.clone(), tuple.clone()),
        }
    }

    fn partners(&self, side: Side) -> &RefCell<HashMap<ObjectId, HashSet<ObjectId>>> {
        match side {
            Side::Left => &self.left_partners,
            Side::Right => &self.right_partners,
        }
    }

    fn link(&self, (left, right): (ObjectId, ObjectId)) {
        self.left_partners.borrow_mut().entry(left).or_default().insert(right);
        self.right_partners.borrow_mut().entry(right).or_default().insert(left);
    }

    fn unlink(&self, (left, right): (ObjectId, ObjectId)) {
        for (partners, id, partner) in [(&self.left_partners, left, right), (&self.right_partners, right, left)] {
            let mut partners = partners.borrow_mut();
            if let Some(set) = partners.get_mut(&id) {
                set.remove(&partner);
                if set.is_empty() {
                    partners.remove(&id);
                }
            }
        }
    }

    fn pair_key(composite: &Tuple) -> Option<(ObjectId, ObjectId)> {
        composite.components().map(|(left, right)| (left.id(), right.id()))
    }

    /// Builds the composite for a pair if it matches and is not yet present.
    fn matching_pair(&self, left: TupleRef, right: TupleRef) -> Option<TupleRef> {
        let key = (left.id(), right.id());
        if self.pairs.borrow().contains_key(&key) {
            return None;
        }
        let composite = Tuple::composite(left, right);
        if !self.predicate.eval(&composite) {
            return None;
        }
        self.pairs.borrow_mut().insert(key, composite.clone());
        self.link(key);
        self.store.push(composite.clone());
        Some(composite)
    }

    fn add_pair(&self, left: TupleRef, right: TupleRef) {
        if let Some(composite) = self.matching_pair(left, right) {
            retain_member(&self.lifecycle, &composite);
            self.events.on_insert.call(&composite);
        }
    }

    fn remove_pair(&self, composite: &TupleRef) {
        if let Some(key) = Self::pair_key(composite) {
            self.pairs.borrow_mut().remove(&key);
            self.unlink(key);
        }
        if let Some(removed) = self.store.remove(composite.id()) {
            release_member(&self.lifecycle, &removed);
            self.events.on_delete.call(&removed);
        }
    }

    /// Composites pairing the tuple `id` of `side`.
    fn pairs_of(&self, side: Side, id: ObjectId) -> Vec<TupleRef> {
        let partners = self.partners(side).borrow();
        let Some(partners) = partners.get(&id) else {
            return Vec::new();
        };
        let pairs = self.pairs.borrow();
        let mut out: Vec<TupleRef> = partners
            .iter()
            .filter_map(|&partner| {
                let key = match side {
                    Side::Left => (id, partner),
                    Side::Right => (partner, id),
                };
                pairs.get(&key).cloned()
            })
            .collect();
        // Creation order
        out.sort_by_key(|c| c.id());
        out
    }

    fn inserted(&self, side: Side, tuple: &TupleRef) {
        if let Some(index) = self.index(side).borrow_mut().as_mut() {
            index.insert(tuple);
        }
        for partner in self.candidates(side, tuple) {
            let (left, right) = Self::arrange(side, tuple, &partner);
            self.add_pair(left, right);
        }
    }

    fn deleted(&self, side: Side, tuple: &TupleRef) {
        if let Some(index) = self.index(side).borrow_mut().as_mut() {
            index.remove(tuple);
        }
        for composite in self.pairs_of(side, tuple.id()) {
            self.remove_pair(&composite);
        }
    }

    fn updated(&self, side: Side, update: &TupleUpdate) {
        let tuple = &update.tuple;
        if let Some(index) = self.index(side).borrow_mut().as_mut() {
            if index.attribute == update.attribute {
                index.remove(tuple);
                index.insert(tuple);
            }
        }

        for composite in self.pairs_of(side, tuple.id()) {
            if self.predicate.eval(&composite) {
                self.events.on_tuple_update.call(&TupleUpdate {
                    tuple: composite,
                    attribute: update.attribute.clone(),
                    old: update.old.clone(),
                    new: update.new.clone(),
                });
            } else {
                self.remove_pair(&composite);
            }
        }
        for partner in self.candidates(side, tuple) {
            let (left, right) = Self::arrange(side, tuple, &partner);
            self.add_pair(left, right);
        }
    }

    /// Re-evaluates every pair after the predicate changed.
    fn rematch(&self) {
        for composite in self.store.snapshot() {
            if !self.predicate.eval(&composite) {
                self.remove_pair(&composite);
            }
        }
        for left in self.operand_1.tuples() {
            for right in self.candidates(Side::Left, &left) {
                self.add_pair(left.clone(), right);
            }
        }
        tracing::debug!(relation = self.lifecycle.id(), pairs = self.store.len(), "join re-matched");
    }

    fn left_inserted(&self, tuple: &TupleRef) {
        self.inserted(Side::Left, tuple);
    }

    fn right_inserted(&self, tuple: &TupleRef) {
        self.inserted(Side::Right, tuple);
    }

    fn left_deleted(&self, tuple: &TupleRef) {
        self.deleted(Side::Left, tuple);
    }

    fn right_deleted(&self, tuple: &TupleRef) {
        self.deleted(Side::Right, tuple);
    }

    fn left_updated(&self, update: &TupleUpdate) {
        self.updated(Side::Left, update);
    }

    fn right_updated(&self, update: &TupleUpdate) {
        self.updated(Side::Right, update);
    }
}

/// Finds an equality between an attribute owned only by the left operand's
/// sets and one owned only by the right's, returned as (left, right).
fn equi_keys(left: &RelationRef, right: &RelationRef, predicate: &Predicate) -> Option<(AttributeRef, AttributeRef)> {
    let owners = |relation: &RelationRef| -> HashSet<ObjectId> {
        relation.composed_sets().iter().map(|s| s.object_id()).collect()
    };
    let (left_sets, right_sets) = (owners(left), owners(right));
    let only = |attribute: &AttributeRef, side: &HashSet<ObjectId>, other: &HashSet<ObjectId>| {
        side.contains(&attribute.owner_id()) && !other.contains(&attribute.owner_id())
    };

    predicate.equalities().into_iter().find_map(|(a, b)| {
        if only(&a, &left_sets, &right_sets) && only(&b, &right_sets, &left_sets) {
            Some((a, b))
        } else if only(&b, &left_sets, &right_sets) && only(&a, &right_sets, &left_sets) {
            Some((b, a))
        } else {
            None
        }
    })
}

impl Retainable for InnerJoin {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn retained_children(&self) -> Vec<&dyn Retainable> {
        vec![
            self.operand_1.as_retainable(),
            self.operand_2.as_retainable(),
            self.predicate.as_ref() as &dyn Retainable,
        ]
    }

    fn materialize(&self) -> Result<()> {
        if let Some((left_key, right_key)) = &self.equi_keys {
            *self.left_index.borrow_mut() = Some(JoinIndex::build(left_key.clone(), self.operand_1.tuples()));
            *self.right_index.borrow_mut() = Some(JoinIndex::build(right_key.clone(), self.operand_2.tuples()));
        }
        let me = self.lifecycle.as_retainer();
        for left in self.operand_1.tuples() {
            for right in self.candidates(Side::Left, &left) {
                if let Some(composite) = self.matching_pair(left.clone(), right) {
                    composite.retain(&me)?;
                }
            }
        }
        tracing::debug!(
            relation = self.lifecycle.id(),
            pairs = self.store.len(),
            indexed = self.is_indexed(),
            "join materialized"
        );
        Ok(())
    }

    fn dematerialize(&self) {
        self.left_index.borrow_mut().take();
        self.right_index.borrow_mut().take();
        self.pairs.borrow_mut().clear();
        self.left_partners.borrow_mut().clear();
        self.right_partners.borrow_mut().clear();
        for composite in self.store.clear() {
            release_member(&self.lifecycle, &composite);
        }
    }

    fn install_subscriptions(&self) -> Result<Vec<Subscription>> {
        let me = self.lifecycle.as_retainer();
        let left = self.operand_1.events();
        let right = self.operand_2.events();
        Ok(vec![
            left.on_insert.subscribe(&me, forward(&self.this, InnerJoin::left_inserted))?,
            left.on_delete.subscribe(&me, forward(&self.this, InnerJoin::left_deleted))?,
            left.on_tuple_update
                .subscribe(&me, forward(&self.this, InnerJoin::left_updated))?,
            right.on_insert.subscribe(&me, forward(&self.this, InnerJoin::right_inserted))?,
            right.on_delete.subscribe(&me, forward(&self.this, InnerJoin::right_deleted))?,
            right
                .on_tuple_update
                .subscribe(&me, forward(&self.this, InnerJoin::right_updated))?,
            self.predicate
                .update_events()
                .subscribe(&me, forward(&self.this, |join: &InnerJoin, _: &()| join.rematch()))?,
        ])
    }
}

impl Relation for InnerJoin {
    fn as_retainable(&self) -> &dyn Retainable {
        self
    }

    fn events(&self) -> &RelationEvents {
        &self.events
    }

    fn store(&self) -> &TupleStore {
        &self.store
    }

    fn initial_read(&self) -> Vec<TupleRef> {
        let rights = self.operand_2.tuples();
        let mut out = Vec::new();
        for left in self.operand_1.tuples() {
            for right in &rights {
                let composite = Tuple::composite(left.clone(), right.clone());
                if self.predicate.eval(&composite) {
                    out.push(composite);
                }
            }
        }
        out
    }

    fn attribute(&self, name: &str) -> Result<AttributeRef> {
        resolve_attribute("InnerJoin", &[&self.operand_1, &self.operand_2], name)
    }

    fn composed_sets(&self) -> Vec<Rc<Set>> {
        union_sets([self.operand_1.composed_sets(), self.operand_2.composed_sets()])
    }

    fn describe(&self) -> QueryDescription {
        QueryDescription::InnerJoin {
            left: Box::new(self.operand_1.describe()),
            right: Box::new(self.operand_2.describe()),
            predicate: self.predicate.to_string(),
        }
    }
}
