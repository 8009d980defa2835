//! Sorted view of a relation.

use crate::attribute::{AttributeRef, SortKey};
use crate::describe::QueryDescription;
use crate::relation::{forward, release_member, retain_member, Relation, RelationEvents, RelationRef};
use crate::set::Set;
use crate::store::TupleStore;
use crate::tuple::{Tuple, TupleRef, TupleUpdate};
use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use alloc::string::ToString;
use alloc::vec;
use alloc::vec::Vec;
use core::cmp::Ordering as CmpOrdering;
use tributary_core::{Result, Value};
use tributary_reactive::{Lifecycle, Retainable, Subscription};

/// The operand's tuples sorted by a list of keys.
///
/// The first key is primary and later keys break ties. Tuples equal on
/// every key keep the order they arrived in. A missing value sorts as null,
/// which comes before every other value.
pub struct Ordering {
    lifecycle: Lifecycle,
    this: Weak<Ordering>,
    operand: RelationRef,
    keys: Vec<SortKey>,
    store: TupleStore,
    events: RelationEvents,
}

impl Ordering {
    pub fn new(operand: RelationRef, keys: Vec<SortKey>) -> Rc<Self> {
        Rc::new_cyclic(|this| {
            let lifecycle = Lifecycle::new("Ordering");
            let events = RelationEvents::new(&lifecycle);
            Ordering {
                lifecycle,
                this: this.clone(),
                operand,
                keys,
                store: TupleStore::new(),
                events,
            }
        })
    }

    #[inline]
    pub fn operand(&self) -> &RelationRef {
        &self.operand
    }

    #[inline]
    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    /// Position of a member tuple in the current order.
    pub fn index_of(&self, tuple: &Tuple) -> Option<usize> {
        if self.is_live() {
            self.store.position(tuple.id())
        } else {
            self.initial_read().iter().position(|t| t.id() == tuple.id())
        }
    }

    /// Compares two tuples by the sort keys.
    pub fn compare(&self, a: &Tuple, b: &Tuple) -> CmpOrdering {
        for key in &self.keys {
            let left = a.value(&key.attribute).unwrap_or(Value::Null);
            let right = b.value(&key.attribute).unwrap_or(Value::Null);
            let ordering = key.direction.apply(left.cmp(&right));
            if ordering != CmpOrdering::Equal {
                return ordering;
            }
        }
        CmpOrdering::Equal
    }

    fn is_sort_key(&self, attribute: &AttributeRef) -> bool {
        self.keys.iter().any(|k| k.attribute == *attribute)
    }

    /// Inserts after every tuple that does not sort after `tuple`.
    fn place(&self, tuple: &TupleRef) -> bool {
        let index = self
            .store
            .partition_point(|other| self.compare(other, tuple) != CmpOrdering::Greater);
        self.store.insert_at(index, tuple.clone())
    }

    fn operand_inserted(&self, tuple: &TupleRef) {
        if self.place(tuple) {
            retain_member(&self.lifecycle, tuple);
            self.events.on_insert.call(tuple);
        }
    }

    fn operand_deleted(&self, tuple: &TupleRef) {
        if let Some(removed) = self.store.remove(tuple.id()) {
            release_member(&self.lifecycle, &removed);
            self.events.on_delete.call(&removed);
        }
    }

    fn operand_updated(&self, update: &TupleUpdate) {
        if !self.store.contains(update.tuple.id()) {
            return;
        }
        if self.is_sort_key(&update.attribute) {
            let from = self.store.position(update.tuple.id());
            if let Some(tuple) = self.store.remove(update.tuple.id()) {
                self.place(&tuple);
                tracing::trace!(
                    relation = self.lifecycle.id(),
                    tuple = tuple.id(),
                    from,
                    to = self.store.position(tuple.id()),
                    "tuple relocated"
                );
            }
        }
        self.events.on_tuple_update.call(update);
    }
}

impl Retainable for Ordering {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn retained_children(&self) -> Vec<&dyn Retainable> {
        vec![self.operand.as_retainable()]
    }

    fn materialize(&self) -> Result<()> {
        let sorted = self.initial_read();
        let me = self.lifecycle.as_retainer();
        for tuple in &sorted {
            tuple.retain(&me)?;
        }
        self.store.replace(sorted);
        Ok(())
    }

    fn dematerialize(&self) {
        for tuple in self.store.clear() {
            release_member(&self.lifecycle, &tuple);
        }
    }

    fn install_subscriptions(&self) -> Result<Vec<Subscription>> {
        let me = self.lifecycle.as_retainer();
        let events = self.operand.events();
        Ok(vec![
            events
                .on_insert
                .subscribe(&me, forward(&self.this, Ordering::operand_inserted))?,
            events
                .on_delete
                .subscribe(&me, forward(&self.this, Ordering::operand_deleted))?,
            events
                .on_tuple_update
                .subscribe(&me, forward(&self.this, Ordering::operand_updated))?,
        ])
    }
}

impl Relation for Ordering {
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
        let mut tuples = self.operand.tuples();
        tuples.sort_by(|a, b| self.compare(a, b));
        tuples
    }

    fn attribute(&self, name: &str) -> Result<AttributeRef> {
        self.operand.attribute(name)
    }

    fn composed_sets(&self) -> Vec<Rc<Set>> {
        self.operand.composed_sets()
    }

    fn describe(&self) -> QueryDescription {
        QueryDescription::Ordering {
            operand: Box::new(self.operand.describe()),
            keys: self.keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    fn merge(&self, tuples: Vec<TupleRef>) -> Result<Vec<TupleRef>> {
        self.operand.merge(tuples)
    }

    fn base_set(&self) -> Result<Rc<Set>> {
        self.operand.base_set()
    }
}
