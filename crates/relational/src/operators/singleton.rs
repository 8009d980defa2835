//! First-tuple view of a relation.

use crate::attribute::AttributeRef;
use crate::describe::QueryDescription;
use crate::relation::{forward, release_member, retain_member, Relation, RelationEvents, RelationRef};
use crate::set::Set;
use crate::store::TupleStore;
use crate::tuple::{Lookup, TupleKey, TupleRef, TupleUpdate};
use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use alloc::vec;
use alloc::vec::Vec;
use tributary_core::{Result, Value};
use tributary_reactive::{Lifecycle, Retainable, Subscription};

/// At most one tuple: the operand's current first.
///
/// When the first tuple changes, observers see `on_delete` for the old one
/// followed by `on_insert` for the new one.
pub struct SingletonRelation {
    lifecycle: Lifecycle,
    this: Weak<SingletonRelation>,
    operand: RelationRef,
    store: TupleStore,
    events: RelationEvents,
}

impl SingletonRelation {
    pub fn new(operand: RelationRef) -> Rc<Self> {
        Rc::new_cyclic(|this| {
            let lifecycle = Lifecycle::new("SingletonRelation");
            let events = RelationEvents::new(&lifecycle);
            SingletonRelation {
                lifecycle,
                this: this.clone(),
                operand,
                store: TupleStore::new(),
                events,
            }
        })
    }

    #[inline]
    pub fn operand(&self) -> &RelationRef {
        &self.operand
    }

    /// The current tuple, if the operand is not empty.
    pub fn tuple(&self) -> Option<TupleRef> {
        self.first()
    }

    /// Looks up a field or component of the current tuple.
    pub fn get<'a>(&self, key: impl Into<TupleKey<'a>>) -> Option<Lookup> {
        self.tuple()?.get(key)
    }

    /// Reads a field of the current tuple.
    pub fn value<'a>(&self, key: impl Into<TupleKey<'a>>) -> Option<Value> {
        self.tuple()?.value(key)
    }

    /// Assigns a field of the current tuple.
    pub fn set_field<'a>(&self, key: impl Into<TupleKey<'a>>, value: impl Into<Value>) -> Result<()> {
        match self.tuple() {
            Some(tuple) => tuple.set_field(key, value),
            None => Err(tributary_core::Error::unsupported("SingletonRelation", "set_field")),
        }
    }

    /// Swaps in the operand's current first tuple. Returns true if it changed.
    fn refresh(&self) -> bool {
        let next = self.operand.first();
        let previous = self.store.first();
        if next.as_ref().map(|t| t.id()) == previous.as_ref().map(|t| t.id()) {
            return false;
        }

        self.store.replace(next.iter().cloned().collect());
        if let Some(next) = &next {
            retain_member(&self.lifecycle, next);
        }
        if let Some(previous) = &previous {
            release_member(&self.lifecycle, previous);
        }
        if let Some(previous) = &previous {
            self.events.on_delete.call(previous);
        }
        if let Some(next) = &next {
            self.events.on_insert.call(next);
        }
        true
    }

    fn operand_changed(&self, _tuple: &TupleRef) {
        self.refresh();
    }

    fn operand_updated(&self, update: &TupleUpdate) {
        if self.refresh() {
            return;
        }
        if self.store.contains(update.tuple.id()) {
            self.events.on_tuple_update.call(update);
        }
    }
}

impl Retainable for SingletonRelation {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn retained_children(&self) -> Vec<&dyn Retainable> {
        vec![self.operand.as_retainable()]
    }

    fn materialize(&self) -> Result<()> {
        if let Some(first) = self.operand.first() {
            first.retain(&self.lifecycle.as_retainer())?;
            self.store.push(first);
        }
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
                .subscribe(&me, forward(&self.this, SingletonRelation::operand_changed))?,
            events
                .on_delete
                .subscribe(&me, forward(&self.this, SingletonRelation::operand_changed))?,
            events
                .on_tuple_update
                .subscribe(&me, forward(&self.this, SingletonRelation::operand_updated))?,
        ])
    }
}

impl Relation for SingletonRelation {
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
        self.operand.first().into_iter().collect()
    }

    fn attribute(&self, name: &str) -> Result<AttributeRef> {
        self.operand.attribute(name)
    }

    fn composed_sets(&self) -> Vec<Rc<Set>> {
        self.operand.composed_sets()
    }

    fn describe(&self) -> QueryDescription {
        QueryDescription::Singleton {
            operand: Box::new(self.operand.describe()),
        }
    }

    fn merge(&self, tuples: Vec<TupleRef>) -> Result<Vec<TupleRef>> {
        self.operand.merge(tuples)
    }

    fn base_set(&self) -> Result<Rc<Set>> {
        self.operand.base_set()
    }
}
