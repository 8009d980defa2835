//! Projection operators.
//!
//! Both projections are many-to-one: several operand tuples may map to the
//! same projected tuple. Each keeps a multiplicity count so a projected
//! tuple is inserted when its first source appears and deleted when its
//! last source goes.

use crate::attribute::AttributeRef;
use crate::describe::QueryDescription;
use crate::relation::{forward, release_member, retain_member, Relation, RelationEvents, RelationRef};
use crate::set::Set;
use crate::store::TupleStore;
use crate::tuple::{Tuple, TupleRef, TupleUpdate};
use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;
use core::cell::RefCell;
use hashbrown::{HashMap, HashSet};
use tributary_core::{Error, ObjectId, Result, Value};
use tributary_reactive::{Lifecycle, Retainable, Subscription};

/// The last update relayed for a projected tuple.
type Relayed = (AttributeRef, Value, Value);

/// The distinct tuples of one base set found inside an operand's tuples.
///
/// Typically applied to a join to recover one side of it. Field updates
/// reaching the projection through several operand tuples are relayed
/// once.
pub struct SetProjection {
    lifecycle: Lifecycle,
    this: Weak<SetProjection>,
    operand: RelationRef,
    set: Rc<Set>,
    store: TupleStore,
    counts: RefCell<HashMap<ObjectId, usize>>,
    relayed: RefCell<HashMap<ObjectId, Relayed>>,
    events: RelationEvents,
}

impl SetProjection {
    pub fn new(operand: RelationRef, set: Rc<Set>) -> Rc<Self> {
        Rc::new_cyclic(|this| {
            let lifecycle = Lifecycle::new("SetProjection");
            let events = RelationEvents::new(&lifecycle);
            SetProjection {
                lifecycle,
                this: this.clone(),
                operand,
                set,
                store: TupleStore::new(),
                counts: RefCell::new(HashMap::new()),
                relayed: RefCell::new(HashMap::new()),
                events,
            }
        })
    }

    #[inline]
    pub fn operand(&self) -> &RelationRef {
        &self.operand
    }

    #[inline]
    pub fn set(&self) -> &Rc<Set> {
        &self.set
    }

    /// Number of operand tuples currently mapping to `tuple`.
    pub fn multiplicity(&self, tuple: &Tuple) -> usize {
        self.counts.borrow().get(&tuple.id()).copied().unwrap_or(0)
    }

    fn project(&self, tuple: &Tuple) -> Option<TupleRef> {
        tuple.component(self.set.object_id())
    }

    /// Bumps the count for a component, returning true on first sight.
    fn increment(&self, component: &TupleRef) -> bool {
        let mut counts = self.counts.borrow_mut();
        let count = counts.entry(component.id()).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Drops the count for a component, returning true when it reaches zero.
    fn decrement(&self, component: &TupleRef) -> bool {
        let mut counts = self.counts.borrow_mut();
        match counts.get_mut(&component.id()) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                counts.remove(&component.id());
                true
            }
            None => false,
        }
    }

    fn operand_inserted(&self, tuple: &TupleRef) {
        let Some(component) = self.project(tuple) else {
            return;
        };
        if self.increment(&component) && self.store.push(component.clone()) {
            retain_member(&self.lifecycle, &component);
            self.events.on_insert.call(&component);
        }
    }

    fn operand_deleted(&self, tuple: &TupleRef) {
        let Some(component) = self.project(tuple) else {
            return;
        };
        if !self.decrement(&component) {
            return;
        }
        self.relayed.borrow_mut().remove(&component.id());
        if let Some(removed) = self.store.remove(component.id()) {
            release_member(&self.lifecycle, &removed);
            self.events.on_delete.call(&removed);
        }
    }

    fn operand_updated(&self, update: &TupleUpdate) {
        if update.attribute.owner_id() != self.set.object_id() {
            return;
        }
        let Some(component) = self.project(&update.tuple) else {
            return;
        };
        if !self.store.contains(component.id()) {
            return;
        }
        {
            let mut relayed = self.relayed.borrow_mut();
            let duplicate = relayed
                .get(&component.id())
                .is_some_and(|(a, old, new)| *a == update.attribute && *old == update.old && *new == update.new);
            if duplicate {
                return;
            }
            relayed.insert(
                component.id(),
                (update.attribute.clone(), update.old.clone(), update.new.clone()),
            );
        }
        self.events.on_tuple_update.call(&TupleUpdate {
            tuple: component,
            attribute: update.attribute.clone(),
            old: update.old.clone(),
            new: update.new.clone(),
        });
    }
}

impl Retainable for SetProjection {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn retained_children(&self) -> Vec<&dyn Retainable> {
        vec![self.operand.as_retainable()]
    }

    fn materialize(&self) -> Result<()> {
        let me = self.lifecycle.as_retainer();
        for tuple in self.operand.tuples() {
            if let Some(component) = self.project(&tuple) {
                if self.increment(&component) && self.store.push(component.clone()) {
                    component.retain(&me)?;
                }
            }
        }
        Ok(())
    }

    fn dematerialize(&self) {
        self.counts.borrow_mut().clear();
        self.relayed.borrow_mut().clear();
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
                .subscribe(&me, forward(&self.this, SetProjection::operand_inserted))?,
            events
                .on_delete
                .subscribe(&me, forward(&self.this, SetProjection::operand_deleted))?,
            events
                .on_tuple_update
                .subscribe(&me, forward(&self.this, SetProjection::operand_updated))?,
        ])
    }
}

impl Relation for SetProjection {
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
        let mut seen = HashSet::new();
        self.operand
            .tuples()
            .iter()
            .filter_map(|t| self.project(t))
            .filter(|c| seen.insert(c.id()))
            .collect()
    }

    fn attribute(&self, name: &str) -> Result<AttributeRef> {
        self.set.attribute(name)
    }

    fn composed_sets(&self) -> Vec<Rc<Set>> {
        vec![self.set.clone()]
    }

    fn describe(&self) -> QueryDescription {
        QueryDescription::SetProjection {
            operand: Box::new(self.operand.describe()),
            set: self.set.name().to_string(),
        }
    }

    fn merge(&self, tuples: Vec<TupleRef>) -> Result<Vec<TupleRef>> {
        self.set.merge(tuples)
    }

    fn base_set(&self) -> Result<Rc<Set>> {
        Ok(self.set.clone())
    }
}

/// Distinct combinations of a chosen list of attributes.
///
/// Each combination is exposed as an immutable projected tuple. An update
/// to a projected attribute moves its source from one combination to
/// another, which observers see as a delete and an insert.
pub struct AttributesProjection {
    lifecycle: Lifecycle,
    this: Weak<AttributesProjection>,
    operand: RelationRef,
    attributes: Vec<AttributeRef>,
    store: TupleStore,
    /// Key of every operand tuple seen.
    sources: RefCell<HashMap<ObjectId, Vec<Value>>>,
    /// Projected tuple and multiplicity per key.
    groups: RefCell<HashMap<Vec<Value>, (TupleRef, usize)>>,
    events: RelationEvents,
}

impl AttributesProjection {
    pub fn new(operand: RelationRef, attributes: Vec<AttributeRef>) -> Rc<Self> {
        Rc::new_cyclic(|this| {
            let lifecycle = Lifecycle::new("AttributesProjection");
            let events = RelationEvents::new(&lifecycle);
            AttributesProjection {
                lifecycle,
                this: this.clone(),
                operand,
                attributes,
                store: TupleStore::new(),
                sources: RefCell::new(HashMap::new()),
                groups: RefCell::new(HashMap::new()),
                events,
            }
        })
    }

    #[inline]
    pub fn operand(&self) -> &RelationRef {
        &self.operand
    }

    #[inline]
    pub fn attributes(&self) -> &[AttributeRef] {
        &self.attributes
    }

    fn key(&self, tuple: &Tuple) -> Vec<Value> {
        self.attributes
            .iter()
            .map(|a| tuple.value(a).unwrap_or(Value::Null))
            .collect()
    }

    fn projected(&self, key: &[Value]) -> TupleRef {
        Tuple::projected(self.attributes.iter().cloned().zip(key.iter().cloned()).collect())
    }

    /// Counts one more source for `key`, returning the projected tuple if
    /// it is new.
    fn increment(&self, key: Vec<Value>) -> Option<TupleRef> {
        let mut groups = self.groups.borrow_mut();
        if let Some((_, count)) = groups.get_mut(&key) {
            *count += 1;
            return None;
        }
        let tuple = self.projected(&key);
        groups.insert(key, (tuple.clone(), 1));
        Some(tuple)
    }

    /// Counts one less source for `key`, returning the projected tuple if
    /// it has no sources left.
    fn decrement(&self, key: &[Value]) -> Option<TupleRef> {
        let mut groups = self.groups.borrow_mut();
        let (_, count) = groups.get_mut(key)?;
        if *count > 1 {
            *count -= 1;
            return None;
        }
        groups.remove(key).map(|(tuple, _)| tuple)
    }

    fn add(&self, key: Vec<Value>) {
        if let Some(tuple) = self.increment(key) {
            self.store.push(tuple.clone());
            retain_member(&self.lifecycle, &tuple);
            self.events.on_insert.call(&tuple);
        }
    }

    fn remove(&self, key: &[Value]) {
        if let Some(tuple) = self.decrement(key) {
            self.store.remove(tuple.id());
            release_member(&self.lifecycle, &tuple);
            self.events.on_delete.call(&tuple);
        }
    }

    fn operand_inserted(&self, tuple: &TupleRef) {
        let key = self.key(tuple);
        self.sources.borrow_mut().insert(tuple.id(), key.clone());
        self.add(key);
    }

    fn operand_deleted(&self, tuple: &TupleRef) {
        let key = self.sources.borrow_mut().remove(&tuple.id());
        if let Some(key) = key {
            self.remove(&key);
        }
    }

    fn operand_updated(&self, update: &TupleUpdate) {
        if !self.attributes.contains(&update.attribute) {
            return;
        }
        let new_key = self.key(&update.tuple);
        let old_key = self.sources.borrow_mut().insert(update.tuple.id(), new_key.clone());
        match old_key {
            Some(old_key) if old_key == new_key => {}
            Some(old_key) => {
                self.remove(&old_key);
                self.add(new_key);
            }
            None => self.add(new_key),
        }
    }
}

impl Retainable for AttributesProjection {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn retained_children(&self) -> Vec<&dyn Retainable> {
        vec![self.operand.as_retainable()]
    }

    fn materialize(&self) -> Result<()> {
        let me = self.lifecycle.as_retainer();
        for tuple in self.operand.tuples() {
            let key = self.key(&tuple);
            self.sources.borrow_mut().insert(tuple.id(), key.clone());
            if let Some(projected) = self.increment(key) {
                self.store.push(projected.clone());
                projected.retain(&me)?;
            }
        }
        Ok(())
    }

    fn dematerialize(&self) {
        self.sources.borrow_mut().clear();
        self.groups.borrow_mut().clear();
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
                .subscribe(&me, forward(&self.this, AttributesProjection::operand_inserted))?,
            events
                .on_delete
                .subscribe(&me, forward(&self.this, AttributesProjection::operand_deleted))?,
            events
                .on_tuple_update
                .subscribe(&me, forward(&self.this, AttributesProjection::operand_updated))?,
        ])
    }
}

impl Relation for AttributesProjection {
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
        let mut seen = HashSet::new();
        self.operand
            .tuples()
            .iter()
            .map(|t| self.key(t))
            .filter(|key| seen.insert(key.clone()))
            .map(|key| self.projected(&key))
            .collect()
    }

    fn attribute(&self, name: &str) -> Result<AttributeRef> {
        self.attributes
            .iter()
            .find(|a| a.name() == name)
            .cloned()
            .ok_or_else(|| Error::attribute_not_found("AttributesProjection", name))
    }

    fn composed_sets(&self) -> Vec<Rc<Set>> {
        self.operand
            .composed_sets()
            .into_iter()
            .filter(|set| self.attributes.iter().any(|a| a.owner_id() == set.object_id()))
            .collect()
    }

    fn describe(&self) -> QueryDescription {
        QueryDescription::AttributesProjection {
            operand: Box::new(self.operand.describe()),
            attributes: self.attributes.iter().map(|a| a.qualified_name()).collect::<Vec<String>>(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeExt;
    use crate::relation::RelationExt;
    use crate::set::SetBuilder;
    use core::cell::Cell;
    use tributary_core::DataType;
    use tributary_reactive::Retainer;

    fn fixture() -> (Rc<Set>, Rc<Set>, Retainer) {
        let users = SetBuilder::new("users")
            .unwrap()
            .attribute("id", DataType::Integer)
            .unwrap()
            .attribute("name", DataType::String)
            .unwrap()
            .build()
            .unwrap();
        let photos = SetBuilder::new("photos")
            .unwrap()
            .attribute("id", DataType::Integer)
            .unwrap()
            .attribute("user_id", DataType::Integer)
            .unwrap()
            .build()
            .unwrap();
        let root = Retainer::root();
        users.retain(&root).unwrap();
        photos.retain(&root).unwrap();
        (users, photos, root)
    }

    fn counter() -> (Rc<Cell<usize>>, impl Fn(&TupleRef) + 'static) {
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        (count, move |_: &TupleRef| c.set(c.get() + 1))
    }

    #[test]
    fn test_set_projection_multiplicity() {
        let (users, photos, root) = fixture();
        let user_id = users.attribute("id").unwrap();
        let photo_user = photos.attribute("user_id").unwrap();
        let join = users.join(&photos).on(&photo_user.equals(&user_id));
        let owners = join.project_set(&users);
        owners.retain(&root).unwrap();

        let (inserts, on_insert) = counter();
        let (deletes, on_delete) = counter();
        owners.on_insert(&root, on_insert).unwrap();
        owners.on_delete(&root, on_delete).unwrap();

        let alice = users.create([("id", Value::from(1)), ("name", Value::from("alice"))]).unwrap();
        let p1 = photos.create([("id", 10), ("user_id", 1)]).unwrap();
        let p2 = photos.create([("id", 11), ("user_id", 1)]).unwrap();
        assert_eq!(inserts.get(), 1);
        assert_eq!(owners.multiplicity(&alice), 2);

        photos.delete(&p1).unwrap();
        assert_eq!(deletes.get(), 0);
        assert_eq!(owners.tuples().len(), 1);

        photos.delete(&p2).unwrap();
        assert_eq!(deletes.get(), 1);
        assert!(owners.is_empty());
    }

    #[test]
    fn test_set_projection_relays_updates_once() {
        let (users, photos, root) = fixture();
        let user_id = users.attribute("id").unwrap();
        let photo_user = photos.attribute("user_id").unwrap();
        let join = users.join(&photos).on(&photo_user.equals(&user_id));
        let owners = join.project_set(&users);
        owners.retain(&root).unwrap();

        let alice = users.create([("id", Value::from(1)), ("name", Value::from("alice"))]).unwrap();
        photos.create([("id", 10), ("user_id", 1)]).unwrap();
        photos.create([("id", 11), ("user_id", 1)]).unwrap();

        let updates = Rc::new(Cell::new(0));
        let u = updates.clone();
        owners
            .on_tuple_update(&root, move |update| {
                assert!(update.tuple.is_primitive());
                u.set(u.get() + 1);
            })
            .unwrap();

        alice.set_field("name", "alicia").unwrap();
        assert_eq!(updates.get(), 1);
        alice.set_field("name", "ali").unwrap();
        assert_eq!(updates.get(), 2);
    }

    #[test]
    fn test_set_projection_lazy_and_merge() {
        let (users, photos, _root) = fixture();
        let user_id = users.attribute("id").unwrap();
        let photo_user = photos.attribute("user_id").unwrap();
        users.create([("id", 1)]).unwrap();
        users.create([("id", 2)]).unwrap();
        photos.create([("id", 10), ("user_id", 1)]).unwrap();
        photos.create([("id", 11), ("user_id", 1)]).unwrap();

        let owners = users.join(&photos).on(&photo_user.equals(&user_id)).project_set(&users);
        assert_eq!(owners.tuples().len(), 1);
        assert_eq!(owners.base_set().unwrap().name(), "users");
        assert_eq!(owners.attribute("name").unwrap().owner_name(), "users");

        let fresh = users.build([("id", 3)]).unwrap();
        let merged = owners.merge(vec![fresh]).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(users.len(), 3);
    }

    #[test]
    fn test_attributes_projection_groups_by_value() {
        let (_users, photos, root) = fixture();
        let photo_user = photos.attribute("user_id").unwrap();
        let projection = photos.project(&[photo_user.clone()]);
        projection.retain(&root).unwrap();

        let (inserts, on_insert) = counter();
        let (deletes, on_delete) = counter();
        projection.on_insert(&root, on_insert).unwrap();
        projection.on_delete(&root, on_delete).unwrap();

        let a = photos.create([("id", 1), ("user_id", 7)]).unwrap();
        let b = photos.create([("id", 2), ("user_id", 7)]).unwrap();
        assert_eq!(inserts.get(), 1);
        assert_eq!(projection.len(), 1);
        let projected = projection.first().unwrap();
        assert!(projected.is_projected());
        assert_eq!(projected.value("user_id"), Some(Value::Integer(7)));
        assert_eq!(projected.value("id"), None);

        // Moving one source to a new value adds a group; the old one stays.
        a.set_field("user_id", 8).unwrap();
        assert_eq!((inserts.get(), deletes.get()), (2, 0));

        b.set_field("user_id", 8).unwrap();
        assert_eq!((inserts.get(), deletes.get()), (2, 1));
        assert_eq!(projection.len(), 1);

        // Updates to other attributes are ignored.
        a.set_field("id", 5).unwrap();
        assert_eq!((inserts.get(), deletes.get()), (2, 1));

        photos.delete(&a).unwrap();
        photos.delete(&b).unwrap();
        assert_eq!(deletes.get(), 2);
        assert!(projection.is_empty());
    }

    #[test]
    fn test_attributes_projection_has_no_backing_set() {
        let (_users, photos, _root) = fixture();
        let photo_user = photos.attribute("user_id").unwrap();
        let projection = photos.project(&[photo_user]);
        assert!(matches!(projection.merge(Vec::new()), Err(Error::Unsupported { .. })));
        assert!(projection.base_set().is_err());
        assert!(projection.has_attribute("user_id"));
        assert!(!projection.has_attribute("id"));
        assert_eq!(projection.composed_sets().len(), 1);
        assert_eq!(projection.describe().to_string(), "project(photos, [photos.user_id])");
    }
}
