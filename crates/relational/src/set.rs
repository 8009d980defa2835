//! Base sets and their builder.
//!
//! A `Set` is the authoritative storage for one kind of tuple. It keeps a
//! unique index on its id attribute, retains every member tuple while it
//! is itself retained, and relays member field updates as
//! `on_tuple_update`.

use crate::attribute::{AttributeKind, AttributeRef, AttributeSpec};
use crate::describe::QueryDescription;
use crate::field::{PrimitiveField, SyntheticAttribute, SyntheticFn};
use crate::relation::{forward, release_member, Finder, Relation, RelationEvents};
use crate::signal::SignalRef;
use crate::store::TupleStore;
use crate::tuple::{PrimitiveBody, Tuple, TupleRef, TupleUpdate};
use alloc::format;
use alloc::rc::{Rc, Weak};
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;
use hashbrown::HashMap;
use tributary_core::{DataType, Error, ObjectId, Result, Value};
use tributary_reactive::{Lifecycle, Retainable, Subscription};

/// Hook run when a new tuple is inserted.
pub type AfterCreateFn = Rc<dyn Fn(&TupleRef)>;

const DEFAULT_ID_ATTRIBUTE: &str = "id";

fn check_naming_rules(name: &str) -> Result<()> {
    let Some(first) = name.chars().next() else {
        return Err(Error::invalid_schema("Name cannot be empty"));
    };
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(Error::invalid_schema(format!(
            "Name must start with letter or underscore: {}",
            name
        )));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::invalid_schema(format!("Name contains invalid characters: {}", name)));
    }
    Ok(())
}

/// Builder for sets.
pub struct SetBuilder {
    name: String,
    attributes: Vec<AttributeSpec>,
    synthetic: Vec<(AttributeSpec, SyntheticFn)>,
    id_attribute: String,
    after_create: Option<AfterCreateFn>,
}

impl SetBuilder {
    /// Creates a new set builder.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        check_naming_rules(&name)?;
        Ok(Self {
            name,
            attributes: Vec::new(),
            synthetic: Vec::new(),
            id_attribute: String::from(DEFAULT_ID_ATTRIBUTE),
            after_create: None,
        })
    }

    fn check_unique(&self, name: &str) -> Result<()> {
        check_naming_rules(name)?;
        let taken = self.attributes.iter().any(|a| a.name == name)
            || self.synthetic.iter().any(|(a, _)| a.name == name);
        if taken {
            return Err(Error::invalid_schema(format!("Attribute already exists: {}", name)));
        }
        Ok(())
    }

    /// Adds an attribute.
    pub fn attribute(self, name: impl Into<String>, data_type: DataType) -> Result<Self> {
        self.attribute_spec(AttributeSpec::new(name, data_type))
    }

    /// Adds an attribute with a default, transform or direction.
    pub fn attribute_spec(mut self, spec: AttributeSpec) -> Result<Self> {
        self.check_unique(&spec.name)?;
        self.attributes.push(spec);
        Ok(self)
    }

    /// Adds a derived attribute whose value comes from a signal built per tuple.
    pub fn synthetic_attribute<F>(mut self, name: impl Into<String>, data_type: DataType, f: F) -> Result<Self>
    where
        F: Fn(&TupleRef) -> SignalRef + 'static,
    {
        let spec = AttributeSpec::new(name, data_type);
        self.check_unique(&spec.name)?;
        self.synthetic.push((spec, Rc::new(f)));
        Ok(self)
    }

    /// Names the unique key attribute. Defaults to `id`.
    pub fn id_attribute(mut self, name: impl Into<String>) -> Self {
        self.id_attribute = name.into();
        self
    }

    /// Runs `f` when a tuple that was never persisted is inserted.
    pub fn after_create<F>(mut self, f: F) -> Self
    where
        F: Fn(&TupleRef) + 'static,
    {
        self.after_create = Some(Rc::new(f));
        self
    }

    /// Builds the set.
    pub fn build(self) -> Result<Rc<Set>> {
        if !self.attributes.iter().any(|a| a.name == self.id_attribute) {
            return Err(Error::invalid_schema(format!(
                "Id attribute is not declared: {}",
                self.id_attribute
            )));
        }

        let name: Rc<str> = Rc::from(self.name.as_str());
        let set = Rc::new_cyclic(|this| {
            let lifecycle = Lifecycle::new("Set");
            let owner = lifecycle.id();
            let attributes = self
                .attributes
                .into_iter()
                .map(|spec| Rc::new(spec.bind(owner, &name, AttributeKind::Concrete)))
                .collect();
            let synthetic = self
                .synthetic
                .into_iter()
                .map(|(spec, compute)| SyntheticAttribute {
                    attribute: Rc::new(spec.bind(owner, &name, AttributeKind::Synthetic)),
                    compute,
                })
                .collect();
            let events = RelationEvents::new(&lifecycle);
            Set {
                lifecycle,
                this: this.clone(),
                name: name.clone(),
                attributes: RefCell::new(attributes),
                synthetic: RefCell::new(synthetic),
                id_attribute: self.id_attribute,
                after_create: self.after_create,
                store: TupleStore::new(),
                index: RefCell::new(HashMap::new()),
                member_subscriptions: RefCell::new(HashMap::new()),
                events,
            }
        });
        tracing::debug!(set = %set.name, id = set.object_id(), "set created");
        Ok(set)
    }
}

/// A base relation that owns its tuples.
pub struct Set {
    lifecycle: Lifecycle,
    this: Weak<Set>,
    name: Rc<str>,
    attributes: RefCell<Vec<AttributeRef>>,
    synthetic: RefCell<Vec<SyntheticAttribute>>,
    id_attribute: String,
    after_create: Option<AfterCreateFn>,
    store: TupleStore,
    index: RefCell<HashMap<Value, TupleRef>>,
    member_subscriptions: RefCell<HashMap<ObjectId, Subscription>>,
    events: RelationEvents,
}

impl Set {
    /// Returns the set name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the stored attributes, in declaration order.
    pub fn attributes(&self) -> Vec<AttributeRef> {
        self.attributes.borrow().clone()
    }

    /// Returns the derived attributes, in declaration order.
    pub fn synthetic_attributes(&self) -> Vec<AttributeRef> {
        self.synthetic.borrow().iter().map(|s| s.attribute().clone()).collect()
    }

    /// Returns the unique key attribute.
    pub fn id_attribute(&self) -> Option<AttributeRef> {
        self.attributes
            .borrow()
            .iter()
            .find(|a| a.name() == self.id_attribute)
            .cloned()
    }

    fn check_unique(&self, name: &str) -> Result<()> {
        check_naming_rules(name)?;
        let taken = self.attributes.borrow().iter().any(|a| a.name() == name)
            || self.synthetic.borrow().iter().any(|s| s.attribute().name() == name);
        if taken {
            return Err(Error::invalid_schema(format!("Attribute already exists: {}", name)));
        }
        Ok(())
    }

    /// Declares another stored attribute.
    ///
    /// Tuples built before the declaration have no field for it.
    pub fn add_attribute(&self, spec: impl Into<AttributeSpec>) -> Result<AttributeRef> {
        let spec = spec.into();
        self.check_unique(&spec.name)?;
        let attribute = Rc::new(spec.bind(self.object_id(), &self.name, AttributeKind::Concrete));
        self.attributes.borrow_mut().push(attribute.clone());
        Ok(attribute)
    }

    /// Declares another derived attribute.
    pub fn add_synthetic_attribute<F>(&self, name: &str, data_type: DataType, f: F) -> Result<AttributeRef>
    where
        F: Fn(&TupleRef) -> SignalRef + 'static,
    {
        self.check_unique(name)?;
        let attribute = Rc::new(AttributeSpec::new(name, data_type).bind(
            self.object_id(),
            &self.name,
            AttributeKind::Synthetic,
        ));
        self.synthetic.borrow_mut().push(SyntheticAttribute {
            attribute: attribute.clone(),
            compute: Rc::new(f),
        });
        Ok(attribute)
    }

    /// Builds a new tuple of this set without inserting it.
    ///
    /// Attributes not given take their default. Every value is coerced to
    /// its attribute's type; nothing is built if any coercion fails.
    pub fn build<I, K, V>(&self, values: I) -> Result<TupleRef>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let attributes = self.attributes.borrow().clone();
        let mut supplied: Vec<Option<Value>> = vec![None; attributes.len()];
        for (name, value) in values {
            let name = name.as_ref();
            match attributes.iter().position(|a| a.name() == name) {
                Some(i) => supplied[i] = Some(value.into()),
                None if self.synthetic.borrow().iter().any(|s| s.attribute().name() == name) => {
                    return Err(Error::unsupported("SyntheticField", "set_field"));
                }
                None => return Err(Error::attribute_not_found(&*self.name, name)),
            }
        }

        let mut fields = Vec::with_capacity(attributes.len());
        for (attribute, value) in attributes.iter().zip(supplied) {
            let value = value.unwrap_or_else(|| attribute.default_value());
            fields.push(PrimitiveField::new(attribute.clone(), attribute.convert(value)?));
        }
        let key = attributes.iter().position(|a| a.name() == self.id_attribute);

        Ok(Tuple::primitive(PrimitiveBody::new(
            self.object_id(),
            self.name.clone(),
            key,
            fields,
            self.synthetic.borrow().clone(),
        )
        .with_owner(self.this.clone())))
    }

    /// Builds a tuple and inserts it.
    pub fn create<I, K, V>(&self, values: I) -> Result<TupleRef>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let tuple = self.build(values)?;
        self.insert(&tuple)?;
        Ok(tuple)
    }

    /// Looks a member up by its id attribute value.
    pub fn find_by_id(&self, key: impl Into<Value>) -> Option<TupleRef> {
        self.index.borrow().get(&key.into()).cloned()
    }

    /// Inserts a tuple built by this set.
    pub fn insert(&self, tuple: &TupleRef) -> Result<()> {
        if !self.is_live() {
            return Err(Error::not_live(self.object_id(), "insert"));
        }
        if tuple.set_id() != Some(self.object_id()) {
            return Err(Error::foreign_tuple(&*self.name));
        }
        let key = tuple.key_value().unwrap_or(Value::Null);
        if self.store.contains(tuple.id()) || (!key.is_null() && self.index.borrow().contains_key(&key)) {
            return Err(Error::duplicate_key(&*self.name, key));
        }

        self.admit(tuple)?;
        self.store.push(tuple.clone());
        if !key.is_null() {
            self.index.borrow_mut().insert(key, tuple.clone());
        }
        if tuple.is_new() {
            if let Some(hook) = &self.after_create {
                hook(tuple);
            }
        }

        tracing::trace!(set = %self.name, tuple = tuple.id(), "insert");
        self.events.on_insert.call(tuple);
        Ok(())
    }

    /// Removes a member tuple.
    pub fn delete(&self, tuple: &TupleRef) -> Result<()> {
        if !self.is_live() {
            return Err(Error::not_live(self.object_id(), "delete"));
        }
        let Some(removed) = self.store.remove(tuple.id()) else {
            return Err(Error::not_a_member(&*self.name));
        };
        self.unindex(&removed);
        if let Some(subscription) = self.member_subscriptions.borrow_mut().remove(&removed.id()) {
            subscription.destroy();
        }

        tracing::trace!(set = %self.name, tuple = removed.id(), "delete");
        self.events.on_delete.call(&removed);
        release_member(&self.lifecycle, &removed);
        Ok(())
    }

    /// Inserts the tuples whose id is not already present, returning them.
    pub fn merge(&self, tuples: Vec<TupleRef>) -> Result<Vec<TupleRef>> {
        if !self.is_live() {
            return Err(Error::not_live(self.object_id(), "merge"));
        }
        let mut inserted = Vec::new();
        for tuple in tuples {
            let present = self.store.contains(tuple.id())
                || tuple
                    .key_value()
                    .is_some_and(|key| !key.is_null() && self.index.borrow().contains_key(&key));
            if present {
                continue;
            }
            self.insert(&tuple)?;
            inserted.push(tuple);
        }
        tracing::debug!(set = %self.name, inserted = inserted.len(), "merge");
        Ok(inserted)
    }

    /// Retains a tuple and relays its field updates.
    fn admit(&self, tuple: &TupleRef) -> Result<()> {
        let me = self.lifecycle.as_retainer();
        tuple.retain(&me)?;
        let subscription = tuple
            .update_events()
            .subscribe(&me, forward(&self.this, Set::member_updated))?;
        self.member_subscriptions.borrow_mut().insert(tuple.id(), subscription);
        Ok(())
    }

    /// Fails if a member other than `tuple` already holds `key`.
    pub(crate) fn check_key_change(&self, tuple: ObjectId, key: &Value) -> Result<()> {
        if key.is_null() || !self.store.contains(tuple) {
            return Ok(());
        }
        match self.index.borrow().get(key) {
            Some(holder) if holder.id() != tuple => Err(Error::duplicate_key(&*self.name, key.clone())),
            _ => Ok(()),
        }
    }

    fn unindex(&self, tuple: &TupleRef) {
        if let Some(key) = tuple.key_value() {
            let mut index = self.index.borrow_mut();
            if index.get(&key).is_some_and(|t| t.id() == tuple.id()) {
                index.remove(&key);
            }
        }
    }

    fn member_updated(&self, update: &TupleUpdate) {
        if update.attribute.name() == self.id_attribute {
            let mut index = self.index.borrow_mut();
            if index.get(&update.old).is_some_and(|t| t.id() == update.tuple.id()) {
                index.remove(&update.old);
            }
            if !update.new.is_null() {
                index.insert(update.new.clone(), update.tuple.clone());
            }
        }
        self.events.on_tuple_update.call(update);
    }
}

impl Retainable for Set {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn materialize(&self) -> Result<()> {
        for tuple in self.store.snapshot() {
            self.admit(&tuple)?;
        }
        Ok(())
    }

    fn dematerialize(&self) {
        let subscriptions = core::mem::take(&mut *self.member_subscriptions.borrow_mut());
        for subscription in subscriptions.values() {
            subscription.destroy();
        }
        for tuple in self.store.snapshot() {
            if tuple.lifecycle().is_retained_by(&self.lifecycle.as_retainer()) {
                release_member(&self.lifecycle, &tuple);
            }
        }
    }
}

impl Relation for Set {
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
        self.store.snapshot()
    }

    fn attribute(&self, name: &str) -> Result<AttributeRef> {
        if let Some(attribute) = self.attributes.borrow().iter().find(|a| a.name() == name) {
            return Ok(attribute.clone());
        }
        self.synthetic
            .borrow()
            .iter()
            .find(|s| s.attribute().name() == name)
            .map(|s| s.attribute().clone())
            .ok_or_else(|| Error::attribute_not_found(&*self.name, name))
    }

    fn composed_sets(&self) -> Vec<Rc<Set>> {
        self.this.upgrade().into_iter().collect()
    }

    fn describe(&self) -> QueryDescription {
        QueryDescription::Set {
            name: String::from(&*self.name),
        }
    }

    fn merge(&self, tuples: Vec<TupleRef>) -> Result<Vec<TupleRef>> {
        Set::merge(self, tuples)
    }

    fn base_set(&self) -> Result<Rc<Set>> {
        self.this
            .upgrade()
            .ok_or_else(|| Error::not_live(self.object_id(), "base_set"))
    }

    fn find(&self, finder: Finder) -> Option<TupleRef> {
        match finder {
            Finder::Key(key) => self.find_by_id(key),
            Finder::Matching(predicate) => self.store.snapshot().into_iter().find(|t| predicate.eval(t)),
        }
    }
}

impl fmt::Debug for Set {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Set")
            .field("name", &self.name)
            .field("id", &self.object_id())
            .field("len", &self.store.len())
            .field("live", &self.is_live())
            .finish()
    }
}
