//! Tuples.
//!
//! Three shapes share one type:
//!
//! - primitive tuples hold the fields of one set and may be mutated
//! - composite tuples pair a left and a right tuple produced by a join
//! - projected tuples are immutable value snapshots produced by an
//!   attribute projection

use crate::attribute::{Attribute, AttributeRef};
use crate::field::{PrimitiveField, SyntheticAttribute, SyntheticField};
use crate::set::Set;
use crate::signal::{Signal, SignalRef};
use alloc::format;
use alloc::rc::{Rc, Weak};
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::fmt;
use tributary_core::{Error, ObjectId, Result, Value};
use tributary_reactive::{Lifecycle, Retainable, Retainer, Subscription, SubscriptionNode};

/// Shared handle to a tuple.
pub type TupleRef = Rc<Tuple>;

/// A field of a tuple changed value.
#[derive(Clone, Debug)]
pub struct TupleUpdate {
    /// The tuple as seen by the publisher (composite for joins).
    pub tuple: TupleRef,
    pub attribute: AttributeRef,
    pub old: Value,
    pub new: Value,
}

/// Ways to look something up in a tuple.
#[derive(Clone, Copy, Debug)]
pub enum TupleKey<'a> {
    /// First field with this attribute name.
    Name(&'a str),
    /// The field for exactly this attribute.
    Attribute(&'a Attribute),
    /// The component tuple belonging to the set with this ID.
    Relation(ObjectId),
}

impl TupleKey<'_> {
    fn describe(&self) -> String {
        match self {
            TupleKey::Name(name) => String::from(*name),
            TupleKey::Attribute(attribute) => attribute.qualified_name(),
            TupleKey::Relation(id) => format!("relation {}", id),
        }
    }
}

impl<'a> From<&'a str> for TupleKey<'a> {
    fn from(name: &'a str) -> Self {
        TupleKey::Name(name)
    }
}

impl<'a> From<&'a Attribute> for TupleKey<'a> {
    fn from(attribute: &'a Attribute) -> Self {
        TupleKey::Attribute(attribute)
    }
}

impl<'a> From<&'a AttributeRef> for TupleKey<'a> {
    fn from(attribute: &'a AttributeRef) -> Self {
        TupleKey::Attribute(attribute.as_ref())
    }
}

/// Result of a tuple lookup.
#[derive(Clone, Debug)]
pub enum Lookup {
    Value(Value),
    Tuple(TupleRef),
}

impl Lookup {
    pub fn into_value(self) -> Option<Value> {
        match self {
            Lookup::Value(value) => Some(value),
            Lookup::Tuple(_) => None,
        }
    }

    pub fn into_tuple(self) -> Option<TupleRef> {
        match self {
            Lookup::Tuple(tuple) => Some(tuple),
            Lookup::Value(_) => None,
        }
    }
}

pub(crate) struct PrimitiveBody {
    pub(crate) set: ObjectId,
    pub(crate) set_name: Rc<str>,
    /// Consulted before the key field changes.
    owner: Weak<Set>,
    pub(crate) key: Option<usize>,
    pub(crate) fields: Vec<PrimitiveField>,
    pub(crate) synthetic_defs: Vec<SyntheticAttribute>,
    synthetic: RefCell<Vec<SyntheticField>>,
    new: Cell<bool>,
}

impl PrimitiveBody {
    pub(crate) fn new(
        set: ObjectId,
        set_name: Rc<str>,
        key: Option<usize>,
        fields: Vec<PrimitiveField>,
        synthetic_defs: Vec<SyntheticAttribute>,
    ) -> Self {
        Self {
            set,
            set_name,
            owner: Weak::new(),
            key,
            fields,
            synthetic_defs,
            synthetic: RefCell::new(Vec::new()),
            new: Cell::new(true),
        }
    }

    pub(crate) fn with_owner(mut self, owner: Weak<Set>) -> Self {
        self.owner = owner;
        self
    }

    fn is_key(&self, field: &PrimitiveField) -> bool {
        self.key
            .and_then(|i| self.fields.get(i))
            .is_some_and(|key| core::ptr::eq(key, field))
    }

    fn field(&self, key: &TupleKey<'_>) -> Option<&PrimitiveField> {
        match key {
            TupleKey::Name(name) => self.fields.iter().find(|f| f.attribute().name() == *name),
            TupleKey::Attribute(attribute) => self.fields.iter().find(|f| f.attribute().as_ref() == *attribute),
            TupleKey::Relation(_) => None,
        }
    }

    fn synthetic_def(&self, key: &TupleKey<'_>) -> Option<&SyntheticAttribute> {
        match key {
            TupleKey::Name(name) => self.synthetic_defs.iter().find(|d| d.attribute().name() == *name),
            TupleKey::Attribute(attribute) => {
                self.synthetic_defs.iter().find(|d| d.attribute().as_ref() == *attribute)
            }
            TupleKey::Relation(_) => None,
        }
    }
}

enum Body {
    Primitive(PrimitiveBody),
    Composite { left: TupleRef, right: TupleRef },
    Projected { fields: Vec<(AttributeRef, Value)> },
}

/// A row flowing through the relation graph.
pub struct Tuple {
    lifecycle: Lifecycle,
    this: Weak<Tuple>,
    body: Body,
    on_update: SubscriptionNode<TupleUpdate>,
}

impl Tuple {
    fn with_body(kind: &'static str, body: Body) -> TupleRef {
        Rc::new_cyclic(|this| {
            let lifecycle = Lifecycle::new(kind);
            let on_update = SubscriptionNode::new(&lifecycle);
            Tuple {
                lifecycle,
                this: this.clone(),
                body,
                on_update,
            }
        })
    }

    pub(crate) fn primitive(body: PrimitiveBody) -> TupleRef {
        Self::with_body("PrimitiveTuple", Body::Primitive(body))
    }

    /// Pairs two tuples, as produced by a join.
    pub fn composite(left: TupleRef, right: TupleRef) -> TupleRef {
        Self::with_body("CompositeTuple", Body::Composite { left, right })
    }

    /// Creates an immutable tuple from attribute values.
    pub fn projected(fields: Vec<(AttributeRef, Value)>) -> TupleRef {
        Self::with_body("ProjectedTuple", Body::Projected { fields })
    }

    /// Returns the tuple's identity.
    #[inline]
    pub fn id(&self) -> ObjectId {
        self.lifecycle.id()
    }

    fn kind_name(&self) -> &'static str {
        self.lifecycle.kind()
    }

    #[inline]
    pub fn is_primitive(&self) -> bool {
        matches!(self.body, Body::Primitive(_))
    }

    #[inline]
    pub fn is_composite(&self) -> bool {
        matches!(self.body, Body::Composite { .. })
    }

    #[inline]
    pub fn is_projected(&self) -> bool {
        matches!(self.body, Body::Projected { .. })
    }

    /// Returns the owning set of a primitive tuple.
    pub fn set_id(&self) -> Option<ObjectId> {
        match &self.body {
            Body::Primitive(body) => Some(body.set),
            _ => None,
        }
    }

    /// Returns the owning set's name for a primitive tuple.
    pub fn set_name(&self) -> Option<&str> {
        match &self.body {
            Body::Primitive(body) => Some(&body.set_name),
            _ => None,
        }
    }

    /// Returns the left and right halves of a composite tuple.
    pub fn components(&self) -> Option<(&TupleRef, &TupleRef)> {
        match &self.body {
            Body::Composite { left, right } => Some((left, right)),
            _ => None,
        }
    }

    /// Returns the value of the owning set's id attribute.
    pub fn key_value(&self) -> Option<Value> {
        match &self.body {
            Body::Primitive(body) => body.key.and_then(|i| body.fields.get(i)).map(PrimitiveField::value),
            _ => None,
        }
    }

    /// Looks up a field value or a component tuple.
    pub fn get<'a>(&self, key: impl Into<TupleKey<'a>>) -> Option<Lookup> {
        self.lookup(&key.into())
    }

    /// Looks up a field value.
    pub fn value<'a>(&self, key: impl Into<TupleKey<'a>>) -> Option<Value> {
        self.lookup(&key.into()).and_then(Lookup::into_value)
    }

    /// Finds the attribute behind a field name.
    pub fn attribute(&self, name: &str) -> Option<AttributeRef> {
        match &self.body {
            Body::Primitive(body) => {
                let key = TupleKey::Name(name);
                body.field(&key)
                    .map(|f| f.attribute().clone())
                    .or_else(|| body.synthetic_def(&key).map(|d| d.attribute().clone()))
            }
            Body::Composite { left, right } => left.attribute(name).or_else(|| right.attribute(name)),
            Body::Projected { fields } => fields.iter().find(|(a, _)| a.name() == name).map(|(a, _)| a.clone()),
        }
    }

    /// Returns the nested primitive tuple belonging to the given set.
    pub fn component(&self, set: ObjectId) -> Option<TupleRef> {
        self.lookup(&TupleKey::Relation(set)).and_then(Lookup::into_tuple)
    }

    fn lookup(&self, key: &TupleKey<'_>) -> Option<Lookup> {
        match &self.body {
            Body::Primitive(body) => {
                if let TupleKey::Relation(set) = key {
                    return if *set == body.set {
                        self.this.upgrade().map(Lookup::Tuple)
                    } else {
                        None
                    };
                }
                if let Some(field) = body.field(key) {
                    return Some(Lookup::Value(field.value()));
                }
                let def = body.synthetic_def(key)?;
                self.synthetic_value(body, def).map(Lookup::Value)
            }
            Body::Composite { left, right } => left.lookup(key).or_else(|| right.lookup(key)),
            Body::Projected { fields } => {
                let found = match key {
                    TupleKey::Name(name) => fields.iter().find(|(a, _)| a.name() == *name),
                    TupleKey::Attribute(attribute) => fields.iter().find(|(a, _)| a.as_ref() == *attribute),
                    TupleKey::Relation(_) => None,
                };
                found.map(|(_, value)| Lookup::Value(value.clone()))
            }
        }
    }

    fn synthetic_value(&self, body: &PrimitiveBody, def: &SyntheticAttribute) -> Option<Value> {
        if self.is_live() {
            let fields = body.synthetic.borrow();
            if let Some(field) = fields.iter().find(|f| f.attribute() == def.attribute()) {
                return Some(field.value());
            }
        }
        // Not live: read through a throwaway signal.
        let this = self.this.upgrade()?;
        Some((def.compute)(&this).value())
    }

    /// Assigns a stored field, notifying observers if the value changed.
    pub fn set_field<'a>(&self, key: impl Into<TupleKey<'a>>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        let Body::Primitive(body) = &self.body else {
            return Err(Error::unsupported(self.kind_name(), "set_field"));
        };
        let Some(field) = body.field(&key) else {
            if body.synthetic_def(&key).is_some() {
                return Err(Error::unsupported("SyntheticField", "set_field"));
            }
            return Err(Error::attribute_not_found(&*body.set_name, key.describe()));
        };

        let value = value.into();
        if body.is_key(field) {
            if let Some(set) = body.owner.upgrade() {
                set.check_key_change(self.id(), &field.attribute().convert(value.clone())?)?;
            }
        }
        if let Some(old) = field.assign(value)? {
            tracing::trace!(tuple = self.id(), attribute = field.attribute().name(), "field updated");
            if let Some(tuple) = self.this.upgrade() {
                self.on_update.call(&TupleUpdate {
                    tuple,
                    attribute: field.attribute().clone(),
                    old,
                    new: field.value(),
                });
            }
        }
        Ok(())
    }

    /// Returns true until the tuple is marked as persisted.
    pub fn is_new(&self) -> bool {
        match &self.body {
            Body::Primitive(body) => body.new.get(),
            _ => false,
        }
    }

    pub fn mark_persisted(&self) {
        if let Body::Primitive(body) = &self.body {
            body.new.set(false);
        }
    }

    /// Returns true if any stored field changed since the last `mark_clean`.
    pub fn is_dirty(&self) -> bool {
        match &self.body {
            Body::Primitive(body) => body.fields.iter().any(PrimitiveField::is_dirty),
            _ => false,
        }
    }

    /// Returns the attributes of dirty fields.
    pub fn dirty_fields(&self) -> Vec<AttributeRef> {
        match &self.body {
            Body::Primitive(body) => body
                .fields
                .iter()
                .filter(|f| f.is_dirty())
                .map(|f| f.attribute().clone())
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn mark_clean(&self) {
        if let Body::Primitive(body) = &self.body {
            for field in &body.fields {
                field.mark_clean();
            }
        }
    }

    /// Returns every field value, left to right for composites.
    pub fn field_values(&self) -> Vec<(AttributeRef, Value)> {
        match &self.body {
            Body::Primitive(body) => {
                let mut values: Vec<(AttributeRef, Value)> = body
                    .fields
                    .iter()
                    .map(|f| (f.attribute().clone(), f.value()))
                    .collect();
                for def in &body.synthetic_defs {
                    if let Some(value) = self.synthetic_value(body, def) {
                        values.push((def.attribute().clone(), value));
                    }
                }
                values
            }
            Body::Composite { left, right } => {
                let mut values = left.field_values();
                values.extend(right.field_values());
                values
            }
            Body::Projected { fields } => fields.clone(),
        }
    }

    /// Subscribes to field updates. The tuple must be retained by `retainer`.
    pub fn on_update<F>(&self, retainer: &Retainer, callback: F) -> Result<Subscription>
    where
        F: Fn(&TupleUpdate) + 'static,
    {
        if !self.is_live() {
            return Err(Error::not_live(self.id(), "on_update"));
        }
        self.on_update.subscribe(retainer, callback)
    }

    pub(crate) fn update_events(&self) -> &SubscriptionNode<TupleUpdate> {
        &self.on_update
    }

    /// Returns a signal tracking one field of this tuple.
    pub fn signal(self: &Rc<Self>, attribute: &AttributeRef) -> SignalRef {
        Signal::attribute(self.clone(), attribute.clone())
    }
}

impl Retainable for Tuple {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn retained_children(&self) -> Vec<&dyn Retainable> {
        match &self.body {
            Body::Composite { left, right } => {
                alloc::vec![left.as_ref() as &dyn Retainable, right.as_ref() as &dyn Retainable]
            }
            _ => Vec::new(),
        }
    }

    fn materialize(&self) -> Result<()> {
        let Body::Primitive(body) = &self.body else {
            return Ok(());
        };
        if body.synthetic_defs.is_empty() {
            return Ok(());
        }
        let Some(this) = self.this.upgrade() else {
            return Ok(());
        };

        let me = self.lifecycle.as_retainer();
        let mut fields = Vec::with_capacity(body.synthetic_defs.len());
        for def in &body.synthetic_defs {
            let signal = (def.compute)(&this);
            signal.retain(&me)?;
            fields.push(SyntheticField::new(def.attribute().clone(), signal));
        }
        *body.synthetic.borrow_mut() = fields;
        Ok(())
    }

    fn dematerialize(&self) {
        let Body::Primitive(body) = &self.body else {
            return;
        };
        let fields = core::mem::take(&mut *body.synthetic.borrow_mut());
        let me = self.lifecycle.as_retainer();
        for field in fields {
            if let Err(err) = field.signal().release(&me) {
                tracing::warn!(tuple = self.id(), error = %err, "failed to release synthetic field");
            }
        }
    }

    fn install_subscriptions(&self) -> Result<Vec<Subscription>> {
        let Body::Primitive(body) = &self.body else {
            return Ok(Vec::new());
        };
        let me = self.lifecycle.as_retainer();
        let fields = body.synthetic.borrow().clone();
        let mut subscriptions = Vec::with_capacity(fields.len());
        for field in fields {
            let this = self.this.clone();
            let attribute = field.attribute().clone();
            let subscription = field.signal().change_events().subscribe(&me, move |change| {
                if let Some(tuple) = this.upgrade() {
                    tuple.on_update.call(&TupleUpdate {
                        tuple: tuple.clone(),
                        attribute: attribute.clone(),
                        old: change.old.clone(),
                        new: change.new.clone(),
                    });
                }
            })?;
            subscriptions.push(subscription);
        }
        Ok(subscriptions)
    }
}

impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        match (&self.body, &other.body) {
            (Body::Primitive(a), Body::Primitive(b)) => {
                a.set == b.set
                    && a.fields.len() == b.fields.len()
                    && a.fields.iter().zip(&b.fields).all(|(x, y)| x.value() == y.value())
            }
            (
                Body::Composite { left: l1, right: r1 },
                Body::Composite { left: l2, right: r2 },
            ) => l1 == l2 && r1 == r2,
            (Body::Projected { fields: a }, Body::Projected { fields: b }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.body {
            Body::Primitive(body) => {
                let mut map = f.debug_map();
                for field in &body.fields {
                    map.entry(&field.attribute().qualified_name(), &field.value());
                }
                map.finish()
            }
            Body::Composite { left, right } => f.debug_tuple("Composite").field(left).field(right).finish(),
            Body::Projected { fields } => {
                let mut map = f.debug_map();
                for (attribute, value) in fields {
                    map.entry(&attribute.qualified_name(), value);
                }
                map.finish()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{AttributeKind, AttributeSpec};
    use alloc::vec;
    use tributary_core::DataType;

    fn attrs(owner: ObjectId, set: &str) -> (AttributeRef, AttributeRef) {
        let id = Rc::new(AttributeSpec::new("id", DataType::Integer).bind(owner, set, AttributeKind::Concrete));
        let name = Rc::new(AttributeSpec::new("name", DataType::String).bind(owner, set, AttributeKind::Concrete));
        (id, name)
    }

    fn user(id: i64, name: &str) -> (TupleRef, AttributeRef, AttributeRef) {
        let (id_attr, name_attr) = attrs(100, "users");
        let tuple = Tuple::primitive(PrimitiveBody::new(
            100,
            Rc::from("users"),
            Some(0),
            vec![
                PrimitiveField::new(id_attr.clone(), Value::Integer(id)),
                PrimitiveField::new(name_attr.clone(), Value::from(name)),
            ],
            Vec::new(),
        ));
        (tuple, id_attr, name_attr)
    }

    #[test]
    fn test_primitive_lookup() {
        let (tuple, id, name) = user(1, "Nathan");
        assert_eq!(tuple.value("name"), Some(Value::from("Nathan")));
        assert_eq!(tuple.value(&id), Some(Value::Integer(1)));
        assert_eq!(tuple.key_value(), Some(Value::Integer(1)));
        assert_eq!(tuple.set_id(), Some(100));
        assert!(tuple.value("missing").is_none());
        assert_eq!(tuple.component(100).map(|t| t.id()), Some(tuple.id()));
        assert!(tuple.component(5).is_none());
        assert!(name.is(100, "name"));
    }

    #[test]
    fn test_set_field_notifies_and_dirties() {
        let (tuple, _, name) = user(1, "Nathan");
        let root = Retainer::root();
        tuple.retain(&root).unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        tuple
            .on_update(&root, move |u| log.borrow_mut().push((u.old.clone(), u.new.clone())))
            .unwrap();

        tuple.set_field("name", "Corey").unwrap();
        tuple.set_field(&name, "Corey").unwrap();

        assert_eq!(*seen.borrow(), vec![(Value::from("Nathan"), Value::from("Corey"))]);
        assert!(tuple.is_dirty());
        assert_eq!(tuple.dirty_fields(), vec![name]);
        tuple.mark_clean();
        assert!(!tuple.is_dirty());
    }

    #[test]
    fn test_set_field_errors() {
        let (tuple, _, _) = user(1, "Nathan");
        assert!(matches!(tuple.set_field("age", 3), Err(Error::AttributeNotFound { .. })));
        assert!(matches!(tuple.set_field("id", "x"), Err(Error::TypeMismatch { .. })));

        let pair = Tuple::composite(tuple.clone(), tuple.clone());
        assert!(matches!(pair.set_field("id", 2), Err(Error::Unsupported { .. })));
    }

    #[test]
    fn test_on_update_requires_live() {
        let (tuple, _, _) = user(1, "Nathan");
        let err = tuple.on_update(&Retainer::root(), |_| {}).unwrap_err();
        assert!(matches!(err, Error::NotLive { .. }));
    }

    #[test]
    fn test_composite_lookup_and_retention() {
        let (user, user_id, _) = user(1, "Nathan");
        let (photo_id, _) = attrs(200, "photos");
        let photo = Tuple::primitive(PrimitiveBody::new(
            200,
            Rc::from("photos"),
            Some(0),
            vec![PrimitiveField::new(photo_id.clone(), Value::Integer(9))],
            Vec::new(),
        ));

        let pair = Tuple::composite(user.clone(), photo.clone());
        assert_eq!(pair.value(&user_id), Some(Value::Integer(1)));
        assert_eq!(pair.value(&photo_id), Some(Value::Integer(9)));
        assert_eq!(pair.component(200).map(|t| t.id()), Some(photo.id()));
        assert_eq!(pair.field_values().len(), 3);

        let root = Retainer::root();
        pair.retain(&root).unwrap();
        assert!(user.is_live() && photo.is_live());
        pair.release(&root).unwrap();
        assert!(!user.is_live() && !photo.is_live());
    }

    #[test]
    fn test_structural_equality() {
        let (a, _, _) = user(1, "Nathan");
        let (b, _, _) = user(1, "Nathan");
        let (c, _, _) = user(2, "Nathan");
        assert_eq!(*a, *b);
        assert_ne!(*a, *c);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_projected_is_immutable_snapshot() {
        let (_, name) = attrs(100, "users");
        let tuple = Tuple::projected(vec![(name.clone(), Value::from("Nathan"))]);
        assert_eq!(tuple.value(&name), Some(Value::from("Nathan")));
        assert!(tuple.set_field(&name, "x").is_err());
        assert!(!tuple.is_new());
    }
}
