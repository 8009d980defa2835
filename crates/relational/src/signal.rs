//! Observable scalar values.
//!
//! A signal tracks one value derived from the graph: a field of a tuple,
//! an attribute of the first tuple of a relation, or a function of other
//! signals. While retained it caches its value and fires `on_change` with
//! old and new values whenever the value actually changes.

use crate::attribute::AttributeRef;
use crate::relation::{forward, RelationRef};
use crate::tuple::{TupleRef, TupleUpdate};
use alloc::rc::{Rc, Weak};
use alloc::vec;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;
use tributary_core::{Error, ObjectId, Result, Value};
use tributary_reactive::{Lifecycle, Retainable, Retainer, Subscription, SubscriptionNode};

/// Shared handle to a signal.
pub type SignalRef = Rc<Signal>;

/// Computes a derived value from its source values, in source order.
pub type DeriveFn = Rc<dyn Fn(&[Value]) -> Value>;

/// A signal's value changed.
#[derive(Clone, Debug)]
pub struct SignalChange {
    /// The tuple the value was read from, when there is one.
    pub tuple: Option<TupleRef>,
    pub old: Value,
    pub new: Value,
}

enum Source {
    Attribute { tuple: TupleRef, attribute: AttributeRef },
    Relation { relation: RelationRef, attribute: AttributeRef },
    Derived { sources: Vec<SignalRef>, compute: DeriveFn },
    Constant(Value),
}

/// An observable value.
pub struct Signal {
    lifecycle: Lifecycle,
    this: Weak<Signal>,
    source: Source,
    current: RefCell<Value>,
    on_change: SubscriptionNode<SignalChange>,
}

impl Signal {
    fn with_source(kind: &'static str, source: Source) -> SignalRef {
        Rc::new_cyclic(|this| {
            let lifecycle = Lifecycle::new(kind);
            let on_change = SubscriptionNode::new(&lifecycle);
            Signal {
                lifecycle,
                this: this.clone(),
                source,
                current: RefCell::new(Value::Null),
                on_change,
            }
        })
    }

    /// Tracks one field of a tuple.
    pub fn attribute(tuple: TupleRef, attribute: AttributeRef) -> SignalRef {
        Self::with_source("AttributeSignal", Source::Attribute { tuple, attribute })
    }

    /// Tracks an attribute of the first tuple of a relation.
    pub fn relation(relation: RelationRef, attribute: AttributeRef) -> SignalRef {
        Self::with_source("RelationSignal", Source::Relation { relation, attribute })
    }

    /// Combines other signals.
    pub fn derive<F>(sources: Vec<SignalRef>, compute: F) -> SignalRef
    where
        F: Fn(&[Value]) -> Value + 'static,
    {
        Self::with_source(
            "DerivedSignal",
            Source::Derived {
                sources,
                compute: Rc::new(compute),
            },
        )
    }

    /// A signal that never changes.
    pub fn constant(value: impl Into<Value>) -> SignalRef {
        Self::with_source("ConstantSignal", Source::Constant(value.into()))
    }

    /// Maps this signal's value.
    pub fn map<F>(self: &Rc<Self>, f: F) -> SignalRef
    where
        F: Fn(&Value) -> Value + 'static,
    {
        Signal::derive(vec![self.clone()], move |values| match values.first() {
            Some(value) => f(value),
            None => Value::Null,
        })
    }

    /// Returns the signal's identity.
    #[inline]
    pub fn id(&self) -> ObjectId {
        self.lifecycle.id()
    }

    /// Returns the current value.
    pub fn value(&self) -> Value {
        match &self.source {
            Source::Attribute { tuple, attribute } => tuple.value(attribute).unwrap_or(Value::Null),
            Source::Constant(value) => value.clone(),
            Source::Relation { .. } | Source::Derived { .. } => {
                if self.is_live() {
                    self.current.borrow().clone()
                } else {
                    self.compute()
                }
            }
        }
    }

    fn compute(&self) -> Value {
        match &self.source {
            Source::Attribute { tuple, attribute } => tuple.value(attribute).unwrap_or(Value::Null),
            Source::Relation { relation, attribute } => relation
                .first()
                .and_then(|tuple| tuple.value(attribute))
                .unwrap_or(Value::Null),
            Source::Derived { sources, compute } => {
                let values: Vec<Value> = sources.iter().map(|s| s.value()).collect();
                compute(&values)
            }
            Source::Constant(value) => value.clone(),
        }
    }

    /// Recomputes a cached value and fires if it changed.
    fn refresh(&self) {
        let new = self.compute();
        let old = self.current.replace(new.clone());
        if old == new {
            return;
        }
        let tuple = match &self.source {
            Source::Relation { relation, .. } => relation.first(),
            _ => None,
        };
        tracing::trace!(signal = self.id(), old = %old, new = %new, "signal changed");
        self.on_change.call(&SignalChange { tuple, old, new });
    }

    fn relay_tuple_update(&self, update: &TupleUpdate) {
        let Source::Attribute { attribute, .. } = &self.source else {
            return;
        };
        if update.attribute != *attribute {
            return;
        }
        self.on_change.call(&SignalChange {
            tuple: Some(update.tuple.clone()),
            old: update.old.clone(),
            new: update.new.clone(),
        });
    }

    /// Subscribes to value changes. The signal must be retained by `retainer`.
    pub fn on_change<F>(&self, retainer: &Retainer, callback: F) -> Result<Subscription>
    where
        F: Fn(&SignalChange) + 'static,
    {
        if !self.is_live() {
            return Err(Error::not_live(self.id(), "on_change"));
        }
        self.on_change.subscribe(retainer, callback)
    }

    pub(crate) fn change_events(&self) -> &SubscriptionNode<SignalChange> {
        &self.on_change
    }
}

impl Retainable for Signal {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn retained_children(&self) -> Vec<&dyn Retainable> {
        match &self.source {
            Source::Attribute { tuple, .. } => vec![tuple.as_ref() as &dyn Retainable],
            Source::Relation { relation, .. } => vec![relation.as_retainable()],
            Source::Derived { sources, .. } => sources.iter().map(|s| s.as_ref() as &dyn Retainable).collect(),
            Source::Constant(_) => Vec::new(),
        }
    }

    fn materialize(&self) -> Result<()> {
        *self.current.borrow_mut() = self.compute();
        Ok(())
    }

    fn dematerialize(&self) {
        *self.current.borrow_mut() = Value::Null;
    }

    fn install_subscriptions(&self) -> Result<Vec<Subscription>> {
        let me = self.lifecycle.as_retainer();
        match &self.source {
            Source::Attribute { tuple, .. } => {
                let sub = tuple
                    .update_events()
                    .subscribe(&me, forward(&self.this, Signal::relay_tuple_update))?;
                Ok(vec![sub])
            }
            Source::Relation { relation, .. } => {
                let events = relation.events();
                Ok(vec![
                    events
                        .on_insert
                        .subscribe(&me, forward(&self.this, |s: &Signal, _: &TupleRef| s.refresh()))?,
                    events
                        .on_delete
                        .subscribe(&me, forward(&self.this, |s: &Signal, _: &TupleRef| s.refresh()))?,
                    events
                        .on_tuple_update
                        .subscribe(&me, forward(&self.this, |s: &Signal, _: &TupleUpdate| s.refresh()))?,
                ])
            }
            Source::Derived { sources, .. } => sources
                .iter()
                .map(|source| {
                    source
                        .on_change
                        .subscribe(&me, forward(&self.this, |s: &Signal, _: &SignalChange| s.refresh()))
                })
                .collect(),
            Source::Constant(_) => Ok(Vec::new()),
        }
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id())
            .field("kind", &self.lifecycle.kind())
            .field("value", &self.value())
            .finish()
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value() {
            Value::String(s) => write!(f, "'{}'", s),
            value => write!(f, "{}", value),
        }
    }
}
