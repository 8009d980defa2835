//! Predicates over tuples.
//!
//! A predicate compares two operands, each an attribute, a signal or a
//! literal. Predicates that reference signals are themselves retainable:
//! while retained they fire `on_update` whenever one of those signals
//! changes, which tells selections to re-evaluate their membership.

use crate::attribute::AttributeRef;
use crate::relation::forward;
use crate::signal::{Signal, SignalChange, SignalRef};
use crate::tuple::Tuple;
use alloc::rc::{Rc, Weak};
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use tributary_core::{Error, ObjectId, Result, Value};
use tributary_reactive::{Lifecycle, Retainable, Retainer, Subscription, SubscriptionNode};

/// Shared handle to a predicate.
pub type PredicateRef = Rc<Predicate>;

/// Comparison operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Comparison {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl Comparison {
    pub fn symbol(self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Ne => "!=",
            Comparison::Gt => ">",
            Comparison::Lt => "<",
            Comparison::Ge => ">=",
            Comparison::Le => "<=",
        }
    }

    /// Applies the operator. Every comparison against null is false.
    pub fn test(self, left: &Value, right: &Value) -> bool {
        match self {
            _ if left.is_null() || right.is_null() => false,
            Comparison::Eq => left == right,
            Comparison::Ne => left != right,
            Comparison::Gt => left > right,
            Comparison::Lt => left < right,
            Comparison::Ge => left >= right,
            Comparison::Le => left <= right,
        }
    }
}

/// One side of a comparison.
#[derive(Clone, Debug)]
pub enum Operand {
    /// Read from the tuple under test.
    Attribute(AttributeRef),
    /// Read from a signal at evaluation time.
    Signal(SignalRef),
    Literal(Value),
}

impl Operand {
    fn resolve(&self, tuple: &Tuple) -> Option<Value> {
        match self {
            Operand::Attribute(attribute) => tuple.value(attribute),
            Operand::Signal(signal) => Some(signal.value()),
            Operand::Literal(value) => Some(value.clone()),
        }
    }
}

impl PartialEq for Operand {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Operand::Attribute(a), Operand::Attribute(b)) => a == b,
            (Operand::Signal(a), Operand::Signal(b)) => a.id() == b.id(),
            (Operand::Literal(a), Operand::Literal(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Attribute(attribute) => write!(f, "{}", attribute),
            Operand::Signal(signal) => write!(f, "{}", signal),
            Operand::Literal(Value::String(s)) => write!(f, "'{}'", s),
            Operand::Literal(value) => write!(f, "{}", value),
        }
    }
}

impl From<AttributeRef> for Operand {
    fn from(attribute: AttributeRef) -> Self {
        Operand::Attribute(attribute)
    }
}

impl From<&AttributeRef> for Operand {
    fn from(attribute: &AttributeRef) -> Self {
        Operand::Attribute(attribute.clone())
    }
}

impl From<SignalRef> for Operand {
    fn from(signal: SignalRef) -> Self {
        Operand::Signal(signal)
    }
}

impl From<&SignalRef> for Operand {
    fn from(signal: &SignalRef) -> Self {
        Operand::Signal(signal.clone())
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Operand::Literal(value)
    }
}

macro_rules! literal_operand {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Operand {
                fn from(value: $ty) -> Self {
                    Operand::Literal(Value::from(value))
                }
            }
        )*
    };
}

literal_operand!(bool, i32, i64, f64, &str, String);

enum Kind {
    Compare {
        op: Comparison,
        left: Operand,
        right: Operand,
    },
    And(Vec<PredicateRef>),
    Or(Vec<PredicateRef>),
}

/// A boolean condition evaluated against tuples.
pub struct Predicate {
    lifecycle: Lifecycle,
    this: Weak<Predicate>,
    kind: Kind,
    on_update: SubscriptionNode<()>,
}

impl Predicate {
    fn with_kind(kind: Kind) -> PredicateRef {
        Rc::new_cyclic(|this| {
            let lifecycle = Lifecycle::new("Predicate");
            let on_update = SubscriptionNode::new(&lifecycle);
            Predicate {
                lifecycle,
                this: this.clone(),
                kind,
                on_update,
            }
        })
    }

    /// Compares two operands.
    pub fn compare(op: Comparison, left: impl Into<Operand>, right: impl Into<Operand>) -> PredicateRef {
        Self::with_kind(Kind::Compare {
            op,
            left: left.into(),
            right: right.into(),
        })
    }

    /// True when every predicate holds.
    pub fn all(predicates: Vec<PredicateRef>) -> PredicateRef {
        Self::with_kind(Kind::And(predicates))
    }

    /// True when any predicate holds.
    pub fn any(predicates: Vec<PredicateRef>) -> PredicateRef {
        Self::with_kind(Kind::Or(predicates))
    }

    pub fn and(self: &Rc<Self>, other: &PredicateRef) -> PredicateRef {
        Self::all(alloc::vec![self.clone(), other.clone()])
    }

    pub fn or(self: &Rc<Self>, other: &PredicateRef) -> PredicateRef {
        Self::any(alloc::vec![self.clone(), other.clone()])
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.lifecycle.id()
    }

    /// Evaluates the predicate. A comparison whose attribute the tuple lacks
    /// is false.
    pub fn eval(&self, tuple: &Tuple) -> bool {
        match &self.kind {
            Kind::Compare { op, left, right } => match (left.resolve(tuple), right.resolve(tuple)) {
                (Some(l), Some(r)) => op.test(&l, &r),
                _ => false,
            },
            Kind::And(predicates) => predicates.iter().all(|p| p.eval(tuple)),
            Kind::Or(predicates) => predicates.iter().any(|p| p.eval(tuple)),
        }
    }

    /// Returns every attribute the predicate reads from tuples.
    pub fn attributes(&self) -> Vec<AttributeRef> {
        let mut out = Vec::new();
        self.collect_attributes(&mut out);
        out
    }

    fn collect_attributes(&self, out: &mut Vec<AttributeRef>) {
        match &self.kind {
            Kind::Compare { left, right, .. } => {
                for operand in [left, right] {
                    if let Operand::Attribute(attribute) = operand {
                        if !out.contains(attribute) {
                            out.push(attribute.clone());
                        }
                    }
                }
            }
            Kind::And(predicates) | Kind::Or(predicates) => {
                for predicate in predicates {
                    predicate.collect_attributes(out);
                }
            }
        }
    }

    /// Attribute pairs that must be equal for the predicate to hold, found
    /// at the top level or inside conjunctions.
    pub(crate) fn equalities(&self) -> Vec<(AttributeRef, AttributeRef)> {
        match &self.kind {
            Kind::Compare {
                op: Comparison::Eq,
                left: Operand::Attribute(left),
                right: Operand::Attribute(right),
            } => alloc::vec![(left.clone(), right.clone())],
            Kind::And(predicates) => predicates.iter().flat_map(|p| p.equalities()).collect(),
            Kind::Compare { .. } | Kind::Or(_) => Vec::new(),
        }
    }

    /// Subscribes to re-evaluation notices. The predicate must be retained by
    /// `retainer`.
    pub fn on_update<F>(&self, retainer: &Retainer, callback: F) -> Result<Subscription>
    where
        F: Fn(&()) + 'static,
    {
        if !self.is_live() {
            return Err(Error::not_live(self.id(), "on_update"));
        }
        self.on_update.subscribe(retainer, callback)
    }

    pub(crate) fn update_events(&self) -> &SubscriptionNode<()> {
        &self.on_update
    }

    fn notify(&self) {
        tracing::trace!(predicate = self.id(), "predicate operands changed");
        self.on_update.call(&());
    }

    fn signals(&self) -> Vec<&Signal> {
        match &self.kind {
            Kind::Compare { left, right, .. } => [left, right]
                .into_iter()
                .filter_map(|operand| match operand {
                    Operand::Signal(signal) => Some(signal.as_ref()),
                    _ => None,
                })
                .collect(),
            Kind::And(_) | Kind::Or(_) => Vec::new(),
        }
    }

    fn children(&self) -> &[PredicateRef] {
        match &self.kind {
            Kind::And(predicates) | Kind::Or(predicates) => predicates,
            Kind::Compare { .. } => &[],
        }
    }
}

impl Retainable for Predicate {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn retained_children(&self) -> Vec<&dyn Retainable> {
        let mut children: Vec<&dyn Retainable> = Vec::new();
        for signal in self.signals() {
            children.push(signal as &dyn Retainable);
        }
        for predicate in self.children() {
            children.push(predicate.as_ref() as &dyn Retainable);
        }
        children
    }

    fn install_subscriptions(&self) -> Result<Vec<Subscription>> {
        let me = self.lifecycle.as_retainer();
        let mut subscriptions = Vec::new();
        for signal in self.signals() {
            subscriptions.push(
                signal
                    .change_events()
                    .subscribe(&me, forward(&self.this, |p: &Predicate, _: &SignalChange| p.notify()))?,
            );
        }
        for predicate in self.children() {
            subscriptions.push(
                predicate
                    .update_events()
                    .subscribe(&me, forward(&self.this, |p: &Predicate, _: &()| p.notify()))?,
            );
        }
        Ok(subscriptions)
    }
}

impl PartialEq for Predicate {
    fn eq(&self, other: &Self) -> bool {
        match (&self.kind, &other.kind) {
            (
                Kind::Compare { op: o1, left: l1, right: r1 },
                Kind::Compare { op: o2, left: l2, right: r2 },
            ) => o1 == o2 && l1 == l2 && r1 == r2,
            (Kind::And(a), Kind::And(b)) | (Kind::Or(a), Kind::Or(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (joiner, predicates) = match &self.kind {
            Kind::Compare { op, left, right } => {
                return write!(f, "{} {} {}", left, op.symbol(), right);
            }
            Kind::And(predicates) => (" and ", predicates),
            Kind::Or(predicates) => (" or ", predicates),
        };
        write!(f, "(")?;
        for (i, predicate) in predicates.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", joiner)?;
            }
            write!(f, "{}", predicate)?;
        }
        write!(f, ")")
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Predicate({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeExt;
    use crate::relation::Relation;
    use crate::set::{Set, SetBuilder};
    use alloc::string::ToString;
    use alloc::vec;
    use core::cell::Cell;
    use tributary_core::DataType;

    fn photos() -> Rc<Set> {
        SetBuilder::new("photos")
            .unwrap()
            .attribute("id", DataType::Integer)
            .unwrap()
            .attribute("user_id", DataType::Integer)
            .unwrap()
            .attribute("title", DataType::String)
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_comparison_semantics() {
        assert!(!Comparison::Eq.test(&Value::Null, &Value::Null));
        assert!(!Comparison::Ne.test(&Value::Null, &Value::Integer(1)));
        assert!(!Comparison::Gt.test(&Value::Null, &Value::Integer(1)));
        assert!(Comparison::Eq.test(&Value::Integer(2), &Value::Float(2.0)));
        assert!(Comparison::Ge.test(&Value::Integer(2), &Value::Float(2.0)));
        assert!(Comparison::Le.test(&Value::Integer(2), &Value::Float(2.0)));
        assert!(!Comparison::Ne.test(&Value::Integer(2), &Value::Float(2.0)));
        assert!(Comparison::Lt.test(&Value::from("a"), &Value::from("b")));
        assert!(Comparison::Ne.test(&Value::Integer(1), &Value::Integer(2)));
    }

    #[test]
    fn test_eval_against_tuple() {
        let photos = photos();
        let user_id = photos.attribute("user_id").unwrap();
        let title = photos.attribute("title").unwrap();
        let tuple = photos.build([("id", Value::from(1)), ("user_id", Value::from(7)), ("title", Value::from("sunset"))]).unwrap();

        assert!(user_id.equals(7).eval(&tuple));
        assert!(!user_id.equals(8).eval(&tuple));
        assert!(user_id.gt(3).and(&title.equals("sunset")).eval(&tuple));
        assert!(user_id.lt(3).or(&title.not_equals("dawn")).eval(&tuple));
    }

    #[test]
    fn test_missing_attribute_is_false() {
        let photos = photos();
        let others = photos_named("others");
        let foreign = others.attribute("user_id").unwrap();
        let tuple = photos.build([("id", 1), ("user_id", 7)]).unwrap();
        assert!(!foreign.equals(7).eval(&tuple));
    }

    fn photos_named(name: &str) -> Rc<Set> {
        SetBuilder::new(name)
            .unwrap()
            .attribute("id", DataType::Integer)
            .unwrap()
            .attribute("user_id", DataType::Integer)
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_structural_equality_and_display() {
        let photos = photos();
        let user_id = photos.attribute("user_id").unwrap();
        assert_eq!(*user_id.equals(1), *user_id.equals(1));
        assert_ne!(*user_id.equals(1), *user_id.equals(2));
        assert_eq!(user_id.equals("x").to_string(), "photos.user_id = 'x'");
        assert_eq!(
            user_id.ge(1).and(&user_id.le(5)).to_string(),
            "(photos.user_id >= 1 and photos.user_id <= 5)"
        );
        assert_eq!(user_id.equals(1).attributes(), vec![user_id]);
    }

    #[test]
    fn test_signal_operand_fires_update() {
        let photos = photos();
        let root = Retainer::root();
        photos.retain(&root).unwrap();
        let user_id = photos.attribute("user_id").unwrap();
        let source = photos.create([("id", 1), ("user_id", 3)]).unwrap();
        let signal = Signal::attribute(source.clone(), user_id.clone());

        let predicate = user_id.equals(&signal);
        predicate.retain(&root).unwrap();
        assert!(signal.is_live());

        let fired = Rc::new(Cell::new(0));
        let counter = fired.clone();
        predicate.on_update(&root, move |_| counter.set(counter.get() + 1)).unwrap();

        source.set_field("user_id", 4).unwrap();
        assert_eq!(fired.get(), 1);
        assert!(predicate.eval(&source));

        predicate.release(&root).unwrap();
        assert!(!signal.is_live());
    }

    #[test]
    fn test_compound_relays_child_updates() {
        let photos = photos();
        let root = Retainer::root();
        photos.retain(&root).unwrap();
        let user_id = photos.attribute("user_id").unwrap();
        let source = photos.create([("id", 1), ("user_id", 3)]).unwrap();
        let signal = Signal::attribute(source.clone(), user_id.clone());

        let compound = user_id.equals(&signal).or(&user_id.equals(9));
        compound.retain(&root).unwrap();
        let fired = Rc::new(Cell::new(0));
        let counter = fired.clone();
        compound.on_update(&root, move |_| counter.set(counter.get() + 1)).unwrap();

        source.set_field("user_id", 5).unwrap();
        assert_eq!(fired.get(), 1);
    }
}
