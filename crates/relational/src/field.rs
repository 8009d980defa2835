//! Tuple fields.

use crate::attribute::AttributeRef;
use crate::signal::SignalRef;
use crate::tuple::TupleRef;
use alloc::rc::Rc;
use core::cell::{Cell, RefCell};
use tributary_core::{Result, Value};

/// Computes the signal backing a synthetic field of a tuple.
pub type SyntheticFn = Rc<dyn Fn(&TupleRef) -> SignalRef>;

/// A stored, settable field.
///
/// Tracks whether the value changed since it was last marked clean
/// (pushed to a backing store).
pub struct PrimitiveField {
    attribute: AttributeRef,
    value: RefCell<Value>,
    dirty: Cell<bool>,
}

impl PrimitiveField {
    pub(crate) fn new(attribute: AttributeRef, value: Value) -> Self {
        Self {
            attribute,
            value: RefCell::new(value),
            dirty: Cell::new(false),
        }
    }

    #[inline]
    pub fn attribute(&self) -> &AttributeRef {
        &self.attribute
    }

    pub fn value(&self) -> Value {
        self.value.borrow().clone()
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty.get()
    }

    pub fn mark_clean(&self) {
        self.dirty.set(false);
    }

    /// Converts and stores a value.
    ///
    /// Returns the previous value if the stored value changed. Nothing is
    /// stored when conversion fails.
    pub(crate) fn assign(&self, value: Value) -> Result<Option<Value>> {
        let converted = self.attribute.convert(value)?;
        if *self.value.borrow() == converted {
            return Ok(None);
        }
        let old = self.value.replace(converted);
        self.dirty.set(true);
        Ok(Some(old))
    }
}

/// Declaration of a derived attribute on a set.
#[derive(Clone)]
pub struct SyntheticAttribute {
    pub(crate) attribute: AttributeRef,
    pub(crate) compute: SyntheticFn,
}

impl SyntheticAttribute {
    #[inline]
    pub fn attribute(&self) -> &AttributeRef {
        &self.attribute
    }
}

/// A read-only field whose value comes from a signal.
#[derive(Clone)]
pub struct SyntheticField {
    attribute: AttributeRef,
    signal: SignalRef,
}

impl SyntheticField {
    pub(crate) fn new(attribute: AttributeRef, signal: SignalRef) -> Self {
        Self { attribute, signal }
    }

    #[inline]
    pub fn attribute(&self) -> &AttributeRef {
        &self.attribute
    }

    #[inline]
    pub fn signal(&self) -> &SignalRef {
        &self.signal
    }

    pub fn value(&self) -> Value {
        self.signal.value()
    }
}
