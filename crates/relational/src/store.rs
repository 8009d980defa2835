//! Materialized tuple storage shared by every relation.

use crate::tuple::TupleRef;
use alloc::vec::Vec;
use core::cell::RefCell;
use hashbrown::HashMap;
use tributary_core::ObjectId;

/// Tombstones tolerated before a removal compacts the slots.
const COMPACT_THRESHOLD: usize = 32;

/// An ordered list of tuples with O(1) membership and removal by tuple
/// identity.
///
/// Removal leaves a tombstone in place; slots are compacted once
/// tombstones outnumber live tuples, or before a positional insert.
///
/// Every method borrows internally and returns before the caller fires
/// events, so observers may read the store re-entrantly.
#[derive(Default)]
pub struct TupleStore {
    inner: RefCell<Slots>,
}

#[derive(Default)]
struct Slots {
    entries: Vec<Option<TupleRef>>,
    /// Slot index of every live tuple.
    slots: HashMap<ObjectId, usize>,
}

impl Slots {
    fn live(&self) -> impl Iterator<Item = &TupleRef> {
        self.entries.iter().flatten()
    }

    fn tombstones(&self) -> usize {
        self.entries.len() - self.slots.len()
    }

    fn compact(&mut self) {
        if self.tombstones() == 0 {
            return;
        }
        self.entries.retain(Option::is_some);
        for (slot, tuple) in self.entries.iter().flatten().enumerate() {
            self.slots.insert(tuple.id(), slot);
        }
    }

    fn rebuild(&mut self, tuples: Vec<TupleRef>) -> Vec<TupleRef> {
        self.slots.clear();
        let mut kept = Vec::with_capacity(tuples.len());
        for tuple in tuples {
            if !self.slots.contains_key(&tuple.id()) {
                self.slots.insert(tuple.id(), kept.len());
                kept.push(Some(tuple));
            }
        }
        core::mem::replace(&mut self.entries, kept).into_iter().flatten().collect()
    }
}

impl TupleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().slots.is_empty()
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.inner.borrow().slots.contains_key(&id)
    }

    pub fn first(&self) -> Option<TupleRef> {
        self.inner.borrow().live().next().cloned()
    }

    pub fn snapshot(&self) -> Vec<TupleRef> {
        self.inner.borrow().live().cloned().collect()
    }

    /// Index of a tuple among the live tuples.
    pub fn position(&self, id: ObjectId) -> Option<usize> {
        let inner = self.inner.borrow();
        let slot = *inner.slots.get(&id)?;
        Some(inner.entries[..slot].iter().filter(|e| e.is_some()).count())
    }

    /// Appends a tuple. Returns false if it is already present.
    pub fn push(&self, tuple: TupleRef) -> bool {
        let mut inner = self.inner.borrow_mut();
        if inner.slots.contains_key(&tuple.id()) {
            return false;
        }
        let slot = inner.entries.len();
        inner.slots.insert(tuple.id(), slot);
        inner.entries.push(Some(tuple));
        true
    }

    /// Inserts a tuple at `index`. Returns false if it is already present.
    pub fn insert_at(&self, index: usize, tuple: TupleRef) -> bool {
        let mut inner = self.inner.borrow_mut();
        if inner.slots.contains_key(&tuple.id()) {
            return false;
        }
        inner.compact();
        let index = index.min(inner.entries.len());
        inner.entries.insert(index, Some(tuple));
        let Slots { entries, slots } = &mut *inner;
        for (slot, entry) in entries.iter().enumerate().skip(index) {
            if let Some(t) = entry {
                slots.insert(t.id(), slot);
            }
        }
        true
    }

    /// Index of the first tuple for which `goes_after` is false.
    pub fn partition_point<F>(&self, mut goes_after: F) -> usize
    where
        F: FnMut(&TupleRef) -> bool,
    {
        let mut inner = self.inner.borrow_mut();
        inner.compact();
        inner.entries.partition_point(|entry| entry.as_ref().is_some_and(&mut goes_after))
    }

    /// Removes a tuple by identity.
    pub fn remove(&self, id: ObjectId) -> Option<TupleRef> {
        let mut inner = self.inner.borrow_mut();
        let slot = inner.slots.remove(&id)?;
        let removed = inner.entries.get_mut(slot).and_then(Option::take);
        while matches!(inner.entries.last(), Some(None)) {
            inner.entries.pop();
        }
        if inner.tombstones() > COMPACT_THRESHOLD.max(inner.slots.len()) {
            inner.compact();
        }
        removed
    }

    /// Replaces the contents, returning the previous tuples.
    pub fn replace(&self, tuples: Vec<TupleRef>) -> Vec<TupleRef> {
        self.inner.borrow_mut().rebuild(tuples)
    }

    /// Removes every tuple, returning them.
    pub fn clear(&self) -> Vec<TupleRef> {
        self.replace(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::Tuple;
    use alloc::vec;

    fn tuple() -> TupleRef {
        Tuple::projected(Vec::new())
    }

    fn ids(store: &TupleStore) -> Vec<ObjectId> {
        store.snapshot().iter().map(|t| t.id()).collect()
    }

    #[test]
    fn test_push_is_idempotent() {
        let store = TupleStore::new();
        let t = tuple();
        assert!(store.push(t.clone()));
        assert!(!store.push(t.clone()));
        assert_eq!(store.len(), 1);
        assert!(store.contains(t.id()));
    }

    #[test]
    fn test_insert_and_remove_positions() {
        let store = TupleStore::new();
        let (a, b, c) = (tuple(), tuple(), tuple());
        store.push(a.clone());
        store.push(c.clone());
        store.insert_at(1, b.clone());

        assert_eq!(ids(&store), vec![a.id(), b.id(), c.id()]);
        assert_eq!(store.position(c.id()), Some(2));

        let removed = store.remove(b.id()).unwrap();
        assert_eq!(removed.id(), b.id());
        assert!(store.remove(b.id()).is_none());
        assert_eq!(store.position(c.id()), Some(1));
        assert_eq!(store.position(b.id()), None);
    }

    #[test]
    fn test_removal_keeps_order_across_compaction() {
        let store = TupleStore::new();
        let tuples: Vec<TupleRef> = (0..200).map(|_| tuple()).collect();
        for t in &tuples {
            store.push(t.clone());
        }
        for t in tuples.iter().step_by(2) {
            assert!(store.remove(t.id()).is_some());
        }

        let odd: Vec<ObjectId> = tuples.iter().skip(1).step_by(2).map(|t| t.id()).collect();
        assert_eq!(ids(&store), odd);
        assert_eq!(store.len(), 100);
        assert_eq!(store.first().map(|t| t.id()), Some(tuples[1].id()));
        assert_eq!(store.position(tuples[199].id()), Some(99));

        // Tombstones now outnumber live tuples, so this removal compacts.
        assert!(store.remove(tuples[101].id()).is_some());
        assert!(!store.contains(tuples[101].id()));
        assert_eq!(store.len(), 99);
        assert_eq!(store.position(tuples[199].id()), Some(98));
        assert_eq!(store.remove(tuples[199].id()).map(|t| t.id()), Some(tuples[199].id()));
        assert_eq!(store.snapshot().last().map(|t| t.id()), Some(tuples[197].id()));
    }

    #[test]
    fn test_positional_insert_after_removals() {
        let store = TupleStore::new();
        let (a, b, c, d) = (tuple(), tuple(), tuple(), tuple());
        store.push(a.clone());
        store.push(b.clone());
        store.push(c.clone());
        store.remove(a.id());

        assert_eq!(store.partition_point(|t| t.id() != c.id()), 1);
        store.insert_at(1, d.clone());
        assert_eq!(ids(&store), vec![b.id(), d.id(), c.id()]);
        assert_eq!(store.remove(c.id()).map(|t| t.id()), Some(c.id()));
        assert_eq!(ids(&store), vec![b.id(), d.id()]);
    }

    #[test]
    fn test_replace_dedups() {
        let store = TupleStore::new();
        let a = tuple();
        store.push(tuple());
        let old = store.replace(vec![a.clone(), a.clone()]);
        assert_eq!(old.len(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.clear().len(), 1);
        assert!(store.is_empty());
    }
}
