//! Incremental selection operator.

use crate::attribute::AttributeRef;
use crate::describe::QueryDescription;
use crate::predicate::PredicateRef;
use crate::relation::{forward, release_member, retain_member, Relation, RelationEvents, RelationRef};
use crate::set::Set;
use crate::store::TupleStore;
use crate::tuple::{TupleRef, TupleUpdate};
use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use alloc::string::ToString;
use alloc::vec;
use alloc::vec::Vec;
use hashbrown::HashSet;
use tributary_core::{ObjectId, Result};
use tributary_reactive::{Lifecycle, Retainable, Subscription};

/// The tuples of an operand that satisfy a predicate.
///
/// Membership is kept current on operand inserts, deletes and field
/// updates, and re-evaluated in full when the predicate's signals change.
/// Tuples that match both before and after a re-evaluation produce no
/// events.
pub struct Selection {
    lifecycle: Lifecycle,
    this: Weak<Selection>,
    operand: RelationRef,
    predicate: PredicateRef,
    store: TupleStore,
    events: RelationEvents,
}

impl Selection {
    /// Creates an unretained selection.
    pub fn new(operand: RelationRef, predicate: PredicateRef) -> Rc<Self> {
        Rc::new_cyclic(|this| {
            let lifecycle = Lifecycle::new("Selection");
            let events = RelationEvents::new(&lifecycle);
            Selection {
                lifecycle,
                this: this.clone(),
                operand,
                predicate,
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
    pub fn predicate(&self) -> &PredicateRef {
        &self.predicate
    }

    fn admit(&self, tuple: &TupleRef) {
        if self.store.push(tuple.clone()) {
            retain_member(&self.lifecycle, tuple);
            self.events.on_insert.call(tuple);
        }
    }

    fn evict(&self, tuple: &TupleRef) {
        if let Some(removed) = self.store.remove(tuple.id()) {
            release_member(&self.lifecycle, &removed);
            self.events.on_delete.call(&removed);
        }
    }

    fn operand_inserted(&self, tuple: &TupleRef) {
        if self.predicate.eval(tuple) {
            self.admit(tuple);
        }
    }

    fn operand_deleted(&self, tuple: &TupleRef) {
        self.evict(tuple);
    }

    fn operand_updated(&self, update: &TupleUpdate) {
        let present = self.store.contains(update.tuple.id());
        match (present, self.predicate.eval(&update.tuple)) {
            (true, true) => {
                self.events.on_tuple_update.call(update);
            }
            (true, false) => self.evict(&update.tuple),
            (false, true) => self.admit(&update.tuple),
            (false, false) => {}
        }
    }

    /// Re-evaluates every operand tuple after the predicate changed.
    fn rematch(&self) {
        let candidates = self.operand.tuples();
        let matching: HashSet<ObjectId> = candidates
            .iter()
            .filter(|t| self.predicate.eval(t))
            .map(|t| t.id())
            .collect();

        let stale: Vec<TupleRef> = self
            .store
            .snapshot()
            .into_iter()
            .filter(|t| !matching.contains(&t.id()))
            .collect();
        for tuple in &stale {
            self.evict(tuple);
        }

        let mut added = 0usize;
        for tuple in candidates {
            if matching.contains(&tuple.id()) && !self.store.contains(tuple.id()) {
                self.admit(&tuple);
                added += 1;
            }
        }
        tracing::debug!(
            relation = self.lifecycle.id(),
            removed = stale.len(),
            added,
            "selection re-matched"
        );
    }
}

impl Retainable for Selection {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn retained_children(&self) -> Vec<&dyn Retainable> {
        vec![self.operand.as_retainable(), self.predicate.as_ref() as &dyn Retainable]
    }

    fn materialize(&self) -> Result<()> {
        for tuple in self.operand.tuples() {
            if self.predicate.eval(&tuple) && self.store.push(tuple.clone()) {
                tuple.retain(&self.lifecycle.as_retainer())?;
            }
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
                .subscribe(&me, forward(&self.this, Selection::operand_inserted))?,
            events
                .on_delete
                .subscribe(&me, forward(&self.this, Selection::operand_deleted))?,
            events
                .on_tuple_update
                .subscribe(&me, forward(&self.this, Selection::operand_updated))?,
            self.predicate
                .update_events()
                .subscribe(&me, forward(&self.this, |s: &Selection, _: &()| s.rematch()))?,
        ])
    }
}

impl Relation for Selection {
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
        self.operand
            .tuples()
            .into_iter()
            .filter(|t| self.predicate.eval(t))
            .collect()
    }

    fn attribute(&self, name: &str) -> Result<AttributeRef> {
        self.operand.attribute(name)
    }

    fn composed_sets(&self) -> Vec<Rc<Set>> {
        self.operand.composed_sets()
    }

    fn describe(&self) -> QueryDescription {
        QueryDescription::Selection {
            operand: Box::new(self.operand.describe()),
            predicate: self.predicate.to_string(),
        }
    }

    fn merge(&self, tuples: Vec<TupleRef>) -> Result<Vec<TupleRef>> {
        self.operand.merge(tuples)
    }

    fn base_set(&self) -> Result<Rc<Set>> {
        self.operand.base_set()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeExt;
    use crate::relation::RelationExt;
    use crate::set::SetBuilder;
    use crate::signal::Signal;
    use alloc::string::String;
    use core::cell::RefCell;
    use tributary_core::{DataType, Error, Value};
    use tributary_reactive::Retainer;

    fn photos() -> Rc<Set> {
        SetBuilder::new("photos")
            .unwrap()
            .attribute("id", DataType::Integer)
            .unwrap()
            .attribute("user_id", DataType::Integer)
            .unwrap()
            .build()
            .unwrap()
    }

    type Log = Rc<RefCell<Vec<(String, i64)>>>;

    fn record(selection: &Rc<Selection>, root: &Retainer) -> Log {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let l = log.clone();
        selection
            .on_insert(root, move |t| l.borrow_mut().push(("insert".into(), id_of(t))))
            .unwrap();
        let l = log.clone();
        selection
            .on_delete(root, move |t| l.borrow_mut().push(("delete".into(), id_of(t))))
            .unwrap();
        let l = log.clone();
        selection
            .on_tuple_update(root, move |u| l.borrow_mut().push(("update".into(), id_of(&u.tuple))))
            .unwrap();
        log
    }

    fn id_of(tuple: &TupleRef) -> i64 {
        tuple.value("id").and_then(|v| v.as_i64()).unwrap_or(-1)
    }

    #[test]
    fn test_initial_read_is_lazy() {
        let photos = photos();
        let root = Retainer::root();
        photos.retain(&root).unwrap();
        photos.create([("id", 1), ("user_id", 1)]).unwrap();
        photos.create([("id", 2), ("user_id", 2)]).unwrap();

        let user_id = photos.attribute("user_id").unwrap();
        let selection = photos.select(&user_id.equals(1));
        assert!(!selection.is_live());
        assert_eq!(selection.tuples().len(), 1);
        assert!(matches!(selection.on_insert(&root, |_| {}), Err(Error::NotLive { .. })));
    }

    #[test]
    fn test_incremental_maintenance() {
        let photos = photos();
        let root = Retainer::root();
        photos.retain(&root).unwrap();
        let user_id = photos.attribute("user_id").unwrap();
        let selection = photos.select(&user_id.equals(1));
        selection.retain(&root).unwrap();
        let log = record(&selection, &root);

        let a = photos.create([("id", 1), ("user_id", 1)]).unwrap();
        let b = photos.create([("id", 2), ("user_id", 2)]).unwrap();
        b.set_field("user_id", 1).unwrap();
        a.set_field("user_id", 3).unwrap();
        b.set_field("id", 5).unwrap();
        photos.delete(&b).unwrap();

        assert_eq!(
            *log.borrow(),
            vec![
                ("insert".into(), 1),
                ("insert".into(), 2),
                ("delete".into(), 1),
                ("update".into(), 5),
                ("delete".into(), 5),
            ]
        );
        assert!(selection.is_empty());
    }

    #[test]
    fn test_member_tuples_are_retained() {
        let photos = photos();
        let root = Retainer::root();
        photos.retain(&root).unwrap();
        let tuple = photos.create([("id", 1), ("user_id", 1)]).unwrap();
        let user_id = photos.attribute("user_id").unwrap();
        let selection = photos.select(&user_id.equals(1));

        selection.retain(&root).unwrap();
        assert_eq!(tuple.refcount(), 2);
        selection.release(&root).unwrap();
        assert_eq!(tuple.refcount(), 1);
        assert!(selection.store().is_empty());
    }

    #[test]
    fn test_signal_change_rematches_without_churn() {
        let users = SetBuilder::new("users")
            .unwrap()
            .attribute("id", DataType::Integer)
            .unwrap()
            .attribute("team", DataType::Integer)
            .unwrap()
            .build()
            .unwrap();
        let photos = photos();
        let root = Retainer::root();
        users.retain(&root).unwrap();
        photos.retain(&root).unwrap();

        let owner = users.create([("id", 1), ("team", 10)]).unwrap();
        let team = users.attribute("team").unwrap();
        let user_id = photos.attribute("user_id").unwrap();
        let id = photos.attribute("id").unwrap();

        // photos with user_id <= owner.team / 10 or id = 3
        let limit = Signal::attribute(owner.clone(), team).map(|v| Value::Integer(v.as_i64().unwrap_or(0) / 10));
        let selection = photos.select(&user_id.le(&limit).or(&id.equals(3)));
        for (pid, uid) in [(1, 1), (2, 2), (3, 3)] {
            photos.create([("id", pid), ("user_id", uid)]).unwrap();
        }
        selection.retain(&root).unwrap();
        assert_eq!(selection.len(), 2);
        let log = record(&selection, &root);

        owner.set_field("team", 20).unwrap();
        assert_eq!(*log.borrow(), vec![("insert".into(), 2)]);

        log.borrow_mut().clear();
        owner.set_field("team", 0).unwrap();
        // photo 3 matches before and after through `id = 3`.
        assert_eq!(*log.borrow(), vec![("delete".into(), 1), ("delete".into(), 2)]);
        assert_eq!(selection.tuples().iter().map(id_of).collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_describe_and_delegation() {
        let photos = photos();
        let user_id = photos.attribute("user_id").unwrap();
        let selection = photos.select(&user_id.equals(1));
        assert_eq!(selection.describe().to_string(), "select(photos, photos.user_id = 1)");
        assert_eq!(selection.composed_sets().len(), 1);
        assert!(selection.has_attribute("user_id"));
        assert!(selection.attribute("nope").is_err());
        assert_eq!(selection.base_set().unwrap().name(), "photos");
    }
}
