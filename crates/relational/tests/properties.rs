//! Property-based tests for incremental maintenance.
//!
//! Each property drives random mutation sequences through base sets and
//! checks a derived relation against a from-scratch computation after every
//! step.

use std::cell::{Cell, OnceCell};
use std::collections::BTreeSet;
use std::rc::Rc;

use proptest::prelude::*;
use tributary_core::{DataType, Value};
use tributary_reactive::{Lifecycle, Retainable, Retainer};
use tributary_relational::{AttributeExt, Relation, RelationExt, Set, SetBuilder, Tuple};

/// A mutation of a set with an `id` and a small-domain `key` attribute.
#[derive(Clone, Debug)]
enum Op {
    Insert(i64),
    Delete(usize),
    Update(usize, i64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0i64..5).prop_map(Op::Insert),
        1 => any::<usize>().prop_map(Op::Delete),
        2 => (any::<usize>(), 0i64..5).prop_map(|(i, v)| Op::Update(i, v)),
    ]
}

fn keyed_set(name: &str) -> Rc<Set> {
    SetBuilder::new(name)
        .unwrap()
        .attribute("id", DataType::Integer)
        .unwrap()
        .attribute("key", DataType::Integer)
        .unwrap()
        .build()
        .unwrap()
}

/// Applies one mutation. Ids are allocated from `next_id`.
fn apply(set: &Set, op: &Op, next_id: &Cell<i64>) {
    let tuples = set.tuples();
    match op {
        Op::Insert(key) => {
            let id = next_id.get();
            next_id.set(id + 1);
            set.create([("id", Value::from(id)), ("key", Value::from(*key))]).unwrap();
        }
        Op::Delete(i) if !tuples.is_empty() => {
            set.delete(&tuples[i % tuples.len()]).unwrap();
        }
        Op::Update(i, key) if !tuples.is_empty() => {
            tuples[i % tuples.len()].set_field("key", *key).unwrap();
        }
        _ => {}
    }
}

fn int(tuple: &Tuple, name: &str) -> i64 {
    tuple.value(name).and_then(|v| v.as_i64()).unwrap()
}

fn ids<R: Relation + ?Sized>(relation: &R) -> BTreeSet<i64> {
    relation.tuples().iter().map(|t| int(t, "id")).collect()
}

proptest! {
    /// Property: a retained selection always equals the filtered operand.
    #[test]
    fn selection_matches_filtered_operand(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let items = keyed_set("items");
        let root = Retainer::root();
        items.retain(&root).unwrap();
        let key = items.attribute("key").unwrap();
        let selection = items.select(&key.lt(2).or(&key.equals(4)));
        selection.retain(&root).unwrap();

        let next_id = Cell::new(0);
        for op in &ops {
            apply(&items, op, &next_id);
            let expected: BTreeSet<i64> = items
                .tuples()
                .iter()
                .filter(|t| {
                    let k = int(t, "key");
                    k < 2 || k == 4
                })
                .map(|t| int(t, "id"))
                .collect();
            prop_assert_eq!(ids(&*selection), expected);
            prop_assert_eq!(selection.len(), selection.tuples().len());
        }
    }

    /// Property: a projected value stays while any source maps to it and is
    /// deleted exactly once when the last one goes.
    #[test]
    fn projection_tracks_multiplicity(
        keys in prop::collection::vec(0i64..4, 1..30),
        order in any::<u64>(),
    ) {
        let items = keyed_set("items");
        let root = Retainer::root();
        items.retain(&root).unwrap();
        let key = items.attribute("key").unwrap();
        let projection = items.project(&[key]);
        projection.retain(&root).unwrap();

        let deletes = Rc::new(Cell::new(0usize));
        let d = deletes.clone();
        projection.on_delete(&root, move |_| d.set(d.get() + 1)).unwrap();

        let next_id = Cell::new(0);
        for k in &keys {
            apply(&items, &Op::Insert(*k), &next_id);
        }
        let distinct: BTreeSet<i64> = keys.iter().copied().collect();
        prop_assert_eq!(projection.len(), distinct.len());

        let mut step = order;
        while !items.is_empty() {
            apply(&items, &Op::Delete(step as usize), &next_id);
            step = step.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);

            let remaining: BTreeSet<i64> = items.tuples().iter().map(|t| int(t, "key")).collect();
            let projected: BTreeSet<i64> = projection.tuples().iter().map(|t| int(t, "key")).collect();
            prop_assert_eq!(projected, remaining);
        }
        prop_assert_eq!(deletes.get(), distinct.len());
    }

    /// Property: a join holds exactly the pairs satisfying its predicate,
    /// whether it probes indexes or scans.
    #[test]
    fn join_holds_exactly_matching_pairs(
        left_ops in prop::collection::vec(op_strategy(), 1..30),
        right_ops in prop::collection::vec(op_strategy(), 1..30),
    ) {
        let left = keyed_set("left");
        let right = keyed_set("right");
        let root = Retainer::root();
        left.retain(&root).unwrap();
        right.retain(&root).unwrap();
        let left_key = left.attribute("key").unwrap();
        let right_key = right.attribute("key").unwrap();

        let equi = left.join(&right).on(&right_key.equals(&left_key));
        let theta = left.join(&right).on(&right_key.ge(&left_key));
        prop_assert!(equi.is_indexed());
        prop_assert!(!theta.is_indexed());
        equi.retain(&root).unwrap();
        theta.retain(&root).unwrap();

        let pairs = |relation: &dyn Relation| -> BTreeSet<(i64, i64)> {
            relation
                .tuples()
                .iter()
                .map(|c| {
                    let (l, r) = c.components().unwrap();
                    (int(l, "id"), int(r, "id"))
                })
                .collect()
        };
        let expected = |matches: fn(i64, i64) -> bool| -> BTreeSet<(i64, i64)> {
            let mut out = BTreeSet::new();
            for l in left.tuples() {
                for r in right.tuples() {
                    if matches(int(&l, "key"), int(&r, "key")) {
                        out.insert((int(&l, "id"), int(&r, "id")));
                    }
                }
            }
            out
        };

        let (left_ids, right_ids) = (Cell::new(0), Cell::new(0));
        for i in 0..left_ops.len().max(right_ops.len()) {
            if let Some(op) = left_ops.get(i) {
                apply(&left, op, &left_ids);
            }
            if let Some(op) = right_ops.get(i) {
                apply(&right, op, &right_ids);
            }
            prop_assert_eq!(pairs(&*equi), expected(|l, r| l == r));
            prop_assert_eq!(pairs(&*theta), expected(|l, r| r >= l));
            prop_assert_eq!(equi.len(), equi.tuples().len());
        }
    }

    /// Property: an ordering is sorted and holds the operand's tuples.
    #[test]
    fn ordering_stays_sorted(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let items = keyed_set("items");
        let root = Retainer::root();
        items.retain(&root).unwrap();
        let key = items.attribute("key").unwrap();
        let id = items.attribute("id").unwrap();
        let ordering = items.order_by([key.desc(), id.asc()]);
        ordering.retain(&root).unwrap();

        let next_id = Cell::new(0);
        for op in &ops {
            apply(&items, op, &next_id);
            let sorted: Vec<(i64, i64)> = ordering
                .tuples()
                .iter()
                .map(|t| (-int(t, "key"), int(t, "id")))
                .collect();
            prop_assert!(sorted.windows(2).all(|w| w[0] <= w[1]));
            prop_assert_eq!(ids(&*ordering), ids(&*items));
        }
    }

    /// Property: releasing the only external retainer of a cyclic graph
    /// finalizes every node exactly once.
    #[test]
    fn retain_cycles_are_collected(
        size in 1usize..8,
        chords in prop::collection::vec((0usize..8, 0usize..8), 0..10),
    ) {
        let nodes: Vec<Rc<Node>> = (0..size).map(|_| Node::new()).collect();
        for (i, node) in nodes.iter().enumerate() {
            let mut peers = vec![nodes[(i + 1) % size].clone()];
            for (from, to) in &chords {
                if from % size == i && !peers.iter().any(|p| Rc::ptr_eq(p, &nodes[to % size])) {
                    peers.push(nodes[to % size].clone());
                }
            }
            let _ = node.peers.set(peers);
        }

        let root = Retainer::root();
        nodes[0].retain(&root).unwrap();
        prop_assert!(nodes.iter().all(|n| n.is_live()));

        nodes[0].release(&root).unwrap();
        for node in &nodes {
            prop_assert!(!node.is_live());
            prop_assert_eq!(node.finalized.get(), 1);
            prop_assert_eq!(node.refcount(), 0);
        }
    }
}

struct Node {
    lifecycle: Lifecycle,
    peers: OnceCell<Vec<Rc<Node>>>,
    finalized: Cell<usize>,
}

impl Node {
    fn new() -> Rc<Self> {
        Rc::new(Node {
            lifecycle: Lifecycle::new("Node"),
            peers: OnceCell::new(),
            finalized: Cell::new(0),
        })
    }
}

impl Retainable for Node {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn retained_children(&self) -> Vec<&dyn Retainable> {
        self.peers
            .get()
            .map(|peers| peers.iter().map(|p| p.as_ref() as &dyn Retainable).collect())
            .unwrap_or_default()
    }

    fn dematerialize(&self) {
        self.finalized.set(self.finalized.get() + 1);
    }
}
