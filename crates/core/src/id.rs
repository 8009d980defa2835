//! Object identities.
//!
//! Every node of a relational graph (relation, tuple, predicate, signal) and
//! every external retainer gets a process-unique `ObjectId`. Identities are
//! never reused, so they can key hash maps across the whole graph.

use core::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a graph object or external retainer.
pub type ObjectId = u64;

/// Global object ID counter.
static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Gets the next unique object ID.
pub fn next_object_id() -> ObjectId {
    NEXT_OBJECT_ID.fetch_add(1, Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = next_object_id();
        let b = next_object_id();
        assert_ne!(a, b);
        assert!(b > a);
    }
}
