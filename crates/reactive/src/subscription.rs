//! Subscription management for graph events.
//!
//! A `SubscriptionNode` is the fan-out list an object uses to publish one
//! kind of event. Only retainers of the owning object may subscribe to it,
//! and handlers run synchronously in registration order.

use crate::retainable::{Lifecycle, Retainer};
use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use tributary_core::{Error, ObjectId, Result};

/// Unique identifier for a subscription within its node.
pub type SubscriptionId = u64;

/// Callback type for event notifications.
pub type EventCallback<E> = Box<dyn Fn(&E)>;

struct Entry<E> {
    id: SubscriptionId,
    subscriber: ObjectId,
    active: Rc<Cell<bool>>,
    callback: EventCallback<E>,
}

struct Registry<E> {
    entries: RefCell<Vec<Rc<Entry<E>>>>,
    next_id: Cell<SubscriptionId>,
}

/// Removes entries from a node without knowing its event type.
trait Detach {
    fn detach(&self, id: SubscriptionId);
}

impl<E> Detach for Registry<E> {
    fn detach(&self, id: SubscriptionId) {
        self.entries.borrow_mut().retain(|entry| entry.id != id);
    }
}

/// Handle to a registered callback.
///
/// Destroying it removes the callback from its node. Destroying twice, or
/// after the node is gone, does nothing.
pub struct Subscription {
    id: SubscriptionId,
    subscriber: ObjectId,
    active: Rc<Cell<bool>>,
    registry: Weak<dyn Detach>,
}

impl Subscription {
    /// Returns the subscription ID.
    #[inline]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Returns the identity of the retainer that subscribed.
    #[inline]
    pub fn subscriber(&self) -> ObjectId {
        self.subscriber
    }

    /// Returns whether this subscription is still registered.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    /// Removes the callback from its node.
    pub fn destroy(&self) {
        if self.active.replace(false) {
            if let Some(registry) = self.registry.upgrade() {
                registry.detach(self.id);
            }
        }
    }
}

impl core::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("subscriber", &self.subscriber)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Ordered observer list owned by one retainable object.
pub struct SubscriptionNode<E> {
    owner: Lifecycle,
    registry: Rc<Registry<E>>,
}

impl<E: 'static> SubscriptionNode<E> {
    /// Creates an empty node owned by the given object.
    pub fn new(owner: &Lifecycle) -> Self {
        Self {
            owner: owner.clone(),
            registry: Rc::new(Registry {
                entries: RefCell::new(Vec::new()),
                next_id: Cell::new(1),
            }),
        }
    }

    /// Subscribes to events with the given callback.
    ///
    /// The retainer must already retain the owner of this node.
    pub fn subscribe<F>(&self, retainer: &Retainer, callback: F) -> Result<Subscription>
    where
        F: Fn(&E) + 'static,
    {
        if !self.owner.is_retained_by(retainer) {
            return Err(Error::Unauthorized {
                owner: self.owner.id(),
                retainer: retainer.id(),
            });
        }

        let id = self.registry.next_id.get();
        self.registry.next_id.set(id + 1);

        let active = Rc::new(Cell::new(true));
        self.registry.entries.borrow_mut().push(Rc::new(Entry {
            id,
            subscriber: retainer.id(),
            active: active.clone(),
            callback: Box::new(callback),
        }));

        let registry: Rc<dyn Detach> = self.registry.clone();
        Ok(Subscription {
            id,
            subscriber: retainer.id(),
            active,
            registry: Rc::downgrade(&registry),
        })
    }

    /// Invokes every active callback in registration order.
    ///
    /// Callbacks may subscribe or destroy subscriptions on this node while
    /// it is being called; a subscription destroyed mid-call is skipped.
    /// Returns the event to allow chaining.
    pub fn call<'a>(&self, event: &'a E) -> &'a E {
        let entries: Vec<Rc<Entry<E>>> = self.registry.entries.borrow().clone();
        for entry in entries {
            if entry.active.get() {
                (entry.callback)(event);
            }
        }
        event
    }

    /// Returns the ID of the owning object.
    #[inline]
    pub fn owner_id(&self) -> ObjectId {
        self.owner.id()
    }

    /// Returns the number of registered subscriptions.
    pub fn len(&self) -> usize {
        self.registry.entries.borrow().len()
    }

    /// Returns true if there are no subscriptions.
    pub fn is_empty(&self) -> bool {
        self.registry.entries.borrow().is_empty()
    }

    /// Returns the identities of the subscribers, in registration order.
    pub fn subscriber_ids(&self) -> Vec<ObjectId> {
        self.registry
            .entries
            .borrow()
            .iter()
            .map(|entry| entry.subscriber)
            .collect()
    }

    /// Destroys all subscriptions.
    pub fn clear(&self) {
        let entries = core::mem::take(&mut *self.registry.entries.borrow_mut());
        for entry in entries {
            entry.active.set(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retainable::Retainable;
    use alloc::vec;

    struct Owner {
        lifecycle: Lifecycle,
    }

    impl Retainable for Owner {
        fn lifecycle(&self) -> &Lifecycle {
            &self.lifecycle
        }
    }

    fn retained_owner() -> (Owner, Retainer) {
        let owner = Owner {
            lifecycle: Lifecycle::new("Owner"),
        };
        let root = Retainer::root();
        owner.retain(&root).unwrap();
        (owner, root)
    }

    #[test]
    fn test_subscribe_requires_retention() {
        let (owner, _root) = retained_owner();
        let node: SubscriptionNode<i64> = SubscriptionNode::new(owner.lifecycle());

        let err = node.subscribe(&Retainer::root(), |_| {}).unwrap_err();
        assert!(matches!(err, Error::Unauthorized { .. }));
        assert!(node.is_empty());
    }

    #[test]
    fn test_call_in_registration_order() {
        let (owner, root) = retained_owner();
        let node: SubscriptionNode<i64> = SubscriptionNode::new(owner.lifecycle());
        let log = Rc::new(RefCell::new(Vec::new()));

        let first = log.clone();
        node.subscribe(&root, move |v| first.borrow_mut().push(("first", *v)))
            .unwrap();
        let second = log.clone();
        node.subscribe(&root, move |v| second.borrow_mut().push(("second", *v)))
            .unwrap();

        assert_eq!(*node.call(&7), 7);
        assert_eq!(*log.borrow(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let (owner, root) = retained_owner();
        let node: SubscriptionNode<i64> = SubscriptionNode::new(owner.lifecycle());
        let count = Rc::new(Cell::new(0));

        let counter = count.clone();
        let sub = node
            .subscribe(&root, move |_| counter.set(counter.get() + 1))
            .unwrap();
        node.call(&1);
        sub.destroy();
        sub.destroy();
        node.call(&2);

        assert_eq!(count.get(), 1);
        assert!(!sub.is_active());
        assert_eq!(node.len(), 0);
    }

    #[test]
    fn test_destroy_during_call_skips_later_entry() {
        let (owner, root) = retained_owner();
        let node: SubscriptionNode<i64> = SubscriptionNode::new(owner.lifecycle());
        let count = Rc::new(Cell::new(0));
        let victim: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

        let slot = victim.clone();
        node.subscribe(&root, move |_| {
            if let Some(sub) = slot.borrow().as_ref() {
                sub.destroy();
            }
        })
        .unwrap();
        let counter = count.clone();
        let sub = node
            .subscribe(&root, move |_| counter.set(counter.get() + 1))
            .unwrap();
        *victim.borrow_mut() = Some(sub);

        node.call(&1);
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn test_finalization_destroys_installed_subscriptions() {
        struct Watcher {
            lifecycle: Lifecycle,
            target: Rc<Owner>,
            node: Rc<SubscriptionNode<i64>>,
            seen: Rc<Cell<i64>>,
        }

        impl Retainable for Watcher {
            fn lifecycle(&self) -> &Lifecycle {
                &self.lifecycle
            }

            fn retained_children(&self) -> Vec<&dyn Retainable> {
                vec![self.target.as_ref() as &dyn Retainable]
            }

            fn install_subscriptions(&self) -> Result<Vec<Subscription>> {
                let seen = self.seen.clone();
                let sub = self
                    .node
                    .subscribe(&self.lifecycle.as_retainer(), move |v| seen.set(*v))?;
                Ok(vec![sub])
            }
        }

        let target = Rc::new(Owner {
            lifecycle: Lifecycle::new("Owner"),
        });
        let node = Rc::new(SubscriptionNode::new(target.lifecycle()));
        let watcher = Watcher {
            lifecycle: Lifecycle::new("Watcher"),
            target: target.clone(),
            node: node.clone(),
            seen: Rc::new(Cell::new(0)),
        };

        let root = Retainer::root();
        watcher.retain(&root).unwrap();
        assert_eq!(watcher.lifecycle().subscription_count(), 1);
        node.call(&5);
        assert_eq!(watcher.seen.get(), 5);

        watcher.release(&root).unwrap();
        assert!(node.is_empty());
        assert!(!target.is_live());
        node.call(&9);
        assert_eq!(watcher.seen.get(), 5);
    }

    #[test]
    fn test_clear() {
        let (owner, root) = retained_owner();
        let node: SubscriptionNode<i64> = SubscriptionNode::new(owner.lifecycle());
        let sub = node.subscribe(&root, |_| {}).unwrap();
        node.subscribe(&root, |_| {}).unwrap();

        assert_eq!(node.subscriber_ids(), vec![root.id(), root.id()]);
        node.clear();
        assert!(node.is_empty());
        assert!(!sub.is_active());
    }
}
