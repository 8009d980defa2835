//! Retain/release lifetime protocol.
//!
//! Graph objects are cheap to construct and do no work until something
//! retains them. The first retention activates the object: it retains its
//! declared children, materializes its state and installs its
//! subscriptions. Releasing the last retainer that connects the object to
//! a live root tears all of that down again.
//!
//! Liveness is reachability, not a positive refcount. Retainers can form
//! cycles (A retains B, B retains A) that would keep a naive refcount above
//! zero forever, so every release that leaves retainers behind searches the
//! "is retained by" graph for an external root before deciding.

use crate::subscription::Subscription;
use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::fmt;
use hashbrown::HashSet;
use tributary_core::{next_object_id, Error, ObjectId, Result};

/// Identity of something that holds a retain on a graph object.
///
/// Either an external root (application code, never itself retained) or
/// another graph object.
#[derive(Clone)]
pub struct Retainer {
    id: ObjectId,
    kind: RetainerKind,
}

#[derive(Clone)]
enum RetainerKind {
    External,
    Object(Weak<LifecycleState>),
}

impl Retainer {
    /// Creates a fresh external root retainer.
    pub fn root() -> Self {
        Self {
            id: next_object_id(),
            kind: RetainerKind::External,
        }
    }

    /// Returns the retainer's identity.
    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Returns true if this retainer is not a graph object.
    #[inline]
    pub fn is_external(&self) -> bool {
        matches!(self.kind, RetainerKind::External)
    }
}

impl PartialEq for Retainer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Retainer {}

impl fmt::Debug for Retainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            RetainerKind::External => write!(f, "Retainer::External({})", self.id),
            RetainerKind::Object(_) => write!(f, "Retainer::Object({})", self.id),
        }
    }
}

struct LifecycleState {
    id: ObjectId,
    kind: &'static str,
    retainers: RefCell<Vec<Retainer>>,
    live: Cell<bool>,
    subscriptions: RefCell<Vec<Subscription>>,
}

/// Retain bookkeeping embedded in every graph object.
#[derive(Clone)]
pub struct Lifecycle {
    state: Rc<LifecycleState>,
}

impl Lifecycle {
    /// Creates the bookkeeping for a new, unretained object.
    pub fn new(kind: &'static str) -> Self {
        Self {
            state: Rc::new(LifecycleState {
                id: next_object_id(),
                kind,
                retainers: RefCell::new(Vec::new()),
                live: Cell::new(false),
                subscriptions: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Returns the object's identity.
    #[inline]
    pub fn id(&self) -> ObjectId {
        self.state.id
    }

    /// Returns the object kind used in diagnostics.
    #[inline]
    pub fn kind(&self) -> &'static str {
        self.state.kind
    }

    /// Returns the retainer identity this object uses for its own retains.
    pub fn as_retainer(&self) -> Retainer {
        Retainer {
            id: self.state.id,
            kind: RetainerKind::Object(Rc::downgrade(&self.state)),
        }
    }

    /// Returns the number of distinct retainers.
    #[inline]
    pub fn refcount(&self) -> usize {
        self.state.retainers.borrow().len()
    }

    /// Returns true while the object is activated.
    #[inline]
    pub fn is_live(&self) -> bool {
        self.state.live.get()
    }

    /// Returns true if the given retainer currently holds this object.
    pub fn is_retained_by(&self, retainer: &Retainer) -> bool {
        self.state.retainers.borrow().iter().any(|r| r == retainer)
    }

    /// Returns the identities of the current retainers.
    pub fn retainer_ids(&self) -> Vec<ObjectId> {
        self.state.retainers.borrow().iter().map(Retainer::id).collect()
    }

    /// Returns the number of subscriptions installed by the object.
    pub fn subscription_count(&self) -> usize {
        self.state.subscriptions.borrow().len()
    }

    fn register(&self, by: &Retainer) -> Result<()> {
        let mut retainers = self.state.retainers.borrow_mut();
        if retainers.iter().any(|r| r == by) {
            return Err(Error::AlreadyRetained {
                object: self.id(),
                retainer: by.id(),
            });
        }
        retainers.push(by.clone());
        Ok(())
    }

    fn deregister(&self, by: &Retainer) -> Result<()> {
        let mut retainers = self.state.retainers.borrow_mut();
        match retainers.iter().position(|r| r == by) {
            Some(index) => {
                retainers.remove(index);
                Ok(())
            }
            None => Err(Error::NotRetainedBy {
                object: self.id(),
                retainer: by.id(),
            }),
        }
    }

    /// Searches the "is retained by" graph for an external root.
    ///
    /// A path succeeds on reaching an external retainer or an object with
    /// no retainers of its own. Paths that close back on this object or
    /// revisit a node stop contributing.
    pub fn reachable_from_root(&self) -> bool {
        let released = self.id();
        let mut visited: HashSet<ObjectId> = HashSet::new();
        let mut stack: Vec<Retainer> = self.state.retainers.borrow().clone();

        while let Some(retainer) = stack.pop() {
            let weak = match &retainer.kind {
                RetainerKind::External => return true,
                RetainerKind::Object(weak) => weak,
            };
            if retainer.id == released || !visited.insert(retainer.id) {
                continue;
            }
            let Some(state) = weak.upgrade() else {
                continue;
            };
            let next = state.retainers.borrow();
            if next.is_empty() {
                return true;
            }
            stack.extend(next.iter().cloned());
        }

        false
    }

    fn adopt_subscriptions(&self, subscriptions: Vec<Subscription>) {
        self.state.subscriptions.borrow_mut().extend(subscriptions);
    }

    fn destroy_subscriptions(&self) {
        let subscriptions = core::mem::take(&mut *self.state.subscriptions.borrow_mut());
        for subscription in &subscriptions {
            subscription.destroy();
        }
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("refcount", &self.refcount())
            .field("live", &self.is_live())
            .finish()
    }
}

/// A graph object governed by the retain/release protocol.
///
/// Implementors declare their children, their subscriptions and how they
/// materialize state; the provided `retain`/`release` drive the rest.
pub trait Retainable {
    /// Returns the object's retain bookkeeping.
    fn lifecycle(&self) -> &Lifecycle;

    /// Objects this object retains for as long as it is live.
    fn retained_children(&self) -> Vec<&dyn Retainable> {
        Vec::new()
    }

    /// Computes live state once children are retained.
    fn materialize(&self) -> Result<()> {
        Ok(())
    }

    /// Drops live state; called after subscriptions are destroyed.
    fn dematerialize(&self) {}

    /// Subscriptions to install on activation and destroy on finalization.
    fn install_subscriptions(&self) -> Result<Vec<Subscription>> {
        Ok(Vec::new())
    }

    /// Returns the object's identity.
    fn object_id(&self) -> ObjectId {
        self.lifecycle().id()
    }

    /// Returns the number of distinct retainers.
    fn refcount(&self) -> usize {
        self.lifecycle().refcount()
    }

    /// Returns true while the object is activated.
    fn is_live(&self) -> bool {
        self.lifecycle().is_live()
    }

    /// Registers a retainer, activating the object if it was not live.
    fn retain(&self, by: &Retainer) -> Result<()> {
        let lifecycle = self.lifecycle();
        lifecycle.register(by)?;
        tracing::trace!(object = lifecycle.id(), kind = lifecycle.kind(), retainer = by.id(), "retain");

        if !lifecycle.is_live() {
            if let Err(err) = self.after_first_retain() {
                self.after_last_release();
                lifecycle.deregister(by)?;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Deregisters a retainer, finalizing the object if it is no longer
    /// reachable from a root.
    fn release(&self, by: &Retainer) -> Result<()> {
        let lifecycle = self.lifecycle();
        lifecycle.deregister(by)?;
        tracing::trace!(object = lifecycle.id(), kind = lifecycle.kind(), retainer = by.id(), "release");

        if !lifecycle.is_live() {
            return Ok(());
        }
        if lifecycle.refcount() == 0 {
            self.after_last_release();
        } else if !lifecycle.reachable_from_root() {
            tracing::debug!(
                object = lifecycle.id(),
                kind = lifecycle.kind(),
                refcount = lifecycle.refcount(),
                "finalizing object retained only by cycles"
            );
            self.after_last_release();
        }
        Ok(())
    }

    /// Activation: retain children, materialize, install subscriptions.
    fn after_first_retain(&self) -> Result<()> {
        let lifecycle = self.lifecycle();
        lifecycle.state.live.set(true);
        let me = lifecycle.as_retainer();
        for child in self.retained_children() {
            if !child.lifecycle().is_retained_by(&me) {
                child.retain(&me)?;
            }
        }
        self.materialize()?;
        let subscriptions = self.install_subscriptions()?;
        lifecycle.adopt_subscriptions(subscriptions);
        tracing::debug!(object = lifecycle.id(), kind = lifecycle.kind(), "activated");
        Ok(())
    }

    /// Finalization: destroy subscriptions, drop state, release children.
    ///
    /// Runs at most once per activation.
    fn after_last_release(&self) {
        let lifecycle = self.lifecycle();
        lifecycle.state.live.set(false);
        lifecycle.destroy_subscriptions();
        self.dematerialize();
        let me = lifecycle.as_retainer();
        for child in self.retained_children() {
            if !child.lifecycle().is_retained_by(&me) {
                continue;
            }
            if let Err(err) = child.release(&me) {
                tracing::warn!(
                    object = lifecycle.id(),
                    child = child.lifecycle().id(),
                    error = %err,
                    "failed to release child"
                );
            }
        }
        tracing::debug!(object = lifecycle.id(), kind = lifecycle.kind(), "finalized");
    }
}
