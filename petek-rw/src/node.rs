//! Submission nodes and the per-node execution protocol.

use core::cell::UnsafeCell;
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicU32, Ordering};
use std::sync::Arc;

use crate::shot::FireOnce;
use crate::ticket::Ticket;

/// Boxed user callback; the closure carries its own arguments.
pub(crate) type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Operation class: updates serialize against everything, reads only
/// against updates.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpKind {
    Update,
    Read,
}

/// Outcome of one execution attempt during a drain.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// The node is done or taken; move on to its successor.
    TryNext,
    /// A dependency is still pending; stop this drain pass.
    Stall,
}

/// One submitted operation, linked into the coordinator's list.
///
/// Nodes are inserted at the head of the list and never unlinked; they are
/// reclaimed in whole ranges when a retired tail epoch's grace period ends.
/// `prev` is written by the inserting thread before it publishes the
/// forward link, so any node reached through `next` has a visible `prev`.
pub(crate) struct Node {
    callback: UnsafeCell<Option<Callback>>,
    kind: OpKind,
    tag: AtomicU32,
    status: Option<Arc<Ticket>>,
    shot: FireOnce,
    pub(crate) prev: AtomicPtr<Node>,
    pub(crate) next: AtomicPtr<Node>,
}

// SAFETY: the callback cell is written at construction and consumed by the
// single thread that wins the shot; every other field is atomic.
unsafe impl Send for Node {}
// SAFETY: as above.
unsafe impl Sync for Node {}

impl Node {
    /// Allocate a node for one submission, returning a raw pointer that the
    /// coordinator's reclamation owns from here on.
    pub(crate) fn boxed(
        kind: OpKind,
        status: Option<Arc<Ticket>>,
        callback: Callback,
    ) -> *mut Node {
        Box::into_raw(Box::new(Self {
            callback: UnsafeCell::new(Some(callback)),
            kind,
            tag: AtomicU32::new(Ticket::PENDING),
            status,
            shot: FireOnce::new(),
            prev: AtomicPtr::new(ptr::null_mut()),
            next: AtomicPtr::new(ptr::null_mut()),
        }))
    }

    #[inline]
    pub(crate) fn is_done(&self) -> bool {
        self.tag.load(Ordering::Acquire) == Ticket::DONE
    }

    /// Try to run this node's callback.
    ///
    /// The node is runnable once its dependency set is done: for an update,
    /// every node back through the current tail node; for a read, every
    /// *update* back through the current tail node. If a dependency is
    /// still pending the whole drain pass stalls — executing this node now
    /// would overtake it. If the dependencies hold but another thread has
    /// already won the node, the drain simply moves on.
    pub(crate) fn try_execute(&self, tail_node: *mut Node) -> Step {
        if !self.deps_done(tail_node) {
            return Step::Stall;
        }

        if self.shot.fire() {
            // SAFETY: the shot fires for exactly one thread; the cell is
            // never touched again once the callback has been taken.
            let callback = unsafe { (*self.callback.get()).take() };
            if let Some(callback) = callback {
                callback();
            }
            // Tag after the callback has returned, ticket after the tag:
            // an observer of either also observes the callback's effects.
            self.tag.store(Ticket::DONE, Ordering::Release);
            if let Some(status) = &self.status {
                status.complete();
            }
        }

        Step::TryNext
    }

    /// Walk `prev` links back through the tail node, checking the
    /// dependency set for this node's kind.
    ///
    /// The walk is exclusive of the tail node, which is then checked on its
    /// own: the tail participates in the dependency set like any other
    /// predecessor. Nodes behind the tail belong to retired epochs and are
    /// already done; they must not be touched, since their memory may be
    /// gone.
    fn deps_done(&self, tail_node: *mut Node) -> bool {
        if ptr::eq(self, tail_node) {
            // The tail has no predecessors inside the live window.
            return true;
        }

        let mut prev = self.prev.load(Ordering::Acquire);
        while !prev.is_null() && prev != tail_node {
            // SAFETY: `prev` is inside (tail_node, self): covered by the
            // tail epoch the draining caller has pinned.
            let p = unsafe { &*prev };
            let blocking = match self.kind {
                OpKind::Update => !p.is_done(),
                OpKind::Read => p.kind == OpKind::Update && !p.is_done(),
            };
            if blocking {
                return false;
            }
            prev = p.prev.load(Ordering::Acquire);
        }

        if prev.is_null() {
            // Ran off the front of the list without meeting the tail; every
            // predecessor has been checked.
            return true;
        }

        // SAFETY: the tail node is covered by the pinned tail epoch.
        let tail = unsafe { &*tail_node };
        match self.kind {
            OpKind::Update => tail.is_done(),
            OpKind::Read => tail.kind != OpKind::Update || tail.is_done(),
        }
    }
}
