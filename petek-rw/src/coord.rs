//! The coordinator: a lock-free submission list drained by its own callers.

use core::hint::spin_loop;
use core::mem;
use core::ptr;
use core::sync::atomic::{fence, AtomicPtr, AtomicU32, Ordering};
use std::sync::Arc;

use crossbeam_utils::Backoff;
use petek::Gate;

use crate::node::{Callback, Node, OpKind, Step};
use crate::tail::TailEpoch;
use crate::ticket::Ticket;
use crate::utils::CacheAligned;

/// An asynchronous reader/writer coordinator.
///
/// Callers submit update and read closures against some shared structure
/// they own; the coordinator executes them under a reader/writer
/// discipline without the caller taking any lock:
///
/// - an update runs only after every operation submitted before it has
///   finished, and no two updates ever run concurrently;
/// - a read runs only after every *update* submitted before it has
///   finished; reads run concurrently with each other.
///
/// There are no worker threads. Every submitting thread also drains: it
/// walks the pending list from the oldest live node forward and executes
/// whatever has become runnable, its own submission included. A submission
/// may therefore return before its closure has run — track completion with
/// a [`Ticket`], and contribute cycles with [`sync`](RwCoord::sync) while
/// waiting.
///
/// # Callback contract
///
/// Closures must be bounded: they may briefly contend on locks of their
/// own, but must not block indefinitely and must not wait on other
/// operations submitted to the *same* coordinator. They must not call back
/// into this coordinator at all — a closure that submits or syncs on the
/// coordinator that is running it can deadlock the drain. Distinct
/// coordinators are fully independent.
///
/// # Example
///
/// ```rust
/// use petek_rw::RwCoord;
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicU64, Ordering};
///
/// let total = Arc::new(AtomicU64::new(0));
/// let coord = RwCoord::new();
///
/// let t = total.clone();
/// coord.update(move || {
///     t.fetch_add(3, Ordering::Relaxed);
/// });
/// coord.sync();
///
/// assert_eq!(total.load(Ordering::Relaxed), 3);
/// ```
pub struct RwCoord {
    /// Newest node; grows by atomic exchange, null only before the first
    /// submission.
    head: CacheAligned<AtomicPtr<Node>>,
    /// Current tail epoch, behind a grace-period gate.
    tail: CacheAligned<Gate<TailEpoch>>,
    /// Tail-move authority: a drain that flips this 0 -> 1 may advance the
    /// tail; everyone else only executes.
    tail_move_flag: AtomicU32,
    /// Set once the very first submission has installed the initial epoch.
    tail_init_flag: AtomicU32,
}

impl RwCoord {
    /// Create an empty coordinator.
    pub fn new() -> Self {
        Self {
            head: CacheAligned::new(AtomicPtr::new(ptr::null_mut())),
            tail: CacheAligned::new(Gate::new()),
            tail_move_flag: AtomicU32::new(0),
            tail_init_flag: AtomicU32::new(0),
        }
    }

    /// Submit an exclusive operation.
    ///
    /// `f` will run exactly once, on some submitting thread, after every
    /// previously submitted operation has finished and concurrently with
    /// nothing.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(OpKind::Update, None, Box::new(f));
    }

    /// Submit an exclusive operation with a completion ticket.
    ///
    /// The ticket is rearmed to [`Ticket::PENDING`] now and flipped to
    /// [`Ticket::DONE`] once `f` has returned.
    pub fn update_tracked<F>(&self, ticket: &Arc<Ticket>, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        ticket.rearm();
        self.submit(OpKind::Update, Some(ticket.clone()), Box::new(f));
    }

    /// Submit a shared operation.
    ///
    /// `f` will run exactly once, after every previously submitted
    /// *update* has finished. It may run concurrently with other reads.
    pub fn read<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(OpKind::Read, None, Box::new(f));
    }

    /// Submit a shared operation with a completion ticket.
    pub fn read_tracked<F>(&self, ticket: &Arc<Ticket>, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        ticket.rearm();
        self.submit(OpKind::Read, Some(ticket.clone()), Box::new(f));
    }

    /// Drain pending operations on the calling thread without submitting.
    ///
    /// Useful when a tracked operation is observed still pending: the
    /// caller lends its own cycles to the backlog instead of spinning on
    /// the ticket. Returns once the drain stalls or runs out of nodes;
    /// there is no guarantee any particular operation has completed.
    pub fn sync(&self) {
        if self.tail_init_flag.load(Ordering::Acquire) == 0 {
            // Nothing has ever been submitted.
            return;
        }

        let moved = self.try_move_authority();
        fence(Ordering::SeqCst);
        self.drain_pinned(None, moved);
    }

    fn submit(&self, kind: OpKind, status: Option<Arc<Ticket>>, callback: Callback) {
        let node = Node::boxed(kind, status, callback);
        self.insert_and_drain(node);
    }

    /// Claim tail-move authority if it is free. The flag is settled before
    /// the tail epoch is read: a drain that held an epoch from before
    /// another thread's tail move must not also believe it may move the
    /// tail.
    fn try_move_authority(&self) -> bool {
        self.tail_move_flag.load(Ordering::Relaxed) == 0
            && self.tail_move_flag.fetch_or(1, Ordering::AcqRel) == 0
    }

    /// Link one node at the head, then drain from the tail.
    fn insert_and_drain(&self, node: *mut Node) {
        let moved = self.try_move_authority();
        fence(Ordering::SeqCst);

        let prev_head = self.head.swap(node, Ordering::AcqRel);
        if prev_head.is_null() {
            // Very first submission: this node is the whole list. Install
            // the initial epoch before publishing the init flag.
            let epoch = TailEpoch::boxed(node, ptr::null());
            // SAFETY: fresh allocation, owned by the gate from here on.
            unsafe { self.tail.exchange(epoch) };
            self.tail_init_flag.store(1, Ordering::Release);
        } else {
            // Backward link first, so anyone who reaches this node through
            // the forward link can walk its dependency chain.
            // SAFETY: `node` is ours until published; `prev_head` stays
            // alive at least until our pinned drain below ends.
            unsafe {
                (*node).prev.store(prev_head, Ordering::Release);
                (*prev_head).next.store(node, Ordering::Release);
            }

            // A concurrent first inserter has exchanged the head but may
            // not have installed the initial epoch yet.
            let backoff = Backoff::new();
            while self.tail_init_flag.load(Ordering::Acquire) == 0 {
                backoff.spin();
            }
        }

        self.drain_pinned(Some(node), moved);
    }

    /// Pin the current epoch, drain, unpin, and return the authority.
    fn drain_pinned(&self, inserted: Option<*mut Node>, moved: bool) {
        if let Some(pin) = self.tail.acquire() {
            self.drain(&pin, inserted, moved);
        }
        if moved {
            self.tail_move_flag.store(0, Ordering::Release);
        }
    }

    /// Walk from the epoch's tail node towards the head, executing every
    /// node that has become runnable, and advance the tail past the nodes
    /// that are finished for good.
    ///
    /// Two traversal regimes, split by the caller's own freshly inserted
    /// node. Behind it, a null `next` is transient — the producer that
    /// exchanged the head is about to write the link, our own insertion
    /// among them — so we spin for it. From the inserted node on, a null
    /// `next` simply means we have reached the current head. A pure
    /// [`sync`](RwCoord::sync) drain has no inserted node and starts in
    /// the latter regime.
    ///
    /// The tail may only advance over the contiguous prefix of *finished*
    /// nodes: a node that was skipped because another thread is still
    /// running it must stay reachable, or a later dependency walk would
    /// overlook it mid-flight.
    fn drain(&self, epoch: &TailEpoch, inserted: Option<*mut Node>, moved: bool) {
        let tail_node = epoch.tail_node;
        let mut node = tail_node;
        let mut frontier = tail_node;
        let mut contiguous = true;
        let mut after_inserted = false;

        while !node.is_null() {
            // SAFETY: nodes from the pinned epoch's tail onward stay alive
            // while the pin is held.
            let n = unsafe { &*node };

            if !n.is_done() && n.try_execute(tail_node) == Step::Stall {
                break;
            }

            if contiguous && n.is_done() {
                frontier = node;
            } else {
                contiguous = false;
            }

            if inserted == Some(node) {
                after_inserted = true;
            }

            if after_inserted || inserted.is_none() {
                node = n.next.load(Ordering::Acquire);
            } else {
                // The producer of the successor inserted before we did; it
                // is obligated to write this link as part of its own
                // submission, so the wait is bounded. The one exception: if
                // the list truly ends here, our own node was executed by
                // someone else and already retired behind the tail, and no
                // successor is coming.
                loop {
                    let next = n.next.load(Ordering::Acquire);
                    if !next.is_null() {
                        node = next;
                        break;
                    }
                    if self.head.load(Ordering::Acquire) == node {
                        node = ptr::null_mut();
                        break;
                    }
                    spin_loop();
                }
            }
        }

        if moved && frontier != tail_node {
            self.adjust_tail(epoch, frontier);
        }
    }

    /// Retire `[old tail, new_tail)` by installing a fresh epoch starting
    /// at `new_tail`.
    ///
    /// The exchange starts the displaced epoch's grace period. Its forward
    /// links are written afterwards; that is safe because the caller still
    /// holds a pin on it, so its reclaim cannot start before
    /// [`drain_pinned`](RwCoord::drain_pinned) drops the pin.
    fn adjust_tail(&self, old: &TailEpoch, new_tail: *mut Node) {
        let new = TailEpoch::boxed(new_tail, old as *const TailEpoch);
        // SAFETY: fresh allocation, owned by the gate from here on.
        unsafe { self.tail.exchange(new) };

        old.next.store(new, Ordering::Release);
        // SAFETY: `new_tail` was reached through the pinned epoch and its
        // prev link was published before the node itself.
        let covered_head = unsafe { (*new_tail).prev.load(Ordering::Acquire) };
        old.head_node.store(covered_head, Ordering::Release);
    }
}

impl Default for RwCoord {
    fn default() -> Self {
        Self::new()
    }
}

// Quiesce before dropping: destruction while submissions are in flight on
// other threads is a contract violation (normally prevented by Arc).
impl Drop for RwCoord {
    fn drop(&mut self) {
        // Tearing down the gate reclaims every epoch, and with them every
        // node except the live head.
        let gate = mem::replace(&mut self.tail, CacheAligned::new(Gate::new()));
        drop(gate);

        let head = *self.head.get_mut();
        if !head.is_null() {
            // SAFETY: the teardown cascade leaves exactly this node behind.
            unsafe { drop(Box::from_raw(head)) };
        }
    }
}
