//! Tail epochs: grace-period generations over retired node ranges.
//!
//! The submission list shrinks at the tail in an RCU-like manner. Moving
//! the tail does not free the bypassed nodes; it retires them into a
//! `TailEpoch`, a [`Version`] installed in the coordinator's [`Gate`].
//! Every drain pins the current epoch, so a retired range can only be
//! freed once all drains that might still traverse it have unpinned.
//!
//! Epochs are additionally chained to each other: a range at the *end* of
//! the list may be freed, a range with a live predecessor may not, because
//! a thread pinned on the older epoch can still walk forward into this
//! one. The released bit on `prev` and the cascade in `reclaim` encode
//! exactly that rule.
//!
//! [`Gate`]: petek::Gate

use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use petek::{Version, VersionHeader};

use crate::node::Node;

/// High bit of `prev`: this epoch's grace period has ended.
const RELEASED: usize = 1usize << (usize::BITS - 1);

/// One reclamation generation: the contiguous node range
/// `[tail_node, head_node]`.
pub(crate) struct TailEpoch {
    header: VersionHeader,
    /// Oldest node covered; the coordinator's logical tail while this
    /// epoch is current.
    pub(crate) tail_node: *mut Node,
    /// Youngest node covered. Null while current: the range then extends
    /// to the end of the list. Set by the superseding drain before it
    /// unpins.
    pub(crate) head_node: AtomicPtr<Node>,
    /// Previous epoch, tagged with [`RELEASED`] in the high bit. Becomes
    /// null (pointer bits only) once the predecessor is fully reclaimed.
    pub(crate) prev: AtomicUsize,
    /// Next epoch; set by the superseding drain before it unpins.
    pub(crate) next: AtomicPtr<TailEpoch>,
}

// SAFETY: the raw node pointers are only dereferenced under the pin and
// cascade disciplines; all mutable state is atomic.
unsafe impl Send for TailEpoch {}
// SAFETY: as above.
unsafe impl Sync for TailEpoch {}

impl TailEpoch {
    /// Allocate an epoch starting at `tail_node`, chained after `prev`
    /// (null for the very first epoch).
    pub(crate) fn boxed(tail_node: *mut Node, prev: *const TailEpoch) -> *mut TailEpoch {
        Box::into_raw(Box::new(Self {
            header: VersionHeader::new(),
            tail_node,
            head_node: AtomicPtr::new(ptr::null_mut()),
            prev: AtomicUsize::new(prev as usize),
            next: AtomicPtr::new(ptr::null_mut()),
        }))
    }
}

// SAFETY: the header is embedded in the epoch and reclaim is driven only
// by the gate, once per displaced epoch.
unsafe impl Version for TailEpoch {
    fn header(&self) -> &VersionHeader {
        &self.header
    }

    /// Grace-period-end hook: free whatever contiguous released suffix of
    /// the epoch chain ends here.
    ///
    /// Marking `prev` released and *then* looking at its pointer bits is
    /// what serializes neighbours: if an older epoch is still live, we
    /// stop, and that epoch's own reclaim will carry the cascade forward
    /// into us. Otherwise we are the oldest live epoch and free ranges
    /// forward until we reach an epoch that has not been released yet,
    /// sealing its `prev` to null so it knows it has no live predecessor.
    unsafe fn reclaim(this: *mut Self) {
        // SAFETY: the gate guarantees `this` is displaced, unpinned, and
        // handed to reclaim exactly once.
        let first = unsafe { &*this };
        let prev = first.prev.fetch_or(RELEASED, Ordering::AcqRel);
        if prev != 0 {
            // An older epoch is still live; it cannot be overtaken.
            return;
        }

        let mut epoch = this;
        loop {
            // SAFETY: `epoch` is released and has no live predecessor; this
            // thread is the unique owner of its range from here on.
            let e = unsafe { &*epoch };
            unsafe { free_covered_range(e) };

            let next = e.next.load(Ordering::Acquire);
            // SAFETY: ownership as above; nothing reads the epoch again.
            unsafe { drop(Box::from_raw(epoch)) };

            if next.is_null() {
                // Never superseded: end of the chain (gate teardown).
                return;
            }

            // SAFETY: a superseded epoch's successor outlives it: the
            // successor is freed only through this cascade or after its
            // own release, both of which are still ahead.
            let n = unsafe { &*next };
            let nprev = n.prev.load(Ordering::Acquire);
            if nprev & RELEASED == 0 {
                // Not yet released: seal its prev so that when it does
                // release, it knows the whole prefix is gone. A lost race
                // here means it released concurrently.
                if n
                    .prev
                    .compare_exchange(nprev, 0, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return;
                }
            }

            epoch = next;
        }
    }
}

/// Free the node range covered by `epoch`.
///
/// A null `head_node` means the epoch was never superseded and reaches to
/// the end of the list; in that case the newest node — the coordinator's
/// live head — is left in place for the coordinator itself to free.
///
/// # Safety
///
/// The caller must be the cascade owner of `epoch`: released, with no live
/// predecessor, so no other thread can traverse the range.
unsafe fn free_covered_range(epoch: &TailEpoch) {
    let head = epoch.head_node.load(Ordering::Acquire);
    let mut node = epoch.tail_node;

    if head.is_null() {
        loop {
            // SAFETY: every node up to the list head is covered by this
            // epoch and unreachable to any other thread.
            let next = unsafe { (*node).next.load(Ordering::Acquire) };
            if next.is_null() {
                return;
            }
            unsafe { drop(Box::from_raw(node)) };
            node = next;
        }
    }

    loop {
        // SAFETY: `node` lies in `[tail_node, head_node]`, owned by this
        // cascade; `next` is read before the node is freed.
        let next = unsafe { (*node).next.load(Ordering::Acquire) };
        let last = node == head;
        unsafe { drop(Box::from_raw(node)) };
        if last {
            return;
        }
        node = next;
    }
}
