//! Single-shot execution arbitration.

use core::sync::atomic::{AtomicBool, Ordering};

/// A fire-once flag deciding which of several helping threads runs a node's
/// callback.
///
/// This is the degenerate form of a test-and-set lock: there is no unlock,
/// because a won shot is never contended for again. A miss means some other
/// thread is (or was) running the callback.
pub(crate) struct FireOnce {
    fired: AtomicBool,
}

impl FireOnce {
    pub(crate) const fn new() -> Self {
        Self {
            fired: AtomicBool::new(false),
        }
    }

    /// Returns `true` for exactly one caller over the flag's lifetime.
    #[inline]
    pub(crate) fn fire(&self) -> bool {
        // Test phase: a relaxed load keeps lost races out of the coherence
        // traffic entirely.
        !self.fired.load(Ordering::Relaxed)
            && self
                .fired
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
    }
}
