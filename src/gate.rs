//! The gate: one packed word carrying the current version and its pin count.

use core::marker::PhantomData;
use core::ops::Deref;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::version::Version;

/// Low 48 bits of the gate word hold the current version pointer.
const PTR_MASK: u64 = (1 << 48) - 1;

/// One pin, counted in the high 16 bits of the gate word.
const PIN_ONE: u64 = 1 << 48;

/// A single-slot holder for the current [`Version`] of an object.
///
/// The whole gate is one atomic word: the low 48 bits are the current
/// version pointer, the high 16 bits count the pins taken on it. Packing
/// both into the same word is what makes the count exact — a pin that
/// lands before an exchange is harvested by it, a pin that lands after it
/// sticks to the new version. There is no window in which a pin can be
/// taken on a version the gate no longer tracks.
///
/// User-space pointers fit in 48 bits on the supported 64-bit targets; the
/// remaining 16 bits bound simultaneous pins per gate at 65535.
pub struct Gate<T: Version> {
    word: AtomicU64,
    _marker: PhantomData<*mut T>,
}

// SAFETY: the gate only hands out pointers to T across threads; all of its
// own state is the atomic word.
unsafe impl<T: Version + Send + Sync> Send for Gate<T> {}
// SAFETY: as above; concurrent acquire/exchange race on a single atomic.
unsafe impl<T: Version + Send + Sync> Sync for Gate<T> {}

impl<T: Version> Gate<T> {
    /// Create an empty gate. [`acquire`](Gate::acquire) returns `None`
    /// until the first [`exchange`](Gate::exchange).
    pub const fn new() -> Self {
        Self {
            word: AtomicU64::new(0),
            _marker: PhantomData,
        }
    }

    /// Pin the current version.
    ///
    /// Returns a guard that dereferences to the version and keeps it alive:
    /// the version's grace period cannot end while the guard exists.
    /// Returns `None` if no version has been installed yet.
    #[inline]
    pub fn acquire(&self) -> Option<Pinned<'_, T>> {
        let word = self.word.fetch_add(PIN_ONE, Ordering::Acquire);
        let ptr = (word & PTR_MASK) as *mut T;
        if ptr.is_null() {
            // Empty gate. The count we just added is discarded by the next
            // exchange along with the null pointer it is attached to.
            return None;
        }
        Some(Pinned { gate: self, ptr })
    }

    /// Drop one pin on `ptr`.
    ///
    /// While the version is still current the pin is returned straight to
    /// the gate word, so the word's count tracks *live* pins only. Once the
    /// version has been displaced the release settles against the
    /// version's own balance instead, and the last one in reclaims it.
    fn release(&self, ptr: *mut T) {
        let mut word = self.word.load(Ordering::Relaxed);
        while word & PTR_MASK == ptr as u64 {
            debug_assert!(word >> 48 > 0);
            match self.word.compare_exchange_weak(
                word,
                word - PIN_ONE,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(current) => word = current,
            }
        }

        // Displaced while we were pinned; our count was migrated onto the
        // version by the exchange.
        // SAFETY: the version cannot be reclaimed before its balance hits
        // zero, and our pin is still part of that balance.
        let header = unsafe { (*ptr).header() };
        let prev = header.refs.fetch_sub(1, Ordering::AcqRel);
        if prev == 1 {
            // SAFETY: the balance reached zero; reclaim runs once.
            unsafe { T::reclaim(ptr) };
        }
    }

    /// Install `new` as the current version.
    ///
    /// The displaced version enters its grace period: the pin count
    /// harvested from the gate word is migrated onto the version itself,
    /// and once every one of those pins has been released,
    /// [`Version::reclaim`] runs. If the displaced version was never
    /// pinned, or every pin was already released, it is reclaimed here.
    ///
    /// # Safety
    ///
    /// `new` must point to a valid, heap-allocated `T` (e.g. from
    /// `Box::into_raw`) with a zero-balance header. Ownership passes to the
    /// gate; the caller must not free it. `new` must not be installed more
    /// than once.
    pub unsafe fn exchange(&self, new: *mut T) {
        debug_assert!(!new.is_null());
        debug_assert_eq!(new as u64 & !PTR_MASK, 0);

        let word = self.word.swap(new as u64, Ordering::AcqRel);
        let old = (word & PTR_MASK) as *mut T;
        if old.is_null() {
            // First install: any counts on the empty slot belong to
            // acquires that came back empty-handed.
            return;
        }

        let pins = (word >> 48) as i64;
        // SAFETY: `old` was installed by a previous exchange and cannot
        // have been reclaimed: its pins were not yet migrated.
        let header = unsafe { (*old).header() };
        let prev = header.refs.fetch_add(pins, Ordering::AcqRel);
        if prev + pins == 0 {
            // SAFETY: every pin on `old` is already released and no new
            // pin can be taken; the balance reaches zero exactly once.
            unsafe { T::reclaim(old) };
        }
    }
}

impl<T: Version> Default for Gate<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Version> Drop for Gate<T> {
    fn drop(&mut self) {
        let word = *self.word.get_mut();
        let ptr = (word & PTR_MASK) as *mut T;
        if ptr.is_null() {
            return;
        }
        let pins = (word >> 48) as i64;
        // SAFETY: same migration as a displacing exchange; `&mut self`
        // means no new pin can race with it.
        let header = unsafe { (*ptr).header() };
        let prev = header.refs.fetch_add(pins, Ordering::AcqRel);
        if prev + pins == 0 {
            // SAFETY: the balance reached zero; reclaim runs once.
            unsafe { T::reclaim(ptr) };
        }
        // A non-zero balance means pins outlive the gate. That is a caller
        // bug; the version is leaked rather than freed out from under them.
    }
}

/// RAII pin on a gate version, returned by [`Gate::acquire`].
///
/// Dereferences to the version. Dropping the guard releases the pin; the
/// release that brings a displaced version's balance to zero runs
/// [`Version::reclaim`] on the spot.
pub struct Pinned<'g, T: Version> {
    gate: &'g Gate<T>,
    ptr: *mut T,
}

impl<T: Version> Pinned<'_, T> {
    /// The pinned version as a raw pointer.
    #[inline]
    pub fn as_ptr(&self) -> *mut T {
        self.ptr
    }
}

impl<T: Version> Deref for Pinned<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: the pin keeps the version's grace period open.
        unsafe { &*self.ptr }
    }
}

impl<T: Version> Drop for Pinned<'_, T> {
    fn drop(&mut self) {
        self.gate.release(self.ptr);
    }
}
