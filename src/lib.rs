//! Petek: a versioned-snapshot gate with grace-period reclamation.
//!
//! A [`Gate`] holds one "current" version of a heap-allocated object.
//! Readers *pin* the current version with a single atomic instruction and
//! hold it for as long as they like; a writer *exchanges* a new version in
//! with another single atomic instruction. The displaced version is not
//! freed immediately: it enters a grace period that ends when the last
//! pinned reference to it is dropped, at which point its reclaim hook runs
//! exactly once.
//!
//! # Key Properties
//!
//! - **One-instruction pin**: acquiring the current version is a single
//!   `fetch_add` on one word
//! - **One-instruction publish**: installing a new version is a single
//!   `swap` on the same word
//! - **Exact grace periods**: the reclaim hook runs exactly once, only
//!   after every pin taken on that version has been released
//! - **No background machinery**: reclamation is driven entirely by the
//!   releasing threads themselves
//!
//! # Example
//!
//! ```rust
//! use petek::{Gate, Version, VersionHeader};
//!
//! struct Config {
//!     header: VersionHeader,
//!     threshold: u32,
//! }
//!
//! unsafe impl Version for Config {
//!     fn header(&self) -> &VersionHeader {
//!         &self.header
//!     }
//!
//!     unsafe fn reclaim(this: *mut Self) {
//!         // SAFETY: the gate hands each displaced version to reclaim
//!         // exactly once, after its last pin is released.
//!         unsafe { drop(Box::from_raw(this)) };
//!     }
//! }
//!
//! let gate: Gate<Config> = Gate::new();
//! assert!(gate.acquire().is_none());
//!
//! let first = Box::into_raw(Box::new(Config {
//!     header: VersionHeader::new(),
//!     threshold: 4,
//! }));
//! // SAFETY: `first` is a fresh heap allocation owned by the gate from here on.
//! unsafe { gate.exchange(first) };
//!
//! let pinned = gate.acquire().unwrap();
//! assert_eq!(pinned.threshold, 4);
//! drop(pinned);
//! ```

#![warn(missing_docs)]

mod gate;
mod version;

pub use gate::{Gate, Pinned};
pub use version::{Version, VersionHeader};

// Re-export for convenience
pub use core::sync::atomic::Ordering;
