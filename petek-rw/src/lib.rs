//! Petek-rw: reader/writer coordination executed by the callers themselves.
//!
//! An [`RwCoord`] accepts *update* and *read* closures from any number of
//! threads and runs them with the guarantees of a single-writer /
//! multi-reader lock — updates strictly serialized behind everything
//! submitted before them, reads concurrent with other reads — without the
//! callers ever holding a lock. There is no worker pool: whichever threads
//! happen to be submitting also execute the backlog cooperatively.
//!
//! Internally, submissions form a lock-free doubly linked list that grows
//! at the head by a single atomic exchange. Executed ranges are retired
//! from the tail in grace-period epochs behind a [`petek::Gate`], so a
//! node is only freed once no thread can still be traversing it.
//!
//! # Example
//!
//! ```rust
//! use petek_rw::{RwCoord, Ticket};
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU64, Ordering};
//!
//! let total = Arc::new(AtomicU64::new(0));
//! let coord = Arc::new(RwCoord::new());
//!
//! let t = total.clone();
//! coord.update(move || {
//!     t.fetch_add(1, Ordering::Relaxed);
//! });
//!
//! let ticket = Arc::new(Ticket::new());
//! let t = total.clone();
//! coord.read_tracked(&ticket, move || {
//!     assert!(t.load(Ordering::Relaxed) >= 1);
//! });
//!
//! while !ticket.is_done() {
//!     coord.sync();
//! }
//! assert_eq!(total.load(Ordering::Relaxed), 1);
//! ```

#![warn(missing_docs)]

mod coord;
mod node;
mod shot;
mod tail;
mod ticket;
mod utils;

pub use coord::RwCoord;
pub use ticket::Ticket;
