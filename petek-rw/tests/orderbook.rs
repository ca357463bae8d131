//! Order-book consistency workload.
//!
//! Each book holds 20 fixed price levels on both sides. An update writes
//! one freshly drawn quantity across all 40 entries of a book; a read
//! scans the book and demands that every entry still carries the same
//! quantity. Any reader/writer overlap shows up as a mismatch.

use petek_rw::{RwCoord, Ticket};
use rand::Rng;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const PRICE_LEVELS: [u32; 20] = [
    19000, 19050, 19100, 19150, 19200, 19250, 19300, 19350, 19400, 19450, 19500, 19550, 19600,
    19650, 19700, 19750, 19800, 19850, 19900, 19950,
];

const BOOKS: usize = 8;
const UPDATERS: usize = 2;
const READERS: usize = 4;
const RUN: Duration = Duration::from_millis(800);

struct Side {
    levels: [u32; 20],
    qty: [f64; 20],
}

impl Side {
    fn new() -> Self {
        Self {
            levels: PRICE_LEVELS,
            qty: [0.0; 20],
        }
    }
}

struct Book {
    bids: Side,
    asks: Side,
}

struct BookSlot {
    book: UnsafeCell<Book>,
    coord: RwCoord,
}

// SAFETY: the book is only written from update callbacks and only read
// from read callbacks of its own coordinator.
unsafe impl Sync for BookSlot {}

struct Market {
    books: Vec<BookSlot>,
}

impl Market {
    fn new(books: usize) -> Self {
        Self {
            books: (0..books)
                .map(|_| BookSlot {
                    book: UnsafeCell::new(Book {
                        bids: Side::new(),
                        asks: Side::new(),
                    }),
                    coord: RwCoord::new(),
                })
                .collect(),
        }
    }
}

/// Scan one book; every bid and ask entry must carry the same quantity.
fn check_book(book: &Book) -> bool {
    let reference = book.bids.qty[0];
    debug_assert_eq!(book.bids.levels, PRICE_LEVELS);
    book.bids.qty.iter().chain(book.asks.qty.iter()).all(|q| *q == reference)
}

#[test]
fn test_orderbook_consistency() {
    let market = Arc::new(Market::new(BOOKS));
    let running = Arc::new(AtomicBool::new(true));
    let mismatches = Arc::new(AtomicUsize::new(0));
    let update_count = Arc::new(AtomicUsize::new(0));
    let read_count = Arc::new(AtomicUsize::new(0));

    let mut handles = vec![];

    for _ in 0..UPDATERS {
        let market = market.clone();
        let running = running.clone();
        let update_count = update_count.clone();
        handles.push(thread::spawn(move || {
            let mut rng = rand::rng();
            while running.load(Ordering::Relaxed) {
                let book_id = rng.random_range(0..BOOKS);
                let qty: f64 = rng.random_range(0.0..=5.0);

                let slot = &market.books[book_id];
                let m = market.clone();
                let update_count = update_count.clone();
                slot.coord.update(move || {
                    // SAFETY: exclusive by the update discipline of this
                    // book's coordinator.
                    let book = unsafe { &mut *m.books[book_id].book.get() };
                    for i in 0..PRICE_LEVELS.len() {
                        book.bids.qty[i] = qty;
                        book.asks.qty[i] = qty;
                    }
                    update_count.fetch_add(1, Ordering::Relaxed);
                });
            }
        }));
    }

    for _ in 0..READERS {
        let market = market.clone();
        let running = running.clone();
        let mismatches = mismatches.clone();
        let read_count = read_count.clone();
        handles.push(thread::spawn(move || {
            while running.load(Ordering::Relaxed) {
                for book_id in 0..BOOKS {
                    let slot = &market.books[book_id];
                    let m = market.clone();
                    let mismatches = mismatches.clone();
                    let read_count = read_count.clone();
                    slot.coord.read(move || {
                        // SAFETY: reads never overlap an update on this
                        // book's coordinator.
                        let book = unsafe { &*m.books[book_id].book.get() };
                        if !check_book(book) {
                            mismatches.fetch_add(1, Ordering::Relaxed);
                        }
                        read_count.fetch_add(1, Ordering::Relaxed);
                    });
                }
            }
        }));
    }

    thread::sleep(RUN);
    running.store(false, Ordering::Relaxed);
    for handle in handles {
        handle.join().unwrap();
    }

    // Quiesce every book, then check the final state once more.
    for slot in &market.books {
        let ticket = Arc::new(Ticket::new());
        slot.coord.update_tracked(&ticket, || {});
        while !ticket.is_done() {
            slot.coord.sync();
        }
    }
    for slot in &market.books {
        let book = unsafe { &*slot.book.get() };
        assert!(check_book(book));
    }

    println!("Order-book workload:");
    println!(
        "  {} updates, {} reads across {} books",
        update_count.load(Ordering::Relaxed),
        read_count.load(Ordering::Relaxed),
        BOOKS
    );
    assert_eq!(
        mismatches.load(Ordering::Relaxed),
        0,
        "a reader observed a half-applied update"
    );
}

#[test]
fn test_orderbook_tracked_read_sweep() {
    let market = Arc::new(Market::new(BOOKS));

    // Seed every book with a distinct quantity.
    for (book_id, slot) in market.books.iter().enumerate() {
        let m = market.clone();
        slot.coord.update(move || {
            // SAFETY: exclusive update on this book.
            let book = unsafe { &mut *m.books[book_id].book.get() };
            for i in 0..PRICE_LEVELS.len() {
                book.bids.qty[i] = book_id as f64;
                book.asks.qty[i] = book_id as f64;
            }
        });
    }

    // Sweep all books with tracked reads, lending cycles until each book's
    // read has finished.
    let tickets: Vec<Arc<Ticket>> = (0..BOOKS).map(|_| Arc::new(Ticket::new())).collect();
    let clean = Arc::new(AtomicUsize::new(0));
    for (book_id, slot) in market.books.iter().enumerate() {
        let m = market.clone();
        let clean = clean.clone();
        slot.coord.read_tracked(&tickets[book_id], move || {
            // SAFETY: reads never overlap an update on this book.
            let book = unsafe { &*m.books[book_id].book.get() };
            if check_book(book) && book.bids.qty[0] == book_id as f64 {
                clean.fetch_add(1, Ordering::Relaxed);
            }
        });
    }
    loop {
        let pending: Vec<usize> = (0..BOOKS).filter(|&i| !tickets[i].is_done()).collect();
        if pending.is_empty() {
            break;
        }
        for i in pending {
            market.books[i].coord.sync();
        }
    }

    assert_eq!(clean.load(Ordering::Relaxed), BOOKS);
}
