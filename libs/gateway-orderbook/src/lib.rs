//! Order Book Engine — maintains per-instrument bid/ask ladders from
//! streamed deltas and answers best-bid/best-ask/mid/spread queries.
//!
//! Price levels are keyed by the IEEE-754 bit pattern of the price
//! (`f64::to_bits`) rather than the float itself: for the positive,
//! finite prices a derivatives book deals in, bit-pattern order is
//! numeric order, and `u64` is `Ord` where `f64` is not, so a plain
//! `BTreeMap` can be used without pulling in an ordered-float crate.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

fn key(price: f64) -> u64 {
    debug_assert!(price.is_finite() && price >= 0.0, "price must be finite and non-negative");
    price.to_bits()
}

fn unkey(bits: u64) -> f64 {
    f64::from_bits(bits)
}

/// One level of a book side: price and resting quantity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Level {
    pub price: f64,
    pub quantity: f64,
}

#[derive(Debug, Default)]
struct BookSides {
    bids: BTreeMap<u64, f64>,
    asks: BTreeMap<u64, f64>,
}

/// A single instrument's bid/ask ladders, guarded by one `RwLock`.
#[derive(Debug, Default)]
pub struct OrderBook {
    instrument: String,
    sides: RwLock<BookSides>,
}

impl OrderBook {
    pub fn new(instrument: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            sides: RwLock::new(BookSides::default()),
        }
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    /// Replace (or remove, if `quantity <= 0`) a bid level.
    pub fn update_bid(&self, price: f64, quantity: f64) {
        let mut sides = self.sides.write();
        if quantity <= 0.0 {
            sides.bids.remove(&key(price));
        } else {
            sides.bids.insert(key(price), quantity);
        }
    }

    /// Replace (or remove, if `quantity <= 0`) an ask level.
    pub fn update_ask(&self, price: f64, quantity: f64) {
        let mut sides = self.sides.write();
        if quantity <= 0.0 {
            sides.asks.remove(&key(price));
        } else {
            sides.asks.insert(key(price), quantity);
        }
    }

    pub fn clear(&self) {
        let mut sides = self.sides.write();
        sides.bids.clear();
        sides.asks.clear();
    }

    /// Highest resting bid, or `0.0` if the bid side is empty.
    pub fn best_bid(&self) -> f64 {
        self.sides
            .read()
            .bids
            .keys()
            .next_back()
            .copied()
            .map(unkey)
            .unwrap_or(0.0)
    }

    /// Lowest resting ask, or `0.0` if the ask side is empty.
    pub fn best_ask(&self) -> f64 {
        self.sides
            .read()
            .asks
            .keys()
            .next()
            .copied()
            .map(unkey)
            .unwrap_or(0.0)
    }

    /// Midpoint of best bid and best ask, or `0.0` if either side is
    /// empty.
    pub fn mid(&self) -> f64 {
        let sides = self.sides.read();
        let bid = sides.bids.keys().next_back().copied().map(unkey);
        let ask = sides.asks.keys().next().copied().map(unkey);
        match (bid, ask) {
            (Some(b), Some(a)) => (b + a) / 2.0,
            _ => 0.0,
        }
    }

    /// Ask minus bid, or `0.0` if either side is empty.
    pub fn spread(&self) -> f64 {
        let sides = self.sides.read();
        let bid = sides.bids.keys().next_back().copied().map(unkey);
        let ask = sides.asks.keys().next().copied().map(unkey);
        match (bid, ask) {
            (Some(b), Some(a)) => a - b,
            _ => 0.0,
        }
    }

    /// Top `depth` bid levels, highest price first.
    pub fn bid_depth(&self, depth: usize) -> Vec<Level> {
        self.sides
            .read()
            .bids
            .iter()
            .rev()
            .take(depth)
            .map(|(&bits, &quantity)| Level { price: unkey(bits), quantity })
            .collect()
    }

    /// Top `depth` ask levels, lowest price first.
    pub fn ask_depth(&self, depth: usize) -> Vec<Level> {
        self.sides
            .read()
            .asks
            .iter()
            .take(depth)
            .map(|(&bits, &quantity)| Level { price: unkey(bits), quantity })
            .collect()
    }
}

/// Registry of order books keyed by instrument name, shared across
/// subsystems.
#[derive(Default)]
pub struct OrderBookRegistry {
    books: RwLock<HashMap<String, Arc<OrderBook>>>,
}

impl OrderBookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the book for `instrument`, creating an empty one if this is
    /// the first reference to it.
    pub fn book(&self, instrument: &str) -> Arc<OrderBook> {
        if let Some(book) = self.books.read().get(instrument) {
            return book.clone();
        }
        let mut books = self.books.write();
        books
            .entry(instrument.to_string())
            .or_insert_with(|| Arc::new(OrderBook::new(instrument)))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_book_reports_zero_for_everything() {
        let book = OrderBook::new("BTC-PERPETUAL");
        assert_eq!(book.best_bid(), 0.0);
        assert_eq!(book.best_ask(), 0.0);
        assert_eq!(book.mid(), 0.0);
        assert_eq!(book.spread(), 0.0);
    }

    #[test]
    fn best_levels_track_inserts_and_removals() {
        let book = OrderBook::new("BTC-PERPETUAL");
        book.update_bid(100.0, 1.0);
        book.update_bid(101.0, 2.0);
        book.update_ask(103.0, 1.0);
        book.update_ask(102.0, 1.5);

        assert_eq!(book.best_bid(), 101.0);
        assert_eq!(book.best_ask(), 102.0);
        assert_eq!(book.mid(), 101.5);
        assert_eq!(book.spread(), 1.0);

        book.update_bid(101.0, 0.0);
        assert_eq!(book.best_bid(), 100.0);
    }

    #[test]
    fn depth_snapshots_are_ordered_from_the_touch_outward() {
        let book = OrderBook::new("ETH-PERPETUAL");
        book.update_bid(100.0, 1.0);
        book.update_bid(99.0, 1.0);
        book.update_bid(101.0, 1.0);
        let depth = book.bid_depth(2);
        assert_eq!(depth, vec![
            Level { price: 101.0, quantity: 1.0 },
            Level { price: 100.0, quantity: 1.0 },
        ]);
    }

    #[test]
    fn clear_empties_both_sides() {
        let book = OrderBook::new("BTC-PERPETUAL");
        book.update_bid(100.0, 1.0);
        book.update_ask(101.0, 1.0);
        book.clear();
        assert_eq!(book.best_bid(), 0.0);
        assert_eq!(book.best_ask(), 0.0);
    }

    #[test]
    fn registry_reuses_the_same_book_per_instrument() {
        let registry = OrderBookRegistry::new();
        let a = registry.book("BTC-PERPETUAL");
        a.update_bid(100.0, 1.0);
        let b = registry.book("BTC-PERPETUAL");
        assert_eq!(b.best_bid(), 100.0);
    }
}
