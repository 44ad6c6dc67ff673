//! Book Store (C1): in-memory, per-(venue, raw symbol) order book with
//! price -> size maps, pruning, and top-N access. Spec.md §4.1.

use std::{
    collections::HashMap,
    sync::Arc,
};

use parking_lot::RwLock;
use serde::Serialize;

/// Levels kept per side after any mutation (spec.md §3).
pub const MAX_LEVELS: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Venue {
    A,
    B,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BookKey {
    pub venue: Venue,
    pub raw: String,
}

impl BookKey {
    pub fn new(venue: Venue, raw: impl Into<String>) -> Self {
        Self {
            venue,
            raw: raw.into(),
        }
    }
}

/// A single book level with its price parsed back to a float for sorting.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PriceLevel {
    pub price: f64,
    pub size: f64,
}

/// Canonical fixed-precision price string, matching venue transport.
pub fn format_price(price: f64) -> String {
    format!("{price:.8}")
}

#[derive(Debug, Default)]
pub struct OrderBookData {
    bids: HashMap<String, f64>,
    asks: HashMap<String, f64>,
    pub last_update_id: Option<u64>,
}

impl OrderBookData {
    fn apply_side(side: &mut HashMap<String, f64>, price: &str, size: f64) {
        if size <= 0.0 {
            side.remove(price);
        } else {
            side.insert(price.to_string(), size);
        }
    }

    fn prune_side(side: &mut HashMap<String, f64>, ascending: bool) {
        side.retain(|_, size| *size > 0.0);
        if side.len() <= MAX_LEVELS {
            return;
        }
        let mut parsed: Vec<(String, f64)> = side
            .iter()
            .map(|(p, s)| (p.clone(), p.parse::<f64>().unwrap_or(0.0)))
            .map(|(p, price)| (p, price))
            .collect();
        // sort so the levels we KEEP are the best MAX_LEVELS.
        if ascending {
            parsed.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        } else {
            parsed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        }
        let keep: std::collections::HashSet<String> =
            parsed.into_iter().take(MAX_LEVELS).map(|(p, _)| p).collect();
        side.retain(|p, _| keep.contains(p));
    }

    pub fn apply_snapshot(&mut self, bids: &[(String, f64)], asks: &[(String, f64)], update_id: Option<u64>) {
        self.bids.clear();
        self.asks.clear();
        for (p, s) in bids {
            Self::apply_side(&mut self.bids, p, *s);
        }
        for (p, s) in asks {
            Self::apply_side(&mut self.asks, p, *s);
        }
        self.last_update_id = update_id;
        self.prune();
    }

    pub fn apply_delta(&mut self, bid_updates: &[(String, f64)], ask_updates: &[(String, f64)], new_last_id: Option<u64>) {
        for (p, s) in bid_updates {
            Self::apply_side(&mut self.bids, p, *s);
        }
        for (p, s) in ask_updates {
            Self::apply_side(&mut self.asks, p, *s);
        }
        if new_last_id.is_some() {
            self.last_update_id = new_last_id;
        }
        self.prune();
    }

    fn prune(&mut self) {
        Self::prune_side(&mut self.bids, false);
        Self::prune_side(&mut self.asks, true);
    }

    pub fn best_bid(&self) -> Option<f64> {
        self.bids.keys().filter_map(|p| p.parse::<f64>().ok()).fold(None, |acc, v| {
            Some(acc.map_or(v, |a: f64| a.max(v)))
        })
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.keys().filter_map(|p| p.parse::<f64>().ok()).fold(None, |acc, v| {
            Some(acc.map_or(v, |a: f64| a.min(v)))
        })
    }

    pub fn top(&self, side: Side, n: usize) -> Vec<PriceLevel> {
        let map = match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        };
        let mut levels: Vec<PriceLevel> = map
            .iter()
            .filter_map(|(p, s)| p.parse::<f64>().ok().map(|price| PriceLevel { price, size: *s }))
            .collect();
        match side {
            Side::Bid => levels.sort_by(|a, b| b.price.partial_cmp(&a.price).unwrap_or(std::cmp::Ordering::Equal)),
            Side::Ask => levels.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(std::cmp::Ordering::Equal)),
        }
        levels.truncate(n);
        levels
    }

    pub fn all_levels(&self, side: Side) -> Vec<PriceLevel> {
        self.top(side, usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Bid,
    Ask,
}

/// Registry of all owned books, keyed by (venue, raw symbol).
#[derive(Debug, Default)]
pub struct BookStore {
    books: RwLock<HashMap<BookKey, Arc<RwLock<OrderBookData>>>>,
}

impl BookStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn entry(&self, key: &BookKey) -> Arc<RwLock<OrderBookData>> {
        if let Some(existing) = self.books.read().get(key) {
            return existing.clone();
        }
        let mut guard = self.books.write();
        guard
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RwLock::new(OrderBookData::default())))
            .clone()
    }

    pub fn apply_snapshot(
        &self,
        venue: Venue,
        raw: &str,
        bids: &[(String, f64)],
        asks: &[(String, f64)],
        update_id: Option<u64>,
    ) {
        let book = self.entry(&BookKey::new(venue, raw));
        book.write().apply_snapshot(bids, asks, update_id);
    }

    pub fn apply_delta(
        &self,
        venue: Venue,
        raw: &str,
        bid_updates: &[(String, f64)],
        ask_updates: &[(String, f64)],
        new_last_id: Option<u64>,
    ) {
        let book = self.entry(&BookKey::new(venue, raw));
        book.write().apply_delta(bid_updates, ask_updates, new_last_id);
    }

    pub fn best_bid_ask(&self, venue: Venue, raw: &str) -> (Option<f64>, Option<f64>) {
        let key = BookKey::new(venue, raw);
        match self.books.read().get(&key) {
            Some(book) => {
                let g = book.read();
                (g.best_bid(), g.best_ask())
            }
            None => (None, None),
        }
    }

    pub fn top(&self, venue: Venue, raw: &str, side: Side, n: usize) -> Vec<PriceLevel> {
        let key = BookKey::new(venue, raw);
        match self.books.read().get(&key) {
            Some(book) => book.read().top(side, n),
            None => Vec::new(),
        }
    }

    pub fn last_update_id(&self, venue: Venue, raw: &str) -> Option<u64> {
        let key = BookKey::new(venue, raw);
        self.books.read().get(&key)?.read().last_update_id
    }

    /// Remove a book entirely (symbol stop discards state, spec.md §4.5).
    pub fn remove(&self, venue: Venue, raw: &str) {
        self.books.write().remove(&BookKey::new(venue, raw));
    }

    /// All (venue, raw) keys currently tracked, across both venues.
    pub fn all_keys(&self) -> Vec<BookKey> {
        self.books.read().keys().cloned().collect()
    }

    /// All raw symbols currently tracked for a venue (used by C9 `/universe`).
    pub fn raw_symbols(&self, venue: Venue) -> Vec<String> {
        self.books
            .read()
            .keys()
            .filter(|k| k.venue == venue)
            .map(|k| k.raw.clone())
            .collect()
    }

    /// All (venue, raw) keys whose normalized key matches `normalized`.
    pub fn sources_for(&self, normalized_of: impl Fn(Venue, &str) -> String, normalized: &str) -> Vec<BookKey> {
        self.books
            .read()
            .keys()
            .filter(|k| normalized_of(k.venue, &k.raw) == normalized)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(price: &str, size: f64) -> (String, f64) {
        (price.to_string(), size)
    }

    #[test]
    fn apply_delete_round_trip_empties_book() {
        let store = BookStore::new();
        store.apply_snapshot(Venue::A, "XRPUSDT", &[b("1.0", 10.0)], &[b("1.1", 5.0)], Some(1));
        store.apply_delta(Venue::A, "XRPUSDT", &[b("1.0", 0.0)], &[b("1.1", 0.0)], Some(2));
        let (bid, ask) = store.best_bid_ask(Venue::A, "XRPUSDT");
        assert_eq!(bid, None);
        assert_eq!(ask, None);
    }

    #[test]
    fn top_n_is_monotonic_and_deduped() {
        let store = BookStore::new();
        store.apply_snapshot(
            Venue::A,
            "XRPUSDT",
            &[b("1.0", 1.0), b("1.2", 1.0), b("0.9", 1.0)],
            &[b("1.3", 1.0), b("1.5", 1.0), b("1.4", 1.0)],
            Some(1),
        );
        let bids = store.top(Venue::A, "XRPUSDT", Side::Bid, 10);
        let prices: Vec<f64> = bids.iter().map(|l| l.price).collect();
        assert_eq!(prices, vec![1.2, 1.0, 0.9]);

        let asks = store.top(Venue::A, "XRPUSDT", Side::Ask, 10);
        let prices: Vec<f64> = asks.iter().map(|l| l.price).collect();
        assert_eq!(prices, vec![1.3, 1.4, 1.5]);
    }

    #[test]
    fn pruning_bound_holds_after_apply() {
        let store = BookStore::new();
        let bids: Vec<(String, f64)> = (0..(MAX_LEVELS + 50))
            .map(|i| (format_price(i as f64), 1.0))
            .collect();
        store.apply_snapshot(Venue::A, "XRPUSDT", &bids, &[], Some(1));
        let all = store.top(Venue::A, "XRPUSDT", Side::Bid, usize::MAX);
        assert_eq!(all.len(), MAX_LEVELS);
        // kept the best (highest) MAX_LEVELS bid prices.
        assert_eq!(all.first().unwrap().price, (MAX_LEVELS + 49) as f64);
    }

    #[test]
    fn reconciliation_scenario_s2() {
        let store = BookStore::new();
        store.apply_snapshot(Venue::A, "ABCUSDT", &[b("10.0", 1.0)], &[b("11.0", 1.0)], Some(100));
        store.apply_delta(Venue::A, "ABCUSDT", &[b("10.0", 0.0)], &[b("11.5", 2.0)], Some(102));

        let bids = store.top(Venue::A, "ABCUSDT", Side::Bid, 10);
        assert!(bids.is_empty());
        let asks = store.top(Venue::A, "ABCUSDT", Side::Ask, 10);
        assert_eq!(asks.len(), 2);
        assert_eq!(store.last_update_id(Venue::A, "ABCUSDT"), Some(102));
    }
}
