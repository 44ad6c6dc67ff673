//! Trade Ring (C2): bounded FIFO of trades per (venue, raw symbol).
//! Spec.md §4.2.

use std::{collections::HashMap, collections::VecDeque, sync::Arc};

use parking_lot::Mutex;
use serde::Serialize;

use crate::book::{BookKey, Venue};

pub const DEFAULT_CAPACITY: usize = 6000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Trade {
    pub price: f64,
    pub size: f64,
    pub side: Side,
    pub timestamp_ms: i64,
}

#[derive(Debug)]
struct TradeRing {
    entries: VecDeque<Trade>,
    capacity: usize,
}

impl TradeRing {
    fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, trade: Trade) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(trade);
    }

    fn since(&self, cutoff_ms: i64) -> Vec<Trade> {
        self.entries
            .iter()
            .filter(|t| t.timestamp_ms >= cutoff_ms)
            .copied()
            .collect()
    }
}

/// Registry of all per-(venue, raw symbol) trade rings.
#[derive(Debug)]
pub struct TradeStore {
    rings: parking_lot::RwLock<HashMap<BookKey, Arc<Mutex<TradeRing>>>>,
    capacity: usize,
}

impl TradeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rings: parking_lot::RwLock::new(HashMap::new()),
            capacity: DEFAULT_CAPACITY,
        })
    }

    fn entry(&self, key: &BookKey) -> Arc<Mutex<TradeRing>> {
        if let Some(existing) = self.rings.read().get(key) {
            return existing.clone();
        }
        let mut guard = self.rings.write();
        guard
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(TradeRing::new(self.capacity))))
            .clone()
    }

    pub fn push(&self, venue: Venue, raw: &str, trade: Trade) {
        let ring = self.entry(&BookKey::new(venue, raw));
        ring.lock().push(trade);
    }

    pub fn iterate_since(&self, venue: Venue, raw: &str, cutoff_ms: i64) -> Vec<Trade> {
        let key = BookKey::new(venue, raw);
        match self.rings.read().get(&key) {
            Some(ring) => ring.lock().since(cutoff_ms),
            None => Vec::new(),
        }
    }

    pub fn remove(&self, venue: Venue, raw: &str) {
        self.rings.write().remove(&BookKey::new(venue, raw));
    }

    pub fn raw_symbols_for(&self, normalized_of: impl Fn(Venue, &str) -> String, normalized: &str) -> Vec<BookKey> {
        self.rings
            .read()
            .keys()
            .filter(|k| normalized_of(k.venue, &k.raw) == normalized)
            .cloned()
            .collect()
    }
}
