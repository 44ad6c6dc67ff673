//! Metrics Aggregator (C7): merges books and trades across venues by
//! normalized key on a 1-second cadence, deriving mid, band imbalance,
//! aggressor ratio and large-trade counts. Spec.md §4.7.
//!
//! Computation is pure (no I/O) and runs as a single async task; the
//! published snapshot is replaced whole under one `RwLock` so readers never
//! observe a partially-merged map (spec.md §5, testable property #7).

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::{
    book::{BookStore, Side, Venue},
    normalize::normalized_of,
    trades::TradeStore,
};

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub mid: f64,
    pub band_bid: f64,
    pub band_ask: f64,
    pub imbalance_pct: Option<f64>,
    pub aggressor_buy_pct_5m: Option<f64>,
    pub large_trades_5m: u64,
}

pub struct MetricsAggregator {
    books: Arc<BookStore>,
    trades: Arc<TradeStore>,
    band_pct: f64,
    large_trade_size: f64,
    trade_window_sec: u64,
    published: RwLock<Arc<HashMap<String, MetricsSnapshot>>>,
}

impl MetricsAggregator {
    pub fn new(books: Arc<BookStore>, trades: Arc<TradeStore>, band_pct: f64, large_trade_size: f64, trade_window_sec: u64) -> Arc<Self> {
        Arc::new(Self {
            books,
            trades,
            band_pct,
            large_trade_size,
            trade_window_sec,
            published: RwLock::new(Arc::new(HashMap::new())),
        })
    }

    /// Current published snapshot map. Cheap: an `Arc` clone, never blocks a
    /// concurrent `recompute`.
    pub fn snapshot(&self) -> Arc<HashMap<String, MetricsSnapshot>> {
        self.published.read().clone()
    }

    pub fn recompute(&self) {
        let keys = self.books.all_keys();
        let mut normalized_keys: Vec<String> = keys.iter().map(|k| normalized_of(k.venue, &k.raw)).collect();
        normalized_keys.sort();
        normalized_keys.dedup();

        let mut next = HashMap::with_capacity(normalized_keys.len());
        for key in normalized_keys {
            if let Some(snap) = self.compute_one(&key) {
                next.insert(key, snap);
            }
        }
        *self.published.write() = Arc::new(next);
    }

    fn compute_one(&self, normalized: &str) -> Option<MetricsSnapshot> {
        let sources = self.books.sources_for(normalized_of, normalized);
        if sources.is_empty() {
            return None;
        }

        let mut best_bid: Option<f64> = None;
        let mut best_ask: Option<f64> = None;
        for src in &sources {
            let (bid, ask) = self.books.best_bid_ask(src.venue, &src.raw);
            if let Some(b) = bid {
                best_bid = Some(best_bid.map_or(b, |cur| cur.max(b)));
            }
            if let Some(a) = ask {
                best_ask = Some(best_ask.map_or(a, |cur| cur.min(a)));
            }
        }
        let (best_bid, best_ask) = (best_bid?, best_ask?);
        let mid = (best_bid + best_ask) / 2.0;

        let bid_floor = mid * (1.0 - self.band_pct);
        let ask_ceil = mid * (1.0 + self.band_pct);
        let mut band_bid = 0.0;
        let mut band_ask = 0.0;
        for src in &sources {
            for level in self.books.top(src.venue, &src.raw, Side::Bid, usize::MAX) {
                if level.price >= bid_floor {
                    band_bid += level.size;
                }
            }
            for level in self.books.top(src.venue, &src.raw, Side::Ask, usize::MAX) {
                if level.price <= ask_ceil {
                    band_ask += level.size;
                }
            }
        }
        let denom = band_bid + band_ask;
        let imbalance_pct = if denom > 0.0 { Some(100.0 * band_bid / denom) } else { None };

        let cutoff_ms = Utc::now().timestamp_millis() - (self.trade_window_sec as i64) * 1000;
        let mut buy_size = 0.0;
        let mut total_size = 0.0;
        let mut large_trades = 0u64;
        for src in &sources {
            for trade in self.trades.iterate_since(src.venue, &src.raw, cutoff_ms) {
                total_size += trade.size;
                if trade.side == crate::trades::Side::Buy {
                    buy_size += trade.size;
                }
                if trade.size >= self.large_trade_size {
                    large_trades += 1;
                }
            }
        }
        let aggressor_buy_pct_5m = if total_size > 0.0 { Some(100.0 * buy_size / total_size) } else { None };

        Some(MetricsSnapshot {
            mid,
            band_bid,
            band_ask,
            imbalance_pct,
            aggressor_buy_pct_5m,
            large_trades_5m: large_trades,
        })
    }

    pub fn spawn_loop(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                self.recompute();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lvl(price: &str, size: f64) -> (String, f64) {
        (price.to_string(), size)
    }

    #[test]
    fn scenario_s4_cross_venue_mid_and_band() {
        let books = BookStore::new();
        let trades = TradeStore::new();
        // venue A: best_bid=10, best_ask=10.04
        books.apply_snapshot(Venue::A, "XYZUSDT", &[lvl("10.0", 1.0)], &[lvl("10.04", 1.0)], Some(1));
        // venue B: best_bid=10.02, best_ask=10.03
        books.apply_snapshot(Venue::B, "XYZ/USD", &[lvl("10.02", 1.0)], &[lvl("10.03", 1.0)], None);

        let agg = MetricsAggregator::new(books, trades, 0.01, 100_000.0, 300);
        agg.recompute();
        let snap = agg.snapshot();
        let metrics = snap.get("XYZUSD").expect("merged key present");
        assert_eq!(metrics.mid, 10.025);
    }

    #[test]
    fn key_omitted_when_no_best_bid_or_ask() {
        let books = BookStore::new();
        let trades = TradeStore::new();
        // only an ask side, no bid -> best_bid unavailable, key omitted.
        books.apply_snapshot(Venue::A, "NOBUYUSDT", &[], &[lvl("10.0", 1.0)], Some(1));

        let agg = MetricsAggregator::new(books, trades, 0.01, 100_000.0, 300);
        agg.recompute();
        assert!(agg.snapshot().get("NOBUYUSD").is_none());
    }

    #[test]
    fn aggressor_and_large_trade_counts() {
        let books = BookStore::new();
        let trades = TradeStore::new();
        books.apply_snapshot(Venue::A, "ABCUSDT", &[lvl("10.0", 1.0)], &[lvl("10.1", 1.0)], Some(1));
        let now = Utc::now().timestamp_millis();
        trades.push(
            Venue::A,
            "ABCUSDT",
            crate::trades::Trade {
                price: 10.0,
                size: 200_000.0,
                side: crate::trades::Side::Buy,
                timestamp_ms: now,
            },
        );
        trades.push(
            Venue::A,
            "ABCUSDT",
            crate::trades::Trade {
                price: 10.0,
                size: 1.0,
                side: crate::trades::Side::Sell,
                timestamp_ms: now,
            },
        );

        let agg = MetricsAggregator::new(books, trades, 0.01, 100_000.0, 300);
        agg.recompute();
        let snap = agg.snapshot();
        let metrics = snap.get("ABCUSD").unwrap();
        assert_eq!(metrics.large_trades_5m, 1);
        assert!(metrics.aggressor_buy_pct_5m.unwrap() > 99.0);
    }
}
