//! Symbol Manager (C5): selects, starts, and tears down per-symbol venue-A
//! streaming work based on periodic universe rescans. Spec.md §4.5.
//!
//! Seeds are started unconditionally at boot and are never stopped by a
//! rescan. The running set is capped at `max_symbols`; the target list
//! always includes every seed and every currently-running symbol before
//! truncation, so a rescan never "flaps" a symbol off and back on in the
//! same cycle.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::info;

use crate::{
    book::BookStore,
    error::ErrorSink,
    trades::TradeStore,
    universe::UniverseSampler,
    venue_a::{StopSignal, VenueAEndpoints, VenueAWorker},
};

struct RunningSymbol {
    depth: JoinHandle<()>,
    trade: JoinHandle<()>,
    stop: Arc<StopSignal>,
}

/// Pure decision step of one manager cycle (spec.md §4.5 step 3): every
/// running symbol that is neither targeted nor a seed must stop. Factored
/// out of `apply_targets` so it's testable with a synthetic `targets` list.
fn stop_set(running: &[String], targets: &[String], seeds: &[String]) -> Vec<String> {
    running
        .iter()
        .filter(|r| !targets.contains(r) && !seeds.iter().any(|s| s == *r))
        .cloned()
        .collect()
}

/// Summary of the most recent universe-sample cycle, surfaced at C9's
/// `/last` endpoint alongside the alert trail.
#[derive(Debug, Clone, Serialize)]
pub struct LastScan {
    pub ts: i64,
    pub targets: Vec<String>,
    pub running: Vec<String>,
}

pub struct SymbolManager {
    books: Arc<BookStore>,
    trades: Arc<TradeStore>,
    errors: Arc<ErrorSink>,
    sampler: UniverseSampler,
    endpoints: VenueAEndpoints,
    depth_limit: u32,
    max_symbols: usize,
    seeds: Vec<String>,
    running: Mutex<HashMap<String, RunningSymbol>>,
    last_scan: Mutex<Option<LastScan>>,
}

impl SymbolManager {
    pub fn new(
        books: Arc<BookStore>,
        trades: Arc<TradeStore>,
        errors: Arc<ErrorSink>,
        sampler: UniverseSampler,
        endpoints: VenueAEndpoints,
        depth_limit: u32,
        max_symbols: usize,
        seeds: Vec<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            books,
            trades,
            errors,
            sampler,
            endpoints,
            depth_limit,
            max_symbols,
            seeds,
            running: Mutex::new(HashMap::new()),
            last_scan: Mutex::new(None),
        })
    }

    /// Currently running raw venue-A symbols, in no particular order.
    pub fn running_symbols(&self) -> Vec<String> {
        self.running.lock().keys().cloned().collect()
    }

    pub fn last_scan(&self) -> Option<LastScan> {
        self.last_scan.lock().clone()
    }

    fn is_seed(&self, raw: &str) -> bool {
        self.seeds.iter().any(|s| s == raw)
    }

    /// Start is idempotent: re-starting an already-running symbol is a
    /// no-op (spec.md §4.5).
    fn start_symbol(&self, raw: &str) {
        let mut running = self.running.lock();
        if running.contains_key(raw) {
            return;
        }
        let stop = StopSignal::new();
        let worker = Arc::new(VenueAWorker::new(
            raw.to_string(),
            self.books.clone(),
            self.trades.clone(),
            self.errors.clone(),
            self.endpoints.clone(),
            self.depth_limit,
            stop.clone(),
        ));
        let (depth, trade) = worker.spawn();
        running.insert(raw.to_string(), RunningSymbol { depth, trade, stop });
        info!(symbol = raw, "symbol manager: started");
    }

    /// Cancels both subtasks, awaits them, then discards the book and trade
    /// ring for this (venue, raw). Never stops a seed.
    async fn stop_symbol(&self, raw: &str) {
        if self.is_seed(raw) {
            return;
        }
        let entry = self.running.lock().remove(raw);
        let Some(entry) = entry else { return };
        entry.stop.stop();
        let _ = entry.depth.await;
        let _ = entry.trade.await;
        self.books.remove(crate::book::Venue::A, raw);
        self.trades.remove(crate::book::Venue::A, raw);
        info!(symbol = raw, "symbol manager: stopped");
    }

    /// Boot sequence: start all seeds unconditionally, then a one-shot
    /// sample to fill out the running set up to the cap.
    pub async fn bootstrap(&self) {
        for seed in self.seeds.clone() {
            self.start_symbol(&seed);
        }
        self.run_cycle().await;
    }

    /// One manager cycle (spec.md §4.5 steps 1-3): sample targets, then
    /// reconcile the running set against them.
    pub async fn run_cycle(&self) {
        let running = self.running_symbols();
        let targets = self.sampler.sample(&self.seeds, &running, self.max_symbols).await;
        self.apply_targets(targets).await;
    }

    /// Reconciles the running set against a given target list: starts what's
    /// missing, stops what's no longer targeted and isn't a seed, and
    /// records the scan summary. Takes `targets` as a parameter rather than
    /// calling the sampler inline, so it is unit-testable with a synthetic
    /// target list, independent of live network access — the same
    /// separation `Reconciler` (C3) gives the depth-stream gap detection.
    async fn apply_targets(&self, targets: Vec<String>) {
        let running = self.running_symbols();
        for target in &targets {
            self.start_symbol(target);
        }

        for raw in stop_set(&running, &targets, &self.seeds) {
            self.stop_symbol(&raw).await;
        }

        *self.last_scan.lock() = Some(LastScan {
            ts: Utc::now().timestamp(),
            targets,
            running: self.running_symbols(),
        });
    }

    /// Spawns the periodic rescan loop (spec.md §4.5: every
    /// `scan_interval_sec`).
    pub fn spawn_scan_loop(self: Arc<Self>, scan_interval_sec: u64) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(scan_interval_sec));
            interval.tick().await; // first tick fires immediately; bootstrap already ran once.
            loop {
                interval.tick().await;
                self.run_cycle().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with_seeds(seeds: Vec<&str>, max_symbols: usize) -> Arc<SymbolManager> {
        let errors = Arc::new(ErrorSink::new());
        let sampler = UniverseSampler::new(
            crate::universe::VenueAUniverseEndpoints {
                rest_base: "http://127.0.0.1:1".to_string(),
            },
            errors.clone(),
        );
        SymbolManager::new(
            BookStore::new(),
            TradeStore::new(),
            errors,
            sampler,
            VenueAEndpoints {
                rest_base: "http://127.0.0.1:1".to_string(),
                ws_base: "ws://127.0.0.1:1".to_string(),
            },
            100,
            max_symbols,
            seeds.into_iter().map(String::from).collect(),
        )
    }

    #[tokio::test]
    async fn seeds_start_unconditionally_and_are_never_stopped() {
        let mgr = manager_with_seeds(vec!["ABCUSDT"], 1);
        mgr.bootstrap().await;
        // sampler fails (unreachable host) -> falls back to seeds only, so
        // targets == seeds and nothing beyond the seed starts.
        assert_eq!(mgr.running_symbols(), vec!["ABCUSDT".to_string()]);
        mgr.run_cycle().await;
        assert_eq!(mgr.running_symbols(), vec!["ABCUSDT".to_string()]);
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let mgr = manager_with_seeds(vec!["ABCUSDT"], 5);
        mgr.start_symbol("ABCUSDT");
        mgr.start_symbol("ABCUSDT");
        assert_eq!(mgr.running.lock().len(), 1);
    }

    #[test]
    fn stop_set_keeps_seeds_and_targets_stops_the_rest() {
        let running = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let targets = vec!["A".to_string()];
        let seeds = vec!["C".to_string()];
        let mut stopped = stop_set(&running, &targets, &seeds);
        stopped.sort();
        assert_eq!(stopped, vec!["B".to_string()]);
    }

    /// Drives the real stop path (not just the sampler-unreachable fallback)
    /// with a synthetic target list smaller than the current running set:
    /// every non-seed symbol outside the targets actually gets stopped, and
    /// the cap is respected afterward.
    #[tokio::test]
    async fn apply_targets_stops_non_seed_symbols_outside_targets_and_respects_cap() {
        let mgr = manager_with_seeds(vec!["SEEDUSDT"], 2);
        mgr.start_symbol("SEEDUSDT");
        mgr.start_symbol("EXTRAUSDT");
        mgr.start_symbol("STALEUSDT");
        assert_eq!(mgr.running.lock().len(), 3);

        mgr.apply_targets(vec!["SEEDUSDT".to_string()]).await;

        let running = mgr.running_symbols();
        assert_eq!(running, vec!["SEEDUSDT".to_string()]);
        assert!(running.len() <= 2);
    }
}
