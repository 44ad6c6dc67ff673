//! Venue-A Stream Worker (C3): per-symbol REST snapshot + delta stream with
//! sequence reconciliation. Spec.md §4.3.
//!
//! Two cooperating subtasks per symbol (depth + trade), both owned by the
//! symbol manager's running-set entry and cancelled together on stop.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::{sync::Notify, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use crate::{
    book::{BookStore, Venue},
    error::ErrorSink,
    trades::{Side as TradeSide, Trade, TradeStore},
};

const BASE_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Cooperative cancellation shared by a symbol's depth + trade subtasks.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    async fn sleep_cancellable(&self, dur: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(dur) => {}
            _ = self.notify.notified() => {}
        }
    }
}

/// REST + WS endpoints, parameterized so tests can point at a mock server.
#[derive(Debug, Clone)]
pub struct VenueAEndpoints {
    pub rest_base: String,
    pub ws_base: String,
}

impl Default for VenueAEndpoints {
    fn default() -> Self {
        Self {
            rest_base: "https://api.binance.com".to_string(),
            ws_base: "wss://stream.binance.com:9443/ws".to_string(),
        }
    }
}

/// Outcome of feeding one delta frame's [U, u] pair into the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaDecision {
    /// Entirely older than the snapshot; drop without applying.
    Discard,
    /// Apply this delta and advance `last_update_id`.
    Apply,
    /// Contiguity broken; caller must resync from a fresh snapshot.
    Gap,
}

/// Pure reconciliation state machine (spec.md §4.3 steps 2-4), factored out
/// of the networking code so it is unit-testable without a live socket.
#[derive(Debug)]
pub struct Reconciler {
    snapshot_id: u64,
    synced: bool,
    last_u: Option<u64>,
}

impl Reconciler {
    pub fn new(snapshot_id: u64) -> Self {
        Self {
            snapshot_id,
            synced: false,
            last_u: None,
        }
    }

    pub fn feed(&mut self, first_id: u64, last_id: u64) -> DeltaDecision {
        if last_id < self.snapshot_id {
            return DeltaDecision::Discard;
        }
        if !self.synced {
            if first_id <= self.snapshot_id + 1 && self.snapshot_id + 1 <= last_id {
                self.synced = true;
                self.last_u = Some(last_id);
                return DeltaDecision::Apply;
            }
            return DeltaDecision::Discard;
        }
        let expected = self.last_u.expect("synced implies last_u set") + 1;
        if first_id == expected {
            self.last_u = Some(last_id);
            DeltaDecision::Apply
        } else {
            DeltaDecision::Gap
        }
    }
}

#[derive(Debug, Deserialize)]
struct RestSnapshot {
    #[serde(rename = "lastUpdateId")]
    last_update_id: u64,
    bids: Vec<(String, String)>,
    asks: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
struct DepthUpdateEvent {
    #[serde(rename = "U")]
    first_update_id: u64,
    #[serde(rename = "u")]
    final_update_id: u64,
    #[serde(rename = "b")]
    bids: Vec<(String, String)>,
    #[serde(rename = "a")]
    asks: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
struct TradeEvent {
    p: String,
    q: String,
    #[serde(rename = "T")]
    trade_time: i64,
    /// `true` when the buyer is the maker, i.e. the seller aggressed.
    #[serde(rename = "m")]
    buyer_is_maker: bool,
}

fn parse_levels(levels: &[(String, String)]) -> Vec<(String, f64)> {
    levels
        .iter()
        .filter_map(|(p, q)| {
            let price: f64 = p.parse().ok()?;
            let size: f64 = q.parse().ok()?;
            Some((crate::book::format_price(price), size))
        })
        .collect()
}

pub struct VenueAWorker {
    pub raw: String,
    pub books: Arc<BookStore>,
    pub trades: Arc<TradeStore>,
    pub errors: Arc<ErrorSink>,
    pub endpoints: VenueAEndpoints,
    pub depth_limit: u32,
    pub stop: Arc<StopSignal>,
    client: reqwest::Client,
}

impl VenueAWorker {
    pub fn new(
        raw: String,
        books: Arc<BookStore>,
        trades: Arc<TradeStore>,
        errors: Arc<ErrorSink>,
        endpoints: VenueAEndpoints,
        depth_limit: u32,
        stop: Arc<StopSignal>,
    ) -> Self {
        Self {
            raw,
            books,
            trades,
            errors,
            endpoints,
            depth_limit,
            stop,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client"),
        }
    }

    /// Spawn the depth and trade subtasks; returns both handles so the
    /// symbol manager can await them on stop.
    pub fn spawn(self: Arc<Self>) -> (JoinHandle<()>, JoinHandle<()>) {
        let depth = {
            let worker = self.clone();
            tokio::spawn(async move { worker.run_depth_loop().await })
        };
        let trade = {
            let worker = self.clone();
            tokio::spawn(async move { worker.run_trade_loop().await })
        };
        (depth, trade)
    }

    async fn run_depth_loop(&self) {
        let mut attempt: u32 = 0;
        while !self.stop.is_stopped() {
            match self.run_depth_once().await {
                Ok(()) => attempt = 0,
                Err(e) => {
                    self.errors.record(format!("venue_a_depth:{}", self.raw), e.to_string());
                    let backoff = backoff_for_attempt(attempt);
                    warn!(symbol = %self.raw, attempt, backoff_ms = backoff.as_millis() as u64, "venue_a depth resync backoff");
                    attempt = attempt.saturating_add(1);
                    self.stop.sleep_cancellable(backoff).await;
                }
            }
        }
    }

    async fn run_depth_once(&self) -> anyhow::Result<()> {
        let limit = self.depth_limit.min(1000);
        let url = format!(
            "{}/api/v3/depth?symbol={}&limit={}",
            self.endpoints.rest_base, self.raw, limit
        );
        let snapshot: RestSnapshot = self.client.get(&url).send().await?.error_for_status()?.json().await?;

        self.books.apply_snapshot(
            Venue::A,
            &self.raw,
            &parse_levels(&snapshot.bids),
            &parse_levels(&snapshot.asks),
            Some(snapshot.last_update_id),
        );

        let mut reconciler = Reconciler::new(snapshot.last_update_id);

        let ws_url = format!("{}/{}@depth@100ms", self.endpoints.ws_base, self.raw.to_lowercase());
        let (ws_stream, _) = connect_async(&ws_url).await?;
        let (mut write, mut read) = ws_stream.split();

        loop {
            if self.stop.is_stopped() {
                return Ok(());
            }
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let Ok(update) = serde_json::from_str::<DepthUpdateEvent>(&text) else {
                                debug!(symbol = %self.raw, "venue_a depth: unparseable frame, ignoring");
                                continue;
                            };
                            match reconciler.feed(update.first_update_id, update.final_update_id) {
                                DeltaDecision::Discard => continue,
                                DeltaDecision::Gap => {
                                    return Err(anyhow::anyhow!("sequence gap for {}", self.raw));
                                }
                                DeltaDecision::Apply => {
                                    self.books.apply_delta(
                                        Venue::A,
                                        &self.raw,
                                        &parse_levels(&update.bids),
                                        &parse_levels(&update.asks),
                                        Some(update.final_update_id),
                                    );
                                }
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Err(anyhow::anyhow!("venue_a depth socket closed for {}", self.raw));
                        }
                        Some(Err(e)) => return Err(e.into()),
                        _ => {}
                    }
                }
                _ = tokio::time::sleep(Duration::from_secs(20)) => {
                    return Err(anyhow::anyhow!("venue_a depth idle timeout for {}", self.raw));
                }
            }
        }
    }

    async fn run_trade_loop(&self) {
        let mut attempt: u32 = 0;
        while !self.stop.is_stopped() {
            match self.run_trade_once().await {
                Ok(()) => attempt = 0,
                Err(e) => {
                    self.errors.record(format!("venue_a_trade:{}", self.raw), e.to_string());
                    let backoff = backoff_for_attempt(attempt);
                    attempt = attempt.saturating_add(1);
                    self.stop.sleep_cancellable(backoff).await;
                }
            }
        }
    }

    async fn run_trade_once(&self) -> anyhow::Result<()> {
        let ws_url = format!("{}/{}@trade", self.endpoints.ws_base, self.raw.to_lowercase());
        let (ws_stream, _) = connect_async(&ws_url).await?;
        let (mut write, mut read) = ws_stream.split();

        loop {
            if self.stop.is_stopped() {
                return Ok(());
            }
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let Ok(event) = serde_json::from_str::<TradeEvent>(&text) else {
                                continue;
                            };
                            let (Ok(price), Ok(size)) = (event.p.parse::<f64>(), event.q.parse::<f64>()) else {
                                continue;
                            };
                            let side = if event.buyer_is_maker { TradeSide::Sell } else { TradeSide::Buy };
                            self.trades.push(
                                Venue::A,
                                &self.raw,
                                Trade {
                                    price,
                                    size,
                                    side,
                                    timestamp_ms: event.trade_time,
                                },
                            );
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Err(anyhow::anyhow!("venue_a trade socket closed for {}", self.raw));
                        }
                        Some(Err(e)) => return Err(e.into()),
                        _ => {}
                    }
                }
                _ = tokio::time::sleep(Duration::from_secs(20)) => {
                    return Err(anyhow::anyhow!("venue_a trade idle timeout for {}", self.raw));
                }
            }
        }
    }
}

fn backoff_for_attempt(attempt: u32) -> Duration {
    let shift = attempt.min(5); // 1,2,4,8,16,32 -> capped below at MAX_BACKOFF
    let scaled = BASE_BACKOFF.saturating_mul(1u32 << shift);
    scaled.min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconciliation_scenario_s2_s3() {
        // S2: snapshot id 100, first delta U=101,u=102 applies and advances to 102.
        let mut r = Reconciler::new(100);
        assert_eq!(r.feed(101, 102), DeltaDecision::Apply);

        // S3: delta U=105,u=107 arriving after last=102 is a gap.
        assert_eq!(r.feed(105, 107), DeltaDecision::Gap);
    }

    #[test]
    fn deltas_older_than_snapshot_are_discarded() {
        let mut r = Reconciler::new(100);
        assert_eq!(r.feed(50, 99), DeltaDecision::Discard);
    }

    #[test]
    fn first_accepted_delta_must_straddle_snapshot_plus_one() {
        let mut r = Reconciler::new(100);
        // u=100 means u < snapshot_id+1=101, so first condition (U<=101<=u) fails -> discard.
        assert_eq!(r.feed(90, 100), DeltaDecision::Discard);
        assert_eq!(r.feed(95, 101), DeltaDecision::Apply);
    }

    #[test]
    fn contiguous_deltas_keep_applying() {
        let mut r = Reconciler::new(100);
        assert_eq!(r.feed(100, 101), DeltaDecision::Apply);
        assert_eq!(r.feed(102, 105), DeltaDecision::Apply);
        assert_eq!(r.feed(106, 110), DeltaDecision::Apply);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_for_attempt(0), Duration::from_secs(1));
        assert_eq!(backoff_for_attempt(1), Duration::from_secs(2));
        assert_eq!(backoff_for_attempt(4), Duration::from_secs(16));
        assert_eq!(backoff_for_attempt(10), MAX_BACKOFF);
    }
}
