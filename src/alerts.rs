//! Feature/Alert Engine (C8): rolling time-windowed observations per
//! normalized key and scored alerts with per-key cooldown. Spec.md §4.8.
//!
//! Two independently-cadenced loops, matching
//! `examples/original_source/feature_engine.py`/`alerts.py`'s separate
//! coroutines rather than one merged loop: a 1s sampler appends to the
//! per-window rings, a 5s scorer reads the 60s ring and emits alerts.

use std::{collections::HashMap, collections::VecDeque, sync::Arc, time::Duration};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

use crate::{error::Bounded, metrics::MetricsAggregator};

pub const WINDOWS_SEC: &[i64] = &[60, 300, 900];

#[derive(Debug, Clone, Copy)]
struct FeatureSample {
    ts: i64,
    mid: f64,
    #[allow(dead_code)]
    bid_size_total: f64,
    #[allow(dead_code)]
    ask_size_total: f64,
    imbalance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    None,
    Green,
    Orange,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub key: String,
    pub score: i32,
    pub level: AlertLevel,
    pub mid: f64,
    pub imbalance_pct: Option<f64>,
    pub emitted_at: i64,
}

struct FeatureRing {
    window_sec: i64,
    samples: VecDeque<FeatureSample>,
}

impl FeatureRing {
    fn new(window_sec: i64) -> Self {
        Self {
            window_sec,
            samples: VecDeque::with_capacity(window_sec as usize),
        }
    }

    fn push(&mut self, sample: FeatureSample) {
        if let Some(last) = self.samples.back() {
            if sample.ts <= last.ts {
                return; // at most one entry per wall-second, monotonic.
            }
        }
        if self.samples.len() as i64 >= self.window_sec {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }
}

pub struct AlertEngine {
    metrics: Arc<MetricsAggregator>,
    rings: Mutex<HashMap<i64, HashMap<String, FeatureRing>>>,
    last_emit: Mutex<HashMap<String, i64>>,
    trail: Bounded<Alert>,
    threshold_orange: i32,
    threshold_green: i32,
    alert_cooldown_sec: i64,
}

const SCORE_WINDOW_SEC: i64 = 60;
const SCORE_LOOKBACK_SAMPLES: usize = 30;

impl AlertEngine {
    pub fn new(metrics: Arc<MetricsAggregator>, threshold_orange: i32, threshold_green: i32, alert_cooldown_sec: i64) -> Arc<Self> {
        let mut rings = HashMap::new();
        for &w in WINDOWS_SEC {
            rings.insert(w, HashMap::new());
        }
        Arc::new(Self {
            metrics,
            rings: Mutex::new(rings),
            last_emit: Mutex::new(HashMap::new()),
            trail: Bounded::new(crate::error::SINK_CAPACITY),
            threshold_orange,
            threshold_green,
            alert_cooldown_sec,
        })
    }

    pub fn trail(&self) -> Vec<Alert> {
        self.trail.snapshot()
    }

    /// Appends one sample per key from the current metrics snapshot into
    /// every window's ring (spec.md §4.8, runs every 1s).
    pub fn sample(&self) {
        let now = Utc::now().timestamp();
        let snapshot = self.metrics.snapshot();
        let mut rings = self.rings.lock();
        for (key, metrics) in snapshot.iter() {
            let denom = metrics.band_bid + metrics.band_ask;
            let imbalance = if denom > 0.0 { metrics.band_bid / denom } else { 0.0 };
            let sample = FeatureSample {
                ts: now,
                mid: metrics.mid,
                bid_size_total: metrics.band_bid,
                ask_size_total: metrics.band_ask,
                imbalance,
            };
            for &w in WINDOWS_SEC {
                rings
                    .get_mut(&w)
                    .expect("all windows pre-registered")
                    .entry(key.clone())
                    .or_insert_with(|| FeatureRing::new(w))
                    .push(sample);
            }
        }
    }

    /// Scores every key with a 60s ring and emits alerts respecting
    /// per-key cooldown (spec.md §4.8, runs every 5s).
    pub fn score(&self) {
        let now = Utc::now().timestamp();
        let snapshot = self.metrics.snapshot();
        let rings = self.rings.lock();
        let Some(ring_60s) = rings.get(&SCORE_WINDOW_SEC) else { return };

        for (key, metrics) in snapshot.iter() {
            let Some(ring) = ring_60s.get(key) else { continue };
            let score = score_from_ring(ring, metrics.mid, metrics.band_bid, metrics.band_ask);
            let level = classify(score, self.threshold_orange, self.threshold_green);
            if level == AlertLevel::None {
                continue;
            }
            let mut last_emit = self.last_emit.lock();
            let last = last_emit.get(key).copied().unwrap_or(i64::MIN);
            if now - last <= self.alert_cooldown_sec {
                continue;
            }
            last_emit.insert(key.clone(), now);
            let alert = Alert {
                key: key.clone(),
                score,
                level,
                mid: metrics.mid,
                imbalance_pct: metrics.imbalance_pct,
                emitted_at: now,
            };
            info!(key = %alert.key, score = alert.score, level = ?alert.level, "alert emitted");
            self.trail.push(alert);
        }
    }

    pub fn spawn_loops(self: Arc<Self>) -> (tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>) {
        let sampler = {
            let engine = self.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(1));
                loop {
                    interval.tick().await;
                    engine.sample();
                }
            })
        };
        let scorer = {
            let engine = self.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(5));
                loop {
                    interval.tick().await;
                    engine.score();
                }
            })
        };
        (sampler, scorer)
    }
}

fn score_from_ring(ring: &FeatureRing, mid_now: f64, band_bid: f64, band_ask: f64) -> i32 {
    if ring.samples.len() < SCORE_LOOKBACK_SAMPLES {
        return 0;
    }
    let past = ring.samples[ring.samples.len() - SCORE_LOOKBACK_SAMPLES];
    let ret_30s = (mid_now - past.mid) / past.mid.max(1e-9);

    let denom = band_bid + band_ask;
    let imbalance = if denom > 0.0 { band_bid / denom } else { 0.0 };

    let mut score = 0.0;
    if ret_30s > 0.01 {
        score += (ret_30s * 2000.0).min(40.0);
    }
    if imbalance > 0.60 {
        score += (imbalance - 0.60) * 100.0;
    }
    score.round().clamp(0.0, 100.0) as i32
}

fn classify(score: i32, threshold_orange: i32, threshold_green: i32) -> AlertLevel {
    if score >= threshold_orange {
        AlertLevel::Orange
    } else if score >= threshold_green {
        AlertLevel::Green
    } else {
        AlertLevel::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring_with_samples(n: usize, mid_start: f64, mid_step: f64) -> FeatureRing {
        let mut ring = FeatureRing::new(60);
        for i in 0..n {
            ring.samples.push_back(FeatureSample {
                ts: i as i64,
                mid: mid_start + mid_step * i as f64,
                bid_size_total: 0.0,
                ask_size_total: 0.0,
                imbalance: 0.0,
            });
        }
        ring
    }

    #[test]
    fn scenario_s5_below_thirty_samples_scores_zero() {
        let ring = ring_with_samples(29, 100.0, 0.0);
        let score = score_from_ring(&ring, 100.0, 0.0, 0.0);
        assert_eq!(score, 0);
    }

    #[test]
    fn scenario_s6_combined_score_is_sixty() {
        // ret_30s = 0.02 -> 40 (capped), imbalance 0.80 -> +20 => 60.
        let ring = ring_with_samples(30, 100.0, 0.0);
        // mid_now is 2% above mid 30 samples back (100.0).
        let score = score_from_ring(&ring, 102.0, 0.80, 0.20);
        assert_eq!(score, 60);
        assert_eq!(classify(score, 80, 65), AlertLevel::None);
    }

    #[test]
    fn scenario_s7_cooldown_suppresses_second_alert() {
        use crate::book::Venue;

        let books = crate::book::BookStore::new();
        let trades = crate::trades::TradeStore::new();
        // mid=103.0, imbalance=0.9 (band_bid=9 vs band_ask=1).
        books.apply_snapshot(Venue::A, "XYZUSDT", &[("102.0".to_string(), 9.0)], &[("104.0".to_string(), 1.0)], Some(1));

        let metrics = MetricsAggregator::new(books, trades, 0.01, 100_000.0, 300);
        metrics.recompute();
        let engine = AlertEngine::new(metrics, 80, 65, 1200);

        // Seed the real 60s ring with 30 samples so score() has enough
        // history; the oldest sample's mid (100.0) is 3% below the current
        // mid (103.0), which combined with the 0.9 imbalance scores above
        // the green threshold (65) but below orange (80).
        {
            let mut rings = engine.rings.lock();
            let ring = rings.get_mut(&SCORE_WINDOW_SEC).unwrap().entry("XYZUSD".to_string()).or_insert_with(|| FeatureRing::new(SCORE_WINDOW_SEC));
            for i in 0..SCORE_LOOKBACK_SAMPLES {
                ring.push(FeatureSample {
                    ts: i as i64,
                    mid: if i == 0 { 100.0 } else { 103.0 },
                    bid_size_total: 0.0,
                    ask_size_total: 0.0,
                    imbalance: 0.0,
                });
            }
        }

        // First real score() call computes a Green-level alert and emits it.
        engine.score();
        assert_eq!(engine.trail().len(), 1);

        // Immediately scoring again hits the same key inside the cooldown
        // window; no second alert is appended to the trail.
        engine.score();
        assert_eq!(engine.trail().len(), 1);
    }

    #[test]
    fn classify_respects_thresholds() {
        assert_eq!(classify(60, 80, 65), AlertLevel::None);
        assert_eq!(classify(70, 80, 65), AlertLevel::Green);
        assert_eq!(classify(85, 80, 65), AlertLevel::Orange);
    }
}
