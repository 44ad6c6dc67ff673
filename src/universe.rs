//! Universe Sampler (C6): periodic REST fetch of listings + 24h ticker
//! stats from venue A, ranked into a target symbol list. Spec.md §4.6.
//!
//! The sampler never mutates running state; it only returns a candidate
//! list for the symbol manager to reconcile against. A total fetch failure
//! degrades to "return the seeds unchanged" rather than propagating an
//! error, matching `examples/original_source/universe_sync.py`'s
//! catch-and-keep-last-state behavior.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::warn;

use crate::error::ErrorSink;

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_PAUSE: Duration = Duration::from_millis(500);
const POOL_SIZE: usize = 12;

/// Quote assets the sampler treats as USD-tether equivalents.
const USD_TETHER_QUOTES: &[&str] = &["USDT", "USD"];

#[derive(Debug, Clone)]
pub struct VenueAUniverseEndpoints {
    pub rest_base: String,
}

impl Default for VenueAUniverseEndpoints {
    fn default() -> Self {
        Self {
            rest_base: "https://api.binance.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<ExchangeSymbol>,
}

#[derive(Debug, Clone, Deserialize)]
struct ExchangeSymbol {
    symbol: String,
    status: String,
    #[serde(rename = "quoteAsset")]
    quote_asset: String,
    #[serde(rename = "isSpotTradingAllowed", default = "default_true")]
    is_spot_trading_allowed: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
struct Ticker24h {
    symbol: String,
    #[serde(rename = "quoteVolume")]
    quote_volume: String,
    #[serde(rename = "priceChangePercent")]
    price_change_percent: String,
}

struct Cached {
    fetched_at: Instant,
    info: ExchangeInfo,
    tickers: Vec<Ticker24h>,
}

/// `universe_refresh_sec` default, used when a sampler is built with
/// [`UniverseSampler::new`] rather than [`UniverseSampler::with_refresh_interval`].
const DEFAULT_REFRESH_SEC: u64 = 900;

pub struct UniverseSampler {
    client: reqwest::Client,
    endpoints: VenueAUniverseEndpoints,
    errors: std::sync::Arc<ErrorSink>,
    refresh_interval: Duration,
    cache: Mutex<Option<Cached>>,
}

impl UniverseSampler {
    pub fn new(endpoints: VenueAUniverseEndpoints, errors: std::sync::Arc<ErrorSink>) -> Self {
        Self::with_refresh_interval(endpoints, errors, DEFAULT_REFRESH_SEC)
    }

    /// `refresh_interval_sec` is the spec's `universe_refresh_sec`: the
    /// sampler re-hits venue A's listing + ticker endpoints no more often
    /// than this, independent of how often the symbol manager calls
    /// `sample` (`scan_interval_sec`, usually much more frequent).
    pub fn with_refresh_interval(endpoints: VenueAUniverseEndpoints, errors: std::sync::Arc<ErrorSink>, refresh_interval_sec: u64) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client"),
            endpoints,
            errors,
            refresh_interval: Duration::from_secs(refresh_interval_sec),
            cache: Mutex::new(None),
        }
    }

    /// Returns `seeds ∪ running ∪ pool`, order preserved, deduped, truncated
    /// to `max_symbols`. On total upstream failure, returns the seeds list
    /// unchanged (spec.md §4.6).
    pub async fn sample(&self, seeds: &[String], running: &[String], max_symbols: usize) -> Vec<String> {
        let (info, tickers) = match self.fetch_both().await {
            Some(pair) => pair,
            None => {
                self.errors.record("universe_sampler", "total fetch failure, falling back to seeds");
                return seeds.to_vec();
            }
        };

        let active_spot: std::collections::HashSet<String> = info
            .symbols
            .iter()
            .filter(|s| s.status == "TRADING" && USD_TETHER_QUOTES.contains(&s.quote_asset.as_str()) && s.is_spot_trading_allowed)
            .map(|s| s.symbol.clone())
            .collect();

        let mut by_volume: Vec<(&str, f64)> = tickers
            .iter()
            .filter(|t| active_spot.contains(&t.symbol))
            .map(|t| (t.symbol.as_str(), t.quote_volume.parse::<f64>().unwrap_or(0.0)))
            .collect();
        by_volume.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut by_change: Vec<(&str, f64)> = tickers
            .iter()
            .filter(|t| active_spot.contains(&t.symbol))
            .map(|t| (t.symbol.as_str(), t.price_change_percent.parse::<f64>().unwrap_or(0.0).abs()))
            .collect();
        by_change.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut pool: Vec<String> = Vec::new();
        let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
        for (sym, _) in by_volume.into_iter().take(POOL_SIZE) {
            if seen.insert(sym.to_string()) {
                pool.push(sym.to_string());
            }
        }
        for (sym, _) in by_change.into_iter().take(POOL_SIZE) {
            if seen.insert(sym.to_string()) {
                pool.push(sym.to_string());
            }
        }

        let mut target: Vec<String> = Vec::new();
        let mut target_seen: std::collections::HashSet<String> = std::collections::HashSet::new();
        for sym in seeds.iter().chain(running.iter()).chain(pool.iter()) {
            if target_seen.insert(sym.clone()) {
                target.push(sym.clone());
            }
        }
        target.truncate(max_symbols);
        target
    }

    /// Serves from cache when it is younger than `refresh_interval`;
    /// otherwise fetches live and refreshes the cache on success. A stale
    /// cache is kept (not cleared) across a failed live refresh, so a
    /// transient upstream outage degrades to "slightly old data" rather
    /// than an immediate fall back to seeds.
    async fn fetch_both(&self) -> Option<(ExchangeInfo, Vec<Ticker24h>)> {
        if let Some(cached) = self.cache.lock().as_ref() {
            if cached.fetched_at.elapsed() < self.refresh_interval {
                return Some((cached.info.clone(), cached.tickers.clone()));
            }
        }

        let info = self.fetch_with_retry::<ExchangeInfo>("/api/v3/exchangeInfo").await;
        let tickers = self.fetch_with_retry::<Vec<Ticker24h>>("/api/v3/ticker/24hr").await;
        match (info, tickers) {
            (Some(info), Some(tickers)) => {
                *self.cache.lock() = Some(Cached {
                    fetched_at: Instant::now(),
                    info: info.clone(),
                    tickers: tickers.clone(),
                });
                Some((info, tickers))
            }
            _ => {
                let stale = self.cache.lock().as_ref().map(|c| (c.info.clone(), c.tickers.clone()));
                stale
            }
        }
    }

    async fn fetch_with_retry<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Option<T> {
        let url = format!("{}{}", self.endpoints.rest_base, path);
        for attempt in 0..RETRY_ATTEMPTS {
            match self.client.get(&url).send().await.and_then(|r| r.error_for_status()) {
                Ok(resp) => match resp.json::<T>().await {
                    Ok(value) => return Some(value),
                    Err(e) => {
                        warn!(url, attempt, error = %e, "universe fetch: parse failure");
                    }
                },
                Err(e) => {
                    warn!(url, attempt, error = %e, "universe fetch: request failure");
                }
            }
            if attempt + 1 < RETRY_ATTEMPTS {
                tokio::time::sleep(RETRY_PAUSE).await;
            }
        }
        None
    }
}
