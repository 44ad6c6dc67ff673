//! Query Surface (C9): read-only snapshot views for downstream consumers.
//! Spec.md §4.9/§6. CORS is applied globally in `main.rs` via
//! `tower_http::cors::CorsLayer::permissive()`.

use std::collections::HashMap;

use axum::{extract::Query, extract::State, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    book::{Side, Venue},
    error::ApiError,
    normalize::{normalize_venue_a, normalized_of},
    state::AppState,
};

const DEFAULT_MIN_USD: f64 = 200_000.0;

pub async fn root(State(_state): State<AppState>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "service": "depthwatch",
        "ts": Utc::now().timestamp_millis(),
    }))
}

pub async fn universe(State(state): State<AppState>) -> Json<Value> {
    let venue_a: Vec<String> = state.books.raw_symbols(Venue::A);
    Json(json!({
        "ok": true,
        "ts": Utc::now().timestamp_millis(),
        "universe": {
            "venue_a": venue_a,
            "venue_b": state.config.venue_b_pairs.clone(),
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct SignalQuery {
    pub min_usd: Option<f64>,
}

#[derive(Debug, Serialize)]
struct LargeLevel {
    price: f64,
    size: f64,
    notional: f64,
    side: &'static str,
}

pub async fn signal(State(state): State<AppState>, Query(query): Query<SignalQuery>) -> Json<Value> {
    let min_usd = query.min_usd.unwrap_or(DEFAULT_MIN_USD);
    let running = state.symbol_manager.running_symbols();

    let metrics_snapshot = state.metrics.snapshot();
    let metrics_json: HashMap<String, Value> = metrics_snapshot
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::to_value(v).unwrap_or(Value::Null)))
        .collect();

    let mut large_levels: HashMap<String, Value> = HashMap::new();
    for raw in &running {
        let normalized = normalize_venue_a(raw);
        let sources = state.books.sources_for(normalized_of, &normalized);
        let mut per_venue: HashMap<String, Vec<LargeLevel>> = HashMap::new();
        for src in &sources {
            let venue_key = match src.venue {
                Venue::A => "venue_a",
                Venue::B => "venue_b",
            };
            let mut levels: Vec<LargeLevel> = Vec::new();
            for lvl in state.books.top(src.venue, &src.raw, Side::Bid, usize::MAX) {
                let notional = lvl.price * lvl.size;
                if notional >= min_usd {
                    levels.push(LargeLevel { price: lvl.price, size: lvl.size, notional, side: "bid" });
                }
            }
            for lvl in state.books.top(src.venue, &src.raw, Side::Ask, usize::MAX) {
                let notional = lvl.price * lvl.size;
                if notional >= min_usd {
                    levels.push(LargeLevel { price: lvl.price, size: lvl.size, notional, side: "ask" });
                }
            }
            levels.sort_by(|a, b| b.notional.partial_cmp(&a.notional).unwrap_or(std::cmp::Ordering::Equal));
            per_venue.entry(venue_key.to_string()).or_default().extend(levels);
        }
        large_levels.insert(raw.clone(), serde_json::to_value(per_venue).unwrap_or(Value::Null));
    }

    Json(json!({
        "ok": true,
        "running_symbols": running,
        "metrics": metrics_json,
        "large_levels": large_levels,
        "min_usd": min_usd,
    }))
}

#[derive(Debug, Deserialize)]
pub struct BooksQuery {
    pub symbol: Option<String>,
}

fn book_view(state: &AppState, venue: Venue, raw: &str) -> Value {
    let (best_bid, best_ask) = state.books.best_bid_ask(venue, raw);
    let bids = state.books.top(venue, raw, Side::Bid, 100);
    let asks = state.books.top(venue, raw, Side::Ask, 100);
    json!({
        "raw": raw,
        "best_bid": best_bid,
        "best_ask": best_ask,
        "bids": bids,
        "asks": asks,
    })
}

pub async fn books(State(state): State<AppState>, Query(query): Query<BooksQuery>) -> Result<Json<Value>, ApiError> {
    let base = query.symbol.ok_or(ApiError::MissingParam("symbol"))?;
    let normalized = format!("{}USD", base.to_ascii_uppercase());
    let sources = state.books.sources_for(normalized_of, &normalized);

    let mut books = serde_json::Map::new();
    for src in &sources {
        let key = match src.venue {
            Venue::A => "venue_a",
            Venue::B => "venue_b",
        };
        books.insert(key.to_string(), book_view(&state, src.venue, &src.raw));
    }

    Ok(Json(json!({
        "ok": true,
        "symbol": base,
        "books": books,
    })))
}

pub async fn last(State(state): State<AppState>) -> Json<Value> {
    let last_scan = state.symbol_manager.last_scan();
    let last_findings = state.alerts.trail();
    Json(json!({
        "ok": true,
        "last_scan": last_scan,
        "last_findings": last_findings,
    }))
}
