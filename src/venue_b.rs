//! Venue-B Stream Worker (C4): one socket subscribed to book + trade
//! channels for a configured set of pairs. Spec.md §4.4.
//!
//! Venue B delivers a full snapshot on every (re)subscription and carries no
//! sequence id, so recovery is by reconnect rather than gap detection.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use crate::{
    book::{format_price, BookStore, Venue},
    error::ErrorSink,
    trades::{Side as TradeSide, Trade, TradeStore},
    venue_a::StopSignal,
};

use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct VenueBEndpoints {
    pub ws_url: String,
}

impl Default for VenueBEndpoints {
    fn default() -> Self {
        Self {
            ws_url: "wss://ws.kraken.com/".to_string(),
        }
    }
}

const BASE_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub struct VenueBWorker {
    pub pairs: Vec<String>,
    pub books: Arc<BookStore>,
    pub trades: Arc<TradeStore>,
    pub errors: Arc<ErrorSink>,
    pub endpoints: VenueBEndpoints,
    pub depth: u32,
    pub stop: Arc<StopSignal>,
}

impl VenueBWorker {
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run_loop().await })
    }

    async fn run_loop(&self) {
        if self.pairs.is_empty() {
            return;
        }
        let mut attempt: u32 = 0;
        while !self.stop.is_stopped() {
            match self.run_once().await {
                Ok(()) => attempt = 0,
                Err(e) => {
                    self.errors.record("venue_b", e.to_string());
                    let shift = attempt.min(5);
                    let backoff = BASE_BACKOFF.saturating_mul(1u32 << shift).min(MAX_BACKOFF);
                    warn!(attempt, backoff_ms = backoff.as_millis() as u64, "venue_b reconnect backoff");
                    attempt = attempt.saturating_add(1);
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn run_once(&self) -> anyhow::Result<()> {
        let (ws_stream, _) = connect_async(&self.endpoints.ws_url).await?;
        let (mut write, mut read) = ws_stream.split();

        let book_sub = json!({
            "event": "subscribe",
            "pair": self.pairs,
            "subscription": { "name": "book", "depth": self.depth },
        });
        let trade_sub = json!({
            "event": "subscribe",
            "pair": self.pairs,
            "subscription": { "name": "trade" },
        });
        write.send(Message::Text(book_sub.to_string())).await?;
        write.send(Message::Text(trade_sub.to_string())).await?;

        loop {
            if self.stop.is_stopped() {
                return Ok(());
            }
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_frame(&text),
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Err(anyhow::anyhow!("venue_b socket closed"));
                        }
                        Some(Err(e)) => return Err(e.into()),
                        _ => {}
                    }
                }
                _ = tokio::time::sleep(Duration::from_secs(20)) => {
                    return Err(anyhow::anyhow!("venue_b idle timeout"));
                }
            }
        }
    }

    fn handle_frame(&self, text: &str) {
        let Ok(value) = serde_json::from_str::<Value>(text) else {
            self.errors.record("venue_b", "unparseable frame");
            return;
        };
        match &value {
            // Heartbeats and subscription acks arrive as JSON objects.
            Value::Object(_) => {
                debug!("venue_b event/heartbeat frame");
            }
            Value::Array(items) if items.len() >= 4 => {
                let payload = &items[1];
                let pair = items[items.len() - 1].as_str().unwrap_or("");
                if pair.is_empty() {
                    self.errors.record("venue_b", "frame missing pair suffix");
                    return;
                }
                if payload.is_array() {
                    self.handle_trade_payload(pair, payload);
                } else if payload.is_object() {
                    self.handle_book_payload(pair, payload);
                } else {
                    self.errors.record("venue_b", "unknown payload shape");
                }
            }
            _ => {
                self.errors.record("venue_b", "unrecognized frame shape");
            }
        }
    }

    fn handle_book_payload(&self, pair: &str, payload: &Value) {
        let is_snapshot = payload.get("as").is_some() || payload.get("bs").is_some();
        let asks = payload
            .get("as")
            .or_else(|| payload.get("a"))
            .and_then(Value::as_array)
            .map(|v| extract_levels(v))
            .unwrap_or_default();
        let bids = payload
            .get("bs")
            .or_else(|| payload.get("b"))
            .and_then(Value::as_array)
            .map(|v| extract_levels(v))
            .unwrap_or_default();

        if is_snapshot {
            self.books.apply_snapshot(Venue::B, pair, &bids, &asks, None);
        } else {
            self.books.apply_delta(Venue::B, pair, &bids, &asks, None);
        }
    }

    fn handle_trade_payload(&self, pair: &str, payload: &Value) {
        let Some(entries) = payload.as_array() else {
            return;
        };
        for entry in entries {
            let Some(tuple) = entry.as_array() else { continue };
            let (Some(price), Some(size), Some(ts)) = (
                tuple.first().and_then(as_f64),
                tuple.get(1).and_then(as_f64),
                tuple.get(2).and_then(as_f64),
            ) else {
                continue;
            };
            let aggressor = tuple.get(3).and_then(Value::as_str).unwrap_or("s");
            let side = if aggressor == "b" { TradeSide::Buy } else { TradeSide::Sell };
            self.trades.push(
                Venue::B,
                pair,
                Trade {
                    price,
                    size,
                    side,
                    timestamp_ms: (ts * 1000.0) as i64,
                },
            );
        }
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn extract_levels(raw: &[Value]) -> Vec<(String, f64)> {
    raw.iter()
        .filter_map(|lvl| {
            let tuple = lvl.as_array()?;
            let price = as_f64(tuple.first()?)?;
            let size = as_f64(tuple.get(1)?)?;
            Some((format_price(price), size))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trades::TradeStore;

    fn worker() -> VenueBWorker {
        VenueBWorker {
            pairs: vec!["XRP/USD".to_string()],
            books: BookStore::new(),
            trades: TradeStore::new(),
            errors: Arc::new(ErrorSink::new()),
            endpoints: VenueBEndpoints::default(),
            depth: 10,
            stop: StopSignal::new(),
        }
    }

    #[test]
    fn snapshot_frame_seeds_book() {
        let w = worker();
        let frame = r#"[0,{"as":[["11.0","2.0","123"]],"bs":[["10.0","1.0","123"]]},"book-10","XRP/USD"]"#;
        w.handle_frame(frame);
        let (bid, ask) = w.books.best_bid_ask(Venue::B, "XRP/USD");
        assert_eq!(bid, Some(10.0));
        assert_eq!(ask, Some(11.0));
    }

    #[test]
    fn delta_frame_deletes_zero_size_level() {
        let w = worker();
        w.handle_frame(r#"[0,{"as":[["11.0","2.0","123"]],"bs":[["10.0","1.0","123"]]},"book-10","XRP/USD"]"#);
        w.handle_frame(r#"[0,{"b":[["10.0","0","124"]]},"book-10","XRP/USD"]"#);
        let (bid, _) = w.books.best_bid_ask(Venue::B, "XRP/USD");
        assert_eq!(bid, None);
    }

    #[test]
    fn trade_frame_derives_aggressor_side() {
        let w = worker();
        let frame = r#"[0,[["10.5","1.2","1690000000.1","b","l",""],["10.4","0.5","1690000001.2","s","m",""]],"trade","XRP/USD"]"#;
        w.handle_frame(frame);
        let trades = w.trades.iterate_since(Venue::B, "XRP/USD", 0);
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].side, TradeSide::Buy);
        assert_eq!(trades[1].side, TradeSide::Sell);
    }

    #[test]
    fn unknown_shape_goes_to_error_sink_not_panic() {
        let w = worker();
        w.handle_frame(r#"{"event":"heartbeat"}"#);
        w.handle_frame(r#"[1,2]"#);
        assert!(!w.errors.snapshot().is_empty());
    }
}
