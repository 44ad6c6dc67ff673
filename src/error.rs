//! Error taxonomy and the bounded error sink (C10).
//!
//! Transient I/O and sequence-gap faults never propagate out of a worker;
//! they are pushed here and the worker keeps running. Only configuration
//! errors are fatal, and only caller errors reach the HTTP layer as 4xx.

use std::collections::VecDeque;

use axum::{http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;

/// Capacity shared by the error sink, the alert trail, and the last-findings
/// store: all three are append-mostly bounded FIFOs, oldest evicted.
pub const SINK_CAPACITY: usize = 200;

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEntry {
    pub source: String,
    pub message: String,
    pub ts: i64,
}

/// Bounded append-only ring. Single-writer per instance is assumed by
/// callers (one owning task pushes; any number of tasks may read).
#[derive(Debug)]
pub struct Bounded<T> {
    entries: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T: Clone> Bounded<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, item: T) {
        let mut guard = self.entries.lock();
        if guard.len() >= self.capacity {
            guard.pop_front();
        }
        guard.push_back(item);
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-wide, bounded log of caught (non-fatal) faults.
#[derive(Debug)]
pub struct ErrorSink {
    entries: Bounded<ErrorEntry>,
}

impl ErrorSink {
    pub fn new() -> Self {
        Self {
            entries: Bounded::new(SINK_CAPACITY),
        }
    }

    pub fn record(&self, source: impl Into<String>, message: impl Into<String>) {
        self.entries.push(ErrorEntry {
            source: source.into(),
            message: message.into(),
            ts: Utc::now().timestamp_millis(),
        });
    }

    pub fn snapshot(&self) -> Vec<ErrorEntry> {
        self.entries.snapshot()
    }
}

/// Fatal at startup: missing/malformed config file or an invalid value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found at {0}")]
    NotFound(String),
    #[error("malformed config json: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("io error reading config: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced to HTTP callers (C9). Anything else is logged and
/// converted into a 500 rather than leaking internals.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing required parameter: {0}")]
    MissingParam(&'static str),
    #[error("upstream request failed: {0}")]
    Upstream(String),
    #[error("unexpected error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            ApiError::MissingParam(_) => StatusCode::BAD_REQUEST,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({ "ok": false, "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_evicts_oldest() {
        let ring: Bounded<i32> = Bounded::new(3);
        for i in 0..5 {
            ring.push(i);
        }
        assert_eq!(ring.snapshot(), vec![2, 3, 4]);
    }

    #[test]
    fn error_sink_caps_at_200() {
        let sink = ErrorSink::new();
        for i in 0..250 {
            sink.record("test", format!("msg-{i}"));
        }
        let snap = sink.snapshot();
        assert_eq!(snap.len(), SINK_CAPACITY);
        assert_eq!(snap.first().unwrap().message, "msg-50");
        assert_eq!(snap.last().unwrap().message, "msg-249");
    }
}
