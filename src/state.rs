//! Shared application state threaded through every HTTP handler (C9) and
//! background task. Each field is independently locked by the substate it
//! wraps; `AppState` itself holds only `Arc`s, so cloning it for a new
//! request is cheap and never takes a lock.

use std::sync::Arc;

use crate::{
    alerts::AlertEngine, book::BookStore, config::Config, error::ErrorSink, metrics::MetricsAggregator, symbol_manager::SymbolManager,
    trades::TradeStore,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub books: Arc<BookStore>,
    pub trades: Arc<TradeStore>,
    pub errors: Arc<ErrorSink>,
    pub symbol_manager: Arc<SymbolManager>,
    pub metrics: Arc<MetricsAggregator>,
    pub alerts: Arc<AlertEngine>,
}
