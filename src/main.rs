//! depthwatch — multi-venue order-book and flow metrics service.
//!
//! Bootstraps the book/trade stores, starts the venue-A symbol manager and
//! its seed symbols, the venue-B multi-pair worker, the metrics aggregator
//! and feature/alert engine, then serves the read-only query surface.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use clap::Parser;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use depthwatch_backend::{
    alerts::AlertEngine,
    api,
    book::BookStore,
    config::Config,
    error::ErrorSink,
    metrics::MetricsAggregator,
    state::AppState,
    symbol_manager::SymbolManager,
    trades::TradeStore,
    universe::{UniverseSampler, VenueAUniverseEndpoints},
    venue_a::{self, VenueAEndpoints},
    venue_b::{VenueBEndpoints, VenueBWorker},
};

#[derive(Debug, Parser)]
#[command(name = "depthwatch", about = "Multi-venue order-book and flow metrics service")]
struct Cli {
    /// Path to the JSON config file; every key is also overridable by an
    /// upper-cased env var of the same name.
    #[arg(long, env = "CONFIG_PATH", default_value = "./config.json")]
    config: PathBuf,

    /// Overrides the config file's `port`.
    #[arg(long)]
    port: Option<u16>,

    /// Overrides `RUST_LOG`/defaults to `info`.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn load_env() {
    let _ = dotenv();
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    for candidate in [manifest_dir.join(".env"), manifest_dir.join("../.env")] {
        if candidate.exists() {
            let _ = dotenv::from_path(&candidate);
        }
    }
}

fn init_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| format!("depthwatch_backend={log_level},tower_http=info").into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let mut config = Config::load(&cli.config).context("loading configuration")?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    let config = Arc::new(config);

    let books = BookStore::new();
    let trades = TradeStore::new();
    let errors = Arc::new(ErrorSink::new());

    let sampler = UniverseSampler::with_refresh_interval(VenueAUniverseEndpoints::default(), errors.clone(), config.universe_refresh_sec);
    let symbol_manager = SymbolManager::new(
        books.clone(),
        trades.clone(),
        errors.clone(),
        sampler,
        VenueAEndpoints::default(),
        config.depth_limit,
        config.max_symbols,
        config.seed_symbols.clone(),
    );
    symbol_manager.bootstrap().await;
    let _scan_loop = symbol_manager.clone().spawn_scan_loop(config.scan_interval_sec);

    if !config.venue_b_pairs.is_empty() {
        let venue_b = Arc::new(VenueBWorker {
            pairs: config.venue_b_pairs.clone(),
            books: books.clone(),
            trades: trades.clone(),
            errors: errors.clone(),
            endpoints: VenueBEndpoints::default(),
            depth: config.depth_limit,
            stop: venue_a::StopSignal::new(),
        });
        let _venue_b_handle = venue_b.spawn();
    }

    let metrics = MetricsAggregator::new(books.clone(), trades.clone(), config.metrics_band_pct, config.large_trade_size, config.trade_window_sec);
    let _metrics_loop = metrics.clone().spawn_loop();

    let alert_engine = AlertEngine::new(metrics.clone(), config.threshold_orange, config.threshold_green, config.alert_cooldown_sec);
    let _alert_loops = alert_engine.clone().spawn_loops();

    let state = AppState {
        config: config.clone(),
        books,
        trades,
        errors,
        symbol_manager,
        metrics,
        alerts: alert_engine,
    };

    let app = Router::new()
        .route("/", get(api::root))
        .route("/universe", get(api::universe))
        .route("/signal", get(api::signal))
        .route("/books", get(api::books))
        .route("/last", get(api::last))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(%addr, "depthwatch listening");
    let listener = TcpListener::bind(addr).await.context("binding listener")?;
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "server exited with error");
    }

    Ok(())
}
