//! Cross-module scenarios from spec.md §8 that don't fit naturally inside
//! a single module's `#[cfg(test)]` block.

use std::sync::Arc;

use depthwatch_backend::{
    alerts::AlertEngine,
    book::{BookStore, Venue},
    error::ErrorSink,
    metrics::MetricsAggregator,
    symbol_manager::SymbolManager,
    trades::TradeStore,
    universe::{UniverseSampler, VenueAUniverseEndpoints},
    venue_a::VenueAEndpoints,
};

fn unreachable_endpoints() -> VenueAEndpoints {
    VenueAEndpoints {
        rest_base: "http://127.0.0.1:1".to_string(),
        ws_base: "ws://127.0.0.1:1".to_string(),
    }
}

/// S1: seeds=[ABCUSDT], max_symbols=2, sampler unreachable (falls back to
/// seeds) -> after bootstrap, running == {ABCUSDT}. With a live sampler
/// returning additional targets the manager would fill up to the cap; here
/// we assert the seed-preservation half of the invariant, which does not
/// depend on network access.
#[tokio::test]
async fn scenario_s1_seed_always_present_and_cap_respected() {
    let errors = Arc::new(ErrorSink::new());
    let sampler = UniverseSampler::new(
        VenueAUniverseEndpoints {
            rest_base: "http://127.0.0.1:1".to_string(),
        },
        errors.clone(),
    );
    let manager = SymbolManager::new(
        BookStore::new(),
        TradeStore::new(),
        errors,
        sampler,
        unreachable_endpoints(),
        100,
        2,
        vec!["ABCUSDT".to_string()],
    );

    manager.bootstrap().await;
    let running = manager.running_symbols();
    assert!(running.contains(&"ABCUSDT".to_string()));
    assert!(running.len() <= 2);

    manager.run_cycle().await;
    assert!(manager.running_symbols().contains(&"ABCUSDT".to_string()));
    assert!(manager.running_symbols().len() <= 2);
}

/// S4 + S8: a venue-A book and a venue-B book for the same economic
/// instrument merge into one normalized key, and the merged mid matches
/// the cross-venue average.
#[test]
fn scenario_s4_s8_normalized_keys_merge_across_venues() {
    let books = BookStore::new();
    let trades = TradeStore::new();
    books.apply_snapshot(Venue::A, "XYZUSDT", &[("10.0".to_string(), 1.0)], &[("10.04".to_string(), 1.0)], Some(1));
    books.apply_snapshot(Venue::B, "XYZ/USD", &[("10.02".to_string(), 1.0)], &[("10.03".to_string(), 1.0)], None);

    let aggregator = MetricsAggregator::new(books, trades, 0.01, 100_000.0, 300);
    aggregator.recompute();
    let snapshot = aggregator.snapshot();
    let merged = snapshot.get("XYZUSD").expect("venue-A and venue-B merge to one key");
    assert_eq!(merged.mid, 10.025);
}

/// S5: a freshly-observed key has far fewer than 30 one-per-second samples
/// in its 60s ring, so it scores 0 and never reaches the alert trail,
/// regardless of how extreme its instantaneous imbalance is.
#[test]
fn scenario_s5_insufficient_history_never_alerts() {
    let books = BookStore::new();
    let trades = TradeStore::new();
    // Deliberately extreme imbalance (80 vs 20) so the *only* thing
    // preventing an alert is the sample-count gate, not the score itself.
    books.apply_snapshot(Venue::A, "KUSDT", &[("100.0".to_string(), 80.0)], &[("100.2".to_string(), 20.0)], Some(1));

    let metrics = MetricsAggregator::new(books, trades, 0.01, 100_000.0, 300);
    metrics.recompute();

    let alerts = AlertEngine::new(metrics, 80, 65, 1200);
    alerts.sample(); // a single sample is nowhere near the 30-sample floor.
    alerts.score();

    assert!(alerts.trail().iter().all(|a| a.key != "KUSD"));
}
