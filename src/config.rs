//! Configuration: a JSON file seeding defaults, with every recognized key
//! overridable by an upper-cased environment variable of the same name.
//! See spec.md §3/§6 for the recognized option table.

use std::{collections::HashMap, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub depth_limit: u32,
    pub metrics_band_pct: f64,
    pub large_trade_size: f64,
    pub trade_window_sec: u64,
    pub max_symbols: usize,
    pub scan_interval_sec: u64,
    pub port: u16,
    pub universe_refresh_sec: u64,
    pub threshold_orange: i32,
    pub threshold_green: i32,
    pub alert_cooldown_sec: i64,
    pub enable_global_scan: bool,
    pub global_scan_every_sec: u64,
    pub seed_symbols: Vec<String>,
    pub venue_b_pairs: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            depth_limit: 100,
            metrics_band_pct: 0.01,
            large_trade_size: 100_000.0,
            trade_window_sec: 300,
            max_symbols: 25,
            scan_interval_sec: 600,
            port: 8080,
            universe_refresh_sec: 900,
            threshold_orange: 80,
            threshold_green: 65,
            alert_cooldown_sec: 1200,
            enable_global_scan: true,
            global_scan_every_sec: 300,
            seed_symbols: Vec::new(),
            venue_b_pairs: Vec::new(),
        }
    }
}

impl Config {
    /// Load from `path` if it exists, then apply environment overrides.
    /// A missing file falls back to defaults (only a malformed *existing*
    /// file is fatal); env overrides always apply on top.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut cfg = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            serde_json::from_str::<Config>(&raw)?
        } else {
            Config::default()
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        let env: HashMap<String, String> = std::env::vars().collect();

        macro_rules! parsed {
            ($key:literal, $field:expr) => {
                if let Some(v) = env.get($key) {
                    if let Ok(parsed) = v.parse() {
                        $field = parsed;
                    }
                }
            };
        }

        parsed!("DEPTH_LIMIT", self.depth_limit);
        parsed!("METRICS_BAND_PCT", self.metrics_band_pct);
        parsed!("LARGE_TRADE_SIZE", self.large_trade_size);
        parsed!("TRADE_WINDOW_SEC", self.trade_window_sec);
        parsed!("MAX_SYMBOLS", self.max_symbols);
        parsed!("SCAN_INTERVAL_SEC", self.scan_interval_sec);
        parsed!("PORT", self.port);
        parsed!("UNIVERSE_REFRESH_SEC", self.universe_refresh_sec);
        parsed!("THRESHOLD_ORANGE", self.threshold_orange);
        parsed!("THRESHOLD_GREEN", self.threshold_green);
        parsed!("ALERT_COOLDOWN_SEC", self.alert_cooldown_sec);
        parsed!("ENABLE_GLOBAL_SCAN", self.enable_global_scan);
        parsed!("GLOBAL_SCAN_EVERY_SEC", self.global_scan_every_sec);

        if let Some(v) = env.get("SEED_SYMBOLS") {
            self.seed_symbols = split_list(v);
        }
        if let Some(v) = env.get("VENUE_B_PAIRS") {
            self.venue_b_pairs = split_list(v);
        }
    }
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
