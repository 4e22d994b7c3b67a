//! Typed application configuration.
//!
//! One flat struct carries every key the core consumes; callers construct it
//! (or load it from a JSON file) and pass it down explicitly. Nothing in the
//! workspace reads configuration from global state. Unknown keys in the file
//! are ignored so the core can share a settings file with outer tooling.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Full configuration surface. Field names double as the JSON keys.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    // Data source
    pub data_source: String,
    pub tushare_token: String,
    pub csv_data_path: String,
    pub csv_loop: bool,
    pub csv_speed: f64,
    pub sim_interval: f64,
    pub sim_volatility: f64,
    pub http_data_interval: f64,

    // Trading
    pub initial_capital: f64,
    pub commission_rate: f64,
    pub slippage: f64,
    pub strategy_auto_execute: bool,

    // Broker
    pub broker_type: String,
    pub broker_account: String,
    pub broker_password: String,
    pub broker_api_url: String,
    pub broker_api_key: String,
    pub broker_api_secret: String,
    pub broker_api_verify_ssl: bool,
    pub broker_api_client_cert: String,
    pub api_poll_interval: u64,
    pub api_timeout: u64,

    // Risk
    pub max_position_pct: f64,
    pub max_total_position_pct: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub trailing_stop_pct: f64,
    pub max_drawdown_pct: f64,
    pub max_daily_trades: u32,
    pub max_daily_loss: f64,
    pub min_trade_interval: u64,
    pub max_price_deviation: f64,
    pub risk_journal_path: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_source: "akshare".to_string(),
            tushare_token: String::new(),
            csv_data_path: String::new(),
            csv_loop: false,
            csv_speed: 1.0,
            sim_interval: 1.0,
            sim_volatility: 0.01,
            http_data_interval: 2.0,

            initial_capital: 1_000_000.0,
            commission_rate: 0.0003,
            slippage: 0.001,
            strategy_auto_execute: true,

            broker_type: "simulated".to_string(),
            broker_account: String::new(),
            broker_password: String::new(),
            broker_api_url: String::new(),
            broker_api_key: String::new(),
            broker_api_secret: String::new(),
            broker_api_verify_ssl: true,
            broker_api_client_cert: String::new(),
            api_poll_interval: 3,
            api_timeout: 8,

            max_position_pct: 30.0,
            max_total_position_pct: 80.0,
            stop_loss_pct: 5.0,
            take_profit_pct: 10.0,
            trailing_stop_pct: 0.0,
            max_drawdown_pct: 20.0,
            max_daily_trades: 50,
            max_daily_loss: 50_000.0,
            min_trade_interval: 60,
            max_price_deviation: 3.0,
            risk_journal_path: "./logs/risk_journal.csv".to_string(),
        }
    }
}

impl AppConfig {
    /// Load from a JSON settings file. Missing keys fall back to defaults;
    /// unknown keys are ignored.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config: {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("parse config: {}", path.display()))
    }

    /// Persist as pretty JSON, creating parent directories as needed.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("create config dir: {}", dir.display()))?;
            }
        }
        let text = serde_json::to_string_pretty(self).context("serialize config")?;
        std::fs::write(path, text).with_context(|| format!("write config: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.data_source, "akshare");
        assert_eq!(cfg.broker_type, "simulated");
        assert!((cfg.initial_capital - 1_000_000.0).abs() < 1e-9);
        assert!((cfg.commission_rate - 0.0003).abs() < 1e-12);
        assert!((cfg.slippage - 0.001).abs() < 1e-12);
        assert_eq!(cfg.max_daily_trades, 50);
        assert_eq!(cfg.min_trade_interval, 60);
        assert!((cfg.max_price_deviation - 3.0).abs() < 1e-12);
        assert_eq!(cfg.api_poll_interval, 3);
        assert!(cfg.strategy_auto_execute);
        assert!(cfg.broker_api_verify_ssl);
    }

    #[test]
    fn json_round_trip_preserves_values() {
        let mut cfg = AppConfig::default();
        cfg.data_source = "csv".to_string();
        cfg.csv_data_path = "/tmp/quotes.csv".to_string();
        cfg.max_drawdown_pct = 15.0;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        cfg.save_json(&path).unwrap();

        let loaded = AppConfig::load_json(&path).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults_and_ignores_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"data_source": "simulated", "theme": "dark", "sim_interval": 0.5}"#,
        )
        .unwrap();

        let loaded = AppConfig::load_json(&path).unwrap();
        assert_eq!(loaded.data_source, "simulated");
        assert!((loaded.sim_interval - 0.5).abs() < 1e-12);
        // Untouched keys keep defaults.
        assert_eq!(loaded.broker_type, "simulated");
        assert_eq!(loaded.max_daily_trades, 50);
    }

    #[test]
    fn load_missing_file_errors() {
        assert!(AppConfig::load_json("/nonexistent/path/settings.json").is_err());
    }
}
