//! Configuration loading.
//!
//! Settings come from a `.config` file of `KEY=VALUE` lines. A small set of
//! sensitive keys can be overridden from the environment so secrets never
//! have to live in the file.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use thiserror::Error;
use tracing::warn;

/// Keys that the environment may override.
const ENV_OVERRIDES: [&str; 3] = ["WOOX_API_KEY", "WOOX_API_SECRET", "TRADE_MODE"];

pub const DEFAULT_CONFIG_PATH: &str = ".config";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Paper trading simulates fills locally; live trading routes orders to the
/// exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeMode {
    Paper,
    Live,
}

impl TradeMode {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "live" => TradeMode::Live,
            "paper" => TradeMode::Paper,
            other => {
                if !other.is_empty() {
                    warn!("Unknown TRADE_MODE '{}', defaulting to paper", other);
                }
                TradeMode::Paper
            }
        }
    }

    /// Each mode keeps its own transaction ledger.
    pub fn database_file(&self) -> &'static str {
        match self {
            TradeMode::Paper => "paper_transaction.db",
            TradeMode::Live => "live_transaction.db",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeMode::Paper => "paper",
            TradeMode::Live => "live",
        }
    }
}

impl fmt::Display for TradeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    values: HashMap<String, String>,
}

impl Config {
    /// Load from the default `.config` path, applying environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_file(DEFAULT_CONFIG_PATH)
    }

    /// Load from an explicit path. A missing file yields an empty config so
    /// the bot can run entirely from environment variables and defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut values = HashMap::new();

        if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
            for line in raw.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    let value = value.trim().trim_matches('"').trim_matches('\'');
                    values.insert(key.trim().to_string(), value.to_string());
                }
            }
        } else {
            warn!("Config file {} not found, using defaults", path.display());
        }

        let mut config = Config { values };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        for key in ENV_OVERRIDES {
            if let Ok(value) = std::env::var(key) {
                if !value.is_empty() {
                    self.values.insert(key.to_string(), value);
                }
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_str(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    /// Numeric accessor that falls back to the default on a malformed value,
    /// with a warning, rather than failing startup.
    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        match self.get(key) {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!("Invalid value '{}' for {}, using default {}", raw, key, default);
                default
            }),
            None => default,
        }
    }

    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        match self.get(key) {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!("Invalid value '{}' for {}, using default {}", raw, key, default);
                default
            }),
            None => default,
        }
    }

    pub fn get_usize(&self, key: &str, default: usize) -> usize {
        match self.get(key) {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!("Invalid value '{}' for {}, using default {}", raw, key, default);
                default
            }),
            None => default,
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }

    pub fn trade_mode(&self) -> TradeMode {
        TradeMode::parse(&self.get_str("TRADE_MODE", "paper"))
    }

    /// Symbol with the venue prefix applied. A bare symbol like `BTC_USDT`
    /// is prefixed from TRADE_TYPE (`SPOT_` or `PERP_`) with a warning, so
    /// older config files keep working.
    pub fn symbol(&self) -> String {
        let raw = self.get_str("SYMBOL", "SPOT_BTC_USDT");
        if raw.starts_with("SPOT_") || raw.starts_with("PERP_") {
            return raw;
        }
        let trade_type = self.get_str("TRADE_TYPE", "spot").to_lowercase();
        let prefix = if trade_type == "perp" { "PERP_" } else { "SPOT_" };
        let prefixed = format!("{}{}", prefix, raw);
        warn!(
            "SYMBOL '{}' has no venue prefix, using '{}' from TRADE_TYPE",
            raw, prefixed
        );
        prefixed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let mut config = Config::default();
        for (k, v) in pairs {
            config.set(k, v);
        }
        config
    }

    #[test]
    fn test_file_parsing() {
        let dir = std::env::temp_dir().join("woox_trader_config_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(".config");
        std::fs::write(
            &path,
            "# comment line\nSYMBOL=\"SPOT_ETH_USDT\"\nSTOP_LOSS_PCT = 2.5\n\nBAD LINE\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.get("SYMBOL"), Some("SPOT_ETH_USDT"));
        assert_eq!(config.get_f64("STOP_LOSS_PCT", 2.0), 2.5);
        assert_eq!(config.get("BAD LINE"), None);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let config = Config::from_file("/nonexistent/path/.config").unwrap();
        assert_eq!(config.get("SYMBOL"), None);
    }

    #[test]
    fn test_typed_accessors_fall_back_on_garbage() {
        let config = config_from(&[("RSI_PERIOD", "fourteen")]);
        assert_eq!(config.get_usize("RSI_PERIOD", 14), 14);
        assert_eq!(config.get_f64("MISSING", 1.5), 1.5);
    }

    #[test]
    fn test_trade_mode_parse() {
        assert_eq!(TradeMode::parse("live"), TradeMode::Live);
        assert_eq!(TradeMode::parse("LIVE"), TradeMode::Live);
        assert_eq!(TradeMode::parse("paper"), TradeMode::Paper);
        assert_eq!(TradeMode::parse("bogus"), TradeMode::Paper);
        assert_eq!(TradeMode::Paper.database_file(), "paper_transaction.db");
        assert_eq!(TradeMode::Live.database_file(), "live_transaction.db");
    }

    #[test]
    fn test_symbol_prefixing() {
        let config = config_from(&[("SYMBOL", "PERP_BTC_USDT")]);
        assert_eq!(config.symbol(), "PERP_BTC_USDT");

        let config = config_from(&[("SYMBOL", "BTC_USDT"), ("TRADE_TYPE", "perp")]);
        assert_eq!(config.symbol(), "PERP_BTC_USDT");

        let config = config_from(&[("SYMBOL", "BTC_USDT")]);
        assert_eq!(config.symbol(), "SPOT_BTC_USDT");
    }
}
