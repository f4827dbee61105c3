use crate::error::ConfigError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

/// The root configuration structure for the entire application.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub paper: PaperSettings,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Settings {
    /// Cross-field validation that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.cycle_secs == 0 {
            return Err(ConfigError::validation("engine.cycle_secs must be > 0"));
        }
        if self.engine.kline_limit < 2 {
            return Err(ConfigError::validation(
                "engine.kline_limit must be at least 2 (one closed bar plus the forming bar)",
            ));
        }
        if self.paper.initial_balance <= Decimal::ZERO {
            return Err(ConfigError::validation(
                "paper.initial_balance must be positive",
            ));
        }
        if self.paper.taker_fee_pct < Decimal::ZERO {
            return Err(ConfigError::validation("paper.taker_fee_pct must be >= 0"));
        }
        Ok(())
    }
}

/// Whether orders are filled by the paper broker or sent to the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum ExecutionMode {
    Paper,
    Live,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Paper
    }
}

/// Pacing, sizing, and timeout knobs for the shared evaluator and the
/// executor pool.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Evaluation cycle period in seconds.
    pub cycle_secs: u64,
    /// Bars fetched per (symbol, timeframe) group each cycle.
    pub kline_limit: u32,
    /// Timeout for one market-data fetch.
    pub market_data_timeout_secs: u64,
    /// Timeout for one order placement.
    pub order_timeout_secs: u64,
    /// Grace period for in-flight work when a bot is stopped.
    pub stop_deadline_secs: u64,
    /// Mark-price polling period for executor ticks.
    pub tick_secs: u64,
    /// Capacity of each subscriber/executor mailbox.
    pub mailbox_capacity: usize,
    pub execution_mode: ExecutionMode,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cycle_secs: 60,
            kline_limit: 200,
            market_data_timeout_secs: 10,
            order_timeout_secs: 15,
            stop_deadline_secs: 5,
            tick_secs: 10,
            mailbox_capacity: 64,
            execution_mode: ExecutionMode::Paper,
        }
    }
}

/// Parameters for the paper-trading broker.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaperSettings {
    /// Quote-asset balance each bot starts with.
    pub initial_balance: Decimal,
    /// Fee charged on every fill, as a fraction (0.001 = 10 bps).
    pub taker_fee_pct: Decimal,
    /// Market-order slippage in basis points. Zero for paper by default;
    /// settable in tests.
    pub slippage_bps: Decimal,
}

impl Default for PaperSettings {
    fn default() -> Self {
        Self {
            initial_balance: dec!(10000),
            taker_fee_pct: dec!(0.001),
            slippage_bps: Decimal::ZERO,
        }
    }
}

/// A single API key pair.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiKeys {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub secret: String,
}

/// Exchange credentials for both environments. Values normally come from
/// the environment (`STRATUM_API__PRODUCTION__KEY=...`), not the TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub production: ApiKeys,
    #[serde(default)]
    pub testnet: ApiKeys,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub filter: String,
    pub file_logging: bool,
    pub directory: String,
    pub file_prefix: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info,stratum=debug".to_string(),
            file_logging: false,
            directory: "logs".to_string(),
            file_prefix: "stratum.log".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.engine.cycle_secs, 60);
        assert_eq!(settings.engine.kline_limit, 200);
        assert_eq!(settings.paper.initial_balance, dec!(10000));
    }

    #[test]
    fn zero_cycle_period_is_rejected() {
        let mut settings = Settings::default();
        settings.engine.cycle_secs = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn toml_overrides_defaults() {
        let settings: Settings = config::Config::builder()
            .add_source(config::File::from_str(
                "[engine]\ncycle_secs = 30\n[paper]\ninitial_balance = \"5000\"",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(settings.engine.cycle_secs, 30);
        assert_eq!(settings.paper.initial_balance, dec!(5000));
        // Untouched sections keep their defaults.
        assert_eq!(settings.engine.kline_limit, 200);
    }
}
