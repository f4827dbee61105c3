use crate::error::ExecutorError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// The DCA section of a bot's config snapshot. The snapshot is immutable
/// for the duration of a run, so this struct is parsed once at bot start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DcaConfig {
    /// Quote-asset size of the entry order.
    pub base_order_size: Decimal,
    /// Quote-asset size of each DCA order before dynamic scaling.
    pub dca_order_size: Decimal,
    pub max_dcas_per_position: u32,
    /// Cap on DCA orders across all symbols within one run.
    pub max_dcas_global: Option<u32>,
    /// Cap on total quote invested in one position.
    pub max_investment_per_position: Option<Decimal>,
    /// Stop averaging down once the position's loss exceeds this percent.
    pub stop_dca_on_loss_pct: Option<Decimal>,
    pub rule: DcaRule,
    pub cooldown: Option<Cooldown>,
    pub sizing: SizingConfig,
    pub profit: ProfitConfig,
}

impl Default for DcaConfig {
    fn default() -> Self {
        Self {
            base_order_size: dec!(100),
            dca_order_size: dec!(100),
            max_dcas_per_position: 3,
            max_dcas_global: None,
            max_investment_per_position: None,
            stop_dca_on_loss_pct: None,
            rule: DcaRule::default(),
            cooldown: None,
            sizing: SizingConfig::default(),
            profit: ProfitConfig::default(),
        }
    }
}

impl DcaConfig {
    /// Extracts the `dca` section from a bot config snapshot.
    pub fn from_bot_config(config: &serde_json::Value) -> Result<Self, ExecutorError> {
        match config.get("dca") {
            Some(section) => serde_json::from_value(section.clone())
                .map_err(|e| ExecutorError::BadConfig(format!("dca section: {e}"))),
            None => Ok(Self::default()),
        }
    }

    /// The scaled DCA order size: each multiplier clamped to
    /// `[0.25, 4.0]`, their product clamped to `[0.1, 10.0]`, and `1.0`
    /// wherever the feature is disabled.
    pub fn dca_amount(&self) -> Decimal {
        if !self.sizing.enabled {
            return self.dca_order_size;
        }
        let product = clamp_mul(self.sizing.volatility_mul)
            * clamp_mul(self.sizing.sr_mul)
            * clamp_mul(self.sizing.sentiment_mul);
        let scale = product.clamp(dec!(0.1), dec!(10.0));
        self.dca_order_size * scale
    }
}

fn clamp_mul(value: Decimal) -> Decimal {
    value.clamp(dec!(0.25), dec!(4.0))
}

/// How a DCA buy is triggered while a position is open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DcaRule {
    /// `price <= last_entry_price * (1 - pct/100)`
    DownFromLastEntry { pct: Decimal },
    /// `price <= avg_entry_price * (1 - pct/100)`
    DownFromAveragePrice { pct: Decimal },
    /// `(avg_entry_price - price) / avg_entry_price >= pct/100`
    LossByPercent { pct: Decimal },
    /// `(avg_entry_price - price) * qty >= amount`
    LossByAmount { amount: Decimal },
    /// The referenced condition fingerprint triggered.
    CustomCondition { fingerprint: String },
}

impl Default for DcaRule {
    fn default() -> Self {
        DcaRule::DownFromLastEntry { pct: dec!(2) }
    }
}

/// Suppresses DCA fills for a window after the last entry, per symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cooldown {
    Bars(u32),
    Minutes(u32),
}

/// Optional multipliers on the DCA order size. Disabled features
/// contribute `1.0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    pub enabled: bool,
    pub volatility_mul: Decimal,
    pub sr_mul: Decimal,
    pub sentiment_mul: Decimal,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            volatility_mul: Decimal::ONE,
            sr_mul: Decimal::ONE,
            sentiment_mul: Decimal::ONE,
        }
    }
}

/// One partial profit target: sell `size_pct` of remaining qty once
/// unrealized pnl reaches `gain_pct`. One-shot per target per position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfitTarget {
    pub gain_pct: Decimal,
    pub size_pct: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailingConfig {
    /// Arm the trail once unrealized pnl reaches this percent.
    pub arm_pct: Decimal,
    /// Sell everything when price falls this percent from the peak.
    pub trail_pct: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeExitConfig {
    pub max_hold_days: u32,
    /// Only exit on age if at least this much unrealized gain exists.
    pub min_exit_pct: Decimal,
}

/// The three profit-taking mechanisms, evaluated in this order: partial
/// targets, trailing stop, time-based exit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfitConfig {
    pub targets: Vec<ProfitTarget>,
    pub trailing: Option<TrailingConfig>,
    pub time_exit: Option<TimeExitConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_from_an_empty_config() {
        let config = DcaConfig::from_bot_config(&serde_json::json!({})).unwrap();
        assert_eq!(config.max_dcas_per_position, 3);
        assert_eq!(config.dca_amount(), config.dca_order_size);
    }

    #[test]
    fn dca_section_round_trips() {
        let config = DcaConfig::from_bot_config(&serde_json::json!({
            "dca": {
                "base_order_size": "250",
                "dca_order_size": "125",
                "max_dcas_per_position": 5,
                "rule": {"kind": "down_from_average_price", "pct": "1.5"},
                "cooldown": {"bars": 3},
                "profit": {
                    "targets": [{"gain_pct": "3", "size_pct": "50"}],
                    "trailing": {"arm_pct": "5", "trail_pct": "2"}
                }
            }
        }))
        .unwrap();
        assert_eq!(config.base_order_size, dec!(250));
        assert_eq!(config.max_dcas_per_position, 5);
        assert_eq!(
            config.rule,
            DcaRule::DownFromAveragePrice { pct: dec!(1.5) }
        );
        assert_eq!(config.cooldown, Some(Cooldown::Bars(3)));
        assert_eq!(config.profit.targets.len(), 1);
    }

    #[test]
    fn sizing_multipliers_are_clamped() {
        let mut config = DcaConfig::default();
        config.dca_order_size = dec!(100);
        config.sizing = SizingConfig {
            enabled: true,
            volatility_mul: dec!(100),  // clamps to 4
            sr_mul: dec!(4),            // stays 4
            sentiment_mul: dec!(0.0001), // clamps to 0.25
        };
        // 4 * 4 * 0.25 = 4, inside the product clamp.
        assert_eq!(config.dca_amount(), dec!(400));

        config.sizing.sentiment_mul = dec!(4);
        // 4 * 4 * 4 = 64 clamps to 10.
        assert_eq!(config.dca_amount(), dec!(1000));

        config.sizing.enabled = false;
        assert_eq!(config.dca_amount(), dec!(100));
    }

    #[test]
    fn malformed_dca_section_is_rejected() {
        let result = DcaConfig::from_bot_config(&serde_json::json!({
            "dca": {"rule": {"kind": "down_from_the_moon"}}
        }));
        assert!(matches!(result, Err(ExecutorError::BadConfig(_))));
    }
}
