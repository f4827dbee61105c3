use crate::error::IndicatorError;
use crate::{closes, highs, lows, series, volumes};
use core_types::Bar;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The indicators the kernel computes natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorKind {
    Rsi,
    Mfi,
    Cci,
    Sma,
    Ema,
    Macd,
    Atr,
}

impl IndicatorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorKind::Rsi => "rsi",
            IndicatorKind::Mfi => "mfi",
            IndicatorKind::Cci => "cci",
            IndicatorKind::Sma => "sma",
            IndicatorKind::Ema => "ema",
            IndicatorKind::Macd => "macd",
            IndicatorKind::Atr => "atr",
        }
    }

    /// The component name used when a condition names none.
    pub fn default_component(&self) -> &'static str {
        match self {
            IndicatorKind::Macd => "macd",
            _ => "value",
        }
    }
}

impl fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps an indicator name to its kernel kind.
///
/// Alternate moving-average families the platform accepts but the kernel
/// does not implement natively (WMA, TEMA, KAMA, MAMA, VWMA, Hull) resolve
/// to an EMA of the requested period; the second tuple field is `true` for
/// such fallbacks so the caller can log the downgrade once per fingerprint.
pub fn resolve_kind(name: &str) -> Result<(IndicatorKind, bool), IndicatorError> {
    match name.to_ascii_lowercase().as_str() {
        "rsi" => Ok((IndicatorKind::Rsi, false)),
        "mfi" => Ok((IndicatorKind::Mfi, false)),
        "cci" => Ok((IndicatorKind::Cci, false)),
        "sma" | "ma" => Ok((IndicatorKind::Sma, false)),
        "ema" => Ok((IndicatorKind::Ema, false)),
        "macd" => Ok((IndicatorKind::Macd, false)),
        "atr" => Ok((IndicatorKind::Atr, false)),
        "wma" | "tema" | "kama" | "mama" | "vwma" | "hull" | "hma" => {
            Ok((IndicatorKind::Ema, true))
        }
        other => Err(IndicatorError::UnknownIndicator(other.to_string())),
    }
}

/// Validated numeric settings for one indicator instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndicatorSettings {
    pub period: usize,
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self { period: 14, fast: 12, slow: 26, signal: 9 }
    }
}

impl IndicatorSettings {
    /// Builds settings from a loosely-typed map, materializing defaults
    /// (period 14, MACD 12/26/9) and rejecting out-of-range values.
    pub fn from_map(kind: IndicatorKind, map: &BTreeMap<String, f64>) -> Result<Self, IndicatorError> {
        let mut settings = IndicatorSettings::default();
        for (key, &raw) in map {
            let value = as_period(key, raw)?;
            match key.as_str() {
                "period" => settings.period = value,
                "fast" | "fast_period" => settings.fast = value,
                "slow" | "slow_period" => settings.slow = value,
                "signal" | "signal_period" => settings.signal = value,
                other => {
                    return Err(IndicatorError::InvalidSetting {
                        name: other.to_string(),
                        reason: "unknown setting".to_string(),
                    });
                }
            }
        }
        if kind == IndicatorKind::Macd && settings.fast >= settings.slow {
            return Err(IndicatorError::InvalidSetting {
                name: "fast".to_string(),
                reason: "fast period must be less than slow period".to_string(),
            });
        }
        Ok(settings)
    }

    /// A stable identity string for cache keys, e.g. `rsi(14)` or
    /// `macd(12,26,9)`.
    pub fn cache_id(&self, kind: IndicatorKind) -> String {
        match kind {
            IndicatorKind::Macd => format!("macd({},{},{})", self.fast, self.slow, self.signal),
            other => format!("{}({})", other, self.period),
        }
    }

    /// Minimum number of closed bars before the indicator is determinate.
    pub fn min_bars(&self, kind: IndicatorKind) -> usize {
        match kind {
            IndicatorKind::Rsi | IndicatorKind::Mfi | IndicatorKind::Atr => self.period + 1,
            IndicatorKind::Sma | IndicatorKind::Ema | IndicatorKind::Cci => self.period,
            IndicatorKind::Macd => self.slow + self.signal,
        }
    }
}

fn as_period(name: &str, raw: f64) -> Result<usize, IndicatorError> {
    if !raw.is_finite() || raw < 1.0 || raw > 1000.0 || raw.fract() != 0.0 {
        return Err(IndicatorError::InvalidSetting {
            name: name.to_string(),
            reason: format!("expected an integer in [1, 1000], got {raw}"),
        });
    }
    Ok(raw as usize)
}

/// A computed indicator: one or more named component series, each aligned
/// to the end of the input bars.
#[derive(Debug, Clone)]
pub struct IndicatorSeries {
    components: BTreeMap<String, Vec<f64>>,
}

impl IndicatorSeries {
    fn single(values: Vec<f64>) -> Self {
        let mut components = BTreeMap::new();
        components.insert("value".to_string(), values);
        Self { components }
    }

    pub fn component(&self, name: &str) -> Option<&[f64]> {
        self.components.get(name).map(Vec::as_slice)
    }

    /// The value at the last closed bar.
    pub fn tail(&self, name: &str) -> Option<f64> {
        self.components.get(name).and_then(|s| s.last().copied())
    }

    /// The value at the bar before the last closed bar, when the series is
    /// long enough for cross detection.
    pub fn prev(&self, name: &str) -> Option<f64> {
        self.components
            .get(name)
            .and_then(|s| s.len().checked_sub(2).map(|i| s[i]))
    }
}

/// Computes one indicator over closed bars.
///
/// Returns `InsufficientHistory` below the warm-up requirement; the series
/// is otherwise guaranteed non-empty for every component.
pub fn compute(
    kind: IndicatorKind,
    settings: &IndicatorSettings,
    bars: &[Bar],
) -> Result<IndicatorSeries, IndicatorError> {
    let needed = settings.min_bars(kind);
    if bars.len() < needed {
        return Err(IndicatorError::InsufficientHistory { needed, have: bars.len() });
    }

    match kind {
        IndicatorKind::Rsi => {
            Ok(IndicatorSeries::single(series::rsi(&closes(bars)?, settings.period)))
        }
        IndicatorKind::Sma => {
            Ok(IndicatorSeries::single(series::sma(&closes(bars)?, settings.period)))
        }
        IndicatorKind::Ema => {
            Ok(IndicatorSeries::single(series::ema(&closes(bars)?, settings.period)))
        }
        IndicatorKind::Mfi => Ok(IndicatorSeries::single(series::mfi(
            &highs(bars)?,
            &lows(bars)?,
            &closes(bars)?,
            &volumes(bars)?,
            settings.period,
        ))),
        IndicatorKind::Cci => Ok(IndicatorSeries::single(series::cci(
            &highs(bars)?,
            &lows(bars)?,
            &closes(bars)?,
            settings.period,
        ))),
        IndicatorKind::Atr => Ok(IndicatorSeries::single(series::atr(
            &highs(bars)?,
            &lows(bars)?,
            &closes(bars)?,
            settings.period,
        ))),
        IndicatorKind::Macd => {
            let out = series::macd(&closes(bars)?, settings.fast, settings.slow, settings.signal);
            if out.signal.is_empty() {
                return Err(IndicatorError::InsufficientHistory { needed, have: bars.len() });
            }
            let mut components = BTreeMap::new();
            components.insert("macd".to_string(), out.macd);
            components.insert("signal".to_string(), out.signal);
            components.insert("histogram".to_string(), out.histogram);
            Ok(IndicatorSeries { components })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal::prelude::FromPrimitive;

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let open_time = start + Duration::hours(i as i64);
                let px = Decimal::from_f64(c).unwrap();
                Bar {
                    open_time,
                    open: px,
                    high: px,
                    low: px,
                    close: px,
                    volume: Decimal::from(1000),
                    close_time: open_time + Duration::hours(1),
                }
            })
            .collect()
    }

    #[test]
    fn resolve_known_and_fallback_names() {
        assert_eq!(resolve_kind("RSI").unwrap(), (IndicatorKind::Rsi, false));
        assert_eq!(resolve_kind("hull").unwrap(), (IndicatorKind::Ema, true));
        assert!(resolve_kind("ichimoku").is_err());
    }

    #[test]
    fn settings_materialize_defaults() {
        let s = IndicatorSettings::from_map(IndicatorKind::Rsi, &BTreeMap::new()).unwrap();
        assert_eq!(s.period, 14);
        assert_eq!(s.cache_id(IndicatorKind::Rsi), "rsi(14)");

        let mut map = BTreeMap::new();
        map.insert("period".to_string(), 21.0);
        let s = IndicatorSettings::from_map(IndicatorKind::Ema, &map).unwrap();
        assert_eq!(s.period, 21);
    }

    #[test]
    fn settings_reject_garbage() {
        let mut map = BTreeMap::new();
        map.insert("period".to_string(), -3.0);
        assert!(IndicatorSettings::from_map(IndicatorKind::Rsi, &map).is_err());

        let mut map = BTreeMap::new();
        map.insert("window".to_string(), 14.0);
        assert!(IndicatorSettings::from_map(IndicatorKind::Rsi, &map).is_err());
    }

    #[test]
    fn macd_rejects_inverted_periods() {
        let mut map = BTreeMap::new();
        map.insert("fast".to_string(), 26.0);
        map.insert("slow".to_string(), 12.0);
        assert!(IndicatorSettings::from_map(IndicatorKind::Macd, &map).is_err());
    }

    #[test]
    fn compute_flags_insufficient_history() {
        let bars = bars_from_closes(&vec![100.0; 10]);
        let settings = IndicatorSettings::default();
        match compute(IndicatorKind::Rsi, &settings, &bars) {
            Err(IndicatorError::InsufficientHistory { needed, have }) => {
                assert_eq!(needed, 15);
                assert_eq!(have, 10);
            }
            other => panic!("expected InsufficientHistory, got {other:?}"),
        }
    }

    #[test]
    fn compute_exposes_tail_and_prev() {
        let closes: Vec<f64> = (1..=40).map(|x| 100.0 + x as f64).collect();
        let bars = bars_from_closes(&closes);
        let settings = IndicatorSettings::default();
        let out = compute(IndicatorKind::Sma, &settings, &bars).unwrap();
        let tail = out.tail("value").unwrap();
        let prev = out.prev("value").unwrap();
        // A steadily rising series has a rising SMA.
        assert!(tail > prev);
    }

    #[test]
    fn macd_components_present() {
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + (i as f64 * 0.2).cos()).collect();
        let bars = bars_from_closes(&closes);
        let settings = IndicatorSettings::default();
        let out = compute(IndicatorKind::Macd, &settings, &bars).unwrap();
        for name in ["macd", "signal", "histogram"] {
            assert!(out.tail(name).is_some(), "missing component {name}");
        }
    }
}
