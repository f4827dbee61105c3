use crate::cache::IndicatorCache;
use crate::error::EvaluatorError;
use conditions::{CanonicalCondition, CompareTo, ConditionKind, Operator};
use core_types::Bar;
use indicators::{IndicatorError, patterns};
use rust_decimal::prelude::ToPrimitive;
use std::collections::{BTreeMap, HashSet};

/// The result of evaluating one atomic condition against the current
/// closed bars.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The condition holds on the last closed bar.
    True(BTreeMap<String, f64>),
    /// Evaluated, did not hold. Still counts toward evaluation stats.
    False,
    /// Not enough history to decide. Treated as "not triggered" and not
    /// counted as evaluated.
    Indeterminate,
}

impl Outcome {
    pub fn is_determinate(&self) -> bool {
        !matches!(self, Outcome::Indeterminate)
    }

    pub fn truth(&self) -> bool {
        matches!(self, Outcome::True(_))
    }
}

/// The left- or right-hand side of a comparison at the tail of a series:
/// the value on the last closed bar, and the one before it when available.
#[derive(Debug, Clone, Copy)]
struct TailPair {
    curr: f64,
    prev: Option<f64>,
}

const EPSILON: f64 = 1e-9;

/// Evaluates one canonical condition over closed bars.
///
/// `fallback_warned` tracks fingerprints that already logged an
/// unsupported-MA-family downgrade, so the warning fires once per
/// fingerprint per process.
pub fn evaluate_atomic(
    fingerprint: &str,
    condition: &CanonicalCondition,
    bars: &[Bar],
    cache: &mut IndicatorCache,
    fallback_warned: &mut HashSet<String>,
) -> Result<Outcome, EvaluatorError> {
    if bars.is_empty() {
        return Ok(Outcome::Indeterminate);
    }
    let last = &bars[bars.len() - 1];
    let bar_close = last.close_time;
    let close = last
        .close
        .to_f64()
        .ok_or_else(|| EvaluatorError::MalformedCondition {
            fingerprint: fingerprint.to_string(),
            reason: "close price out of f64 range".to_string(),
        })?;

    let mut values = BTreeMap::new();
    values.insert("close".to_string(), close);

    // --- Pattern conditions: truth is intrinsic to the last two bars. ---
    if condition.kind == ConditionKind::Pattern {
        if bars.len() < 2 {
            return Ok(Outcome::Indeterminate);
        }
        let pattern = condition.pattern.ok_or_else(|| EvaluatorError::MalformedCondition {
            fingerprint: fingerprint.to_string(),
            reason: "pattern condition without a pattern".to_string(),
        })?;
        let hit = patterns::detect(pattern, &bars[bars.len() - 2], last);
        return Ok(if hit { Outcome::True(values) } else { Outcome::False });
    }

    // --- Left-hand side. ---
    let lhs = match condition.kind {
        ConditionKind::Indicator => {
            let (kind, settings, fallback) = match condition.kernel_indicator()? {
                Some(triple) => triple,
                None => {
                    return Err(EvaluatorError::MalformedCondition {
                        fingerprint: fingerprint.to_string(),
                        reason: "indicator condition without an indicator".to_string(),
                    });
                }
            };
            if fallback && fallback_warned.insert(fingerprint.to_string()) {
                tracing::warn!(
                    fingerprint,
                    indicator = condition.indicator.as_deref().unwrap_or_default(),
                    "unsupported indicator family, falling back to EMA"
                );
            }
            let component = condition.component.as_deref().unwrap_or("value");
            let series = match cache.get_or_compute(
                &condition.symbol,
                condition.timeframe,
                kind,
                &settings,
                bar_close,
                bars,
            ) {
                Ok(series) => series,
                Err(IndicatorError::InsufficientHistory { .. }) => {
                    return Ok(Outcome::Indeterminate);
                }
                Err(e) => return Err(e.into()),
            };
            let curr = match series.tail(component) {
                Some(v) => v,
                None => return Ok(Outcome::Indeterminate),
            };
            let name = condition
                .indicator
                .clone()
                .unwrap_or_else(|| "indicator".to_string());
            let key = if component == "value" { name } else { component.to_string() };
            values.insert(key, curr);
            TailPair { curr, prev: series.prev(component) }
        }
        ConditionKind::Price => {
            let prev = bars
                .len()
                .checked_sub(2)
                .and_then(|i| bars[i].close.to_f64());
            values.insert("price".to_string(), close);
            TailPair { curr: close, prev }
        }
        ConditionKind::Volume => {
            let curr = last.volume.to_f64().unwrap_or(0.0);
            let prev = bars
                .len()
                .checked_sub(2)
                .and_then(|i| bars[i].volume.to_f64());
            values.insert("volume".to_string(), curr);
            TailPair { curr, prev }
        }
        ConditionKind::Pattern => unreachable!("handled above"),
    };

    // --- Right-hand side. ---
    let compare = condition.compare.as_ref().ok_or_else(|| {
        EvaluatorError::MalformedCondition {
            fingerprint: fingerprint.to_string(),
            reason: "comparison condition without a right-hand side".to_string(),
        }
    })?;

    let truth = match compare {
        CompareTo::Band { lower, upper } => {
            let lower = parse_level(fingerprint, lower)?;
            let upper = parse_level(fingerprint, upper)?;
            match condition.operator {
                Operator::Between => lhs.curr >= lower && lhs.curr <= upper,
                _ => {
                    return Err(EvaluatorError::MalformedCondition {
                        fingerprint: fingerprint.to_string(),
                        reason: format!("band with operator {}", condition.operator),
                    });
                }
            }
        }
        CompareTo::Value { value } => {
            let level = parse_level(fingerprint, value)?;
            let rhs = TailPair { curr: level, prev: Some(level) };
            match apply_operator(condition.operator, lhs, rhs, close) {
                Some(t) => t,
                None => return Ok(Outcome::Indeterminate),
            }
        }
        CompareTo::Indicator { reference } => {
            let (kind, settings, component, fallback) = match condition.kernel_reference()? {
                Some(quad) => quad,
                None => unreachable!("reference compare always resolves"),
            };
            if fallback && fallback_warned.insert(format!("{fingerprint}:ref")) {
                tracing::warn!(
                    fingerprint,
                    indicator = reference.indicator.as_str(),
                    "unsupported reference indicator family, falling back to EMA"
                );
            }
            let series = match cache.get_or_compute(
                &condition.symbol,
                condition.timeframe,
                kind,
                &settings,
                bar_close,
                bars,
            ) {
                Ok(series) => series,
                Err(IndicatorError::InsufficientHistory { .. }) => {
                    return Ok(Outcome::Indeterminate);
                }
                Err(e) => return Err(e.into()),
            };
            let curr = match series.tail(&component) {
                Some(v) => v,
                None => return Ok(Outcome::Indeterminate),
            };
            values.insert(reference.indicator.clone(), curr);
            let rhs = TailPair { curr, prev: series.prev(&component) };
            match apply_operator(condition.operator, lhs, rhs, close) {
                Some(t) => t,
                None => return Ok(Outcome::Indeterminate),
            }
        }
    };

    Ok(if truth { Outcome::True(values) } else { Outcome::False })
}

fn parse_level(fingerprint: &str, canonical: &str) -> Result<f64, EvaluatorError> {
    canonical
        .parse::<f64>()
        .map_err(|_| EvaluatorError::MalformedCondition {
            fingerprint: fingerprint.to_string(),
            reason: format!("non-numeric level `{canonical}`"),
        })
}

/// Applies a tail operator. `None` means the operator needed a previous
/// bar that the series cannot provide yet.
fn apply_operator(op: Operator, lhs: TailPair, rhs: TailPair, close: f64) -> Option<bool> {
    match op {
        Operator::Gt => Some(lhs.curr > rhs.curr),
        Operator::Lt => Some(lhs.curr < rhs.curr),
        Operator::Ge => Some(lhs.curr >= rhs.curr),
        Operator::Le => Some(lhs.curr <= rhs.curr),
        Operator::Eq => Some((lhs.curr - rhs.curr).abs() <= EPSILON),
        Operator::CrossesAbove => {
            let (prev_x, prev_y) = (lhs.prev?, rhs.prev?);
            Some(prev_x <= prev_y && lhs.curr > rhs.curr)
        }
        Operator::CrossesBelow => {
            let (prev_x, prev_y) = (lhs.prev?, rhs.prev?);
            Some(prev_x >= prev_y && lhs.curr < rhs.curr)
        }
        Operator::ClosesAbove => Some(close > rhs.curr),
        Operator::ClosesBelow => Some(close < rhs.curr),
        // Bands are handled before dispatch.
        Operator::Between => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use conditions::{ConditionSpec, canonicalize, fingerprint as fp};
    use core_types::Timeframe;
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

    fn canonical(spec: serde_json::Value) -> (String, CanonicalCondition) {
        let spec: ConditionSpec = serde_json::from_value(spec).unwrap();
        let canonical = canonicalize(&spec).unwrap();
        (fp(&canonical.canonical_json()), canonical)
    }

    fn run(condition_json: serde_json::Value, closes: &[f64]) -> Outcome {
        let (fingerprint, condition) = canonical(condition_json);
        let bars = bars_from_closes(closes);
        let mut cache = IndicatorCache::new();
        let mut warned = HashSet::new();
        evaluate_atomic(&fingerprint, &condition, &bars, &mut cache, &mut warned).unwrap()
    }

    fn price_condition(operator: &str, value: f64) -> serde_json::Value {
        serde_json::json!({
            "type": "price",
            "operator": operator,
            "value": value,
            "symbol": "BTCUSDT",
            "timeframe": "1h"
        })
    }

    #[test]
    fn price_cross_above_needs_a_true_cross() {
        // 99 -> 101 crosses 100.
        assert!(run(price_condition("crosses_above", 100.0), &[98.0, 99.0, 101.0]).truth());
        // Already above on both bars: no cross.
        assert!(!run(price_condition("crosses_above", 100.0), &[101.0, 102.0]).truth());
        // One bar: indeterminate, a cross needs history.
        assert_eq!(
            run(price_condition("crosses_above", 100.0), &[101.0]),
            Outcome::Indeterminate
        );
    }

    #[test]
    fn crosses_above_and_below_are_mutually_exclusive() {
        for closes in [
            vec![99.0, 101.0],
            vec![101.0, 99.0],
            vec![100.0, 100.0],
            vec![99.0, 99.5],
        ] {
            let above = run(price_condition("crosses_above", 100.0), &closes).truth();
            let below = run(price_condition("crosses_below", 100.0), &closes).truth();
            assert!(!(above && below), "both crossed for {closes:?}");
        }
    }

    #[test]
    fn between_equals_ge_and_le() {
        for tail in [24.9, 25.0, 30.0, 35.0, 35.1] {
            let closes = vec![50.0, tail];
            let between = run(
                serde_json::json!({
                    "type": "price",
                    "operator": "between",
                    "lower": 25, "upper": 35,
                    "symbol": "BTCUSDT", "timeframe": "1h"
                }),
                &closes,
            )
            .truth();
            let ge = run(price_condition("ge", 25.0), &closes).truth();
            let le = run(price_condition("le", 35.0), &closes).truth();
            assert_eq!(between, ge && le, "mismatch at {tail}");
        }
    }

    #[test]
    fn rsi_condition_reports_its_value() {
        // Flat market: RSI 50, so `gt 40` holds and the snapshot carries it.
        let outcome = run(
            serde_json::json!({
                "type": "indicator",
                "indicator": "rsi",
                "operator": "gt",
                "value": 40,
                "symbol": "BTCUSDT", "timeframe": "1h"
            }),
            &vec![100.0; 30],
        );
        match outcome {
            Outcome::True(values) => {
                assert!((values["rsi"] - 50.0).abs() < 1e-9);
                assert!(values.contains_key("close"));
            }
            other => panic!("expected True, got {other:?}"),
        }
    }

    #[test]
    fn insufficient_history_is_indeterminate_not_false() {
        let outcome = run(
            serde_json::json!({
                "type": "indicator",
                "indicator": "rsi",
                "operator": "gt",
                "value": 40,
                "symbol": "BTCUSDT", "timeframe": "1h"
            }),
            &vec![100.0; 5],
        );
        assert_eq!(outcome, Outcome::Indeterminate);
    }

    #[test]
    fn price_crossing_its_ema_reference() {
        // A long flat stretch pins the EMA near 100; a final spike crosses it.
        let mut closes = vec![100.0; 30];
        closes.push(95.0);
        closes.push(106.0);
        let outcome = run(
            serde_json::json!({
                "type": "price",
                "operator": "crosses_above",
                "compare_mode": "indicator",
                "compare_indicator": {"indicator": "ema", "settings": {"period": 20}},
                "symbol": "BTCUSDT", "timeframe": "1h"
            }),
            &closes,
        );
        match outcome {
            Outcome::True(values) => {
                assert!(values.contains_key("ema"));
                assert!(values.contains_key("price"));
            }
            other => panic!("expected True, got {other:?}"),
        }
    }

    #[test]
    fn pattern_condition_on_two_bars() {
        let (fingerprint, condition) = canonical(serde_json::json!({
            "type": "pattern",
            "pattern": "higher_high",
            "operator": "eq",
            "symbol": "BTCUSDT", "timeframe": "1h"
        }));
        let bars = bars_from_closes(&[100.0, 101.0]);
        let mut cache = IndicatorCache::new();
        let mut warned = HashSet::new();
        let outcome =
            evaluate_atomic(&fingerprint, &condition, &bars, &mut cache, &mut warned).unwrap();
        assert!(outcome.truth());

        let one_bar = bars_from_closes(&[100.0]);
        let outcome =
            evaluate_atomic(&fingerprint, &condition, &one_bar, &mut cache, &mut warned).unwrap();
        assert_eq!(outcome, Outcome::Indeterminate);
    }

    #[test]
    fn fallback_family_warns_once_per_fingerprint() {
        let (fingerprint, condition) = canonical(serde_json::json!({
            "type": "indicator",
            "indicator": "hull",
            "operator": "gt",
            "value": 0,
            "settings": {"period": 10},
            "symbol": "BTCUSDT", "timeframe": "1h"
        }));
        let bars = bars_from_closes(&vec![100.0; 30]);
        let mut cache = IndicatorCache::new();
        let mut warned = HashSet::new();

        evaluate_atomic(&fingerprint, &condition, &bars, &mut cache, &mut warned).unwrap();
        assert!(warned.contains(&fingerprint));
        let size = warned.len();
        evaluate_atomic(&fingerprint, &condition, &bars, &mut cache, &mut warned).unwrap();
        assert_eq!(warned.len(), size);
    }
}
