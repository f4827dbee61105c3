use crate::error::ConditionError;
use crate::model::{
    CompareTo, ConditionKind, ConditionSpec, IndicatorRef, Operator, RawIndicatorRef, canon_num,
    canon_symbol, parse_operator,
};
use core_types::Timeframe;
use indicators::{CandlePattern, IndicatorKind, IndicatorSettings, resolve_kind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// A fully normalized condition. This struct *is* the canonical form: its
/// JSON serialization (struct order fixed, map keys sorted, numbers as
/// canonical decimal strings) is the byte string that gets fingerprinted
/// and persisted as the condition body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalCondition {
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indicator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub settings: BTreeMap<String, String>,
    pub operator: Operator,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compare: Option<CompareTo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<CandlePattern>,
    pub symbol: String,
    pub timeframe: Timeframe,
}

impl CanonicalCondition {
    /// The deterministic byte string the fingerprint is computed over.
    pub fn canonical_json(&self) -> String {
        // Serialization of this struct cannot fail: every field is a
        // string, enum, or string map.
        serde_json::to_string(self).expect("canonical condition serializes")
    }

    /// The kernel indicator this condition needs, if any, with its
    /// validated settings and fallback flag.
    pub fn kernel_indicator(
        &self,
    ) -> Result<Option<(IndicatorKind, IndicatorSettings, bool)>, ConditionError> {
        match (&self.kind, &self.indicator) {
            (ConditionKind::Indicator, Some(name)) => {
                let (kind, fallback) =
                    resolve_kind(name).map_err(|e| ConditionError::bad(e.to_string()))?;
                let settings = settings_from_canonical(kind, &self.settings)?;
                Ok(Some((kind, settings, fallback)))
            }
            _ => Ok(None),
        }
    }

    /// The kernel indicator referenced on the right-hand side, if any.
    pub fn kernel_reference(
        &self,
    ) -> Result<Option<(IndicatorKind, IndicatorSettings, String, bool)>, ConditionError> {
        if let Some(CompareTo::Indicator { reference }) = &self.compare {
            let (kind, fallback) = resolve_kind(&reference.indicator)
                .map_err(|e| ConditionError::bad(e.to_string()))?;
            let settings = settings_from_canonical(kind, &reference.settings)?;
            let component = reference
                .component
                .clone()
                .unwrap_or_else(|| kind.default_component().to_string());
            Ok(Some((kind, settings, component, fallback)))
        } else {
            Ok(None)
        }
    }
}

/// Rebuilds validated kernel settings from canonical string settings.
pub fn settings_from_canonical(
    kind: IndicatorKind,
    canonical: &BTreeMap<String, String>,
) -> Result<IndicatorSettings, ConditionError> {
    let mut map = BTreeMap::new();
    for (k, v) in canonical {
        let parsed: f64 = v
            .parse()
            .map_err(|_| ConditionError::bad(format!("setting {k}={v} is not numeric")))?;
        map.insert(k.clone(), parsed);
    }
    IndicatorSettings::from_map(kind, &map).map_err(|e| ConditionError::bad(e.to_string()))
}

/// Normalizes a raw condition spec into its canonical form.
///
/// Rules: numeric thresholds become canonical decimal strings; settings
/// keys are sorted and defaults materialized; operator synonyms collapse;
/// symbols upper-case. Two semantically equal inputs canonicalize to
/// byte-identical JSON.
pub fn canonicalize(spec: &ConditionSpec) -> Result<CanonicalCondition, ConditionError> {
    let (operator, force_value_mode) = parse_operator(&spec.operator)?;
    let symbol = canon_symbol(&spec.symbol)?;

    let (indicator, component, settings) = match spec.kind {
        ConditionKind::Indicator => {
            let name = spec
                .indicator
                .as_deref()
                .ok_or_else(|| ConditionError::bad("indicator condition without an indicator"))?
                .trim()
                .to_ascii_lowercase();
            let (kind, _fallback) =
                resolve_kind(&name).map_err(|e| ConditionError::bad(e.to_string()))?;
            let validated = IndicatorSettings::from_map(kind, &spec.settings)
                .map_err(|e| ConditionError::bad(e.to_string()))?;
            let component = canonical_component(kind, spec.component.as_deref())?;
            (Some(name), Some(component), canonical_settings(kind, &validated)?)
        }
        ConditionKind::Price | ConditionKind::Volume => {
            if spec.indicator.is_some() {
                return Err(ConditionError::bad(
                    "price/volume conditions must not name an indicator",
                ));
            }
            (None, None, BTreeMap::new())
        }
        ConditionKind::Pattern => {
            let name = spec
                .pattern
                .as_deref()
                .ok_or_else(|| ConditionError::bad("pattern condition without a pattern"))?;
            // Validate the name here so registration fails fast.
            CandlePattern::from_str(name).map_err(|e| ConditionError::bad(e.to_string()))?;
            (None, None, BTreeMap::new())
        }
    };

    let pattern = match spec.kind {
        ConditionKind::Pattern => Some(
            CandlePattern::from_str(spec.pattern.as_deref().unwrap_or_default())
                .map_err(|e| ConditionError::bad(e.to_string()))?,
        ),
        _ => None,
    };

    let compare = canonical_compare(spec, operator, force_value_mode)?;

    Ok(CanonicalCondition {
        kind: spec.kind,
        indicator,
        component,
        settings,
        operator,
        compare,
        pattern,
        symbol,
        timeframe: spec.timeframe,
    })
}

/// Materializes the settings an indicator actually uses, with sorted keys
/// and canonical numeric strings. Unused knobs are omitted so that
/// `{period: 14}` and `{}` fingerprint identically for an RSI.
fn canonical_settings(
    kind: IndicatorKind,
    validated: &IndicatorSettings,
) -> Result<BTreeMap<String, String>, ConditionError> {
    let mut out = BTreeMap::new();
    match kind {
        IndicatorKind::Macd => {
            out.insert("fast".to_string(), canon_num(validated.fast as f64)?);
            out.insert("slow".to_string(), canon_num(validated.slow as f64)?);
            out.insert("signal".to_string(), canon_num(validated.signal as f64)?);
        }
        _ => {
            out.insert("period".to_string(), canon_num(validated.period as f64)?);
        }
    }
    Ok(out)
}

fn canonical_component(
    kind: IndicatorKind,
    requested: Option<&str>,
) -> Result<String, ConditionError> {
    let component = requested
        .map(|c| c.trim().to_ascii_lowercase())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| kind.default_component().to_string());
    match kind {
        IndicatorKind::Macd => {
            if !matches!(component.as_str(), "macd" | "signal" | "histogram") {
                return Err(ConditionError::bad(format!(
                    "unknown macd component `{component}`"
                )));
            }
        }
        _ => {
            if component != "value" {
                return Err(ConditionError::bad(format!(
                    "indicator has no component `{component}`"
                )));
            }
        }
    }
    Ok(component)
}

fn canonical_compare(
    spec: &ConditionSpec,
    operator: Operator,
    force_value_mode: bool,
) -> Result<Option<CompareTo>, ConditionError> {
    if spec.kind == ConditionKind::Pattern {
        // Pattern truth is intrinsic; a right-hand side is meaningless.
        return Ok(None);
    }

    if operator == Operator::Between {
        let (lower, upper) = match (spec.lower, spec.upper) {
            (Some(l), Some(u)) => (l, u),
            _ => {
                return Err(ConditionError::bad(
                    "between requires both lower and upper",
                ));
            }
        };
        if upper < lower {
            return Err(ConditionError::bad(format!(
                "between requires upper >= lower (got {lower}..{upper})"
            )));
        }
        return Ok(Some(CompareTo::Band {
            lower: canon_num(lower)?,
            upper: canon_num(upper)?,
        }));
    }

    let mode = spec
        .compare_mode
        .as_deref()
        .map(|m| m.to_ascii_lowercase());
    let wants_indicator = !force_value_mode
        && (mode.as_deref() == Some("indicator") || spec.compare_indicator.is_some());

    if wants_indicator {
        let raw = spec.compare_indicator.as_ref().ok_or_else(|| {
            ConditionError::bad("compare_mode=indicator requires compare_indicator")
        })?;
        return Ok(Some(CompareTo::Indicator {
            reference: canonical_reference(raw)?,
        }));
    }

    let value = spec
        .value
        .ok_or_else(|| ConditionError::bad("comparison requires a value"))?;
    Ok(Some(CompareTo::Value {
        value: canon_num(value)?,
    }))
}

fn canonical_reference(raw: &RawIndicatorRef) -> Result<IndicatorRef, ConditionError> {
    let name = raw.indicator.trim().to_ascii_lowercase();
    let (kind, _fallback) = resolve_kind(&name).map_err(|e| ConditionError::bad(e.to_string()))?;
    let validated = IndicatorSettings::from_map(kind, &raw.settings)
        .map_err(|e| ConditionError::bad(e.to_string()))?;
    let component = canonical_component(kind, raw.component.as_deref())?;
    Ok(IndicatorRef {
        indicator: name,
        component: Some(component),
        settings: canonical_settings(kind, &validated)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint;

    fn rsi_spec(operator: &str, value: f64) -> ConditionSpec {
        ConditionSpec {
            kind: ConditionKind::Indicator,
            indicator: Some("rsi".to_string()),
            component: None,
            settings: BTreeMap::new(),
            operator: operator.to_string(),
            compare_mode: None,
            value: Some(value),
            lower: None,
            upper: None,
            compare_indicator: None,
            pattern: None,
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::H1,
        }
    }

    #[test]
    fn equivalent_specs_share_a_fingerprint() {
        // `>` with 30 vs `greater_than` with 30.0, lower-case symbol,
        // explicit default period: all the same condition.
        let a = canonicalize(&rsi_spec(">", 30.0)).unwrap();

        let mut b_raw = rsi_spec("greater_than", 30.0);
        b_raw.symbol = "btcusdt".to_string();
        b_raw.settings.insert("period".to_string(), 14.0);
        b_raw.indicator = Some("RSI".to_string());
        let b = canonicalize(&b_raw).unwrap();

        assert_eq!(a, b);
        assert_eq!(
            fingerprint(&a.canonical_json()),
            fingerprint(&b.canonical_json())
        );
    }

    #[test]
    fn semantic_changes_change_the_fingerprint() {
        let base = canonicalize(&rsi_spec("gt", 30.0)).unwrap();

        let mut other_raw = rsi_spec("gt", 30.0);
        other_raw.settings.insert("period".to_string(), 15.0);
        let other = canonicalize(&other_raw).unwrap();
        assert_ne!(
            fingerprint(&base.canonical_json()),
            fingerprint(&other.canonical_json())
        );

        let different_value = canonicalize(&rsi_spec("gt", 31.0)).unwrap();
        assert_ne!(
            fingerprint(&base.canonical_json()),
            fingerprint(&different_value.canonical_json())
        );

        let mut other_tf = rsi_spec("gt", 30.0);
        other_tf.timeframe = Timeframe::H4;
        let other_tf = canonicalize(&other_tf).unwrap();
        assert_ne!(
            fingerprint(&base.canonical_json()),
            fingerprint(&other_tf.canonical_json())
        );
    }

    #[test]
    fn level_synonym_pins_value_mode() {
        let mut spec = rsi_spec("crosses_above_level", 30.0);
        // Even with a stray compare_mode, the `_level` spelling means a
        // fixed numeric level.
        spec.compare_mode = Some("indicator".to_string());
        let canonical = canonicalize(&spec).unwrap();
        assert_eq!(canonical.operator, Operator::CrossesAbove);
        assert_eq!(
            canonical.compare,
            Some(CompareTo::Value { value: "30".to_string() })
        );
    }

    #[test]
    fn between_validates_the_band() {
        let mut spec = rsi_spec("between", 0.0);
        spec.value = None;
        spec.lower = Some(25.0);
        spec.upper = Some(35.0);
        let canonical = canonicalize(&spec).unwrap();
        assert_eq!(
            canonical.compare,
            Some(CompareTo::Band { lower: "25".to_string(), upper: "35".to_string() })
        );

        spec.lower = Some(40.0);
        assert!(canonicalize(&spec).is_err());
    }

    #[test]
    fn unknown_indicator_is_a_bad_condition() {
        let mut spec = rsi_spec("gt", 30.0);
        spec.indicator = Some("ichimoku".to_string());
        assert!(matches!(
            canonicalize(&spec),
            Err(ConditionError::BadCondition(_))
        ));
    }

    #[test]
    fn price_cross_of_an_ema_canonicalizes_the_reference() {
        let spec = ConditionSpec {
            kind: ConditionKind::Price,
            indicator: None,
            component: None,
            settings: BTreeMap::new(),
            operator: "crosses_above".to_string(),
            compare_mode: Some("indicator".to_string()),
            value: None,
            lower: None,
            upper: None,
            compare_indicator: Some(RawIndicatorRef {
                indicator: "EMA".to_string(),
                component: None,
                settings: BTreeMap::from([("period".to_string(), 50.0)]),
            }),
            pattern: None,
            symbol: "ethusdt".to_string(),
            timeframe: Timeframe::M15,
        };
        let canonical = canonicalize(&spec).unwrap();
        match canonical.compare {
            Some(CompareTo::Indicator { ref reference }) => {
                assert_eq!(reference.indicator, "ema");
                assert_eq!(reference.settings.get("period").unwrap(), "50");
            }
            ref other => panic!("expected indicator comparison, got {other:?}"),
        }
    }

    #[test]
    fn canonical_json_is_stable() {
        let canonical = canonicalize(&rsi_spec("gt", 30.0)).unwrap();
        let json = canonical.canonical_json();
        // Round-trip through serde and re-serialize: identical bytes.
        let parsed: CanonicalCondition = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.canonical_json(), json);
    }
}
