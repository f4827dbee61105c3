use crate::error::ConditionError;
use core_types::Timeframe;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// What a condition observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionKind {
    Indicator,
    Price,
    Volume,
    Pattern,
}

impl Default for ConditionKind {
    fn default() -> Self {
        ConditionKind::Indicator
    }
}

impl ConditionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionKind::Indicator => "indicator",
            ConditionKind::Price => "price",
            ConditionKind::Volume => "volume",
            ConditionKind::Pattern => "pattern",
        }
    }
}

/// Canonical tail operators. Synonyms in the input collapse onto these
/// during canonicalization, so the fingerprint never sees `">"` vs
/// `"greater_than"` as different conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    CrossesAbove,
    CrossesBelow,
    Between,
    ClosesAbove,
    ClosesBelow,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Gt => "gt",
            Operator::Lt => "lt",
            Operator::Ge => "ge",
            Operator::Le => "le",
            Operator::Eq => "eq",
            Operator::CrossesAbove => "crosses_above",
            Operator::CrossesBelow => "crosses_below",
            Operator::Between => "between",
            Operator::ClosesAbove => "closes_above",
            Operator::ClosesBelow => "closes_below",
        }
    }

    /// Cross operators need the previous bar as well as the current one.
    pub fn needs_prev(&self) -> bool {
        matches!(self, Operator::CrossesAbove | Operator::CrossesBelow)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses an operator, collapsing synonyms. The second field is `true`
/// when the synonym pins `compare_mode` to `value` (the `_level` family).
pub fn parse_operator(raw: &str) -> Result<(Operator, bool), ConditionError> {
    let op = match raw.to_ascii_lowercase().as_str() {
        ">" | "gt" | "greater_than" => (Operator::Gt, false),
        "<" | "lt" | "less_than" => (Operator::Lt, false),
        ">=" | "ge" | "gte" | "greater_than_or_equal" => (Operator::Ge, false),
        "<=" | "le" | "lte" | "less_than_or_equal" => (Operator::Le, false),
        "==" | "=" | "eq" | "equals" => (Operator::Eq, false),
        "crosses_above" | "cross_above" | "crossed_above" => (Operator::CrossesAbove, false),
        "crosses_below" | "cross_below" | "crossed_below" => (Operator::CrossesBelow, false),
        "crosses_above_level" => (Operator::CrossesAbove, true),
        "crosses_below_level" => (Operator::CrossesBelow, true),
        "between" | "in_range" => (Operator::Between, false),
        "closes_above" => (Operator::ClosesAbove, false),
        "closes_below" => (Operator::ClosesBelow, false),
        other => return Err(ConditionError::bad(format!("unknown operator `{other}`"))),
    };
    Ok(op)
}

/// A reference to another indicator on the same (symbol, timeframe),
/// used as the right-hand side of a comparison (e.g. price crossing its
/// EMA(50)).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorRef {
    pub indicator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, String>,
}

/// The canonical right-hand side of a condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum CompareTo {
    /// A fixed numeric level, held as a canonical decimal string.
    Value { value: String },
    /// An inclusive band for `between`.
    Band { lower: String, upper: String },
    /// Another indicator series.
    Indicator { reference: IndicatorRef },
}

/// A condition as submitted by a bot-creation request, before
/// canonicalization. Field spellings are deliberately loose; the canonical
/// form is strict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionSpec {
    #[serde(rename = "type", alias = "condition_type", default)]
    pub kind: ConditionKind,
    #[serde(default)]
    pub indicator: Option<String>,
    #[serde(default)]
    pub component: Option<String>,
    #[serde(default)]
    pub settings: BTreeMap<String, f64>,
    pub operator: String,
    #[serde(default)]
    pub compare_mode: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub lower: Option<f64>,
    #[serde(default)]
    pub upper: Option<f64>,
    #[serde(default)]
    pub compare_indicator: Option<RawIndicatorRef>,
    #[serde(default)]
    pub pattern: Option<String>,
    pub symbol: String,
    pub timeframe: Timeframe,
}

/// The loosely-typed right-hand indicator reference of an incoming spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawIndicatorRef {
    pub indicator: String,
    #[serde(default)]
    pub component: Option<String>,
    #[serde(default)]
    pub settings: BTreeMap<String, f64>,
}

/// Formats a float as a canonical decimal string: integral values lose
/// their fractional zero (`30.0` -> `"30"`), everything else uses the
/// shortest round-trip representation.
pub fn canon_num(v: f64) -> Result<String, ConditionError> {
    if !v.is_finite() {
        return Err(ConditionError::bad(format!("non-finite number {v}")));
    }
    if v == v.trunc() && v.abs() < 1e15 {
        Ok(format!("{}", v as i64))
    } else {
        Ok(format!("{v}"))
    }
}

/// Parses a symbol into its canonical (upper-case, trimmed) spelling.
pub fn canon_symbol(raw: &str) -> Result<String, ConditionError> {
    let s = raw.trim().to_ascii_uppercase();
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ConditionError::bad(format!("invalid symbol `{raw}`")));
    }
    Ok(s)
}

impl FromStr for Operator {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_operator(s).map(|(op, _)| op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_synonyms_collapse() {
        assert_eq!(parse_operator(">").unwrap(), (Operator::Gt, false));
        assert_eq!(parse_operator("greater_than").unwrap(), (Operator::Gt, false));
        assert_eq!(parse_operator("GT").unwrap(), (Operator::Gt, false));
        assert_eq!(
            parse_operator("crosses_above_level").unwrap(),
            (Operator::CrossesAbove, true)
        );
        assert!(parse_operator("approaches").is_err());
    }

    #[test]
    fn canonical_numbers_drop_trailing_zeroes() {
        assert_eq!(canon_num(30.0).unwrap(), "30");
        assert_eq!(canon_num(30.5).unwrap(), "30.5");
        assert_eq!(canon_num(-2.0).unwrap(), "-2");
        assert_eq!(canon_num(0.1).unwrap(), "0.1");
        assert!(canon_num(f64::NAN).is_err());
    }

    #[test]
    fn symbols_normalize_to_upper_case() {
        assert_eq!(canon_symbol(" btcusdt ").unwrap(), "BTCUSDT");
        assert!(canon_symbol("BTC/USDT").is_err());
    }
}
