use crate::canonical::canonicalize;
use crate::error::ConditionError;
use crate::fingerprint::fingerprint;
use crate::model::ConditionSpec;
use serde::{Deserialize, Serialize};

/// How a playbook's per-item results combine into the final boolean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Gate {
    /// The chained result must be true.
    All,
    /// The chained result is true, or at least one item is true.
    Any,
}

/// The connector binding an item to the running result of the items
/// already consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Logic {
    And,
    Or,
}

impl Default for Logic {
    fn default() -> Self {
        Logic::And
    }
}

/// Item ordering applied before connector evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvalOrder {
    /// Sort by `priority` ascending (stable).
    Priority,
    /// Preserve insertion order.
    Sequential,
}

impl Default for EvalOrder {
    fn default() -> Self {
        EvalOrder::Priority
    }
}

/// How long a once-satisfied item stays satisfied without re-evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Validity {
    Bars(u32),
    Minutes(u32),
}

fn default_enabled() -> bool {
    true
}

/// One entry in a playbook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookItemSpec {
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub logic: Logic,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub validity_bars: Option<u32>,
    #[serde(default)]
    pub validity_minutes: Option<u32>,
    pub condition: ConditionSpec,
}

impl PlaybookItemSpec {
    fn validity(&self) -> Result<Option<Validity>, ConditionError> {
        match (self.validity_bars, self.validity_minutes) {
            (Some(_), Some(_)) => Err(ConditionError::bad(
                "an item may set validity_bars or validity_minutes, not both",
            )),
            (Some(bars), None) => Ok(Some(Validity::Bars(bars))),
            (None, Some(minutes)) => Ok(Some(Validity::Minutes(minutes))),
            (None, None) => Ok(None),
        }
    }
}

/// An ordered list of condition items plus a gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookSpec {
    pub gate: Gate,
    #[serde(default)]
    pub evaluation_order: EvalOrder,
    pub items: Vec<PlaybookItemSpec>,
}

/// A bot's entry condition: one condition, or a playbook of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryCondition {
    Playbook(PlaybookSpec),
    Single(ConditionSpec),
}

/// One canonicalized playbook item: the registered item fingerprint plus
/// the combination metadata the wrapper fingerprint covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalPlaybookItem {
    pub fingerprint: String,
    pub logic: Logic,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validity: Option<Validity>,
    pub priority: i32,
}

/// The canonical playbook stored as the wrapper condition's body. Items
/// appear in evaluation order (ordering is applied during
/// canonicalization, so `priority` and `sequential` playbooks with the
/// same effective order fingerprint identically only when their orderings
/// agree).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalPlaybook {
    pub gate: Gate,
    pub order: EvalOrder,
    pub items: Vec<CanonicalPlaybookItem>,
}

impl CanonicalPlaybook {
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(self).expect("canonical playbook serializes")
    }

    /// The wrapper fingerprint covers the gate, the ordering mode, and the
    /// per-item (fingerprint, logic, validity) lists — nothing else.
    pub fn fingerprint(&self) -> String {
        #[derive(Serialize)]
        struct Wrapper<'a> {
            gate: Gate,
            order: EvalOrder,
            item_fingerprints: Vec<&'a str>,
            logic_list: Vec<Logic>,
            validity_list: Vec<Option<Validity>>,
        }
        let wrapper = Wrapper {
            gate: self.gate,
            order: self.order,
            item_fingerprints: self.items.iter().map(|i| i.fingerprint.as_str()).collect(),
            logic_list: self.items.iter().map(|i| i.logic).collect(),
            validity_list: self.items.iter().map(|i| i.validity).collect(),
        };
        fingerprint(&serde_json::to_string(&wrapper).expect("wrapper serializes"))
    }
}

/// Canonicalizes a playbook: canonicalizes every *enabled* item, applies
/// the ordering rule, and returns the canonical playbook together with the
/// canonical item bodies (callers register those as standalone conditions).
pub fn canonicalize_playbook(
    spec: &PlaybookSpec,
) -> Result<(CanonicalPlaybook, Vec<crate::CanonicalCondition>), ConditionError> {
    let enabled: Vec<&PlaybookItemSpec> = spec.items.iter().filter(|i| i.enabled).collect();
    if enabled.is_empty() {
        return Err(ConditionError::bad("playbook has no enabled items"));
    }

    let mut ordered: Vec<&PlaybookItemSpec> = enabled;
    if spec.evaluation_order == EvalOrder::Priority {
        ordered.sort_by_key(|i| i.priority);
    }

    let mut items = Vec::with_capacity(ordered.len());
    let mut bodies = Vec::with_capacity(ordered.len());
    for item in ordered {
        let canonical = canonicalize(&item.condition)?;
        let fp = fingerprint(&canonical.canonical_json());
        items.push(CanonicalPlaybookItem {
            fingerprint: fp,
            logic: item.logic,
            validity: item.validity()?,
            priority: item.priority,
        });
        bodies.push(canonical);
    }

    Ok((
        CanonicalPlaybook { gate: spec.gate, order: spec.evaluation_order, items },
        bodies,
    ))
}

/// Folds per-item truths through their connectors.
///
/// The chain starts at `null`: the first consumed item seeds the result,
/// every later item combines with `result <logic> item`.
pub fn chain(items: &[(Logic, bool)]) -> Option<bool> {
    let mut result: Option<bool> = None;
    for &(logic, truth) in items {
        result = Some(match result {
            None => truth,
            Some(acc) => match logic {
                Logic::And => acc && truth,
                Logic::Or => acc || truth,
            },
        });
    }
    result
}

/// Applies the gate to a chained result.
pub fn gate_result(gate: Gate, chained: Option<bool>, any_item_true: bool) -> bool {
    match gate {
        Gate::All => chained.unwrap_or(false),
        Gate::Any => chained.unwrap_or(false) || any_item_true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConditionKind;
    use core_types::Timeframe;
    use std::collections::BTreeMap;

    fn item(priority: i32, logic: Logic, operator: &str, value: f64) -> PlaybookItemSpec {
        PlaybookItemSpec {
            priority,
            logic,
            enabled: true,
            validity_bars: None,
            validity_minutes: None,
            condition: ConditionSpec {
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
            },
        }
    }

    #[test]
    fn chain_is_null_seeded() {
        assert_eq!(chain(&[]), None);
        assert_eq!(chain(&[(Logic::And, true)]), Some(true));
        // The first item's own connector is ignored by construction.
        assert_eq!(chain(&[(Logic::Or, false)]), Some(false));
        assert_eq!(chain(&[(Logic::And, true), (Logic::And, false)]), Some(false));
        assert_eq!(chain(&[(Logic::And, false), (Logic::Or, true)]), Some(true));
    }

    #[test]
    fn gate_all_vs_any() {
        assert!(!gate_result(Gate::All, Some(false), true));
        assert!(gate_result(Gate::All, Some(true), false));
        assert!(gate_result(Gate::Any, Some(false), true));
        assert!(!gate_result(Gate::Any, Some(false), false));
        assert!(!gate_result(Gate::All, None, false));
    }

    #[test]
    fn priority_order_sorts_items_before_fingerprinting() {
        let spec = PlaybookSpec {
            gate: Gate::All,
            evaluation_order: EvalOrder::Priority,
            items: vec![
                item(2, Logic::And, "crosses_above", 50.0),
                item(1, Logic::And, "crosses_below", 30.0),
            ],
        };
        let (canonical, _) = canonicalize_playbook(&spec).unwrap();
        assert_eq!(canonical.items[0].priority, 1);
        assert_eq!(canonical.items[1].priority, 2);

        // The same items submitted already sorted fingerprint identically.
        let sorted = PlaybookSpec {
            gate: Gate::All,
            evaluation_order: EvalOrder::Priority,
            items: vec![
                item(1, Logic::And, "crosses_below", 30.0),
                item(2, Logic::And, "crosses_above", 50.0),
            ],
        };
        let (canonical_sorted, _) = canonicalize_playbook(&sorted).unwrap();
        assert_eq!(canonical.fingerprint(), canonical_sorted.fingerprint());
    }

    #[test]
    fn disabled_items_do_not_count() {
        let mut disabled = item(1, Logic::And, "gt", 70.0);
        disabled.enabled = false;
        let spec = PlaybookSpec {
            gate: Gate::All,
            evaluation_order: EvalOrder::Sequential,
            items: vec![disabled, item(2, Logic::And, "lt", 30.0)],
        };
        let (canonical, bodies) = canonicalize_playbook(&spec).unwrap();
        assert_eq!(canonical.items.len(), 1);
        assert_eq!(bodies.len(), 1);
    }

    #[test]
    fn gate_change_changes_the_wrapper_fingerprint() {
        let items = vec![item(1, Logic::And, "crosses_below", 30.0)];
        let all = PlaybookSpec {
            gate: Gate::All,
            evaluation_order: EvalOrder::Priority,
            items: items.clone(),
        };
        let any = PlaybookSpec {
            gate: Gate::Any,
            evaluation_order: EvalOrder::Priority,
            items,
        };
        let (a, _) = canonicalize_playbook(&all).unwrap();
        let (b, _) = canonicalize_playbook(&any).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn entry_condition_accepts_both_shapes() {
        let single = serde_json::json!({
            "type": "indicator",
            "indicator": "rsi",
            "operator": "crosses_below",
            "value": 30,
            "symbol": "BTCUSDT",
            "timeframe": "1h"
        });
        assert!(matches!(
            serde_json::from_value::<EntryCondition>(single).unwrap(),
            EntryCondition::Single(_)
        ));

        let playbook = serde_json::json!({
            "gate": "ALL",
            "items": [{
                "priority": 1,
                "condition": {
                    "type": "indicator",
                    "indicator": "rsi",
                    "operator": "crosses_below",
                    "value": 30,
                    "symbol": "BTCUSDT",
                    "timeframe": "1h"
                }
            }]
        });
        assert!(matches!(
            serde_json::from_value::<EntryCondition>(playbook).unwrap(),
            EntryCondition::Playbook(_)
        ));
    }

    #[test]
    fn double_validity_is_rejected() {
        let mut bad = item(1, Logic::And, "gt", 50.0);
        bad.validity_bars = Some(10);
        bad.validity_minutes = Some(30);
        let spec = PlaybookSpec {
            gate: Gate::All,
            evaluation_order: EvalOrder::Sequential,
            items: vec![bad],
        };
        assert!(canonicalize_playbook(&spec).is_err());
    }
}
