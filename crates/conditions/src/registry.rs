use crate::canonical::canonicalize;
use crate::error::ConditionError;
use crate::fingerprint::fingerprint;
use crate::model::ConditionSpec;
use crate::playbook::{EntryCondition, canonicalize_playbook};
use crate::store::ConditionStore;
use chrono::Utc;
use core_types::{BotType, ConditionRecord, Subscription, SubscriptionStatus, Timeframe};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

/// The outcome of registering a bot's entry condition: the fingerprint the
/// bot should subscribe to, plus the item fingerprints when the entry was
/// a playbook (those are registered but never subscribed to directly).
#[derive(Debug, Clone)]
pub struct RegisteredEntry {
    pub fingerprint: String,
    pub item_fingerprints: Vec<String>,
}

/// Front door for condition registration and subscription management.
///
/// The registry owns no state of its own: it canonicalizes, fingerprints,
/// and delegates every read/write to the `ConditionStore`, which keeps
/// `register` idempotent and retry-safe.
#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn ConditionStore>,
}

impl Registry {
    pub fn new(store: Arc<dyn ConditionStore>) -> Self {
        Self { store }
    }

    /// The backing store, for components that read records directly (the
    /// shared evaluator resolves playbook items this way).
    pub fn store(&self) -> Arc<dyn ConditionStore> {
        Arc::clone(&self.store)
    }

    /// Canonicalizes and persists one condition, returning its
    /// fingerprint. Inserting an already-known condition is a no-op.
    pub async fn register(&self, spec: &ConditionSpec) -> Result<String, ConditionError> {
        let canonical = canonicalize(spec)?;
        let fp = fingerprint(&canonical.canonical_json());
        let record = ConditionRecord {
            fingerprint: fp.clone(),
            condition_type: canonical.kind.as_str().to_string(),
            symbol: canonical.symbol.clone(),
            timeframe: canonical.timeframe,
            config: serde_json::to_value(&canonical)
                .map_err(|e| ConditionError::Store(e.to_string()))?,
            last_evaluated_at: None,
            last_triggered_at: None,
            trigger_count: 0,
            evaluation_count: 0,
        };
        self.store.upsert_condition(&record).await?;
        Ok(fp)
    }

    /// Registers a bot entry: a single condition directly, or every item
    /// of a playbook plus its wrapper.
    pub async fn register_entry(
        &self,
        entry: &EntryCondition,
    ) -> Result<RegisteredEntry, ConditionError> {
        match entry {
            EntryCondition::Single(spec) => {
                let fp = self.register(spec).await?;
                Ok(RegisteredEntry { fingerprint: fp, item_fingerprints: Vec::new() })
            }
            EntryCondition::Playbook(spec) => {
                let (canonical, bodies) = canonicalize_playbook(spec)?;

                let mut item_fps = Vec::with_capacity(bodies.len());
                for body in &bodies {
                    let fp = fingerprint(&body.canonical_json());
                    let record = ConditionRecord {
                        fingerprint: fp.clone(),
                        condition_type: body.kind.as_str().to_string(),
                        symbol: body.symbol.clone(),
                        timeframe: body.timeframe,
                        config: serde_json::to_value(body)
                            .map_err(|e| ConditionError::Store(e.to_string()))?,
                        last_evaluated_at: None,
                        last_triggered_at: None,
                        trigger_count: 0,
                        evaluation_count: 0,
                    };
                    self.store.upsert_condition(&record).await?;
                    item_fps.push(fp);
                }

                // The wrapper inherits the first item's frame for event
                // metadata; debounce runs on that frame's bar close.
                let (symbol, timeframe) = (bodies[0].symbol.clone(), bodies[0].timeframe);
                let wrapper_fp = canonical.fingerprint();
                let record = ConditionRecord {
                    fingerprint: wrapper_fp.clone(),
                    condition_type: "playbook".to_string(),
                    symbol,
                    timeframe,
                    config: serde_json::to_value(&canonical)
                        .map_err(|e| ConditionError::Store(e.to_string()))?,
                    last_evaluated_at: None,
                    last_triggered_at: None,
                    trigger_count: 0,
                    evaluation_count: 0,
                };
                self.store.upsert_condition(&record).await?;

                Ok(RegisteredEntry { fingerprint: wrapper_fp, item_fingerprints: item_fps })
            }
        }
    }

    /// Creates an `active` subscription binding a bot to a fingerprint.
    pub async fn subscribe(
        &self,
        bot_id: Uuid,
        user_id: Uuid,
        bot_type: BotType,
        fingerprint: &str,
        bot_config: serde_json::Value,
    ) -> Result<Uuid, ConditionError> {
        let sub = Subscription {
            subscription_id: Uuid::new_v4(),
            user_id,
            bot_id,
            bot_type,
            fingerprint: fingerprint.to_string(),
            bot_config,
            status: SubscriptionStatus::Active,
            created_at: Utc::now(),
            last_triggered_at: None,
        };
        self.store.insert_subscription(&sub).await?;
        Ok(sub.subscription_id)
    }

    pub async fn unsubscribe(&self, subscription_id: Uuid) -> Result<(), ConditionError> {
        self.store
            .set_subscription_status(subscription_id, SubscriptionStatus::Revoked)
            .await
    }

    pub async fn set_status(
        &self,
        subscription_id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<(), ConditionError> {
        self.store.set_subscription_status(subscription_id, status).await
    }

    /// Fingerprints the evaluator should consider this cycle.
    pub async fn active_fingerprints(&self) -> Result<BTreeSet<String>, ConditionError> {
        Ok(self
            .store
            .active_conditions()
            .await?
            .into_iter()
            .map(|c| c.fingerprint)
            .collect())
    }

    pub async fn subscribers(
        &self,
        fingerprint: &str,
    ) -> Result<Vec<Subscription>, ConditionError> {
        self.store.subscribers(fingerprint).await
    }
}

/// Convenience for tests and the CLI: registers a condition described as
/// loose JSON.
pub fn parse_entry(value: &serde_json::Value) -> Result<EntryCondition, ConditionError> {
    serde_json::from_value(value.clone())
        .map_err(|e| ConditionError::bad(format!("unparseable entry condition: {e}")))
}

/// Re-exported for callers that only have a fingerprint and need the frame
/// it evaluates on.
pub fn frame_of(record: &ConditionRecord) -> (String, Timeframe) {
    (record.symbol.clone(), record.timeframe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::model::ConditionKind;
    use crate::playbook::{Gate, Logic, PlaybookItemSpec, PlaybookSpec};
    use std::collections::BTreeMap;

    fn rsi_cross_spec() -> ConditionSpec {
        ConditionSpec {
            kind: ConditionKind::Indicator,
            indicator: Some("rsi".to_string()),
            component: None,
            settings: BTreeMap::new(),
            operator: "crosses_below".to_string(),
            compare_mode: None,
            value: Some(30.0),
            lower: None,
            upper: None,
            compare_indicator: None,
            pattern: None,
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::H1,
        }
    }

    fn registry() -> Registry {
        Registry::new(Arc::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let reg = registry();
        let fp1 = reg.register(&rsi_cross_spec()).await.unwrap();
        let fp2 = reg.register(&rsi_cross_spec()).await.unwrap();
        assert_eq!(fp1, fp2);

        let record = reg.store().get_condition(&fp1).await.unwrap().unwrap();
        assert_eq!(record.condition_type, "indicator");
        assert_eq!(record.symbol, "BTCUSDT");
        assert_eq!(record.evaluation_count, 0);
    }

    #[tokio::test]
    async fn only_active_subscriptions_activate_fingerprints() {
        let reg = registry();
        let fp = reg.register(&rsi_cross_spec()).await.unwrap();
        assert!(reg.active_fingerprints().await.unwrap().is_empty());

        let sub_id = reg
            .subscribe(
                Uuid::new_v4(),
                Uuid::new_v4(),
                BotType::Dca,
                &fp,
                serde_json::json!({}),
            )
            .await
            .unwrap();
        assert!(reg.active_fingerprints().await.unwrap().contains(&fp));

        reg.set_status(sub_id, SubscriptionStatus::Paused).await.unwrap();
        assert!(reg.active_fingerprints().await.unwrap().is_empty());

        reg.set_status(sub_id, SubscriptionStatus::Active).await.unwrap();
        reg.unsubscribe(sub_id).await.unwrap();
        assert!(reg.active_fingerprints().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn playbook_registration_registers_items_and_wrapper() {
        let reg = registry();
        let playbook = EntryCondition::Playbook(PlaybookSpec {
            gate: Gate::All,
            evaluation_order: Default::default(),
            items: vec![PlaybookItemSpec {
                priority: 1,
                logic: Logic::And,
                enabled: true,
                validity_bars: Some(10),
                validity_minutes: None,
                condition: rsi_cross_spec(),
            }],
        });

        let entry = reg.register_entry(&playbook).await.unwrap();
        assert_eq!(entry.item_fingerprints.len(), 1);
        assert_ne!(entry.fingerprint, entry.item_fingerprints[0]);

        let wrapper = reg
            .store()
            .get_condition(&entry.fingerprint)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(wrapper.condition_type, "playbook");

        let item = reg
            .store()
            .get_condition(&entry.item_fingerprints[0])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.condition_type, "indicator");
    }
}
