use crate::error::ConditionError;
use crate::store::ConditionStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{ConditionRecord, Subscription, SubscriptionStatus};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// A process-local `ConditionStore` for paper mode and tests. State is a
/// pair of maps behind one mutex; every operation is a short critical
/// section with no awaits inside.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    conditions: HashMap<String, ConditionRecord>,
    subscriptions: HashMap<Uuid, Subscription>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConditionStore for InMemoryStore {
    async fn upsert_condition(&self, record: &ConditionRecord) -> Result<(), ConditionError> {
        let mut inner = self.inner.lock().expect("store mutex");
        inner
            .conditions
            .entry(record.fingerprint.clone())
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn get_condition(
        &self,
        fingerprint: &str,
    ) -> Result<Option<ConditionRecord>, ConditionError> {
        let inner = self.inner.lock().expect("store mutex");
        Ok(inner.conditions.get(fingerprint).cloned())
    }

    async fn active_conditions(&self) -> Result<Vec<ConditionRecord>, ConditionError> {
        let inner = self.inner.lock().expect("store mutex");
        let mut out: Vec<ConditionRecord> = inner
            .conditions
            .values()
            .filter(|c| {
                inner.subscriptions.values().any(|s| {
                    s.fingerprint == c.fingerprint && s.status == SubscriptionStatus::Active
                })
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        Ok(out)
    }

    async fn insert_subscription(&self, sub: &Subscription) -> Result<(), ConditionError> {
        let mut inner = self.inner.lock().expect("store mutex");
        inner.subscriptions.insert(sub.subscription_id, sub.clone());
        Ok(())
    }

    async fn set_subscription_status(
        &self,
        subscription_id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<(), ConditionError> {
        let mut inner = self.inner.lock().expect("store mutex");
        match inner.subscriptions.get_mut(&subscription_id) {
            Some(sub) => {
                sub.status = status;
                Ok(())
            }
            None => Err(ConditionError::Store(format!(
                "unknown subscription {subscription_id}"
            ))),
        }
    }

    async fn subscribers(&self, fingerprint: &str) -> Result<Vec<Subscription>, ConditionError> {
        let inner = self.inner.lock().expect("store mutex");
        let mut out: Vec<Subscription> = inner
            .subscriptions
            .values()
            .filter(|s| s.fingerprint == fingerprint)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.created_at);
        Ok(out)
    }

    async fn active_subscriptions(&self) -> Result<Vec<Subscription>, ConditionError> {
        let inner = self.inner.lock().expect("store mutex");
        let mut out: Vec<Subscription> = inner
            .subscriptions
            .values()
            .filter(|s| s.status == SubscriptionStatus::Active)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.created_at);
        Ok(out)
    }

    async fn subscriptions_for_bot(
        &self,
        bot_id: Uuid,
    ) -> Result<Vec<Subscription>, ConditionError> {
        let inner = self.inner.lock().expect("store mutex");
        let mut out: Vec<Subscription> = inner
            .subscriptions
            .values()
            .filter(|s| s.bot_id == bot_id)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.created_at);
        Ok(out)
    }

    async fn mark_evaluated(
        &self,
        fingerprints: &[String],
        at: DateTime<Utc>,
    ) -> Result<(), ConditionError> {
        let mut inner = self.inner.lock().expect("store mutex");
        for fp in fingerprints {
            if let Some(record) = inner.conditions.get_mut(fp) {
                record.last_evaluated_at = Some(at);
                record.evaluation_count += 1;
            }
        }
        Ok(())
    }

    async fn mark_triggered(
        &self,
        fingerprint: &str,
        bar_close_time: DateTime<Utc>,
    ) -> Result<(), ConditionError> {
        let mut inner = self.inner.lock().expect("store mutex");
        if let Some(record) = inner.conditions.get_mut(fingerprint) {
            record.last_triggered_at = Some(bar_close_time);
            record.trigger_count += 1;
        }
        Ok(())
    }
}
