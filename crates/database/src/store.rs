use crate::repository::DbRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conditions::{ConditionError, ConditionStore};
use core_types::{ConditionRecord, Subscription, SubscriptionStatus};
use uuid::Uuid;

// Every database failure surfaces to the registry as a transient store
// error; the caller retries on a later cycle with identical input.
fn transient(e: crate::DbError) -> ConditionError {
    ConditionError::Store(e.to_string())
}

#[async_trait]
impl ConditionStore for DbRepository {
    async fn upsert_condition(&self, record: &ConditionRecord) -> Result<(), ConditionError> {
        DbRepository::upsert_condition(self, record).await.map_err(transient)
    }

    async fn get_condition(
        &self,
        fingerprint: &str,
    ) -> Result<Option<ConditionRecord>, ConditionError> {
        DbRepository::get_condition(self, fingerprint).await.map_err(transient)
    }

    async fn active_conditions(&self) -> Result<Vec<ConditionRecord>, ConditionError> {
        DbRepository::active_conditions(self).await.map_err(transient)
    }

    async fn insert_subscription(&self, sub: &Subscription) -> Result<(), ConditionError> {
        DbRepository::insert_subscription(self, sub).await.map_err(transient)
    }

    async fn set_subscription_status(
        &self,
        subscription_id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<(), ConditionError> {
        DbRepository::set_subscription_status(self, subscription_id, status)
            .await
            .map_err(transient)
    }

    async fn subscribers(&self, fingerprint: &str) -> Result<Vec<Subscription>, ConditionError> {
        DbRepository::subscribers(self, fingerprint).await.map_err(transient)
    }

    async fn active_subscriptions(&self) -> Result<Vec<Subscription>, ConditionError> {
        DbRepository::active_subscriptions(self).await.map_err(transient)
    }

    async fn subscriptions_for_bot(
        &self,
        bot_id: Uuid,
    ) -> Result<Vec<Subscription>, ConditionError> {
        DbRepository::subscriptions_for_bot(self, bot_id).await.map_err(transient)
    }

    async fn mark_evaluated(
        &self,
        fingerprints: &[String],
        at: DateTime<Utc>,
    ) -> Result<(), ConditionError> {
        DbRepository::mark_evaluated(self, fingerprints, at).await.map_err(transient)
    }

    async fn mark_triggered(
        &self,
        fingerprint: &str,
        bar_close_time: DateTime<Utc>,
    ) -> Result<(), ConditionError> {
        DbRepository::mark_triggered(self, fingerprint, bar_close_time)
            .await
            .map_err(transient)
    }
}
