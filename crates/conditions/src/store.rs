use crate::error::ConditionError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{ConditionRecord, Subscription, SubscriptionStatus};
use uuid::Uuid;

/// The persistence contract behind the condition registry.
///
/// Implementations: `database::DbRepository` (Postgres) for live runs,
/// `InMemoryStore` for paper mode and tests. All writes are idempotent or
/// append-only so the registry can safely retry on transient failures.
#[async_trait]
pub trait ConditionStore: Send + Sync {
    /// Inserts the condition if absent; an existing row is left untouched.
    async fn upsert_condition(&self, record: &ConditionRecord) -> Result<(), ConditionError>;

    async fn get_condition(
        &self,
        fingerprint: &str,
    ) -> Result<Option<ConditionRecord>, ConditionError>;

    /// Conditions holding at least one `active` subscription.
    async fn active_conditions(&self) -> Result<Vec<ConditionRecord>, ConditionError>;

    async fn insert_subscription(&self, sub: &Subscription) -> Result<(), ConditionError>;

    async fn set_subscription_status(
        &self,
        subscription_id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<(), ConditionError>;

    /// All subscriptions pointing at a fingerprint, any status.
    async fn subscribers(&self, fingerprint: &str) -> Result<Vec<Subscription>, ConditionError>;

    async fn active_subscriptions(&self) -> Result<Vec<Subscription>, ConditionError>;

    /// All subscriptions held by one bot, any status.
    async fn subscriptions_for_bot(
        &self,
        bot_id: Uuid,
    ) -> Result<Vec<Subscription>, ConditionError>;

    /// Stamps `last_evaluated_at` and bumps `evaluation_count` for each
    /// fingerprint that completed an evaluation this cycle.
    async fn mark_evaluated(
        &self,
        fingerprints: &[String],
        at: DateTime<Utc>,
    ) -> Result<(), ConditionError>;

    /// Stamps `last_triggered_at` with the bar close time and bumps
    /// `trigger_count`. The evaluator consults the stamp for debounce, so
    /// this write is what makes the once-per-bar invariant survive
    /// restarts.
    async fn mark_triggered(
        &self,
        fingerprint: &str,
        bar_close_time: DateTime<Utc>,
    ) -> Result<(), ConditionError>;
}
