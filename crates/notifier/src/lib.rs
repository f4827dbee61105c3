//! # Stratum Bot Notifier
//!
//! Bridges the event bus to the executor pool. On start it scans the
//! `active` subscriptions and opens one bus subscription per distinct
//! fingerprint; each incoming trigger is routed to every subscribed bot
//! that is currently `running`, keyed by bot type. Everything else —
//! paused bots, missing bots, store hiccups — is swallowed and logged,
//! never propagated: one broken subscriber must not starve the rest.
//!
//! Subscription changes (create/pause/revoke) take effect within one
//! evaluator cycle via `refresh()`.

pub mod directory;
pub mod error;

pub use directory::{BotDirectory, InMemoryBotDirectory};
pub use error::NotifierError;

use conditions::ConditionStore;
use core_types::{BotStatus, SubscriptionStatus, TriggerEvent};
use event_bus::{EventBus, SubscriptionHandle};
use executor::ExecutorPool;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

struct Fanout {
    handle: SubscriptionHandle,
    task: JoinHandle<()>,
}

pub struct BotNotifier {
    bus: EventBus,
    subscriptions: Arc<dyn ConditionStore>,
    bots: Arc<dyn BotDirectory>,
    pool: ExecutorPool,
    fanouts: Mutex<HashMap<String, Fanout>>,
}

impl BotNotifier {
    pub fn new(
        bus: EventBus,
        subscriptions: Arc<dyn ConditionStore>,
        bots: Arc<dyn BotDirectory>,
        pool: ExecutorPool,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            subscriptions,
            bots,
            pool,
            fanouts: Mutex::new(HashMap::new()),
        })
    }

    /// Scans active subscriptions and opens a bus subscription per
    /// fingerprint. Returns how many fingerprints are now watched.
    pub async fn start(self: &Arc<Self>) -> Result<usize, NotifierError> {
        let count = self.refresh().await?;
        tracing::info!(fingerprints = count, "bot notifier started");
        Ok(count)
    }

    /// Reconciles bus subscriptions with the store: fingerprints that
    /// gained an active subscriber are added, ones that lost their last
    /// subscriber are dropped.
    pub async fn refresh(self: &Arc<Self>) -> Result<usize, NotifierError> {
        let active: BTreeSet<String> = self
            .subscriptions
            .active_subscriptions()
            .await
            .map_err(|e| NotifierError::Store(e.to_string()))?
            .into_iter()
            .map(|sub| sub.fingerprint)
            .collect();

        let mut fanouts = self.fanouts.lock().expect("notifier mutex");

        let stale: Vec<String> = fanouts
            .keys()
            .filter(|fp| !active.contains(*fp))
            .cloned()
            .collect();
        for fp in stale {
            if let Some(fanout) = fanouts.remove(&fp) {
                self.bus.unsubscribe(fanout.handle);
                fanout.task.abort();
                tracing::debug!(fingerprint = %fp, "fan-out dropped");
            }
        }

        for fp in &active {
            if fanouts.contains_key(fp) {
                continue;
            }
            let (handle, receiver) = self.bus.subscribe(&format!("condition.{fp}"));
            let notifier = Arc::clone(self);
            let task = tokio::spawn(async move {
                while let Some(event) = receiver.recv().await {
                    notifier.dispatch(event).await;
                }
            });
            fanouts.insert(fp.clone(), Fanout { handle, task });
            tracing::debug!(fingerprint = %fp, "fan-out opened");
        }

        Ok(fanouts.len())
    }

    /// Routes one trigger event to its subscribed, running bots.
    /// Per-subscriber failures are logged and skipped.
    async fn dispatch(&self, event: TriggerEvent) {
        let subscribers = match self.subscriptions.subscribers(&event.fingerprint).await {
            Ok(subs) => subs,
            Err(e) => {
                tracing::warn!(fingerprint = %event.fingerprint, error = %e, "subscriber lookup failed");
                return;
            }
        };

        for sub in subscribers {
            if sub.status != SubscriptionStatus::Active {
                continue;
            }
            let bot = match self.bots.bot(sub.bot_id).await {
                Ok(Some(bot)) => bot,
                Ok(None) => {
                    tracing::debug!(bot = %sub.bot_id, "subscription points at a deleted bot");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(bot = %sub.bot_id, error = %e, "bot lookup failed");
                    continue;
                }
            };
            if bot.status != BotStatus::Running {
                tracing::debug!(
                    bot = %bot.bot_id,
                    status = ?bot.status,
                    fingerprint = %event.fingerprint,
                    "trigger ignored, bot not running"
                );
                continue;
            }

            if self.pool.dispatch_trigger(bot.bot_id, event.clone()) {
                if let Err(e) = self
                    .bots
                    .subscription_triggered(sub.subscription_id, event.triggered_at)
                    .await
                {
                    tracing::debug!(error = %e, "failed to stamp subscription trigger time");
                }
            }
        }
    }

    /// Drops every fan-out. Used on engine shutdown.
    pub fn shutdown(&self) {
        let mut fanouts = self.fanouts.lock().expect("notifier mutex");
        for (_, fanout) in fanouts.drain() {
            self.bus.unsubscribe(fanout.handle);
            fanout.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use conditions::InMemoryStore;
    use configuration::{EngineSettings, ExecutionMode, PaperSettings};
    use core_types::{BotRecord, BotType, Subscription, Timeframe};
    use executor::{InMemoryStateStore, PoolDeps};
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use uuid::Uuid;

    struct Rig {
        bus: EventBus,
        notifier: Arc<BotNotifier>,
        store: Arc<InMemoryStore>,
        bots: Arc<InMemoryBotDirectory>,
        state: Arc<InMemoryStateStore>,
        pool: ExecutorPool,
    }

    fn rig() -> Rig {
        let bus = EventBus::new(32);
        let store = Arc::new(InMemoryStore::new());
        let bots = Arc::new(InMemoryBotDirectory::new());
        let state = Arc::new(InMemoryStateStore::new());
        let pool = ExecutorPool::new(PoolDeps {
            engine: EngineSettings::default(),
            paper: PaperSettings {
                initial_balance: dec!(10000),
                taker_fee_pct: rust_decimal::Decimal::ZERO,
                slippage_bps: rust_decimal::Decimal::ZERO,
            },
            mode: ExecutionMode::Paper,
            store: Arc::clone(&state) as Arc<dyn executor::StateStore>,
            live: None,
        });
        let notifier = BotNotifier::new(
            bus.clone(),
            Arc::clone(&store) as Arc<dyn ConditionStore>,
            Arc::clone(&bots) as Arc<dyn BotDirectory>,
            pool.clone(),
        );
        Rig { bus, notifier, store, bots, state, pool }
    }

    fn bot_record(status: BotStatus) -> BotRecord {
        BotRecord {
            bot_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            bot_type: BotType::Dca,
            status,
            symbols: vec!["BTCUSDT".to_string()],
            interval: Timeframe::H1,
            config: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    async fn subscribe(rig: &Rig, bot: &BotRecord, fingerprint: &str) -> Uuid {
        let sub = Subscription {
            subscription_id: Uuid::new_v4(),
            user_id: bot.user_id,
            bot_id: bot.bot_id,
            bot_type: bot.bot_type,
            fingerprint: fingerprint.to_string(),
            bot_config: serde_json::json!({}),
            status: SubscriptionStatus::Active,
            created_at: Utc::now(),
            last_triggered_at: None,
        };
        rig.store.insert_subscription(&sub).await.unwrap();
        sub.subscription_id
    }

    fn event(fingerprint: &str) -> TriggerEvent {
        let mut values = BTreeMap::new();
        values.insert("close".to_string(), 100.0);
        TriggerEvent {
            event_id: Uuid::new_v4(),
            fingerprint: fingerprint.to_string(),
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::H1,
            triggered_at: Utc::now(),
            bar_close_time: Utc::now(),
            values,
        }
    }

    #[tokio::test]
    async fn trigger_reaches_a_running_bot() {
        let r = rig();
        let bot = bot_record(BotStatus::Running);
        r.bots.insert(bot.clone());
        r.pool.start_bot(bot.clone(), Uuid::new_v4()).unwrap();
        subscribe(&r, &bot, "fp1").await;

        r.notifier.start().await.unwrap();
        let ev = event("fp1");
        r.bus.publish(&ev.topic(), &ev);
        tokio::time::sleep(Duration::from_millis(100)).await;

        // The trigger became an entry order.
        assert_eq!(r.state.orders().len(), 1);
    }

    #[tokio::test]
    async fn paused_bot_is_skipped() {
        let r = rig();
        let bot = bot_record(BotStatus::Paused);
        r.bots.insert(bot.clone());
        r.pool.start_bot(bot.clone(), Uuid::new_v4()).unwrap();
        subscribe(&r, &bot, "fp2").await;

        r.notifier.start().await.unwrap();
        let ev = event("fp2");
        r.bus.publish(&ev.topic(), &ev);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(r.state.orders().is_empty());
    }

    #[tokio::test]
    async fn refresh_tracks_subscription_changes() {
        let r = rig();
        assert_eq!(r.notifier.start().await.unwrap(), 0);

        let bot = bot_record(BotStatus::Running);
        r.bots.insert(bot.clone());
        let sub_id = subscribe(&r, &bot, "fp3").await;
        assert_eq!(r.notifier.refresh().await.unwrap(), 1);

        // Revoking the only subscriber drops the fan-out.
        r.store
            .set_subscription_status(sub_id, SubscriptionStatus::Revoked)
            .await
            .unwrap();
        assert_eq!(r.notifier.refresh().await.unwrap(), 0);
    }
}
