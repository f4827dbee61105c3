//! # Stratum Engine
//!
//! The lifecycle owner. An `Engine` value wires together the condition
//! registry, the shared evaluator, the event bus, the bot notifier, and
//! the executor pool — there are no module-level singletons; everything
//! the system caches or schedules is owned here, and initialization and
//! teardown are one lifecycle.
//!
//! The engine is driven by the bot management actions
//! `create / start / stop / pause / resume / delete` and answers the
//! read-only queries `status / positions / orders / pnl`. Status
//! transitions follow the bot lifecycle strictly; anything else is a
//! typed `InvalidTransition` with no state change.

pub mod error;
pub mod store;

pub use error::EngineError;
pub use store::{EngineStore, InMemoryEngineStore};

use api_client::{ExecutionClient, MarketData};
use chrono::Utc;
use conditions::{ConditionStore, EntryCondition, InMemoryStore, Registry};
use configuration::{ExecutionMode, Settings};
use core_types::{
    BotRecord, BotRun, BotStatus, BotType, Order, Position, RunStatus, SubscriptionStatus,
    Timeframe,
};
use database::DbRepository;
use evaluator::{EvaluatorMetrics, MetricsSnapshot, SharedEvaluator};
use event_bus::EventBus;
use executor::{ExecutorPool, InMemoryStateStore, PoolDeps, StateStore};
use notifier::{BotDirectory, BotNotifier};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::{Mutex, watch};
use uuid::Uuid;

/// Pnl summary for one bot across its open positions.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct PnlSummary {
    pub realized: Decimal,
    pub unrealized: Decimal,
}

/// The persistence backends an engine runs against.
pub struct EngineParts {
    pub conditions: Arc<dyn ConditionStore>,
    pub bots: Arc<dyn EngineStore>,
    pub directory: Arc<dyn BotDirectory>,
    pub state: Arc<dyn StateStore>,
    pub live_client: Option<Arc<dyn ExecutionClient>>,
    pub mode: ExecutionMode,
}

impl EngineParts {
    /// Live wiring: everything persists through Postgres and orders go to
    /// the signed exchange client.
    pub fn live(repo: DbRepository, exchange: Arc<dyn ExecutionClient>) -> Self {
        let repo = Arc::new(repo);
        Self {
            conditions: Arc::clone(&repo) as Arc<dyn ConditionStore>,
            bots: Arc::clone(&repo) as Arc<dyn EngineStore>,
            directory: Arc::clone(&repo) as Arc<dyn BotDirectory>,
            state: repo as Arc<dyn StateStore>,
            live_client: Some(exchange),
            mode: ExecutionMode::Live,
        }
    }

    /// Paper wiring: in-memory stores, per-bot paper brokers, no exchange
    /// credentials required. The executor flushes through the same store
    /// the engine queries, so runs open and close in one place.
    pub fn paper() -> Self {
        let state = Arc::new(InMemoryStateStore::new());
        let engine_store = Arc::new(InMemoryEngineStore::new(state));
        Self {
            conditions: Arc::new(InMemoryStore::new()) as Arc<dyn ConditionStore>,
            bots: Arc::clone(&engine_store) as Arc<dyn EngineStore>,
            directory: Arc::clone(&engine_store) as Arc<dyn BotDirectory>,
            state: engine_store as Arc<dyn StateStore>,
            live_client: None,
            mode: ExecutionMode::Paper,
        }
    }
}

pub struct Engine {
    settings: Settings,
    registry: Registry,
    conditions: Arc<dyn ConditionStore>,
    bots: Arc<dyn EngineStore>,
    bus: EventBus,
    market: Arc<dyn MarketData>,
    pool: ExecutorPool,
    notifier: Arc<BotNotifier>,
    metrics: Arc<EvaluatorMetrics>,
    evaluator: Mutex<Option<SharedEvaluator>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Engine {
    pub fn new(settings: Settings, market: Arc<dyn MarketData>, parts: EngineParts) -> Arc<Self> {
        let bus = EventBus::new(settings.engine.mailbox_capacity);
        let registry = Registry::new(Arc::clone(&parts.conditions));
        let metrics = Arc::new(EvaluatorMetrics::default());

        let pool = ExecutorPool::new(PoolDeps {
            engine: settings.engine.clone(),
            paper: settings.paper.clone(),
            mode: parts.mode,
            store: Arc::clone(&parts.state),
            live: parts.live_client.clone(),
        });

        let notifier = BotNotifier::new(
            bus.clone(),
            Arc::clone(&parts.conditions),
            Arc::clone(&parts.directory),
            pool.clone(),
        );

        let evaluator = SharedEvaluator::new(
            Arc::clone(&parts.conditions),
            Arc::clone(&market),
            bus.clone(),
            settings.engine.clone(),
            Arc::clone(&metrics),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Arc::new(Self {
            settings,
            registry,
            conditions: parts.conditions,
            bots: parts.bots,
            bus,
            market,
            pool,
            notifier,
            metrics,
            evaluator: Mutex::new(Some(evaluator)),
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    // -----------------------------------------------------------------------
    // Background tasks
    // -----------------------------------------------------------------------

    /// Re-hosts executors for bots that were `running` when the process
    /// last exited. Their open run continues; positions reload from the
    /// store on the next fill.
    async fn recover_running_bots(&self) -> Result<(), EngineError> {
        for bot in self.bots.list_bots().await? {
            if bot.status != BotStatus::Running || self.pool.is_active(bot.bot_id) {
                continue;
            }
            let run_id = match self.bots.running_run(bot.bot_id).await? {
                Some(run) => run.run_id,
                None => {
                    // Running status without an open run: heal the record.
                    tracing::warn!(bot = %bot.bot_id, "running bot without an open run, marking stopped");
                    self.bots.set_bot_status(bot.bot_id, BotStatus::Stopped).await?;
                    continue;
                }
            };
            if let Err(e) = self.pool.start_bot(bot.clone(), run_id) {
                tracing::warn!(bot = %bot.bot_id, error = %e, "failed to recover executor");
            } else {
                tracing::info!(bot = %bot.bot_id, run = %run_id, "executor recovered");
            }
        }
        Ok(())
    }

    /// Starts the long-running tasks: the evaluator loop, the tick
    /// poller, and the notifier refresh loop.
    pub async fn start_background(self: &Arc<Self>) -> Result<(), EngineError> {
        self.recover_running_bots().await?;
        self.notifier
            .start()
            .await
            .map_err(|e| EngineError::Store(e.to_string()))?;

        let evaluator = self
            .evaluator
            .lock()
            .await
            .take()
            .ok_or_else(|| EngineError::Store("engine already running".to_string()))?;
        tokio::spawn(evaluator.run(self.shutdown_rx.clone()));

        // Mark-price poller: one get_ticker per active symbol per period.
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut shutdown = engine.shutdown_rx.clone();
            let period = StdDuration::from_secs(engine.settings.engine.tick_secs);
            let timeout = StdDuration::from_secs(engine.settings.engine.market_data_timeout_secs);
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(period) => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() { return; }
                    }
                }
                for symbol in engine.pool.active_symbols() {
                    match tokio::time::timeout(timeout, engine.market.get_ticker(&symbol)).await {
                        Ok(Ok(tick)) => engine.pool.tick(&tick),
                        Ok(Err(e)) => {
                            tracing::warn!(symbol = %symbol, error = %e, "ticker fetch failed");
                        }
                        Err(_elapsed) => {
                            tracing::warn!(symbol = %symbol, "ticker fetch timed out");
                        }
                    }
                }
            }
        });

        // Subscription reconciliation: changes land within one cycle.
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut shutdown = engine.shutdown_rx.clone();
            let period = StdDuration::from_secs(engine.settings.engine.cycle_secs);
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(period) => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() { return; }
                    }
                }
                if let Err(e) = engine.notifier.refresh().await {
                    tracing::warn!(error = %e, "notifier refresh failed");
                }
            }
        });

        tracing::info!("engine background tasks started");
        Ok(())
    }

    /// Runs exactly one evaluation cycle (the `cycle` CLI command).
    /// Only valid before `start_background` has taken the evaluator.
    pub async fn run_single_cycle(&self) -> Result<evaluator::CycleSummary, EngineError> {
        let mut guard = self.evaluator.lock().await;
        let evaluator = guard
            .as_mut()
            .ok_or_else(|| EngineError::Store("evaluator is owned by the run loop".to_string()))?;
        evaluator
            .run_cycle()
            .await
            .map_err(|e| EngineError::Store(e.to_string()))
    }

    /// Signals every background task to stop and tears down fan-outs.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.notifier.shutdown();
        tracing::info!("engine shutdown signalled");
    }

    // -----------------------------------------------------------------------
    // Bot lifecycle
    // -----------------------------------------------------------------------

    /// Creates a bot: registers its entry condition (or playbook),
    /// subscribes the bot to the resulting fingerprint, and persists the
    /// bot record as `inactive`.
    pub async fn create_bot(
        &self,
        user_id: Uuid,
        bot_type: BotType,
        symbols: Vec<String>,
        interval: Timeframe,
        config: JsonValue,
    ) -> Result<Uuid, EngineError> {
        let entry_value = config
            .get("entry")
            .ok_or_else(|| EngineError::BadConfig("bot config has no entry condition".to_string()))?;
        let entry: EntryCondition = serde_json::from_value(entry_value.clone())
            .map_err(|e| EngineError::BadConfig(format!("entry condition: {e}")))?;

        // Validate the DCA section up front so a bad bot never persists.
        executor::DcaConfig::from_bot_config(&config)?;

        let registered = self.registry.register_entry(&entry).await?;

        let bot = BotRecord {
            bot_id: Uuid::new_v4(),
            user_id,
            bot_type,
            status: BotStatus::Inactive,
            symbols,
            interval,
            config: config.clone(),
            created_at: Utc::now(),
        };
        self.bots.insert_bot(&bot).await?;

        self.registry
            .subscribe(bot.bot_id, user_id, bot_type, &registered.fingerprint, config)
            .await?;

        // If the bot's DCA rule references a custom condition, subscribe
        // to that fingerprint as well so its triggers reach the executor.
        if let Ok(dca) = executor::DcaConfig::from_bot_config(&bot.config) {
            if let executor::DcaRule::CustomCondition { fingerprint } = dca.rule {
                self.registry
                    .subscribe(bot.bot_id, user_id, bot_type, &fingerprint, bot.config.clone())
                    .await?;
            }
        }

        if let Err(e) = self.notifier.refresh().await {
            tracing::warn!(error = %e, "notifier refresh after create failed");
        }

        tracing::info!(bot = %bot.bot_id, fingerprint = %registered.fingerprint, "bot created");
        Ok(bot.bot_id)
    }

    async fn require_bot(&self, bot_id: Uuid) -> Result<BotRecord, EngineError> {
        self.bots
            .get_bot(bot_id)
            .await?
            .ok_or(EngineError::NotFound(bot_id))
    }

    fn check_transition(bot: &BotRecord, to: BotStatus) -> Result<(), EngineError> {
        if bot.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(EngineError::InvalidTransition { bot_id: bot.bot_id, from: bot.status, to })
        }
    }

    /// `inactive/stopped -> running`: opens a bot run and spawns the
    /// executor.
    pub async fn start_bot(&self, bot_id: Uuid) -> Result<Uuid, EngineError> {
        let bot = self.require_bot(bot_id).await?;
        Self::check_transition(&bot, BotStatus::Running)?;

        let run = BotRun {
            run_id: Uuid::new_v4(),
            bot_id,
            started_at: Utc::now(),
            ended_at: None,
            status: RunStatus::Running,
            stats: serde_json::json!({}),
        };
        self.bots.insert_run(&run).await?;
        self.bots.set_bot_status(bot_id, BotStatus::Running).await?;

        let mut started = bot.clone();
        started.status = BotStatus::Running;
        self.pool.start_bot(started, run.run_id)?;

        self.set_subscriptions(bot_id, SubscriptionStatus::Active).await;
        if let Err(e) = self.notifier.refresh().await {
            tracing::warn!(error = %e, "notifier refresh after start failed");
        }

        tracing::info!(bot = %bot_id, run = %run.run_id, "bot started");
        Ok(run.run_id)
    }

    /// `running -> paused`: the executor keeps its position book but
    /// consumes no triggers.
    pub async fn pause_bot(&self, bot_id: Uuid) -> Result<(), EngineError> {
        let bot = self.require_bot(bot_id).await?;
        Self::check_transition(&bot, BotStatus::Paused)?;

        self.bots.set_bot_status(bot_id, BotStatus::Paused).await?;
        self.pool.pause(bot_id);
        self.set_subscriptions(bot_id, SubscriptionStatus::Paused).await;

        tracing::info!(bot = %bot_id, "bot paused");
        Ok(())
    }

    /// `paused -> running`.
    pub async fn resume_bot(&self, bot_id: Uuid) -> Result<(), EngineError> {
        let bot = self.require_bot(bot_id).await?;
        if bot.status != BotStatus::Paused {
            return Err(EngineError::InvalidTransition {
                bot_id,
                from: bot.status,
                to: BotStatus::Running,
            });
        }

        self.bots.set_bot_status(bot_id, BotStatus::Running).await?;
        self.pool.resume(bot_id);
        self.set_subscriptions(bot_id, SubscriptionStatus::Active).await;
        if let Err(e) = self.notifier.refresh().await {
            tracing::warn!(error = %e, "notifier refresh after resume failed");
        }

        tracing::info!(bot = %bot_id, "bot resumed");
        Ok(())
    }

    /// `running/paused -> stopped`: drains the executor under the stop
    /// deadline and closes the bot run.
    pub async fn stop_bot(&self, bot_id: Uuid) -> Result<(), EngineError> {
        let bot = self.require_bot(bot_id).await?;
        Self::check_transition(&bot, BotStatus::Stopped)?;

        self.pool.stop(bot_id).await;
        self.bots.set_bot_status(bot_id, BotStatus::Stopped).await?;
        self.set_subscriptions(bot_id, SubscriptionStatus::Paused).await;

        tracing::info!(bot = %bot_id, "bot stopped");
        Ok(())
    }

    /// Deletes a bot from any status. Subscriptions are revoked and runs
    /// cascade; historical order and position rows are retained.
    pub async fn delete_bot(&self, bot_id: Uuid) -> Result<(), EngineError> {
        let bot = self.require_bot(bot_id).await?;

        if matches!(bot.status, BotStatus::Running | BotStatus::Paused) {
            self.pool.stop(bot_id).await;
        }
        self.set_subscriptions(bot_id, SubscriptionStatus::Revoked).await;
        self.bots.delete_bot(bot_id).await?;
        if let Err(e) = self.notifier.refresh().await {
            tracing::warn!(error = %e, "notifier refresh after delete failed");
        }

        tracing::info!(bot = %bot_id, "bot deleted");
        Ok(())
    }

    async fn set_subscriptions(&self, bot_id: Uuid, status: SubscriptionStatus) {
        let subs = match self.conditions.subscriptions_for_bot(bot_id).await {
            Ok(subs) => subs,
            Err(e) => {
                tracing::warn!(bot = %bot_id, error = %e, "subscription lookup failed");
                return;
            }
        };
        for sub in subs {
            // A revoked subscription stays revoked.
            if sub.status == SubscriptionStatus::Revoked {
                continue;
            }
            if let Err(e) = self
                .conditions
                .set_subscription_status(sub.subscription_id, status)
                .await
            {
                tracing::warn!(subscription = %sub.subscription_id, error = %e, "subscription status update failed");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Read-only queries
    // -----------------------------------------------------------------------

    pub async fn bot_status(&self, bot_id: Uuid) -> Result<(BotRecord, Option<BotRun>), EngineError> {
        let bot = self.require_bot(bot_id).await?;
        let run = self.bots.running_run(bot_id).await?;
        Ok((bot, run))
    }

    pub async fn list_bots(&self) -> Result<Vec<BotRecord>, EngineError> {
        self.bots.list_bots().await
    }

    pub async fn positions(&self, bot_id: Uuid) -> Result<Vec<Position>, EngineError> {
        self.require_bot(bot_id).await?;
        self.bots.positions(bot_id).await
    }

    pub async fn orders(&self, bot_id: Uuid, limit: i64) -> Result<Vec<Order>, EngineError> {
        self.require_bot(bot_id).await?;
        self.bots.orders(bot_id, limit).await
    }

    pub async fn pnl(&self, bot_id: Uuid) -> Result<PnlSummary, EngineError> {
        let positions = self.positions(bot_id).await?;
        let mut summary = PnlSummary::default();
        for position in positions {
            summary.realized += position.realized_pnl;
            summary.unrealized += position.unrealized_pnl;
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use api_client::error::ApiError;
    use async_trait::async_trait;
    use core_types::{Bar, Tick};
    use rust_decimal::prelude::FromPrimitive;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    /// Scripted market data for engine-level tests.
    #[derive(Default)]
    struct ScriptedMarket {
        closes: StdMutex<HashMap<(String, Timeframe), Vec<f64>>>,
    }

    impl ScriptedMarket {
        fn set(&self, symbol: &str, tf: Timeframe, closes: Vec<f64>) {
            self.closes
                .lock()
                .unwrap()
                .insert((symbol.to_string(), tf), closes);
        }
    }

    #[async_trait]
    impl MarketData for ScriptedMarket {
        async fn get_klines(
            &self,
            symbol: &str,
            timeframe: Timeframe,
            _limit: u32,
        ) -> Result<Vec<Bar>, ApiError> {
            let closes = self
                .closes
                .lock()
                .unwrap()
                .get(&(symbol.to_string(), timeframe))
                .cloned()
                .unwrap_or_default();
            let start = chrono::TimeZone::with_ymd_and_hms(&Utc, 2024, 1, 1, 0, 0, 0).unwrap();
            let mut with_forming = closes.clone();
            with_forming.push(*closes.last().unwrap_or(&0.0));
            Ok(with_forming
                .iter()
                .enumerate()
                .map(|(i, &c)| {
                    let open_time = start + timeframe.duration() * i as i32;
                    let px = Decimal::from_f64(c).unwrap();
                    Bar {
                        open_time,
                        open: px,
                        high: px,
                        low: px,
                        close: px,
                        volume: Decimal::from(1000),
                        close_time: open_time + timeframe.duration(),
                    }
                })
                .collect())
        }

        async fn get_ticker(&self, symbol: &str) -> Result<Tick, ApiError> {
            Ok(Tick {
                symbol: symbol.to_string(),
                price: Decimal::from(100),
                timestamp: Utc::now(),
            })
        }
    }

    fn paper_engine() -> (Arc<Engine>, Arc<ScriptedMarket>) {
        let market = Arc::new(ScriptedMarket::default());
        let engine = Engine::new(
            Settings::default(),
            Arc::clone(&market) as Arc<dyn MarketData>,
            EngineParts::paper(),
        );
        (engine, market)
    }

    fn bot_config() -> JsonValue {
        serde_json::json!({
            "entry": {
                "type": "price",
                "operator": "crosses_above",
                "value": 100,
                "symbol": "BTCUSDT",
                "timeframe": "1h"
            },
            "dca": {
                "base_order_size": "100",
                "rule": {"kind": "down_from_last_entry", "pct": "2"}
            }
        })
    }

    #[tokio::test]
    async fn lifecycle_transitions_are_enforced() {
        let (engine, _market) = paper_engine();
        let bot_id = engine
            .create_bot(
                Uuid::new_v4(),
                BotType::Dca,
                vec!["BTCUSDT".to_string()],
                Timeframe::H1,
                bot_config(),
            )
            .await
            .unwrap();

        // Pausing an inactive bot is a typed error and changes nothing.
        let err = engine.pause_bot(bot_id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
        assert_eq!(
            engine.bot_status(bot_id).await.unwrap().0.status,
            BotStatus::Inactive
        );

        engine.start_bot(bot_id).await.unwrap();
        assert_eq!(
            engine.bot_status(bot_id).await.unwrap().0.status,
            BotStatus::Running
        );
        // Starting twice is invalid.
        assert!(matches!(
            engine.start_bot(bot_id).await,
            Err(EngineError::InvalidTransition { .. })
        ));

        engine.pause_bot(bot_id).await.unwrap();
        engine.resume_bot(bot_id).await.unwrap();
        engine.stop_bot(bot_id).await.unwrap();
        assert_eq!(
            engine.bot_status(bot_id).await.unwrap().0.status,
            BotStatus::Stopped
        );

        // A stopped bot can start again.
        engine.start_bot(bot_id).await.unwrap();
        engine.stop_bot(bot_id).await.unwrap();
    }

    #[tokio::test]
    async fn start_opens_exactly_one_running_run() {
        let (engine, _market) = paper_engine();
        let bot_id = engine
            .create_bot(
                Uuid::new_v4(),
                BotType::Dca,
                vec!["BTCUSDT".to_string()],
                Timeframe::H1,
                bot_config(),
            )
            .await
            .unwrap();

        let run_id = engine.start_bot(bot_id).await.unwrap();
        let (_, run) = engine.bot_status(bot_id).await.unwrap();
        assert_eq!(run.unwrap().run_id, run_id);

        engine.stop_bot(bot_id).await.unwrap();
        let (_, run) = engine.bot_status(bot_id).await.unwrap();
        assert!(run.is_none());
    }

    /// End to end in paper mode: a cycle evaluates the entry condition,
    /// the trigger flows bus -> notifier -> executor, and a paper fill
    /// lands in the order log.
    #[tokio::test]
    async fn cycle_to_fill_in_paper_mode() {
        let (engine, market) = paper_engine();
        market.set("BTCUSDT", Timeframe::H1, vec![99.0, 99.5, 101.0]);

        let bot_id = engine
            .create_bot(
                Uuid::new_v4(),
                BotType::Dca,
                vec!["BTCUSDT".to_string()],
                Timeframe::H1,
                bot_config(),
            )
            .await
            .unwrap();
        engine.start_bot(bot_id).await.unwrap();
        engine.notifier.start().await.unwrap();

        let summary = engine.run_single_cycle().await.unwrap();
        assert_eq!(summary.triggered, 1);

        // Let the fan-out and the bot task drain.
        tokio::time::sleep(StdDuration::from_millis(100)).await;

        let orders = engine.orders(bot_id, 10).await.unwrap();
        assert_eq!(orders.len(), 1);
        let positions = engine.positions(bot_id).await.unwrap();
        assert_eq!(positions.len(), 1);
        assert!(positions[0].qty > Decimal::ZERO);

        let pnl = engine.pnl(bot_id).await.unwrap();
        assert_eq!(pnl.realized, Decimal::ZERO);
    }

    #[tokio::test]
    async fn bad_entry_condition_is_rejected_without_side_effects() {
        let (engine, _market) = paper_engine();
        let result = engine
            .create_bot(
                Uuid::new_v4(),
                BotType::Dca,
                vec!["BTCUSDT".to_string()],
                Timeframe::H1,
                serde_json::json!({
                    "entry": {
                        "type": "indicator",
                        "indicator": "ichimoku",
                        "operator": "gt",
                        "value": 1,
                        "symbol": "BTCUSDT",
                        "timeframe": "1h"
                    }
                }),
            )
            .await;
        assert!(matches!(result, Err(EngineError::Condition(_))));
        assert!(engine.list_bots().await.unwrap().is_empty());
    }
}
