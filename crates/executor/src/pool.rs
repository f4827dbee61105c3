use crate::config::DcaConfig;
use crate::error::ExecutorError;
use crate::machine::DcaExecutor;
use crate::paper::PaperBroker;
use crate::store::StateStore;
use api_client::ExecutionClient;
use configuration::{EngineSettings, ExecutionMode, PaperSettings};
use core_types::{BotRecord, BotType, RunStatus, Tick, TriggerEvent};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Everything a bot executor consumes.
#[derive(Debug, Clone)]
pub enum ExecutorEvent {
    Trigger(TriggerEvent),
    Tick(Tick),
    Pause,
    Resume,
    Stop,
}

/// Shared dependencies for spawning executors.
#[derive(Clone)]
pub struct PoolDeps {
    pub engine: EngineSettings,
    pub paper: PaperSettings,
    pub mode: ExecutionMode,
    pub store: Arc<dyn StateStore>,
    /// The signed exchange client; required in live mode.
    pub live: Option<Arc<dyn ExecutionClient>>,
}

struct BotHandle {
    tx: mpsc::Sender<ExecutorEvent>,
    symbols: Vec<String>,
    task: JoinHandle<()>,
}

/// Hosts one task per active bot. Events for the same bot are processed
/// strictly serially through its bounded mailbox; no two handlers ever
/// run concurrently for one bot.
#[derive(Clone)]
pub struct ExecutorPool {
    deps: PoolDeps,
    bots: Arc<Mutex<HashMap<Uuid, BotHandle>>>,
}

impl ExecutorPool {
    pub fn new(deps: PoolDeps) -> Self {
        Self { deps, bots: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Spawns the executor task for a bot run. Only DCA bots have an
    /// executor today; other bot types are rejected upstream.
    pub fn start_bot(&self, bot: BotRecord, run_id: Uuid) -> Result<(), ExecutorError> {
        if bot.bot_type != BotType::Dca {
            return Err(ExecutorError::BadConfig(format!(
                "no executor registered for bot type {}",
                bot.bot_type.as_str()
            )));
        }
        let config = DcaConfig::from_bot_config(&bot.config)?;

        let (sink, paper): (Arc<dyn ExecutionClient>, Option<Arc<PaperBroker>>) =
            match self.deps.mode {
                ExecutionMode::Paper => {
                    let broker = Arc::new(PaperBroker::new(self.deps.paper.clone()));
                    (Arc::clone(&broker) as Arc<dyn ExecutionClient>, Some(broker))
                }
                ExecutionMode::Live => {
                    let live = self.deps.live.clone().ok_or_else(|| {
                        ExecutorError::BadConfig(
                            "live execution mode without an exchange client".to_string(),
                        )
                    })?;
                    (live, None)
                }
            };

        let (tx, mut rx) = mpsc::channel(self.deps.engine.mailbox_capacity.max(1));
        let bot_id = bot.bot_id;
        let symbols = bot.symbols.clone();
        let order_timeout = StdDuration::from_secs(self.deps.engine.order_timeout_secs);
        let store = Arc::clone(&self.deps.store);

        let mut machine =
            DcaExecutor::new(bot, run_id, config, sink, paper, Arc::clone(&store), order_timeout);

        let bots = Arc::clone(&self.bots);
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match machine.handle(event).await {
                    Ok(()) => {}
                    Err(ExecutorError::Invariant(msg)) => {
                        tracing::error!(bot = %bot_id, error = %msg, "fatal executor invariant, ending run");
                        let _ = store
                            .end_run(
                                run_id,
                                RunStatus::Error,
                                serde_json::json!({ "error": msg }),
                            )
                            .await;
                        break;
                    }
                    Err(e) => {
                        // Non-fatal errors are logged and the machine
                        // keeps its state; the next event re-attempts.
                        tracing::warn!(bot = %bot_id, error = %e, "executor event failed");
                    }
                }
                if machine.state().is_terminal() {
                    break;
                }
            }
            bots.lock().expect("pool mutex").remove(&bot_id);
            tracing::debug!(bot = %bot_id, "executor task finished");
        });

        self.bots
            .lock()
            .expect("pool mutex")
            .insert(bot_id, BotHandle { tx, symbols, task });
        Ok(())
    }

    fn send(&self, bot_id: Uuid, event: ExecutorEvent) -> bool {
        let tx = {
            let bots = self.bots.lock().expect("pool mutex");
            match bots.get(&bot_id) {
                Some(handle) => handle.tx.clone(),
                None => return false,
            }
        };
        match tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(bot = %bot_id, ?event, "executor mailbox full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Routes a trigger event to one bot's mailbox.
    pub fn dispatch_trigger(&self, bot_id: Uuid, event: TriggerEvent) -> bool {
        self.send(bot_id, ExecutorEvent::Trigger(event))
    }

    /// Fans a price tick out to every bot trading the symbol.
    pub fn tick(&self, tick: &Tick) {
        let targets: Vec<Uuid> = {
            let bots = self.bots.lock().expect("pool mutex");
            bots.iter()
                .filter(|(_, handle)| handle.symbols.contains(&tick.symbol))
                .map(|(id, _)| *id)
                .collect()
        };
        for bot_id in targets {
            self.send(bot_id, ExecutorEvent::Tick(tick.clone()));
        }
    }

    pub fn pause(&self, bot_id: Uuid) -> bool {
        self.send(bot_id, ExecutorEvent::Pause)
    }

    pub fn resume(&self, bot_id: Uuid) -> bool {
        self.send(bot_id, ExecutorEvent::Resume)
    }

    /// Stops a bot: delivers the stop command, then gives the task the
    /// configured deadline to finish in-flight work before aborting it.
    pub async fn stop(&self, bot_id: Uuid) {
        self.send(bot_id, ExecutorEvent::Stop);

        let task = {
            let mut bots = self.bots.lock().expect("pool mutex");
            bots.remove(&bot_id).map(|handle| handle.task)
        };
        if let Some(mut task) = task {
            let deadline = StdDuration::from_secs(self.deps.engine.stop_deadline_secs);
            if tokio::time::timeout(deadline, &mut task).await.is_err() {
                tracing::warn!(bot = %bot_id, "executor missed the stop deadline, aborting");
                task.abort();
            }
        }
    }

    pub fn is_active(&self, bot_id: Uuid) -> bool {
        self.bots.lock().expect("pool mutex").contains_key(&bot_id)
    }

    /// The union of symbols across active bots, for the tick poller.
    pub fn active_symbols(&self) -> BTreeSet<String> {
        let bots = self.bots.lock().expect("pool mutex");
        bots.values()
            .flat_map(|handle| handle.symbols.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStateStore;
    use chrono::Utc;
    use core_types::{BotStatus, Timeframe};
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn deps(store: Arc<InMemoryStateStore>) -> PoolDeps {
        PoolDeps {
            engine: EngineSettings::default(),
            paper: PaperSettings {
                initial_balance: dec!(10000),
                taker_fee_pct: rust_decimal::Decimal::ZERO,
                slippage_bps: rust_decimal::Decimal::ZERO,
            },
            mode: ExecutionMode::Paper,
            store,
            live: None,
        }
    }

    fn bot(symbol: &str) -> BotRecord {
        BotRecord {
            bot_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            bot_type: BotType::Dca,
            status: BotStatus::Running,
            symbols: vec![symbol.to_string()],
            interval: Timeframe::H1,
            config: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    fn entry_trigger(symbol: &str) -> TriggerEvent {
        let mut values = BTreeMap::new();
        values.insert("close".to_string(), 100.0);
        TriggerEvent {
            event_id: Uuid::new_v4(),
            fingerprint: "fp".to_string(),
            symbol: symbol.to_string(),
            timeframe: Timeframe::H1,
            triggered_at: Utc::now(),
            bar_close_time: Utc::now(),
            values,
        }
    }

    #[tokio::test]
    async fn trigger_flows_through_the_mailbox_to_a_fill() {
        let store = Arc::new(InMemoryStateStore::new());
        let pool = ExecutorPool::new(deps(Arc::clone(&store)));
        let record = bot("BTCUSDT");
        let bot_id = record.bot_id;

        pool.start_bot(record, Uuid::new_v4()).unwrap();
        assert!(pool.is_active(bot_id));
        assert!(pool.active_symbols().contains("BTCUSDT"));

        assert!(pool.dispatch_trigger(bot_id, entry_trigger("BTCUSDT")));
        // Give the bot task a moment to drain its mailbox.
        tokio::time::sleep(StdDuration::from_millis(50)).await;

        let orders = store.orders();
        assert_eq!(orders.len(), 1);
        assert!(store.position(bot_id, "BTCUSDT").is_some());
    }

    #[tokio::test]
    async fn stop_removes_the_bot_and_ends_the_run() {
        let store = Arc::new(InMemoryStateStore::new());
        let pool = ExecutorPool::new(deps(Arc::clone(&store)));
        let record = bot("BTCUSDT");
        let bot_id = record.bot_id;
        let run_id = Uuid::new_v4();

        pool.start_bot(record, run_id).unwrap();
        pool.stop(bot_id).await;

        assert!(!pool.is_active(bot_id));
        let runs = store.ended_runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].0, run_id);
        assert_eq!(runs[0].1, RunStatus::Stopped);
    }

    #[tokio::test]
    async fn non_dca_bots_are_rejected() {
        let store = Arc::new(InMemoryStateStore::new());
        let pool = ExecutorPool::new(deps(store));
        let mut record = bot("BTCUSDT");
        record.bot_type = BotType::Grid;

        assert!(matches!(
            pool.start_bot(record, Uuid::new_v4()),
            Err(ExecutorError::BadConfig(_))
        ));
    }

    #[tokio::test]
    async fn ticks_only_reach_bots_on_the_symbol() {
        let store = Arc::new(InMemoryStateStore::new());
        let pool = ExecutorPool::new(deps(Arc::clone(&store)));
        let btc = bot("BTCUSDT");
        let eth = bot("ETHUSDT");
        let btc_id = btc.bot_id;

        pool.start_bot(btc, Uuid::new_v4()).unwrap();
        pool.start_bot(eth, Uuid::new_v4()).unwrap();

        // Open a BTC position, then tick both symbols.
        pool.dispatch_trigger(btc_id, entry_trigger("BTCUSDT"));
        tokio::time::sleep(StdDuration::from_millis(50)).await;

        pool.tick(&Tick {
            symbol: "BTCUSDT".to_string(),
            price: dec!(99),
            timestamp: Utc::now(),
        });
        tokio::time::sleep(StdDuration::from_millis(50)).await;

        // Only the BTC bot holds a position; the ETH bot saw nothing.
        assert!(store.position(btc_id, "BTCUSDT").is_some());
        assert_eq!(store.orders().len(), 1);
    }
}
