use crate::error::EngineError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{BotRecord, BotRun, BotStatus, Order, Position, RunStatus};
use database::{DbError, DbRepository};
use executor::{ExecutorError, InMemoryStateStore, StateStore};
use notifier::{BotDirectory, NotifierError};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Bot, run, and read-query persistence as the engine sees it. Postgres
/// in live runs; an in-memory twin for paper mode and tests.
#[async_trait]
pub trait EngineStore: Send + Sync {
    async fn insert_bot(&self, bot: &BotRecord) -> Result<(), EngineError>;
    async fn get_bot(&self, bot_id: Uuid) -> Result<Option<BotRecord>, EngineError>;
    async fn list_bots(&self) -> Result<Vec<BotRecord>, EngineError>;
    async fn set_bot_status(&self, bot_id: Uuid, status: BotStatus) -> Result<(), EngineError>;
    async fn delete_bot(&self, bot_id: Uuid) -> Result<(), EngineError>;

    async fn insert_run(&self, run: &BotRun) -> Result<(), EngineError>;
    async fn running_run(&self, bot_id: Uuid) -> Result<Option<BotRun>, EngineError>;

    async fn positions(&self, bot_id: Uuid) -> Result<Vec<Position>, EngineError>;
    async fn orders(&self, bot_id: Uuid, limit: i64) -> Result<Vec<Order>, EngineError>;
}

fn store_err(e: DbError) -> EngineError {
    EngineError::Store(e.to_string())
}

#[async_trait]
impl EngineStore for DbRepository {
    async fn insert_bot(&self, bot: &BotRecord) -> Result<(), EngineError> {
        DbRepository::insert_bot(self, bot).await.map_err(store_err)
    }

    async fn get_bot(&self, bot_id: Uuid) -> Result<Option<BotRecord>, EngineError> {
        match DbRepository::get_bot(self, bot_id).await {
            Ok(bot) => Ok(Some(bot)),
            Err(DbError::NotFound) => Ok(None),
            Err(e) => Err(store_err(e)),
        }
    }

    async fn list_bots(&self) -> Result<Vec<BotRecord>, EngineError> {
        DbRepository::list_bots(self).await.map_err(store_err)
    }

    async fn set_bot_status(&self, bot_id: Uuid, status: BotStatus) -> Result<(), EngineError> {
        DbRepository::set_bot_status(self, bot_id, status).await.map_err(store_err)
    }

    async fn delete_bot(&self, bot_id: Uuid) -> Result<(), EngineError> {
        DbRepository::delete_bot(self, bot_id).await.map_err(store_err)
    }

    async fn insert_run(&self, run: &BotRun) -> Result<(), EngineError> {
        DbRepository::insert_run(self, run).await.map_err(store_err)
    }

    async fn running_run(&self, bot_id: Uuid) -> Result<Option<BotRun>, EngineError> {
        DbRepository::running_run(self, bot_id).await.map_err(store_err)
    }

    async fn positions(&self, bot_id: Uuid) -> Result<Vec<Position>, EngineError> {
        DbRepository::positions_for_bot(self, bot_id).await.map_err(store_err)
    }

    async fn orders(&self, bot_id: Uuid, limit: i64) -> Result<Vec<Order>, EngineError> {
        DbRepository::orders_for_bot(self, bot_id, limit).await.map_err(store_err)
    }
}

/// The paper-mode engine store: bots and runs in maps, position/order
/// queries answered from the same `InMemoryStateStore` the executor pool
/// flushes into. Also serves as the notifier's bot directory so that bot
/// status lives in exactly one place.
pub struct InMemoryEngineStore {
    bots: Mutex<HashMap<Uuid, BotRecord>>,
    runs: Mutex<Vec<BotRun>>,
    state: Arc<InMemoryStateStore>,
}

impl InMemoryEngineStore {
    pub fn new(state: Arc<InMemoryStateStore>) -> Self {
        Self {
            bots: Mutex::new(HashMap::new()),
            runs: Mutex::new(Vec::new()),
            state,
        }
    }

    pub fn state(&self) -> Arc<InMemoryStateStore> {
        Arc::clone(&self.state)
    }
}

#[async_trait]
impl EngineStore for InMemoryEngineStore {
    async fn insert_bot(&self, bot: &BotRecord) -> Result<(), EngineError> {
        self.bots.lock().expect("engine store mutex").insert(bot.bot_id, bot.clone());
        Ok(())
    }

    async fn get_bot(&self, bot_id: Uuid) -> Result<Option<BotRecord>, EngineError> {
        Ok(self.bots.lock().expect("engine store mutex").get(&bot_id).cloned())
    }

    async fn list_bots(&self) -> Result<Vec<BotRecord>, EngineError> {
        let mut bots: Vec<BotRecord> =
            self.bots.lock().expect("engine store mutex").values().cloned().collect();
        bots.sort_by_key(|b| b.created_at);
        Ok(bots)
    }

    async fn set_bot_status(&self, bot_id: Uuid, status: BotStatus) -> Result<(), EngineError> {
        match self.bots.lock().expect("engine store mutex").get_mut(&bot_id) {
            Some(bot) => {
                bot.status = status;
                Ok(())
            }
            None => Err(EngineError::NotFound(bot_id)),
        }
    }

    async fn delete_bot(&self, bot_id: Uuid) -> Result<(), EngineError> {
        self.bots.lock().expect("engine store mutex").remove(&bot_id);
        self.runs.lock().expect("engine store mutex").retain(|r| r.bot_id != bot_id);
        Ok(())
    }

    async fn insert_run(&self, run: &BotRun) -> Result<(), EngineError> {
        self.runs.lock().expect("engine store mutex").push(run.clone());
        Ok(())
    }

    async fn running_run(&self, bot_id: Uuid) -> Result<Option<BotRun>, EngineError> {
        Ok(self
            .runs
            .lock()
            .expect("engine store mutex")
            .iter()
            .find(|r| r.bot_id == bot_id && r.status == RunStatus::Running)
            .cloned())
    }

    async fn positions(&self, bot_id: Uuid) -> Result<Vec<Position>, EngineError> {
        Ok(self.state.positions_for_bot(bot_id))
    }

    async fn orders(&self, bot_id: Uuid, limit: i64) -> Result<Vec<Order>, EngineError> {
        Ok(self.state.orders_for_bot(bot_id, limit.max(0) as usize))
    }
}

/// The executor flushes through this same store in paper mode, so the run
/// the engine opened is the run the machine closes.
#[async_trait]
impl StateStore for InMemoryEngineStore {
    async fn upsert_position(&self, position: &Position) -> Result<(), ExecutorError> {
        self.state.upsert_position(position).await
    }

    async fn archive_position(&self, bot_id: Uuid, symbol: &str) -> Result<(), ExecutorError> {
        self.state.archive_position(bot_id, symbol).await
    }

    async fn insert_order(&self, order: &Order) -> Result<(), ExecutorError> {
        self.state.insert_order(order).await
    }

    async fn mark_order_filled(
        &self,
        order_id: Uuid,
        fill_price: Decimal,
        fees: Decimal,
        filled_at: DateTime<Utc>,
    ) -> Result<(), ExecutorError> {
        self.state.mark_order_filled(order_id, fill_price, fees, filled_at).await
    }

    async fn mark_order_error(&self, order_id: Uuid) -> Result<(), ExecutorError> {
        self.state.mark_order_error(order_id).await
    }

    async fn end_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        stats: JsonValue,
    ) -> Result<(), ExecutorError> {
        let mut runs = self.runs.lock().expect("engine store mutex");
        for run in runs.iter_mut() {
            if run.run_id == run_id && run.status == RunStatus::Running {
                run.status = status;
                run.ended_at = Some(Utc::now());
                run.stats = stats.clone();
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BotDirectory for InMemoryEngineStore {
    async fn bot(&self, bot_id: Uuid) -> Result<Option<BotRecord>, NotifierError> {
        Ok(self.bots.lock().expect("engine store mutex").get(&bot_id).cloned())
    }

    async fn subscription_triggered(
        &self,
        _subscription_id: Uuid,
        _at: DateTime<Utc>,
    ) -> Result<(), NotifierError> {
        Ok(())
    }
}
