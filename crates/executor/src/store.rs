use crate::error::ExecutorError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{Order, Position, RunStatus};
use database::DbRepository;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// The persistence seam for executor state. In-memory state is
/// authoritative during a run; this trait is the flush path invoked after
/// every transition.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn upsert_position(&self, position: &Position) -> Result<(), ExecutorError>;

    async fn archive_position(&self, bot_id: Uuid, symbol: &str) -> Result<(), ExecutorError>;

    async fn insert_order(&self, order: &Order) -> Result<(), ExecutorError>;

    async fn mark_order_filled(
        &self,
        order_id: Uuid,
        fill_price: Decimal,
        fees: Decimal,
        filled_at: DateTime<Utc>,
    ) -> Result<(), ExecutorError>;

    async fn mark_order_error(&self, order_id: Uuid) -> Result<(), ExecutorError>;

    async fn end_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        stats: JsonValue,
    ) -> Result<(), ExecutorError>;
}

fn store_err(e: database::DbError) -> ExecutorError {
    ExecutorError::Store(e.to_string())
}

#[async_trait]
impl StateStore for DbRepository {
    async fn upsert_position(&self, position: &Position) -> Result<(), ExecutorError> {
        DbRepository::upsert_position(self, position).await.map_err(store_err)
    }

    async fn archive_position(&self, bot_id: Uuid, symbol: &str) -> Result<(), ExecutorError> {
        DbRepository::archive_position(self, bot_id, symbol).await.map_err(store_err)
    }

    async fn insert_order(&self, order: &Order) -> Result<(), ExecutorError> {
        DbRepository::insert_order(self, order).await.map_err(store_err)
    }

    async fn mark_order_filled(
        &self,
        order_id: Uuid,
        fill_price: Decimal,
        fees: Decimal,
        filled_at: DateTime<Utc>,
    ) -> Result<(), ExecutorError> {
        DbRepository::mark_order_filled(self, order_id, fill_price, fees, filled_at)
            .await
            .map_err(store_err)
    }

    async fn mark_order_error(&self, order_id: Uuid) -> Result<(), ExecutorError> {
        DbRepository::mark_order_error(self, order_id).await.map_err(store_err)
    }

    async fn end_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        stats: JsonValue,
    ) -> Result<(), ExecutorError> {
        DbRepository::end_run(self, run_id, status, &stats, Utc::now())
            .await
            .map_err(store_err)
    }
}

/// A process-local `StateStore` for paper mode and tests. Orders and
/// positions are retrievable so tests can assert on the flush history.
#[derive(Default)]
pub struct InMemoryStateStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    positions: HashMap<(Uuid, String), Position>,
    archived: Vec<Position>,
    orders: Vec<Order>,
    ended_runs: Vec<(Uuid, RunStatus, JsonValue)>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn orders(&self) -> Vec<Order> {
        self.inner.lock().expect("state store mutex").orders.clone()
    }

    pub fn position(&self, bot_id: Uuid, symbol: &str) -> Option<Position> {
        self.inner
            .lock()
            .expect("state store mutex")
            .positions
            .get(&(bot_id, symbol.to_string()))
            .cloned()
    }

    pub fn archived_positions(&self) -> Vec<Position> {
        self.inner.lock().expect("state store mutex").archived.clone()
    }

    pub fn ended_runs(&self) -> Vec<(Uuid, RunStatus, JsonValue)> {
        self.inner.lock().expect("state store mutex").ended_runs.clone()
    }

    pub fn positions_for_bot(&self, bot_id: Uuid) -> Vec<Position> {
        let inner = self.inner.lock().expect("state store mutex");
        let mut out: Vec<Position> = inner
            .positions
            .values()
            .filter(|p| p.bot_id == bot_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        out
    }

    pub fn orders_for_bot(&self, bot_id: Uuid, limit: usize) -> Vec<Order> {
        let inner = self.inner.lock().expect("state store mutex");
        let mut out: Vec<Order> = inner
            .orders
            .iter()
            .filter(|o| o.bot_id == bot_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit);
        out
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn upsert_position(&self, position: &Position) -> Result<(), ExecutorError> {
        self.inner
            .lock()
            .expect("state store mutex")
            .positions
            .insert((position.bot_id, position.symbol.clone()), position.clone());
        Ok(())
    }

    async fn archive_position(&self, bot_id: Uuid, symbol: &str) -> Result<(), ExecutorError> {
        let mut inner = self.inner.lock().expect("state store mutex");
        if let Some(position) = inner.positions.remove(&(bot_id, symbol.to_string())) {
            inner.archived.push(position);
        }
        Ok(())
    }

    async fn insert_order(&self, order: &Order) -> Result<(), ExecutorError> {
        self.inner.lock().expect("state store mutex").orders.push(order.clone());
        Ok(())
    }

    async fn mark_order_filled(
        &self,
        order_id: Uuid,
        fill_price: Decimal,
        fees: Decimal,
        filled_at: DateTime<Utc>,
    ) -> Result<(), ExecutorError> {
        let mut inner = self.inner.lock().expect("state store mutex");
        for order in inner.orders.iter_mut() {
            if order.order_id == order_id {
                order.status = core_types::OrderStatus::Filled;
                order.fill_price = Some(fill_price);
                order.fees = fees;
                order.filled_at = Some(filled_at);
            }
        }
        Ok(())
    }

    async fn mark_order_error(&self, order_id: Uuid) -> Result<(), ExecutorError> {
        let mut inner = self.inner.lock().expect("state store mutex");
        for order in inner.orders.iter_mut() {
            if order.order_id == order_id {
                order.status = core_types::OrderStatus::Error;
            }
        }
        Ok(())
    }

    async fn end_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        stats: JsonValue,
    ) -> Result<(), ExecutorError> {
        self.inner
            .lock()
            .expect("state store mutex")
            .ended_runs
            .push((run_id, status, stats));
        Ok(())
    }
}
