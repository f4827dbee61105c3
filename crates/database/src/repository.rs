use crate::error::DbError;
use chrono::{DateTime, Utc};
use core_types::{
    BotRecord, BotRun, BotStatus, BotType, ConditionRecord, Order, OrderSide, OrderStatus,
    OrderType, Position, RunStatus, Subscription, SubscriptionStatus, Timeframe,
};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use sqlx::postgres::PgPool;
use std::str::FromStr;
use uuid::Uuid;

/// The `DbRepository` provides a high-level, application-specific interface
/// to the database. It encapsulates all SQL queries and data access logic.
#[derive(Debug, Clone)]
pub struct DbRepository {
    pool: PgPool,
}

// ---------------------------------------------------------------------------
// Row structs: what sqlx reads, before enum/typed conversion.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, FromRow)]
struct DbCondition {
    fingerprint: String,
    condition_type: String,
    symbol: String,
    timeframe: String,
    config: JsonValue,
    last_evaluated_at: Option<DateTime<Utc>>,
    last_triggered_at: Option<DateTime<Utc>>,
    trigger_count: i64,
    evaluation_count: i64,
}

impl TryFrom<DbCondition> for ConditionRecord {
    type Error = DbError;

    fn try_from(row: DbCondition) -> Result<Self, DbError> {
        Ok(ConditionRecord {
            fingerprint: row.fingerprint,
            condition_type: row.condition_type,
            symbol: row.symbol,
            timeframe: parse_field::<Timeframe>(&row.timeframe, "timeframe")?,
            config: row.config,
            last_evaluated_at: row.last_evaluated_at,
            last_triggered_at: row.last_triggered_at,
            trigger_count: row.trigger_count,
            evaluation_count: row.evaluation_count,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct DbSubscription {
    subscription_id: Uuid,
    user_id: Uuid,
    bot_id: Uuid,
    bot_type: String,
    fingerprint: String,
    bot_config: JsonValue,
    status: String,
    created_at: DateTime<Utc>,
    last_triggered_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbSubscription> for Subscription {
    type Error = DbError;

    fn try_from(row: DbSubscription) -> Result<Self, DbError> {
        Ok(Subscription {
            subscription_id: row.subscription_id,
            user_id: row.user_id,
            bot_id: row.bot_id,
            bot_type: parse_field::<BotType>(&row.bot_type, "bot_type")?,
            fingerprint: row.fingerprint,
            bot_config: row.bot_config,
            status: parse_field::<SubscriptionStatus>(&row.status, "status")?,
            created_at: row.created_at,
            last_triggered_at: row.last_triggered_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct DbBot {
    bot_id: Uuid,
    user_id: Uuid,
    bot_type: String,
    status: String,
    symbols: Vec<String>,
    interval: String,
    config: JsonValue,
    created_at: DateTime<Utc>,
}

impl TryFrom<DbBot> for BotRecord {
    type Error = DbError;

    fn try_from(row: DbBot) -> Result<Self, DbError> {
        Ok(BotRecord {
            bot_id: row.bot_id,
            user_id: row.user_id,
            bot_type: parse_field::<BotType>(&row.bot_type, "bot_type")?,
            status: parse_field::<BotStatus>(&row.status, "status")?,
            symbols: row.symbols,
            interval: parse_field::<Timeframe>(&row.interval, "interval")?,
            config: row.config,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct DbRun {
    run_id: Uuid,
    bot_id: Uuid,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    status: String,
    stats: JsonValue,
}

impl TryFrom<DbRun> for BotRun {
    type Error = DbError;

    fn try_from(row: DbRun) -> Result<Self, DbError> {
        Ok(BotRun {
            run_id: row.run_id,
            bot_id: row.bot_id,
            started_at: row.started_at,
            ended_at: row.ended_at,
            status: parse_field::<RunStatus>(&row.status, "status")?,
            stats: row.stats,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct DbPosition {
    bot_id: Uuid,
    symbol: String,
    qty: Decimal,
    avg_entry_price: Decimal,
    realized_pnl: Decimal,
    unrealized_pnl: Decimal,
    dca_index: i32,
    last_entry_price: Option<Decimal>,
    last_entry_at: Option<DateTime<Utc>>,
    opened_at: DateTime<Utc>,
}

impl From<DbPosition> for Position {
    fn from(row: DbPosition) -> Self {
        Position {
            bot_id: row.bot_id,
            symbol: row.symbol,
            qty: row.qty,
            avg_entry_price: row.avg_entry_price,
            realized_pnl: row.realized_pnl,
            unrealized_pnl: row.unrealized_pnl,
            dca_index: row.dca_index.max(0) as u32,
            last_entry_price: row.last_entry_price,
            last_entry_at: row.last_entry_at,
            opened_at: row.opened_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct DbOrder {
    order_id: Uuid,
    bot_id: Uuid,
    run_id: Uuid,
    symbol: String,
    side: String,
    order_type: String,
    qty: Decimal,
    fill_price: Option<Decimal>,
    fees: Decimal,
    status: String,
    created_at: DateTime<Utc>,
    filled_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbOrder> for Order {
    type Error = DbError;

    fn try_from(row: DbOrder) -> Result<Self, DbError> {
        Ok(Order {
            order_id: row.order_id,
            bot_id: row.bot_id,
            run_id: row.run_id,
            symbol: row.symbol,
            side: side_from_str(&row.side)?,
            order_type: order_type_from_str(&row.order_type)?,
            qty: row.qty,
            fill_price: row.fill_price,
            fees: row.fees,
            status: order_status_from_str(&row.status)?,
            created_at: row.created_at,
            filled_at: row.filled_at,
        })
    }
}

fn parse_field<T: FromStr>(raw: &str, field: &str) -> Result<T, DbError> {
    raw.parse::<T>()
        .map_err(|_| DbError::Corrupt(format!("{field}: `{raw}`")))
}

fn side_to_str(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "buy",
        OrderSide::Sell => "sell",
    }
}

fn side_from_str(raw: &str) -> Result<OrderSide, DbError> {
    match raw {
        "buy" => Ok(OrderSide::Buy),
        "sell" => Ok(OrderSide::Sell),
        other => Err(DbError::Corrupt(format!("side: `{other}`"))),
    }
}

fn order_type_to_str(order_type: OrderType) -> &'static str {
    match order_type {
        OrderType::Market => "market",
        OrderType::Limit => "limit",
    }
}

fn order_type_from_str(raw: &str) -> Result<OrderType, DbError> {
    match raw {
        "market" => Ok(OrderType::Market),
        "limit" => Ok(OrderType::Limit),
        other => Err(DbError::Corrupt(format!("order_type: `{other}`"))),
    }
}

fn order_status_from_str(raw: &str) -> Result<OrderStatus, DbError> {
    match raw {
        "pending" => Ok(OrderStatus::Pending),
        "filled" => Ok(OrderStatus::Filled),
        "cancelled" => Ok(OrderStatus::Cancelled),
        "error" => Ok(OrderStatus::Error),
        other => Err(DbError::Corrupt(format!("order_status: `{other}`"))),
    }
}

impl DbRepository {
    /// Creates a new `DbRepository` with a shared database connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // -----------------------------------------------------------------------
    // Conditions
    // -----------------------------------------------------------------------

    /// Inserts a condition record, leaving an existing row untouched.
    /// `ON CONFLICT DO NOTHING` makes registration idempotent, so it can
    /// be retried safely after a transient failure.
    pub async fn upsert_condition(&self, record: &ConditionRecord) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO conditions (fingerprint, condition_type, symbol, timeframe, config)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (fingerprint) DO NOTHING
            "#,
        )
        .bind(&record.fingerprint)
        .bind(&record.condition_type)
        .bind(&record.symbol)
        .bind(record.timeframe.as_str())
        .bind(&record.config)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_condition(
        &self,
        fingerprint: &str,
    ) -> Result<Option<ConditionRecord>, DbError> {
        let row = sqlx::query_as::<_, DbCondition>(
            "SELECT fingerprint, condition_type, symbol, timeframe, config, last_evaluated_at, last_triggered_at, trigger_count, evaluation_count FROM conditions WHERE fingerprint = $1",
        )
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    /// The cheap active-subscription scan: every condition holding at
    /// least one `active` subscription, in fingerprint order.
    pub async fn active_conditions(&self) -> Result<Vec<ConditionRecord>, DbError> {
        let rows = sqlx::query_as::<_, DbCondition>(
            r#"
            SELECT DISTINCT c.fingerprint, c.condition_type, c.symbol, c.timeframe, c.config,
                   c.last_evaluated_at, c.last_triggered_at, c.trigger_count, c.evaluation_count
            FROM conditions AS c
            JOIN subscriptions AS s ON s.fingerprint = c.fingerprint
            WHERE s.status = 'active'
            ORDER BY c.fingerprint ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn mark_evaluated(
        &self,
        fingerprints: &[String],
        at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        if fingerprints.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"
            UPDATE conditions
            SET last_evaluated_at = $2, evaluation_count = evaluation_count + 1
            WHERE fingerprint = ANY($1)
            "#,
        )
        .bind(fingerprints)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_triggered(
        &self,
        fingerprint: &str,
        bar_close_time: DateTime<Utc>,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE conditions
            SET last_triggered_at = $2, trigger_count = trigger_count + 1
            WHERE fingerprint = $1
            "#,
        )
        .bind(fingerprint)
        .bind(bar_close_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    pub async fn insert_subscription(&self, sub: &Subscription) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions
                (subscription_id, user_id, bot_id, bot_type, fingerprint, bot_config, status, created_at, last_triggered_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(sub.subscription_id)
        .bind(sub.user_id)
        .bind(sub.bot_id)
        .bind(sub.bot_type.as_str())
        .bind(&sub.fingerprint)
        .bind(&sub.bot_config)
        .bind(sub.status.as_str())
        .bind(sub.created_at)
        .bind(sub.last_triggered_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_subscription_status(
        &self,
        subscription_id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<(), DbError> {
        let result = sqlx::query("UPDATE subscriptions SET status = $1 WHERE subscription_id = $2")
            .bind(status.as_str())
            .bind(subscription_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    pub async fn subscribers(&self, fingerprint: &str) -> Result<Vec<Subscription>, DbError> {
        let rows = sqlx::query_as::<_, DbSubscription>(
            "SELECT subscription_id, user_id, bot_id, bot_type, fingerprint, bot_config, status, created_at, last_triggered_at FROM subscriptions WHERE fingerprint = $1 ORDER BY created_at ASC",
        )
        .bind(fingerprint)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn active_subscriptions(&self) -> Result<Vec<Subscription>, DbError> {
        let rows = sqlx::query_as::<_, DbSubscription>(
            "SELECT subscription_id, user_id, bot_id, bot_type, fingerprint, bot_config, status, created_at, last_triggered_at FROM subscriptions WHERE status = 'active' ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn subscriptions_for_bot(&self, bot_id: Uuid) -> Result<Vec<Subscription>, DbError> {
        let rows = sqlx::query_as::<_, DbSubscription>(
            "SELECT subscription_id, user_id, bot_id, bot_type, fingerprint, bot_config, status, created_at, last_triggered_at FROM subscriptions WHERE bot_id = $1 ORDER BY created_at ASC",
        )
        .bind(bot_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn touch_subscription_triggered(
        &self,
        subscription_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        sqlx::query("UPDATE subscriptions SET last_triggered_at = $1 WHERE subscription_id = $2")
            .bind(at)
            .bind(subscription_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_bot_subscriptions_status(
        &self,
        bot_id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<(), DbError> {
        sqlx::query("UPDATE subscriptions SET status = $1 WHERE bot_id = $2")
            .bind(status.as_str())
            .bind(bot_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Bots & runs
    // -----------------------------------------------------------------------

    pub async fn insert_bot(&self, bot: &BotRecord) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO bots (bot_id, user_id, bot_type, status, symbols, interval, config, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(bot.bot_id)
        .bind(bot.user_id)
        .bind(bot.bot_type.as_str())
        .bind(bot.status.as_str())
        .bind(&bot.symbols)
        .bind(bot.interval.as_str())
        .bind(&bot.config)
        .bind(bot.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_bot(&self, bot_id: Uuid) -> Result<BotRecord, DbError> {
        let row = sqlx::query_as::<_, DbBot>(
            "SELECT bot_id, user_id, bot_type, status, symbols, interval, config, created_at FROM bots WHERE bot_id = $1",
        )
        .bind(bot_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DbError::NotFound)?;
        row.try_into()
    }

    pub async fn list_bots(&self) -> Result<Vec<BotRecord>, DbError> {
        let rows = sqlx::query_as::<_, DbBot>(
            "SELECT bot_id, user_id, bot_type, status, symbols, interval, config, created_at FROM bots ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn set_bot_status(&self, bot_id: Uuid, status: BotStatus) -> Result<(), DbError> {
        let result = sqlx::query("UPDATE bots SET status = $1 WHERE bot_id = $2")
            .bind(status.as_str())
            .bind(bot_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Deletes a bot. Subscriptions and runs cascade; historical order and
    /// position rows are retained.
    pub async fn delete_bot(&self, bot_id: Uuid) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM subscriptions WHERE bot_id = $1")
            .bind(bot_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM bots WHERE bot_id = $1")
            .bind(bot_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn insert_run(&self, run: &BotRun) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO bot_runs (run_id, bot_id, started_at, ended_at, status, stats) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(run.run_id)
        .bind(run.bot_id)
        .bind(run.started_at)
        .bind(run.ended_at)
        .bind(run.status.as_str())
        .bind(&run.stats)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn end_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        stats: &JsonValue,
        ended_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        sqlx::query("UPDATE bot_runs SET status = $1, stats = $2, ended_at = $3 WHERE run_id = $4")
            .bind(status.as_str())
            .bind(stats)
            .bind(ended_at)
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// The at-most-one `running` run for a bot.
    pub async fn running_run(&self, bot_id: Uuid) -> Result<Option<BotRun>, DbError> {
        let row = sqlx::query_as::<_, DbRun>(
            "SELECT run_id, bot_id, started_at, ended_at, status, stats FROM bot_runs WHERE bot_id = $1 AND status = 'running' ORDER BY started_at DESC LIMIT 1",
        )
        .bind(bot_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    // -----------------------------------------------------------------------
    // Positions
    // -----------------------------------------------------------------------

    /// The live (non-archived) position for a bot and symbol, if any.
    pub async fn active_position(
        &self,
        bot_id: Uuid,
        symbol: &str,
    ) -> Result<Option<Position>, DbError> {
        let row = sqlx::query_as::<_, DbPosition>(
            "SELECT bot_id, symbol, qty, avg_entry_price, realized_pnl, unrealized_pnl, dca_index, last_entry_price, last_entry_at, opened_at FROM positions WHERE bot_id = $1 AND symbol = $2 AND NOT archived",
        )
        .bind(bot_id)
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    /// Writes the current position state, creating the active row on first
    /// fill and updating it afterwards.
    pub async fn upsert_position(&self, position: &Position) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO positions
                (position_id, bot_id, symbol, qty, avg_entry_price, realized_pnl, unrealized_pnl,
                 dca_index, last_entry_price, last_entry_at, opened_at, archived)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, FALSE)
            ON CONFLICT (bot_id, symbol) WHERE NOT archived
            DO UPDATE SET
                qty = EXCLUDED.qty,
                avg_entry_price = EXCLUDED.avg_entry_price,
                realized_pnl = EXCLUDED.realized_pnl,
                unrealized_pnl = EXCLUDED.unrealized_pnl,
                dca_index = EXCLUDED.dca_index,
                last_entry_price = EXCLUDED.last_entry_price,
                last_entry_at = EXCLUDED.last_entry_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(position.bot_id)
        .bind(&position.symbol)
        .bind(position.qty)
        .bind(position.avg_entry_price)
        .bind(position.realized_pnl)
        .bind(position.unrealized_pnl)
        .bind(position.dca_index as i32)
        .bind(position.last_entry_price)
        .bind(position.last_entry_at)
        .bind(position.opened_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Archives the active row for a closed position. Archived rows are
    /// never mutated again.
    pub async fn archive_position(&self, bot_id: Uuid, symbol: &str) -> Result<(), DbError> {
        sqlx::query("UPDATE positions SET archived = TRUE WHERE bot_id = $1 AND symbol = $2 AND NOT archived")
            .bind(bot_id)
            .bind(symbol)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn positions_for_bot(&self, bot_id: Uuid) -> Result<Vec<Position>, DbError> {
        let rows = sqlx::query_as::<_, DbPosition>(
            "SELECT bot_id, symbol, qty, avg_entry_price, realized_pnl, unrealized_pnl, dca_index, last_entry_price, last_entry_at, opened_at FROM positions WHERE bot_id = $1 AND NOT archived ORDER BY symbol ASC",
        )
        .bind(bot_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    // -----------------------------------------------------------------------
    // Orders
    // -----------------------------------------------------------------------

    pub async fn insert_order(&self, order: &Order) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO orders
                (order_id, bot_id, run_id, symbol, side, order_type, qty, fill_price, fees, status, created_at, filled_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(order.order_id)
        .bind(order.bot_id)
        .bind(order.run_id)
        .bind(&order.symbol)
        .bind(side_to_str(order.side))
        .bind(order_type_to_str(order.order_type))
        .bind(order.qty)
        .bind(order.fill_price)
        .bind(order.fees)
        .bind(order.status.as_str())
        .bind(order.created_at)
        .bind(order.filled_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_order_filled(
        &self,
        order_id: Uuid,
        fill_price: Decimal,
        fees: Decimal,
        filled_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        sqlx::query(
            "UPDATE orders SET status = 'filled', fill_price = $2, fees = $3, filled_at = $4 WHERE order_id = $1 AND status = 'pending'",
        )
        .bind(order_id)
        .bind(fill_price)
        .bind(fees)
        .bind(filled_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_order_error(&self, order_id: Uuid) -> Result<(), DbError> {
        sqlx::query("UPDATE orders SET status = 'error' WHERE order_id = $1")
            .bind(order_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn orders_for_bot(&self, bot_id: Uuid, limit: i64) -> Result<Vec<Order>, DbError> {
        let rows = sqlx::query_as::<_, DbOrder>(
            "SELECT order_id, bot_id, run_id, symbol, side, order_type, qty, fill_price, fees, status, created_at, filled_at FROM orders WHERE bot_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(bot_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn orders_for_run(&self, run_id: Uuid) -> Result<Vec<Order>, DbError> {
        let rows = sqlx::query_as::<_, DbOrder>(
            "SELECT order_id, bot_id, run_id, symbol, side, order_type, qty, fill_price, fees, status, created_at, filled_at FROM orders WHERE run_id = $1 ORDER BY created_at ASC",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_round_trips_through_its_column_encoding() {
        for side in [OrderSide::Buy, OrderSide::Sell] {
            assert_eq!(side_from_str(side_to_str(side)).unwrap(), side);
        }
        assert!(side_from_str("BUY").is_err()); // column casing is strict
    }

    #[test]
    fn order_enums_reject_unknown_column_values() {
        assert!(order_type_from_str("stop_limit").is_err());
        assert!(order_status_from_str("partial").is_err());
        assert_eq!(order_status_from_str("filled").unwrap(), OrderStatus::Filled);
    }

    #[test]
    fn typed_fields_parse_from_their_column_text() {
        assert_eq!(parse_field::<Timeframe>("4h", "timeframe").unwrap(), Timeframe::H4);
        assert_eq!(parse_field::<BotStatus>("paused", "status").unwrap(), BotStatus::Paused);
        assert!(parse_field::<Timeframe>("7h", "timeframe").is_err());
    }
}
