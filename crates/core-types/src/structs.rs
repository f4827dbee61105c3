use crate::enums::{
    BotStatus, BotType, OrderSide, OrderStatus, OrderType, RunStatus, SubscriptionStatus,
    Timeframe,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use uuid::Uuid;

/// One candle of market data at a given timeframe, identified by its
/// `close_time`. Bars arrive ordered by `open_time` ascending; the last bar
/// of a fetch is the currently forming one and is dropped by the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: DateTime<Utc>,
}

/// A live mark-price sample for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// A persisted, deduplicated condition. `fingerprint` is the content-hash
/// of the canonical condition body and the primary key.
///
/// Invariant: `last_triggered_at <= last_evaluated_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionRecord {
    pub fingerprint: String,
    pub condition_type: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    /// The canonical condition body, exactly as fingerprinted.
    pub config: JsonValue,
    pub last_evaluated_at: Option<DateTime<Utc>>,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub trigger_count: i64,
    pub evaluation_count: i64,
}

/// Links one bot to one condition fingerprint, carrying the bot's config
/// snapshot at subscription time. A bot may hold many subscriptions; the
/// evaluator only looks at `Active` ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub subscription_id: Uuid,
    pub user_id: Uuid,
    pub bot_id: Uuid,
    pub bot_type: BotType,
    pub fingerprint: String,
    /// Immutable for the duration of a bot run.
    pub bot_config: JsonValue,
    pub status: SubscriptionStatus,
    pub created_at: DateTime<Utc>,
    pub last_triggered_at: Option<DateTime<Utc>>,
}

/// A condition firing for one closed bar. Events are monotonically ordered
/// per fingerprint by `triggered_at`, with at most one event per
/// `(fingerprint, bar_close_time)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub event_id: Uuid,
    pub fingerprint: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub triggered_at: DateTime<Utc>,
    pub bar_close_time: DateTime<Utc>,
    /// The observed indicator snapshot (named numeric fields).
    pub values: BTreeMap<String, f64>,
}

impl TriggerEvent {
    /// The bus topic this event publishes on.
    pub fn topic(&self) -> String {
        format!("condition.{}", self.fingerprint)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotRecord {
    pub bot_id: Uuid,
    pub user_id: Uuid,
    pub bot_type: BotType,
    pub status: BotStatus,
    pub symbols: Vec<String>,
    pub interval: Timeframe,
    pub config: JsonValue,
    pub created_at: DateTime<Utc>,
}

/// One execution of a bot. At most one run is `Running` per bot at any
/// instant; a bot accumulates many runs over its lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotRun {
    pub run_id: Uuid,
    pub bot_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub stats: JsonValue,
}

/// Per-bot, per-symbol position state.
///
/// Invariants: `qty >= 0`; `dca_index` never exceeds the bot's DCA cap;
/// `avg_entry_price` is recomputed on every fill as total-cost / total-qty.
/// A position whose qty reaches zero is archived, not mutated further.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub bot_id: Uuid,
    pub symbol: String,
    pub qty: Decimal,
    pub avg_entry_price: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub dca_index: u32,
    pub last_entry_price: Option<Decimal>,
    pub last_entry_at: Option<DateTime<Utc>>,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// A fresh, empty position opened at `now`.
    pub fn open(bot_id: Uuid, symbol: &str, now: DateTime<Utc>) -> Self {
        Self {
            bot_id,
            symbol: symbol.to_string(),
            qty: Decimal::ZERO,
            avg_entry_price: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            dca_index: 0,
            last_entry_price: None,
            last_entry_at: None,
            opened_at: now,
        }
    }

    /// Applies a buy fill, recomputing the average entry price from total
    /// cost and total quantity.
    pub fn apply_buy(&mut self, qty: Decimal, price: Decimal, at: DateTime<Utc>) {
        let total_cost = self.avg_entry_price * self.qty + price * qty;
        self.qty += qty;
        if !self.qty.is_zero() {
            self.avg_entry_price = total_cost / self.qty;
        }
        self.last_entry_price = Some(price);
        self.last_entry_at = Some(at);
    }

    /// Applies a sell fill, realizing pnl against the average entry price.
    pub fn apply_sell(&mut self, qty: Decimal, price: Decimal) {
        self.realized_pnl += (price - self.avg_entry_price) * qty;
        self.qty -= qty;
    }

    /// Unrealized pnl as a percentage of the average entry, at `price`.
    pub fn unrealized_pnl_pct(&self, price: Decimal) -> Decimal {
        if self.avg_entry_price.is_zero() {
            return Decimal::ZERO;
        }
        (price - self.avg_entry_price) / self.avg_entry_price * Decimal::ONE_HUNDRED
    }
}

/// An order row. Append-only; once `Filled`, fields other than `status`
/// are immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: Uuid,
    pub bot_id: Uuid,
    pub run_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub qty: Decimal,
    pub fill_price: Option<Decimal>,
    pub fees: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn average_entry_recomputes_on_every_fill() {
        let mut pos = Position::open(Uuid::new_v4(), "BTCUSDT", Utc::now());
        pos.apply_buy(dec!(1), dec!(100), Utc::now());
        assert_eq!(pos.avg_entry_price, dec!(100));

        pos.apply_buy(dec!(1), dec!(90), Utc::now());
        assert_eq!(pos.qty, dec!(2));
        assert_eq!(pos.avg_entry_price, dec!(95));
        assert_eq!(pos.last_entry_price, Some(dec!(90)));
    }

    #[test]
    fn sell_realizes_pnl_against_average_entry() {
        let mut pos = Position::open(Uuid::new_v4(), "BTCUSDT", Utc::now());
        pos.apply_buy(dec!(2), dec!(95), Utc::now());
        pos.apply_sell(dec!(1), dec!(105));
        assert_eq!(pos.qty, dec!(1));
        assert_eq!(pos.realized_pnl, dec!(10));
    }

    #[test]
    fn unrealized_pct_is_relative_to_average_entry() {
        let mut pos = Position::open(Uuid::new_v4(), "ETHUSDT", Utc::now());
        pos.apply_buy(dec!(1), dec!(100), Utc::now());
        assert_eq!(pos.unrealized_pnl_pct(dec!(106)), dec!(6));
        assert_eq!(pos.unrealized_pnl_pct(dec!(95)), dec!(-5));
    }

    #[test]
    fn trigger_event_topic_embeds_fingerprint() {
        let event = TriggerEvent {
            event_id: Uuid::new_v4(),
            fingerprint: "ab12".to_string(),
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::H1,
            triggered_at: Utc::now(),
            bar_close_time: Utc::now(),
            values: BTreeMap::new(),
        };
        assert_eq!(event.topic(), "condition.ab12");
    }
}
