use crate::config::{Cooldown, DcaConfig, DcaRule};
use crate::error::ExecutorError;
use crate::paper::PaperBroker;
use crate::pool::ExecutorEvent;
use crate::state::{BotState, PositionFlags};
use crate::store::StateStore;
use api_client::{ExecutionClient, OrderAck, OrderAckStatus};
use chrono::{Duration, Utc};
use core_types::{
    BotRecord, Order, OrderSide, OrderStatus, OrderType, Position, RunStatus, Tick, TriggerEvent,
};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use uuid::Uuid;

/// The DCA state machine for one bot.
///
/// Owned by exactly one pool task; every event is processed serially. The
/// in-memory position book is authoritative during the run and flushed
/// through the `StateStore` after each transition.
pub struct DcaExecutor {
    bot: BotRecord,
    run_id: Uuid,
    config: DcaConfig,
    state: BotState,
    positions: HashMap<String, (Position, PositionFlags)>,
    last_price: HashMap<String, Decimal>,
    /// DCA orders placed across all symbols within this run, for the
    /// global cap.
    run_dca_orders: u32,
    sink: Arc<dyn ExecutionClient>,
    /// Present in paper mode: lets the machine assert the balance law
    /// after every fill.
    paper: Option<Arc<PaperBroker>>,
    store: Arc<dyn StateStore>,
    order_timeout: StdDuration,
}

impl DcaExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bot: BotRecord,
        run_id: Uuid,
        config: DcaConfig,
        sink: Arc<dyn ExecutionClient>,
        paper: Option<Arc<PaperBroker>>,
        store: Arc<dyn StateStore>,
        order_timeout: StdDuration,
    ) -> Self {
        Self {
            bot,
            run_id,
            config,
            state: BotState::Idle,
            positions: HashMap::new(),
            last_price: HashMap::new(),
            run_dca_orders: 0,
            sink,
            paper,
            store,
            order_timeout,
        }
    }

    pub fn state(&self) -> BotState {
        self.state
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol).map(|(p, _)| p)
    }

    /// Processes one event. `Err(Invariant)` is fatal: the caller ends the
    /// run with `status = error` and discards this machine.
    pub async fn handle(&mut self, event: ExecutorEvent) -> Result<(), ExecutorError> {
        match event {
            ExecutorEvent::Trigger(trigger) => self.on_trigger(trigger).await,
            ExecutorEvent::Tick(tick) => self.on_tick(tick).await,
            ExecutorEvent::Pause => {
                if !self.state.is_terminal() {
                    tracing::info!(bot = %self.bot.bot_id, "executor paused");
                    self.state = BotState::Paused;
                }
                Ok(())
            }
            ExecutorEvent::Resume => {
                if self.state == BotState::Paused {
                    self.state = self.residual_state();
                    tracing::info!(bot = %self.bot.bot_id, state = ?self.state, "executor resumed");
                }
                Ok(())
            }
            ExecutorEvent::Stop => self.on_stop().await,
        }
    }

    /// ACCUMULATING if any symbol still holds quantity, IDLE otherwise.
    fn residual_state(&self) -> BotState {
        if self.positions.values().any(|(p, _)| p.qty > Decimal::ZERO) {
            BotState::Accumulating
        } else {
            BotState::Idle
        }
    }

    async fn on_trigger(&mut self, trigger: TriggerEvent) -> Result<(), ExecutorError> {
        if matches!(self.state, BotState::Paused | BotState::Stopped | BotState::Exiting) {
            tracing::debug!(bot = %self.bot.bot_id, state = ?self.state, "trigger ignored");
            return Ok(());
        }
        if !self.bot.symbols.contains(&trigger.symbol) {
            tracing::debug!(bot = %self.bot.bot_id, symbol = %trigger.symbol, "trigger for unmanaged symbol");
            return Ok(());
        }

        let price = match self.trigger_price(&trigger) {
            Some(price) => price,
            None => {
                tracing::debug!(bot = %self.bot.bot_id, "trigger carries no usable price");
                return Ok(());
            }
        };
        if let Some(paper) = &self.paper {
            paper.ensure_mark(&trigger.symbol, price);
        }
        self.last_price.insert(trigger.symbol.clone(), price);

        let has_position = self
            .positions
            .get(&trigger.symbol)
            .map(|(p, _)| p.qty > Decimal::ZERO)
            .unwrap_or(false);

        if has_position {
            // An open position only reacts to its own custom DCA condition.
            if let DcaRule::CustomCondition { fingerprint } = &self.config.rule {
                if *fingerprint == trigger.fingerprint {
                    let symbol = trigger.symbol.clone();
                    return self.try_dca(&symbol, price).await;
                }
            }
            tracing::debug!(bot = %self.bot.bot_id, "trigger while position open, no custom rule match");
            return Ok(());
        }

        self.enter(&trigger.symbol, price).await
    }

    async fn on_tick(&mut self, tick: Tick) -> Result<(), ExecutorError> {
        self.last_price.insert(tick.symbol.clone(), tick.price);
        if let Some(paper) = &self.paper {
            paper.update_mark(&tick.symbol, tick.price);
        }

        if matches!(self.state, BotState::Paused | BotState::Stopped) {
            return Ok(());
        }
        let has_position = self
            .positions
            .get(&tick.symbol)
            .map(|(p, _)| p.qty > Decimal::ZERO)
            .unwrap_or(false);
        if !has_position {
            return Ok(());
        }

        // Keep the in-memory mark-to-market current; rows are flushed on
        // transitions, not on every tick.
        if let Some((position, _)) = self.positions.get_mut(&tick.symbol) {
            position.unrealized_pnl = (tick.price - position.avg_entry_price) * position.qty;
        }

        if self.dca_rule_matches(&tick.symbol, tick.price) {
            self.try_dca(&tick.symbol, tick.price).await?;
        }
        self.try_profit(&tick.symbol, tick.price).await
    }

    async fn on_stop(&mut self) -> Result<(), ExecutorError> {
        tracing::info!(bot = %self.bot.bot_id, "executor stopping");
        // Persist the final book before the record goes away.
        for (position, _) in self.positions.values() {
            self.store.upsert_position(position).await?;
        }
        self.state = BotState::Stopped;
        self.store
            .end_run(self.run_id, RunStatus::Stopped, serde_json::json!({
                "dca_orders": self.run_dca_orders,
            }))
            .await?;
        Ok(())
    }

    fn trigger_price(&self, trigger: &TriggerEvent) -> Option<Decimal> {
        trigger
            .values
            .get("close")
            .and_then(|&v| Decimal::from_f64(v))
            .or_else(|| self.last_price.get(&trigger.symbol).copied())
    }

    // -----------------------------------------------------------------------
    // Entry
    // -----------------------------------------------------------------------

    async fn enter(&mut self, symbol: &str, price: Decimal) -> Result<(), ExecutorError> {
        if price <= Decimal::ZERO {
            return Ok(());
        }
        let qty = self.config.base_order_size / price;

        tracing::info!(bot = %self.bot.bot_id, symbol = %symbol, qty = %qty, "entry trigger, placing base order");
        let fill = self.place_market(symbol, OrderSide::Buy, qty).await?;
        let (fill_price, _fees, fill_qty) = match fill {
            Some(fill) => fill,
            None => return Ok(()), // rejected or timed out; state unchanged
        };

        let now = Utc::now();
        let entry = self.positions.entry(symbol.to_string()).or_insert_with(|| {
            (
                Position::open(self.bot.bot_id, symbol, now),
                PositionFlags::new(self.config.profit.targets.len()),
            )
        });
        entry.0.apply_buy(fill_qty, fill_price, now);
        entry.0.dca_index = 0;
        entry.1 = PositionFlags::new(self.config.profit.targets.len());

        let position = entry.0.clone();
        self.store.upsert_position(&position).await?;
        self.state = BotState::Accumulating;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // DCA
    // -----------------------------------------------------------------------

    fn dca_rule_matches(&self, symbol: &str, price: Decimal) -> bool {
        let position = match self.positions.get(symbol) {
            Some((p, _)) if p.qty > Decimal::ZERO => p,
            _ => return false,
        };
        match &self.config.rule {
            DcaRule::DownFromLastEntry { pct } => match position.last_entry_price {
                Some(last) => price <= last * (Decimal::ONE - pct / dec!(100)),
                None => false,
            },
            DcaRule::DownFromAveragePrice { pct } => {
                price <= position.avg_entry_price * (Decimal::ONE - pct / dec!(100))
            }
            DcaRule::LossByPercent { pct } => {
                !position.avg_entry_price.is_zero()
                    && (position.avg_entry_price - price) / position.avg_entry_price
                        >= pct / dec!(100)
            }
            DcaRule::LossByAmount { amount } => {
                (position.avg_entry_price - price) * position.qty >= *amount
            }
            // Custom conditions arrive as trigger events, never on ticks.
            DcaRule::CustomCondition { .. } => false,
        }
    }

    /// Places a DCA buy if every cap allows it. A blocked cap skips
    /// silently (no error, no state change).
    async fn try_dca(&mut self, symbol: &str, price: Decimal) -> Result<(), ExecutorError> {
        let position = match self.positions.get(symbol) {
            Some((p, _)) if p.qty > Decimal::ZERO => p.clone(),
            _ => return Ok(()),
        };

        if position.dca_index >= self.config.max_dcas_per_position {
            tracing::debug!(bot = %self.bot.bot_id, symbol = %symbol, "dca skipped: per-position cap");
            return Ok(());
        }
        if let Some(max_global) = self.config.max_dcas_global {
            if self.run_dca_orders >= max_global {
                tracing::debug!(bot = %self.bot.bot_id, "dca skipped: global cap");
                return Ok(());
            }
        }
        let amount = self.config.dca_amount();
        if let Some(max_invested) = self.config.max_investment_per_position {
            let invested = position.avg_entry_price * position.qty;
            if invested + amount > max_invested {
                tracing::debug!(bot = %self.bot.bot_id, symbol = %symbol, "dca skipped: investment cap");
                return Ok(());
            }
        }
        if let Some(stop_loss_pct) = self.config.stop_dca_on_loss_pct {
            if position.unrealized_pnl_pct(price) <= -stop_loss_pct {
                tracing::debug!(bot = %self.bot.bot_id, symbol = %symbol, "dca skipped: loss guard");
                return Ok(());
            }
        }
        if self.within_cooldown(&position) {
            tracing::debug!(bot = %self.bot.bot_id, symbol = %symbol, "dca skipped: cooldown");
            return Ok(());
        }
        if price <= Decimal::ZERO {
            return Ok(());
        }

        let qty = amount / price;
        tracing::info!(bot = %self.bot.bot_id, symbol = %symbol, index = position.dca_index + 1, "placing DCA order");
        let fill = self.place_market(symbol, OrderSide::Buy, qty).await?;
        let (fill_price, _fees, fill_qty) = match fill {
            Some(fill) => fill,
            None => return Ok(()),
        };

        let now = Utc::now();
        if let Some((position, _)) = self.positions.get_mut(symbol) {
            position.apply_buy(fill_qty, fill_price, now);
            position.dca_index += 1;
            let snapshot = position.clone();
            self.run_dca_orders += 1;
            self.store.upsert_position(&snapshot).await?;
        }
        Ok(())
    }

    fn within_cooldown(&self, position: &Position) -> bool {
        let last_entry = match position.last_entry_at {
            Some(t) => t,
            None => return false,
        };
        let window = match self.config.cooldown {
            Some(Cooldown::Bars(bars)) => self.bot.interval.duration() * bars as i32,
            Some(Cooldown::Minutes(minutes)) => Duration::minutes(minutes as i64),
            None => return false,
        };
        Utc::now() < last_entry + window
    }

    // -----------------------------------------------------------------------
    // Profit taking
    // -----------------------------------------------------------------------

    /// The three mechanisms in fixed order: partial targets, trailing
    /// stop, time exit. At most one sell per tick.
    async fn try_profit(&mut self, symbol: &str, price: Decimal) -> Result<(), ExecutorError> {
        let (position, flags) = match self.positions.get_mut(symbol) {
            Some(entry) if entry.0.qty > Decimal::ZERO => entry,
            _ => return Ok(()),
        };
        let pnl_pct = position.unrealized_pnl_pct(price);

        // 1. Partial targets, one-shot each.
        let targets = self.config.profit.targets.clone();
        for (i, target) in targets.iter().enumerate() {
            let fired = flags.fired_targets.get(i).copied().unwrap_or(true);
            if !fired && pnl_pct >= target.gain_pct {
                let sell_qty = position.qty * target.size_pct / dec!(100);
                if sell_qty > Decimal::ZERO {
                    return self.exit(symbol, sell_qty, Some(i)).await;
                }
            }
        }

        // 2. Trailing stop: arm, track the peak, fire on the giveback.
        if let Some(trailing) = self.config.profit.trailing {
            if !flags.trail_armed {
                if pnl_pct >= trailing.arm_pct {
                    flags.trail_armed = true;
                    flags.peak_price = price;
                    tracing::debug!(bot = %self.bot.bot_id, symbol = %symbol, peak = %price, "trailing stop armed");
                }
            } else {
                if price > flags.peak_price {
                    flags.peak_price = price;
                }
                let floor = flags.peak_price * (Decimal::ONE - trailing.trail_pct / dec!(100));
                if price <= floor {
                    let qty = position.qty;
                    tracing::info!(bot = %self.bot.bot_id, symbol = %symbol, peak = %flags.peak_price, "trailing stop fired");
                    return self.exit(symbol, qty, None).await;
                }
            }
        }

        // 3. Time-based exit.
        if let Some(time_exit) = self.config.profit.time_exit {
            let age = Utc::now() - position.opened_at;
            if age >= Duration::days(time_exit.max_hold_days as i64)
                && pnl_pct >= time_exit.min_exit_pct
            {
                let qty = position.qty;
                tracing::info!(bot = %self.bot.bot_id, symbol = %symbol, "time-based exit");
                return self.exit(symbol, qty, None).await;
            }
        }

        Ok(())
    }

    /// Places a profit-taking sell and settles the position afterwards:
    /// partial close returns to ACCUMULATING, full close archives the
    /// position and returns to IDLE with every per-position flag reset.
    async fn exit(
        &mut self,
        symbol: &str,
        qty: Decimal,
        fired_target: Option<usize>,
    ) -> Result<(), ExecutorError> {
        self.state = BotState::Exiting;
        let fill = self.place_market(symbol, OrderSide::Sell, qty).await?;
        let (fill_price, _fees, fill_qty) = match fill {
            Some(fill) => fill,
            None => {
                // The sell did not happen; the position is untouched.
                self.state = self.residual_state();
                return Ok(());
            }
        };

        let mut closed = false;
        if let Some((position, flags)) = self.positions.get_mut(symbol) {
            position.apply_sell(fill_qty, fill_price);
            position.unrealized_pnl = (fill_price - position.avg_entry_price) * position.qty;
            if let Some(i) = fired_target {
                if let Some(slot) = flags.fired_targets.get_mut(i) {
                    *slot = true;
                }
            }
            let snapshot = position.clone();
            self.store.upsert_position(&snapshot).await?;
            closed = position.qty.is_zero();
        }

        if closed {
            self.store.archive_position(self.bot.bot_id, symbol).await?;
            self.positions.remove(symbol);
            tracing::info!(bot = %self.bot.bot_id, symbol = %symbol, "position fully closed");
        }
        self.state = self.residual_state();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Order plumbing
    // -----------------------------------------------------------------------

    /// Places a market order through the sink under the configured
    /// timeout, recording the order row around the call.
    ///
    /// Returns `Ok(None)` on rejection or timeout (recorded on the row,
    /// machine state unchanged); `Ok(Some(..))` on fill. A paper balance
    /// violation after the fill is the one fatal path.
    async fn place_market(
        &mut self,
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
    ) -> Result<Option<(Decimal, Decimal, Decimal)>, ExecutorError> {
        let order = Order {
            order_id: Uuid::new_v4(),
            bot_id: self.bot.bot_id,
            run_id: self.run_id,
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            qty,
            fill_price: None,
            fees: Decimal::ZERO,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
            filled_at: None,
        };
        self.store.insert_order(&order).await?;

        let placed = tokio::time::timeout(
            self.order_timeout,
            self.sink.place_order(symbol, side, OrderType::Market, qty, None),
        )
        .await;

        let ack: OrderAck = match placed {
            Err(_elapsed) => {
                tracing::warn!(bot = %self.bot.bot_id, symbol = %symbol, "order placement timed out");
                self.store.mark_order_error(order.order_id).await?;
                return Ok(None);
            }
            Ok(Err(e)) => {
                tracing::warn!(bot = %self.bot.bot_id, symbol = %symbol, error = %e, "order rejected");
                self.store.mark_order_error(order.order_id).await?;
                return Ok(None);
            }
            Ok(Ok(ack)) => ack,
        };

        if ack.status != OrderAckStatus::Filled {
            tracing::warn!(bot = %self.bot.bot_id, symbol = %symbol, status = ?ack.status, "order not filled");
            self.store.mark_order_error(order.order_id).await?;
            return Ok(None);
        }

        let fill_price = match ack.fill_price {
            Some(price) => price,
            None => self.last_price.get(symbol).copied().unwrap_or(Decimal::ZERO),
        };
        let fees = ack.fees.unwrap_or(Decimal::ZERO);
        let fill_qty = if ack.executed_qty > Decimal::ZERO { ack.executed_qty } else { qty };

        self.store
            .mark_order_filled(order.order_id, fill_price, fees, Utc::now())
            .await?;

        // Paper mode asserts the conservation law after every fill. A
        // breach aborts the run.
        if let Some(paper) = &self.paper {
            paper.verify().map_err(ExecutorError::Invariant)?;
        }

        Ok(Some((fill_price, fees, fill_qty)))
    }
}
