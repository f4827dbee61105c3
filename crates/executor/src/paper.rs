use api_client::error::ApiError;
use api_client::{AssetBalance, ExecutionClient, OrderAck, OrderAckStatus};
use async_trait::async_trait;
use configuration::PaperSettings;
use core_types::{OrderSide, OrderType};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Mutex;

/// One bot's virtual account. Fulfils orders against the most recent mark
/// price for each symbol without touching the exchange.
///
/// ## Fill semantics
///
/// - Market orders fill at the last mark plus configured slippage (worse
///   for the taker in both directions). Fees come off the balance and are
///   reported on the ack.
/// - Limit orders lock funds (buys) and fill when a later mark crosses the
///   limit favorably. No partial fills.
///
/// ## Balance law
///
/// `free >= 0`, `total = free + locked`, and
/// `free = initial - Σ buys(qty·price) + Σ sells(qty·price) - Σ fees`
/// after any finite fill sequence. `verify()` recomputes the law from the
/// fill ledger; a mismatch is fatal for the bot run.
pub struct PaperBroker {
    settings: PaperSettings,
    state: Mutex<PaperState>,
}

struct PaperState {
    initial: Decimal,
    free: Decimal,
    locked: Decimal,
    marks: HashMap<String, Decimal>,
    open_limits: Vec<OpenLimit>,
    fills: Vec<Fill>,
    next_order_id: u64,
}

struct OpenLimit {
    order_id: String,
    symbol: String,
    side: OrderSide,
    qty: Decimal,
    limit_price: Decimal,
    locked_quote: Decimal,
}

#[derive(Clone, Copy)]
struct Fill {
    side: OrderSide,
    qty: Decimal,
    price: Decimal,
    fee: Decimal,
}

/// A limit order that filled during a mark-price update.
#[derive(Debug, Clone, PartialEq)]
pub struct LimitFill {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub qty: Decimal,
    pub fill_price: Decimal,
    pub fees: Decimal,
}

impl PaperBroker {
    pub fn new(settings: PaperSettings) -> Self {
        let initial = settings.initial_balance;
        Self {
            settings,
            state: Mutex::new(PaperState {
                initial,
                free: initial,
                locked: Decimal::ZERO,
                marks: HashMap::new(),
                open_limits: Vec::new(),
                fills: Vec::new(),
                next_order_id: 1,
            }),
        }
    }

    /// Feeds a fresh mark price and fills any limit orders it crosses.
    pub fn update_mark(&self, symbol: &str, price: Decimal) -> Vec<LimitFill> {
        let mut state = self.state.lock().expect("paper mutex");
        state.marks.insert(symbol.to_string(), price);

        let fee_pct = self.settings.taker_fee_pct;
        let mut filled = Vec::new();
        let mut remaining = Vec::new();
        for limit in state.open_limits.drain(..) {
            let crosses = limit.symbol == symbol
                && match limit.side {
                    OrderSide::Buy => price <= limit.limit_price,
                    OrderSide::Sell => price >= limit.limit_price,
                };
            if crosses {
                filled.push(limit);
            } else {
                remaining.push(limit);
            }
        }
        state.open_limits = remaining;

        let mut out = Vec::new();
        for limit in filled {
            let notional = limit.qty * limit.limit_price;
            let fee = notional * fee_pct;
            match limit.side {
                OrderSide::Buy => {
                    // The locked quote covered the worst case; release it
                    // and charge the actual cost.
                    state.locked -= limit.locked_quote;
                    state.free += limit.locked_quote;
                    state.free -= notional + fee;
                }
                OrderSide::Sell => {
                    state.free += notional - fee;
                }
            }
            state.fills.push(Fill {
                side: limit.side,
                qty: limit.qty,
                price: limit.limit_price,
                fee,
            });
            out.push(LimitFill {
                order_id: limit.order_id,
                symbol: limit.symbol,
                side: limit.side,
                qty: limit.qty,
                fill_price: limit.limit_price,
                fees: fee,
            });
        }
        out
    }

    /// Seeds a mark price only if the symbol has none yet. Used when a
    /// trigger arrives before the first tick of a symbol.
    pub fn ensure_mark(&self, symbol: &str, price: Decimal) {
        let mut state = self.state.lock().expect("paper mutex");
        state.marks.entry(symbol.to_string()).or_insert(price);
    }

    /// Current free and locked quote balance.
    pub fn balance(&self) -> AssetBalance {
        let state = self.state.lock().expect("paper mutex");
        AssetBalance { free: state.free, locked: state.locked }
    }

    /// Recomputes the conservation law from the fill ledger. An error here
    /// means the simulator itself has corrupted state; callers abort the
    /// bot run.
    pub fn verify(&self) -> Result<(), String> {
        let state = self.state.lock().expect("paper mutex");

        if state.free < Decimal::ZERO {
            return Err(format!("free balance went negative: {}", state.free));
        }
        if state.locked < Decimal::ZERO {
            return Err(format!("locked balance went negative: {}", state.locked));
        }

        let mut expected = state.initial;
        for fill in &state.fills {
            match fill.side {
                OrderSide::Buy => expected -= fill.qty * fill.price,
                OrderSide::Sell => expected += fill.qty * fill.price,
            }
            expected -= fill.fee;
        }
        expected -= state.locked;

        if expected != state.free {
            return Err(format!(
                "balance conservation breach: ledger implies free {} but account holds {}",
                expected, state.free
            ));
        }
        Ok(())
    }

    fn slipped_price(&self, side: OrderSide, mark: Decimal) -> Decimal {
        let slip = mark * self.settings.slippage_bps / dec!(10000);
        match side {
            OrderSide::Buy => mark + slip,
            OrderSide::Sell => mark - slip,
        }
    }
}

#[async_trait]
impl ExecutionClient for PaperBroker {
    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        qty: Decimal,
        limit_price: Option<Decimal>,
    ) -> Result<OrderAck, ApiError> {
        if qty <= Decimal::ZERO {
            return Err(ApiError::Rejected(-1013, "quantity must be positive".to_string()));
        }

        let mut state = self.state.lock().expect("paper mutex");
        let order_id = state.next_order_id.to_string();
        state.next_order_id += 1;

        match order_type {
            OrderType::Market => {
                let mark = *state.marks.get(symbol).ok_or_else(|| {
                    ApiError::Rejected(-1121, format!("no mark price for {symbol}"))
                })?;
                let price = self.slipped_price(side, mark);
                let notional = qty * price;
                let fee = notional * self.settings.taker_fee_pct;

                match side {
                    OrderSide::Buy => {
                        if state.free < notional + fee {
                            return Err(ApiError::Rejected(
                                -2010,
                                "insufficient balance".to_string(),
                            ));
                        }
                        state.free -= notional + fee;
                    }
                    OrderSide::Sell => {
                        state.free += notional - fee;
                    }
                }
                state.fills.push(Fill { side, qty, price, fee });

                Ok(OrderAck {
                    order_id,
                    status: OrderAckStatus::Filled,
                    fill_price: Some(price),
                    executed_qty: qty,
                    fees: Some(fee),
                })
            }
            OrderType::Limit => {
                let limit_price = limit_price.ok_or_else(|| {
                    ApiError::Rejected(-1102, "limit order without a price".to_string())
                })?;
                let locked_quote = match side {
                    OrderSide::Buy => {
                        let cost =
                            qty * limit_price * (Decimal::ONE + self.settings.taker_fee_pct);
                        if state.free < cost {
                            return Err(ApiError::Rejected(
                                -2010,
                                "insufficient balance".to_string(),
                            ));
                        }
                        state.free -= cost;
                        state.locked += cost;
                        cost
                    }
                    OrderSide::Sell => Decimal::ZERO,
                };
                state.open_limits.push(OpenLimit {
                    order_id: order_id.clone(),
                    symbol: symbol.to_string(),
                    side,
                    qty,
                    limit_price,
                    locked_quote,
                });

                Ok(OrderAck {
                    order_id,
                    status: OrderAckStatus::Pending,
                    fill_price: None,
                    executed_qty: Decimal::ZERO,
                    fees: None,
                })
            }
        }
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> Result<(), ApiError> {
        let mut state = self.state.lock().expect("paper mutex");
        let before = state.open_limits.len();
        let mut released = Decimal::ZERO;
        state.open_limits.retain(|limit| {
            if limit.order_id == order_id {
                released += limit.locked_quote;
                false
            } else {
                true
            }
        });
        if state.open_limits.len() == before {
            return Err(ApiError::Rejected(-2011, "unknown order".to_string()));
        }
        state.locked -= released;
        state.free += released;
        Ok(())
    }

    async fn account_balance(&self) -> Result<HashMap<String, AssetBalance>, ApiError> {
        let state = self.state.lock().expect("paper mutex");
        let mut out = HashMap::new();
        out.insert(
            "USDT".to_string(),
            AssetBalance { free: state.free, locked: state.locked },
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker(initial: Decimal, fee_pct: Decimal) -> PaperBroker {
        PaperBroker::new(PaperSettings {
            initial_balance: initial,
            taker_fee_pct: fee_pct,
            slippage_bps: Decimal::ZERO,
        })
    }

    /// The ledger scenario: buy 0.1 @ 50 000 with fee 5, then sell 0.1 @
    /// 51 000 with fee 5.1 — every balance checks out against the law.
    #[tokio::test]
    async fn balance_law_across_a_buy_sell_round_trip() {
        let broker = broker(dec!(10000), dec!(0.001));
        broker.update_mark("BTCUSDT", dec!(50000));

        let ack = broker
            .place_order("BTCUSDT", OrderSide::Buy, OrderType::Market, dec!(0.1), None)
            .await
            .unwrap();
        assert_eq!(ack.fill_price, Some(dec!(50000)));
        assert_eq!(ack.fees, Some(dec!(5)));
        assert_eq!(broker.balance().free, dec!(4995));
        broker.verify().unwrap();

        broker.update_mark("BTCUSDT", dec!(51000));
        let ack = broker
            .place_order("BTCUSDT", OrderSide::Sell, OrderType::Market, dec!(0.1), None)
            .await
            .unwrap();
        assert_eq!(ack.fees, Some(dec!(5.1)));
        assert_eq!(broker.balance().free, dec!(10089.9));
        broker.verify().unwrap();
    }

    #[tokio::test]
    async fn insufficient_balance_rejects_without_mutation() {
        let broker = broker(dec!(100), dec!(0.001));
        broker.update_mark("BTCUSDT", dec!(50000));

        let err = broker
            .place_order("BTCUSDT", OrderSide::Buy, OrderType::Market, dec!(1), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Rejected(-2010, _)));
        assert_eq!(broker.balance().free, dec!(100));
        broker.verify().unwrap();
    }

    #[tokio::test]
    async fn market_order_without_a_mark_is_rejected() {
        let broker = broker(dec!(1000), Decimal::ZERO);
        let err = broker
            .place_order("ETHUSDT", OrderSide::Buy, OrderType::Market, dec!(1), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Rejected(-1121, _)));
    }

    #[tokio::test]
    async fn slippage_moves_fills_against_the_taker() {
        let broker = PaperBroker::new(PaperSettings {
            initial_balance: dec!(10000),
            taker_fee_pct: Decimal::ZERO,
            slippage_bps: dec!(10), // 0.1%
        });
        broker.update_mark("BTCUSDT", dec!(100));

        let buy = broker
            .place_order("BTCUSDT", OrderSide::Buy, OrderType::Market, dec!(1), None)
            .await
            .unwrap();
        assert_eq!(buy.fill_price, Some(dec!(100.1)));

        let sell = broker
            .place_order("BTCUSDT", OrderSide::Sell, OrderType::Market, dec!(1), None)
            .await
            .unwrap();
        assert_eq!(sell.fill_price, Some(dec!(99.9)));
        broker.verify().unwrap();
    }

    #[tokio::test]
    async fn limit_buy_fills_when_price_crosses_down() {
        let broker = broker(dec!(10000), Decimal::ZERO);
        broker.update_mark("BTCUSDT", dec!(105));

        let ack = broker
            .place_order(
                "BTCUSDT",
                OrderSide::Buy,
                OrderType::Limit,
                dec!(10),
                Some(dec!(100)),
            )
            .await
            .unwrap();
        assert_eq!(ack.status, OrderAckStatus::Pending);
        assert_eq!(broker.balance().locked, dec!(1000));

        // Price above the limit: nothing happens.
        assert!(broker.update_mark("BTCUSDT", dec!(101)).is_empty());

        // Crossing down fills at the limit price.
        let fills = broker.update_mark("BTCUSDT", dec!(99.5));
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].fill_price, dec!(100));
        assert_eq!(broker.balance().locked, Decimal::ZERO);
        assert_eq!(broker.balance().free, dec!(9000));
        broker.verify().unwrap();
    }

    #[tokio::test]
    async fn cancel_releases_locked_funds() {
        let broker = broker(dec!(10000), Decimal::ZERO);
        broker.update_mark("BTCUSDT", dec!(105));

        let ack = broker
            .place_order(
                "BTCUSDT",
                OrderSide::Buy,
                OrderType::Limit,
                dec!(10),
                Some(dec!(100)),
            )
            .await
            .unwrap();
        broker.cancel_order("BTCUSDT", &ack.order_id).await.unwrap();
        assert_eq!(broker.balance().free, dec!(10000));
        assert_eq!(broker.balance().locked, Decimal::ZERO);
        broker.verify().unwrap();
    }
}
