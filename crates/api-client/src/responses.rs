use crate::error::ApiError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The error body Binance returns on non-2xx responses.
#[derive(Debug, Deserialize)]
pub struct ApiErrorResponse {
    pub code: i64,
    pub msg: String,
}

/// Free and locked balance for one asset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub free: Decimal,
    pub locked: Decimal,
}

impl AssetBalance {
    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}

/// Exchange order status, reduced to what the executor cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderAckStatus {
    Filled,
    Pending,
    Rejected,
}

/// The acknowledgement for a placed order.
///
/// A market order normally comes back `Filled` with a fill price; a limit
/// order comes back `Pending` until the book crosses it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub status: OrderAckStatus,
    pub fill_price: Option<Decimal>,
    pub executed_qty: Decimal,
    pub fees: Option<Decimal>,
}

/// The raw `/api/v3/order` response (FULL response type).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOrderResponse {
    pub order_id: i64,
    pub status: String,
    pub executed_qty: String,
    #[serde(default)]
    pub fills: Vec<RawFill>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFill {
    pub price: String,
    pub qty: String,
    pub commission: String,
}

impl TryFrom<RawOrderResponse> for OrderAck {
    type Error = ApiError;

    fn try_from(raw: RawOrderResponse) -> Result<Self, ApiError> {
        let executed_qty = Decimal::from_str(&raw.executed_qty)
            .map_err(|e| ApiError::Deserialization(format!("executedQty: {e}")))?;

        let status = match raw.status.as_str() {
            "FILLED" => OrderAckStatus::Filled,
            "NEW" | "PARTIALLY_FILLED" => OrderAckStatus::Pending,
            _ => OrderAckStatus::Rejected,
        };

        // Volume-weighted average fill price plus summed commission from
        // the fill legs, when the exchange reported them.
        let mut fill_price = None;
        let mut fees = None;
        if !raw.fills.is_empty() {
            let mut qty_sum = Decimal::ZERO;
            let mut notional = Decimal::ZERO;
            let mut fee_sum = Decimal::ZERO;
            for fill in &raw.fills {
                let price = Decimal::from_str(&fill.price)
                    .map_err(|e| ApiError::Deserialization(format!("fill price: {e}")))?;
                let qty = Decimal::from_str(&fill.qty)
                    .map_err(|e| ApiError::Deserialization(format!("fill qty: {e}")))?;
                let commission = Decimal::from_str(&fill.commission)
                    .map_err(|e| ApiError::Deserialization(format!("commission: {e}")))?;
                qty_sum += qty;
                notional += price * qty;
                fee_sum += commission;
            }
            if !qty_sum.is_zero() {
                fill_price = Some(notional / qty_sum);
            }
            fees = Some(fee_sum);
        }

        Ok(OrderAck {
            order_id: raw.order_id.to_string(),
            status,
            fill_price,
            executed_qty,
            fees,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn filled_order_averages_its_fill_legs() {
        let raw: RawOrderResponse = serde_json::from_str(
            r#"{
                "orderId": 12345,
                "status": "FILLED",
                "executedQty": "0.2",
                "fills": [
                    {"price": "100", "qty": "0.1", "commission": "0.01"},
                    {"price": "102", "qty": "0.1", "commission": "0.01"}
                ]
            }"#,
        )
        .unwrap();
        let ack: OrderAck = raw.try_into().unwrap();
        assert_eq!(ack.status, OrderAckStatus::Filled);
        assert_eq!(ack.fill_price, Some(dec!(101)));
        assert_eq!(ack.fees, Some(dec!(0.02)));
    }

    #[test]
    fn new_limit_order_is_pending_without_fills() {
        let raw: RawOrderResponse = serde_json::from_str(
            r#"{"orderId": 9, "status": "NEW", "executedQty": "0"}"#,
        )
        .unwrap();
        let ack: OrderAck = raw.try_into().unwrap();
        assert_eq!(ack.status, OrderAckStatus::Pending);
        assert!(ack.fill_price.is_none());
    }
}
