use crate::auth::sign_request;
use crate::error::ApiError;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use configuration::settings::ApiConfig;
use core_types::{Bar, OrderSide, OrderType, Tick, Timeframe};
use reqwest::header::{HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use serde::{Deserialize, de::DeserializeOwned};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

mod auth;
pub mod error;
pub mod responses;

// --- Public API ---
pub use responses::{ApiErrorResponse, AssetBalance, OrderAck, OrderAckStatus};

/// Read-only market data. The engine's evaluator and tick poller consume
/// this trait; the concrete client is swappable for a scripted mock.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Fetches up to `limit` bars, ordered by `open_time` ascending. The
    /// last bar is the currently forming one; callers that want closed
    /// bars only must drop it.
    async fn get_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
    ) -> Result<Vec<Bar>, ApiError>;

    /// The latest traded price for a symbol.
    async fn get_ticker(&self, symbol: &str) -> Result<Tick, ApiError>;
}

/// Order placement and account access. (Authenticated.)
///
/// The client presents a synchronous place -> fill-or-pending contract:
/// authentication, signing, and clock skew are handled below this trait.
#[async_trait]
pub trait ExecutionClient: Send + Sync {
    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        qty: Decimal,
        limit_price: Option<Decimal>,
    ) -> Result<OrderAck, ApiError>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ApiError>;

    /// Free and locked balance per asset.
    async fn account_balance(&self) -> Result<HashMap<String, AssetBalance>, ApiError>;
}

/// A concrete implementation of both traits for the Binance spot exchange.
#[derive(Clone)]
pub struct BinanceClient {
    client: reqwest::Client,
    base_url: String,
    api_secret: String,
}

impl BinanceClient {
    pub fn new(live_mode: bool, api_config: &ApiConfig, timeout: Duration) -> Self {
        let (base_url, keys) = if live_mode {
            ("https://api.binance.com".to_string(), &api_config.production)
        } else {
            (
                "https://testnet.binance.vision".to_string(),
                &api_config.testnet,
            )
        };

        let mut headers = HeaderMap::new();
        if !keys.key.is_empty() {
            headers.insert(
                "X-MBX-APIKEY",
                HeaderValue::from_str(&keys.key).expect("Invalid API Key"),
            );
        }

        Self {
            client: reqwest::Client::builder()
                .default_headers(headers)
                .timeout(timeout)
                .build()
                .expect("Failed to build reqwest client"),
            base_url,
            api_secret: keys.secret.clone(),
        }
    }

    fn signed_url(&self, path: &str, params: &mut BTreeMap<&str, String>) -> Result<String, ApiError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ApiError::InvalidData(e.to_string()))?
            .as_millis();
        params.insert("timestamp", timestamp.to_string());

        let query_string =
            serde_qs::to_string(params).map_err(|e| ApiError::InvalidData(e.to_string()))?;
        let signature = sign_request(&self.api_secret, &query_string);

        Ok(format!(
            "{}{}?{}&signature={}",
            self.base_url, path, query_string, signature
        ))
    }

    async fn decode_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            serde_json::from_str::<T>(&text).map_err(|e| ApiError::Deserialization(e.to_string()))
        } else {
            let api_error: ApiErrorResponse = serde_json::from_str(&text).map_err(|e| {
                ApiError::Deserialization(format!(
                    "Failed to deserialize error response: {}. Original text: {}",
                    e, text
                ))
            })?;
            Err(ApiError::Rejected(api_error.code, api_error.msg))
        }
    }

    async fn get_signed<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &mut BTreeMap<&str, String>,
    ) -> Result<T, ApiError> {
        let url = self.signed_url(path, params)?;
        let response = self.client.get(&url).send().await?;
        Self::decode_response(response).await
    }

    async fn post_signed<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &mut BTreeMap<&str, String>,
    ) -> Result<T, ApiError> {
        let url = self.signed_url(path, params)?;
        let response = self.client.post(&url).send().await?;
        Self::decode_response(response).await
    }

    async fn delete_signed<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &mut BTreeMap<&str, String>,
    ) -> Result<T, ApiError> {
        let url = self.signed_url(path, params)?;
        let response = self.client.delete(&url).send().await?;
        Self::decode_response(response).await
    }
}

// Intermediate struct for deserializing klines from the Binance API. The
// response is a positional array per bar.
#[derive(Deserialize)]
struct RawKline(
    i64,
    String,
    String,
    String,
    String,
    String,
    i64,
    String,
    i64,
    String,
    String,
    String,
);

fn parse_decimal(raw: &str, field: &str) -> Result<Decimal, ApiError> {
    Decimal::from_str(raw)
        .map_err(|e| ApiError::Deserialization(format!("{field}: {e}")))
}

fn parse_millis(raw: i64, field: &str) -> Result<DateTime<Utc>, ApiError> {
    Utc.timestamp_millis_opt(raw)
        .single()
        .ok_or_else(|| ApiError::InvalidData(format!("Invalid {field}: {raw}")))
}

#[async_trait]
impl MarketData for BinanceClient {
    async fn get_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
    ) -> Result<Vec<Bar>, ApiError> {
        let url = format!("{}/api/v3/klines", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("symbol", symbol),
                ("interval", timeframe.as_str()),
                ("limit", &limit.to_string()),
            ])
            .send()
            .await?;
        let raw: Vec<RawKline> = Self::decode_response(response).await?;

        raw.into_iter()
            .map(|k| {
                Ok(Bar {
                    open_time: parse_millis(k.0, "open_time")?,
                    open: parse_decimal(&k.1, "open")?,
                    high: parse_decimal(&k.2, "high")?,
                    low: parse_decimal(&k.3, "low")?,
                    close: parse_decimal(&k.4, "close")?,
                    volume: parse_decimal(&k.5, "volume")?,
                    close_time: parse_millis(k.6, "close_time")?,
                })
            })
            .collect()
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Tick, ApiError> {
        #[derive(Deserialize)]
        struct TickerResponse {
            symbol: String,
            price: String,
        }

        let url = format!("{}/api/v3/ticker/price", self.base_url);
        let response = self.client.get(&url).query(&[("symbol", symbol)]).send().await?;
        let ticker: TickerResponse = Self::decode_response(response).await?;

        Ok(Tick {
            symbol: ticker.symbol,
            price: parse_decimal(&ticker.price, "price")?,
            timestamp: Utc::now(),
        })
    }
}

#[async_trait]
impl ExecutionClient for BinanceClient {
    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        qty: Decimal,
        limit_price: Option<Decimal>,
    ) -> Result<OrderAck, ApiError> {
        let mut params = BTreeMap::new();
        params.insert("symbol", symbol.to_string());
        params.insert("side", format!("{:?}", side).to_uppercase());
        params.insert("type", format!("{:?}", order_type).to_uppercase());
        params.insert("quantity", qty.to_string());
        if let Some(price) = limit_price {
            params.insert("price", price.to_string());
            params.insert("timeInForce", "GTC".to_string());
        }

        let raw: responses::RawOrderResponse =
            self.post_signed("/api/v3/order", &mut params).await?;
        raw.try_into()
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ApiError> {
        let mut params = BTreeMap::new();
        params.insert("symbol", symbol.to_string());
        params.insert("orderId", order_id.to_string());

        let _ignored: serde_json::Value =
            self.delete_signed("/api/v3/order", &mut params).await?;
        Ok(())
    }

    async fn account_balance(&self) -> Result<HashMap<String, AssetBalance>, ApiError> {
        #[derive(Deserialize)]
        struct RawBalance {
            asset: String,
            free: String,
            locked: String,
        }
        #[derive(Deserialize)]
        struct AccountResponse {
            balances: Vec<RawBalance>,
        }

        let mut params = BTreeMap::new();
        let account: AccountResponse = self.get_signed("/api/v3/account", &mut params).await?;

        account
            .balances
            .into_iter()
            .map(|b| {
                Ok((
                    b.asset,
                    AssetBalance {
                        free: parse_decimal(&b.free, "free")?,
                        locked: parse_decimal(&b.locked, "locked")?,
                    },
                ))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_kline_deserializes_from_positional_array() {
        let json = r#"[1700000000000,"42000.1","42100.0","41900.5","42050.2","13.5",1700003599999,"567000.0",120,"6.7","281000.0","0"]"#;
        let raw: RawKline = serde_json::from_str(json).unwrap();
        assert_eq!(raw.0, 1700000000000);
        assert_eq!(raw.4, "42050.2");
    }

    #[test]
    fn decimal_parsing_rejects_garbage() {
        assert!(parse_decimal("42000.1", "open").is_ok());
        assert!(parse_decimal("not-a-number", "open").is_err());
    }
}
