use crate::error::CoreError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The bar period a condition or bot operates on.
///
/// The set is closed: the exchange offers more granularities, but the
/// evaluator only batches these six.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    H1,
    H4,
    D1,
}

impl Timeframe {
    /// The exchange-facing interval string (`"1m"`, `"4h"`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    /// The wall-clock span of one bar.
    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::M1 => Duration::minutes(1),
            Timeframe::M5 => Duration::minutes(5),
            Timeframe::M15 => Duration::minutes(15),
            Timeframe::H1 => Duration::hours(1),
            Timeframe::H4 => Duration::hours(4),
            Timeframe::D1 => Duration::days(1),
        }
    }

    /// The close time of the bar currently forming at `now`.
    ///
    /// Bars are aligned to the Unix epoch, matching the exchange's kline
    /// boundaries.
    pub fn next_close_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let span = self.duration().num_seconds();
        let ts = now.timestamp();
        let next = (ts / span + 1) * span;
        DateTime::from_timestamp(next, 0).unwrap_or(now)
    }

    /// All supported timeframes, shortest first.
    pub fn all() -> [Timeframe; 6] {
        [
            Timeframe::M1,
            Timeframe::M5,
            Timeframe::M15,
            Timeframe::H1,
            Timeframe::H4,
            Timeframe::D1,
        ]
    }
}

impl FromStr for Timeframe {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            other => Err(CoreError::InvalidInput(
                "timeframe".to_string(),
                other.to_string(),
            )),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Timeframe {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Timeframe {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Timeframe::from_str(&s).map_err(|_| {
            serde::de::Error::custom(format!(
                "unknown timeframe `{}`, expected one of 1m/5m/15m/1h/4h/1d",
                s
            ))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl serde::Serialize for OrderSide {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            OrderSide::Buy => serializer.serialize_str("BUY"),
            OrderSide::Sell => serializer.serialize_str("SELL"),
        }
    }
}

impl<'de> serde::Deserialize<'de> for OrderSide {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.to_uppercase().as_str() {
            "BUY" => Ok(OrderSide::Buy),
            "SELL" => Ok(OrderSide::Sell),
            _ => Err(serde::de::Error::custom(format!(
                "unknown variant `{}`, expected `Buy` or `Sell`",
                s
            ))),
        }
    }
}

impl OrderSide {
    /// Returns the opposite side of the order
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

/// Order lifecycle. Orders are append-only: once `Filled`, every field
/// except `status` is immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
    Error,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Error => "error",
        }
    }
}

/// The kind of bot a subscription dispatches to. Only DCA bots are executed
/// today; the other variants reserve their wire names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotType {
    Dca,
    Grid,
    TrendFollowing,
}

impl BotType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotType::Dca => "dca",
            BotType::Grid => "grid",
            BotType::TrendFollowing => "trend_following",
        }
    }
}

impl FromStr for BotType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dca" => Ok(BotType::Dca),
            "grid" => Ok(BotType::Grid),
            "trend_following" => Ok(BotType::TrendFollowing),
            other => Err(CoreError::InvalidInput(
                "bot_type".to_string(),
                other.to_string(),
            )),
        }
    }
}

/// Bot lifecycle status.
///
/// Valid transitions are enforced by the engine:
/// `inactive/stopped -> running -> paused -> running`, and
/// `running/paused -> stopped`. Everything else is an
/// `InvalidStateTransition`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    Inactive,
    Running,
    Paused,
    Stopped,
}

impl BotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotStatus::Inactive => "inactive",
            BotStatus::Running => "running",
            BotStatus::Paused => "paused",
            BotStatus::Stopped => "stopped",
        }
    }

    /// Whether `self -> next` is a legal lifecycle transition.
    pub fn can_transition_to(&self, next: BotStatus) -> bool {
        matches!(
            (self, next),
            (BotStatus::Inactive, BotStatus::Running)
                | (BotStatus::Stopped, BotStatus::Running)
                | (BotStatus::Running, BotStatus::Paused)
                | (BotStatus::Paused, BotStatus::Running)
                | (BotStatus::Running, BotStatus::Stopped)
                | (BotStatus::Paused, BotStatus::Stopped)
        )
    }
}

impl FromStr for BotStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inactive" => Ok(BotStatus::Inactive),
            "running" => Ok(BotStatus::Running),
            "paused" => Ok(BotStatus::Paused),
            "stopped" => Ok(BotStatus::Stopped),
            other => Err(CoreError::InvalidInput(
                "bot_status".to_string(),
                other.to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Stopped,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Stopped => "stopped",
            RunStatus::Error => "error",
        }
    }
}

impl FromStr for RunStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "stopped" => Ok(RunStatus::Stopped),
            "error" => Ok(RunStatus::Error),
            other => Err(CoreError::InvalidInput(
                "run_status".to_string(),
                other.to_string(),
            )),
        }
    }
}

/// Status of a condition subscription. The evaluator only considers
/// `Active` subscriptions when deciding which fingerprints to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Paused,
    Revoked,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Revoked => "revoked",
        }
    }
}

impl FromStr for SubscriptionStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "paused" => Ok(SubscriptionStatus::Paused),
            "revoked" => Ok(SubscriptionStatus::Revoked),
            other => Err(CoreError::InvalidInput(
                "subscription_status".to_string(),
                other.to_string(),
            )),
        }
    }
}
