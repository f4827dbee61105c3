pub mod enums;
pub mod error;
pub mod structs;

// Re-export the core types to provide a clean public API.
pub use enums::{
    BotStatus, BotType, OrderSide, OrderStatus, OrderType, RunStatus, SubscriptionStatus,
    Timeframe,
};
pub use error::CoreError;
pub use structs::{
    Bar, BotRecord, BotRun, ConditionRecord, Order, Position, Subscription, Tick, TriggerEvent,
};
