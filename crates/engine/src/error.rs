use core_types::BotStatus;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EngineError {
    /// A lifecycle action that the bot's current status does not allow.
    /// Returned typed to the API layer; state is unchanged.
    #[error("Invalid state transition for bot {bot_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        bot_id: Uuid,
        from: BotStatus,
        to: BotStatus,
    },

    #[error("Bot not found: {0}")]
    NotFound(Uuid),

    #[error("Condition error: {0}")]
    Condition(#[from] conditions::ConditionError),

    #[error("Executor error: {0}")]
    Executor(#[from] executor::ExecutorError),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Bad bot configuration: {0}")]
    BadConfig(String),
}
