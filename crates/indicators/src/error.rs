use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndicatorError {
    /// Not enough closed bars to warm the indicator up. Callers treat this
    /// as indeterminate rather than false.
    #[error("Insufficient history: need {needed} bars, have {have}")]
    InsufficientHistory { needed: usize, have: usize },

    #[error("Unknown indicator: {0}")]
    UnknownIndicator(String),

    #[error("Unknown candlestick pattern: {0}")]
    UnknownPattern(String),

    #[error("Invalid setting {name}: {reason}")]
    InvalidSetting { name: String, reason: String },

    #[error("Non-finite value in field {0}")]
    Numeric(String),
}
