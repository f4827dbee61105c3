use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    /// Transport failure or client-side timeout. Transient: the next cycle
    /// or tick retries; nothing retries within the current one.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Failed to deserialize response: {0}")]
    Deserialization(String),

    #[error("Invalid data in response: {0}")]
    InvalidData(String),

    /// The exchange rejected the request (insufficient balance, filter
    /// violation, throttle). Carries Binance's error code and message.
    #[error("Exchange rejection {0}: {1}")]
    Rejected(i64, String),
}

impl ApiError {
    /// Whether the error is worth retrying on a later cycle (as opposed to
    /// a rejection that will repeat deterministically).
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Network(_))
    }
}
