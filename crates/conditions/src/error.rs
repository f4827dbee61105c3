use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConditionError {
    /// Canonicalization or validation rejected the input. Returned to the
    /// bot-creation caller; nothing was persisted.
    #[error("Bad condition: {0}")]
    BadCondition(String),

    /// The backing store failed transiently. Callers may retry with
    /// identical input safely — every registry write is idempotent.
    #[error("Transient store error: {0}")]
    Store(String),
}

impl ConditionError {
    pub fn bad<S: Into<String>>(msg: S) -> Self {
        Self::BadCondition(msg.into())
    }
}
