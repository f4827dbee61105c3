use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// A string failed to parse into one of the closed vocabularies
    /// (timeframe, status, bot type). Carries the field and the offending
    /// value.
    #[error("Invalid input for {0}: {1}")]
    InvalidInput(String, String),
}
