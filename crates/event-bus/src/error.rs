use thiserror::Error;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("Invalid topic pattern: {0}")]
    InvalidPattern(String),
}
