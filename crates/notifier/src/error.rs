use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotifierError {
    /// A store read failed; the notifier logs and moves on, retrying on
    /// the next trigger or refresh.
    #[error("Store error: {0}")]
    Store(String),
}
