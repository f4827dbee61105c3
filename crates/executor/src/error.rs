use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    /// Order placement failed at the exchange or paper sink. A rejection
    /// is recorded on the order row; the machine stays in its state.
    #[error("Execution error: {0}")]
    Api(#[from] api_client::error::ApiError),

    #[error("State persistence error: {0}")]
    Store(String),

    /// A balance-conservation breach or equivalent. Fatal for the bot
    /// run: the executor transitions to STOPPED with `status = error`.
    #[error("Invariant violation: {0}")]
    Invariant(String),

    #[error("Bad bot configuration: {0}")]
    BadConfig(String),

    #[error("Executor mailbox closed")]
    MailboxClosed,
}
