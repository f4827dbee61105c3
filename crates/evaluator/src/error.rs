use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvaluatorError {
    #[error("Condition error: {0}")]
    Condition(#[from] conditions::ConditionError),

    #[error("Market data error: {0}")]
    Api(#[from] api_client::error::ApiError),

    #[error("Indicator error: {0}")]
    Indicator(#[from] indicators::IndicatorError),

    #[error("Malformed condition body for {fingerprint}: {reason}")]
    MalformedCondition { fingerprint: String, reason: String },
}
