use thiserror::Error;

/// Error taxonomy for the pricing pipeline. Variant names are the error
/// `kind` returned to callers; each carries whatever detail helps explain
/// the failure.
#[derive(Debug, Error)]
pub enum CalcError {
    #[error("invalid input: {0:?}")]
    InvalidInput(Vec<String>),

    #[error("invalid margin on modifier {modifier_id}: {reason}")]
    InvalidMargin { modifier_id: String, reason: String },

    #[error("resource limit exceeded: {0}")]
    ResourceLimit(String),

    #[error("rule compile error: {0}")]
    RuleCompileError(String),

    #[error("rule eval error on modifier {modifier_id}: {reason}")]
    RuleEvalError { modifier_id: String, reason: String },

    #[error("data fetch error: {0}")]
    DataFetchError(String),

    #[error("database error: {0}")]
    DatabaseError(String),

    /// Not a failure: the request was already computed and the stored
    /// result is being replayed.
    #[error("idempotency replay of checksum {0}")]
    IdempotencyReplay(String),

    #[error("event publish error: {0}")]
    EventPublishError(String),

    #[error("webhook error: {0}")]
    WebhookError(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CalcError {
    /// The taxonomy name used in structured logs and the error response.
    pub fn kind(&self) -> &'static str {
        match self {
            CalcError::InvalidInput(_) => "INVALID_INPUT",
            CalcError::InvalidMargin { .. } => "INVALID_MARGIN",
            CalcError::ResourceLimit(_) => "RESOURCE_LIMIT",
            CalcError::RuleCompileError(_) => "RULE_COMPILE_ERROR",
            CalcError::RuleEvalError { .. } => "RULE_EVAL_ERROR",
            CalcError::DataFetchError(_) => "DATA_FETCH_ERROR",
            CalcError::DatabaseError(_) => "DATABASE_ERROR",
            CalcError::IdempotencyReplay(_) => "IDEMPOTENCY_REPLAY",
            CalcError::EventPublishError(_) => "EVENT_PUBLISH_ERROR",
            CalcError::WebhookError(_) => "WEBHOOK_ERROR",
            CalcError::Internal(_) => "INTERNAL",
        }
    }
}

impl From<sqlx::Error> for CalcError {
    fn from(e: sqlx::Error) -> Self {
        CalcError::DatabaseError(e.to_string())
    }
}

impl From<serde_json::Error> for CalcError {
    fn from(e: serde_json::Error) -> Self {
        CalcError::Internal(format!("json: {e}"))
    }
}

impl From<common_rules::RuleError> for CalcError {
    fn from(e: common_rules::RuleError) -> Self {
        CalcError::RuleCompileError(e.to_string())
    }
}

pub type CalcResult<T> = Result<T, CalcError>;
