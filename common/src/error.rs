use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("Store unavailable after retries: {0}")]
    StoreUnavailable(String),
    #[error("Store rejected write: {0}")]
    StoreReject(String),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("LLM unavailable: {0}")]
    LLMUnavailable(String),
    #[error("LLM parsing error: {0}")]
    LLMParsing(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Authorization error: {0}")]
    Auth(String),
    #[error("Forbidden: {reason}")]
    Forbidden {
        reason: String,
        matched_policy_id: Option<String>,
    },
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Overloaded: {0}")]
    Overloaded(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Ingestion Processing error: {0}")]
    Processing(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    pub fn forbidden(reason: impl Into<String>, matched_policy_id: Option<String>) -> Self {
        Self::Forbidden {
            reason: reason.into(),
            matched_policy_id,
        }
    }

    /// Whether a failed external call may be retried without changing semantics.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_) | Self::StoreUnavailable(_))
    }
}
