use std::num::ParseIntError;

pub mod retry;

pub use retry::{retry_on_conflict, RetryPolicy};

#[derive(thiserror::Error, Debug)]
pub enum OperatorError {
    #[error("cluster {cluster} status is not synced, can not judge member health")]
    StatusNotSynced { cluster: String },

    #[error("failure member {pod} has invalid member id {id:?}: {source}")]
    InvalidMemberId {
        pod: String,
        id: String,
        #[source]
        source: ParseIntError,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Requeue: {0}")]
    Requeue(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl OperatorError {
    /// Whether the enclosing scheduler should requeue the pass with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OperatorError::Requeue(_)
                | OperatorError::ExternalServiceError(_)
                | OperatorError::Conflict(_)
                | OperatorError::NotFound(_)
                | OperatorError::HttpError(_)
                | OperatorError::InternalError(_)
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, OperatorError::Conflict(_))
    }

    pub fn is_requeue(&self) -> bool {
        matches!(self, OperatorError::Requeue(_))
    }

    /// Hard errors are surfaced as-is and never retried internally.
    pub fn is_fatal(&self) -> bool {
        !self.is_retryable()
    }
}

impl From<std::io::Error> for OperatorError {
    fn from(err: std::io::Error) -> Self {
        OperatorError::InternalError(format!("IO error: {}", err))
    }
}

impl From<serde_yaml::Error> for OperatorError {
    fn from(err: serde_yaml::Error) -> Self {
        OperatorError::ConfigError(format!("YAML error: {}", err))
    }
}

impl From<url::ParseError> for OperatorError {
    fn from(err: url::ParseError) -> Self {
        OperatorError::ConfigError(format!("URL error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, OperatorError>;
