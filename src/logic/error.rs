use axum::http::StatusCode;
use thiserror::Error;

/// Failure raised by a logic step
#[derive(Debug, Error)]
pub enum LogicError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("forbidden: {0}")]
    Authorization(String),

    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    #[error("invalid step `{action}`: {reason}")]
    InvalidStep { action: String, reason: String },

    #[error("persistence failure on {resource}: {message}")]
    Persistence { resource: String, message: String },

    #[error("cache failure: {0}")]
    Cache(String),

    #[error("transform `{name}` failed: {message}")]
    Transform { name: String, message: String },

    #[error("event `{event}` could not be delivered: {message}")]
    Event { event: String, message: String },

    #[error("integration `{integration}` failed: {message}")]
    Integration { integration: String, message: String },

    #[error("workflow `{workflow}` failed to start: {message}")]
    Workflow { workflow: String, message: String },

    #[error("request deadline exceeded")]
    DeadlineExceeded,

    #[error("{0}")]
    Internal(String),
}

/// Coarse classification every logic error falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authorization,
    NotFound,
    Internal,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Authorization => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl LogicError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LogicError::Validation(_) => ErrorKind::Validation,
            LogicError::Authorization(_) => ErrorKind::Authorization,
            LogicError::NotFound { .. } => ErrorKind::NotFound,
            _ => ErrorKind::Internal,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.kind().status()
    }

    pub fn persistence(resource: &str, err: anyhow::Error) -> Self {
        LogicError::Persistence {
            resource: resource.to_string(),
            message: format!("{:#}", err),
        }
    }

    pub fn invalid_step(action: &str, reason: impl Into<String>) -> Self {
        LogicError::InvalidStep {
            action: action.to_string(),
            reason: reason.into(),
        }
    }
}
