use thiserror::Error;

use crate::permissions::DenyReason;
use crate::store::StoreError;

/// Failures surfaced by the workflow engine. The HTTP layer maps each kind
/// onto one status code.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{0}")]
    Unauthenticated(&'static str),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    InvalidState(String),
    #[error("{0}")]
    Validation(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;

impl WorkflowError {
    pub fn internal(error: impl std::fmt::Display) -> Self {
        WorkflowError::Internal(error.to_string())
    }
}

impl From<DenyReason> for WorkflowError {
    fn from(reason: DenyReason) -> Self {
        WorkflowError::Forbidden(reason.to_string())
    }
}

impl From<StoreError> for WorkflowError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict => WorkflowError::Conflict("record already exists".to_string()),
            StoreError::NotFound => WorkflowError::NotFound("record"),
            StoreError::Unavailable(message) => WorkflowError::Internal(message),
        }
    }
}
