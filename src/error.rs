use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt::Display;
use tracing::error;

use crate::store::StoreError;
use crate::workflow::WorkflowError;

pub type AppResult<T> = Result<T, AppError>;

const INTERNAL_MESSAGE: &str = "internal server error";

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized")
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "resource not found")
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    /// Logs the cause and answers with a generic message.
    pub fn internal<E: Display>(error: E) -> Self {
        error!(error = %error, "internal error");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_MESSAGE)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
        });
        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl From<WorkflowError> for AppError {
    fn from(value: WorkflowError) -> Self {
        match value {
            WorkflowError::Unauthenticated(message) => {
                AppError::new(StatusCode::UNAUTHORIZED, message)
            }
            WorkflowError::Forbidden(message) => AppError::forbidden(message),
            WorkflowError::NotFound(what) => {
                AppError::new(StatusCode::NOT_FOUND, format!("{what} not found"))
            }
            WorkflowError::Conflict(message) => AppError::conflict(message),
            WorkflowError::InvalidState(message) | WorkflowError::Validation(message) => {
                AppError::bad_request(message)
            }
            WorkflowError::Internal(message) => AppError::internal(message),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict => AppError::conflict("record already exists"),
            StoreError::NotFound => AppError::not_found(),
            StoreError::Unavailable(message) => AppError::internal(message),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(value: jsonwebtoken::errors::Error) -> Self {
        AppError::internal(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(error: WorkflowError) -> StatusCode {
        AppError::from(error).status()
    }

    #[test]
    fn workflow_errors_map_to_http_statuses() {
        assert_eq!(
            status_of(WorkflowError::Unauthenticated("no token")),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(WorkflowError::Forbidden("role".into())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(WorkflowError::NotFound("job")),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(WorkflowError::Conflict("dup".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(WorkflowError::InvalidState("closed".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(WorkflowError::Validation("score".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(WorkflowError::Internal("db down".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_errors_do_not_leak_details() {
        let error = AppError::from(WorkflowError::Internal(
            "connection refused to postgres://user:pw@db".into(),
        ));
        assert_eq!(error.message(), INTERNAL_MESSAGE);
    }
}
