use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Malformed submission: {field} {problem}")]
    MalformedSubmission { field: String, problem: String },

    #[error("Invalid round parameters: {0}")]
    InvalidParameters(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Storage operation timed out after {0:?}")]
    StorageTimeout(Duration),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown component: {0}")]
    UnknownComponent(String),
}

impl CoordinatorError {
    /// All missing fields are reported together.
    pub fn missing(fields: &[&str]) -> Self {
        CoordinatorError::MalformedSubmission {
            field: fields.join(", "),
            problem: if fields.len() == 1 { "is required" } else { "are required" }.to_string(),
        }
    }

    pub fn malformed(field: &str, problem: impl Into<String>) -> Self {
        CoordinatorError::MalformedSubmission {
            field: field.to_string(),
            problem: problem.into(),
        }
    }

    /// Storage failures and timeouts; both surface as 500s and mark the ledger faulted.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            CoordinatorError::Storage(_) | CoordinatorError::StorageTimeout(_)
        )
    }
}

impl From<rusqlite::Error> for CoordinatorError {
    fn from(err: rusqlite::Error) -> Self {
        CoordinatorError::Storage(err.to_string())
    }
}

impl From<redis::RedisError> for CoordinatorError {
    fn from(err: redis::RedisError) -> Self {
        CoordinatorError::Storage(err.to_string())
    }
}

impl From<tokio::task::JoinError> for CoordinatorError {
    fn from(err: tokio::task::JoinError) -> Self {
        CoordinatorError::Storage(format!("storage task failed: {}", err))
    }
}

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            CoordinatorError::MalformedSubmission { .. }
            | CoordinatorError::InvalidParameters(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            CoordinatorError::UnknownComponent(_) => (StatusCode::NOT_FOUND, self.to_string()),
            // Never leak storage details to callers
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string()),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;
