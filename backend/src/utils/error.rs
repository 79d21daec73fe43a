use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Service error with rich context and automatic error trait implementations
///
/// Design: Uses thiserror for ergonomic error handling with context.
/// Each variant carries meaningful context to help with debugging.
#[derive(Error, Debug)]
pub enum AppError {
    // Connector / network errors 1xxx
    #[error("Network error: {0}")]
    Network(String),

    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("Malformed upstream content: {0}")]
    MalformedUpstream(String),

    // Analysis errors 2xxx
    #[error("Embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error("Malformed LLM response: {0}")]
    MalformedLlmResponse(String),

    #[error("Classifier model unavailable: {0}")]
    ModelUnavailable(String),

    // Store errors 3xxx
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    // Validation errors 4xxx
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid channel configuration: {0}")]
    InvalidChannelConfig(String),

    // Worker errors 5xxx
    #[error("Worker stopped due to repeated failures: {0}")]
    WorkerLatched(String),

    // System errors 9xxx
    #[error("Internal error: {0}")]
    Internal(String),

    // Database errors - auto-convert from sqlx::Error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    // Generic wrapper for other errors - auto-convert from anyhow::Error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Helper to create network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Helper to create deadline-exceeded error
    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::DeadlineExceeded(message.into())
    }

    /// Helper to create malformed-upstream error
    pub fn malformed_upstream(message: impl Into<String>) -> Self {
        Self::MalformedUpstream(message.into())
    }

    /// Helper to create embedding-unavailable error
    pub fn embedding_unavailable(message: impl Into<String>) -> Self {
        Self::EmbeddingUnavailable(message.into())
    }

    /// Helper to create LLM provider error
    pub fn llm_provider(message: impl Into<String>) -> Self {
        Self::LlmProvider(message.into())
    }

    /// Helper to create malformed-LLM-response error
    pub fn malformed_llm_response(message: impl Into<String>) -> Self {
        Self::MalformedLlmResponse(message.into())
    }

    /// Helper to create not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Helper to create conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Helper to create invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Helper to create internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether the error is a transient upstream condition that the next
    /// scheduled tick may clear on its own
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_)
                | Self::DeadlineExceeded(_)
                | Self::EmbeddingUnavailable(_)
                | Self::LlmProvider(_)
        )
    }

    /// Error code grouped by subsystem
    pub fn error_code(&self) -> i32 {
        match self {
            // Connector / network errors 1xxx
            Self::Network(_) => 1001,
            Self::DeadlineExceeded(_) => 1002,
            Self::MalformedUpstream(_) => 1003,

            // Analysis errors 2xxx
            Self::EmbeddingUnavailable(_) => 2001,
            Self::LlmProvider(_) => 2002,
            Self::MalformedLlmResponse(_) => 2003,
            Self::ModelUnavailable(_) => 2004,

            // Store errors 3xxx
            Self::NotFound(_) => 3001,
            Self::Conflict(_) => 3002,

            // Validation errors 4xxx
            Self::InvalidInput(_) => 4001,
            Self::InvalidChannelConfig(_) => 4002,

            // Worker errors 5xxx
            Self::WorkerLatched(_) => 5001,

            // System errors 9xxx
            Self::Internal(_) => 9001,
            Self::Database(_) => 9002,
            Self::Other(_) => 9001,
        }
    }
}

/// Error response body for the operational REST surface
#[derive(Debug, Serialize)]
pub struct AppErrorResponse {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.error_code();
        let message = self.to_string();

        let status = match code {
            1001..=1999 => StatusCode::BAD_GATEWAY,
            2001..=2999 => StatusCode::SERVICE_UNAVAILABLE,
            3001 => StatusCode::NOT_FOUND,
            3002 => StatusCode::CONFLICT,
            4001..=4999 => StatusCode::BAD_REQUEST,
            5001..=5999 => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let response = AppErrorResponse { code, message, details: None };

        (status, Json(response)).into_response()
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::deadline_exceeded(err.to_string())
        } else {
            AppError::network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::internal(format!("JSON serialization error: {}", err))
    }
}

pub type AppResult<T> = Result<T, AppError>;
