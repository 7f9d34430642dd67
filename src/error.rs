use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Settlement error: {0}")]
    Settlement(#[from] SettlementError),

    #[error("Ledger error: {0}")]
    Chain(#[from] ChainError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Operation key {0} already used with a different payload")]
    KeyConflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Settlement state machine errors
#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Submission attempts exhausted after {attempts} tries: {last_error}")]
    AttemptsExhausted { attempts: i32, last_error: String },
}

/// External ledger boundary errors
#[derive(Error, Debug)]
pub enum ChainError {
    /// The ledger refused the call before accepting it into the pending
    /// pool (unreachable node, rejected simulation, insufficient funds).
    /// The only chain error the engine may retry.
    #[error("Submission rejected: {0}")]
    Submission(String),

    #[error("Ledger RPC error: {0}")]
    Rpc(String),
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            AppError::KeyConflict(_) => (StatusCode::CONFLICT, "KEY_CONFLICT", self.to_string()),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            AppError::Chain(_) => (
                StatusCode::BAD_GATEWAY,
                "LEDGER_UNAVAILABLE",
                "The ledger could not be reached".to_string(),
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
        });

        (status, body).into_response()
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        AppError::Internal(format!("JSON conversion error: {:?}", error))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        AppError::Chain(ChainError::Rpc(format!("HTTP transport error: {}", error)))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
