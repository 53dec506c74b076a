//! Error types for the faucet service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Faucet service errors
#[derive(Error, Debug)]
pub enum FaucetError {
    #[error("{reason}")]
    RateLimited { reason: String, retry_after: u64 },

    #[error("CAPTCHA verification failed: {0}")]
    CaptchaFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid or inactive token: {0}")]
    InvalidToken(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Rate limit store error: {0}")]
    StoreError(String),

    #[error("RPC error: {0}")]
    RpcError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl FaucetError {
    /// Failures that happened before any funds could move and are worth a
    /// fresh request from the caller.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            FaucetError::DatabaseError(_) | FaucetError::StoreError(_) | FaucetError::InternalError(_)
        )
    }
}

impl From<bincode::Error> for FaucetError {
    fn from(err: bincode::Error) -> Self {
        FaucetError::InternalError(format!("Serialization failed: {}", err))
    }
}

impl IntoResponse for FaucetError {
    fn into_response(self) -> Response {
        let retry_after = match &self {
            FaucetError::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        };

        let (status, error_message, error_code) = match self {
            FaucetError::RateLimited { reason, .. } => {
                (StatusCode::TOO_MANY_REQUESTS, reason, "RATE_LIMITED")
            }
            FaucetError::CaptchaFailed(_) => (
                StatusCode::FORBIDDEN,
                "CAPTCHA verification failed".to_string(),
                "CAPTCHA_FAILED",
            ),
            FaucetError::InvalidRequest(msg) => (
                StatusCode::BAD_REQUEST,
                format!("Invalid request body: {}", msg),
                "INVALID_REQUEST",
            ),
            FaucetError::InvalidAddress(msg) => (
                StatusCode::BAD_REQUEST,
                format!("Invalid address: {}", msg),
                "INVALID_ADDRESS",
            ),
            FaucetError::InvalidToken(_) => (
                StatusCode::BAD_REQUEST,
                "Invalid or inactive token".to_string(),
                "INVALID_TOKEN",
            ),
            FaucetError::InvalidAmount(msg) => (
                StatusCode::BAD_REQUEST,
                format!("Invalid amount: {}", msg),
                "INVALID_AMOUNT",
            ),
            FaucetError::TransactionFailed(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Transaction failed: {}", msg),
                "TRANSACTION_FAILED",
            ),
            FaucetError::DatabaseError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Database error: {}", err),
                "DATABASE_ERROR",
            ),
            FaucetError::StoreError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Rate limit check failed".to_string(),
                "RATE_LIMIT_CHECK_FAILED",
            ),
            FaucetError::RpcError(msg) => (
                StatusCode::BAD_GATEWAY,
                format!("RPC error: {}", msg),
                "RPC_ERROR",
            ),
            FaucetError::ConfigError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Configuration error: {}", msg),
                "CONFIG_ERROR",
            ),
            FaucetError::InternalError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Internal error: {}", msg),
                "INTERNAL_ERROR",
            ),
        };

        let mut body = json!({
            "error": error_code,
            "message": error_message,
            "timestamp": chrono::Utc::now().to_rfc3339()
        });
        if let Some(seconds) = retry_after {
            body["retryAfter"] = json!(seconds);
        }

        (status, Json(body)).into_response()
    }
}

pub type FaucetResult<T> = Result<T, FaucetError>;
