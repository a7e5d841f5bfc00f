use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use thiserror::Error;
use tracing::error;

use crate::gateway::GatewayError;
use crate::store::StoreError;
use crate::utils::response::error as error_response;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {message}")]
    Conflict {
        message: String,
        details: Option<Value>,
    },

    #[error("Webhook signature rejected: {0}")]
    Signature(String),

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("External call timed out: {0}")]
    Timeout(String),

    #[error("Database error")]
    Database(#[from] sqlx::Error),
}

impl AppError {
    pub fn conflict(message: impl Into<String>) -> Self {
        AppError::Conflict {
            message: message.into(),
            details: None,
        }
    }

    pub fn seat_conflict(seat_ids: &[uuid::Uuid]) -> Self {
        AppError::Conflict {
            message: "One or more seats are no longer available".to_string(),
            details: Some(serde_json::json!({ "unavailable_seats": seat_ids })),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::Signature(_) => StatusCode::BAD_REQUEST,
            AppError::Gateway(_) => StatusCode::BAD_GATEWAY,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict { .. } => "CONFLICT",
            AppError::Signature(_) => "SIGNATURE_ERROR",
            AppError::Gateway(_) => "GATEWAY_ERROR",
            AppError::Timeout(_) => "TIMEOUT_ERROR",
            AppError::Database(_) => "DATABASE_ERROR",
        }
    }

    fn log(&self) {
        match self {
            AppError::Database(e) => {
                error!(error = ?e, "Database error");
            }
            other => {
                error!(error = ?other, code = other.code(), "Application error");
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::SeatConflict(seats) => AppError::seat_conflict(&seats),
            StoreError::DuplicateRefund(ticket_id) => AppError::Conflict {
                message: format!("An active refund request already exists for ticket {ticket_id}"),
                details: None,
            },
            StoreError::NotFound(what) => AppError::NotFound(what),
            StoreError::Database(e) => AppError::Database(e),
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Signature(msg) => AppError::Signature(msg),
            GatewayError::Timeout => AppError::Timeout("payment gateway call".to_string()),
            GatewayError::Provider(msg) => AppError::Gateway(msg),
            GatewayError::Transport(e) => AppError::Gateway(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        // Log internal details
        self.log();

        // Only expose high-level messages to the client
        let (public_message, details) = match self {
            AppError::Database(_) => ("A database error occurred".to_string(), None),
            AppError::Conflict { message, details } => (message, details),
            other => (other.to_string(), None),
        };

        error_response(code, public_message, details, status)
    }
}
