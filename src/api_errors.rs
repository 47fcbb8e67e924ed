use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::errors::GatewayError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrBody {
    details: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.status();
        let details = match self {
            AppError::BadRequest(s) | AppError::NotFound(s) | AppError::Internal(s) => s,
        };
        (code, Json(ErrBody { details })).into_response()
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Validation { .. } | GatewayError::InvalidState { .. } => {
                AppError::BadRequest(err.to_string())
            }
            GatewayError::NotFound { .. } => AppError::NotFound(err.to_string()),
            GatewayError::Dispatch { metadata } => AppError::BadRequest(metadata.to_string()),
            // Connectivity failures are not retried; the caller gets a generic detail
            GatewayError::Connectivity { operation, .. } => {
                AppError::BadRequest(format!("Ledger unavailable during {operation}"))
            }
            GatewayError::Config { .. } | GatewayError::Internal { .. } => {
                AppError::Internal(err.to_string())
            }
        }
    }
}
