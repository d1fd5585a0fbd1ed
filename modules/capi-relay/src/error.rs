use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;
use crate::normalize::ValidationError;
use crate::upstream::error::ForwardError;

/// Every failure a request can end in.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid JSON body: {0}")]
    InvalidJson(String),

    #[error("Origin not allowed: {0}")]
    OriginNotAllowed(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Forward(#[from] ForwardError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
        /// Include `message` in the response body (development only).
        expose: bool,
    },
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidJson(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::OriginNotAllowed(_) => StatusCode::FORBIDDEN,
            AppError::Forward(ForwardError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Forward(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            AppError::Forward(ForwardError::ConfigError(_)) | AppError::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Forward(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            AppError::InvalidJson(_) => "invalid_json",
            AppError::OriginNotAllowed(_) => "origin_not_allowed",
            AppError::Validation(e) => e.category(),
            AppError::Forward(e) => e.category(),
            AppError::Internal { .. } => "internal_error",
        }
    }

    fn body(&self) -> ErrorResponse {
        let mut body = ErrorResponse::new(self.category());
        match self {
            AppError::InvalidJson(message) => {
                body.details = Some(serde_json::Value::String(message.clone()));
            }
            AppError::Validation(e) => {
                body.details = Some(serde_json::Value::String(e.to_string()));
            }
            AppError::Forward(e) => {
                body.details = e.details().cloned();
            }
            AppError::Internal { message, expose } if *expose => {
                body.debug_message = Some(message.clone());
            }
            AppError::OriginNotAllowed(_) | AppError::Internal { .. } => {}
        }
        body
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, category = self.category(), "Request failed");
        } else {
            tracing::warn!(error = %self, category = self.category(), "Request rejected");
        }
        (status, Json(self.body())).into_response()
    }
}
