use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

use crate::services::ServiceError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Empty request body")]
    EmptyBody,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Validation error: {0}")]
    InvalidField(String),

    #[error("{message}")]
    Unauthorized {
        message: &'static str,
        hint: Option<&'static str>,
    },

    #[error("Access denied from this IP address")]
    Forbidden,

    #[error("{0}")]
    Misconfigured(&'static str),

    #[error("{message}")]
    RateLimited { message: String, retry_after: u64 },

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::EmptyBody => (StatusCode::BAD_REQUEST, "EMPTY_BODY"),
            AppError::MalformedPayload(_) => (StatusCode::BAD_REQUEST, "MALFORMED_PAYLOAD"),
            AppError::InvalidField(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::Unauthorized { .. } => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            AppError::Misconfigured(_) => (StatusCode::INTERNAL_SERVER_ERROR, "SERVER_CONFIGURATION_ERROR"),
            AppError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED"),
            AppError::Service(error) => match error {
                ServiceError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                ServiceError::ReferrerNotFound(_) => (StatusCode::BAD_REQUEST, "REFERRAL_NOT_FOUND"),
                ServiceError::Duplicate { field: "transaction_id", .. } => {
                    (StatusCode::CONFLICT, "DUPLICATE_TRANSACTION")
                }
                ServiceError::Duplicate { .. } => (StatusCode::CONFLICT, "DUPLICATE_REFERRAL"),
                ServiceError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
                ServiceError::Repository(..) | ServiceError::Communication(..) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
                }
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Internal details stay in the log.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            log::error!("Request failed: {}", self);
            match &self {
                AppError::Misconfigured(message) => message.to_string(),
                _ => "Internal Server Error".to_string(),
            }
        } else {
            self.to_string()
        };

        let mut body = json!({
            "status": false,
            "error": {
                "message": message,
                "code": code,
            }
        });

        match &self {
            AppError::Unauthorized {
                hint: Some(hint), ..
            } => body["hint"] = Value::from(*hint),
            AppError::RateLimited { retry_after, .. } => {
                body["retry_after"] = Value::from(*retry_after)
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}
