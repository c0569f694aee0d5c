use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use order_pipeline::AdmissionError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("payment processing failed for {order_id}: {message}")]
    Payment {
        order_id: String,
        processing_ms: u64,
        message: String,
    },

    #[error("failed to publish order {order_id}: {message}")]
    Publish { order_id: String, message: String },

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("internal server error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    processing_ms: Option<u64>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Validation(message) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: "validation_error",
                    message,
                    order_id: None,
                    processing_ms: None,
                },
            ),
            ApiError::Payment {
                order_id,
                processing_ms,
                message,
            } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    error: "payment processing failed",
                    message,
                    order_id: Some(order_id),
                    processing_ms: Some(processing_ms),
                },
            ),
            ApiError::Publish { order_id, message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    error: "failed to publish order",
                    message,
                    order_id: Some(order_id),
                    processing_ms: None,
                },
            ),
            ApiError::Unavailable(message) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse {
                    error: "async processing unavailable",
                    message,
                    order_id: None,
                    processing_ms: None,
                },
            ),
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        error: "internal_error",
                        message: "An internal error occurred".to_string(),
                        order_id: None,
                        processing_ms: None,
                    },
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<AdmissionError> for ApiError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::Validation(e) => ApiError::Validation(e.to_string()),
            AdmissionError::Payment {
                order_id,
                elapsed,
                source,
            } => ApiError::Payment {
                order_id,
                processing_ms: elapsed.as_millis() as u64,
                message: source.to_string(),
            },
            AdmissionError::Publish { order_id, source } => ApiError::Publish {
                order_id,
                message: source.to_string(),
            },
            other => ApiError::Internal(other.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
