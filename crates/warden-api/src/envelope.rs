use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use warden_moderation::ModerationError;
use warden_types::api::{ApiEnvelope, ErrorBody, ResponseMetadata};

/// Error half of the response envelope.
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }

    pub fn auth_required(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "AUTH_REQUIRED", message)
    }

    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "internal error")
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiEnvelope::<()> {
            success: false,
            data: None,
            error: Some(ErrorBody {
                code: self.code.to_string(),
                message: self.message,
                details: self.details,
            }),
            metadata: ResponseMetadata::now(),
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<ModerationError> for ApiError {
    fn from(err: ModerationError) -> Self {
        match err {
            ModerationError::Validation(message) => Self::validation(message),
            ModerationError::NotEligible | ModerationError::NoActiveBan => {
                let reason = err.code();
                Self::validation(err.to_string()).with_details(json!({ "reason": reason }))
            }
            ModerationError::DuplicateAppeal => Self::new(StatusCode::CONFLICT, "CONFLICT", err.to_string())
                .with_details(json!({ "reason": err.code() })),
            ModerationError::Conflict(message) => Self::new(StatusCode::CONFLICT, "CONFLICT", message),
            ModerationError::NotFound(what) => Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", format!("{} not found", what)),
            ModerationError::Transient(cause) => {
                warn!("Dependency unavailable: {}", cause);
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "temporarily unavailable, retry later",
                )
            }
            ModerationError::Internal(cause) => {
                error!("Internal error: {}", cause);
                Self::internal()
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

pub type ApiResult = Result<Response, ApiError>;

/// 200 with `data` wrapped in the envelope.
pub fn ok<T: Serialize>(data: T) -> ApiResult {
    respond(StatusCode::OK, data)
}

pub fn created<T: Serialize>(data: T) -> ApiResult {
    respond(StatusCode::CREATED, data)
}

fn respond<T: Serialize>(status: StatusCode, data: T) -> ApiResult {
    let body = ApiEnvelope {
        success: true,
        data: Some(data),
        error: None,
        metadata: ResponseMetadata::now(),
    };
    Ok((status, Json(body)).into_response())
}
