use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::host_api::middleware::RequestId;

/// Caller-facing message for every 5xx. The real cause only goes to the log.
pub const INTERNAL_ERROR_MESSAGE: &str = "An unexpected error occurred";

/// One violated field in a rejected request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct FieldIssue {
    /// Dotted path to the offending field (`scope.1`); empty for the body itself.
    pub path: String,
    pub message: String,
}

impl FieldIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Wire shape of every failed request.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Stable machine-readable code, e.g. `unauthorized`.
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldIssue>>,
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Every failure that can leave the service, already classified.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{message}")]
    Validation {
        message: String,
        details: Vec<FieldIssue>,
    },

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Too many requests. Retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    /// Other 4xx conditions raised by the transport (unknown route, wrong method).
    #[error("{message}")]
    Request { status: StatusCode, message: String },

    /// Anything unclassified. The payload is logged and never sent.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(message: impl Into<String>, details: Vec<FieldIssue>) -> Self {
        ApiError::Validation {
            message: message.into(),
            details,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation { .. } => "validation_error",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::RateLimited { .. } => "rate_limit_exceeded",
            ApiError::Request { .. } => "request_error",
            ApiError::Internal(_) => "internal_server_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Request { status, .. } => *status,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Attach the correlation id of the request that failed.
    pub fn for_request(self, request_id: &RequestId) -> ErrorReply {
        ErrorReply {
            error: self,
            request_id: Some(request_id.clone()),
        }
    }

    /// The body as the caller sees it. 5xx causes are replaced by a fixed
    /// string here, so nothing internal can leak through this path.
    pub fn to_body(&self, request_id: Option<&RequestId>) -> ErrorResponse {
        let message = match self {
            ApiError::Internal(_) => INTERNAL_ERROR_MESSAGE.to_string(),
            other => other.to_string(),
        };
        let details = match self {
            ApiError::Validation { details, .. } => Some(details.clone()),
            _ => None,
        };
        ErrorResponse {
            error: self.code().to_string(),
            message,
            details,
            request_id: request_id.map(|id| id.as_str().to_string()),
        }
    }

    fn log(&self, request_id: Option<&RequestId>) {
        let request_id = request_id.map(RequestId::as_str).unwrap_or("-");
        let status = self.status().as_u16();
        match self {
            ApiError::Internal(cause) => {
                tracing::error!(request_id, status, error = %cause, "Unhandled server error");
            }
            ApiError::Validation { details, .. } => {
                tracing::warn!(request_id, status, issues = ?details, "Validation error");
            }
            other => {
                tracing::warn!(
                    request_id,
                    status,
                    code = other.code(),
                    message = %other,
                    "Client error"
                );
            }
        }
    }

    fn render(self, request_id: Option<&RequestId>) -> Response {
        self.log(request_id);
        let status = self.status();
        let retry_after = match &self {
            ApiError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };
        let mut response = (status, Json(self.to_body(request_id))).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.render(None)
    }
}

/// An [`ApiError`] bound to the request it answers.
#[derive(Debug)]
pub struct ErrorReply {
    pub error: ApiError,
    pub request_id: Option<RequestId>,
}

impl From<ApiError> for ErrorReply {
    fn from(error: ApiError) -> Self {
        Self {
            error,
            request_id: None,
        }
    }
}

impl IntoResponse for ErrorReply {
    fn into_response(self) -> Response {
        self.error.render(self.request_id.as_ref())
    }
}

pub type ApiResult<T> = Result<T, ErrorReply>;
