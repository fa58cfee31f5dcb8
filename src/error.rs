use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

/// Message returned for every credential failure. Unknown email and wrong
/// password must be indistinguishable to the caller.
pub const INVALID_CREDENTIALS: &str = "invalid credentials";

/// JSON body of every non-2xx response.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorEnvelope {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{}", INVALID_CREDENTIALS)]
    Authentication,
    #[error("account already exists")]
    Conflict,
    #[error("too many requests")]
    RateLimited,
    #[error("request timed out")]
    Timeout,
    #[error("dependency failure: {0}")]
    Dependency(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Authentication => StatusCode::FORBIDDEN,
            ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Timeout => StatusCode::REQUEST_TIMEOUT,
            ApiError::Dependency(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Stable application code carried in the envelope.
    pub fn app_code(&self) -> u16 {
        match self {
            ApiError::Validation(_) => 1001,
            ApiError::Authentication => 1002,
            ApiError::Conflict => 1003,
            ApiError::RateLimited => 1429,
            ApiError::Timeout => 1408,
            ApiError::Dependency(_) => 1500,
            ApiError::Unavailable(_) => 1503,
        }
    }

    /// Builds the envelope. Server-side debug strings only reach the client
    /// when `expose_details` is set.
    pub fn envelope(&self, expose_details: bool) -> ErrorEnvelope {
        let status = self.status_code();
        let error = if status.is_server_error() && !expose_details {
            None
        } else {
            Some(self.to_string())
        };
        ErrorEnvelope {
            status: status
                .canonical_reason()
                .unwrap_or("Unknown Status")
                .to_string(),
            code: Some(self.app_code()),
            error,
        }
    }

    pub fn render(self, expose_details: bool) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(%status, error = %self, "request failed");
        }
        let body = self.envelope(expose_details);
        (status, Json(body)).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.render(false)
    }
}
