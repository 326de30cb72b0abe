//! Error types for the monitor and JSON error responses for the API

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;

/// A container name that does not follow `<prefix>_<project>_<service>`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("invalid container name: {0:?}")]
    InvalidContainerName(String),
}

/// A broadcast message could not be handed to a subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The subscriber is not keeping up
    #[error("subscriber queue is full")]
    Full,
    /// The subscriber went away
    #[error("subscriber is closed")]
    Closed,
}

/// An error reported on the daemon's event stream
#[derive(Debug, Clone, thiserror::Error)]
#[error("event stream error: {0}")]
pub struct EventStreamError(pub String);

/// Errors surfaced by the event monitor to its caller
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// The daemon could not be reached when setting up
    #[error("cannot connect to Docker daemon: {0}")]
    DockerConnect(String),
    /// `start` was called on a monitor that already ran
    #[error("event monitor already started")]
    AlreadyStarted,
    /// Listing containers for the startup reconciliation failed
    #[error("reconciliation failed: {0}")]
    Reconcile(String),
}

/// Error codes for API errors
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiErrorCode {
    /// No state recorded for the requested service
    ServiceNotFound,
    /// Service id in the path is not an integer
    InvalidServiceId,
    /// `/ws` requested without a WebSocket upgrade
    UpgradeRequired,
    /// Unknown route
    NotFound,
    /// Internal server error
    InternalError,
}

impl ApiErrorCode {
    /// Get the default HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiErrorCode::ServiceNotFound => StatusCode::NOT_FOUND,
            ApiErrorCode::InvalidServiceId => StatusCode::BAD_REQUEST,
            ApiErrorCode::UpgradeRequired => StatusCode::UPGRADE_REQUIRED,
            ApiErrorCode::NotFound => StatusCode::NOT_FOUND,
            ApiErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiErrorCode::ServiceNotFound => "SERVICE_NOT_FOUND",
            ApiErrorCode::InvalidServiceId => "INVALID_SERVICE_ID",
            ApiErrorCode::UpgradeRequired => "UPGRADE_REQUIRED",
            ApiErrorCode::NotFound => "NOT_FOUND",
            ApiErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// JSON error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: ApiErrorCode,
    pub message: String,
    /// HTTP status code (for reference)
    pub status: u16,
}

impl ErrorResponse {
    pub fn new(code: ApiErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status_code().as_u16(),
            code,
            message: message.into(),
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"code":"{}","message":"{}","status":{}}}"#,
                self.code.as_str(),
                self.message.replace('\"', "\\\""),
                self.status
            )
        })
    }
}

/// Create a JSON error response
pub fn json_error_response(code: ApiErrorCode, message: impl Into<String>) -> Response<Full<Bytes>> {
    let body = ErrorResponse::new(code, message).to_json();

    Response::builder()
        .status(code.status_code())
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .expect("valid response with StatusCode enum and static headers")
}
