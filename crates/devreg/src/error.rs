//! Error taxonomy shared by the store, the broker publisher and the HTTP layer.
//!
//! Every failure is terminal for the request that produced it. The [`ErrorKind`]
//! is carried all the way to the response body so callers can tell a broker
//! timeout apart from a broker rejection even though both answer 502.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::Json;
use serde::Serialize;

/// Result alias used across the registry
pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::IntoStaticStr, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    InvalidParam,
    InvalidConfig,
    Duplicate,
    NotFound,
    DbQuery,
    GatewayConnect,
    GatewayRejected,
    GatewayTimeout,
    Binding,
    MethodNotAllowed,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::InvalidParam | ErrorKind::InvalidConfig | ErrorKind::Binding => {
                StatusCode::BAD_REQUEST
            }
            ErrorKind::Duplicate => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ErrorKind::DbQuery => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::GatewayConnect | ErrorKind::GatewayRejected | ErrorKind::GatewayTimeout => {
                StatusCode::BAD_GATEWAY
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Invalid schedule: {0}")]
    InvalidConfig(String),

    #[error("Device already registered: {0}")]
    Duplicate(String),

    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Store query failed: {0}")]
    DbQuery(String),

    #[error("Broker unreachable: {0}")]
    GatewayConnect(String),

    #[error("Broker rejected config for {0}")]
    GatewayRejected(String),

    #[error("No broker confirmation for {mac} within {waited_ms}ms")]
    GatewayTimeout { mac: String, waited_ms: u64 },

    #[error("Malformed payload: {0}")]
    Binding(String),

    #[error("Method not allowed")]
    MethodNotAllowed,
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::InvalidParam(_) => ErrorKind::InvalidParam,
            RegistryError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            RegistryError::Duplicate(_) => ErrorKind::Duplicate,
            RegistryError::NotFound(_) => ErrorKind::NotFound,
            RegistryError::DbQuery(_) => ErrorKind::DbQuery,
            RegistryError::GatewayConnect(_) => ErrorKind::GatewayConnect,
            RegistryError::GatewayRejected(_) => ErrorKind::GatewayRejected,
            RegistryError::GatewayTimeout { .. } => ErrorKind::GatewayTimeout,
            RegistryError::Binding(_) => ErrorKind::Binding,
            RegistryError::MethodNotAllowed => ErrorKind::MethodNotAllowed,
        }
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(e: serde_json::Error) -> Self {
        RegistryError::Binding(e.to_string())
    }
}

/// JSON body sent for every failed request
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        if kind.status().is_server_error() {
            tracing::warn!(kind = %kind, "Request failed: {}", self);
        } else {
            tracing::debug!(kind = %kind, "Request rejected: {}", self);
        }

        let body = ErrorBody {
            kind,
            message: self.to_string(),
        };
        (kind.status(), Json(body)).into_response()
    }
}
