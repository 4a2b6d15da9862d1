use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Gateway error types
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No healthy instances available for service: {0}")]
    NoHealthyInstances(String),

    #[error("Circuit breaker is open for service: {0}")]
    CircuitOpen(String),

    #[error("Downstream error: {0}")]
    Downstream(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Invalid method: {0}")]
    InvalidMethod(String),

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl GatewayError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::NoHealthyInstances(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::CircuitOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Downstream(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::InvalidMethod(_) => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::Discovery(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Timeout(e.to_string())
        } else {
            GatewayError::Downstream(e.to_string())
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Serialization(e.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
