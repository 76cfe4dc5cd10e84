//! Error types for the pomodoro server
//!
//! Every request-level failure ends up here and is rendered as a
//! `{ success: false, message }` envelope by the HTTP layer.

use hyper::StatusCode;

/// Main error type for pomodoro server operations
#[derive(Debug, thiserror::Error)]
pub enum PomodoroError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Out-of-range or malformed field values (progress, deadlines, ...)
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    /// Bearer token was well-formed but past its expiry
    #[error("Token expired, please login again")]
    TokenExpired,

    #[error("{0}")]
    NotFound(String),

    /// Optimistic write guard lost against a concurrent writer
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    #[error("Database error: {0}")]
    Database(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PomodoroError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::TokenExpired => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::WebSocket(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Convert to status code and body tuple for HTTP response
    pub fn into_status_code_and_body(self) -> (StatusCode, String) {
        let status = self.status_code();
        let body = self.to_string();
        (status, body)
    }

    pub fn is_token_expired(&self) -> bool {
        matches!(self, Self::TokenExpired)
    }
}

impl From<std::io::Error> for PomodoroError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for PomodoroError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for PomodoroError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for PomodoroError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

impl From<mongodb::error::Error> for PomodoroError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<bson::oid::Error> for PomodoroError {
    fn from(err: bson::oid::Error) -> Self {
        Self::NotFound(format!("Invalid id: {}", err))
    }
}

impl From<jsonwebtoken::errors::Error> for PomodoroError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Unauthorized(format!("JWT error: {}", err))
    }
}

/// Result type alias for pomodoro server operations
pub type Result<T> = std::result::Result<T, PomodoroError>;
