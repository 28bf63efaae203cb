//! Error types for Turnstile

use hyper::StatusCode;

/// Main error type for Turnstile operations
#[derive(Debug, thiserror::Error)]
pub enum TurnstileError {
    /// Malformed identifier or target reference (caller bug)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Credentials presented but wrong (bad password)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// No access proof presented, or it has lapsed
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Malformed, expired, or wrongly-signed token
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// A superseded refresh token was replayed. More severe than
    /// InvalidToken: the legitimate chain may be compromised.
    #[error("Refresh token reuse detected for user {0}")]
    TokenReuseDetected(String),

    /// Lost a race on a uniqueness constraint
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TurnstileError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            Self::TokenReuseDetected(_) => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Http(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable code for response bodies and log fields
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Unauthenticated(_) => "UNAUTHENTICATED",
            Self::InvalidToken(_) => "INVALID_TOKEN",
            Self::TokenReuseDetected(_) => "TOKEN_REUSE_DETECTED",
            Self::Conflict(_) => "CONFLICT",
            Self::Database(_) => "DB_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Http(_) => "HTTP_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether a failed store operation may be retried. Only infrastructure
    /// failures qualify; per-request errors are terminal.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

// From conversions for common error types

impl From<std::io::Error> for TurnstileError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for TurnstileError {
    fn from(err: serde_json::Error) -> Self {
        Self::Http(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for TurnstileError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<mongodb::error::Error> for TurnstileError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for TurnstileError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::InvalidToken(err.to_string())
    }
}

/// Result type alias for Turnstile operations
pub type Result<T> = std::result::Result<T, TurnstileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(
            TurnstileError::InvalidArgument("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            TurnstileError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            TurnstileError::TokenReuseDetected("u1".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            TurnstileError::Conflict("dup".into()).status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn reuse_detection_is_distinct_from_invalid_token() {
        let reuse = TurnstileError::TokenReuseDetected("u1".into());
        let invalid = TurnstileError::InvalidToken("expired".into());
        assert_ne!(reuse.code(), invalid.code());
    }

    #[test]
    fn only_database_errors_are_transient() {
        assert!(TurnstileError::Database("timeout".into()).is_transient());
        assert!(!TurnstileError::Unauthorized("bad password".into()).is_transient());
        assert!(!TurnstileError::InvalidArgument("bad id".into()).is_transient());
    }
}
