//! HTTP routes for Turnstile

pub mod engagement_routes;
pub mod health;
pub mod user_routes;

pub use engagement_routes::handle_engagement_request;
pub use health::{health_check, readiness_check, version_info};
pub use user_routes::handle_user_request;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::Args;
use crate::types::TurnstileError;

pub(crate) type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Error payload for all failed requests
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

pub(crate) fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<BoxBody> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, DELETE, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type, Authorization")
        .body(full_body(json))
        .unwrap()
}

/// Map a core error onto its HTTP shape
pub(crate) fn error_response(err: &TurnstileError) -> Response<BoxBody> {
    json_response(
        err.status_code(),
        &ErrorResponse {
            error: err.to_string(),
            code: Some(err.code().to_string()),
        },
    )
}

pub(crate) fn cors_preflight() -> Response<BoxBody> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, DELETE, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type, Authorization")
        .header("Access-Control-Max-Age", "86400")
        .body(empty_body())
        .unwrap()
}

pub(crate) fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub(crate) fn empty_body() -> BoxBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

pub(crate) async fn parse_json_body<T: for<'de> Deserialize<'de>>(
    req: Request<hyper::body::Incoming>,
) -> Result<T, TurnstileError> {
    let body = req
        .collect()
        .await
        .map_err(|e| TurnstileError::Http(format!("Failed to read body: {}", e)))?;

    let bytes = body.to_bytes();
    if bytes.len() > 16384 {
        return Err(TurnstileError::Http("Request body too large".into()));
    }

    serde_json::from_slice(&bytes)
        .map_err(|e| TurnstileError::Http(format!("Invalid JSON: {}", e)))
}

pub(crate) fn get_auth_header(req: &Request<hyper::body::Incoming>) -> Option<&str> {
    req.headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

pub(crate) fn get_cookie_header(req: &Request<hyper::body::Incoming>) -> Option<&str> {
    req.headers()
        .get(hyper::header::COOKIE)
        .and_then(|v| v.to_str().ok())
}

// =============================================================================
// Credential cookies
// =============================================================================

/// Build a Set-Cookie value for a credential carrier: never script-readable,
/// transport-secure unless configured off, SameSite per config.
pub(crate) fn credential_cookie(args: &Args, name: &str, value: &str, path: &str) -> String {
    let mut cookie = format!("{}={}; HttpOnly; Path={}", name, value, path);
    if args.cookie_secure {
        cookie.push_str("; Secure");
    }
    cookie.push_str(&format!("; SameSite={}", args.cookie_same_site));
    cookie
}

/// Build a Set-Cookie value that removes the cookie outright (logout clears
/// carriers, it does not wait for them to expire)
pub(crate) fn clearing_cookie(args: &Args, name: &str, path: &str) -> String {
    let mut cookie = format!("{}=; HttpOnly; Path={}; Max-Age=0", name, path);
    if args.cookie_secure {
        cookie.push_str("; Secure");
    }
    cookie.push_str(&format!("; SameSite={}", args.cookie_same_site));
    cookie
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn test_args() -> Args {
        Args::parse_from(["turnstile"])
    }

    #[test]
    fn credential_cookie_attributes() {
        let args = test_args();
        let cookie = credential_cookie(&args, "accessToken", "abc123", "/");

        assert!(cookie.starts_with("accessToken=abc123"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Secure"));
        assert!(cookie.contains("SameSite=None"));
        assert!(cookie.contains("Path=/"));
    }

    #[test]
    fn clearing_cookie_expires_immediately() {
        let args = test_args();
        let cookie = clearing_cookie(&args, "refreshToken", "/");

        assert!(cookie.starts_with("refreshToken=;"));
        assert!(cookie.contains("Max-Age=0"));
        assert!(cookie.contains("HttpOnly"));
    }

    #[test]
    fn insecure_transport_can_be_configured() {
        let mut args = test_args();
        args.cookie_secure = false;
        let cookie = credential_cookie(&args, "accessToken", "abc", "/");
        assert!(!cookie.contains("Secure"));
    }
}
