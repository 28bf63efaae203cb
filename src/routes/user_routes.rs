//! HTTP routes for accounts and sessions
//!
//! - POST /api/v1/users/register        - Create an account
//! - POST /api/v1/users/login           - Authenticate, set credential cookies
//! - POST /api/v1/users/logout          - Clear the refresh credential and cookies
//! - POST /api/v1/users/refresh-token   - Rotate the refresh token
//! - POST /api/v1/users/change-password - Verify old password, store new hash
//! - GET  /api/v1/users/current-user    - Identity behind the access token

use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::{extract_token_from_cookie, extract_token_from_header};
use crate::routes::{
    clearing_cookie, cors_preflight, credential_cookie, error_response, get_auth_header,
    get_cookie_header, json_response, parse_json_body, BoxBody, ErrorResponse,
};
use crate::server::AppState;
use crate::session::{AuthContext, Identity, Registration, SessionTokens};
use crate::types::{Result, TurnstileError};

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password: String,
}

/// Login accepts either a unified identifier or the original's separate
/// username/email fields.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

/// Public view of a user (no credential fields)
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: String,
    pub username: String,
    pub email: String,
    pub full_name: String,
}

impl From<&Identity> for UserView {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id.clone(),
            username: identity.username.clone(),
            email: identity.email.clone(),
            full_name: identity.full_name.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub user: UserView,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
}

// =============================================================================
// Token extraction
// =============================================================================

/// Access token from the Authorization header, falling back to the cookie
fn access_token(req: &Request<hyper::body::Incoming>) -> Option<String> {
    extract_token_from_header(get_auth_header(req))
        .or_else(|| extract_token_from_cookie(get_cookie_header(req), ACCESS_COOKIE))
        .map(|t| t.to_string())
}

/// Refresh token from its cookie, falling back to the Authorization header
fn refresh_token(req: &Request<hyper::body::Incoming>) -> Option<String> {
    extract_token_from_cookie(get_cookie_header(req), REFRESH_COOKIE)
        .or_else(|| extract_token_from_header(get_auth_header(req)))
        .map(|t| t.to_string())
}

/// Gate for authenticated routes: verified access token → identity
fn authenticate(req: &Request<hyper::body::Incoming>, state: &AppState) -> Result<AuthContext> {
    state.sessions.verify_access(access_token(req).as_deref())
}

/// Attach both credential carriers to a response
fn with_credential_cookies(
    mut response: Response<BoxBody>,
    state: &AppState,
    tokens: &SessionTokens,
) -> Response<BoxBody> {
    let headers = response.headers_mut();
    headers.append(
        hyper::header::SET_COOKIE,
        credential_cookie(&state.args, ACCESS_COOKIE, &tokens.access, "/")
            .parse()
            .expect("cookie value is valid ASCII"),
    );
    headers.append(
        hyper::header::SET_COOKIE,
        credential_cookie(
            &state.args,
            REFRESH_COOKIE,
            &tokens.refresh,
            &state.args.refresh_cookie_path,
        )
        .parse()
        .expect("cookie value is valid ASCII"),
    );
    response
}

/// Attach cookie-clearing headers (logout removes carriers outright)
fn with_cleared_cookies(mut response: Response<BoxBody>, state: &AppState) -> Response<BoxBody> {
    let headers = response.headers_mut();
    headers.append(
        hyper::header::SET_COOKIE,
        clearing_cookie(&state.args, ACCESS_COOKIE, "/")
            .parse()
            .expect("cookie value is valid ASCII"),
    );
    headers.append(
        hyper::header::SET_COOKIE,
        clearing_cookie(&state.args, REFRESH_COOKIE, &state.args.refresh_cookie_path)
            .parse()
            .expect("cookie value is valid ASCII"),
    );
    response
}

// =============================================================================
// Route Handlers
// =============================================================================

/// POST /api/v1/users/register
async fn handle_register(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Response<BoxBody> {
    let body: RegisterRequest = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };

    match state
        .sessions
        .register(Registration {
            username: body.username,
            email: body.email,
            full_name: body.full_name,
            password: body.password,
        })
        .await
    {
        Ok(identity) => json_response(StatusCode::CREATED, &UserView::from(&identity)),
        Err(e) => error_response(&e),
    }
}

/// POST /api/v1/users/login
async fn handle_login(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Response<BoxBody> {
    let body: LoginRequest = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };

    let identifier = match body.identifier.or(body.username).or(body.email) {
        Some(id) if !id.trim().is_empty() => id,
        _ => {
            return error_response(&TurnstileError::InvalidArgument(
                "username or email is required".into(),
            ))
        }
    };

    match state.sessions.login(&identifier, &body.password).await {
        Ok((identity, tokens)) => {
            let response = json_response(
                StatusCode::OK,
                &LoginResponse {
                    user: UserView::from(&identity),
                    access_token: tokens.access.clone(),
                    refresh_token: tokens.refresh.clone(),
                },
            );
            with_credential_cookies(response, &state, &tokens)
        }
        Err(e) => error_response(&e),
    }
}

/// POST /api/v1/users/logout
async fn handle_logout(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Response<BoxBody> {
    let ctx = match authenticate(&req, &state) {
        Ok(ctx) => ctx,
        Err(e) => return error_response(&e),
    };

    match state.sessions.logout(&ctx.user_id).await {
        Ok(()) => {
            let response = json_response(
                StatusCode::OK,
                &SuccessResponse {
                    success: true,
                    message: "User logged out".into(),
                },
            );
            with_cleared_cookies(response, &state)
        }
        Err(e) => error_response(&e),
    }
}

/// POST /api/v1/users/refresh-token
async fn handle_refresh(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Response<BoxBody> {
    let presented = refresh_token(&req);

    match state.sessions.refresh(presented.as_deref()).await {
        Ok(tokens) => {
            let response = json_response(
                StatusCode::OK,
                &RefreshResponse {
                    access_token: tokens.access.clone(),
                    refresh_token: tokens.refresh.clone(),
                },
            );
            with_credential_cookies(response, &state, &tokens)
        }
        Err(e) => error_response(&e),
    }
}

/// POST /api/v1/users/change-password
async fn handle_change_password(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Response<BoxBody> {
    let ctx = match authenticate(&req, &state) {
        Ok(ctx) => ctx,
        Err(e) => return error_response(&e),
    };

    let body: ChangePasswordRequest = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };

    match state
        .sessions
        .change_password(&ctx.user_id, &body.old_password, &body.new_password)
        .await
    {
        Ok(()) => json_response(
            StatusCode::OK,
            &SuccessResponse {
                success: true,
                message: "Password changed successfully".into(),
            },
        ),
        Err(e) => error_response(&e),
    }
}

/// GET /api/v1/users/current-user
async fn handle_current_user(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Response<BoxBody> {
    let ctx = match authenticate(&req, &state) {
        Ok(ctx) => ctx,
        Err(e) => return error_response(&e),
    };

    match state.sessions.current_user(&ctx.user_id).await {
        Ok(identity) => json_response(StatusCode::OK, &UserView::from(&identity)),
        Err(e) => error_response(&e),
    }
}

// =============================================================================
// Main Router
// =============================================================================

/// Handle user/session HTTP requests.
///
/// Returns Some(response) if the request was handled, None if it is not a
/// user route.
pub async fn handle_user_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Option<Response<BoxBody>> {
    let path = req.uri().path();
    let method = req.method();

    if !path.starts_with("/api/v1/users") {
        return None;
    }

    if method == Method::OPTIONS {
        return Some(cors_preflight());
    }

    // Remove query string for matching
    let path = path.split('?').next().unwrap_or(path).to_string();

    let response = match (method.clone(), path.as_str()) {
        (Method::POST, "/api/v1/users/register") => handle_register(req, state).await,
        (Method::POST, "/api/v1/users/login") => handle_login(req, state).await,
        (Method::POST, "/api/v1/users/logout") => handle_logout(req, state).await,
        (Method::POST, "/api/v1/users/refresh-token") => handle_refresh(req, state).await,
        (Method::POST, "/api/v1/users/change-password") => {
            handle_change_password(req, state).await
        }
        (Method::GET, "/api/v1/users/current-user") => handle_current_user(req, state).await,

        (_, "/api/v1/users/register")
        | (_, "/api/v1/users/login")
        | (_, "/api/v1/users/logout")
        | (_, "/api/v1/users/refresh-token")
        | (_, "/api/v1/users/change-password")
        | (_, "/api/v1/users/current-user") => json_response(
            StatusCode::METHOD_NOT_ALLOWED,
            &ErrorResponse {
                error: "Method not allowed".into(),
                code: None,
            },
        ),

        _ => json_response(
            StatusCode::NOT_FOUND,
            &ErrorResponse {
                error: "User endpoint not found".into(),
                code: None,
            },
        ),
    };

    Some(response)
}
