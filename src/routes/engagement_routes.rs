//! HTTP routes for engagement toggles and aggregates
//!
//! - POST   /api/v1/likes/toggle/{v|c|t}/{id}    - Toggle a like
//! - POST   /api/v1/dislikes/toggle/{v|c|t}/{id} - Toggle a dislike
//! - GET    /api/v1/engagement/{v|c|t}/{id}      - Counts + viewer polarity
//! - DELETE /api/v1/engagement/{v|c|t}/{id}      - Target-deleted callback
//!
//! One pair of handlers covers every target kind; the kind rides in the
//! path as data.

use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use crate::auth::{extract_token_from_cookie, extract_token_from_header};
use crate::engagement::{EngagementState, Polarity, TargetKind};
use crate::routes::user_routes::ACCESS_COOKIE;
use crate::routes::{
    cors_preflight, error_response, get_auth_header, get_cookie_header, json_response, BoxBody,
    ErrorResponse,
};
use crate::server::AppState;
use crate::session::AuthContext;
use crate::types::Result;

// =============================================================================
// Response Types
// =============================================================================

/// State the edge was left in after a toggle
#[derive(Debug, Serialize)]
pub struct ToggleResponse {
    pub polarity: EngagementState,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResponse {
    pub likes: u64,
    pub dislikes: u64,
    pub viewer_polarity: EngagementState,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub removed: u64,
}

// =============================================================================
// Helpers
// =============================================================================

fn authenticate(req: &Request<hyper::body::Incoming>, state: &AppState) -> Result<AuthContext> {
    let token = extract_token_from_header(get_auth_header(req))
        .or_else(|| extract_token_from_cookie(get_cookie_header(req), ACCESS_COOKIE))
        .map(|t| t.to_string());
    state.sessions.verify_access(token.as_deref())
}

/// Viewer identity for read paths: present if a valid token rode along,
/// absent (not an error) otherwise
fn viewer(req: &Request<hyper::body::Incoming>, state: &AppState) -> Option<String> {
    authenticate(req, state).ok().map(|ctx| ctx.user_id)
}

/// Parse "{tag}/{id}" tail segments into a target reference
fn parse_target(tag: &str, id: &str) -> Option<(TargetKind, String)> {
    let kind = TargetKind::from_route_tag(tag)?;
    Some((kind, id.to_string()))
}

// =============================================================================
// Route Handlers
// =============================================================================

async fn handle_toggle(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
    kind: TargetKind,
    target_id: String,
    polarity: Polarity,
) -> Response<BoxBody> {
    let ctx = match authenticate(&req, &state) {
        Ok(ctx) => ctx,
        Err(e) => return error_response(&e),
    };

    match state
        .engagement
        .toggle(&ctx.user_id, &target_id, kind, polarity)
        .await
    {
        Ok(resulting) => json_response(StatusCode::OK, &ToggleResponse { polarity: resulting }),
        Err(e) => error_response(&e),
    }
}

async fn handle_aggregate(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
    kind: TargetKind,
    target_id: String,
) -> Response<BoxBody> {
    let viewer_id = viewer(&req, &state);

    match state
        .engagement
        .aggregate_for(&target_id, kind, viewer_id.as_deref())
        .await
    {
        Ok(agg) => json_response(
            StatusCode::OK,
            &AggregateResponse {
                likes: agg.likes,
                dislikes: agg.dislikes,
                viewer_polarity: agg.viewer_polarity,
            },
        ),
        Err(e) => error_response(&e),
    }
}

/// The target-deleted contract: the owning subsystem calls this when a
/// video/comment/tweet goes away, and every edge referencing it follows.
async fn handle_purge(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
    kind: TargetKind,
    target_id: String,
) -> Response<BoxBody> {
    if let Err(e) = authenticate(&req, &state) {
        return error_response(&e);
    }

    match state.engagement.purge_target(&target_id, kind).await {
        Ok(removed) => json_response(StatusCode::OK, &PurgeResponse { removed }),
        Err(e) => error_response(&e),
    }
}

// =============================================================================
// Main Router
// =============================================================================

/// Handle engagement HTTP requests.
///
/// Returns Some(response) if the request was handled, None if it is not an
/// engagement route.
pub async fn handle_engagement_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Option<Response<BoxBody>> {
    let path = req.uri().path();
    let method = req.method().clone();

    let is_engagement = path.starts_with("/api/v1/likes")
        || path.starts_with("/api/v1/dislikes")
        || path.starts_with("/api/v1/engagement");
    if !is_engagement {
        return None;
    }

    if method == Method::OPTIONS {
        return Some(cors_preflight());
    }

    let path = path.split('?').next().unwrap_or(path).to_string();
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    // /api/v1/{likes|dislikes}/toggle/{tag}/{id}
    let response = match (method, segments.as_slice()) {
        (Method::POST, ["api", "v1", "likes", "toggle", tag, id]) => {
            match parse_target(tag, id) {
                Some((kind, target_id)) => {
                    handle_toggle(req, state, kind, target_id, Polarity::Like).await
                }
                None => unknown_target_kind(tag),
            }
        }

        (Method::POST, ["api", "v1", "dislikes", "toggle", tag, id]) => {
            match parse_target(tag, id) {
                Some((kind, target_id)) => {
                    handle_toggle(req, state, kind, target_id, Polarity::Dislike).await
                }
                None => unknown_target_kind(tag),
            }
        }

        (Method::GET, ["api", "v1", "engagement", tag, id]) => match parse_target(tag, id) {
            Some((kind, target_id)) => handle_aggregate(req, state, kind, target_id).await,
            None => unknown_target_kind(tag),
        },

        (Method::DELETE, ["api", "v1", "engagement", tag, id]) => match parse_target(tag, id) {
            Some((kind, target_id)) => handle_purge(req, state, kind, target_id).await,
            None => unknown_target_kind(tag),
        },

        _ => json_response(
            StatusCode::NOT_FOUND,
            &ErrorResponse {
                error: "Engagement endpoint not found".into(),
                code: None,
            },
        ),
    };

    Some(response)
}

fn unknown_target_kind(tag: &str) -> Response<BoxBody> {
    json_response(
        StatusCode::BAD_REQUEST,
        &ErrorResponse {
            error: format!("Unknown target kind '{}', expected v, c, or t", tag),
            code: Some("INVALID_ARGUMENT".into()),
        },
    )
}
