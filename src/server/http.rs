//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling. Each accepted
//! connection gets its own task; request handling is stateless apart from
//! the shared AppState.

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::auth::TokenCodec;
use crate::config::Args;
use crate::db::MongoClient;
use crate::engagement::{EngagementEngine, MemoryEngagementStore, MongoEngagementStore};
use crate::routes::{self, BoxBody, ErrorResponse};
use crate::session::{MemoryCredentialStore, MongoCredentialStore, SessionManager};
use crate::types::Result;

/// Shared application state
pub struct AppState {
    pub args: Args,
    /// Durable store handle; None when running on in-memory stores
    pub mongo: Option<MongoClient>,
    /// Session manager over the credential store
    pub sessions: Arc<SessionManager>,
    /// Toggle engine over the engagement store
    pub engagement: Arc<EngagementEngine>,
    /// Process start, for uptime reporting
    pub started_at: Instant,
}

impl AppState {
    /// Production wiring: both cores run against MongoDB-backed stores
    pub async fn with_mongo(args: Args, mongo: MongoClient) -> Result<Self> {
        let codec = build_codec(&args)?;
        let credentials = Arc::new(MongoCredentialStore::new(&mongo).await?);
        let edges = Arc::new(MongoEngagementStore::new(&mongo).await?);

        Ok(Self {
            args,
            mongo: Some(mongo),
            sessions: Arc::new(SessionManager::new(credentials, codec)),
            engagement: Arc::new(EngagementEngine::new(edges)),
            started_at: Instant::now(),
        })
    }

    /// Dev-mode wiring: in-memory stores, nothing survives a restart
    pub fn in_memory(args: Args) -> Result<Self> {
        let codec = build_codec(&args)?;

        Ok(Self {
            args,
            mongo: None,
            sessions: Arc::new(SessionManager::new(
                Arc::new(MemoryCredentialStore::new()),
                codec,
            )),
            engagement: Arc::new(EngagementEngine::new(Arc::new(MemoryEngagementStore::new()))),
            started_at: Instant::now(),
        })
    }
}

fn build_codec(args: &Args) -> Result<TokenCodec> {
    if args.dev_mode && args.access_token_secret.is_none() && args.refresh_token_secret.is_none() {
        return Ok(TokenCodec::new_dev());
    }
    TokenCodec::new(
        args.access_secret(),
        args.access_token_expiry_seconds,
        args.refresh_secret(),
        args.refresh_token_expiry_seconds,
    )
}

/// Accept loop
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "Turnstile listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - in-memory stores, default secrets");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    info!("[{}] {} {}", addr, method, path);

    // User/session routes (/api/v1/users/*) - these consume the request
    if path.starts_with("/api/v1/users") {
        if let Some(response) = routes::handle_user_request(req, Arc::clone(&state)).await {
            return Ok(response);
        }
        return Ok(not_found_response(&path));
    }

    // Engagement routes (/api/v1/likes|dislikes|engagement/*)
    if path.starts_with("/api/v1/likes")
        || path.starts_with("/api/v1/dislikes")
        || path.starts_with("/api/v1/engagement")
    {
        if let Some(response) = routes::handle_engagement_request(req, Arc::clone(&state)).await {
            return Ok(response);
        }
        return Ok(not_found_response(&path));
    }

    let response = match (method, path.as_str()) {
        // Liveness probe
        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            routes::health_check(Arc::clone(&state))
        }

        // Readiness probe
        (Method::GET, "/ready") | (Method::GET, "/readyz") => {
            routes::readiness_check(Arc::clone(&state))
        }

        // Version info for deployment verification
        (Method::GET, "/version") => routes::version_info(),

        // CORS preflight
        (Method::OPTIONS, _) => routes::cors_preflight(),

        (_, p) => not_found_response(p),
    };

    Ok(response)
}

fn not_found_response(path: &str) -> Response<BoxBody> {
    routes::json_response(
        StatusCode::NOT_FOUND,
        &ErrorResponse {
            error: format!("Not found: {}", path),
            code: None,
        },
    )
}
