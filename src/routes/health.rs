//! Health check endpoints
//!
//! Kubernetes-style probes:
//! - /health, /healthz - Liveness (is the service running?)
//! - /ready, /readyz   - Readiness (is the durable store available?)
//! - /version          - Deployed revision info
//!
//! Liveness returns 200 whenever the process is up. Readiness returns 200
//! only when the backing store is usable — which in dev mode (in-memory
//! stores) is always.

use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use crate::routes::{full_body, BoxBody};
use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall health status (true if the service is running)
    pub healthy: bool,
    /// 'online' or 'degraded' for status dashboards
    pub status: &'static str,
    /// Service version
    pub version: &'static str,
    /// Uptime in seconds
    pub uptime: u64,
    /// Current timestamp
    pub timestamp: String,
    /// Operating mode
    pub mode: String,
    /// Node identifier
    pub node_id: String,
    /// Store backend in use
    pub store: StoreHealth,
}

#[derive(Serialize)]
pub struct StoreHealth {
    /// Whether a durable store is connected
    pub connected: bool,
    /// "mongodb" or "memory"
    pub backend: &'static str,
}

fn store_health(state: &AppState) -> StoreHealth {
    if state.mongo.is_some() {
        StoreHealth {
            connected: true,
            backend: "mongodb",
        }
    } else {
        StoreHealth {
            connected: false,
            backend: "memory",
        }
    }
}

/// GET /health - liveness probe
pub fn health_check(state: Arc<AppState>) -> Response<BoxBody> {
    let store = store_health(&state);
    let degraded = !state.args.dev_mode && !store.connected;

    let response = HealthResponse {
        healthy: true,
        status: if degraded { "degraded" } else { "online" },
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        mode: if state.args.dev_mode {
            "development".into()
        } else {
            "production".into()
        },
        node_id: state.args.node_id.to_string(),
        store,
    };

    json(StatusCode::OK, &response)
}

/// GET /ready - readiness probe
pub fn readiness_check(state: Arc<AppState>) -> Response<BoxBody> {
    let store = store_health(&state);
    let ready = store.connected || state.args.dev_mode;

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    json(
        status,
        &serde_json::json!({
            "ready": ready,
            "store": { "connected": store.connected, "backend": store.backend },
        }),
    )
}

/// GET /version - deployment verification
pub fn version_info() -> Response<BoxBody> {
    json(
        StatusCode::OK,
        &serde_json::json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "commit": env!("GIT_COMMIT_SHORT"),
            "built": env!("BUILD_TIMESTAMP"),
        }),
    )
}

fn json<T: Serialize>(status: StatusCode, body: &T) -> Response<BoxBody> {
    let payload = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(full_body(payload))
        .unwrap()
}
