//! Health check endpoint (`/` and `/health`)

use hyper::{Response, StatusCode};
use serde::Serialize;

use super::response::{json_response, BoxBody};
use crate::server::AppState;

/// Health response
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub healthy: bool,
    /// Crate version plus the short git hash of the build
    pub version: String,
    /// RFC 3339 build time
    pub built_at: &'static str,
    /// Uptime in seconds
    pub uptime: u64,
    /// "development" or "production"
    pub mode: &'static str,
    /// Store backend ("mongodb" or "memory")
    pub database: &'static str,
    /// Sockets currently registered for deadline pushes
    pub connected_users: usize,
    pub timestamp: String,
}

pub fn version_string() -> String {
    format!(
        "{}+{}",
        env!("CARGO_PKG_VERSION"),
        env!("POMODORO_BUILD_COMMIT")
    )
}

pub fn health_check(state: &AppState) -> Response<BoxBody> {
    let body = HealthResponse {
        healthy: true,
        version: version_string(),
        built_at: env!("POMODORO_BUILT_AT"),
        uptime: state.started_at.elapsed().as_secs(),
        mode: if state.args.dev_mode {
            "development"
        } else {
            "production"
        },
        database: state.store.backend(),
        connected_users: state.registry.len(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    json_response(StatusCode::OK, &body)
}
