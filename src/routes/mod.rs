//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Binds the websocket store endpoint and a health check under one Axum
//! router. When `WEBSITE_DIR` points at an existing directory the static
//! site is served as the fallback, so the page and the cursor store share an
//! origin.

pub mod ws;

use std::path::PathBuf;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::state::AppState;

/// API routes used by websocket participants.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// [`app`] plus the static site, when one is configured.
pub fn app_with_site(state: AppState, website_dir: Option<PathBuf>) -> Router {
    let router = app(state);
    let Some(dir) = website_dir else {
        return router;
    };
    if !dir.is_dir() {
        warn!(dir = %dir.display(), "WEBSITE_DIR is not a directory, static site disabled");
        return router;
    }
    info!(dir = %dir.display(), "serving static site");
    router.fallback_service(ServeDir::new(dir).append_index_html_on_directories(true))
}

/// Resolve the static site directory from `WEBSITE_DIR`.
#[must_use]
pub fn website_dir() -> Option<PathBuf> {
    std::env::var("WEBSITE_DIR")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
