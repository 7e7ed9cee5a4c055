// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! HTTP handlers for the read API.
//!
//! Everything here reads the published snapshot or a static file; nothing
//! touches the pipeline.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::pipeline::SnapshotCell;

/// Shared application state.
pub struct AppState {
    pub snapshot: SnapshotCell,
    pub index_file: PathBuf,
    pub icon_file: PathBuf,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Build the read API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/data", get(data))
        .route("/favicon.ico", get(favicon))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "proxy-log-monitor",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Current snapshot: history, rank and last update time.
pub async fn data(State(state): State<Arc<AppState>>) -> Response {
    let snapshot = state.snapshot.current().await;
    Json(snapshot.as_ref()).into_response()
}

/// Front-end page.
pub async fn index(State(state): State<Arc<AppState>>) -> Response {
    match tokio::fs::read_to_string(&state.index_file).await {
        Ok(page) => Html(page).into_response(),
        Err(e) => {
            debug!(path = %state.index_file.display(), error = %e, "Index page unavailable");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

/// Site icon, 404 when the data directory has none.
pub async fn favicon(State(state): State<Arc<AppState>>) -> Response {
    match tokio::fs::read(&state.icon_file).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "image/png")], bytes).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}
