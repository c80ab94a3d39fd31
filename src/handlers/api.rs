use axum::{Json, extract::State};
use std::sync::Arc;

use crate::core::session::SessionSummary;
use crate::core::tools::ToolSchema;
use crate::state::AppState;

/// Health check
pub async fn health_check() -> &'static str {
    "OK"
}

/// Capability schema export: every tool, both subsets.
pub async fn list_tools(State(state): State<Arc<AppState>>) -> Json<Vec<ToolSchema>> {
    Json(state.tools().schema())
}

/// Live sessions, oldest first.
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<SessionSummary>> {
    Json(state.sessions().list())
}
