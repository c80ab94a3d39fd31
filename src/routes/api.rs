use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::api;
use crate::state::AppState;
use std::sync::Arc;

/// Plain HTTP routes: health, tool schema, session listing
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(api::health_check))
        .route("/tools", get(api::list_tools))
        .route("/sessions", get(api::list_sessions))
        .layer(TraceLayer::new_for_http())
}
