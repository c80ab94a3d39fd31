use axum::Router;
use std::sync::Arc;

use crate::state::AppState;

pub mod api;
pub mod media;

/// All routes with state applied. CORS and security headers are added by
/// the binary.
pub fn build_router(state: Arc<AppState>) -> Router {
    api::create_api_router()
        .merge(media::create_media_router(state.clone()))
        .with_state(state)
}
