//! WebSocket route configuration
//!
//! - `GET /media-stream` - telephony leg, one session per connection,
//!   subject to the connection limits
//! - `GET /observer/{session_key}` - observer leg for a live session

use axum::{Router, middleware, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::{media_stream_handler, observer_handler};
use crate::middleware::connection_limit_middleware;
use crate::state::AppState;
use std::sync::Arc;

pub fn create_media_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let media = Router::new()
        .route("/media-stream", get(media_stream_handler))
        .layer(middleware::from_fn_with_state(
            state,
            connection_limit_middleware,
        ));

    Router::new()
        .route("/observer/{session_key}", get(observer_handler))
        .merge(media)
        .layer(TraceLayer::new_for_http())
}
