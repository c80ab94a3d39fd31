//! HTTP and WebSocket request handlers
//!
//! - `api` - health check, tool schema export, session listing
//! - `telephony` - telephony media stream WebSocket
//! - `observer` - observer WebSocket attached to a live session

pub mod api;
pub mod observer;
pub mod telephony;

pub use observer::observer_handler;
pub use telephony::media_stream_handler;
