//! Observer WebSocket handler
//!
//! An observer attaches to a live session by key, receives a verbatim mirror
//! of the session's model events, and may send session overrides back.
//! Attaching a second observer replaces the first.

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::core::session::{SessionCommand, SessionHandle};
use crate::errors::{AppError, AppResult};
use crate::state::AppState;

/// Mirrored events buffered for a slow observer before dropping
const OBSERVER_BUFFER: usize = 256;

/// Observer upgrade
///
/// # Endpoint
///
/// `GET /observer/{session_key}` - 404 if no such session
pub async fn observer_handler(
    Path(session_key): Path<String>,
    State(state): State<Arc<AppState>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> AppResult<Response> {
    let handle = state
        .sessions()
        .get(&session_key)
        .ok_or_else(|| AppError::NotFound(format!("Session {session_key}")))?;

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    info!(session = %session_key, "Observer upgrade requested");
    Ok(ws.on_upgrade(move |socket| handle_observer_socket(socket, handle, session_key)))
}

async fn handle_observer_socket(socket: WebSocket, handle: Arc<SessionHandle>, session_key: String) {
    let (mut sender, mut receiver) = socket.split();
    let (mirror_tx, mut mirror_rx) = mpsc::channel::<String>(OBSERVER_BUFFER);

    if handle
        .commands()
        .send(SessionCommand::AttachObserver(mirror_tx))
        .await
        .is_err()
    {
        info!(session = %session_key, "Session ended before observer attached");
        let _ = sender.send(Message::Close(None)).await;
        return;
    }

    loop {
        tokio::select! {
            mirrored = mirror_rx.recv() => match mirrored {
                Some(text) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => {
                    // session ended or another observer took over
                    debug!(session = %session_key, "Observer channel closed by session");
                    break;
                }
            },
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let command = SessionCommand::ObserverMessage(text.as_str().to_string());
                    if handle.commands().send(command).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(session = %session_key, "Observer socket error: {}", e);
                    break;
                }
            }
        }
    }

    drop(mirror_rx);
    let _ = handle.commands().send(SessionCommand::DetachObserver).await;
    let _ = sender.send(Message::Close(None)).await;
    info!(session = %session_key, "Observer disconnected");
}
