//! Telephony media stream WebSocket handler
//!
//! Each accepted connection becomes one session. The socket is split: a
//! writer task serializes whatever the session queues on its
//! [`TelephonySink`], and the read loop parses inbound frames into typed
//! events for the session task. Malformed frames are dropped here and never
//! reach the session.

use axum::{
    Extension,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

use crate::core::session::{SessionRelay, TelephonyLeg};
use crate::core::telephony::{TelephonyCommand, TelephonyEvent, TelephonySink};
use crate::middleware::ClientIp;
use crate::state::{AppState, ConnectionSlot};

/// Inbound events waiting for the session task
const INBOUND_BUFFER: usize = 256;

/// Outbound frames waiting for the socket writer
const OUTBOUND_BUFFER: usize = 512;

/// Maximum WebSocket frame size (1 MB)
const MAX_WS_FRAME_SIZE: usize = 1024 * 1024;

/// Maximum WebSocket message size (1 MB)
const MAX_WS_MESSAGE_SIZE: usize = 1024 * 1024;

/// How long the writer may take to flush the closing frame
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Telephony media stream upgrade
///
/// # Endpoint
///
/// `GET /media-stream`
///
/// The peer sends `connected`, `start`, `media`, `mark`, `dtmf` and `stop`
/// events; the gateway answers with `media`, `mark` and `clear`.
pub async fn media_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    client_ip: Option<Extension<ClientIp>>,
) -> Response {
    let slot = client_ip.map(|Extension(ClientIp(ip))| ConnectionSlot::new(state.clone(), ip));
    debug!("Telephony WebSocket upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_media_socket(socket, state, slot))
}

async fn handle_media_socket(socket: WebSocket, state: Arc<AppState>, slot: Option<ConnectionSlot>) {
    let (mut sender, mut receiver) = socket.split();
    let (event_tx, event_rx) = mpsc::channel::<TelephonyEvent>(INBOUND_BUFFER);
    let (command_tx, mut command_rx) = mpsc::channel::<TelephonyCommand>(OUTBOUND_BUFFER);

    let mut relay = SessionRelay::spawn(
        state.relay.clone(),
        TelephonyLeg {
            inbound: event_rx,
            outbound: TelephonySink::new(command_tx),
        },
    );

    let writer = tokio::spawn(async move {
        while let Some(command) = command_rx.recv().await {
            let result = match command {
                TelephonyCommand::Frame(message) => match serde_json::to_string(&message) {
                    Ok(json) => sender.send(Message::Text(json.into())).await,
                    Err(e) => {
                        error!("Failed to serialize telephony frame: {}", e);
                        continue;
                    }
                },
                TelephonyCommand::Close => {
                    debug!("Closing telephony WebSocket");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };

            if let Err(e) = result {
                debug!("Telephony socket write failed: {}", e);
                break;
            }
        }
    });

    let mut relay_finished = false;
    loop {
        tokio::select! {
            frame = receiver.next() => {
                if !forward_frame(frame, &event_tx).await {
                    break;
                }
            }
            result = &mut relay => {
                relay_finished = true;
                log_relay_exit(result);
                break;
            }
        }
    }

    drop(event_tx);
    if !relay_finished {
        log_relay_exit(relay.await);
    }
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        debug!("Telephony writer did not drain in time");
    }

    drop(slot);
    info!("Telephony WebSocket connection terminated");
}

/// Hand one socket frame to the session. Returns false when the read loop
/// should stop.
async fn forward_frame(
    frame: Option<Result<Message, axum::Error>>,
    events: &mpsc::Sender<TelephonyEvent>,
) -> bool {
    match frame {
        Some(Ok(Message::Text(text))) => match TelephonyEvent::parse(text.as_str()) {
            Ok(event) => {
                if events.send(event).await.is_err() {
                    debug!("Session task gone, stopping telephony reader");
                    return false;
                }
                true
            }
            Err(e) => {
                debug!("Dropping telephony frame: {}", e);
                true
            }
        },
        Some(Ok(Message::Binary(data))) => {
            debug!(bytes = data.len(), "Ignoring binary telephony frame");
            true
        }
        Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => true,
        Some(Ok(Message::Close(_))) => {
            info!("Telephony WebSocket close received");
            false
        }
        Some(Err(e)) => {
            warn!("Telephony WebSocket error: {}", e);
            false
        }
        None => {
            info!("Telephony WebSocket connection closed by peer");
            false
        }
    }
}

fn log_relay_exit(result: Result<(), JoinError>) {
    if let Err(e) = result {
        error!("Session task failed: {}", e);
    }
}
