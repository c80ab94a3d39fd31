//! Telephony leg: the caller's media stream.
//!
//! The WebSocket handler parses inbound frames into [`TelephonyEvent`]s and
//! writes whatever the session queues on its [`TelephonySink`]. Sends never
//! block: a full or closed writer queue drops the frame.

use tokio::sync::mpsc;

pub mod messages;

pub use messages::{
    MarkPayload, MediaPayload, OutboundMessage, StartMetadata, TelephonyCommand, TelephonyError,
    TelephonyEvent,
};

/// Outbound half of a telephony leg.
#[derive(Debug, Clone)]
pub struct TelephonySink {
    tx: mpsc::Sender<TelephonyCommand>,
}

impl TelephonySink {
    pub fn new(tx: mpsc::Sender<TelephonyCommand>) -> Self {
        Self { tx }
    }

    /// Queue a frame. Returns false if it was dropped.
    pub fn send(&self, message: OutboundMessage) -> bool {
        match self.tx.try_send(TelephonyCommand::Frame(message)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Telephony writer queue full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Telephony leg closed, dropping frame");
                false
            }
        }
    }

    pub fn send_media(&self, stream_sid: &str, payload: impl Into<String>) -> bool {
        self.send(OutboundMessage::media(stream_sid, payload))
    }

    pub fn send_mark(&self, stream_sid: &str, name: impl Into<String>) -> bool {
        self.send(OutboundMessage::mark(stream_sid, name))
    }

    pub fn send_clear(&self, stream_sid: &str) -> bool {
        self.send(OutboundMessage::clear(stream_sid))
    }

    /// Ask the writer to close the socket.
    pub fn close(&self) {
        if self.tx.try_send(TelephonyCommand::Close).is_err() {
            tracing::debug!("Telephony leg already closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
