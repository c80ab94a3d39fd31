//! Base abstractions for the model leg.
//!
//! A model leg is a bidirectional event stream to a realtime speech model.
//! The relay never talks to a socket directly: it holds a [`ModelLeg`] with
//! an outbound event sender and an inbound frame receiver, and the connection
//! task owned by the connector does the socket work. Dropping or closing the
//! leg tears the connection down.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::openai::messages::{ClientEvent, ServerEvent};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur on the model leg.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Outbound queue is full
    #[error("Outbound queue full")]
    Backpressure,
}

/// Result type for model leg operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Frames
// =============================================================================

/// One inbound frame from the model leg.
#[derive(Debug, Clone)]
pub enum ModelFrame {
    /// A text event. `raw` is mirrored verbatim to observers; `event` is
    /// `None` when the payload could not be parsed.
    Event {
        raw: Arc<str>,
        event: Option<ServerEvent>,
    },
    /// The connection ended.
    Closed { reason: Option<String> },
}

impl ModelFrame {
    /// Parse a text frame received from the provider.
    pub fn from_text(text: &str) -> Self {
        let event = match serde_json::from_str::<ServerEvent>(text) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::debug!("Failed to parse model event: {}", e);
                None
            }
        };
        ModelFrame::Event {
            raw: Arc::from(text),
            event,
        }
    }
}

// =============================================================================
// Model Leg Handle
// =============================================================================

/// Handle to an open model leg, exclusively owned by one session.
#[derive(Debug)]
pub struct ModelLeg {
    outbound: mpsc::Sender<ClientEvent>,
    inbound: mpsc::Receiver<ModelFrame>,
    cancel: CancellationToken,
}

impl ModelLeg {
    pub fn new(
        outbound: mpsc::Sender<ClientEvent>,
        inbound: mpsc::Receiver<ModelFrame>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            outbound,
            inbound,
            cancel,
        }
    }

    /// Queue an event without waiting.
    ///
    /// A full or closed queue drops the event; the caller logs and moves on.
    pub fn send(&self, event: ClientEvent) -> RealtimeResult<()> {
        self.outbound.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => RealtimeError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => RealtimeError::NotConnected,
        })
    }

    /// Receive the next inbound frame. `None` once the connection task is gone.
    pub async fn recv(&mut self) -> Option<ModelFrame> {
        self.inbound.recv().await
    }

    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed() && !self.cancel.is_cancelled()
    }

    /// Close the connection. Pending outbound events are discarded.
    pub fn close(self) {
        self.cancel.cancel();
    }
}

impl Drop for ModelLeg {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// =============================================================================
// Connector Trait
// =============================================================================

/// Opens model legs. One connector is shared by every session.
#[async_trait]
pub trait ModelConnector: Send + Sync {
    /// Open a new model leg.
    async fn connect(&self) -> RealtimeResult<ModelLeg>;

    /// Short provider name used in logs.
    fn provider_name(&self) -> &'static str;
}

/// Shared connector trait object.
pub type SharedConnector = Arc<dyn ModelConnector>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_from_text_keeps_raw() {
        let text = r#"{"type":"input_audio_buffer.speech_started","audio_start_ms":10,"item_id":"i1"}"#;
        match ModelFrame::from_text(text) {
            ModelFrame::Event { raw, event } => {
                assert_eq!(&*raw, text);
                assert!(matches!(event, Some(ServerEvent::SpeechStarted { .. })));
            }
            _ => panic!("expected event"),
        }
    }

    #[test]
    fn test_frame_from_garbage_has_no_event() {
        match ModelFrame::from_text("not json") {
            ModelFrame::Event { event, .. } => assert!(event.is_none()),
            _ => panic!("expected event"),
        }
    }

    #[tokio::test]
    async fn test_close_cancels_and_drops_sender() {
        let (tx, mut rx) = mpsc::channel(4);
        let (_frame_tx, frame_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let leg = ModelLeg::new(tx, frame_rx, cancel.clone());

        assert!(leg.is_open());
        leg.send(ClientEvent::ResponseCreate { response: None }).unwrap();
        leg.close();

        assert!(cancel.is_cancelled());
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_send_reports_backpressure() {
        let (tx, _rx) = mpsc::channel(1);
        let (_frame_tx, frame_rx) = mpsc::channel(1);
        let leg = ModelLeg::new(tx, frame_rx, CancellationToken::new());

        leg.send(ClientEvent::InputAudioBufferClear).unwrap();
        assert!(matches!(
            leg.send(ClientEvent::InputAudioBufferClear),
            Err(RealtimeError::Backpressure)
        ));
    }
}
