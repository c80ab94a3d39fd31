//! WebSocket connector for OpenAI-compatible realtime endpoints.
//!
//! Each call to [`OpenAIConnector::connect`] opens one socket and spawns a
//! connection task that:
//! - drains the outbound [`ClientEvent`] queue into the socket
//! - parses inbound text frames into [`ModelFrame`]s
//! - answers pings
//! - exits when the leg's cancellation token fires, the socket closes, or the
//!   session drops its receiver
//!
//! There is no reconnection. A closed leg stays closed; the session decides
//! what that means for the call.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use super::config::ModelEndpoint;
use super::messages::ClientEvent;
use crate::core::realtime::base::{
    ModelConnector, ModelFrame, ModelLeg, RealtimeError, RealtimeResult,
};

/// Channel capacity for outbound model events.
const WS_CHANNEL_CAPACITY: usize = 256;

/// Channel capacity for inbound model frames.
const FRAME_CHANNEL_CAPACITY: usize = 512;

/// Opens model legs against an OpenAI or Azure OpenAI realtime endpoint.
#[derive(Debug, Clone)]
pub struct OpenAIConnector {
    endpoint: ModelEndpoint,
}

impl OpenAIConnector {
    pub fn new(endpoint: ModelEndpoint) -> Self {
        Self { endpoint }
    }

    fn build_request(&self) -> RealtimeResult<http::Request<()>> {
        let url = self.endpoint.ws_url();
        let parsed =
            url::Url::parse(&url).map_err(|e| RealtimeError::InvalidConfiguration(e.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| RealtimeError::InvalidConfiguration(format!("No host in {url}")))?
            .to_string();
        let (auth_name, auth_value) = self.endpoint.auth_header();

        http::Request::builder()
            .uri(&url)
            .header(auth_name, auth_value)
            .header("OpenAI-Beta", "realtime=v1")
            .header(
                "Sec-WebSocket-Key",
                tungstenite::handshake::client::generate_key(),
            )
            .header("Sec-WebSocket-Version", "13")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Host", host)
            .body(())
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))
    }
}

#[async_trait]
impl ModelConnector for OpenAIConnector {
    async fn connect(&self) -> RealtimeResult<ModelLeg> {
        let request = self.build_request()?;

        let (ws_stream, _response) =
            tokio_tungstenite::connect_async(request)
                .await
                .map_err(|e| match e {
                    tungstenite::Error::Http(ref resp) if resp.status().as_u16() == 401 => {
                        RealtimeError::AuthenticationFailed(e.to_string())
                    }
                    other => RealtimeError::ConnectionFailed(other.to_string()),
                })?;

        tracing::info!(
            provider = self.endpoint.provider_name(),
            "Connected to realtime model"
        );

        let (mut ws_sink, mut ws_stream) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel::<ClientEvent>(WS_CHANNEL_CAPACITY);
        let (frame_tx, frame_rx) = mpsc::channel::<ModelFrame>(FRAME_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            let reason = loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => {
                        let _ = ws_sink.send(Message::Close(None)).await;
                        break None;
                    }

                    // Handle outgoing messages
                    outgoing = rx.recv() => {
                        let Some(event) = outgoing else {
                            let _ = ws_sink.send(Message::Close(None)).await;
                            break None;
                        };
                        let json = match serde_json::to_string(&event) {
                            Ok(j) => j,
                            Err(e) => {
                                tracing::error!("Failed to serialize {}: {}", event.kind(), e);
                                continue;
                            }
                        };

                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            tracing::error!("Failed to send model message: {}", e);
                            break Some(e.to_string());
                        }
                    }

                    // Handle incoming messages
                    incoming = ws_stream.next() => {
                        match incoming {
                            Some(Ok(Message::Text(text))) => {
                                let frame = ModelFrame::from_text(text.as_str());
                                if frame_tx.send(frame).await.is_err() {
                                    // Session is gone.
                                    break None;
                                }
                            }
                            Some(Ok(Message::Close(close))) => {
                                tracing::info!("Model WebSocket closed by server");
                                break close.map(|c| c.reason.as_str().to_string());
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    tracing::error!("Failed to send pong: {}", e);
                                }
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::error!("Model WebSocket error: {}", e);
                                break Some(e.to_string());
                            }
                            None => break None,
                        }
                    }
                }
            };

            let _ = frame_tx.send(ModelFrame::Closed { reason }).await;
            tracing::debug!("Model connection task finished");
        });

        Ok(ModelLeg::new(tx, frame_rx, cancel))
    }

    fn provider_name(&self) -> &'static str {
        self.endpoint.provider_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_headers_openai() {
        let connector = OpenAIConnector::new(ModelEndpoint::OpenAI {
            api_key: "sk-test".to_string(),
            model: "gpt-4o-realtime-preview".to_string(),
        });
        let request = connector.build_request().unwrap();
        assert_eq!(request.headers()["Authorization"], "Bearer sk-test");
        assert_eq!(request.headers()["Host"], "api.openai.com");
        assert_eq!(request.headers()["OpenAI-Beta"], "realtime=v1");
    }

    #[test]
    fn test_request_headers_azure() {
        let connector = OpenAIConnector::new(ModelEndpoint::Azure {
            api_key: "az".to_string(),
            endpoint: "https://res.openai.azure.com".to_string(),
            deployment: "rt".to_string(),
            api_version: "2024-10-01-preview".to_string(),
        });
        let request = connector.build_request().unwrap();
        assert_eq!(request.headers()["api-key"], "az");
        assert_eq!(request.headers()["Host"], "res.openai.azure.com");
        assert!(request.headers().get("Authorization").is_none());
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_failed() {
        let connector = OpenAIConnector::new(ModelEndpoint::Azure {
            api_key: "az".to_string(),
            endpoint: "127.0.0.1:1".to_string(),
            deployment: "rt".to_string(),
            api_version: "v".to_string(),
        });
        let result = connector.connect().await;
        assert!(matches!(result, Err(RealtimeError::ConnectionFailed(_))));
    }
}
