//! OpenAI-compatible realtime model leg.
//!
//! Covers both the OpenAI Realtime API and Azure OpenAI realtime
//! deployments. Audio toward the telephony leg is requested as G.711 mu-law
//! at 8kHz so frames can be forwarded without transcoding.

mod client;
pub mod config;
pub mod messages;

pub use client::OpenAIConnector;
pub use config::{
    DEFAULT_AZURE_API_VERSION, DEFAULT_MODEL, DEFAULT_TRANSCRIPTION_MODEL, DEFAULT_VOICE,
    ModelEndpoint, OPENAI_REALTIME_URL, OutputAudioFormat,
};
pub use messages::{
    ApiError, ClientEvent, ConversationItem, InputAudioTranscription, ResponseConfig,
    ServerEvent, SessionConfig, ToolDef, TurnDetection,
};
