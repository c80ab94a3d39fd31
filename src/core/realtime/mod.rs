//! Model leg: the connection to the realtime speech model.
//!
//! - `ModelConnector` opens legs; one connector is shared by all sessions
//! - `ModelLeg` is the per-session handle (outbound event queue, inbound frames)
//! - `openai` implements the wire protocol for OpenAI and Azure endpoints

mod base;
pub mod openai;

pub use base::{
    ModelConnector, ModelFrame, ModelLeg, RealtimeError, RealtimeResult, SharedConnector,
};
pub use openai::{
    ClientEvent, ConversationItem, ModelEndpoint, OpenAIConnector, OutputAudioFormat,
    ServerEvent, SessionConfig, ToolDef,
};
