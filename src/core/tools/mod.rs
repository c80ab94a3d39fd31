//! Capability registry: the tools the model may invoke.
//!
//! Tools are partitioned into two subsets. The consent subset is bound while
//! a call waits for recording consent; the service subset is bound once the
//! call is active. Only one subset is ever exposed to the model at a time.
//!
//! The registry is built once at startup and shared read-only by every
//! session. Handlers return a JSON payload for the model plus an optional
//! [`ToolEffect`] the session applies to itself (phase changes, hang-up).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod builtin;
pub mod consent;
mod dispatch;
mod registry;
pub mod webhook;

pub use consent::ConsentDecision;
pub use dispatch::{ToolCompletion, parse_arguments, run_tool};
pub use registry::{RegisteredTool, ToolRegistry, ToolRegistryBuilder, ToolSchema};

/// Named group of tools exposed to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilitySubset {
    /// Tools that resolve recording consent
    Consent,
    /// Tools available during the actual conversation
    Service,
}

impl CapabilitySubset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Consent => "consent",
            Self::Service => "service",
        }
    }
}

impl std::fmt::Display for CapabilitySubset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declarative description of a tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the argument object
    pub parameters: serde_json::Value,
    pub subset: CapabilitySubset,
}

impl ToolSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
        subset: CapabilitySubset,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            subset,
        }
    }
}

/// Session-side effect requested by a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolEffect {
    /// Resolve recording consent
    Consent(ConsentDecision),
    /// Hang up after the farewell has played
    EndCall,
}

/// What a handler hands back to the session.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub payload: serde_json::Value,
    pub effect: Option<ToolEffect>,
}

impl ToolOutput {
    pub fn payload(payload: serde_json::Value) -> Self {
        Self {
            payload,
            effect: None,
        }
    }

    pub fn with_effect(mut self, effect: ToolEffect) -> Self {
        self.effect = Some(effect);
        self
    }
}

/// Per-invocation context.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub session_key: String,
    pub stream_sid: Option<String>,
    pub call_sid: Option<String>,
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool '{0}' is not available right now")]
    NotAvailable(String),

    #[error("Tool failed: {0}")]
    Failed(String),

    #[error("Tool timed out after {0}ms")]
    Timeout(u64),

    #[error("Tool panicked")]
    Panicked,

    #[error("Duplicate tool name: {0}")]
    DuplicateName(String),
}

impl ToolError {
    /// Structured payload returned to the model in place of a result.
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "status": "error",
            "error": self.to_string(),
        })
    }
}

/// Async tool implementation.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(
        &self,
        args: serde_json::Value,
        ctx: ToolContext,
    ) -> Result<ToolOutput, ToolError>;
}

/// Shared handler trait object.
pub type SharedHandler = Arc<dyn ToolHandler>;
