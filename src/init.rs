//! Startup composition: turns a validated [`ServerConfig`] into the shared
//! [`AppState`].
//!
//! Everything here runs once before the listener binds. Any error is a
//! configuration error and stops the process.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::{ConfigError, ServerConfig};
use crate::core::audio::{AudioAsset, AudioAssetError, ConsentAssets};
use crate::core::realtime::{ModelConnector, OpenAIConnector, SharedConnector};
use crate::core::session::{RelayContext, SessionRegistry};
use crate::core::tools::builtin::{CurrentTimeTool, EndCallTool};
use crate::core::tools::consent::consent_tools;
use crate::core::tools::webhook::WebhookTool;
use crate::core::tools::{ToolError, ToolRegistry};
use crate::state::{AppState, ConnectionLimits};

#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Tool registration failed: {0}")]
    Tool(#[from] ToolError),

    #[error("Audio asset: {0}")]
    Asset(#[from] AudioAssetError),
}

/// Register the consent tools, the built-in service tools and every
/// configured webhook.
pub fn build_tool_registry(config: &ServerConfig) -> Result<ToolRegistry, InitError> {
    let mut builder = ToolRegistry::builder();
    for (spec, tool) in consent_tools() {
        builder = builder.register(spec, tool)?;
    }
    builder = builder
        .register(EndCallTool::spec(), EndCallTool)?
        .register(CurrentTimeTool::spec(), CurrentTimeTool)?;

    for hook in &config.webhook_tools {
        let mut tool = WebhookTool::new(&hook.name, &hook.url, config.url_policy())?;
        for (key, value) in &hook.headers {
            tool = tool.with_header(key, value);
        }
        if let Some(ms) = hook.timeout_ms {
            tool = tool.with_timeout(Duration::from_millis(ms));
        }
        let spec = WebhookTool::spec(&hook.name, &hook.description, hook.parameters.clone());
        builder = builder.register(spec, tool)?;
        tracing::info!(tool = %hook.name, "Registered webhook tool");
    }

    Ok(builder.build())
}

/// Load the consent prompt and denial audio. Nothing is loaded when consent
/// handling is off.
pub fn load_consent_assets(config: &ServerConfig) -> Result<ConsentAssets, InitError> {
    if !config.consent_enabled {
        return Ok(ConsentAssets::default());
    }

    let prompt = config
        .consent_prompt_audio
        .as_deref()
        .map(AudioAsset::load)
        .transpose()?;
    let denial = config
        .consent_denial_audio
        .as_deref()
        .map(AudioAsset::load)
        .transpose()?;

    for asset in prompt.iter().chain(denial.iter()) {
        tracing::info!(
            asset = asset.name(),
            frames = asset.frame_count(),
            duration_ms = asset.duration_ms(),
            "Loaded consent audio"
        );
    }
    Ok(ConsentAssets { prompt, denial })
}

/// Build the shared state for the server.
pub fn build_app_state(config: &ServerConfig) -> Result<Arc<AppState>, InitError> {
    let tools = build_tool_registry(config)?;
    let assets = load_consent_assets(config)?;
    let connector: SharedConnector = Arc::new(OpenAIConnector::new(config.model_endpoint()?));

    tracing::info!(
        provider = connector.provider_name(),
        tools = tools.len(),
        consent = config.consent_enabled,
        recording = config.recording_enabled,
        "Gateway initialized"
    );

    let relay = RelayContext {
        settings: Arc::new(config.relay_settings()),
        registry: SessionRegistry::new(),
        tools: Arc::new(tools),
        connector,
        assets: Arc::new(assets),
    };
    let limits = ConnectionLimits {
        max_concurrent_calls: config.max_concurrent_calls,
        max_connections_per_ip: config.max_connections_per_ip,
    };
    Ok(AppState::new(relay, limits))
}
