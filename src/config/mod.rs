//! Configuration module for the CallBridge gateway
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable helpers
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Startup validation; any failure is fatal
//!
//! # Example
//! ```rust,no_run
//! use callbridge_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config = ServerConfig::from_file(&PathBuf::from("config.yaml"))?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::core::audio::{RecordingFormat, RecordingSettings};
use crate::core::realtime::{ModelEndpoint, OutputAudioFormat};
use crate::core::session::RelaySettings;
use crate::utils::UrlPolicy;

mod env;
mod merge;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

/// Default consent-phase instructions.
pub const DEFAULT_CONSENT_INSTRUCTIONS: &str = "You are answering a phone call. Before \
anything else you must obtain the caller's consent for this call to be recorded and \
processed. Listen to the caller's answer to the consent question. If they clearly agree, \
call consent_affirm. If they clearly refuse, call consent_deny. If the answer is unclear, \
is a question, or is anything other than a clear yes or no, call consent_clarify and ask \
again for a simple yes or no. Do not discuss anything else until consent is given.";

/// Default service-phase instructions.
pub const DEFAULT_BASE_INSTRUCTIONS: &str = "You are a friendly and concise phone \
assistant. Keep answers short and conversational. When the caller says goodbye, call \
end_call and say a brief farewell.";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Io(String),

    #[error("{0}")]
    Yaml(String),

    #[error("Missing required configuration: {0}")]
    Missing(String),

    #[error("Invalid value for {field}: {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Which model endpoint shape to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelProvider {
    #[default]
    OpenAI,
    Azure,
}

impl ModelProvider {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Some(Self::OpenAI),
            "azure" | "azure_openai" => Some(Self::Azure),
            _ => None,
        }
    }
}

/// A webhook-backed service tool.
#[derive(Debug, Clone)]
pub struct WebhookToolConfig {
    pub name: String,
    pub description: String,
    pub url: String,
    pub parameters: Option<serde_json::Value>,
    pub headers: HashMap<String, String>,
    pub timeout_ms: Option<u64>,
}

/// Server configuration
///
/// Contains everything needed to run the gateway:
/// - Server settings (host, port, TLS)
/// - Model leg endpoint and session defaults
/// - Consent phase, conversation and truncation tuning
/// - Local call recording
/// - Tools (timeouts, webhooks)
/// - Security settings (CORS, connection limits)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,
    pub tls: Option<TlsConfig>,

    // Model leg
    pub model_provider: ModelProvider,
    pub openai_api_key: Option<String>,
    pub azure_api_key: Option<String>,
    pub azure_endpoint: Option<String>,
    pub azure_deployment: Option<String>,
    pub azure_api_version: String,
    pub model_name: String,
    pub model_voice: String,
    pub transcription_model: String,
    pub output_audio_format: OutputAudioFormat,

    // Consent phase
    pub consent_enabled: bool,
    pub consent_prompt_audio: Option<PathBuf>,
    pub consent_denial_audio: Option<PathBuf>,
    pub consent_instructions: String,
    pub greet_after_consent: bool,

    // Conversation
    pub base_instructions: String,
    pub greeting_text: Option<String>,
    pub greeting_delay_ms: u64,
    pub end_call_grace_ms: u64,

    // Truncation thresholds
    pub truncation_min_elapsed_ms: u64,
    pub truncation_overrun_slack_ms: u64,

    // Recording
    pub recording_enabled: bool,
    pub recording_dir: PathBuf,
    pub recording_format: RecordingFormat,

    // Tools
    pub tool_timeout_ms: u64,
    pub allow_local_webhooks: bool,
    pub webhook_tools: Vec<WebhookToolConfig>,

    // Security settings
    pub cors_allowed_origins: Option<String>,
    pub max_concurrent_calls: Option<usize>,
    pub max_connections_per_ip: u32,
}

/// Implement Drop to zeroize secret fields when ServerConfig is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.openai_api_key {
            key.zeroize();
        }
        if let Some(ref mut key) = self.azure_api_key {
            key.zeroize();
        }
        for tool in &mut self.webhook_tools {
            for value in tool.headers.values_mut() {
                value.zeroize();
            }
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = merge::merge_config(None)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file, with environment variables as the base
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        // Priority: YAML > environment (.env is loaded into the environment by main)
        let yaml_config = YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Get the server address as a string
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if TLS is enabled
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// Outbound URL policy for webhook tools
    pub fn url_policy(&self) -> UrlPolicy {
        UrlPolicy {
            allow_local: self.allow_local_webhooks,
        }
    }

    /// Model endpoint for the configured provider
    pub fn model_endpoint(&self) -> Result<ModelEndpoint, ConfigError> {
        match self.model_provider {
            ModelProvider::OpenAI => Ok(ModelEndpoint::OpenAI {
                api_key: self
                    .openai_api_key
                    .clone()
                    .ok_or_else(|| ConfigError::Missing("OPENAI_API_KEY".to_string()))?,
                model: self.model_name.clone(),
            }),
            ModelProvider::Azure => Ok(ModelEndpoint::Azure {
                api_key: self
                    .azure_api_key
                    .clone()
                    .ok_or_else(|| ConfigError::Missing("AZURE_OPENAI_API_KEY".to_string()))?,
                endpoint: self
                    .azure_endpoint
                    .clone()
                    .ok_or_else(|| ConfigError::Missing("AZURE_OPENAI_ENDPOINT".to_string()))?,
                deployment: self
                    .azure_deployment
                    .clone()
                    .ok_or_else(|| ConfigError::Missing("AZURE_OPENAI_DEPLOYMENT".to_string()))?,
                api_version: self.azure_api_version.clone(),
            }),
        }
    }

    /// Recording settings, if recording is enabled
    pub fn recording_settings(&self) -> Option<RecordingSettings> {
        self.recording_enabled.then(|| RecordingSettings {
            dir: self.recording_dir.clone(),
            format: self.recording_format,
        })
    }

    /// Per-session relay settings derived from this configuration
    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            consent_enabled: self.consent_enabled,
            consent_instructions: self.consent_instructions.clone(),
            greet_after_consent: self.greet_after_consent,
            base_instructions: self.base_instructions.clone(),
            greeting_text: self.greeting_text.clone(),
            greeting_delay: Duration::from_millis(self.greeting_delay_ms),
            end_call_grace: Duration::from_millis(self.end_call_grace_ms),
            voice: self.model_voice.clone(),
            transcription_model: self.transcription_model.clone(),
            output_audio_format: self.output_audio_format,
            truncation_min_elapsed_ms: self.truncation_min_elapsed_ms,
            truncation_overrun_slack_ms: self.truncation_overrun_slack_ms,
            tool_timeout: Duration::from_millis(self.tool_timeout_ms),
            recording: self.recording_settings(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn base_config() -> ServerConfig {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 8081,
            tls: None,
            model_provider: ModelProvider::OpenAI,
            openai_api_key: Some("sk-test".to_string()),
            azure_api_key: None,
            azure_endpoint: None,
            azure_deployment: None,
            azure_api_version: "2024-10-01-preview".to_string(),
            model_name: "gpt-4o-realtime-preview".to_string(),
            model_voice: "alloy".to_string(),
            transcription_model: "whisper-1".to_string(),
            output_audio_format: OutputAudioFormat::G711Ulaw,
            consent_enabled: false,
            consent_prompt_audio: None,
            consent_denial_audio: None,
            consent_instructions: DEFAULT_CONSENT_INSTRUCTIONS.to_string(),
            greet_after_consent: false,
            base_instructions: DEFAULT_BASE_INSTRUCTIONS.to_string(),
            greeting_text: None,
            greeting_delay_ms: 500,
            end_call_grace_ms: 4000,
            truncation_min_elapsed_ms: 100,
            truncation_overrun_slack_ms: 200,
            recording_enabled: false,
            recording_dir: PathBuf::from("recordings"),
            recording_format: RecordingFormat::Wav,
            tool_timeout_ms: 10_000,
            allow_local_webhooks: false,
            webhook_tools: Vec::new(),
            cors_allowed_origins: None,
            max_concurrent_calls: None,
            max_connections_per_ip: 100,
        }
    }

    #[test]
    fn test_address() {
        assert_eq!(base_config().address(), "0.0.0.0:8081");
    }

    #[test]
    fn test_model_endpoint_openai() {
        let endpoint = base_config().model_endpoint().unwrap();
        assert_eq!(endpoint.provider_name(), "openai");
    }

    #[test]
    fn test_model_endpoint_azure_missing_deployment() {
        let mut config = base_config();
        config.model_provider = ModelProvider::Azure;
        config.azure_api_key = Some("k".to_string());
        config.azure_endpoint = Some("https://r.openai.azure.com".to_string());

        let err = config.model_endpoint().unwrap_err();
        assert!(err.to_string().contains("AZURE_OPENAI_DEPLOYMENT"));
    }

    #[test]
    fn test_recording_settings_only_when_enabled() {
        let mut config = base_config();
        assert!(config.recording_settings().is_none());
        config.recording_enabled = true;
        config.recording_format = RecordingFormat::Ulaw;
        let settings = config.recording_settings().unwrap();
        assert_eq!(settings.format, RecordingFormat::Ulaw);
    }

    #[test]
    fn test_relay_settings_durations() {
        let settings = base_config().relay_settings();
        assert_eq!(settings.greeting_delay, Duration::from_millis(500));
        assert_eq!(settings.tool_timeout, Duration::from_secs(10));
        assert_eq!(settings.truncation_min_elapsed_ms, 100);
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!(ModelProvider::parse("Azure"), Some(ModelProvider::Azure));
        assert_eq!(ModelProvider::parse("openai"), Some(ModelProvider::OpenAI));
        assert_eq!(ModelProvider::parse("other"), None);
    }
}
