use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use super::ConfigError;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present in
/// the file override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 8081
///   tls:
///     cert_path: "/etc/callbridge/cert.pem"
///     key_path: "/etc/callbridge/key.pem"
///
/// model:
///   provider: "openai"            # or "azure"
///   api_key: "sk-..."
///   name: "gpt-4o-realtime-preview"
///   voice: "alloy"
///   transcription_model: "whisper-1"
///   output_audio_format: "g711_ulaw"
///   azure:
///     endpoint: "https://my-resource.openai.azure.com"
///     deployment: "gpt-4o-realtime"
///     api_version: "2024-10-01-preview"
///
/// consent:
///   enabled: true
///   prompt_audio: "assets/consent_prompt.ulaw"
///   denial_audio: "assets/consent_denied.wav"
///   greet_after_consent: false
///
/// conversation:
///   instructions: "You are a friendly phone assistant."
///   greeting: "Greet the caller and ask how you can help."
///   greeting_delay_ms: 500
///   end_call_grace_ms: 4000
///
/// truncation:
///   min_elapsed_ms: 100
///   overrun_slack_ms: 200
///
/// recording:
///   enabled: true
///   dir: "recordings"
///   format: "wav"
///
/// tools:
///   timeout_ms: 10000
///   allow_local_webhooks: false
///   webhooks:
///     - name: "lookup_order"
///       description: "Look up an order by number"
///       url: "https://hooks.example.com/orders"
///       parameters:
///         type: object
///         properties:
///           order_number: { type: string }
///         required: ["order_number"]
///
/// security:
///   cors_allowed_origins: "https://example.com"
///   max_concurrent_calls: 50
///   max_connections_per_ip: 100
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub model: Option<ModelYaml>,
    pub consent: Option<ConsentYaml>,
    pub conversation: Option<ConversationYaml>,
    pub truncation: Option<TruncationYaml>,
    pub recording: Option<RecordingYaml>,
    pub tools: Option<ToolsYaml>,
    pub security: Option<SecurityYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls: Option<TlsYaml>,
}

/// TLS configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TlsYaml {
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

/// Model leg configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ModelYaml {
    /// "openai" or "azure"
    pub provider: Option<String>,
    /// API key for the selected provider
    pub api_key: Option<String>,
    pub name: Option<String>,
    pub voice: Option<String>,
    pub transcription_model: Option<String>,
    /// "g711_ulaw" or "pcm16"
    pub output_audio_format: Option<String>,
    pub azure: Option<AzureYaml>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AzureYaml {
    pub endpoint: Option<String>,
    pub deployment: Option<String>,
    pub api_version: Option<String>,
}

/// Consent phase configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ConsentYaml {
    pub enabled: Option<bool>,
    pub prompt_audio: Option<String>,
    pub denial_audio: Option<String>,
    pub instructions: Option<String>,
    pub greet_after_consent: Option<bool>,
}

/// Conversation configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ConversationYaml {
    pub instructions: Option<String>,
    pub greeting: Option<String>,
    pub greeting_delay_ms: Option<u64>,
    pub end_call_grace_ms: Option<u64>,
}

/// Barge-in truncation thresholds from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TruncationYaml {
    pub min_elapsed_ms: Option<u64>,
    pub overrun_slack_ms: Option<u64>,
}

/// Local call recording configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RecordingYaml {
    pub enabled: Option<bool>,
    pub dir: Option<String>,
    /// "wav" or "ulaw"
    pub format: Option<String>,
}

/// Tool configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ToolsYaml {
    pub timeout_ms: Option<u64>,
    pub allow_local_webhooks: Option<bool>,
    pub webhooks: Vec<WebhookToolYaml>,
}

/// A webhook-backed service tool
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookToolYaml {
    pub name: String,
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Security configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    /// CORS allowed origins (comma-separated list or "*" for all)
    pub cors_allowed_origins: Option<String>,
    /// Maximum concurrent calls
    pub max_concurrent_calls: Option<usize>,
    /// Maximum connections per IP address
    pub max_connections_per_ip: Option<u32>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::Io(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        serde_yaml::from_str(&contents)
            .map_err(|e| ConfigError::Yaml(format!("Failed to parse YAML config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 9000
model:
  provider: "azure"
  api_key: "az-key"
  azure:
    endpoint: "https://res.openai.azure.com"
    deployment: "rt"
consent:
  enabled: false
tools:
  timeout_ms: 2500
  webhooks:
    - name: "lookup"
      description: "Look things up"
      url: "https://hooks.example.com/lookup"
      headers:
        Authorization: "Bearer x"
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let server = config.server.as_ref().unwrap();
        assert_eq!(server.port, Some(9000));
        let model = config.model.as_ref().unwrap();
        assert_eq!(model.provider.as_deref(), Some("azure"));
        assert_eq!(
            model.azure.as_ref().unwrap().deployment.as_deref(),
            Some("rt")
        );
        assert_eq!(config.consent.as_ref().unwrap().enabled, Some(false));

        let tools = config.tools.as_ref().unwrap();
        assert_eq!(tools.timeout_ms, Some(2500));
        assert_eq!(tools.webhooks.len(), 1);
        assert_eq!(tools.webhooks[0].headers["Authorization"], "Bearer x");
        assert!(tools.webhooks[0].parameters.is_none());
    }

    #[test]
    fn test_yaml_config_empty() {
        let config: YamlConfig = serde_yaml::from_str("").unwrap();

        assert!(config.server.is_none());
        assert!(config.model.is_none());
        assert!(config.consent.is_none());
        assert!(config.tools.is_none());
    }

    #[test]
    fn test_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, "recording:\n  enabled: true\n  format: ulaw\n").unwrap();

        let config = YamlConfig::from_file(&config_path).unwrap();
        let recording = config.recording.unwrap();
        assert_eq!(recording.enabled, Some(true));
        assert_eq!(recording.format.as_deref(), Some("ulaw"));
    }

    #[test]
    fn test_from_file_not_found() {
        let result = YamlConfig::from_file(Path::new("/nonexistent/config.yaml"));
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    fn test_from_file_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.yaml");
        fs::write(&config_path, "invalid: yaml: content:").unwrap();

        let result = YamlConfig::from_file(&config_path);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse YAML")
        );
    }
}
