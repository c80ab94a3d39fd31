//! Realtime model endpoint configuration.
//!
//! Two endpoint shapes are supported. They speak the same protocol and only
//! differ in URL construction and the auth header:
//!
//! - OpenAI: `wss://api.openai.com/v1/realtime?model=<model>` with a bearer token
//! - Azure OpenAI: `wss://<resource>/openai/realtime?api-version=<v>&deployment=<d>`
//!   with an `api-key` header

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// OpenAI Realtime API WebSocket endpoint.
pub const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Azure OpenAI realtime API version used when none is configured.
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-10-01-preview";

/// Default realtime model.
pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview";

/// Default voice.
pub const DEFAULT_VOICE: &str = "alloy";

/// Default input transcription model.
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

// =============================================================================
// Audio Formats
// =============================================================================

/// Audio format the model emits toward the telephony leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputAudioFormat {
    /// G.711 mu-law at 8kHz
    #[default]
    G711Ulaw,
    /// PCM 16-bit at 24kHz
    Pcm16,
}

impl OutputAudioFormat {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::G711Ulaw => "g711_ulaw",
            Self::Pcm16 => "pcm16",
        }
    }

    /// Bytes of encoded audio per millisecond of playback.
    #[inline]
    pub fn bytes_per_ms(&self) -> u64 {
        match self {
            Self::G711Ulaw => 8,
            Self::Pcm16 => 48,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "g711_ulaw" | "ulaw" | "mulaw" => Some(Self::G711Ulaw),
            "pcm16" | "pcm" => Some(Self::Pcm16),
            _ => None,
        }
    }
}

impl std::fmt::Display for OutputAudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Endpoint Shapes
// =============================================================================

/// Where and how to open a model leg.
#[derive(Clone, PartialEq, Eq)]
pub enum ModelEndpoint {
    OpenAI {
        api_key: String,
        model: String,
    },
    Azure {
        api_key: String,
        /// Resource endpoint, e.g. `https://my-resource.openai.azure.com`
        endpoint: String,
        deployment: String,
        api_version: String,
    },
}

impl ModelEndpoint {
    /// Provider name used in logs.
    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::OpenAI { .. } => "openai",
            Self::Azure { .. } => "azure",
        }
    }

    /// WebSocket URL for this endpoint.
    pub fn ws_url(&self) -> String {
        match self {
            Self::OpenAI { model, .. } => format!("{OPENAI_REALTIME_URL}?model={model}"),
            Self::Azure {
                endpoint,
                deployment,
                api_version,
                ..
            } => {
                let host = endpoint
                    .trim_end_matches('/')
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_start_matches("wss://");
                format!(
                    "wss://{host}/openai/realtime?api-version={api_version}&deployment={deployment}"
                )
            }
        }
    }

    /// Authentication header name and value.
    pub fn auth_header(&self) -> (&'static str, String) {
        match self {
            Self::OpenAI { api_key, .. } => ("Authorization", format!("Bearer {api_key}")),
            Self::Azure { api_key, .. } => ("api-key", api_key.clone()),
        }
    }
}

impl std::fmt::Debug for ModelEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAI { model, .. } => f
                .debug_struct("OpenAI")
                .field("model", model)
                .field("api_key", &"<redacted>")
                .finish(),
            Self::Azure {
                endpoint,
                deployment,
                api_version,
                ..
            } => f
                .debug_struct("Azure")
                .field("endpoint", endpoint)
                .field("deployment", deployment)
                .field("api_version", api_version)
                .field("api_key", &"<redacted>")
                .finish(),
        }
    }
}

impl Drop for ModelEndpoint {
    fn drop(&mut self) {
        match self {
            Self::OpenAI { api_key, .. } | Self::Azure { api_key, .. } => api_key.zeroize(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_url_and_header() {
        let endpoint = ModelEndpoint::OpenAI {
            api_key: "sk-test".to_string(),
            model: "gpt-4o-realtime-preview".to_string(),
        };
        assert_eq!(
            endpoint.ws_url(),
            "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview"
        );
        assert_eq!(
            endpoint.auth_header(),
            ("Authorization", "Bearer sk-test".to_string())
        );
    }

    #[test]
    fn test_azure_url_and_header() {
        let endpoint = ModelEndpoint::Azure {
            api_key: "az-key".to_string(),
            endpoint: "https://example.openai.azure.com/".to_string(),
            deployment: "rt".to_string(),
            api_version: DEFAULT_AZURE_API_VERSION.to_string(),
        };
        assert_eq!(
            endpoint.ws_url(),
            "wss://example.openai.azure.com/openai/realtime?api-version=2024-10-01-preview&deployment=rt"
        );
        assert_eq!(endpoint.auth_header(), ("api-key", "az-key".to_string()));
    }

    #[test]
    fn test_debug_redacts_key() {
        let endpoint = ModelEndpoint::OpenAI {
            api_key: "sk-secret".to_string(),
            model: "m".to_string(),
        };
        assert!(!format!("{endpoint:?}").contains("sk-secret"));
    }

    #[test]
    fn test_output_format() {
        assert_eq!(OutputAudioFormat::default().bytes_per_ms(), 8);
        assert_eq!(OutputAudioFormat::Pcm16.bytes_per_ms(), 48);
        assert_eq!(OutputAudioFormat::parse("PCM16"), Some(OutputAudioFormat::Pcm16));
        assert_eq!(OutputAudioFormat::parse("opus"), None);
    }
}
