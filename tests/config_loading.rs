//! Configuration loading: YAML over environment over defaults, and the
//! startup validation that rejects unusable settings.
//!
//! Tests touch process-wide environment variables, so they run serially.

use std::io::Write;
use std::path::Path;

use serial_test::serial;
use tempfile::NamedTempFile;

use callbridge_gateway::ServerConfig;
use callbridge_gateway::config::ConfigError;
use callbridge_gateway::core::audio::RecordingFormat;
use callbridge_gateway::core::realtime::OutputAudioFormat;

const CONFIG_VARS: &[&str] = &[
    "HOST",
    "PORT",
    "TLS_CERT_PATH",
    "TLS_KEY_PATH",
    "MODEL_PROVIDER",
    "OPENAI_API_KEY",
    "AZURE_OPENAI_API_KEY",
    "AZURE_OPENAI_ENDPOINT",
    "AZURE_OPENAI_DEPLOYMENT",
    "AZURE_OPENAI_API_VERSION",
    "MODEL_NAME",
    "MODEL_VOICE",
    "TRANSCRIPTION_MODEL",
    "OUTPUT_AUDIO_FORMAT",
    "CONSENT_ENABLED",
    "CONSENT_PROMPT_AUDIO",
    "CONSENT_DENIAL_AUDIO",
    "CONSENT_INSTRUCTIONS",
    "GREET_AFTER_CONSENT",
    "BASE_INSTRUCTIONS",
    "GREETING_TEXT",
    "GREETING_DELAY_MS",
    "END_CALL_GRACE_MS",
    "TRUNCATION_MIN_ELAPSED_MS",
    "TRUNCATION_OVERRUN_SLACK_MS",
    "RECORDING_ENABLED",
    "RECORDING_DIR",
    "RECORDING_FORMAT",
    "TOOL_TIMEOUT_MS",
    "ALLOW_LOCAL_WEBHOOKS",
    "CORS_ALLOWED_ORIGINS",
    "MAX_CONCURRENT_CALLS",
    "MAX_CONNECTIONS_PER_IP",
];

fn clear_env() {
    for name in CONFIG_VARS {
        unsafe {
            std::env::remove_var(name);
        }
    }
}

fn set_env(vars: &[(&str, &str)]) {
    clear_env();
    for (name, value) in vars {
        unsafe {
            std::env::set_var(name, value);
        }
    }
}

fn yaml_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn denial_audio() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&[0xFF; 800]).unwrap();
    file
}

fn load(file: &NamedTempFile) -> Result<ServerConfig, ConfigError> {
    ServerConfig::from_file(Path::new(file.path()))
}

#[test]
#[serial]
fn test_env_only_with_consent_disabled() {
    set_env(&[
        ("OPENAI_API_KEY", "sk-env"),
        ("CONSENT_ENABLED", "false"),
        ("PORT", "9100"),
        ("MODEL_VOICE", "shimmer"),
        ("OUTPUT_AUDIO_FORMAT", "pcm16"),
        ("MAX_CONCURRENT_CALLS", "25"),
    ]);

    let config = ServerConfig::from_env().unwrap();
    assert_eq!(config.address(), "0.0.0.0:9100");
    assert_eq!(config.model_voice, "shimmer");
    assert_eq!(config.output_audio_format, OutputAudioFormat::Pcm16);
    assert_eq!(config.max_concurrent_calls, Some(25));
    assert_eq!(config.max_connections_per_ip, 100);
    assert!(!config.relay_settings().consent_enabled);
    clear_env();
}

#[test]
#[serial]
fn test_yaml_overrides_environment() {
    set_env(&[
        ("OPENAI_API_KEY", "sk-env"),
        ("MODEL_VOICE", "shimmer"),
        ("PORT", "9100"),
        ("GREETING_DELAY_MS", "900"),
    ]);
    let denial = denial_audio();
    let file = yaml_file(&format!(
        r#"
model:
  voice: verse
consent:
  enabled: true
  denial_audio: "{}"
conversation:
  greeting: "Thanks for calling."
truncation:
  min_elapsed_ms: 150
recording:
  enabled: true
  format: ulaw
"#,
        denial.path().display()
    ));

    let config = load(&file).unwrap();
    assert_eq!(config.model_voice, "verse");
    // not set in YAML, so the environment wins
    assert_eq!(config.port, 9100);
    assert_eq!(config.greeting_delay_ms, 900);
    assert_eq!(config.greeting_text.as_deref(), Some("Thanks for calling."));
    assert_eq!(config.truncation_min_elapsed_ms, 150);
    assert_eq!(config.recording_format, RecordingFormat::Ulaw);

    let settings = config.relay_settings();
    assert!(settings.consent_enabled);
    assert!(settings.recording.is_some());
    assert_eq!(settings.greeting(), "Thanks for calling.");
    clear_env();
}

#[test]
#[serial]
fn test_missing_api_key_is_fatal() {
    set_env(&[("CONSENT_ENABLED", "false")]);
    let err = ServerConfig::from_env().unwrap_err();
    assert!(matches!(err, ConfigError::Missing(_)));
    assert!(err.to_string().contains("OPENAI_API_KEY"));
    clear_env();
}

#[test]
#[serial]
fn test_consent_requires_denial_audio() {
    set_env(&[("OPENAI_API_KEY", "sk-env")]);
    let err = ServerConfig::from_env().unwrap_err();
    assert!(err.to_string().contains("CONSENT_DENIAL_AUDIO"));

    set_env(&[
        ("OPENAI_API_KEY", "sk-env"),
        ("CONSENT_DENIAL_AUDIO", "/no/such/denial.ulaw"),
    ]);
    let err = ServerConfig::from_env().unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { .. }));
    clear_env();
}

#[test]
#[serial]
fn test_loopback_webhook_needs_local_policy() {
    set_env(&[("OPENAI_API_KEY", "sk-env"), ("CONSENT_ENABLED", "false")]);
    let strict = yaml_file(
        r#"
tools:
  webhooks:
    - name: lookup_order
      description: Look up an order
      url: http://127.0.0.1:9000/orders
"#,
    );
    let err = load(&strict).unwrap_err();
    assert!(err.to_string().contains("lookup_order"), "{err}");

    let local = yaml_file(
        r#"
tools:
  allow_local_webhooks: true
  timeout_ms: 2500
  webhooks:
    - name: lookup_order
      description: Look up an order
      url: http://127.0.0.1:9000/orders
      headers:
        Authorization: Bearer abc
"#,
    );
    let config = load(&local).unwrap();
    assert_eq!(config.webhook_tools.len(), 1);
    assert_eq!(config.webhook_tools[0].headers["Authorization"], "Bearer abc");
    assert_eq!(config.tool_timeout_ms, 2500);
    clear_env();
}

#[test]
#[serial]
fn test_webhook_cannot_shadow_builtin_tool() {
    set_env(&[("OPENAI_API_KEY", "sk-env"), ("CONSENT_ENABLED", "false")]);
    let file = yaml_file(
        r#"
tools:
  webhooks:
    - name: end_call
      description: Not allowed
      url: https://hooks.example.com/end
"#,
    );
    let err = load(&file).unwrap_err();
    assert!(err.to_string().contains("duplicate tool name"), "{err}");
    clear_env();
}

#[test]
#[serial]
fn test_invalid_values_are_rejected() {
    set_env(&[
        ("OPENAI_API_KEY", "sk-env"),
        ("CONSENT_ENABLED", "false"),
        ("RECORDING_FORMAT", "mp3"),
    ]);
    let err = ServerConfig::from_env().unwrap_err();
    assert!(err.to_string().contains("RECORDING_FORMAT"));

    set_env(&[
        ("OPENAI_API_KEY", "sk-env"),
        ("CONSENT_ENABLED", "false"),
        ("MAX_CONNECTIONS_PER_IP", "0"),
    ]);
    let err = ServerConfig::from_env().unwrap_err();
    assert!(err.to_string().contains("MAX_CONNECTIONS_PER_IP"));

    set_env(&[
        ("OPENAI_API_KEY", "sk-env"),
        ("CONSENT_ENABLED", "false"),
        ("TLS_CERT_PATH", "/etc/certs/cert.pem"),
    ]);
    let err = ServerConfig::from_env().unwrap_err();
    assert!(err.to_string().contains("TLS_KEY_PATH"));
    clear_env();
}

#[test]
#[serial]
fn test_azure_provider_requires_deployment() {
    set_env(&[
        ("MODEL_PROVIDER", "azure"),
        ("AZURE_OPENAI_API_KEY", "az-key"),
        ("AZURE_OPENAI_ENDPOINT", "https://res.openai.azure.com"),
        ("CONSENT_ENABLED", "false"),
    ]);
    let err = ServerConfig::from_env().unwrap_err();
    assert!(err.to_string().contains("AZURE_OPENAI_DEPLOYMENT"));

    set_env(&[
        ("MODEL_PROVIDER", "azure"),
        ("AZURE_OPENAI_API_KEY", "az-key"),
        ("AZURE_OPENAI_ENDPOINT", "https://res.openai.azure.com"),
        ("AZURE_OPENAI_DEPLOYMENT", "realtime"),
        ("CONSENT_ENABLED", "false"),
    ]);
    let config = ServerConfig::from_env().unwrap();
    assert_eq!(config.model_endpoint().unwrap().provider_name(), "azure");
    clear_env();
}
