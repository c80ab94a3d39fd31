//! Merge YAML values over environment variables over defaults.

use std::path::PathBuf;

use super::env;
use super::yaml::{
    ConsentYaml, ConversationYaml, ModelYaml, RecordingYaml, SecurityYaml, ServerYaml, ToolsYaml,
    TruncationYaml, YamlConfig,
};
use super::{
    ConfigError, DEFAULT_BASE_INSTRUCTIONS, DEFAULT_CONSENT_INSTRUCTIONS, ModelProvider,
    ServerConfig, TlsConfig, WebhookToolConfig,
};
use crate::core::audio::RecordingFormat;
use crate::core::realtime::OutputAudioFormat;
use crate::core::realtime::openai::{
    DEFAULT_AZURE_API_VERSION, DEFAULT_MODEL, DEFAULT_TRANSCRIPTION_MODEL, DEFAULT_VOICE,
};

const DEFAULT_PORT: u16 = 8081;
const DEFAULT_GREETING_DELAY_MS: u64 = 500;
const DEFAULT_END_CALL_GRACE_MS: u64 = 4000;
const DEFAULT_TRUNCATION_MIN_ELAPSED_MS: u64 = 100;
const DEFAULT_TRUNCATION_OVERRUN_SLACK_MS: u64 = 200;
const DEFAULT_TOOL_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_MAX_CONNECTIONS_PER_IP: u32 = 100;

/// Build a [`ServerConfig`] from the environment, with `yaml` values taking
/// precedence where present.
pub(super) fn merge_config(yaml: Option<YamlConfig>) -> Result<ServerConfig, ConfigError> {
    let yaml = yaml.unwrap_or_default();
    let server = yaml.server.unwrap_or_default();
    let model = yaml.model.unwrap_or_default();
    let consent = yaml.consent.unwrap_or_default();
    let conversation = yaml.conversation.unwrap_or_default();
    let truncation = yaml.truncation.unwrap_or_default();
    let recording = yaml.recording.unwrap_or_default();
    let tools = yaml.tools.unwrap_or_default();
    let security = yaml.security.unwrap_or_default();

    let (host, port, tls) = merge_server(server)?;
    let mut config = ServerConfig {
        host,
        port,
        tls,
        model_provider: ModelProvider::OpenAI,
        openai_api_key: None,
        azure_api_key: None,
        azure_endpoint: None,
        azure_deployment: None,
        azure_api_version: DEFAULT_AZURE_API_VERSION.to_string(),
        model_name: DEFAULT_MODEL.to_string(),
        model_voice: DEFAULT_VOICE.to_string(),
        transcription_model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
        output_audio_format: OutputAudioFormat::default(),
        consent_enabled: true,
        consent_prompt_audio: None,
        consent_denial_audio: None,
        consent_instructions: DEFAULT_CONSENT_INSTRUCTIONS.to_string(),
        greet_after_consent: false,
        base_instructions: DEFAULT_BASE_INSTRUCTIONS.to_string(),
        greeting_text: None,
        greeting_delay_ms: DEFAULT_GREETING_DELAY_MS,
        end_call_grace_ms: DEFAULT_END_CALL_GRACE_MS,
        truncation_min_elapsed_ms: DEFAULT_TRUNCATION_MIN_ELAPSED_MS,
        truncation_overrun_slack_ms: DEFAULT_TRUNCATION_OVERRUN_SLACK_MS,
        recording_enabled: false,
        recording_dir: PathBuf::from("recordings"),
        recording_format: RecordingFormat::default(),
        tool_timeout_ms: DEFAULT_TOOL_TIMEOUT_MS,
        allow_local_webhooks: false,
        webhook_tools: Vec::new(),
        cors_allowed_origins: None,
        max_concurrent_calls: None,
        max_connections_per_ip: DEFAULT_MAX_CONNECTIONS_PER_IP,
    };

    merge_model(&mut config, model)?;
    merge_consent(&mut config, consent)?;
    merge_conversation(&mut config, conversation)?;
    merge_truncation(&mut config, truncation)?;
    merge_recording(&mut config, recording)?;
    merge_tools(&mut config, tools)?;
    merge_security(&mut config, security)?;

    Ok(config)
}

fn merge_server(server: ServerYaml) -> Result<(String, u16, Option<TlsConfig>), ConfigError> {
    let host = server
        .host
        .or_else(|| env::var("HOST"))
        .unwrap_or_else(|| "0.0.0.0".to_string());
    let port = match server.port {
        Some(port) => port,
        None => env::parse::<u16>("PORT")?.unwrap_or(DEFAULT_PORT),
    };

    let tls_yaml = server.tls.unwrap_or_default();
    let cert = tls_yaml.cert_path.or_else(|| env::var("TLS_CERT_PATH"));
    let key = tls_yaml.key_path.or_else(|| env::var("TLS_KEY_PATH"));
    let tls = match (cert, key) {
        (Some(cert), Some(key)) => Some(TlsConfig {
            cert_path: PathBuf::from(cert),
            key_path: PathBuf::from(key),
        }),
        (None, None) => None,
        (Some(_), None) => return Err(ConfigError::Missing("TLS_KEY_PATH".to_string())),
        (None, Some(_)) => return Err(ConfigError::Missing("TLS_CERT_PATH".to_string())),
    };

    Ok((host, port, tls))
}

fn merge_model(config: &mut ServerConfig, model: ModelYaml) -> Result<(), ConfigError> {
    if let Some(raw) = model.provider.or_else(|| env::var("MODEL_PROVIDER")) {
        config.model_provider = ModelProvider::parse(&raw).ok_or_else(|| {
            ConfigError::invalid("MODEL_PROVIDER", format!("unknown provider {raw:?}"))
        })?;
    }

    // A key under `model.api_key` belongs to whichever provider is selected.
    match config.model_provider {
        ModelProvider::OpenAI => {
            config.openai_api_key = model.api_key.or_else(|| env::var("OPENAI_API_KEY"));
        }
        ModelProvider::Azure => {
            config.azure_api_key = model.api_key.or_else(|| env::var("AZURE_OPENAI_API_KEY"));
        }
    }

    let azure = model.azure.unwrap_or_default();
    config.azure_endpoint = azure.endpoint.or_else(|| env::var("AZURE_OPENAI_ENDPOINT"));
    config.azure_deployment = azure
        .deployment
        .or_else(|| env::var("AZURE_OPENAI_DEPLOYMENT"));
    if let Some(version) = azure
        .api_version
        .or_else(|| env::var("AZURE_OPENAI_API_VERSION"))
    {
        config.azure_api_version = version;
    }

    if let Some(name) = model.name.or_else(|| env::var("MODEL_NAME")) {
        config.model_name = name;
    }
    if let Some(voice) = model.voice.or_else(|| env::var("MODEL_VOICE")) {
        config.model_voice = voice;
    }
    if let Some(t) = model
        .transcription_model
        .or_else(|| env::var("TRANSCRIPTION_MODEL"))
    {
        config.transcription_model = t;
    }
    if let Some(raw) = model
        .output_audio_format
        .or_else(|| env::var("OUTPUT_AUDIO_FORMAT"))
    {
        config.output_audio_format = OutputAudioFormat::parse(&raw).ok_or_else(|| {
            ConfigError::invalid("OUTPUT_AUDIO_FORMAT", format!("unknown format {raw:?}"))
        })?;
    }

    Ok(())
}

fn merge_consent(config: &mut ServerConfig, consent: ConsentYaml) -> Result<(), ConfigError> {
    if let Some(enabled) = pick_flag(consent.enabled, "CONSENT_ENABLED")? {
        config.consent_enabled = enabled;
    }
    config.consent_prompt_audio = consent
        .prompt_audio
        .or_else(|| env::var("CONSENT_PROMPT_AUDIO"))
        .map(PathBuf::from);
    config.consent_denial_audio = consent
        .denial_audio
        .or_else(|| env::var("CONSENT_DENIAL_AUDIO"))
        .map(PathBuf::from);
    if let Some(text) = consent
        .instructions
        .or_else(|| env::var("CONSENT_INSTRUCTIONS"))
    {
        config.consent_instructions = text;
    }
    if let Some(greet) = pick_flag(consent.greet_after_consent, "GREET_AFTER_CONSENT")? {
        config.greet_after_consent = greet;
    }
    Ok(())
}

fn merge_conversation(
    config: &mut ServerConfig,
    conversation: ConversationYaml,
) -> Result<(), ConfigError> {
    if let Some(text) = conversation
        .instructions
        .or_else(|| env::var("BASE_INSTRUCTIONS"))
    {
        config.base_instructions = text;
    }
    config.greeting_text = conversation.greeting.or_else(|| env::var("GREETING_TEXT"));
    if let Some(ms) = pick_u64(conversation.greeting_delay_ms, "GREETING_DELAY_MS")? {
        config.greeting_delay_ms = ms;
    }
    if let Some(ms) = pick_u64(conversation.end_call_grace_ms, "END_CALL_GRACE_MS")? {
        config.end_call_grace_ms = ms;
    }
    Ok(())
}

fn merge_truncation(config: &mut ServerConfig, truncation: TruncationYaml) -> Result<(), ConfigError> {
    if let Some(ms) = pick_u64(truncation.min_elapsed_ms, "TRUNCATION_MIN_ELAPSED_MS")? {
        config.truncation_min_elapsed_ms = ms;
    }
    if let Some(ms) = pick_u64(truncation.overrun_slack_ms, "TRUNCATION_OVERRUN_SLACK_MS")? {
        config.truncation_overrun_slack_ms = ms;
    }
    Ok(())
}

fn merge_recording(config: &mut ServerConfig, recording: RecordingYaml) -> Result<(), ConfigError> {
    if let Some(enabled) = pick_flag(recording.enabled, "RECORDING_ENABLED")? {
        config.recording_enabled = enabled;
    }
    if let Some(dir) = recording.dir.or_else(|| env::var("RECORDING_DIR")) {
        config.recording_dir = PathBuf::from(dir);
    }
    if let Some(raw) = recording.format.or_else(|| env::var("RECORDING_FORMAT")) {
        config.recording_format = RecordingFormat::parse(&raw).ok_or_else(|| {
            ConfigError::invalid("RECORDING_FORMAT", format!("unknown format {raw:?}"))
        })?;
    }
    Ok(())
}

fn merge_tools(config: &mut ServerConfig, tools: ToolsYaml) -> Result<(), ConfigError> {
    if let Some(ms) = pick_u64(tools.timeout_ms, "TOOL_TIMEOUT_MS")? {
        config.tool_timeout_ms = ms;
    }
    if let Some(allow) = pick_flag(tools.allow_local_webhooks, "ALLOW_LOCAL_WEBHOOKS")? {
        config.allow_local_webhooks = allow;
    }
    config.webhook_tools = tools
        .webhooks
        .into_iter()
        .map(|w| WebhookToolConfig {
            name: w.name,
            description: w.description,
            url: w.url,
            parameters: w.parameters,
            headers: w.headers,
            timeout_ms: w.timeout_ms,
        })
        .collect();
    Ok(())
}

fn merge_security(config: &mut ServerConfig, security: SecurityYaml) -> Result<(), ConfigError> {
    config.cors_allowed_origins = security
        .cors_allowed_origins
        .or_else(|| env::var("CORS_ALLOWED_ORIGINS"));
    config.max_concurrent_calls = match security.max_concurrent_calls {
        Some(max) => Some(max),
        None => env::parse::<usize>("MAX_CONCURRENT_CALLS")?,
    };
    if let Some(max) = match security.max_connections_per_ip {
        Some(max) => Some(max),
        None => env::parse::<u32>("MAX_CONNECTIONS_PER_IP")?,
    } {
        config.max_connections_per_ip = max;
    }
    Ok(())
}

fn pick_flag(yaml: Option<bool>, env_name: &str) -> Result<Option<bool>, ConfigError> {
    match yaml {
        Some(v) => Ok(Some(v)),
        None => env::flag(env_name),
    }
}

fn pick_u64(yaml: Option<u64>, env_name: &str) -> Result<Option<u64>, ConfigError> {
    match yaml {
        Some(v) => Ok(Some(v)),
        None => env::parse::<u64>(env_name),
    }
}
