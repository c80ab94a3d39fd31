//! Startup validation. Every error here stops the process before it binds.

use std::collections::HashSet;

use super::{ConfigError, ModelProvider, ServerConfig};
use crate::core::tools::builtin::{CURRENT_TIME, END_CALL};
use crate::core::tools::consent::{CONSENT_AFFIRM, CONSENT_CLARIFY, CONSENT_DENY};
use crate::utils::check_webhook_url;

pub(super) fn validate(config: &ServerConfig) -> Result<(), ConfigError> {
    validate_credentials(config)?;
    validate_consent_assets(config)?;
    validate_tools(config)?;
    validate_limits(config)?;
    Ok(())
}

fn validate_credentials(config: &ServerConfig) -> Result<(), ConfigError> {
    match config.model_provider {
        ModelProvider::OpenAI => {
            if config.openai_api_key.is_none() {
                return Err(ConfigError::Missing(
                    "OPENAI_API_KEY (or model.api_key) is required for the openai provider"
                        .to_string(),
                ));
            }
        }
        ModelProvider::Azure => {
            for (value, name) in [
                (&config.azure_api_key, "AZURE_OPENAI_API_KEY"),
                (&config.azure_endpoint, "AZURE_OPENAI_ENDPOINT"),
                (&config.azure_deployment, "AZURE_OPENAI_DEPLOYMENT"),
            ] {
                if value.is_none() {
                    return Err(ConfigError::Missing(format!(
                        "{name} is required for the azure provider"
                    )));
                }
            }
        }
    }
    Ok(())
}

fn validate_consent_assets(config: &ServerConfig) -> Result<(), ConfigError> {
    if !config.consent_enabled {
        return Ok(());
    }

    let denial = config.consent_denial_audio.as_ref().ok_or_else(|| {
        ConfigError::Missing(
            "CONSENT_DENIAL_AUDIO is required while consent handling is enabled".to_string(),
        )
    })?;
    if !denial.is_file() {
        return Err(ConfigError::invalid(
            "CONSENT_DENIAL_AUDIO",
            format!("{} is not a readable file", denial.display()),
        ));
    }

    if let Some(prompt) = &config.consent_prompt_audio {
        if !prompt.is_file() {
            return Err(ConfigError::invalid(
                "CONSENT_PROMPT_AUDIO",
                format!("{} is not a readable file", prompt.display()),
            ));
        }
    }
    Ok(())
}

fn validate_tools(config: &ServerConfig) -> Result<(), ConfigError> {
    if config.tool_timeout_ms == 0 {
        return Err(ConfigError::invalid("TOOL_TIMEOUT_MS", "must be greater than 0"));
    }

    let mut names: HashSet<&str> =
        [CONSENT_AFFIRM, CONSENT_DENY, CONSENT_CLARIFY, END_CALL, CURRENT_TIME]
            .into_iter()
            .collect();
    let policy = config.url_policy();

    for tool in &config.webhook_tools {
        let field = format!("tools.webhooks[{}]", tool.name);
        if tool.name.is_empty()
            || !tool
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ConfigError::invalid(
                field,
                "name must be non-empty and use only letters, digits, '_' or '-'",
            ));
        }
        if !names.insert(tool.name.as_str()) {
            return Err(ConfigError::invalid(field, "duplicate tool name"));
        }
        check_webhook_url(&tool.url, policy)
            .map_err(|e| ConfigError::invalid(field.clone(), e.to_string()))?;
        if let Some(params) = &tool.parameters {
            if !params.is_object() {
                return Err(ConfigError::invalid(field, "parameters must be a JSON schema object"));
            }
        }
    }
    Ok(())
}

fn validate_limits(config: &ServerConfig) -> Result<(), ConfigError> {
    if config.max_concurrent_calls == Some(0) {
        return Err(ConfigError::invalid("MAX_CONCURRENT_CALLS", "must be greater than 0"));
    }
    if config.max_connections_per_ip == 0 {
        return Err(ConfigError::invalid("MAX_CONNECTIONS_PER_IP", "must be greater than 0"));
    }
    Ok(())
}
