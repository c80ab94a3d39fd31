//! Webhook-backed service tools.
//!
//! A webhook tool POSTs the call's arguments to a configured URL and returns
//! the JSON response body to the model. URLs are checked for SSRF at startup
//! and the host is re-resolved and checked before every request.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use url::Url;

use super::{CapabilitySubset, ToolContext, ToolError, ToolHandler, ToolOutput, ToolSpec};
use crate::utils::url_validation::{UrlPolicy, check_webhook_url, resolve_public_addrs};

/// Default request timeout for webhook tools.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(8);

pub struct WebhookTool {
    name: String,
    url: Url,
    headers: HashMap<String, String>,
    timeout: Duration,
    policy: UrlPolicy,
    client: reqwest::Client,
}

impl WebhookTool {
    /// Create a webhook tool. Fails if the URL does not pass static SSRF checks.
    pub fn new(name: impl Into<String>, url: &str, policy: UrlPolicy) -> Result<Self, ToolError> {
        let url = check_webhook_url(url, policy)
            .map_err(|e| ToolError::Failed(format!("invalid webhook url: {e}")))?;
        Ok(Self {
            name: name.into(),
            url,
            headers: HashMap::new(),
            timeout: DEFAULT_TIMEOUT,
            policy,
            client: reqwest::Client::new(),
        })
    }

    /// Add a header sent with every request.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set the HTTP timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Build the tool spec for this webhook.
    pub fn spec(
        name: &str,
        description: &str,
        parameters: Option<serde_json::Value>,
    ) -> ToolSpec {
        ToolSpec::new(
            name,
            description,
            parameters
                .unwrap_or_else(|| json!({ "type": "object", "properties": {}, "required": [] })),
            CapabilitySubset::Service,
        )
    }
}

impl std::fmt::Debug for WebhookTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookTool")
            .field("name", &self.name)
            .field("url", &self.url.as_str())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ToolHandler for WebhookTool {
    async fn invoke(
        &self,
        args: serde_json::Value,
        ctx: ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        resolve_public_addrs(&self.url, self.policy)
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;

        tracing::debug!(
            tool = %self.name,
            url = %self.url,
            session = %ctx.session_key,
            "Webhook tool request"
        );

        let body = json!({
            "tool": self.name,
            "arguments": args,
            "session": ctx.session_key,
            "stream_sid": ctx.stream_sid,
            "call_sid": ctx.call_sid,
        });

        let mut request = self
            .client
            .post(self.url.clone())
            .timeout(self.timeout)
            .header("X-Session-Key", &ctx.session_key);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request.json(&body).send().await.map_err(|e| {
            tracing::warn!(tool = %self.name, error = %e, "Webhook tool request failed");
            ToolError::Failed(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(tool = %self.name, status = %status, "Webhook tool returned non-success status");
            return Err(ToolError::Failed(format!("HTTP {status}")));
        }

        let text = response
            .text()
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;
        let payload = serde_json::from_str::<serde_json::Value>(&text)
            .unwrap_or_else(|_| json!({ "result": text }));

        Ok(ToolOutput::payload(payload))
    }
}
