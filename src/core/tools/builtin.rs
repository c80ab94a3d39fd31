//! Built-in service tools.

use async_trait::async_trait;
use serde_json::json;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::{
    CapabilitySubset, ToolContext, ToolEffect, ToolError, ToolHandler, ToolOutput, ToolSpec,
};

pub const END_CALL: &str = "end_call";
pub const CURRENT_TIME: &str = "current_time";

/// Ends the call once the model has said goodbye.
#[derive(Debug, Clone, Copy, Default)]
pub struct EndCallTool;

impl EndCallTool {
    pub fn spec() -> ToolSpec {
        ToolSpec::new(
            END_CALL,
            "End the phone call. Call this after the caller says goodbye or asks to hang up, \
             then say a short farewell.",
            json!({
                "type": "object",
                "properties": {
                    "reason": { "type": "string", "description": "Why the call is ending" }
                },
                "required": []
            }),
            CapabilitySubset::Service,
        )
    }
}

#[async_trait]
impl ToolHandler for EndCallTool {
    async fn invoke(
        &self,
        args: serde_json::Value,
        ctx: ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let reason = args["reason"].as_str().unwrap_or("caller request");
        tracing::info!(session = %ctx.session_key, reason, "Model requested hang-up");
        Ok(ToolOutput::payload(json!({
            "status": "ending",
            "message": "The call will end shortly. Say a brief goodbye now.",
        }))
        .with_effect(ToolEffect::EndCall))
    }
}

/// Returns the current UTC time.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentTimeTool;

impl CurrentTimeTool {
    pub fn spec() -> ToolSpec {
        ToolSpec::new(
            CURRENT_TIME,
            "Get the current date and time in UTC.",
            json!({ "type": "object", "properties": {}, "required": [] }),
            CapabilitySubset::Service,
        )
    }
}

#[async_trait]
impl ToolHandler for CurrentTimeTool {
    async fn invoke(
        &self,
        _args: serde_json::Value,
        _ctx: ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let now = OffsetDateTime::now_utc();
        let formatted = now
            .format(&Rfc3339)
            .map_err(|e| ToolError::Failed(e.to_string()))?;
        Ok(ToolOutput::payload(json!({
            "utc": formatted,
            "weekday": now.weekday().to_string(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_end_call_requests_hangup() {
        let output = EndCallTool
            .invoke(json!({"reason": "done"}), ToolContext::default())
            .await
            .unwrap();
        assert_eq!(output.effect, Some(ToolEffect::EndCall));
        assert_eq!(output.payload["status"], "ending");
    }

    #[tokio::test]
    async fn test_current_time_is_rfc3339() {
        let output = CurrentTimeTool
            .invoke(json!({}), ToolContext::default())
            .await
            .unwrap();
        let utc = output.payload["utc"].as_str().unwrap();
        assert!(OffsetDateTime::parse(utc, &Rfc3339).is_ok());
        assert!(output.effect.is_none());
    }
}
