//! Consent-subset tools.
//!
//! These handlers do no work of their own. They tag the invocation with a
//! [`ConsentDecision`] and the session's phase controller decides what
//! actually happens.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{
    CapabilitySubset, ToolContext, ToolEffect, ToolError, ToolHandler, ToolOutput, ToolSpec,
};

pub const CONSENT_AFFIRM: &str = "consent_affirm";
pub const CONSENT_DENY: &str = "consent_deny";
pub const CONSENT_CLARIFY: &str = "consent_clarify";

/// Outcome requested by the model for the consent question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentDecision {
    Affirm,
    Deny,
    Clarify,
}

impl ConsentDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Affirm => "affirm",
            Self::Deny => "deny",
            Self::Clarify => "clarify",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConsentTool {
    decision: ConsentDecision,
}

impl ConsentTool {
    pub fn new(decision: ConsentDecision) -> Self {
        Self { decision }
    }
}

#[async_trait]
impl ToolHandler for ConsentTool {
    async fn invoke(
        &self,
        _args: serde_json::Value,
        ctx: ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        tracing::debug!(
            session = %ctx.session_key,
            decision = self.decision.as_str(),
            "Consent tool invoked"
        );
        Ok(
            ToolOutput::payload(json!({ "decision": self.decision.as_str() }))
                .with_effect(ToolEffect::Consent(self.decision)),
        )
    }
}

/// The three consent tools with their specs.
pub fn consent_tools() -> Vec<(ToolSpec, ConsentTool)> {
    let empty = json!({ "type": "object", "properties": {}, "required": [] });
    vec![
        (
            ToolSpec::new(
                CONSENT_AFFIRM,
                "Call only when the caller clearly and explicitly agrees to the call \
                 being recorded and processed.",
                empty.clone(),
                CapabilitySubset::Consent,
            ),
            ConsentTool::new(ConsentDecision::Affirm),
        ),
        (
            ToolSpec::new(
                CONSENT_DENY,
                "Call only when the caller clearly and explicitly refuses consent. \
                 The call will end.",
                empty,
                CapabilitySubset::Consent,
            ),
            ConsentTool::new(ConsentDecision::Deny),
        ),
        (
            ToolSpec::new(
                CONSENT_CLARIFY,
                "Call when the caller's answer is unclear, is a question, or is anything \
                 other than a clear yes or no. Then ask again for a yes or no.",
                json!({
                    "type": "object",
                    "properties": {
                        "reason": {
                            "type": "string",
                            "description": "Why the answer was not clear"
                        }
                    },
                    "required": []
                }),
                CapabilitySubset::Consent,
            ),
            ConsentTool::new(ConsentDecision::Clarify),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_consent_tool_tags_effect() {
        let output = ConsentTool::new(ConsentDecision::Deny)
            .invoke(json!({}), ToolContext::default())
            .await
            .unwrap();
        assert_eq!(
            output.effect,
            Some(ToolEffect::Consent(ConsentDecision::Deny))
        );
        assert_eq!(output.payload["decision"], "deny");
    }

    #[test]
    fn test_consent_tools_are_consent_subset() {
        let tools = consent_tools();
        assert_eq!(tools.len(), 3);
        assert!(
            tools
                .iter()
                .all(|(spec, _)| spec.subset == CapabilitySubset::Consent)
        );
    }
}
