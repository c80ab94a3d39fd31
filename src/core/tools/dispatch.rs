use std::time::Duration;

use super::{SharedHandler, ToolContext, ToolError, ToolOutput};

/// Result of one invocation, delivered back to the owning session.
#[derive(Debug)]
pub struct ToolCompletion {
    pub call_id: String,
    pub name: String,
    pub result: Result<ToolOutput, ToolError>,
}

/// Parse a function-call argument string.
///
/// Empty input is an empty object; anything that is not a JSON object is
/// rejected.
pub fn parse_arguments(raw: &str) -> Result<serde_json::Value, ToolError> {
    if raw.trim().is_empty() {
        return Ok(serde_json::Value::Object(serde_json::Map::new()));
    }
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value @ serde_json::Value::Object(_)) => Ok(value),
        Ok(other) => Err(ToolError::InvalidArguments(format!(
            "expected a JSON object, got {other}"
        ))),
        Err(e) => Err(ToolError::InvalidArguments(e.to_string())),
    }
}

/// Run a handler on its own task, bounded by `timeout`.
///
/// Timeouts and panics come back as errors; they never unwind into the caller.
pub async fn run_tool(
    handler: SharedHandler,
    args: serde_json::Value,
    ctx: ToolContext,
    timeout: Duration,
) -> Result<ToolOutput, ToolError> {
    let mut task = tokio::spawn(async move { handler.invoke(args, ctx).await });

    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => {
            if join_error.is_panic() {
                tracing::error!("Tool handler panicked");
                Err(ToolError::Panicked)
            } else {
                Err(ToolError::Failed("tool task cancelled".to_string()))
            }
        }
        Err(_) => {
            task.abort();
            Err(ToolError::Timeout(timeout.as_millis() as u64))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tools::ToolHandler;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    struct Slow;

    #[async_trait]
    impl ToolHandler for Slow {
        async fn invoke(
            &self,
            _args: serde_json::Value,
            _ctx: ToolContext,
        ) -> Result<ToolOutput, ToolError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ToolOutput::payload(json!({})))
        }
    }

    struct Panics;

    #[async_trait]
    impl ToolHandler for Panics {
        async fn invoke(
            &self,
            _args: serde_json::Value,
            _ctx: ToolContext,
        ) -> Result<ToolOutput, ToolError> {
            panic!("handler bug");
        }
    }

    struct Doubles;

    #[async_trait]
    impl ToolHandler for Doubles {
        async fn invoke(
            &self,
            args: serde_json::Value,
            _ctx: ToolContext,
        ) -> Result<ToolOutput, ToolError> {
            let n = args["n"]
                .as_i64()
                .ok_or_else(|| ToolError::InvalidArguments("n missing".to_string()))?;
            Ok(ToolOutput::payload(json!({ "result": n * 2 })))
        }
    }

    #[test]
    fn test_parse_arguments() {
        assert_eq!(parse_arguments("").unwrap(), json!({}));
        assert_eq!(parse_arguments(r#"{"a":1}"#).unwrap(), json!({"a": 1}));
        assert!(matches!(
            parse_arguments("{broken"),
            Err(ToolError::InvalidArguments(_))
        ));
        assert!(matches!(
            parse_arguments("[1,2]"),
            Err(ToolError::InvalidArguments(_))
        ));
    }

    #[tokio::test]
    async fn test_run_tool_success_and_error() {
        let ok = run_tool(
            Arc::new(Doubles),
            json!({"n": 21}),
            ToolContext::default(),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(ok.payload, json!({"result": 42}));

        let err = run_tool(
            Arc::new(Doubles),
            json!({}),
            ToolContext::default(),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_payload()["status"], "error");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_tool_timeout() {
        let err = run_tool(
            Arc::new(Slow),
            json!({}),
            ToolContext::default(),
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ToolError::Timeout(50)));
    }

    #[tokio::test]
    async fn test_run_tool_panic_is_contained() {
        let err = run_tool(
            Arc::new(Panics),
            json!({}),
            ToolContext::default(),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ToolError::Panicked));
    }
}
