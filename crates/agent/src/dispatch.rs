use std::time::Duration;

use futures::future::join_all;

use crate::conversation::{ToolCall, ToolResult};
use crate::runtime::RunContext;
use crate::tools::{ToolError, ToolOutput, ToolRegistry, ANALYZE_ID_CARD_TOOL};

/// One requested call and what came of it.
#[derive(Clone, Debug, PartialEq)]
pub struct DispatchRecord {
    pub call: ToolCall,
    pub outcome: Result<ToolOutput, ToolError>,
}

impl DispatchRecord {
    pub fn status(&self) -> Option<&str> {
        self.outcome.as_ref().ok().and_then(ToolOutput::status)
    }

    pub fn to_result(&self) -> ToolResult {
        let (content, extracted) = match &self.outcome {
            Ok(output) => {
                let extracted = (self.call.name == ANALYZE_ID_CARD_TOOL
                    && output.status() == Some("success"))
                .then(|| output.extracted.clone())
                .flatten();
                (output.render(), extracted)
            }
            Err(error) => (format!("Error: {error}"), None),
        };
        ToolResult { tool_call_id: self.call.id.clone(), content, extracted }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ToolDispatcher {
    timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Invokes every call concurrently, each under its own timeout, and
    /// returns exactly one record per call in request order.
    pub async fn dispatch(
        &self,
        tools: &ToolRegistry,
        calls: &[ToolCall],
        context: &RunContext,
    ) -> Vec<DispatchRecord> {
        let invocations = calls.iter().map(|call| async move {
            let outcome = self.invoke(tools, call).await;
            match &outcome {
                Ok(output) => tracing::info!(
                    event_name = "agent.tool.dispatched",
                    correlation_id = %context.correlation_id(),
                    tool = %call.name,
                    tool_call_id = %call.id,
                    status = output.status().unwrap_or("n/a"),
                    "tool call completed"
                ),
                Err(error) => tracing::warn!(
                    event_name = "agent.tool.failed",
                    correlation_id = %context.correlation_id(),
                    tool = %call.name,
                    tool_call_id = %call.id,
                    error = %error,
                    "tool call failed"
                ),
            }
            DispatchRecord { call: call.clone(), outcome }
        });

        join_all(invocations).await
    }

    async fn invoke(&self, tools: &ToolRegistry, call: &ToolCall) -> Result<ToolOutput, ToolError> {
        let tool =
            tools.get(&call.name).ok_or_else(|| ToolError::NotFound { name: call.name.clone() })?;

        match tokio::time::timeout(self.timeout, tool.execute(call.arguments.clone())).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ToolError::Timeout { tool: call.name.clone(), after: self.timeout }),
        }
    }
}
