use std::sync::Arc;
use std::time::Duration;

use crate::conversation::{ConversationState, Message};
use crate::llm::{DecisionRequest, ModelClient};
use crate::runtime::{RunContext, RunError};
use crate::workflows::WorkflowDefinition;

/// Asks the model for the next assistant turn. No retries: any capability
/// failure ends the run.
#[derive(Clone)]
pub struct DecisionStep {
    client: Arc<dyn ModelClient>,
    timeout: Duration,
}

impl DecisionStep {
    pub fn new(client: Arc<dyn ModelClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn model_id(&self) -> String {
        self.client.model_id()
    }

    pub async fn decide(
        &self,
        workflow: &WorkflowDefinition,
        state: &ConversationState,
        context: &RunContext,
    ) -> Result<Message, RunError> {
        let request = DecisionRequest {
            role_prompt: workflow.role_prompt,
            messages: &state.messages,
            tools: &workflow.descriptors,
        };

        let turn = match tokio::time::timeout(self.timeout, self.client.decide(request)).await {
            Ok(Ok(turn)) => turn,
            Ok(Err(error)) => {
                tracing::error!(
                    event_name = "agent.decision.failed",
                    correlation_id = %context.correlation_id(),
                    model = %self.client.model_id(),
                    error = %error,
                    "decision step failed"
                );
                return Err(RunError::ModelUnavailable(error));
            }
            Err(_) => {
                tracing::error!(
                    event_name = "agent.decision.timeout",
                    correlation_id = %context.correlation_id(),
                    timeout_secs = self.timeout.as_secs(),
                    "decision step timed out"
                );
                return Err(RunError::Timeout { stage: "decision", after: self.timeout });
            }
        };

        tracing::debug!(
            event_name = "agent.decision.completed",
            correlation_id = %context.correlation_id(),
            tool_calls = turn.tool_calls.len(),
            "decision step completed"
        );
        Ok(Message::assistant(turn.content, turn.tool_calls))
    }
}
