use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use idguard_core::config::AgentConfig;
use idguard_core::errors::ApplicationError;

use crate::conversation::{reduce, ConversationState, Message, ToolCall, ToolResult};
use crate::decision::DecisionStep;
use crate::dispatch::{DispatchRecord, ToolDispatcher};
use crate::guardrails::GuardrailDecision;
use crate::llm::{ModelClient, ModelError};
use crate::workflows::WorkflowDefinition;

/// Failures that abort a run. Tool-level problems never show up here.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RunError {
    #[error(transparent)]
    ModelUnavailable(#[from] ModelError),
    #[error("run did not terminate within {max_turns} decision turns")]
    LoopLimitExceeded { max_turns: u32 },
    #[error("{stage} step timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },
}

impl From<RunError> for ApplicationError {
    fn from(error: RunError) -> Self {
        match error {
            RunError::ModelUnavailable(_) | RunError::Timeout { .. } => {
                Self::Integration(error.to_string())
            }
            RunError::LoopLimitExceeded { .. } => Self::Exhausted(error.to_string()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuntimeLimits {
    pub max_turns: u32,
    pub decision_timeout: Duration,
    pub tool_timeout: Duration,
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            max_turns: 8,
            decision_timeout: Duration::from_secs(60),
            tool_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&AgentConfig> for RuntimeLimits {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_turns: config.max_turns,
            decision_timeout: Duration::from_secs(config.decision_timeout_secs),
            tool_timeout: Duration::from_secs(config.tool_timeout_secs),
        }
    }
}

/// Identity of one pipeline run, carried into every log event it emits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunContext {
    pub run_id: Uuid,
}

impl RunContext {
    pub fn new() -> Self {
        Self { run_id: Uuid::new_v4() }
    }

    pub fn detached() -> Self {
        Self { run_id: Uuid::nil() }
    }

    pub fn correlation_id(&self) -> String {
        self.run_id.to_string()
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub state: ConversationState,
    pub turns: u32,
}

impl RunOutcome {
    pub fn final_response(&self) -> Option<&str> {
        self.state.final_response()
    }
}

enum LoopState {
    Deciding,
    Dispatching(Vec<ToolCall>),
    Terminated,
}

/// Drives a workflow: decision and dispatch strictly alternate until the
/// model answers without tool calls or the turn limit is hit.
///
/// Dropping the future returned by [`AgentRuntime::run`] cancels the run
/// between suspension points. Every tool invocation is atomic on its own,
/// so cancellation never leaves a half-applied storage write.
#[derive(Clone)]
pub struct AgentRuntime {
    decision: DecisionStep,
    dispatcher: ToolDispatcher,
    limits: RuntimeLimits,
}

impl AgentRuntime {
    pub fn new(client: Arc<dyn ModelClient>, limits: RuntimeLimits) -> Self {
        Self {
            decision: DecisionStep::new(client, limits.decision_timeout),
            dispatcher: ToolDispatcher::new(limits.tool_timeout),
            limits,
        }
    }

    pub fn limits(&self) -> RuntimeLimits {
        self.limits
    }

    pub fn model_id(&self) -> String {
        self.decision.model_id()
    }

    pub async fn run(
        &self,
        workflow: &WorkflowDefinition,
        entry_message: impl Into<String>,
    ) -> Result<RunOutcome, RunError> {
        self.run_with_context(workflow, entry_message.into(), RunContext::new()).await
    }

    pub async fn run_with_context(
        &self,
        workflow: &WorkflowDefinition,
        entry_message: String,
        context: RunContext,
    ) -> Result<RunOutcome, RunError> {
        tracing::info!(
            event_name = "agent.run.started",
            correlation_id = %context.correlation_id(),
            workflow = workflow.kind.as_str(),
            model = %self.decision.model_id(),
            max_turns = self.limits.max_turns,
            "pipeline run started"
        );

        let mut state = ConversationState::with_entry(entry_message);
        let mut turns = 0_u32;
        let mut next = LoopState::Deciding;

        loop {
            next = match next {
                LoopState::Deciding => {
                    if turns >= self.limits.max_turns {
                        tracing::warn!(
                            event_name = "agent.run.loop_limit",
                            correlation_id = %context.correlation_id(),
                            max_turns = self.limits.max_turns,
                            "pipeline run exceeded its turn limit"
                        );
                        return Err(RunError::LoopLimitExceeded { max_turns: self.limits.max_turns });
                    }
                    turns += 1;

                    state = answer_unresolved(state, &context);
                    let message = self.decision.decide(workflow, &state, &context).await?;
                    let calls = message.tool_calls().to_vec();
                    state.push(message);
                    if calls.is_empty() {
                        LoopState::Terminated
                    } else {
                        LoopState::Dispatching(calls)
                    }
                }
                LoopState::Dispatching(calls) => {
                    let records = self.dispatch_into(&mut state, workflow, &calls, &context).await;

                    if let GuardrailDecision::InjectToolCalls { reason_code, calls } =
                        workflow.guardrails.after_dispatch(&state, &records)
                    {
                        tracing::info!(
                            event_name = "agent.guardrail.injected",
                            correlation_id = %context.correlation_id(),
                            reason_code,
                            injected_calls = calls.len(),
                            "guardrail appended tool calls"
                        );
                        state.push(Message::assistant("", calls.clone()));
                        self.dispatch_into(&mut state, workflow, &calls, &context).await;
                    }
                    LoopState::Deciding
                }
                LoopState::Terminated => {
                    tracing::info!(
                        event_name = "agent.run.completed",
                        correlation_id = %context.correlation_id(),
                        workflow = workflow.kind.as_str(),
                        turns,
                        has_response = state.final_response().is_some(),
                        "pipeline run completed"
                    );
                    return Ok(RunOutcome { run_id: context.run_id, state, turns });
                }
            };
        }
    }

    async fn dispatch_into(
        &self,
        state: &mut ConversationState,
        workflow: &WorkflowDefinition,
        calls: &[ToolCall],
        context: &RunContext,
    ) -> Vec<DispatchRecord> {
        let records = self.dispatcher.dispatch(&workflow.tools, calls, context).await;
        let results = records.iter().map(DispatchRecord::to_result).collect();
        *state = reduce(std::mem::take(state), results);
        records
    }
}

pub(crate) const UNRESOLVED_CALL_RESULT: &str = "Error: no result was recorded for this tool call.";

/// Gives every still-unanswered call of the latest assistant turn an error
/// result so the log is well formed before the next decision step.
fn answer_unresolved(state: ConversationState, context: &RunContext) -> ConversationState {
    let unresolved = state.pending_calls().into_iter().map(|call| call.id.clone()).collect::<Vec<_>>();
    if unresolved.is_empty() {
        return state;
    }

    tracing::warn!(
        event_name = "agent.dispatch.unresolved_calls",
        correlation_id = %context.correlation_id(),
        unresolved = unresolved.len(),
        "closing tool calls that received no result"
    );
    let results = unresolved
        .into_iter()
        .map(|tool_call_id| ToolResult {
            tool_call_id,
            content: UNRESOLVED_CALL_RESULT.to_owned(),
            extracted: None,
        })
        .collect();
    reduce(state, results)
}
