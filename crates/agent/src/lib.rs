//! Tool-orchestration runtime for the identity fraud and chat pipelines.
//!
//! A run alternates two steps until the model answers without asking for
//! tools:
//! 1. **Decision** (`decision`) - the model sees the role prompt, the
//!    conversation so far and the workflow's tool descriptors.
//! 2. **Dispatch** (`dispatch`) - requested calls run against the workflow's
//!    `ToolRegistry`; every call gets exactly one result, in request order.
//!
//! Results are folded into `ConversationState` by a pure reducer
//! (`conversation::reduce`). Workflow policy that must not depend on the
//! model's compliance, such as notifying after a duplicate identity, lives
//! in `guardrails` and runs after each dispatch.
//!
//! # Key Types
//!
//! - `AgentRuntime` - the orchestration loop (see `runtime`)
//! - `WorkflowDefinition` - role prompt + tool set + guardrails (see `workflows`)
//! - `ModelClient` - decision and vision capability (Gemini, OpenAI, Ollama)

pub mod conversation;
pub mod decision;
pub mod dispatch;
pub mod guardrails;
pub mod llm;
pub mod notify;
pub mod runtime;
pub mod tools;
pub mod vision;
pub mod workflows;

pub use conversation::{ConversationState, Message, ToolCall};
pub use guardrails::GuardrailPolicy;
pub use llm::{clients_from_config, ModelClient, ModelClients, ModelError};
pub use runtime::{AgentRuntime, RunContext, RunError, RunOutcome, RuntimeLimits};
pub use workflows::{
    chat_workflow, fraud_entry_message, fraud_workflow, ToolDependencies, WorkflowDefinition,
    WorkflowKind,
};
