use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use idguard_core::domain::identity::IdentityFields;

/// A structured request emitted by the decision step. `id` is unique within
/// the assistant turn that carries it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self { id: id.into(), name: name.into(), arguments }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    User { content: String },
    Assistant { content: String, tool_calls: Vec<ToolCall> },
    ToolResult { tool_call_id: String, content: String },
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::User { content: content.into() }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self::Assistant { content: content.into(), tool_calls }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::ToolResult { tool_call_id: tool_call_id.into(), content: content.into() }
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Self::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Assistant { tool_calls, .. } if tool_calls.is_empty())
    }
}

/// Outcome of one tool call as seen by the reducer. `extracted` is only ever
/// populated by a successful image analysis.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: String,
    pub extracted: Option<IdentityFields>,
}

/// Message log of a single pipeline run plus the structured side channel
/// filled from image analysis.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ConversationState {
    pub messages: Vec<Message>,
    pub extracted_data: Option<BTreeMap<String, String>>,
}

impl ConversationState {
    pub fn with_entry(content: impl Into<String>) -> Self {
        Self { messages: vec![Message::user(content)], extracted_data: None }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn has_requested(&self, tool_name: &str) -> bool {
        self.messages.iter().flat_map(Message::tool_calls).any(|call| call.name == tool_name)
    }

    /// Calls of the latest assistant turn that have not yet received a
    /// result. An empty slice means the log is well formed for the next
    /// decision step.
    pub fn pending_calls(&self) -> Vec<&ToolCall> {
        let Some(position) =
            self.messages.iter().rposition(|message| matches!(message, Message::Assistant { .. }))
        else {
            return Vec::new();
        };

        let answered = self.messages[position + 1..]
            .iter()
            .filter_map(|message| match message {
                Message::ToolResult { tool_call_id, .. } => Some(tool_call_id.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>();

        self.messages[position]
            .tool_calls()
            .iter()
            .filter(|call| !answered.contains(&call.id.as_str()))
            .collect()
    }

    pub fn final_response(&self) -> Option<&str> {
        match self.messages.last() {
            Some(Message::Assistant { content, tool_calls }) if tool_calls.is_empty() => {
                let trimmed = content.trim();
                (!trimmed.is_empty()).then_some(trimmed)
            }
            _ => None,
        }
    }
}

/// Folds one dispatch round into the conversation: results are appended in
/// the order given and the first successful extraction of the run is kept.
pub fn reduce(prior: ConversationState, results: Vec<ToolResult>) -> ConversationState {
    let ConversationState { mut messages, mut extracted_data } = prior;

    for result in results {
        if extracted_data.is_none() {
            if let Some(fields) = result.extracted {
                extracted_data = Some(extracted_map(&fields));
            }
        }
        messages.push(Message::tool_result(result.tool_call_id, result.content));
    }

    ConversationState { messages, extracted_data }
}

fn extracted_map(fields: &IdentityFields) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("identity_number".to_owned(), fields.identity_number.to_string()),
        ("full_name".to_owned(), fields.full_name.clone()),
        ("date_of_birth".to_owned(), fields.date_of_birth.clone()),
    ])
}
