use serde_json::{Map, Value};

use crate::conversation::{ConversationState, ToolCall};
use crate::dispatch::DispatchRecord;
use crate::tools::{DATABASE_CHECK_TOOL, NOTIFY_FRAUD_TOOL};

const IDENTITY_KEYS: [&str; 3] = ["identity_number", "full_name", "date_of_birth"];

#[derive(Clone, Debug, PartialEq)]
pub enum GuardrailDecision {
    Continue,
    InjectToolCalls { reason_code: &'static str, calls: Vec<ToolCall> },
}

/// Post-dispatch rules layered on top of a workflow's role prompt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GuardrailPolicy {
    /// A duplicate check result must be followed by a fraud notification
    /// for the same identity before the run can end.
    pub enforce_duplicate_notification: bool,
}

impl GuardrailPolicy {
    pub fn prompt_only() -> Self {
        Self { enforce_duplicate_notification: false }
    }

    pub fn duplicate_notification() -> Self {
        Self { enforce_duplicate_notification: true }
    }

    /// Evaluated after the results of `dispatched` have been folded into
    /// `state`.
    pub fn after_dispatch(
        &self,
        state: &ConversationState,
        dispatched: &[DispatchRecord],
    ) -> GuardrailDecision {
        if !self.enforce_duplicate_notification || state.has_requested(NOTIFY_FRAUD_TOOL) {
            return GuardrailDecision::Continue;
        }

        let mut seen = Vec::new();
        let calls = dispatched
            .iter()
            .filter(|record| {
                record.call.name == DATABASE_CHECK_TOOL && record.status() == Some("duplicate")
            })
            .filter_map(|record| {
                let arguments = identity_arguments(&record.call.arguments);
                let number = arguments.get("identity_number").cloned();
                if seen.contains(&number) {
                    return None;
                }
                seen.push(number);
                Some(arguments)
            })
            .enumerate()
            .map(|(index, arguments)| {
                ToolCall::new(format!("guardrail_notify_{index}"), NOTIFY_FRAUD_TOOL, arguments)
            })
            .collect::<Vec<_>>();

        if calls.is_empty() {
            GuardrailDecision::Continue
        } else {
            GuardrailDecision::InjectToolCalls { reason_code: "duplicate_requires_notification", calls }
        }
    }
}

fn identity_arguments(arguments: &Map<String, Value>) -> Map<String, Value> {
    IDENTITY_KEYS
        .iter()
        .filter_map(|key| arguments.get(*key).map(|value| ((*key).to_owned(), value.clone())))
        .collect()
}
