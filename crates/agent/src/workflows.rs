use std::sync::Arc;

use idguard_db::IdentityRepository;

use crate::guardrails::GuardrailPolicy;
use crate::llm::ToolDescriptor;
use crate::notify::{AlertRenderer, Notifier};
use crate::tools::{
    AnalyzeIdCardTool, DatabaseCheckTool, NotifyFraudTool, QueryDatabaseTool, RegistryError,
    ToolRegistry,
};
use crate::vision::IdCardAnalyzer;

pub const FRAUD_ROLE_PROMPT: &str = "You are a specialized AI agent for an ID card-based fraud detection system. \
Your workflow is strictly defined and must be followed precisely. You must answer in Bahasa Indonesia.\n\
--- WORKFLOW ---\n\
1. **Analyze Image**: You will be given the path to an ID card image. Your first action is to call `analyze_id_card_tool`.\n\
2. **Check Database**: Take the extracted details and use `database_check_tool`.\n\
3. **Handle Outcome**:\n\
   - If the status is 'duplicate', you MUST call `notify_fraud_tool` with the same identity details.\n\
   - If the status is 'new_record_added' or 'error', your job is complete.\n\
4. **Report**: Provide a final, concise summary of the actions taken and the result.\n\
--- END OF WORKFLOW ---";

pub const CHAT_ROLE_PROMPT: &str = "You are a helpful assistant for the fraud detection system. You must answer in Bahasa Indonesia. \
Your primary job is to answer questions about the identity records stored in the database. \
When a user asks to see, list, show, or query the data, you must use the `query_database_tool`. \
For any other questions, answer them based on your general knowledge.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkflowKind {
    Fraud,
    Chat,
}

impl WorkflowKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fraud => "fraud",
            Self::Chat => "chat",
        }
    }
}

/// Role prompt, bound tool set and post-dispatch rules of one pipeline.
/// Built once at startup and shared read-only by every run.
#[derive(Clone)]
pub struct WorkflowDefinition {
    pub kind: WorkflowKind,
    pub role_prompt: &'static str,
    pub tools: ToolRegistry,
    pub descriptors: Vec<ToolDescriptor>,
    pub guardrails: GuardrailPolicy,
}

impl WorkflowDefinition {
    pub fn new(
        kind: WorkflowKind,
        role_prompt: &'static str,
        tools: ToolRegistry,
        guardrails: GuardrailPolicy,
    ) -> Self {
        let descriptors = tools.descriptors();
        Self { kind, role_prompt, tools, descriptors, guardrails }
    }
}

/// Capabilities the built-in tools are wired to.
#[derive(Clone)]
pub struct ToolDependencies {
    pub identities: Arc<dyn IdentityRepository>,
    pub analyzer: Arc<dyn IdCardAnalyzer>,
    pub notifier: Arc<dyn Notifier>,
}

pub fn fraud_workflow(
    dependencies: &ToolDependencies,
    guardrails: GuardrailPolicy,
) -> Result<WorkflowDefinition, WorkflowError> {
    let renderer = AlertRenderer::new().map_err(|error| WorkflowError::Templates(error.to_string()))?;
    let tools = ToolRegistry::from_tools(vec![
        Arc::new(AnalyzeIdCardTool::new(Arc::clone(&dependencies.analyzer))),
        Arc::new(DatabaseCheckTool::new(Arc::clone(&dependencies.identities))),
        Arc::new(NotifyFraudTool::new(renderer, Arc::clone(&dependencies.notifier))),
    ])?;
    Ok(WorkflowDefinition::new(WorkflowKind::Fraud, FRAUD_ROLE_PROMPT, tools, guardrails))
}

pub fn chat_workflow(dependencies: &ToolDependencies) -> Result<WorkflowDefinition, WorkflowError> {
    let tools = ToolRegistry::from_tools(vec![Arc::new(QueryDatabaseTool::new(Arc::clone(
        &dependencies.identities,
    )))])?;
    Ok(WorkflowDefinition::new(WorkflowKind::Chat, CHAT_ROLE_PROMPT, tools, GuardrailPolicy::prompt_only()))
}

pub fn fraud_entry_message(image_path: &str) -> String {
    format!("Analyze the ID card image located at: {image_path}")
}

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("notification templates failed to load: {0}")]
    Templates(String),
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use idguard_core::domain::identity::IdentityFields;
    use idguard_db::InMemoryIdentityRepository;

    use super::{chat_workflow, fraud_entry_message, fraud_workflow, ToolDependencies, WorkflowKind};
    use crate::guardrails::GuardrailPolicy;
    use crate::llm::ImageInput;
    use crate::notify::DisabledNotifier;
    use crate::vision::{AnalysisError, IdCardAnalyzer};

    struct NoAnalyzer;

    #[async_trait]
    impl IdCardAnalyzer for NoAnalyzer {
        async fn analyze(&self, _image: ImageInput) -> Result<IdentityFields, AnalysisError> {
            Err(AnalysisError::Unparseable)
        }
    }

    fn dependencies() -> ToolDependencies {
        ToolDependencies {
            identities: Arc::new(InMemoryIdentityRepository::default()),
            analyzer: Arc::new(NoAnalyzer),
            notifier: Arc::new(DisabledNotifier::new("tests")),
        }
    }

    #[test]
    fn fraud_workflow_binds_three_tools_in_pipeline_order() {
        let workflow =
            fraud_workflow(&dependencies(), GuardrailPolicy::duplicate_notification()).expect("fraud");

        assert_eq!(workflow.kind, WorkflowKind::Fraud);
        assert_eq!(
            workflow.tools.names(),
            vec!["analyze_id_card_tool", "database_check_tool", "notify_fraud_tool"]
        );
        assert_eq!(workflow.descriptors.len(), 3);
        assert!(workflow.role_prompt.contains("Bahasa Indonesia"));
        assert!(workflow.guardrails.enforce_duplicate_notification);
    }

    #[test]
    fn chat_workflow_only_reads() {
        let workflow = chat_workflow(&dependencies()).expect("chat");

        assert_eq!(workflow.tools.names(), vec!["query_database_tool"]);
        assert!(!workflow.guardrails.enforce_duplicate_notification);
    }

    #[test]
    fn fraud_entry_message_names_the_image_path() {
        assert_eq!(
            fraud_entry_message("uploads/abc_card.jpg"),
            "Analyze the ID card image located at: uploads/abc_card.jpg"
        );
    }
}
