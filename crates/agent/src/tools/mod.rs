use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use idguard_core::domain::identity::IdentityFields;

use crate::llm::ToolDescriptor;

pub mod analyze_id_card;
pub mod database_check;
pub mod notify_fraud;
pub mod query_database;

pub use analyze_id_card::AnalyzeIdCardTool;
pub use database_check::{check_and_insert, CheckOutcome, CheckStatus, DatabaseCheckTool};
pub use notify_fraud::NotifyFraudTool;
pub use query_database::QueryDatabaseTool;

pub const ANALYZE_ID_CARD_TOOL: &str = "analyze_id_card_tool";
pub const DATABASE_CHECK_TOOL: &str = "database_check_tool";
pub const NOTIFY_FRAUD_TOOL: &str = "notify_fraud_tool";
pub const QUERY_DATABASE_TOOL: &str = "query_database_tool";

/// Failures that keep a run going: each becomes the textual result of the
/// call that caused it.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("Tool '{name}' not found.")]
    NotFound { name: String },
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },
    #[error("'{tool}' failed: {reason}")]
    Execution { tool: String, reason: String },
    #[error("'{tool}' timed out after {after:?}")]
    Timeout { tool: String, after: Duration },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("tool `{0}` registered twice")]
    DuplicateName(String),
}

/// Result value of a tool plus, for image analysis only, the fields it read.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolOutput {
    pub value: Value,
    pub extracted: Option<IdentityFields>,
}

impl ToolOutput {
    pub fn value(value: Value) -> Self {
        Self { value, extracted: None }
    }

    pub fn status(&self) -> Option<&str> {
        self.value.get("status").and_then(Value::as_str)
    }

    /// Deterministic rendering used as tool-result content. Strings pass
    /// through; everything else is compact JSON with sorted keys.
    pub fn render(&self) -> String {
        match &self.value {
            Value::String(text) => text.clone(),
            other => canonical(other).to_string(),
        }
    }
}

fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(object) => {
            let mut entries = object.iter().collect::<Vec<_>>();
            entries.sort_by(|left, right| left.0.cmp(right.0));
            Value::Object(entries.into_iter().map(|(key, item)| (key.clone(), canonical(item))).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn input_schema(&self) -> Value;

    async fn execute(&self, arguments: Map<String, Value>) -> Result<ToolOutput, ToolError>;
}

/// Decodes call arguments into the tool's typed input.
pub fn parse_arguments<T: DeserializeOwned>(
    tool: &str,
    arguments: Map<String, Value>,
) -> Result<T, ToolError> {
    serde_json::from_value(Value::Object(arguments))
        .map_err(|error| ToolError::InvalidArguments { tool: tool.to_owned(), reason: error.to_string() })
}

/// Tool set bound to one workflow. Names are resolved once here; the
/// registry is immutable afterwards.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    order: Vec<Arc<dyn Tool>>,
    by_name: HashMap<&'static str, usize>,
}

impl ToolRegistry {
    pub fn from_tools(tools: Vec<Arc<dyn Tool>>) -> Result<Self, RegistryError> {
        let mut registry = Self::default();
        for tool in tools {
            registry.register(tool)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name();
        if self.by_name.contains_key(name) {
            return Err(RegistryError::DuplicateName(name.to_owned()));
        }
        self.by_name.insert(name, self.order.len());
        self.order.push(tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.by_name.get(name).map(|index| &self.order[*index])
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.order.iter().map(|tool| tool.name()).collect()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.order
            .iter()
            .map(|tool| ToolDescriptor {
                name: tool.name().to_owned(),
                description: tool.description().to_owned(),
                input_schema: tool.input_schema(),
            })
            .collect()
    }
}

/// Input schema for the three identity fields shared by the check and
/// notify tools.
pub(crate) fn identity_fields_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "identity_number": {"type": "string", "description": "The NIK / identity number."},
            "full_name": {"type": "string", "description": "Full name as printed on the card."},
            "date_of_birth": {"type": "string", "description": "Date of birth as printed on the card."}
        },
        "required": ["identity_number", "full_name", "date_of_birth"]
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::{json, Map, Value};

    use super::{parse_arguments, RegistryError, Tool, ToolError, ToolOutput, ToolRegistry};

    struct Echo(&'static str);

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &'static str {
            self.0
        }

        fn description(&self) -> &'static str {
            "echo"
        }

        fn input_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }

        async fn execute(&self, arguments: Map<String, Value>) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::value(Value::Object(arguments)))
        }
    }

    #[test]
    fn registry_rejects_duplicate_names_and_keeps_order() {
        let duplicate = ToolRegistry::from_tools(vec![Arc::new(Echo("a")), Arc::new(Echo("a"))]);
        assert!(matches!(duplicate, Err(RegistryError::DuplicateName(name)) if name == "a"));

        let registry = ToolRegistry::from_tools(vec![Arc::new(Echo("b")), Arc::new(Echo("a"))])
            .expect("registry");
        assert_eq!(registry.names(), vec!["b", "a"]);
        assert!(registry.get("a").is_some());
        assert!(registry.get("c").is_none());
        assert_eq!(registry.descriptors()[0].name, "b");
    }

    #[test]
    fn rendering_is_deterministic_for_objects_and_plain_for_strings() {
        let object = ToolOutput::value(json!({"status": "duplicate", "message": "m"}));
        assert_eq!(object.render(), r#"{"message":"m","status":"duplicate"}"#);
        assert_eq!(object.status(), Some("duplicate"));

        assert_eq!(ToolOutput::value(json!("table")).render(), "table");
    }

    #[test]
    fn argument_decoding_reports_the_tool() {
        #[derive(Debug, Deserialize)]
        struct Input {
            #[allow(dead_code)]
            image_path: String,
        }

        let error = parse_arguments::<Input>("analyze_id_card_tool", Map::new()).unwrap_err();
        assert!(matches!(error, ToolError::InvalidArguments { ref tool, .. } if tool == "analyze_id_card_tool"));
        assert_eq!(
            ToolError::NotFound { name: "unknown_tool".to_owned() }.to_string(),
            "Tool 'unknown_tool' not found."
        );
    }
}
