//! Decision and vision capabilities backed by a hosted language model.
//!
//! The rest of the crate only sees [`ModelClient`]: given a role prompt, the
//! conversation so far and the tool descriptors of a workflow, the model
//! either answers or asks for tool calls. Provider wire formats live in the
//! submodules.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use idguard_core::config::{LlmConfig, LlmProvider};

use crate::conversation::{Message, ToolCall};

pub mod gemini;
pub mod openai;

pub use gemini::GeminiClient;
pub use openai::OpenAiCompatClient;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("model service unavailable: {0}")]
    Unavailable(String),
    #[error("invalid model response: {0}")]
    InvalidResponse(String),
    #[error("model authentication failed: {0}")]
    Auth(String),
}

/// What the model is told about one tool of the bound workflow.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDescriptor {
    pub fn takes_arguments(&self) -> bool {
        self.input_schema
            .get("properties")
            .and_then(Value::as_object)
            .is_some_and(|properties| !properties.is_empty())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DecisionRequest<'a> {
    pub role_prompt: &'a str,
    pub messages: &'a [Message],
    pub tools: &'a [ToolDescriptor],
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AssistantTurn {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageInput {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ImageInput {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self { bytes, mime_type: mime_type.into() }
    }

    pub fn base64(&self) -> String {
        use base64::Engine as _;
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    fn model_id(&self) -> String;

    async fn decide(&self, request: DecisionRequest<'_>) -> Result<AssistantTurn, ModelError>;

    async fn describe_image(&self, prompt: &str, image: &ImageInput) -> Result<String, ModelError>;
}

/// Provider clients for the two capabilities. Both may point at the same
/// model.
#[derive(Clone)]
pub struct ModelClients {
    pub decision: Arc<dyn ModelClient>,
    pub vision: Arc<dyn ModelClient>,
}

/// Builds the configured provider clients. Vision requests use
/// `llm.vision_model` when set, otherwise the decision model.
pub fn clients_from_config(config: &LlmConfig) -> Result<ModelClients, ModelError> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let http = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|error| ModelError::Unavailable(format!("http client init failed: {error}")))?;

    let build = |model: &str| -> Result<Arc<dyn ModelClient>, ModelError> {
        let client: Arc<dyn ModelClient> = match config.provider {
            LlmProvider::Gemini => Arc::new(GeminiClient::new(
                http.clone(),
                config.api_key.clone().ok_or_else(|| missing_key("gemini"))?,
                model,
                config.base_url.clone(),
            )),
            LlmProvider::OpenAi => Arc::new(OpenAiCompatClient::new(
                http.clone(),
                config.api_key.clone(),
                model,
                config.base_url.clone().unwrap_or_else(|| openai::OPENAI_BASE_URL.to_owned()),
                "openai",
            )),
            LlmProvider::Ollama => Arc::new(OpenAiCompatClient::new(
                http.clone(),
                config.api_key.clone(),
                model,
                openai::ollama_base_url(config.base_url.as_deref()),
                "ollama",
            )),
        };
        Ok(client)
    };

    Ok(ModelClients { decision: build(&config.model)?, vision: build(config.vision_model())? })
}

fn missing_key(provider: &str) -> ModelError {
    ModelError::Auth(format!("no api key configured for provider `{provider}`"))
}

/// Maps an HTTP status to the error taxonomy. Returns `None` on success.
pub(crate) fn classify_status(
    provider: &str,
    status: reqwest::StatusCode,
    body: &str,
) -> Option<ModelError> {
    if status.is_success() {
        return None;
    }
    let detail = format!("{provider} returned {status}: {}", truncate(body, 300));
    Some(match status.as_u16() {
        401 | 403 => ModelError::Auth(detail),
        408 | 429 | 500..=599 => ModelError::Unavailable(detail),
        _ => ModelError::InvalidResponse(detail),
    })
}

pub(crate) fn transport_error(provider: &str, error: reqwest::Error) -> ModelError {
    ModelError::Unavailable(format!("{provider} request failed: {error}"))
}

/// Gives every call of a turn a non-empty id that is unique within the turn.
/// Providers that omit ids get positional ones.
pub(crate) fn normalize_call_ids(calls: &mut [ToolCall]) {
    let mut seen = std::collections::HashSet::new();
    for (index, call) in calls.iter_mut().enumerate() {
        if call.id.trim().is_empty() || !seen.insert(call.id.clone()) {
            let mut candidate = format!("call_{index}");
            let mut suffix = 0;
            while seen.contains(&candidate) {
                suffix += 1;
                candidate = format!("call_{index}_{suffix}");
            }
            seen.insert(candidate.clone());
            call.id = candidate;
        }
    }
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;
    use serde_json::{json, Map};

    use super::{classify_status, normalize_call_ids, ImageInput, ModelError, ToolDescriptor};
    use crate::conversation::ToolCall;

    #[test]
    fn status_classification_separates_auth_outage_and_bad_request() {
        assert_eq!(classify_status("gemini", StatusCode::OK, ""), None);
        assert!(matches!(
            classify_status("gemini", StatusCode::UNAUTHORIZED, "nope"),
            Some(ModelError::Auth(_))
        ));
        assert!(matches!(
            classify_status("gemini", StatusCode::SERVICE_UNAVAILABLE, ""),
            Some(ModelError::Unavailable(_))
        ));
        assert!(matches!(
            classify_status("gemini", StatusCode::BAD_REQUEST, "bad schema"),
            Some(ModelError::InvalidResponse(message)) if message.contains("bad schema")
        ));
    }

    #[test]
    fn missing_and_repeated_call_ids_are_replaced() {
        let mut calls = vec![
            ToolCall::new("", "a", Map::new()),
            ToolCall::new("x", "b", Map::new()),
            ToolCall::new("x", "c", Map::new()),
        ];
        normalize_call_ids(&mut calls);

        assert_eq!(calls[0].id, "call_0");
        assert_eq!(calls[1].id, "x");
        assert_eq!(calls[2].id, "call_2");
    }

    #[test]
    fn descriptor_reports_whether_it_takes_arguments() {
        let empty = ToolDescriptor {
            name: "query_database_tool".to_owned(),
            description: String::new(),
            input_schema: json!({"type": "object", "properties": {}}),
        };
        let with_args = ToolDescriptor {
            input_schema: json!({"type": "object", "properties": {"image_path": {"type": "string"}}}),
            ..empty.clone()
        };

        assert!(!empty.takes_arguments());
        assert!(with_args.takes_arguments());
    }

    #[test]
    fn image_input_encodes_standard_base64() {
        assert_eq!(ImageInput::new(b"abc".to_vec(), "image/png").base64(), "YWJj");
    }
}
