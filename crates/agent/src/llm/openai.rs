use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::{
    classify_status, normalize_call_ids, transport_error, AssistantTurn, DecisionRequest,
    ImageInput, ModelClient, ModelError, ToolDescriptor,
};
use crate::conversation::{Message, ToolCall};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

/// Ollama serves the OpenAI wire format under `/v1`.
pub fn ollama_base_url(configured: Option<&str>) -> String {
    let base = configured.unwrap_or(OLLAMA_BASE_URL).trim_end_matches('/');
    if base.ends_with("/v1") {
        base.to_owned()
    } else {
        format!("{base}/v1")
    }
}

/// Chat-completions client shared by OpenAI and Ollama.
pub struct OpenAiCompatClient {
    http: reqwest::Client,
    api_key: Option<SecretString>,
    model: String,
    base_url: String,
    provider_name: &'static str,
}

impl OpenAiCompatClient {
    pub fn new(
        http: reqwest::Client,
        api_key: Option<SecretString>,
        model: impl Into<String>,
        base_url: String,
        provider_name: &'static str,
    ) -> Self {
        Self { http, api_key, model: model.into(), base_url, provider_name }
    }

    async fn chat(&self, body: &ChatRequest) -> Result<ResponseMessage, ModelError> {
        let endpoint = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut request = self.http.post(&endpoint).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response =
            request.send().await.map_err(|error| transport_error(self.provider_name, error))?;
        let status = response.status();
        let text =
            response.text().await.map_err(|error| transport_error(self.provider_name, error))?;
        tracing::debug!(
            event_name = "agent.model.response",
            provider = self.provider_name,
            model = %self.model,
            status = status.as_u16(),
            "model responded"
        );

        if let Some(error) = classify_status(self.provider_name, status, &text) {
            return Err(error);
        }

        let parsed: ChatResponse = serde_json::from_str(&text).map_err(|error| {
            ModelError::InvalidResponse(format!("{} parse failed: {error}", self.provider_name))
        })?;
        parsed.choices.into_iter().next().map(|choice| choice.message).ok_or_else(|| {
            ModelError::InvalidResponse(format!(
                "missing choices[0].message from {} response",
                self.provider_name
            ))
        })
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatClient {
    fn model_id(&self) -> String {
        format!("{}/{}", self.provider_name, self.model)
    }

    async fn decide(&self, request: DecisionRequest<'_>) -> Result<AssistantTurn, ModelError> {
        let tools = function_tools(request.tools);
        let body = ChatRequest {
            model: self.model.clone(),
            messages: to_chat_messages(request.role_prompt, request.messages),
            temperature: 0.0,
            tool_choice: (!tools.is_empty()).then(|| "auto".to_owned()),
            tools,
        };
        Ok(turn_from_message(self.chat(&body).await?))
    }

    async fn describe_image(&self, prompt: &str, image: &ImageInput) -> Result<String, ModelError> {
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![json!({
                "role": "user",
                "content": [
                    {"type": "text", "text": prompt},
                    {
                        "type": "image_url",
                        "image_url": {"url": format!("data:{};base64,{}", image.mime_type, image.base64())}
                    }
                ]
            })],
            temperature: 0.0,
            tool_choice: None,
            tools: Vec::new(),
        };
        Ok(self.chat(&body).await?.content.unwrap_or_default())
    }
}

fn function_tools(tools: &[ToolDescriptor]) -> Vec<FunctionTool> {
    tools
        .iter()
        .map(|tool| FunctionTool {
            type_: "function".to_owned(),
            function: FunctionSpec {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.input_schema.clone(),
            },
        })
        .collect()
}

fn to_chat_messages(role_prompt: &str, messages: &[Message]) -> Vec<Value> {
    let mut chat = Vec::with_capacity(messages.len() + 1);
    chat.push(json!({"role": "system", "content": role_prompt}));
    for message in messages {
        chat.push(match message {
            Message::User { content } => json!({"role": "user", "content": content}),
            Message::Assistant { content, tool_calls } if tool_calls.is_empty() => {
                json!({"role": "assistant", "content": content})
            }
            Message::Assistant { content, tool_calls } => json!({
                "role": "assistant",
                "content": content,
                "tool_calls": tool_calls.iter().map(|call| json!({
                    "id": call.id,
                    "type": "function",
                    "function": {
                        "name": call.name,
                        "arguments": Value::Object(call.arguments.clone()).to_string(),
                    }
                })).collect::<Vec<_>>(),
            }),
            Message::ToolResult { tool_call_id, content } => {
                json!({"role": "tool", "tool_call_id": tool_call_id, "content": content})
            }
        });
    }
    chat
}

fn turn_from_message(message: ResponseMessage) -> AssistantTurn {
    let mut tool_calls = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| {
            let arguments = parse_arguments(&call.function.name, &call.function.arguments);
            ToolCall::new(call.id.unwrap_or_default(), call.function.name, arguments)
        })
        .collect::<Vec<_>>();
    normalize_call_ids(&mut tool_calls);
    AssistantTurn { content: message.content.unwrap_or_default(), tool_calls }
}

/// Arguments arrive as a JSON string. Unparseable arguments become an empty
/// map so the tool reports them instead of aborting the run.
fn parse_arguments(tool: &str, raw: &str) -> Map<String, Value> {
    if raw.trim().is_empty() {
        return Map::new();
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(arguments)) => arguments,
        _ => {
            tracing::warn!(
                event_name = "agent.model.arguments_unparseable",
                tool,
                "tool call arguments were not a JSON object"
            );
            Map::new()
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Value>,
    temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<FunctionTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
}

#[derive(Debug, Serialize)]
struct FunctionTool {
    #[serde(rename = "type")]
    type_: String,
    function: FunctionSpec,
}

#[derive(Debug, Serialize)]
struct FunctionSpec {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    #[serde(default)]
    id: Option<String>,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map};

    use super::{ollama_base_url, to_chat_messages, turn_from_message, ResponseMessage};
    use crate::conversation::{Message, ToolCall};

    #[test]
    fn ollama_base_url_always_ends_in_v1() {
        assert_eq!(ollama_base_url(None), "http://localhost:11434/v1");
        assert_eq!(ollama_base_url(Some("http://gpu:11434/")), "http://gpu:11434/v1");
        assert_eq!(ollama_base_url(Some("http://gpu:11434/v1")), "http://gpu:11434/v1");
    }

    #[test]
    fn role_prompt_leads_and_tool_results_keep_call_ids() {
        let messages = vec![
            Message::user("Berapa banyak data?"),
            Message::assistant("", vec![ToolCall::new("q1", "query_database_tool", Map::new())]),
            Message::tool_result("q1", "table"),
        ];

        let chat = to_chat_messages("be helpful", &messages);

        assert_eq!(chat[0], json!({"role": "system", "content": "be helpful"}));
        assert_eq!(chat[2]["tool_calls"][0]["function"]["arguments"], "{}");
        assert_eq!(chat[3], json!({"role": "tool", "tool_call_id": "q1", "content": "table"}));
    }

    #[test]
    fn malformed_arguments_degrade_to_empty_map() {
        let message: ResponseMessage = serde_json::from_value(json!({
            "content": null,
            "tool_calls": [
                {"id": "a", "function": {"name": "database_check_tool", "arguments": "{not json"}},
                {"function": {"name": "query_database_tool", "arguments": ""}}
            ]
        }))
        .expect("message");

        let turn = turn_from_message(message);

        assert!(turn.tool_calls[0].arguments.is_empty());
        assert_eq!(turn.tool_calls[1].id, "call_1");
        assert_eq!(turn.content, "");
    }
}
