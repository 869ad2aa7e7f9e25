use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    classify_status, normalize_call_ids, transport_error, AssistantTurn, DecisionRequest,
    ImageInput, ModelClient, ModelError, ToolDescriptor,
};
use crate::conversation::{Message, ToolCall};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const PROVIDER: &str = "gemini";

/// Client for the `generateContent` endpoint with function declarations.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: SecretString,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(
        http: reqwest::Client,
        api_key: SecretString,
        model: impl Into<String>,
        base_url: Option<String>,
    ) -> Self {
        Self {
            http,
            api_key,
            model: model.into(),
            base_url: base_url.unwrap_or_else(|| GEMINI_BASE_URL.to_owned()),
        }
    }

    async fn generate(&self, body: &GenerateRequest) -> Result<GenerateResponse, ModelError> {
        let endpoint = format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );

        let response = self
            .http
            .post(&endpoint)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|error| transport_error(PROVIDER, error))?;

        let status = response.status();
        let text = response.text().await.map_err(|error| transport_error(PROVIDER, error))?;
        tracing::debug!(
            event_name = "agent.model.response",
            provider = PROVIDER,
            model = %self.model,
            status = status.as_u16(),
            "model responded"
        );

        if let Some(error) = classify_status(PROVIDER, status, &text) {
            return Err(error);
        }

        serde_json::from_str(&text)
            .map_err(|error| ModelError::InvalidResponse(format!("gemini parse failed: {error}")))
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    fn model_id(&self) -> String {
        format!("{PROVIDER}/{}", self.model)
    }

    async fn decide(&self, request: DecisionRequest<'_>) -> Result<AssistantTurn, ModelError> {
        let body = GenerateRequest {
            system_instruction: Some(GeminiContent {
                role: None,
                parts: vec![GeminiPart::text(request.role_prompt)],
            }),
            contents: to_contents(request.messages),
            tools: declarations(request.tools),
        };
        turn_from_response(self.generate(&body).await?)
    }

    async fn describe_image(&self, prompt: &str, image: &ImageInput) -> Result<String, ModelError> {
        let body = GenerateRequest {
            system_instruction: None,
            contents: vec![GeminiContent {
                role: Some("user".to_owned()),
                parts: vec![
                    GeminiPart::text(prompt),
                    GeminiPart {
                        inline_data: Some(GeminiInlineData {
                            mime_type: image.mime_type.clone(),
                            data: image.base64(),
                        }),
                        ..GeminiPart::default()
                    },
                ],
            }],
            tools: Vec::new(),
        };
        let turn = turn_from_response(self.generate(&body).await?)?;
        Ok(turn.content)
    }
}

fn declarations(tools: &[ToolDescriptor]) -> Vec<GeminiTool> {
    if tools.is_empty() {
        return Vec::new();
    }
    vec![GeminiTool {
        function_declarations: tools
            .iter()
            .map(|tool| GeminiFunctionDeclaration {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.takes_arguments().then(|| tool.input_schema.clone()),
            })
            .collect(),
    }]
}

/// Converts the run log into Gemini contents. Consecutive tool results are
/// grouped into one turn, matching how the model issued them.
fn to_contents(messages: &[Message]) -> Vec<GeminiContent> {
    let mut contents: Vec<GeminiContent> = Vec::new();
    let mut names = std::collections::HashMap::new();

    for message in messages {
        match message {
            Message::User { content } => contents.push(GeminiContent {
                role: Some("user".to_owned()),
                parts: vec![GeminiPart::text(content)],
            }),
            Message::Assistant { content, tool_calls } => {
                let mut parts = Vec::new();
                if !content.is_empty() {
                    parts.push(GeminiPart::text(content));
                }
                for call in tool_calls {
                    names.insert(call.id.clone(), call.name.clone());
                    parts.push(GeminiPart {
                        function_call: Some(GeminiFunctionCall {
                            id: None,
                            name: call.name.clone(),
                            args: call.arguments.clone(),
                        }),
                        ..GeminiPart::default()
                    });
                }
                if parts.is_empty() {
                    parts.push(GeminiPart::text(""));
                }
                contents.push(GeminiContent { role: Some("model".to_owned()), parts });
            }
            Message::ToolResult { tool_call_id, content } => {
                let part = GeminiPart {
                    function_response: Some(GeminiFunctionResponse {
                        name: names.get(tool_call_id).cloned().unwrap_or_default(),
                        response: response_object(content),
                    }),
                    ..GeminiPart::default()
                };
                match contents.last_mut() {
                    Some(last)
                        if last.role.as_deref() == Some("user")
                            && last.parts.iter().all(|part| part.function_response.is_some()) =>
                    {
                        last.parts.push(part);
                    }
                    _ => contents.push(GeminiContent { role: Some("user".to_owned()), parts: vec![part] }),
                }
            }
        }
    }

    contents
}

fn response_object(content: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Object(object)) => object,
        _ => Map::from_iter([("content".to_owned(), Value::String(content.to_owned()))]),
    }
}

fn turn_from_response(response: GenerateResponse) -> Result<AssistantTurn, ModelError> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ModelError::InvalidResponse("gemini returned no candidates".to_owned()))?;

    let mut turn = AssistantTurn::default();
    for part in candidate.content.map(|content| content.parts).unwrap_or_default() {
        if let Some(text) = part.text {
            turn.content.push_str(&text);
        }
        if let Some(call) = part.function_call {
            turn.tool_calls.push(ToolCall::new(call.id.unwrap_or_default(), call.name, call.args));
        }
    }
    normalize_call_ids(&mut turn.tool_calls);
    Ok(turn)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GeminiTool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<GeminiFunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<GeminiFunctionResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<GeminiInlineData>,
}

impl GeminiPart {
    fn text(text: &str) -> Self {
        Self { text: Some(text.to_owned()), ..Self::default() }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    #[serde(default)]
    args: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionResponse {
    name: String,
    response: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionDeclaration {
    name: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
}
