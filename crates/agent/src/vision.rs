use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use idguard_core::domain::identity::IdentityFields;

use crate::llm::{ImageInput, ModelClient, ModelError};

pub const EXTRACTION_PROMPT: &str = "Analyze the attached image of an ID card.\n\
Extract the following information precisely:\n\
1. \"identity_number\": The national identity number (e.g., NIK in Indonesia).\n\
2. \"full_name\": The full name of the person.\n\
3. \"date_of_birth\": The date of birth.\n\n\
Return the information ONLY in a valid JSON object format, like this:\n\
{\"identity_number\": \"...\", \"full_name\": \"...\", \"date_of_birth\": \"...\"}\n\
Do not include any other text or explanations.";

const REQUIRED_FIELDS: [&str; 3] = ["identity_number", "full_name", "date_of_birth"];

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("unsupported or corrupted image")]
    UnsupportedImage,
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("Failed to parse the model's response as JSON.")]
    Unparseable,
    #[error("The model did not return all the required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),
}

#[async_trait]
pub trait IdCardAnalyzer: Send + Sync {
    async fn analyze(&self, image: ImageInput) -> Result<IdentityFields, AnalysisError>;
}

/// Reads identity cards through the vision capability of a model client.
pub struct ModelIdCardAnalyzer {
    client: Arc<dyn ModelClient>,
}

impl ModelIdCardAnalyzer {
    pub fn new(client: Arc<dyn ModelClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IdCardAnalyzer for ModelIdCardAnalyzer {
    async fn analyze(&self, image: ImageInput) -> Result<IdentityFields, AnalysisError> {
        tracing::info!(
            event_name = "agent.vision.request",
            model = %self.client.model_id(),
            bytes = image.bytes.len(),
            mime_type = %image.mime_type,
            "sending identity card for extraction"
        );
        let reply = self.client.describe_image(EXTRACTION_PROMPT, &image).await?;
        parse_extraction(&reply)
    }
}

/// Detects the image type from its leading bytes.
pub fn sniff_mime_type(bytes: &[u8]) -> Option<&'static str> {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => Some("image/png"),
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some("image/webp"),
        [b'G', b'I', b'F', b'8', ..] => Some("image/gif"),
        _ => None,
    }
}

/// Parses the model reply into identity fields. The reply may be wrapped in
/// a fenced code block.
pub fn parse_extraction(reply: &str) -> Result<IdentityFields, AnalysisError> {
    let body = strip_code_fence(reply);
    let Ok(Value::Object(object)) = serde_json::from_str::<Value>(body) else {
        return Err(AnalysisError::Unparseable);
    };

    let field = |key: &str| match object.get(key) {
        Some(Value::String(text)) if !text.trim().is_empty() => Some(text.trim().to_owned()),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    };

    let missing = REQUIRED_FIELDS
        .into_iter()
        .filter(|key| field(*key).is_none())
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(AnalysisError::MissingFields(missing));
    }

    Ok(IdentityFields::new(
        field("identity_number").unwrap_or_default(),
        field("full_name").unwrap_or_default(),
        field("date_of_birth").unwrap_or_default(),
    ))
}

fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let after_open = &trimmed[start + 3..];
    let after_lang = after_open.strip_prefix("json").unwrap_or(after_open);
    match after_lang.find("```") {
        Some(end) => after_lang[..end].trim(),
        None => after_lang.trim(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::{parse_extraction, sniff_mime_type, AnalysisError, IdCardAnalyzer, ModelIdCardAnalyzer};
    use crate::llm::{AssistantTurn, DecisionRequest, ImageInput, ModelClient, ModelError};

    struct FixedReply(Result<String, ModelError>);

    #[async_trait]
    impl ModelClient for FixedReply {
        fn model_id(&self) -> String {
            "fixed".to_owned()
        }

        async fn decide(&self, _request: DecisionRequest<'_>) -> Result<AssistantTurn, ModelError> {
            Ok(AssistantTurn::default())
        }

        async fn describe_image(&self, _prompt: &str, _image: &ImageInput) -> Result<String, ModelError> {
            self.0.clone()
        }
    }

    #[test]
    fn fenced_json_reply_is_unwrapped() {
        let reply = "Here you go:\n```json\n{\"identity_number\": \"3273220107000099\", \"full_name\": \"Test User\", \"date_of_birth\": \"2001-01-01\"}\n```";

        let fields = parse_extraction(reply).expect("fields");

        assert_eq!(fields.identity_number.as_str(), "3273220107000099");
        assert_eq!(fields.full_name, "Test User");
        assert_eq!(fields.date_of_birth, "2001-01-01");
    }

    #[test]
    fn missing_fields_are_listed() {
        let error = parse_extraction(r#"{"identity_number": "1", "full_name": ""}"#).unwrap_err();
        assert_eq!(error, AnalysisError::MissingFields(vec!["full_name", "date_of_birth"]));
    }

    #[test]
    fn prose_reply_is_unparseable() {
        assert_eq!(parse_extraction("I cannot read this card."), Err(AnalysisError::Unparseable));
    }

    #[test]
    fn mime_sniffing_recognises_common_formats() {
        assert_eq!(sniff_mime_type(&[0x89, b'P', b'N', b'G', 0x0D]), Some("image/png"));
        assert_eq!(sniff_mime_type(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));
        assert_eq!(sniff_mime_type(b"RIFF\0\0\0\0WEBPVP8 "), Some("image/webp"));
        assert_eq!(sniff_mime_type(b"hello"), None);
    }

    #[tokio::test]
    async fn model_failures_surface_as_analysis_errors() {
        let analyzer = ModelIdCardAnalyzer::new(Arc::new(FixedReply(Err(ModelError::Unavailable(
            "connection refused".to_owned(),
        )))));

        let error = analyzer.analyze(ImageInput::new(vec![0xFF, 0xD8, 0xFF], "image/jpeg")).await;

        assert!(matches!(error, Err(AnalysisError::Model(ModelError::Unavailable(_)))));
    }
}
