use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{parse_arguments, Tool, ToolError, ToolOutput, ANALYZE_ID_CARD_TOOL};
use crate::llm::ImageInput;
use crate::vision::{sniff_mime_type, AnalysisError, IdCardAnalyzer};

#[derive(Debug, Deserialize)]
struct AnalyzeInput {
    image_path: String,
}

pub struct AnalyzeIdCardTool {
    analyzer: Arc<dyn IdCardAnalyzer>,
}

impl AnalyzeIdCardTool {
    pub fn new(analyzer: Arc<dyn IdCardAnalyzer>) -> Self {
        Self { analyzer }
    }
}

fn failure(error: impl Into<String>) -> ToolOutput {
    ToolOutput::value(json!({"status": "error", "error": error.into()}))
}

#[async_trait]
impl Tool for AnalyzeIdCardTool {
    fn name(&self) -> &'static str {
        ANALYZE_ID_CARD_TOOL
    }

    fn description(&self) -> &'static str {
        "Analyzes an ID card image to extract identity number, full name, and date of birth. \
         Returns the extracted information in a structured JSON format."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "image_path": {
                    "type": "string",
                    "description": "The file path to the ID card image to be analyzed."
                }
            },
            "required": ["image_path"]
        })
    }

    async fn execute(&self, arguments: Map<String, Value>) -> Result<ToolOutput, ToolError> {
        let input: AnalyzeInput = parse_arguments(ANALYZE_ID_CARD_TOOL, arguments)?;
        let path = Path::new(&input.image_path);

        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(failure(format!("File not found at path: {}", input.image_path)));
        }

        let bytes = tokio::fs::read(path).await.map_err(|error| ToolError::Execution {
            tool: ANALYZE_ID_CARD_TOOL.to_owned(),
            reason: format!("could not read {}: {error}", input.image_path),
        })?;
        let Some(mime_type) = sniff_mime_type(&bytes) else {
            return Ok(failure(format!("Invalid or corrupted image file: {}", input.image_path)));
        };

        match self.analyzer.analyze(ImageInput::new(bytes, mime_type)).await {
            Ok(fields) => Ok(ToolOutput {
                value: json!({
                    "status": "success",
                    "identity_number": fields.identity_number.as_str(),
                    "full_name": fields.full_name,
                    "date_of_birth": fields.date_of_birth,
                }),
                extracted: Some(fields),
            }),
            Err(AnalysisError::UnsupportedImage) => {
                Ok(failure(format!("Invalid or corrupted image file: {}", input.image_path)))
            }
            Err(error) => {
                tracing::warn!(
                    event_name = "agent.tool.analysis_failed",
                    image_path = %input.image_path,
                    error = %error,
                    "identity card analysis failed"
                );
                Ok(failure(error.to_string()))
            }
        }
    }
}
