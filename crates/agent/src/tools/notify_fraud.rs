use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};

use idguard_core::domain::identity::IdentityFields;

use super::{identity_fields_schema, parse_arguments, Tool, ToolError, ToolOutput, NOTIFY_FRAUD_TOOL};
use crate::notify::{AlertRenderer, Notifier};

pub struct NotifyFraudTool {
    renderer: AlertRenderer,
    notifier: Arc<dyn Notifier>,
}

impl NotifyFraudTool {
    pub fn new(renderer: AlertRenderer, notifier: Arc<dyn Notifier>) -> Self {
        Self { renderer, notifier }
    }
}

#[async_trait]
impl Tool for NotifyFraudTool {
    fn name(&self) -> &'static str {
        NOTIFY_FRAUD_TOOL
    }

    fn description(&self) -> &'static str {
        "Sends a fraud alert to the fraud desk about a duplicate identity. \
         Must be called with the same identity fields that were reported as duplicate."
    }

    fn input_schema(&self) -> Value {
        identity_fields_schema()
    }

    async fn execute(&self, arguments: Map<String, Value>) -> Result<ToolOutput, ToolError> {
        let fields: IdentityFields = parse_arguments(NOTIFY_FRAUD_TOOL, arguments)?;

        let delivered = match self.renderer.render(&fields, Utc::now()) {
            Ok(alert) => self.notifier.deliver(&alert).await,
            Err(error) => Err(error),
        };

        let value = match delivered {
            Ok(receipt) => json!({
                "status": "success",
                "message": format!(
                    "Fraud notification for ID {} sent to {}.",
                    fields.identity_number, receipt.recipient
                ),
            }),
            Err(error) => {
                tracing::error!(
                    event_name = "agent.notify.failed",
                    identity_number = %fields.identity_number,
                    error = %error,
                    "fraud alert delivery failed"
                );
                json!({
                    "status": "error",
                    "message": format!("Failed to send fraud notification: {error}"),
                })
            }
        };
        Ok(ToolOutput::value(value))
    }
}
