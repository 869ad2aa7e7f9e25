//! Fraud alert rendering and delivery.
//!
//! Alerts are rendered from the templates under `templates/notifications`
//! and handed to a [`Notifier`]. The shipped transport posts the rendered
//! alert to a webhook (a mail relay or chat integration); when no transport
//! is configured every delivery fails with [`DeliveryError::NotConfigured`].
//!
//! The plain-text body is the verbatim audit copy of the identity fields.
//! The HTML body is auto-escaped, so markup characters in a name appear as
//! entities there.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tera::{Context, Tera};
use thiserror::Error;

use idguard_core::config::NotificationConfig;
use idguard_core::domain::identity::IdentityFields;

pub const FRAUD_ALERT_SUBJECT: &str = "FRAUD ALERT: Duplicate Identity Detected";

const TEXT_TEMPLATE: &str = "fraud_alert.txt";
const HTML_TEMPLATE: &str = "fraud_alert.html";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("notification transport is not configured: {0}")]
    NotConfigured(String),
    #[error("failed to render fraud alert: {0}")]
    Render(String),
    #[error("notification transport failed: {0}")]
    Transport(String),
    #[error("notification endpoint rejected the alert with status {status}")]
    Rejected { status: u16 },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FraudAlert {
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub recipient: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, alert: &FraudAlert) -> Result<DeliveryReceipt, DeliveryError>;
}

pub struct AlertRenderer {
    tera: Tera,
}

impl AlertRenderer {
    pub fn new() -> Result<Self, DeliveryError> {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            (TEXT_TEMPLATE, include_str!("../../../templates/notifications/fraud_alert.txt")),
            (HTML_TEMPLATE, include_str!("../../../templates/notifications/fraud_alert.html")),
        ])
        .map_err(|error| DeliveryError::Render(error.to_string()))?;
        Ok(Self { tera })
    }

    pub fn render(
        &self,
        fields: &IdentityFields,
        detected_at: DateTime<Utc>,
    ) -> Result<FraudAlert, DeliveryError> {
        let mut context = Context::new();
        context.insert("subject", FRAUD_ALERT_SUBJECT);
        context.insert("identity_number", fields.identity_number.as_str());
        context.insert("full_name", &fields.full_name);
        context.insert("date_of_birth", &fields.date_of_birth);
        context.insert("detected_at", &detected_at.format("%Y-%m-%d %H:%M:%S UTC").to_string());

        let render = |name: &str| {
            self.tera.render(name, &context).map_err(|error| DeliveryError::Render(error.to_string()))
        };

        Ok(FraudAlert {
            subject: FRAUD_ALERT_SUBJECT.to_owned(),
            text_body: render(TEXT_TEMPLATE)?,
            html_body: render(HTML_TEMPLATE)?,
        })
    }
}

/// Posts alerts as JSON to a webhook that relays them to the fraud desk.
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
    token: Option<SecretString>,
    sender: String,
    recipient: String,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
    html: &'a str,
}

impl WebhookNotifier {
    pub fn new(
        url: impl Into<String>,
        token: Option<SecretString>,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DeliveryError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| DeliveryError::Transport(error.to_string()))?;
        Ok(Self { http, url: url.into(), token, sender: sender.into(), recipient: recipient.into() })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver(&self, alert: &FraudAlert) -> Result<DeliveryReceipt, DeliveryError> {
        let payload = WebhookPayload {
            from: &self.sender,
            to: &self.recipient,
            subject: &alert.subject,
            text: &alert.text_body,
            html: &alert.html_body,
        };

        let mut request = self.http.post(&self.url).json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response =
            request.send().await.map_err(|error| DeliveryError::Transport(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Rejected { status: status.as_u16() });
        }

        tracing::info!(
            event_name = "agent.notify.delivered",
            recipient = %self.recipient,
            "fraud alert delivered"
        );
        Ok(DeliveryReceipt { recipient: self.recipient.clone() })
    }
}

/// Stand-in used when notifications are disabled or incomplete.
pub struct DisabledNotifier {
    reason: String,
}

impl DisabledNotifier {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

#[async_trait]
impl Notifier for DisabledNotifier {
    async fn deliver(&self, _alert: &FraudAlert) -> Result<DeliveryReceipt, DeliveryError> {
        Err(DeliveryError::NotConfigured(self.reason.clone()))
    }
}

pub fn notifier_from_config(config: &NotificationConfig, timeout: Duration) -> Arc<dyn Notifier> {
    if !config.enabled {
        return Arc::new(DisabledNotifier::new("notification.enabled is false"));
    }
    let (Some(url), Some(recipient)) = (&config.webhook_url, &config.recipient) else {
        return Arc::new(DisabledNotifier::new(
            "notification.webhook_url and notification.recipient are required",
        ));
    };

    match WebhookNotifier::new(url, config.webhook_token.clone(), &config.sender, recipient, timeout)
    {
        Ok(notifier) => Arc::new(notifier),
        Err(error) => Arc::new(DisabledNotifier::new(error.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use idguard_core::config::AppConfig;
    use idguard_core::domain::identity::IdentityFields;

    use super::{notifier_from_config, AlertRenderer, DeliveryError, FRAUD_ALERT_SUBJECT};

    #[test]
    fn rendered_alert_carries_identity_fields_verbatim() {
        let renderer = AlertRenderer::new().expect("templates");
        let fields = IdentityFields::new("3273220107000099", "Test User", "2001-01-01");
        let detected_at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).single().expect("timestamp");

        let alert = renderer.render(&fields, detected_at).expect("render");

        assert_eq!(alert.subject, FRAUD_ALERT_SUBJECT);
        for body in [&alert.text_body, &alert.html_body] {
            assert!(body.contains("3273220107000099"));
            assert!(body.contains("Test User"));
            assert!(body.contains("2001-01-01"));
            assert!(body.contains("2026-01-02 03:04:05 UTC"));
        }
        assert!(alert.html_body.contains("<table"));
    }

    #[test]
    fn text_body_is_verbatim_while_html_body_escapes_markup() {
        let renderer = AlertRenderer::new().expect("templates");
        let fields = IdentityFields::new("3273220107000042", "Siti O'Neil & Sons", "1990-05-05");

        let alert = renderer.render(&fields, Utc::now()).expect("render");

        assert!(alert.text_body.contains("Siti O'Neil & Sons"));
        assert!(!alert.html_body.contains("Siti O'Neil & Sons"));
        assert!(alert.html_body.contains("&amp; Sons"));
    }

    #[tokio::test]
    async fn disabled_configuration_fails_delivery_with_reason() {
        let renderer = AlertRenderer::new().expect("templates");
        let alert = renderer
            .render(&IdentityFields::new("1", "A", "B"), Utc::now())
            .expect("render");
        let mut config = AppConfig::default().notification;
        config.enabled = true;
        config.recipient = Some("fraud@example.com".to_owned());

        let result = notifier_from_config(&config, Duration::from_secs(5)).deliver(&alert).await;

        assert!(matches!(result, Err(DeliveryError::NotConfigured(reason)) if reason.contains("webhook_url")));
    }
}
