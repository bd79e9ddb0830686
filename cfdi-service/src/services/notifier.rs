//! HTTP client for the notification service.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Serialize;
use std::time::Duration;
use tracing::instrument;

use crate::config::NotificationsConfig;
use crate::notifications::{Notification, Notifier, NotifyError};

#[derive(Debug, Serialize)]
struct AttachmentPayload<'a> {
    filename: &'a str,
    content_type: &'a str,
    content_base64: String,
}

#[derive(Debug, Serialize)]
struct EmailPayload<'a> {
    template: &'a str,
    to: &'a [String],
    subject: &'a str,
    html: &'a str,
    attachments: Vec<AttachmentPayload<'a>>,
}

impl<'a> From<&'a Notification> for EmailPayload<'a> {
    fn from(notification: &'a Notification) -> Self {
        Self {
            template: notification.template,
            to: &notification.to,
            subject: &notification.subject,
            html: &notification.html,
            attachments: notification
                .attachments
                .iter()
                .map(|a| AttachmentPayload {
                    filename: &a.filename,
                    content_type: &a.content_type,
                    content_base64: general_purpose::STANDARD.encode(&a.content),
                })
                .collect(),
        }
    }
}

/// Posts rendered emails to `{base_url}/emails`. Without a base url every send
/// reports `NotConfigured`.
#[derive(Clone)]
pub struct HttpNotifier {
    client: Client,
    config: NotificationsConfig,
}

impl HttpNotifier {
    pub fn new(config: NotificationsConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    #[instrument(skip(self, notification), fields(template = notification.template, recipients = notification.to.len()))]
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let base_url = self
            .config
            .base_url
            .as_deref()
            .ok_or(NotifyError::NotConfigured)?;
        let url = format!("{}/emails", base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&EmailPayload::from(notification))
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(format!("notification service unreachable: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(status = status.as_u16(), "Notification accepted");
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(NotifyError::Delivery(format!(
                "notification service responded with status {}: {}",
                status.as_u16(),
                body
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::Attachment;
    use secrecy::Secret;

    fn notification() -> Notification {
        Notification {
            template: "invoice_issued",
            to: vec!["compras@example.com".to_string()],
            subject: "Factura A-1".to_string(),
            html: "<p>hola</p>".to_string(),
            attachments: vec![Attachment {
                filename: "uuid.xml".to_string(),
                content_type: "application/xml".to_string(),
                content: b"<cfdi/>".to_vec(),
            }],
        }
    }

    #[test]
    fn payload_carries_base64_attachments() {
        let n = notification();
        let json = serde_json::to_value(EmailPayload::from(&n)).unwrap();
        assert_eq!(json["template"], "invoice_issued");
        assert_eq!(json["attachments"][0]["content_base64"], "PGNmZGkvPg==");
        assert_eq!(json["attachments"][0]["filename"], "uuid.xml");
    }

    #[tokio::test]
    async fn missing_base_url_is_not_configured() {
        let notifier = HttpNotifier::new(NotificationsConfig {
            base_url: None,
            api_key: Secret::new(String::new()),
        })
        .unwrap();
        let err = notifier.send(&notification()).await.unwrap_err();
        assert!(matches!(err, NotifyError::NotConfigured));
    }
}
