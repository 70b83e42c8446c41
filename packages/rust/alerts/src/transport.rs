//! Notification transports.

use std::time::Duration;

use async_trait::async_trait;
use radar_shared::{AlertsSection, RadarError, Result, TransportKind};
use reqwest::Client;
use serde::Serialize;
use tracing::info;

/// Delivers a rendered message. Email and chat backends live behind this.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<()>;
}

/// Writes notifications to the log. Default for local runs.
#[derive(Debug, Default)]
pub struct LogTransport;

#[async_trait]
impl NotificationTransport for LogTransport {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<()> {
        info!(%recipient, %subject, body_len = body.len(), "alert");
        Ok(())
    }
}

/// POSTs notifications as JSON to a webhook.
pub struct WebhookTransport {
    client: Client,
    url: String,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    recipient: &'a str,
    subject: &'a str,
    body: &'a str,
}

impl WebhookTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RadarError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NotificationTransport for WebhookTransport {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookPayload {
                recipient,
                subject,
                body,
            })
            .send()
            .await
            .map_err(|e| RadarError::DispatchFailed(format!("webhook request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RadarError::DispatchFailed(format!(
                "webhook returned HTTP {status}"
            )));
        }
        Ok(())
    }
}

/// Build the transport selected in `[alerts]`.
pub fn transport_from_config(config: &AlertsSection) -> Result<Box<dyn NotificationTransport>> {
    match config.transport {
        TransportKind::Log => Ok(Box::new(LogTransport)),
        TransportKind::Webhook => {
            let url = config
                .webhook_url
                .as_deref()
                .filter(|u| !u.trim().is_empty())
                .ok_or_else(|| {
                    RadarError::config("alerts.transport = \"webhook\" needs alerts.webhook_url")
                })?;
            Ok(Box::new(WebhookTransport::new(
                url,
                Duration::from_secs(config.timeout_secs),
            )?))
        }
    }
}
