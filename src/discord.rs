//! Operator alert channel.
//!
//! Fire-and-forget by contract: an alert that cannot be delivered is logged
//! and dropped, never surfaced to the publishing loop.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

const ALERT_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) trait AlertChannel {
    /// Best-effort delivery of one operator message with optional images.
    fn send(&self, message: &str, attachments: &[PathBuf]);
}

/// Discord webhook transport: `payload_json` plus one multipart file part
/// per attached image.
pub(crate) struct DiscordWebhook {
    client: reqwest::blocking::Client,
    url: String,
}

impl DiscordWebhook {
    pub(crate) fn new(url: String) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(ALERT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, url }
    }

    fn try_send(&self, message: &str, attachments: &[PathBuf]) -> Result<()> {
        let payload = serde_json::json!({ "content": message });
        let mut form = reqwest::blocking::multipart::Form::new()
            .text("payload_json", payload.to_string());
        for (index, path) in attachments.iter().enumerate() {
            let bytes = std::fs::read(path)?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| format!("image_{index}.jpg"));
            form = form.part(
                format!("files[{index}]"),
                reqwest::blocking::multipart::Part::bytes(bytes)
                    .file_name(name)
                    .mime_str("image/jpeg")
                    .map_err(|e| Error::Http(e.to_string()))?,
            );
        }
        let response = self.client.post(&self.url).multipart(form).send()?;
        if !response.status().is_success() {
            return Err(Error::Http(format!(
                "webhook returned HTTP {}",
                response.status().as_u16()
            )));
        }
        Ok(())
    }
}

impl AlertChannel for DiscordWebhook {
    fn send(&self, message: &str, attachments: &[PathBuf]) {
        if let Err(err) = self.try_send(message, attachments) {
            tracing::warn!(error = %err, "operator alert dropped");
        }
    }
}

/// Used when no webhook is configured.
pub(crate) struct NoopAlerts;

impl AlertChannel for NoopAlerts {
    fn send(&self, message: &str, _attachments: &[PathBuf]) {
        tracing::info!(message, "operator alert (no webhook configured)");
    }
}
