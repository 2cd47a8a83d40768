//! Alert delivery.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use log::debug;

use super::AlertEvent;

/// Destination for alert envelopes.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn emit(&self, event: &AlertEvent) -> Result<()>;
}

/// Publishes alerts to an HTTP endpoint as JSON.
pub struct HttpAlertSink {
    client: reqwest::Client,
    url: String,
}

impl HttpAlertSink {
    pub fn new(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl AlertSink for HttpAlertSink {
    async fn emit(&self, event: &AlertEvent) -> Result<()> {
        let resp = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .with_context(|| format!("failed to post alert to {}", self.url))?;
        if !resp.status().is_success() {
            bail!("alert endpoint returned {}", resp.status());
        }
        debug!("published alert: {}", event.summary);
        Ok(())
    }
}

/// Discards alerts; used by the `-n` dry-run flag and in tests.
pub struct NoopAlertSink;

#[async_trait]
impl AlertSink for NoopAlertSink {
    async fn emit(&self, event: &AlertEvent) -> Result<()> {
        debug!("alert suppressed: {}", event.summary);
        Ok(())
    }
}
