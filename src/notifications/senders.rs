use super::NotificationSender;
use crate::alerts::{Alert, RuleType, Severity};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{info, warn};

/// JSON body posted for an alert.
#[derive(Debug, Clone, Serialize)]
pub struct AlertPayload {
    pub alert_id: i64,
    pub rule_type: RuleType,
    pub employee_id: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub severity: Severity,
    pub detected_value: f64,
    pub threshold_value: f64,
    pub detected_at: DateTime<Utc>,
}

impl From<&Alert> for AlertPayload {
    fn from(alert: &Alert) -> Self {
        Self {
            alert_id: alert.id,
            rule_type: alert.rule_type,
            employee_id: alert.employee_id.clone(),
            period_start: alert.period_start,
            period_end: alert.period_end,
            severity: alert.severity,
            detected_value: alert.detected_value,
            threshold_value: alert.threshold_value,
            detected_at: alert.detected_at,
        }
    }
}

/// Writes each alert to the log. Used when no webhook is configured.
#[derive(Debug, Default)]
pub struct LogNotificationSender;

impl NotificationSender for LogNotificationSender {
    fn channel(&self) -> &str {
        "log"
    }

    fn send(&self, alert: &Alert) -> Result<()> {
        info!(
            "ALERT [{}] {} for {} week {}..{}: detected {} (threshold {})",
            alert.severity,
            alert.rule_type,
            alert.employee_id,
            alert.period_start,
            alert.period_end,
            alert.detected_value,
            alert.threshold_value
        );
        Ok(())
    }
}

/// Posts each alert as JSON to a webhook.
///
/// Requests run on the runtime captured at construction; `send` blocks the
/// calling thread, so it must be called from a blocking worker.
pub struct WebhookNotificationSender {
    client: reqwest::Client,
    url: String,
    runtime: Handle,
}

impl WebhookNotificationSender {
    /// Must be called from within a tokio runtime.
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create webhook HTTP client")?;
        let runtime = Handle::try_current().context("Webhook sender needs a tokio runtime")?;

        Ok(Self {
            client,
            url,
            runtime,
        })
    }

    async fn post(&self, payload: &AlertPayload) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .with_context(|| format!("Failed to reach webhook {}", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Webhook {} answered {}: {}", self.url, status, body);
            bail!("Webhook responded with status {}", status);
        }
        Ok(())
    }
}

impl NotificationSender for WebhookNotificationSender {
    fn channel(&self) -> &str {
        "webhook"
    }

    fn send(&self, alert: &Alert) -> Result<()> {
        let payload = AlertPayload::from(alert);
        self.runtime.block_on(self.post(&payload))
    }
}
