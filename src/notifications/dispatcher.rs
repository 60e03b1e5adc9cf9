use super::models::{DeliveryStatus, DispatchSummary};
use super::{NotificationSender, NotificationStore};
use crate::alerts::Alert;
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Sends each newly raised alert exactly once and records the attempt.
///
/// Delivery is best effort: a failed send is logged and recorded as failed,
/// and never touches the alert itself.
pub struct NotificationDispatcher {
    sender: Arc<dyn NotificationSender>,
    store: Arc<dyn NotificationStore>,
}

impl NotificationDispatcher {
    pub fn new(sender: Arc<dyn NotificationSender>, store: Arc<dyn NotificationStore>) -> Self {
        Self { sender, store }
    }

    pub fn dispatch(&self, created: &[Alert], cancel: &CancellationToken) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        let channel = self.sender.channel().to_string();

        for (i, alert) in created.iter().enumerate() {
            if cancel.is_cancelled() {
                summary.skipped = created.len() - i;
                warn!(
                    "Dispatch cancelled, {} alerts left unsent on {}",
                    summary.skipped, channel
                );
                break;
            }

            let (status, error_message) = match self.sender.send(alert) {
                Ok(()) => {
                    summary.delivered += 1;
                    (DeliveryStatus::Delivered, None)
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!(
                        "Failed to deliver alert {} on {}: {:#}",
                        alert.id, channel, e
                    );
                    (DeliveryStatus::Failed, Some(format!("{:#}", e)))
                }
            };

            if let Err(e) =
                self.store
                    .record_notification(alert.id, &channel, Utc::now(), status, error_message)
            {
                error!(
                    "Failed to record {} notification for alert {}: {:#}",
                    status.as_str(),
                    alert.id,
                    e
                );
            }
        }

        if !created.is_empty() {
            info!(
                "Dispatched {} alerts on {}: {} delivered, {} failed",
                created.len() - summary.skipped,
                channel,
                summary.delivered,
                summary.failed
            );
        }
        summary
    }
}
