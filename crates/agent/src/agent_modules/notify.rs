//! Boundary to the notification transport.
//!
//! The engine decides *when* to notify; a [`Notifier`] decides *how*. Each
//! delivery runs on its own task with a timeout so a slow channel never holds
//! up a monitor's probe loop.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lookout_common::MonitorId;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Failed to deliver notification: {0}")]
    DeliveryFailed(String),
}

/// One escalation for one monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub notify_type: u8,
    pub notify_target: String,
    pub monitor_id: MonitorId,
    pub monitor_name: String,
    pub detail: String,
    /// 1-based index of this notification within its episode.
    pub sequence: u32,
    pub consecutive_failures: u32,
    pub triggered_at: DateTime<Utc>,
}

impl Alert {
    pub fn message(&self) -> String {
        format!(
            "Monitor '{}' (ID: {}) failed {} times in a row: {}",
            self.monitor_name, self.monitor_id, self.consecutive_failures, self.detail
        )
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError>;
}

/// Writes alerts to the log instead of an external channel.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        warn!(
            monitor_id = alert.monitor_id,
            monitor_name = %alert.monitor_name,
            notify_type = alert.notify_type,
            notify_target = %alert.notify_target,
            sequence = alert.sequence,
            "{}",
            alert.message()
        );
        Ok(())
    }
}

pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, timeout: Duration) -> Self {
        Self { notifier, timeout }
    }

    /// Delivers `alert` in the background. Failures are logged, never retried here.
    pub fn dispatch(&self, alert: Alert) -> JoinHandle<()> {
        let notifier = Arc::clone(&self.notifier);
        let timeout = self.timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, notifier.notify(&alert)).await {
                Ok(Ok(())) => {
                    info!(
                        monitor_id = alert.monitor_id,
                        sequence = alert.sequence,
                        "Notification delivered."
                    );
                }
                Ok(Err(e)) => {
                    error!(monitor_id = alert.monitor_id, error = %e, "Failed to deliver notification.");
                }
                Err(_) => {
                    error!(
                        monitor_id = alert.monitor_id,
                        timeout_ms = timeout.as_millis() as u64,
                        "Notification delivery timed out."
                    );
                }
            }
        })
    }
}
