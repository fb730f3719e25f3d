use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum NotificationKind {
    BidRaised,
    DeadTest,
    TestConcluded,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub test_id: String,
    pub kind: NotificationKind,
    pub severity: Severity,
    pub message: String,
    pub timestamp: i64,
}

impl NotificationEvent {
    pub fn new(
        test_id: &str,
        kind: NotificationKind,
        severity: Severity,
        message: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            test_id: test_id.to_string(),
            kind,
            severity,
            message: message.into(),
            timestamp,
        }
    }
}

/// Delivery of user-facing notifications. Delivery failures are the
/// notifier's concern and never reach the monitor.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: NotificationEvent);
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: NotificationEvent) {
        match event.severity {
            Severity::Info => tracing::info!(
                test_id = %event.test_id,
                kind = ?event.kind,
                "[notify] {}",
                event.message
            ),
            Severity::Warning => tracing::warn!(
                test_id = %event.test_id,
                kind = ?event.kind,
                "[notify] {}",
                event.message
            ),
            Severity::Critical => tracing::error!(
                test_id = %event.test_id,
                kind = ?event.kind,
                "[notify] {}",
                event.message
            ),
        }
    }
}
