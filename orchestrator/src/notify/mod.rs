//! Deployment notifications

pub mod webhook;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::models::deployment::DeploymentResult;

/// Notification severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// A message for a notification channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub channel: String,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub details: serde_json::Value,
}

impl Notification {
    /// Summarise a deployment or rollback outcome
    pub fn from_result(channel: &str, result: &DeploymentResult) -> Self {
        let (severity, verdict) = if result.success {
            (Severity::Info, "succeeded")
        } else {
            (Severity::Critical, "failed")
        };
        Self {
            channel: channel.to_string(),
            severity,
            title: format!(
                "{} {} of {} to {} {}",
                result.strategy, result.version, result.project, result.environment, verdict
            ),
            message: result
                .error
                .clone()
                .unwrap_or_else(|| format!("{} steps in {} ms", result.steps.len(), result.duration_ms)),
            details: serde_json::to_value(result).unwrap_or_default(),
        }
    }
}

/// Delivery outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A notification channel
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> NotifyOutcome;
}

/// Writes notifications to the log
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> NotifyOutcome {
        match notification.severity {
            Severity::Info => info!("[{}] {}", notification.channel, notification.title),
            Severity::Warning => warn!("[{}] {}", notification.channel, notification.title),
            Severity::Critical => error!(
                "[{}] {}: {}",
                notification.channel, notification.title, notification.message
            ),
        }
        NotifyOutcome {
            success: true,
            error: None,
        }
    }
}
