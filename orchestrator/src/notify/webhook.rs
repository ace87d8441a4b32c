//! Generic JSON webhook notifier

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::errors::DeployError;
use crate::notify::{Notification, Notifier, NotifyOutcome};

/// Posts notifications as JSON to a webhook URL
pub struct WebhookNotifier {
    client: Client,
    url: url::Url,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self, DeployError> {
        let url = url::Url::parse(url)
            .map_err(|e| DeployError::ConfigInvalid(format!("webhook url `{}`: {}", url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DeployError::ConfigInvalid(format!(
                "webhook url must be http(s), got `{}`",
                url.scheme()
            )));
        }
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, notification: &Notification) -> NotifyOutcome {
        debug!("POST {}", self.url);
        let result = self
            .client
            .post(self.url.clone())
            .json(notification)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => NotifyOutcome {
                success: true,
                error: None,
            },
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                warn!("Webhook rejected notification: {} - {}", status, body);
                NotifyOutcome {
                    success: false,
                    error: Some(format!("{}: {}", status, body)),
                }
            }
            Err(e) => {
                warn!("Webhook delivery failed: {}", e);
                NotifyOutcome {
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
