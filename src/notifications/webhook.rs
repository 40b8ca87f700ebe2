use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::json;
use tracing::{error, info, instrument};

use crate::config::Webhook;

use super::{Notification, NotificationError, Notifier};

/// Posts every notification as JSON to a fixed URL
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(webhook: &Webhook) -> Self {
        Self {
            client: Client::new(),
            url: webhook.url.clone(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    #[instrument(skip(self, notification), fields(kind = notification.kind().as_str()))]
    async fn notify(
        &self,
        recipient: &str,
        notification: &Notification,
    ) -> Result<(), NotificationError> {
        let payload = json!({
            "recipient": recipient,
            "kind": notification.kind(),
            "subject": notification.subject(),
            "message": notification.body(),
            "params": notification.params(),
            "timestamp": Utc::now().to_rfc3339()
        });

        match self.client.post(&self.url).json(&payload).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    info!("Successfully sent webhook notification");
                    Ok(())
                } else {
                    error!("Webhook notification failed with status: {}", response.status());
                    Err(NotificationError::Delivery(format!(
                        "webhook responded with {}",
                        response.status()
                    )))
                }
            }
            Err(e) if e.is_timeout() => Err(NotificationError::Timeout),
            Err(e) => {
                error!("Failed to send webhook notification: {}", e);
                Err(NotificationError::Delivery(e.to_string()))
            }
        }
    }
}
