//! Outbound notifications
//!
//! The monitors describe *what* happened as a [`Notification`]; a [`Notifier`]
//! decides *how* it reaches the account:
//!
//! - **email**: SMTP via lettre (production default)
//! - **webhook**: JSON POST, for chat bridges and tests
//! - **log**: tracing only, for dry runs
//!
//! Delivery failures are reported to the caller, which logs and drops them: a lost
//! message never reverts the state change that produced it.

pub mod email;
pub mod message;
pub mod webhook;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::TransportConfig;

pub use message::{EventKind, Notification};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationError {
    /// The transport rejected or failed to deliver the message
    Delivery(String),

    /// Delivery did not finish within its timeout
    Timeout,
}

impl fmt::Display for NotificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationError::Delivery(msg) => write!(f, "notification delivery failed: {}", msg),
            NotificationError::Timeout => write!(f, "notification delivery timed out"),
        }
    }
}

impl std::error::Error for NotificationError {}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Render and dispatch `notification` to `recipient` (an email address)
    async fn notify(
        &self,
        recipient: &str,
        notification: &Notification,
    ) -> Result<(), NotificationError>;
}

/// Notifier that only writes messages to the log
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        recipient: &str,
        notification: &Notification,
    ) -> Result<(), NotificationError> {
        info!(
            kind = notification.kind().as_str(),
            "to {recipient}: {}\n{}",
            notification.subject(),
            notification.body()
        );
        Ok(())
    }
}

/// Build the notifier selected by the configuration
pub fn from_config(transport: &TransportConfig) -> anyhow::Result<Arc<dyn Notifier>> {
    let notifier: Arc<dyn Notifier> = match transport {
        TransportConfig::Log => Arc::new(LogNotifier),
        TransportConfig::Webhook(webhook) => Arc::new(webhook::WebhookNotifier::new(webhook)),
        TransportConfig::Smtp(smtp) => Arc::new(email::EmailNotifier::new(smtp)?),
    };
    Ok(notifier)
}
