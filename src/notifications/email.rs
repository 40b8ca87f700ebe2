use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use tracing::{debug, error, instrument};

use crate::config::{Smtp, SmtpTls};

use super::{Notification, NotificationError, Notifier};

/// Sends notifications as plain-text email over SMTP
pub struct EmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailNotifier {
    pub fn new(smtp: &Smtp) -> anyhow::Result<Self> {
        let builder = match smtp.tls {
            SmtpTls::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host),
            SmtpTls::Starttls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)
                .context("failed to configure STARTTLS relay")?,
            SmtpTls::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)
                .context("failed to configure TLS relay")?,
        }
        .port(smtp.port);

        let builder = match (&smtp.username, &smtp.password) {
            (Some(username), Some(password)) if !username.is_empty() => {
                builder.credentials(Credentials::new(username.clone(), password.clone()))
            }
            _ => builder,
        };

        let from: Mailbox = smtp
            .from
            .parse()
            .with_context(|| format!("invalid sender address '{}'", smtp.from))?;

        Ok(Self {
            mailer: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    #[instrument(skip(self, notification), fields(kind = notification.kind().as_str()))]
    async fn notify(
        &self,
        recipient: &str,
        notification: &Notification,
    ) -> Result<(), NotificationError> {
        let to: Mailbox = recipient.parse().map_err(|e| {
            NotificationError::Delivery(format!("invalid recipient '{recipient}': {e}"))
        })?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(notification.subject())
            .header(ContentType::TEXT_PLAIN)
            .body(notification.body())
            .map_err(|e| NotificationError::Delivery(format!("failed to build email: {e}")))?;

        match self.mailer.send(message).await {
            Ok(_) => {
                debug!("email sent");
                Ok(())
            }
            Err(e) => {
                error!("Failed to send email: {}", e);
                Err(NotificationError::Delivery(e.to_string()))
            }
        }
    }
}
