//! SMTP delivery through lettre.

use super::{Notification, Notifier, NotifyError};
use crate::config::SmtpConfig;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

/// Sends notifications over SMTP.
///
/// A transport is built per message and the blocking send runs on the
/// blocking thread pool.
#[derive(Clone)]
pub struct SmtpNotifier {
    host: String,
    port: u16,
    tls: bool,
    credentials: Option<Credentials>,
}

impl SmtpNotifier {
    /// Plain SMTP to `host:port` without authentication.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: false,
            credentials: None,
        }
    }

    /// Notifier for `config`, or `None` if no host is configured.
    #[must_use]
    pub fn from_config(config: &SmtpConfig) -> Option<Self> {
        let host = config.host.as_deref()?;
        let mut notifier = Self::new(host, config.port).with_tls(config.tls);
        if let Some(username) = &config.username {
            notifier = notifier.with_credentials(username, config.password.as_deref().unwrap_or_default());
        }
        Some(notifier)
    }

    /// Use TLS (relay mode).
    #[must_use]
    pub const fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    /// Authenticate with `username` and `password`.
    #[must_use]
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.credentials = Some(Credentials::new(username.to_string(), password.to_string()));
        self
    }

    fn build_transport(&self) -> Result<SmtpTransport, NotifyError> {
        let builder = if self.tls {
            SmtpTransport::relay(&self.host)
                .map_err(|e| NotifyError::Transport(format!("SMTP relay error: {e}")))?
        } else {
            SmtpTransport::builder_dangerous(&self.host)
        };

        let builder = builder.port(self.port);
        let builder = match &self.credentials {
            Some(credentials) => builder.credentials(credentials.clone()),
            None => builder,
        };
        Ok(builder.build())
    }
}

fn mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address.parse().map_err(|e: lettre::address::AddressError| NotifyError::InvalidAddress {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let email = Message::builder()
            .from(mailbox(&notification.sender)?)
            .to(mailbox(&notification.recipient)?)
            .subject(notification.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(notification.body.clone())
            .map_err(|e| NotifyError::Build(e.to_string()))?;

        let mailer = self.build_transport()?;

        tokio::task::spawn_blocking(move || {
            mailer
                .send(&email)
                .map_err(|e| NotifyError::Transport(e.to_string()))
        })
        .await
        .map_err(|e| NotifyError::Transport(format!("Email task failed: {e}")))??;

        tracing::info!(
            recipient = %notification.recipient,
            subject = %notification.subject,
            "Notification sent"
        );
        Ok(())
    }
}
