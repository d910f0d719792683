//! Presentation mailer: turns decision events into notification emails.
//!
//! One process consumes both decision queues. The queue a message arrives on
//! selects the template; the payload only names the presenter and the talk.

mod handler;
mod smtp;

pub use handler::{DecisionNotificationHandler, MailerSettings, presentation_mailer_consumer};
pub use smtp::SmtpNotifier;

use async_trait::async_trait;
use conference_core::decision::{Decision, DecisionEvent};
use conference_runtime::HandlerError;
use thiserror::Error;

/// Errors from sending a notification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// An address could not be parsed
    #[error("Invalid address {address:?}: {reason}")]
    InvalidAddress {
        /// The address
        address: String,
        /// Parser message
        reason: String,
    },

    /// The message could not be built
    #[error("Failed to build message: {0}")]
    Build(String),

    /// The mail server refused or could not be reached
    #[error("Failed to send message: {0}")]
    Transport(String),
}

impl From<NotifyError> for HandlerError {
    fn from(error: NotifyError) -> Self {
        Self::SideEffect(error.to_string())
    }
}

/// A plain-text email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// `From` address
    pub sender: String,
    /// `To` address
    pub recipient: String,
    /// Subject line
    pub subject: String,
    /// Body text
    pub body: String,
}

impl Notification {
    /// The notification sent to the presenter for `decision`.
    #[must_use]
    pub fn for_decision(decision: Decision, event: &DecisionEvent, sender: &str) -> Self {
        let (subject, body) = match decision {
            Decision::Approved => (
                "Your presentation has been accepted",
                format!(
                    "{}, we're happy to tell you that your presentation {} has been accepted",
                    event.presenter_name, event.title
                ),
            ),
            Decision::Rejected => (
                "Your presentation has been rejected",
                format!(
                    "{}, unfortunately, we have to inform you that your presentation {} has been rejected",
                    event.presenter_name, event.title
                ),
            ),
        };

        Self {
            sender: sender.to_string(),
            recipient: event.presenter_email.clone(),
            subject: subject.to_string(),
            body,
        }
    }
}

/// Delivers notifications.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    /// Send one notification.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] if the message cannot be built or delivered.
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log instead of sending them.
///
/// Used when no SMTP host is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            sender = %notification.sender,
            recipient = %notification.recipient,
            subject = %notification.subject,
            body = %notification.body,
            "Notification (not sent, no SMTP host configured)"
        );
        Ok(())
    }
}

/// Test doubles.
pub mod mocks {
    use super::{Notification, Notifier, NotifyError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};

    /// Records every notification; can be told to fail.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingNotifier {
        sent: Arc<Mutex<Vec<Notification>>>,
        failing: Arc<AtomicBool>,
    }

    impl RecordingNotifier {
        /// Create an empty recorder.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every send fail with [`NotifyError::Transport`].
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Notifications sent so far.
        #[must_use]
        pub fn sent(&self) -> Vec<Notification> {
            self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(NotifyError::Transport("mail server unavailable".to_string()));
            }
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(notification.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intro() -> DecisionEvent {
        DecisionEvent {
            presenter_name: "Pat".to_string(),
            presenter_email: "p@y.com".to_string(),
            title: "Intro".to_string(),
        }
    }

    #[test]
    fn approval_template() {
        let notification = Notification::for_decision(Decision::Approved, &intro(), "admin@conference.go");

        assert_eq!(notification.sender, "admin@conference.go");
        assert_eq!(notification.recipient, "p@y.com");
        assert_eq!(notification.subject, "Your presentation has been accepted");
        assert_eq!(
            notification.body,
            "Pat, we're happy to tell you that your presentation Intro has been accepted"
        );
    }

    #[test]
    fn rejection_template() {
        let notification = Notification::for_decision(Decision::Rejected, &intro(), "admin@conference.go");

        assert_eq!(notification.subject, "Your presentation has been rejected");
        assert_eq!(
            notification.body,
            "Pat, unfortunately, we have to inform you that your presentation Intro has been rejected"
        );
    }

    #[test]
    fn notify_errors_become_side_effect_failures() {
        let error: HandlerError = NotifyError::Transport("refused".to_string()).into();
        assert!(matches!(error, HandlerError::SideEffect(message) if message.contains("refused")));
    }
}
