//! Conference GO services.
//!
//! Three long-running components share this crate:
//!
//! - **account-sync** ([`attendees`]): follows the identity service's
//!   `account_info` broadcast and keeps a local account table.
//! - **presentation-mailer** ([`mailer`]): drains the approval and rejection
//!   queues and emails the presenter.
//! - **outbox-dispatcher** ([`presentations::OutboxDispatcher`]): publishes
//!   decisions that the monolith recorded in its outbox.
//!
//! The monolith side of the decision flow ([`presentations`]) is a library:
//! its HTTP layer calls [`presentations::PresentationWorkflow`] directly.

pub mod app;
pub mod attendees;
pub mod config;
pub mod mailer;
pub mod presentations;

pub use config::{Config, ConfigError};
