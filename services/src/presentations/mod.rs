//! Presentation review on the monolith side.
//!
//! Approving or rejecting a presentation emits a [`DecisionEvent`] to the
//! matching decision queue, either inline through a [`DecisionPublisher`] or
//! through the decision outbox drained by an [`OutboxDispatcher`].
//!
//! [`DecisionEvent`]: conference_core::decision::DecisionEvent

pub mod dispatcher;
pub mod publisher;
pub mod repository;
pub mod workflow;

pub use dispatcher::{DispatchError, OutboxDispatcher};
pub use publisher::{DecisionPublisher, PublishError};
pub use repository::{InMemoryPresentationRepository, PresentationRepository, RepositoryError};
pub use workflow::{DecisionDispatch, PresentationWorkflow, WorkflowError};

use conference_core::decision::{Decision, DecisionEvent};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Presentation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PresentationId(pub u64);

impl fmt::Display for PresentationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Review status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PresentationStatus {
    /// Waiting for review
    #[default]
    Submitted,
    /// Accepted
    Approved,
    /// Turned down
    Rejected,
}

impl From<Decision> for PresentationStatus {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Approved => Self::Approved,
            Decision::Rejected => Self::Rejected,
        }
    }
}

/// A submitted talk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presentation {
    /// Identifier
    pub id: PresentationId,
    /// Presenter's display name
    pub presenter_name: String,
    /// Presenter's email
    pub presenter_email: String,
    /// Presenter's company, if any
    pub company_name: Option<String>,
    /// Title
    pub title: String,
    /// Abstract
    pub synopsis: String,
    /// Review status
    pub status: PresentationStatus,
}

impl Presentation {
    /// A newly submitted presentation.
    #[must_use]
    pub fn submitted(
        id: PresentationId,
        presenter_name: impl Into<String>,
        presenter_email: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id,
            presenter_name: presenter_name.into(),
            presenter_email: presenter_email.into(),
            company_name: None,
            title: title.into(),
            synopsis: String::new(),
            status: PresentationStatus::Submitted,
        }
    }

    /// The decision message for this presentation.
    #[must_use]
    pub fn decision_event(&self) -> DecisionEvent {
        DecisionEvent {
            presenter_name: self.presenter_name.clone(),
            presenter_email: self.presenter_email.clone(),
            title: self.title.clone(),
        }
    }
}
