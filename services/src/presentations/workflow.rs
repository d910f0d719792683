//! Approve and reject transitions.

use super::publisher::{DecisionPublisher, PublishError};
use super::repository::{PresentationRepository, RepositoryError};
use super::{Presentation, PresentationId, PresentationStatus};
use crate::config::BrokerConfig;
use conference_core::decision::Decision;
use conference_core::environment::{Clock, SystemClock};
use conference_core::event_bus::EventBus;
use conference_core::outbox::{DecisionOutbox, OutboxEntry, OutboxError};
use std::sync::Arc;
use thiserror::Error;

/// Errors from [`PresentationWorkflow`].
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// No presentation with this id
    #[error("Presentation not found: {0}")]
    NotFound(PresentationId),

    /// Loading or saving the presentation failed
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// The decision could not be published
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// The decision could not be stored in the outbox
    #[error(transparent)]
    Outbox(#[from] OutboxError),
}

/// How a transition hands its decision to the broker.
#[derive(Clone)]
pub enum DecisionDispatch {
    /// Publish inside the transition; the call waits for the broker.
    Direct(Arc<DecisionPublisher>),
    /// Store in the outbox; an [`OutboxDispatcher`](super::OutboxDispatcher)
    /// publishes later.
    Outbox(Arc<dyn DecisionOutbox>),
}

impl DecisionDispatch {
    /// Publish directly on `bus`, to the configured queues with the
    /// configured retry policy.
    #[must_use]
    pub fn direct(bus: Arc<dyn EventBus>, config: &BrokerConfig) -> Self {
        Self::Direct(Arc::new(DecisionPublisher::with_channels(
            bus,
            config.retry_policy(),
            config.decision_channels(),
        )))
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Direct(_) => "direct",
            Self::Outbox(_) => "outbox",
        }
    }
}

/// Presentation review: status change plus decision event.
pub struct PresentationWorkflow<R> {
    repository: R,
    dispatch: DecisionDispatch,
    clock: Arc<dyn Clock>,
}

impl<R: PresentationRepository> PresentationWorkflow<R> {
    /// Workflow using the system clock.
    #[must_use]
    pub fn new(repository: R, dispatch: DecisionDispatch) -> Self {
        Self::with_clock(repository, dispatch, Arc::new(SystemClock))
    }

    /// Workflow with an injected clock (stamps outbox entries).
    #[must_use]
    pub fn with_clock(repository: R, dispatch: DecisionDispatch, clock: Arc<dyn Clock>) -> Self {
        Self {
            repository,
            dispatch,
            clock,
        }
    }

    /// The repository.
    #[must_use]
    pub const fn repository(&self) -> &R {
        &self.repository
    }

    /// Mark a presentation approved and emit an approval.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::NotFound`] for an unknown id, and a publish,
    /// outbox or repository error if that step fails.
    pub async fn approve(&self, id: PresentationId) -> Result<Presentation, WorkflowError> {
        self.decide(id, Decision::Approved).await
    }

    /// Mark a presentation rejected and emit a rejection.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::NotFound`] for an unknown id, and a publish,
    /// outbox or repository error if that step fails.
    pub async fn reject(&self, id: PresentationId) -> Result<Presentation, WorkflowError> {
        self.decide(id, Decision::Rejected).await
    }

    async fn decide(&self, id: PresentationId, decision: Decision) -> Result<Presentation, WorkflowError> {
        let mut presentation = self
            .repository
            .get(id)
            .await?
            .ok_or(WorkflowError::NotFound(id))?;

        presentation.status = PresentationStatus::from(decision);
        self.repository.save(&presentation).await?;
        tracing::info!(
            presentation_id = %id,
            decision = %decision,
            dispatch = self.dispatch.as_str(),
            "Presentation status changed"
        );

        let event = presentation.decision_event();
        match &self.dispatch {
            DecisionDispatch::Direct(publisher) => publisher.publish(decision, &event).await?,
            DecisionDispatch::Outbox(outbox) => {
                let entry = OutboxEntry::new(decision, event, self.clock.now());
                outbox.enqueue(&entry).await?;
                tracing::debug!(presentation_id = %id, outbox_id = %entry.id, "Decision queued in outbox");
            }
        }

        Ok(presentation)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::presentations::InMemoryPresentationRepository;
    use conference_core::event::Event;
    use conference_runtime::RetryPolicy;
    use conference_testing::{InMemoryDecisionOutbox, InMemoryEventBus, test_clock};

    fn intro() -> Presentation {
        Presentation::submitted(PresentationId(1), "Pat", "p@y.com", "Intro")
    }

    #[tokio::test]
    async fn approve_publishes_one_approval() {
        let bus = InMemoryEventBus::new();
        let publisher = Arc::new(DecisionPublisher::new(Arc::new(bus.clone()), RetryPolicy::default()));
        let workflow = PresentationWorkflow::new(
            InMemoryPresentationRepository::with([intro()]),
            DecisionDispatch::Direct(Arc::clone(&publisher)),
        );

        let approved = workflow.approve(PresentationId(1)).await.unwrap();

        assert_eq!(approved.status, PresentationStatus::Approved);
        let stored = workflow.repository().get(PresentationId(1)).await.unwrap().unwrap();
        assert_eq!(stored.status, PresentationStatus::Approved);

        let approvals = publisher.channels().channel_for(Decision::Approved);
        let rejections = publisher.channels().channel_for(Decision::Rejected);
        assert_eq!(bus.published(approvals), vec![intro().decision_event().to_bytes().unwrap()]);
        assert!(bus.published(rejections).is_empty());
    }

    #[tokio::test]
    async fn direct_dispatch_uses_configured_queues() {
        let config = crate::Config::from_lookup(|key| match key {
            "APPROVALS_CHANNEL" => Some("talks_accepted".to_string()),
            _ => None,
        })
        .unwrap();
        let bus = InMemoryEventBus::new();
        let workflow = PresentationWorkflow::new(
            InMemoryPresentationRepository::with([intro()]),
            DecisionDispatch::direct(Arc::new(bus.clone()), &config.broker),
        );

        workflow.approve(PresentationId(1)).await.unwrap();

        let accepted = conference_core::channel::Channel::point_to_point("talks_accepted");
        assert_eq!(bus.published(&accepted).len(), 1);
        assert!(bus.published(config.broker.decision_channels().channel_for(Decision::Rejected)).is_empty());
    }

    #[tokio::test]
    async fn unknown_presentation_is_not_found() {
        let bus = InMemoryEventBus::new();
        let publisher = Arc::new(DecisionPublisher::new(Arc::new(bus.clone()), RetryPolicy::default()));
        let workflow = PresentationWorkflow::new(InMemoryPresentationRepository::new(), DecisionDispatch::Direct(publisher));

        let err = workflow.reject(PresentationId(9)).await.unwrap_err();

        assert!(matches!(err, WorkflowError::NotFound(PresentationId(9))));
        assert_eq!(bus.connect_attempts(), 0);
    }

    #[tokio::test]
    async fn outbox_mode_records_instead_of_publishing() {
        let bus = InMemoryEventBus::new();
        let outbox = InMemoryDecisionOutbox::new();
        let clock = test_clock();
        let workflow = PresentationWorkflow::with_clock(
            InMemoryPresentationRepository::with([intro()]),
            DecisionDispatch::Outbox(Arc::new(outbox.clone())),
            Arc::new(clock.clone()),
        );

        workflow.reject(PresentationId(1)).await.unwrap();

        let entries = outbox.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].decision, Decision::Rejected);
        assert_eq!(entries[0].event, intro().decision_event());
        assert_eq!(entries[0].created_at, clock.now());
        assert!(entries[0].is_pending());
        assert_eq!(bus.connect_attempts(), 0);
    }

    #[tokio::test]
    async fn outbox_failure_is_reported() {
        let outbox = InMemoryDecisionOutbox::new();
        outbox.set_unavailable(true);
        let workflow = PresentationWorkflow::new(
            InMemoryPresentationRepository::with([intro()]),
            DecisionDispatch::Outbox(Arc::new(outbox)),
        );

        let err = workflow.approve(PresentationId(1)).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Outbox(OutboxError::Storage(_))));
    }
}
