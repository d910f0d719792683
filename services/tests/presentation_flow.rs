//! Approve/reject through to the presenter's inbox, on the in-memory broker.

#![allow(clippy::unwrap_used)]

use conference_core::decision::{Decision, DecisionChannels, DecisionEvent};
use conference_core::event::Event;
use conference_core::event_bus::AckMode;
use conference_runtime::{ConnectionError, ConsumerError, HandlerError, RetryPolicy};
use conference_services::mailer::mocks::RecordingNotifier;
use conference_services::mailer::{MailerSettings, presentation_mailer_consumer};
use conference_services::presentations::{
    DecisionDispatch, DecisionPublisher, InMemoryPresentationRepository, OutboxDispatcher, Presentation,
    PresentationId, PresentationStatus, PresentationWorkflow, PublishError, WorkflowError,
};
use conference_testing::{InMemoryDecisionOutbox, InMemoryEventBus};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(2);

async fn eventually(condition: impl Fn() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

fn intro() -> Presentation {
    Presentation::submitted(PresentationId(1), "Pat", "p@y.com", "Intro")
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy::fixed(Duration::from_millis(10))
}

fn direct_workflow(
    bus: &InMemoryEventBus,
    presentations: impl IntoIterator<Item = Presentation>,
    policy: RetryPolicy,
) -> PresentationWorkflow<InMemoryPresentationRepository> {
    PresentationWorkflow::new(
        InMemoryPresentationRepository::with(presentations),
        DecisionDispatch::Direct(Arc::new(DecisionPublisher::new(Arc::new(bus.clone()), policy))),
    )
}

struct Mailer {
    notifier: RecordingNotifier,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<Result<(), ConsumerError>>,
}

impl Mailer {
    fn start(bus: &InMemoryEventBus, ack_mode: AckMode) -> Self {
        Self::start_with(bus, ack_mode, RecordingNotifier::new())
    }

    fn start_with(bus: &InMemoryEventBus, ack_mode: AckMode, notifier: RecordingNotifier) -> Self {
        let settings = MailerSettings {
            ack_mode,
            ..MailerSettings::default()
        };
        Self::start_with_settings(bus, settings, notifier)
    }

    fn start_with_settings(bus: &InMemoryEventBus, settings: MailerSettings, notifier: RecordingNotifier) -> Self {
        let (shutdown, receiver) = broadcast::channel(1);
        let settings = MailerSettings {
            retry_policy: fast_retry(),
            ..settings
        };
        let task =
            presentation_mailer_consumer(Arc::new(bus.clone()), Arc::new(notifier.clone()), settings, receiver)
                .spawn();
        Self {
            notifier,
            shutdown,
            task,
        }
    }

    async fn stop(self) -> Result<(), ConsumerError> {
        let _ = self.shutdown.send(());
        tokio::time::timeout(WAIT, self.task).await.unwrap().unwrap()
    }
}

async fn subscribed(bus: &InMemoryEventBus, mailers: usize) {
    let channels = DecisionChannels::default();
    eventually(|| channels.all().iter().all(|channel| bus.subscriber_count(channel) == mailers)).await;
}

#[tokio::test]
async fn approval_reaches_the_presenter() {
    let bus = InMemoryEventBus::new();
    let mailer = Mailer::start(&bus, AckMode::AfterProcessing);
    subscribed(&bus, 1).await;
    let workflow = direct_workflow(&bus, [intro()], fast_retry());

    workflow.approve(PresentationId(1)).await.unwrap();

    let channels = DecisionChannels::default();
    let approvals = bus.published(channels.channel_for(Decision::Approved));
    assert_eq!(approvals.len(), 1);
    let event = DecisionEvent::from_bytes(&approvals[0]).unwrap();
    assert_eq!(event.presenter_email, "p@y.com");
    assert_eq!(event.presenter_name, "Pat");
    assert_eq!(event.title, "Intro");
    assert!(bus.published(channels.channel_for(Decision::Rejected)).is_empty());

    eventually(|| !mailer.notifier.sent().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    let sent = mailer.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient, "p@y.com");
    assert_eq!(sent[0].subject, "Your presentation has been accepted");
    assert_eq!(
        sent[0].body,
        "Pat, we're happy to tell you that your presentation Intro has been accepted"
    );

    mailer.stop().await.unwrap();
}

#[tokio::test]
async fn rejection_reaches_the_presenter() {
    let bus = InMemoryEventBus::new();
    let mailer = Mailer::start(&bus, AckMode::AfterProcessing);
    subscribed(&bus, 1).await;
    let workflow = direct_workflow(&bus, [intro()], fast_retry());

    let rejected = workflow.reject(PresentationId(1)).await.unwrap();

    assert_eq!(rejected.status, PresentationStatus::Rejected);
    eventually(|| mailer.notifier.sent().len() == 1).await;
    assert_eq!(mailer.notifier.sent()[0].subject, "Your presentation has been rejected");
    mailer.stop().await.unwrap();
}

#[tokio::test]
async fn decision_queued_while_mailer_is_down_is_delivered_later() {
    let bus = InMemoryEventBus::new();
    let workflow = direct_workflow(&bus, [intro()], fast_retry());

    workflow.approve(PresentationId(1)).await.unwrap();
    let channels = DecisionChannels::default();
    assert_eq!(bus.pending(channels.channel_for(Decision::Approved)), 1);

    let mailer = Mailer::start(&bus, AckMode::AfterProcessing);
    eventually(|| mailer.notifier.sent().len() == 1).await;
    mailer.stop().await.unwrap();
}

#[tokio::test]
async fn reject_waits_for_an_unreachable_broker() {
    let bus = InMemoryEventBus::new();
    bus.set_reachable(false);
    let workflow = Arc::new(direct_workflow(&bus, [intro()], fast_retry()));

    let pending = tokio::spawn({
        let workflow = Arc::clone(&workflow);
        async move { workflow.reject(PresentationId(1)).await }
    });
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!pending.is_finished());
    assert!(bus.connect_attempts() > 1);

    bus.set_reachable(true);
    let rejected = tokio::time::timeout(WAIT, pending).await.unwrap().unwrap().unwrap();

    assert_eq!(rejected.status, PresentationStatus::Rejected);
    let channels = DecisionChannels::default();
    assert_eq!(bus.published(channels.channel_for(Decision::Rejected)).len(), 1);
}

#[tokio::test]
async fn reject_fails_when_capped_retries_run_out() {
    let bus = InMemoryEventBus::new();
    bus.set_reachable(false);
    let policy = RetryPolicy::builder()
        .initial_delay(Duration::from_millis(5))
        .max_attempts(3)
        .build();
    let workflow = direct_workflow(&bus, [intro()], policy);

    let err = workflow.reject(PresentationId(1)).await.unwrap_err();

    assert!(matches!(
        err,
        WorkflowError::Publish(PublishError::Connection(ConnectionError::RetriesExhausted { .. }))
    ));
    assert_eq!(bus.connect_attempts(), 3);
    assert!(bus.published(DecisionChannels::default().channel_for(Decision::Rejected)).is_empty());
}

#[tokio::test]
async fn competing_mailers_share_the_work() {
    let bus = InMemoryEventBus::new();
    let first = Mailer::start(&bus, AckMode::AfterProcessing);
    let second = Mailer::start(&bus, AckMode::AfterProcessing);
    subscribed(&bus, 2).await;

    let presentations = (1..=10).map(|id| {
        Presentation::submitted(PresentationId(id), "Pat", format!("p{id}@y.com"), format!("Talk {id}"))
    });
    let workflow = direct_workflow(&bus, presentations, fast_retry());
    for id in 1..=10 {
        workflow.approve(PresentationId(id)).await.unwrap();
    }

    eventually(|| first.notifier.sent().len() + second.notifier.sent().len() == 10).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let recipients: Vec<String> = first
        .notifier
        .sent()
        .into_iter()
        .chain(second.notifier.sent())
        .map(|notification| notification.recipient)
        .collect();
    assert_eq!(recipients.len(), 10);
    assert_eq!(recipients.iter().collect::<HashSet<_>>().len(), 10);

    first.stop().await.unwrap();
    second.stop().await.unwrap();
}

#[tokio::test]
async fn failed_send_is_redelivered_when_acked_after_processing() {
    let bus = InMemoryEventBus::new();
    let notifier = RecordingNotifier::new();
    notifier.set_failing(true);
    let mailer = Mailer::start_with(&bus, AckMode::AfterProcessing, notifier.clone());
    subscribed(&bus, 1).await;

    direct_workflow(&bus, [intro()], fast_retry())
        .approve(PresentationId(1))
        .await
        .unwrap();

    let result = tokio::time::timeout(WAIT, mailer.task).await.unwrap().unwrap();
    assert!(matches!(
        result,
        Err(ConsumerError::Handler { source: HandlerError::SideEffect(_), .. })
    ));
    let approvals = DecisionChannels::default().channel_for(Decision::Approved).clone();
    eventually(|| bus.pending(&approvals) == 1).await;

    notifier.set_failing(false);
    let restarted = Mailer::start_with(&bus, AckMode::AfterProcessing, notifier.clone());
    eventually(|| notifier.sent().len() == 1).await;
    restarted.stop().await.unwrap();
}

#[tokio::test]
async fn failed_send_is_lost_with_default_settings() {
    let bus = InMemoryEventBus::new();
    let notifier = RecordingNotifier::new();
    notifier.set_failing(true);
    let mailer = Mailer::start_with_settings(&bus, MailerSettings::default(), notifier.clone());
    subscribed(&bus, 1).await;

    direct_workflow(&bus, [intro()], fast_retry())
        .approve(PresentationId(1))
        .await
        .unwrap();

    let result = tokio::time::timeout(WAIT, mailer.task).await.unwrap().unwrap();
    assert!(result.is_err());
    let approvals = DecisionChannels::default().channel_for(Decision::Approved).clone();
    assert_eq!(bus.pending(&approvals), 0);

    notifier.set_failing(false);
    let restarted = Mailer::start_with_settings(&bus, MailerSettings::default(), notifier.clone());
    subscribed(&bus, 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(notifier.sent().is_empty());
    restarted.stop().await.unwrap();
}

#[tokio::test]
async fn outbox_decision_is_published_by_the_dispatcher() {
    let bus = InMemoryEventBus::new();
    let outbox = InMemoryDecisionOutbox::new();
    let mailer = Mailer::start(&bus, AckMode::AfterProcessing);
    subscribed(&bus, 1).await;

    bus.set_reachable(false);
    let workflow = PresentationWorkflow::new(
        InMemoryPresentationRepository::with([intro()]),
        DecisionDispatch::Outbox(Arc::new(outbox.clone())),
    );
    workflow.approve(PresentationId(1)).await.unwrap();
    assert_eq!(outbox.pending_count(), 1);

    let (shutdown, receiver) = broadcast::channel(1);
    let dispatcher = tokio::spawn(
        OutboxDispatcher::new(Arc::new(outbox.clone()), Arc::new(bus.clone()), fast_retry())
            .with_poll_interval(Duration::from_millis(5))
            .run(receiver),
    );
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(outbox.pending_count(), 1);

    bus.set_reachable(true);
    eventually(|| outbox.pending_count() == 0).await;
    eventually(|| mailer.notifier.sent().len() == 1).await;
    assert_eq!(mailer.notifier.sent()[0].recipient, "p@y.com");

    shutdown.send(()).unwrap();
    tokio::time::timeout(WAIT, dispatcher).await.unwrap().unwrap();
    mailer.stop().await.unwrap();
}
