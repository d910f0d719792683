//! Presentation decisions sent from the monolith to the mailer.
//!
//! The decision itself is not in the payload. It is implied by the queue the
//! message is published to, so [`DecisionChannels`] is the single place that
//! maps one to the other.

use crate::channel::{Channel, PRESENTATION_APPROVALS, PRESENTATION_REJECTIONS};
use crate::event::Event;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Outcome of reviewing a presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// The presentation was accepted
    Approved,
    /// The presentation was turned down
    Rejected,
}

impl Decision {
    /// Lowercase name, used in logs, metric labels and the outbox table.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("unknown decision: {other}")),
        }
    }
}

/// Wire message for an approve/reject transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionEvent {
    /// Presenter's display name
    pub presenter_name: String,
    /// Where the notification goes
    pub presenter_email: String,
    /// Presentation title
    pub title: String,
}

impl Event for DecisionEvent {
    fn event_type(&self) -> &'static str {
        "PresentationDecision"
    }
}

/// The pair of durable queues carrying decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionChannels {
    approvals: Channel,
    rejections: Channel,
}

impl DecisionChannels {
    /// Channels with custom queue names.
    #[must_use]
    pub fn new(approvals: impl Into<String>, rejections: impl Into<String>) -> Self {
        Self {
            approvals: Channel::point_to_point(approvals),
            rejections: Channel::point_to_point(rejections),
        }
    }

    /// The queue that carries `decision`.
    #[must_use]
    pub const fn channel_for(&self, decision: Decision) -> &Channel {
        match decision {
            Decision::Approved => &self.approvals,
            Decision::Rejected => &self.rejections,
        }
    }

    /// The decision implied by a queue, if it is one of ours.
    #[must_use]
    pub fn decision_for(&self, channel: &Channel) -> Option<Decision> {
        if channel == &self.approvals {
            Some(Decision::Approved)
        } else if channel == &self.rejections {
            Some(Decision::Rejected)
        } else {
            None
        }
    }

    /// Both queues, approvals first.
    #[must_use]
    pub const fn all(&self) -> [&Channel; 2] {
        [&self.approvals, &self.rejections]
    }
}

impl Default for DecisionChannels {
    fn default() -> Self {
        Self::new(PRESENTATION_APPROVALS, PRESENTATION_REJECTIONS)
    }
}
