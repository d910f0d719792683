//! Broker channels and their delivery patterns.
//!
//! A [`Channel`] is a name plus a [`ChannelKind`]. The kind decides how the
//! broker routes a published message:
//!
//! - [`ChannelKind::Broadcast`]: every currently bound subscriber receives its
//!   own copy. Subscriptions are private to the connection that created them.
//! - [`ChannelKind::PointToPoint`]: a named durable queue. Each message is
//!   handed to exactly one of the attached consumers.

use std::fmt;

/// Name of the broadcast channel carrying account snapshots.
pub const ACCOUNT_INFO: &str = "account_info";

/// Name of the durable queue carrying approval decisions.
pub const PRESENTATION_APPROVALS: &str = "presentation_approvals";

/// Name of the durable queue carrying rejection decisions.
pub const PRESENTATION_REJECTIONS: &str = "presentation_rejections";

/// How the broker routes messages published to a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Fanout: every bound subscriber gets every message.
    Broadcast,
    /// Named durable queue with competing consumers.
    PointToPoint,
}

impl ChannelKind {
    /// Stable lowercase name, used in logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Broadcast => "broadcast",
            Self::PointToPoint => "point-to-point",
        }
    }
}

/// A named broker channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Channel {
    name: String,
    kind: ChannelKind,
}

impl Channel {
    /// A fanout channel.
    #[must_use]
    pub fn broadcast(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ChannelKind::Broadcast,
        }
    }

    /// A named, durable, point-to-point channel.
    #[must_use]
    pub fn point_to_point(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ChannelKind::PointToPoint,
        }
    }

    /// Channel name as known to the broker.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Routing pattern.
    #[must_use]
    pub const fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Whether messages published to this channel outlive disconnected consumers.
    ///
    /// Point-to-point queues are durable; a broadcast only reaches whoever is
    /// bound at publish time.
    #[must_use]
    pub const fn is_durable(&self) -> bool {
        matches!(self.kind, ChannelKind::PointToPoint)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
