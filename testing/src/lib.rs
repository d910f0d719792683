//! # Conference Testing
//!
//! Testing utilities for the Conference GO sync layer.
//!
//! This crate provides:
//! - [`InMemoryEventBus`]: broker simulator with broadcast/point-to-point
//!   routing, acknowledgment and reachability control
//! - [`InMemoryAccountStore`] and [`InMemoryDecisionOutbox`]: storage doubles
//! - [`FixedClock`]: deterministic time
//! - [`properties`]: proptest strategies for wire messages
//!
//! ## Example
//!
//! ```ignore
//! use conference_testing::{InMemoryEventBus, InMemoryAccountStore};
//!
//! #[tokio::test]
//! async fn projection_follows_broadcasts() {
//!     let bus = Arc::new(InMemoryEventBus::new());
//!     let store = InMemoryAccountStore::new();
//!     // spawn the account-sync consumer against `bus` and `store` ...
//!     bus.publish_raw(&Channel::broadcast(ACCOUNT_INFO), payload).await?;
//! }
//! ```

use chrono::{DateTime, Utc};
use conference_core::environment::Clock;

pub mod account_store;
pub mod event_bus;
pub mod outbox;

/// Mock implementations of Environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, RwLock};

    /// Clock that returns whatever time the test sets.
    ///
    /// # Example
    ///
    /// ```
    /// use conference_testing::mocks::FixedClock;
    /// use conference_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let before = clock.now();
    /// assert_eq!(clock.now(), before);
    ///
    /// clock.advance(Duration::seconds(5));
    /// assert_eq!(clock.now() - before, Duration::seconds(5));
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl FixedClock {
        /// Create a clock stopped at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Move the clock to `time`. Shared by every clone.
        pub fn set(&self, time: DateTime<Utc>) {
            if let Ok(mut current) = self.time.write() {
                *current = time;
            }
        }

        /// Move the clock forward.
        pub fn advance(&self, by: chrono::Duration) {
            if let Ok(mut current) = self.time.write() {
                *current += by;
            }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
                .read()
                .map_or_else(|poisoned| *poisoned.into_inner(), |time| *time)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default())
    }
}

/// Test helpers.
pub mod helpers {
    use tracing_subscriber::EnvFilter;

    /// Install a `tracing` subscriber that writes through the test harness.
    ///
    /// Filter comes from `RUST_LOG`, defaulting to `warn`. Safe to call from
    /// every test; only the first call installs anything.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing strategies using proptest.
pub mod properties {
    use chrono::{DateTime, Utc};
    use conference_core::account::AccountSnapshotEvent;
    use proptest::prelude::*;

    /// Timestamps between 2000 and 2100, whole seconds.
    pub fn timestamp() -> impl Strategy<Value = DateTime<Utc>> {
        (946_684_800i64..4_102_444_800).prop_map(|secs| {
            DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_default()
        })
    }

    /// One of a handful of emails, so generated sequences collide on keys.
    pub fn email() -> impl Strategy<Value = String> {
        prop::sample::select(vec!["a@x.com", "b@x.com", "c@x.com", "d@y.org"])
            .prop_map(str::to_string)
    }

    /// Arbitrary account snapshot.
    pub fn account_snapshot() -> impl Strategy<Value = AccountSnapshotEvent> {
        (email(), "[A-Z][a-z]{0,8}", "[A-Z][a-z]{0,8}", any::<bool>(), timestamp()).prop_map(
            |(email, first_name, last_name, is_active, updated)| AccountSnapshotEvent {
                first_name,
                last_name,
                email,
                is_active,
                updated,
            },
        )
    }
}

pub use account_store::InMemoryAccountStore;
pub use event_bus::InMemoryEventBus;
pub use helpers::init_tracing;
pub use mocks::{FixedClock, test_clock};
pub use outbox::InMemoryDecisionOutbox;
