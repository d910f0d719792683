//! Retry policy for broker connection attempts.
//!
//! Services come up before the broker does (container start order is not
//! guaranteed), so connecting is retried. The default policy retries forever
//! at a fixed two second interval; a cap turns "forever" into a bounded number
//! of attempts, and a multiplier above `1.0` turns the fixed interval into
//! exponential backoff.
//!
//! # Example
//!
//! ```rust
//! use conference_runtime::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::builder()
//!     .max_attempts(5)
//!     .initial_delay(Duration::from_millis(100))
//!     .max_delay(Duration::from_secs(10))
//!     .multiplier(2.0)
//!     .build();
//!
//! assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
//! assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
//! assert!(policy.allows_attempt(4));
//! assert!(!policy.allows_attempt(5));
//! ```

use std::time::Duration;

/// Interval between connection attempts when nothing else is configured.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// How connection attempts are repeated.
///
/// # Default Values
///
/// - `max_attempts`: `None` (retry forever)
/// - `initial_delay`: 2 seconds
/// - `max_delay`: 2 seconds
/// - `multiplier`: 1.0 (fixed interval)
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts before giving up; `None` retries forever
    pub max_attempts: Option<usize>,
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RETRY_INTERVAL)
    }
}

impl RetryPolicy {
    /// Retry forever, waiting `interval` between attempts.
    #[must_use]
    pub const fn fixed(interval: Duration) -> Self {
        Self {
            max_attempts: None,
            initial_delay: interval,
            max_delay: interval,
            multiplier: 1.0,
        }
    }

    /// Create a new policy builder, starting from the defaults.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_attempts: None,
            initial_delay: DEFAULT_RETRY_INTERVAL,
            max_delay: DEFAULT_RETRY_INTERVAL,
            multiplier: 1.0,
        }
    }

    /// Delay after failed attempt number `attempt` (zero-based).
    ///
    /// `initial_delay * multiplier ^ attempt`, capped at `max_delay`.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 || self.multiplier <= 1.0 {
            return self.initial_delay.min(self.max_delay);
        }

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);

        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_millis() as f64 {
            self.max_delay
        } else {
            Duration::from_millis(delay_ms as u64)
        }
    }

    /// Whether attempt number `attempt` (zero-based) may be made.
    #[must_use]
    pub fn allows_attempt(&self, attempt: usize) -> bool {
        self.max_attempts.is_none_or(|max| attempt < max.max(1))
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_attempts: Option<usize>,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
}

impl RetryPolicyBuilder {
    /// Give up after this many attempts in total.
    #[must_use]
    pub const fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Retry without a cap.
    #[must_use]
    pub const fn retry_forever(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    /// Set the delay after the first failed attempt.
    ///
    /// Raises `max_delay` to match if it would otherwise be smaller.
    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self.max_delay = self.max_delay.max(delay);
        self
    }

    /// Set the cap for any single delay.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the growth factor between delays.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub const fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            multiplier: self.multiplier,
        }
    }
}
