//! Refund eligibility.
//!
//! A registration can be cancelled (and refunded) only while the event is at least
//! the refund window away. Cancellation and refund are one operation: outside the
//! window the cancellation itself is refused.

use chrono::{DateTime, Duration, Utc};

/// Default refund window.
pub const DEFAULT_REFUND_WINDOW_DAYS: i64 = 14;

/// `(event_start - now) >= 14 days`
#[must_use]
pub fn is_refundable(event_start: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    RefundPolicy::default().is_refundable(event_start, now)
}

/// Refund rule with a configurable window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefundPolicy {
    window: Duration,
}

impl RefundPolicy {
    /// Policy with a custom window
    #[must_use]
    pub const fn new(window: Duration) -> Self {
        Self { window }
    }

    /// The window
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Whether a registration for an event starting at `event_start` may be refunded at `now`
    #[must_use]
    pub fn is_refundable(&self, event_start: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        event_start - now >= self.window
    }

    /// Last moment a refund is possible
    #[must_use]
    pub fn refundable_until(&self, event_start: DateTime<Utc>) -> DateTime<Utc> {
        event_start - self.window
    }
}

impl Default for RefundPolicy {
    fn default() -> Self {
        Self::new(Duration::days(DEFAULT_REFUND_WINDOW_DAYS))
    }
}
