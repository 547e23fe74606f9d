//! Dependencies injected into every event's reducer.

use crate::notifications::Notifier;
use crate::payment::PaymentReconciler;
use crate::refund::RefundPolicy;
use chrono::Duration;
use rollcall_core::environment::Clock;
use std::sync::Arc;

/// Default time a promoted waitlist entry has to pay.
pub const DEFAULT_PAYMENT_WINDOW_DAYS: i64 = 3;

/// Environment for [`super::BookReducer`]
#[derive(Clone)]
pub struct BookEnvironment {
    /// Source of `now` for deadlines and windows
    pub clock: Arc<dyn Clock>,
    /// Settles charges and refunds
    pub reconciler: Arc<PaymentReconciler>,
    /// Publishes notices
    pub notifier: Notifier,
    /// Cancellation cutoff
    pub refund_policy: RefundPolicy,
    /// Time a promoted entry has to pay
    pub payment_window: Duration,
}

impl BookEnvironment {
    /// Environment with the default refund and payment windows
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, reconciler: Arc<PaymentReconciler>, notifier: Notifier) -> Self {
        Self {
            clock,
            reconciler,
            notifier,
            refund_policy: RefundPolicy::default(),
            payment_window: Duration::days(DEFAULT_PAYMENT_WINDOW_DAYS),
        }
    }

    /// Override the refund policy
    #[must_use]
    pub const fn with_refund_policy(mut self, refund_policy: RefundPolicy) -> Self {
        self.refund_policy = refund_policy;
        self
    }

    /// Override the payment window
    #[must_use]
    pub const fn with_payment_window(mut self, payment_window: Duration) -> Self {
        self.payment_window = payment_window;
        self
    }
}

impl std::fmt::Debug for BookEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookEnvironment")
            .field("refund_policy", &self.refund_policy)
            .field("payment_window", &self.payment_window)
            .finish_non_exhaustive()
    }
}
