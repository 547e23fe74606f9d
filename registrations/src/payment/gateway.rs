//! External payment gateway.
//!
//! The trait mirrors what card processors expose: charge an amount, refund a previous
//! charge by its reference. [`MockPaymentGateway`] stands in during development and
//! tests; it can be told to decline charges or fail refunds.

use crate::types::{Money, TransactionId, UserId};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// Payment gateway result
pub type GatewayResult<T> = Result<T, PaymentGatewayError>;

/// Payment gateway error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentGatewayError {
    /// Card declined
    #[error("card declined: {reason}")]
    CardDeclined {
        /// Decline reason
        reason: String,
    },
    /// Gateway timeout
    #[error("gateway timeout")]
    Timeout,
    /// Other error
    #[error("payment error: {message}")]
    Other {
        /// Error message
        message: String,
    },
}

/// A successful gateway charge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayReceipt {
    /// Gateway-side reference, needed to refund
    pub reference: String,
    /// Hosted receipt page
    pub receipt_url: String,
    /// Amount charged
    pub amount: Money,
}

/// Payment gateway trait
///
/// Abstraction over payment processors.
pub trait PaymentGateway: Send + Sync {
    /// Charge the user's card
    ///
    /// # Errors
    ///
    /// Returns error if the charge is declined or the gateway is unreachable
    fn charge(
        &self,
        user: UserId,
        amount: Money,
        transaction: TransactionId,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<GatewayReceipt>> + Send>>;

    /// Refund (part of) an earlier charge
    ///
    /// # Errors
    ///
    /// Returns error if the refund fails
    fn refund(
        &self,
        reference: &str,
        amount: Money,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<String>> + Send>>;
}

/// A charge the mock gateway accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCharge {
    /// Payer
    pub user: UserId,
    /// Amount
    pub amount: Money,
    /// Settlement the charge belongs to
    pub transaction: TransactionId,
}

#[derive(Debug, Default)]
struct MockBehavior {
    decline_all: AtomicBool,
    declines_left: AtomicUsize,
    refund_failures_left: AtomicUsize,
    charges: Mutex<Vec<RecordedCharge>>,
    refunds: Mutex<Vec<(String, Money)>>,
}

/// Mock payment gateway
///
/// Succeeds by default. Clones share behavior and the charge log.
#[derive(Clone, Debug, Default)]
pub struct MockPaymentGateway {
    latency: Duration,
    behavior: Arc<MockBehavior>,
}

impl MockPaymentGateway {
    /// Creates a new mock payment gateway with no latency
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an Arc-wrapped instance for sharing
    #[must_use]
    pub fn shared() -> Arc<dyn PaymentGateway> {
        Arc::new(Self::new())
    }

    /// Simulated network delay per call
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Decline every charge until told otherwise
    pub fn decline_all(&self, decline: bool) {
        self.behavior.decline_all.store(decline, Ordering::SeqCst);
    }

    /// Decline the next `count` charges
    pub fn decline_next(&self, count: usize) {
        self.behavior.declines_left.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` refunds
    pub fn fail_next_refunds(&self, count: usize) {
        self.behavior.refund_failures_left.store(count, Ordering::SeqCst);
    }

    /// Charges accepted so far
    #[must_use]
    pub fn charges(&self) -> Vec<RecordedCharge> {
        self.behavior
            .charges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Refunds accepted so far, as `(reference, amount)`
    #[must_use]
    pub fn refunds(&self) -> Vec<(String, Money)> {
        self.behavior
            .refunds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn take_one(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl PaymentGateway for MockPaymentGateway {
    fn charge(
        &self,
        user: UserId,
        amount: Money,
        transaction: TransactionId,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<GatewayReceipt>> + Send>> {
        let latency = self.latency;
        let behavior = Arc::clone(&self.behavior);

        Box::pin(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }

            if behavior.decline_all.load(Ordering::SeqCst) || Self::take_one(&behavior.declines_left) {
                tracing::info!(%user, %amount, %transaction, "Mock gateway declined charge");
                return Err(PaymentGatewayError::CardDeclined {
                    reason: "issuer declined the card".to_string(),
                });
            }

            let reference = format!("mock_ch_{}", uuid::Uuid::new_v4().simple());
            behavior
                .charges
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(RecordedCharge {
                    user,
                    amount,
                    transaction,
                });
            tracing::info!(%user, %amount, %transaction, %reference, "Mock charge processed");

            Ok(GatewayReceipt {
                receipt_url: format!("https://payments.example.edu/receipts/{reference}"),
                reference,
                amount,
            })
        })
    }

    fn refund(
        &self,
        reference: &str,
        amount: Money,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<String>> + Send>> {
        let latency = self.latency;
        let behavior = Arc::clone(&self.behavior);
        let reference = reference.to_string();

        Box::pin(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }

            if Self::take_one(&behavior.refund_failures_left) {
                return Err(PaymentGatewayError::Timeout);
            }

            behavior
                .refunds
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((reference.clone(), amount));
            let refund_id = format!("mock_re_{}", uuid::Uuid::new_v4().simple());
            tracing::info!(%reference, %amount, %refund_id, "Mock refund processed");
            Ok(refund_id)
        })
    }
}
