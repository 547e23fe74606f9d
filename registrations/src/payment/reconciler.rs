//! Settlement across wallet and gateway.
//!
//! A settlement takes as much as it can (or is allowed to) from the user's wallet and
//! charges the rest through the gateway. The wallet leg always runs first. When the
//! gateway then declines, the wallet debit is reversed with a compensating credit;
//! partial success is never an end state. A compensation that keeps failing is
//! retried with backoff and finally parked in the dead letter queue.
//!
//! Every settlement is guarded by its idempotency key: concurrent or repeated calls
//! with the same key are serialized, and a key that already produced a successful
//! payment returns that payment instead of charging again. Refunding a charge
//! retires its key: a later settle with that key is a conflict, never a replay of
//! money that has already gone back.
//!
//! Key records and the payment log live for the life of the process.

use super::gateway::PaymentGateway;
use super::wallet::{WalletError, WalletLedger};
use crate::types::{
    EventId, Money, Payment, PaymentId, PaymentIntent, PaymentKind, PaymentMethod,
    PaymentPreference, PaymentStatus, TransactionId, UserId,
};
use rollcall_core::environment::Clock;
use rollcall_runtime::metrics::RegistrationMetrics;
use rollcall_runtime::{DeadLetterQueue, RetryPolicy, retry_with_backoff};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Mutex;

/// Settlement errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    /// `wallet_only` was requested but the wallet cannot cover the total
    #[error("wallet balance {balance} does not cover {required}")]
    InsufficientWalletBalance {
        /// Balance at settlement time
        balance: Money,
        /// Amount due
        required: Money,
    },
    /// The settlement did not complete; nothing was charged
    #[error("payment failed: {reason}")]
    Failed {
        /// What went wrong
        reason: String,
    },
    /// The idempotency key belongs to a different request
    #[error("idempotency key '{key}' was already used for a different payment")]
    IdempotencyConflict {
        /// The reused key
        key: String,
    },
}

/// How a total divides between wallet and gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Split {
    /// From the wallet
    pub wallet: Money,
    /// Through the gateway
    pub gateway: Money,
    /// Resulting method
    pub method: PaymentMethod,
}

/// Split `total` given the wallet balance and the payer's preference.
///
/// `wallet = min(balance, total)` and `gateway = total - wallet` under `wallet_first`.
///
/// # Errors
///
/// [`PaymentError::InsufficientWalletBalance`] for `wallet_only` when the balance is short.
pub fn split(total: Money, wallet_balance: Money, preference: PaymentPreference) -> Result<Split, PaymentError> {
    let wallet = match preference {
        PaymentPreference::WalletFirst => wallet_balance.min(total),
        PaymentPreference::WalletOnly if wallet_balance < total => {
            return Err(PaymentError::InsufficientWalletBalance {
                balance: wallet_balance,
                required: total,
            });
        },
        PaymentPreference::WalletOnly => total,
        PaymentPreference::GatewayOnly => Money::ZERO,
    };
    let gateway = total - wallet;

    let method = if gateway.is_zero() {
        PaymentMethod::Wallet
    } else if wallet.is_zero() {
        PaymentMethod::Gateway
    } else {
        PaymentMethod::Combined
    };

    Ok(Split {
        wallet,
        gateway,
        method,
    })
}

/// Work that exhausted its retries and needs manual reconciliation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconciliationTask {
    /// Money owed back to a wallet
    WalletCredit {
        /// Whose wallet
        user_id: UserId,
        /// How much
        amount: Money,
        /// Settlement it belongs to
        transaction_id: TransactionId,
        /// Payment record it belongs to
        payment_id: PaymentId,
    },
    /// Money owed back through the gateway
    GatewayRefund {
        /// Reference of the original charge
        reference: String,
        /// How much
        amount: Money,
        /// The refund record
        payment_id: PaymentId,
    },
}

/// A settle call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettlementRequest {
    /// Payer
    pub user_id: UserId,
    /// Event paid for
    pub event_id: EventId,
    /// Amount due
    pub amount: Money,
    /// Key and preference
    pub intent: PaymentIntent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Fingerprint {
    user_id: UserId,
    event_id: EventId,
    amount: Money,
}

#[derive(Debug)]
struct KeyRecord {
    fingerprint: Fingerprint,
    succeeded: Option<Payment>,
    refunded: bool,
}

type KeySlot = Arc<Mutex<Option<KeyRecord>>>;

/// Payment records indexed by payer.
#[derive(Debug, Default)]
struct PaymentLog {
    by_user: HashMap<UserId, Vec<Payment>>,
    owners: HashMap<PaymentId, UserId>,
}

/// Settles charges and issues refunds.
pub struct PaymentReconciler {
    wallet: Arc<dyn WalletLedger>,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    dead_letters: DeadLetterQueue<ReconciliationTask>,
    keys: Mutex<HashMap<String, KeySlot>>,
    payments: RwLock<PaymentLog>,
}

impl PaymentReconciler {
    /// Reconciler with the default retry policy and a 1000-entry dead letter queue
    #[must_use]
    pub fn new(wallet: Arc<dyn WalletLedger>, gateway: Arc<dyn PaymentGateway>, clock: Arc<dyn Clock>) -> Self {
        Self {
            wallet,
            gateway,
            clock,
            retry: RetryPolicy::default(),
            dead_letters: DeadLetterQueue::new(1000),
            keys: Mutex::new(HashMap::new()),
            payments: RwLock::new(PaymentLog::default()),
        }
    }

    /// Retry policy for compensations and refunds
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Dead letter queue size
    #[must_use]
    pub fn with_dead_letter_capacity(mut self, max_size: usize) -> Self {
        self.dead_letters = DeadLetterQueue::new(max_size);
        self
    }

    /// Operations waiting for manual reconciliation
    #[must_use]
    pub const fn dead_letters(&self) -> &DeadLetterQueue<ReconciliationTask> {
        &self.dead_letters
    }

    /// Every payment record for a user, oldest first
    #[must_use]
    pub fn payments_for(&self, user_id: UserId) -> Vec<Payment> {
        self.payments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_user
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Look up a payment record
    #[must_use]
    pub fn payment(&self, id: PaymentId) -> Option<Payment> {
        let log = self.payments.read().unwrap_or_else(PoisonError::into_inner);
        let owner = log.owners.get(&id)?;
        log.by_user.get(owner)?.iter().find(|p| p.id == id).cloned()
    }

    /// Settle a charge.
    ///
    /// # Errors
    ///
    /// - [`PaymentError::IdempotencyConflict`]: the key was used for another request, or
    ///   its charge has been refunded
    /// - [`PaymentError::InsufficientWalletBalance`]: `wallet_only` and the wallet is short
    /// - [`PaymentError::Failed`]: a leg failed; any wallet debit has been compensated
    pub async fn settle(&self, request: SettlementRequest) -> Result<Payment, PaymentError> {
        let key = request.intent.idempotency_key.clone();
        let slot = {
            let mut keys = self.keys.lock().await;
            Arc::clone(keys.entry(key.clone()).or_default())
        };
        let mut record = slot.lock().await;

        let fingerprint = Fingerprint {
            user_id: request.user_id,
            event_id: request.event_id,
            amount: request.amount,
        };
        if let Some(existing) = record.as_ref() {
            if existing.refunded {
                tracing::warn!(idempotency_key = %key, "Idempotency key belongs to a refunded charge");
                return Err(PaymentError::IdempotencyConflict { key });
            }
            if existing.fingerprint != fingerprint {
                tracing::warn!(idempotency_key = %key, "Idempotency key reused for a different payment");
                return Err(PaymentError::IdempotencyConflict { key });
            }
            if let Some(payment) = &existing.succeeded {
                tracing::info!(idempotency_key = %key, payment_id = %payment.id, "Returning original payment for repeated key");
                return Ok(payment.clone());
            }
        }

        let outcome = self.execute(&request).await;
        *record = Some(KeyRecord {
            fingerprint,
            succeeded: outcome.as_ref().ok().cloned(),
            refunded: false,
        });
        outcome
    }

    async fn execute(&self, request: &SettlementRequest) -> Result<Payment, PaymentError> {
        let started = Instant::now();
        let user = request.user_id;

        let balance = if request.intent.preference == PaymentPreference::GatewayOnly {
            Money::ZERO
        } else {
            self.wallet
                .balance(user)
                .await
                .map_err(|e| PaymentError::Failed { reason: e.to_string() })?
        };
        let split = split(request.amount, balance, request.intent.preference)?;

        let mut payment = Payment {
            id: PaymentId::new(),
            event_id: request.event_id,
            user_id: user,
            kind: PaymentKind::Charge,
            total: request.amount,
            wallet_amount: split.wallet,
            gateway_amount: split.gateway,
            method: split.method,
            transaction_id: TransactionId::new(),
            status: PaymentStatus::Pending,
            idempotency_key: Some(request.intent.idempotency_key.clone()),
            gateway_reference: None,
            receipt_url: None,
            refund_of: None,
            failure_reason: None,
            created_at: self.clock.now(),
        };
        let transaction = payment.transaction_id;

        if !split.wallet.is_zero() {
            if let Err(error) = self.wallet.debit(user, split.wallet, transaction).await {
                let mapped = match &error {
                    WalletError::InsufficientFunds { balance, .. } => PaymentError::InsufficientWalletBalance {
                        balance: *balance,
                        required: request.amount,
                    },
                    WalletError::Unavailable(_) => PaymentError::Failed {
                        reason: error.to_string(),
                    },
                };
                self.record_failure(payment, &error.to_string(), "wallet");
                return Err(mapped);
            }
        }

        if !split.gateway.is_zero() {
            match self.gateway.charge(user, split.gateway, transaction).await {
                Ok(receipt) => {
                    payment.gateway_reference = Some(receipt.reference);
                    payment.receipt_url = Some(receipt.receipt_url);
                },
                Err(error) => {
                    if !split.wallet.is_zero() {
                        self.compensate(user, split.wallet, transaction, payment.id).await;
                    }
                    let reason = error.to_string();
                    self.record_failure(payment, &reason, "gateway");
                    return Err(PaymentError::Failed { reason });
                },
            }
        }

        payment.status = PaymentStatus::Succeeded;
        self.store(payment.clone());
        RegistrationMetrics::record_settlement(payment.method.as_str(), started.elapsed());
        tracing::info!(
            payment_id = %payment.id,
            %transaction,
            method = payment.method.as_str(),
            wallet = %payment.wallet_amount,
            gateway = %payment.gateway_amount,
            "Payment settled"
        );
        Ok(payment)
    }

    async fn compensate(&self, user_id: UserId, amount: Money, transaction_id: TransactionId, payment_id: PaymentId) {
        metrics::counter!("payments.compensations").increment(1);
        tracing::warn!(%user_id, %amount, %transaction_id, "Gateway declined after wallet debit, reversing debit");

        let credited = retry_with_backoff(&self.retry, "wallet_compensation", || {
            self.wallet.credit(user_id, amount, transaction_id)
        })
        .await;

        if let Err(exhausted) = credited {
            tracing::error!(
                %user_id,
                %amount,
                %transaction_id,
                attempts = exhausted.attempts,
                "Compensating wallet credit failed, escalating to manual reconciliation"
            );
            self.dead_letters.push(
                ReconciliationTask::WalletCredit {
                    user_id,
                    amount,
                    transaction_id,
                    payment_id,
                },
                exhausted.last_error.to_string(),
                exhausted.attempts,
            );
        }
    }

    /// Refund a succeeded charge.
    ///
    /// The refund is a new payment record linked to the charge: the wallet portion is
    /// credited back and the gateway portion refunded through the gateway. Legs that
    /// exhaust their retries go to the dead letter queue and the refund record stays
    /// `pending`.
    pub async fn refund(&self, charge: &Payment) -> Payment {
        self.retire_key(charge).await;

        let mut refund = Payment {
            id: PaymentId::new(),
            event_id: charge.event_id,
            user_id: charge.user_id,
            kind: PaymentKind::Refund,
            total: charge.total,
            wallet_amount: charge.wallet_amount,
            gateway_amount: charge.gateway_amount,
            method: charge.method,
            transaction_id: TransactionId::new(),
            status: PaymentStatus::Pending,
            idempotency_key: None,
            gateway_reference: None,
            receipt_url: None,
            refund_of: Some(charge.id),
            failure_reason: None,
            created_at: self.clock.now(),
        };
        let mut problems = Vec::new();

        if !refund.wallet_amount.is_zero() {
            let (user, amount, transaction) = (refund.user_id, refund.wallet_amount, refund.transaction_id);
            let credited = retry_with_backoff(&self.retry, "refund_wallet", || {
                self.wallet.credit(user, amount, transaction)
            })
            .await;
            if let Err(exhausted) = credited {
                problems.push(format!("wallet credit: {}", exhausted.last_error));
                self.dead_letters.push(
                    ReconciliationTask::WalletCredit {
                        user_id: user,
                        amount,
                        transaction_id: transaction,
                        payment_id: refund.id,
                    },
                    exhausted.last_error.to_string(),
                    exhausted.attempts,
                );
            }
        }

        if !refund.gateway_amount.is_zero() {
            match charge.gateway_reference.as_deref() {
                Some(reference) => {
                    let amount = refund.gateway_amount;
                    let refunded = retry_with_backoff(&self.retry, "refund_gateway", || {
                        self.gateway.refund(reference, amount)
                    })
                    .await;
                    match refunded {
                        Ok(refund_reference) => refund.gateway_reference = Some(refund_reference),
                        Err(exhausted) => {
                            problems.push(format!("gateway refund: {}", exhausted.last_error));
                            self.dead_letters.push(
                                ReconciliationTask::GatewayRefund {
                                    reference: reference.to_string(),
                                    amount,
                                    payment_id: refund.id,
                                },
                                exhausted.last_error.to_string(),
                                exhausted.attempts,
                            );
                        },
                    }
                },
                None => problems.push("charge has no gateway reference".to_string()),
            }
        }

        if problems.is_empty() {
            refund.status = PaymentStatus::Succeeded;
            metrics::counter!("payment.refunded").increment(1);
            tracing::info!(refund_id = %refund.id, charge_id = %charge.id, total = %refund.total, "Refund issued");
        } else {
            let reason = problems.join("; ");
            tracing::error!(refund_id = %refund.id, charge_id = %charge.id, %reason, "Refund awaiting manual reconciliation");
            refund.failure_reason = Some(reason);
        }

        self.store(refund.clone());
        refund
    }

    async fn retire_key(&self, charge: &Payment) {
        let Some(key) = charge.idempotency_key.as_deref() else {
            return;
        };
        let slot = self.keys.lock().await.get(key).cloned();
        if let Some(slot) = slot {
            if let Some(record) = slot.lock().await.as_mut() {
                record.refunded = true;
            }
        }
    }

    fn record_failure(&self, mut payment: Payment, reason: &str, leg: &'static str) {
        payment.status = PaymentStatus::Failed;
        payment.failure_reason = Some(reason.to_string());
        RegistrationMetrics::record_payment_failure(leg);
        tracing::info!(payment_id = %payment.id, leg, %reason, "Payment failed");
        self.store(payment);
    }

    fn store(&self, payment: Payment) {
        let mut log = self.payments.write().unwrap_or_else(PoisonError::into_inner);
        log.owners.insert(payment.id, payment.user_id);
        log.by_user.entry(payment.user_id).or_default().push(payment);
    }
}

impl std::fmt::Debug for PaymentReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentReconciler")
            .field("retry", &self.retry)
            .field("dead_letters", &self.dead_letters.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::payment::{InMemoryWallet, MockPaymentGateway};
    use proptest::prelude::*;
    use rollcall_testing::test_clock;
    use std::time::Duration;

    struct Harness {
        wallet: Arc<InMemoryWallet>,
        gateway: MockPaymentGateway,
        reconciler: Arc<PaymentReconciler>,
    }

    fn harness() -> Harness {
        let wallet = InMemoryWallet::shared();
        let gateway = MockPaymentGateway::new();
        let reconciler = PaymentReconciler::new(
            Arc::clone(&wallet) as Arc<dyn WalletLedger>,
            Arc::new(gateway.clone()),
            Arc::new(test_clock()),
        )
        .with_retry_policy(
            RetryPolicy::builder()
                .max_attempts(3)
                .initial_delay(Duration::from_millis(1))
                .jitter(false)
                .build(),
        );
        Harness {
            wallet,
            gateway,
            reconciler: Arc::new(reconciler),
        }
    }

    fn request(user: UserId, event: EventId, cents: u64, key: &str) -> SettlementRequest {
        SettlementRequest {
            user_id: user,
            event_id: event,
            amount: Money::from_cents(cents),
            intent: PaymentIntent::new(key),
        }
    }

    #[test]
    fn combined_split() {
        let split = split(Money::from_cents(100), Money::from_cents(40), PaymentPreference::WalletFirst).unwrap();
        assert_eq!(split.wallet, Money::from_cents(40));
        assert_eq!(split.gateway, Money::from_cents(60));
        assert_eq!(split.method, PaymentMethod::Combined);
    }

    #[test]
    fn preferences_shape_the_split() {
        let total = Money::from_cents(100);
        assert_eq!(
            split(total, Money::from_cents(500), PaymentPreference::WalletFirst).unwrap().method,
            PaymentMethod::Wallet
        );
        assert_eq!(
            split(total, Money::ZERO, PaymentPreference::WalletFirst).unwrap().method,
            PaymentMethod::Gateway
        );
        assert_eq!(
            split(total, Money::from_cents(500), PaymentPreference::GatewayOnly).unwrap().gateway,
            total
        );
        assert!(matches!(
            split(total, Money::from_cents(99), PaymentPreference::WalletOnly),
            Err(PaymentError::InsufficientWalletBalance { .. })
        ));
    }

    proptest! {
        #[test]
        fn legs_always_add_up(total in 0_u64..1_000_000, balance in 0_u64..1_000_000) {
            for preference in [PaymentPreference::WalletFirst, PaymentPreference::GatewayOnly, PaymentPreference::WalletOnly] {
                if let Ok(split) = split(Money::from_cents(total), Money::from_cents(balance), preference) {
                    prop_assert_eq!(split.wallet + split.gateway, Money::from_cents(total));
                    prop_assert!(split.wallet.cents() <= balance);
                }
            }
        }
    }

    #[tokio::test]
    async fn combined_settlement_debits_then_charges() {
        let h = harness();
        let user = UserId::new();
        h.wallet.deposit(user, Money::from_cents(40));

        let payment = h.reconciler.settle(request(user, EventId::new(), 100, "k-1")).await.unwrap();

        assert_eq!(payment.method, PaymentMethod::Combined);
        assert_eq!(payment.status, PaymentStatus::Succeeded);
        assert_eq!(h.wallet.balance_of(user), Money::ZERO);
        assert_eq!(h.gateway.charges()[0].amount, Money::from_cents(60));
        assert_eq!(h.gateway.charges()[0].transaction, payment.transaction_id);
        assert!(payment.receipt_url.is_some());
    }

    #[tokio::test]
    async fn declined_gateway_reverses_wallet_debit() {
        let h = harness();
        let user = UserId::new();
        h.wallet.deposit(user, Money::from_cents(40));
        h.gateway.decline_next(1);

        let err = h.reconciler.settle(request(user, EventId::new(), 100, "k-2")).await.unwrap_err();

        assert!(matches!(err, PaymentError::Failed { .. }));
        assert_eq!(h.wallet.balance_of(user), Money::from_cents(40));
        let records = h.reconciler.payments_for(user);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn failing_compensation_lands_in_dead_letters() {
        let h = harness();
        let user = UserId::new();
        h.wallet.deposit(user, Money::from_cents(40));
        h.gateway.decline_next(1);
        h.wallet.fail_next_credits(10);

        let _ = h.reconciler.settle(request(user, EventId::new(), 100, "k-3")).await;

        let letters = h.reconciler.dead_letters().snapshot();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].attempts, 3);
        assert!(matches!(
            letters[0].payload,
            ReconciliationTask::WalletCredit { amount, .. } if amount == Money::from_cents(40)
        ));
    }

    #[tokio::test]
    async fn repeated_key_returns_original_payment() {
        let h = harness();
        let (user, event) = (UserId::new(), EventId::new());

        let first = h.reconciler.settle(request(user, event, 2500, "k-4")).await.unwrap();
        let second = h.reconciler.settle(request(user, event, 2500, "k-4")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(h.gateway.charges().len(), 1);
        assert_eq!(h.reconciler.payments_for(user).len(), 1);
    }

    #[tokio::test]
    async fn concurrent_calls_with_one_key_charge_once() {
        let h = harness();
        let (user, event) = (UserId::new(), EventId::new());

        let calls = (0..8).map(|_| {
            let reconciler = Arc::clone(&h.reconciler);
            tokio::spawn(async move { reconciler.settle(request(user, event, 900, "k-5")).await })
        });
        let results = futures::future::join_all(calls).await;

        let ids: Vec<_> = results.into_iter().map(|r| r.unwrap().unwrap().id).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(h.gateway.charges().len(), 1);
    }

    #[tokio::test]
    async fn key_reuse_for_other_request_conflicts() {
        let h = harness();
        let user = UserId::new();
        h.reconciler.settle(request(user, EventId::new(), 100, "k-6")).await.unwrap();

        let err = h.reconciler.settle(request(user, EventId::new(), 100, "k-6")).await.unwrap_err();
        assert_eq!(err, PaymentError::IdempotencyConflict { key: "k-6".to_string() });
    }

    #[tokio::test]
    async fn failed_key_may_be_retried() {
        let h = harness();
        let (user, event) = (UserId::new(), EventId::new());
        h.gateway.decline_next(1);

        assert!(h.reconciler.settle(request(user, event, 100, "k-7")).await.is_err());
        let retried = h.reconciler.settle(request(user, event, 100, "k-7")).await.unwrap();
        assert_eq!(retried.status, PaymentStatus::Succeeded);
    }

    #[tokio::test]
    async fn wallet_only_short_balance_touches_nothing() {
        let h = harness();
        let user = UserId::new();
        h.wallet.deposit(user, Money::from_cents(10));

        let mut req = request(user, EventId::new(), 100, "k-8");
        req.intent.preference = PaymentPreference::WalletOnly;
        assert!(matches!(
            h.reconciler.settle(req).await,
            Err(PaymentError::InsufficientWalletBalance { .. })
        ));
        assert_eq!(h.wallet.balance_of(user), Money::from_cents(10));
        assert!(h.gateway.charges().is_empty());
    }

    #[tokio::test]
    async fn refund_returns_each_leg_to_its_source() {
        let h = harness();
        let user = UserId::new();
        h.wallet.deposit(user, Money::from_cents(40));
        let charge = h.reconciler.settle(request(user, EventId::new(), 100, "k-9")).await.unwrap();

        let refund = h.reconciler.refund(&charge).await;

        assert_eq!(refund.kind, PaymentKind::Refund);
        assert_eq!(refund.refund_of, Some(charge.id));
        assert_eq!(refund.status, PaymentStatus::Succeeded);
        assert_eq!(h.wallet.balance_of(user), Money::from_cents(40));
        assert_eq!(h.gateway.refunds()[0].1, Money::from_cents(60));
        assert_eq!(h.reconciler.payment(charge.id).unwrap().status, PaymentStatus::Succeeded);
    }

    #[tokio::test]
    async fn refunded_charge_retires_its_key() {
        let h = harness();
        let (user, event) = (UserId::new(), EventId::new());
        let charge = h.reconciler.settle(request(user, event, 100, "k-12")).await.unwrap();
        h.reconciler.refund(&charge).await;

        let err = h.reconciler.settle(request(user, event, 100, "k-12")).await.unwrap_err();

        assert_eq!(err, PaymentError::IdempotencyConflict { key: "k-12".to_string() });
        assert_eq!(h.gateway.charges().len(), 1);
        assert_eq!(h.reconciler.payments_for(user).len(), 2);
    }

    #[tokio::test]
    async fn refund_survives_transient_gateway_failure() {
        let h = harness();
        let user = UserId::new();
        let charge = h.reconciler.settle(request(user, EventId::new(), 100, "k-10")).await.unwrap();
        h.gateway.fail_next_refunds(2);

        let refund = h.reconciler.refund(&charge).await;
        assert_eq!(refund.status, PaymentStatus::Succeeded);
        assert!(h.reconciler.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn exhausted_refund_stays_pending() {
        let h = harness();
        let user = UserId::new();
        let charge = h.reconciler.settle(request(user, EventId::new(), 100, "k-11")).await.unwrap();
        h.gateway.fail_next_refunds(5);

        let refund = h.reconciler.refund(&charge).await;
        assert_eq!(refund.status, PaymentStatus::Pending);
        assert!(refund.failure_reason.is_some());
        assert_eq!(h.reconciler.dead_letters().len(), 1);
    }
}
