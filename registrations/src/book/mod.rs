//! Per-event registration book.
//!
//! One [`BookReducer`] step is one critical section for one event: the capacity
//! ledger and the waitlist change together or not at all. Payments run as effects
//! outside the step; their results come back as [`BookAction::SettlementCompleted`]
//! or [`BookAction::SettlementFailed`] and are applied in a later step.
//!
//! A few rules hold for every step:
//!
//! - Overdue promotions are expired first, before the command looks at capacity.
//! - Whenever capacity is released, the head of the waitlist is promoted in the
//!   same step, so no direct registration can claim a slot a waiting user is owed.
//! - Rejections never mutate state.

mod actions;
mod environment;
mod state;

pub use actions::{BookAction, Reply, SettlementPath};
pub use environment::{BookEnvironment, DEFAULT_PAYMENT_WINDOW_DAYS};
pub use state::{EventBook, Settlement};

use crate::error::RegistrationError;
use crate::ledger::Reservation;
use crate::notifications::Notice;
use crate::payment::SettlementRequest;
use crate::types::{
    CorrelationId, EventPatch, Payment, PaymentIntent, Registration, RegistrationId,
    RegistrationSource, RegistrationStatus, UserId,
};
use crate::waitlist::WaitlistState;
use chrono::{DateTime, Utc};
use rollcall_core::{effect::Effect, reducer::Reducer};
use smallvec::{SmallVec, smallvec};
use std::sync::Arc;

/// Work in progress for one reducer step.
struct Step<'a> {
    env: &'a BookEnvironment,
    now: DateTime<Utc>,
    notices: Vec<Notice>,
}

/// Reducer for one event's registrations and waitlist.
#[derive(Clone, Copy, Debug, Default)]
pub struct BookReducer;

impl BookReducer {
    /// Creates a new `BookReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn reply(correlation: CorrelationId, outcome: Result<Reply, RegistrationError>) -> Effect<BookAction> {
        Effect::dispatch(BookAction::Replied { correlation, outcome })
    }

    fn reject(correlation: CorrelationId, error: RegistrationError) -> Effect<BookAction> {
        tracing::debug!(%correlation, code = error.code(), "Request rejected");
        Self::reply(correlation, Err(error))
    }

    // ========== Capacity release and promotion ==========

    /// Give freed slots to the head of the waitlist, then announce what is left.
    fn capacity_freed(book: &mut EventBook, step: &mut Step<'_>) {
        Self::promote_waiting(book, step);
        step.notices.push(Notice::CapacityFreed {
            event_id: book.event.id,
            spots_left: book.ledger.available(),
        });
    }

    fn promote_waiting(book: &mut EventBook, step: &mut Step<'_>) {
        while book.ledger.available() > 0 {
            let Some(entry) = book.waitlist.promote_next(step.now, step.env.payment_window) else {
                break;
            };
            let user_id = entry.user_id;
            let payment_deadline = entry
                .payment_deadline
                .unwrap_or(step.now + step.env.payment_window);

            if !book.ledger.hold_for_promotion() {
                tracing::error!(event_id = %book.event.id, %user_id, "Promoted without a free slot");
            }
            metrics::counter!("waitlist.promoted").increment(1);
            tracing::info!(event_id = %book.event.id, %user_id, %payment_deadline, "Waitlist entry promoted");
            step.notices.push(Notice::WaitlistPromoted {
                event_id: book.event.id,
                user_id,
                payment_deadline,
            });
        }
    }

    fn expire_overdue(book: &mut EventBook, step: &mut Step<'_>) {
        let expired = book.waitlist.expire_overdue(step.now);
        if expired.is_empty() {
            return;
        }

        for user_id in expired {
            book.ledger.release_promotion();
            metrics::counter!("waitlist.expired").increment(1);
            tracing::info!(event_id = %book.event.id, %user_id, "Payment deadline passed, promotion expired");
            step.notices.push(Notice::WaitlistExpired {
                event_id: book.event.id,
                user_id,
            });
        }
        Self::capacity_freed(book, step);
    }

    fn settle(
        book: &EventBook,
        env: &BookEnvironment,
        correlation: CorrelationId,
        user_id: UserId,
        intent: PaymentIntent,
        path: SettlementPath,
    ) -> Effect<BookAction> {
        let request = SettlementRequest {
            user_id,
            event_id: book.event.id,
            amount: book.event.price,
            intent,
        };
        let reconciler = Arc::clone(&env.reconciler);

        Effect::Future(Box::pin(async move {
            let action = match reconciler.settle(request).await {
                Ok(payment) => BookAction::SettlementCompleted {
                    correlation,
                    user_id,
                    path,
                    payment,
                },
                Err(error) => BookAction::SettlementFailed {
                    correlation,
                    user_id,
                    path,
                    error: error.into(),
                },
            };
            Some(action)
        }))
    }

    // ========== Commands ==========

    fn register(
        book: &mut EventBook,
        step: &Step<'_>,
        correlation: CorrelationId,
        user_id: UserId,
        intent: PaymentIntent,
    ) -> Effect<BookAction> {
        match book.settlement(user_id).map(|s| s.path) {
            Some(SettlementPath::Direct) => return Self::reject(correlation, RegistrationError::AlreadyRegistered),
            Some(SettlementPath::Waitlist) => {
                return Self::reject(correlation, RegistrationError::SettlementInProgress);
            },
            None => {},
        }
        if book.confirmed_registration(user_id).is_some() {
            return Self::reject(correlation, RegistrationError::AlreadyRegistered);
        }
        if let Err(reason) = book.event.check_open(user_id, step.now) {
            return Self::reject(correlation, RegistrationError::RegistrationClosed(reason));
        }
        if book.ledger.try_reserve() == Reservation::Full {
            return Self::reject(correlation, RegistrationError::EventFull);
        }

        book.begin_settlement(
            user_id,
            Settlement {
                correlation,
                path: SettlementPath::Direct,
            },
        );
        tracing::debug!(event_id = %book.event.id, %user_id, "Slot reserved, settling payment");
        Self::settle(book, step.env, correlation, user_id, intent, SettlementPath::Direct)
    }

    fn cancel(
        book: &mut EventBook,
        step: &mut Step<'_>,
        correlation: CorrelationId,
        user_id: UserId,
    ) -> Effect<BookAction> {
        if book.confirmed_registration(user_id).is_none() {
            return Self::reject(correlation, RegistrationError::NotRegistered);
        }
        let policy = step.env.refund_policy;
        if !policy.is_refundable(book.event.starts_at, step.now) {
            return Self::reject(
                correlation,
                RegistrationError::RefundWindowClosed {
                    days: policy.window().num_days(),
                },
            );
        }
        let Some(registration) = book.confirmed_registration_mut(user_id) else {
            return Self::reject(correlation, RegistrationError::NotRegistered);
        };

        registration.status = RegistrationStatus::Cancelled;
        registration.cancelled_at = Some(step.now);
        let registration = registration.clone();
        book.ledger.release();

        metrics::counter!("registrations.cancelled").increment(1);
        tracing::info!(event_id = %book.event.id, %user_id, registration_id = %registration.id, "Registration cancelled");
        step.notices.push(Notice::RegistrationCancelled {
            event_id: book.event.id,
            user_id,
            registration_id: registration.id,
        });
        Self::capacity_freed(book, step);

        let Some(charge) = book.charge(registration.payment_id).cloned() else {
            tracing::error!(registration_id = %registration.id, "No charge on record, nothing to refund");
            return Self::reply(
                correlation,
                Ok(Reply::Cancelled {
                    registration,
                    refund: None,
                }),
            );
        };

        let reconciler = Arc::clone(&step.env.reconciler);
        let registration_id = registration.id;
        Effect::Future(Box::pin(async move {
            let refund = reconciler.refund(&charge).await;
            Some(BookAction::RefundIssued {
                correlation,
                user_id,
                registration_id,
                refund,
            })
        }))
    }

    fn join_waitlist(
        book: &mut EventBook,
        step: &Step<'_>,
        correlation: CorrelationId,
        user_id: UserId,
    ) -> Effect<BookAction> {
        if let Err(reason) = book.event.check_open(user_id, step.now) {
            return Self::reject(correlation, RegistrationError::RegistrationClosed(reason));
        }
        let settling_directly = book
            .settlement(user_id)
            .is_some_and(|s| s.path == SettlementPath::Direct);
        if settling_directly || book.confirmed_registration(user_id).is_some() {
            return Self::reject(correlation, RegistrationError::AlreadyRegistered);
        }
        if book.ledger.available() > 0 {
            return Self::reject(correlation, RegistrationError::EventNotFull);
        }
        if let Err(error) = book.waitlist.join(user_id, book.event.id, step.now) {
            return Self::reject(correlation, error.into());
        }

        let Some(view) = book.waitlist.status_view(user_id) else {
            return Self::reject(correlation, RegistrationError::NotWaitlisted);
        };
        tracing::info!(event_id = %book.event.id, %user_id, position = view.position, "Joined waitlist");
        Self::reply(correlation, Ok(Reply::Waitlisted(view)))
    }

    fn leave_waitlist(
        book: &mut EventBook,
        step: &mut Step<'_>,
        correlation: CorrelationId,
        user_id: UserId,
    ) -> Effect<BookAction> {
        let Some(entry) = book.waitlist.active(user_id) else {
            return Self::reject(correlation, RegistrationError::NotWaitlisted);
        };
        if entry.settling {
            return Self::reject(correlation, RegistrationError::SettlementInProgress);
        }

        let previous = match book.waitlist.withdraw(user_id, step.now) {
            Ok(previous) => previous,
            Err(error) => return Self::reject(correlation, error.into()),
        };
        tracing::info!(event_id = %book.event.id, %user_id, %previous, "Left waitlist");
        if previous == WaitlistState::PendingPayment {
            book.ledger.release_promotion();
            Self::capacity_freed(book, step);
        }

        match book.waitlist.status_view(user_id) {
            Some(view) => Self::reply(correlation, Ok(Reply::LeftWaitlist(view))),
            None => Self::reject(correlation, RegistrationError::NotWaitlisted),
        }
    }

    fn pay_waitlist(
        book: &mut EventBook,
        step: &Step<'_>,
        correlation: CorrelationId,
        user_id: UserId,
        intent: PaymentIntent,
    ) -> Effect<BookAction> {
        let Some(entry) = book.waitlist.active(user_id) else {
            return Self::reject(correlation, RegistrationError::NotWaitlisted);
        };
        if entry.status == WaitlistState::Queued {
            return Self::reject(correlation, RegistrationError::PaymentNotDue);
        }
        if entry.settling {
            return Self::reject(correlation, RegistrationError::SettlementInProgress);
        }

        book.waitlist.set_settling(user_id, true);
        book.begin_settlement(
            user_id,
            Settlement {
                correlation,
                path: SettlementPath::Waitlist,
            },
        );
        tracing::debug!(event_id = %book.event.id, %user_id, "Settling payment for promoted entry");
        Self::settle(book, step.env, correlation, user_id, intent, SettlementPath::Waitlist)
    }

    fn update(book: &mut EventBook, correlation: CorrelationId, patch: EventPatch) -> Effect<BookAction> {
        if let Some(archived) = patch.archived {
            book.event.archived = archived;
        }
        if let Some(allowed_users) = patch.allowed_users {
            book.event.allowed_users = allowed_users;
        }
        tracing::info!(
            event_id = %book.event.id,
            archived = book.event.archived,
            allowed_users = book.event.allowed_users.len(),
            "Event updated"
        );
        Self::reply(correlation, Ok(Reply::Updated(book.event.clone())))
    }

    // ========== Effect results ==========

    fn settlement_completed(
        book: &mut EventBook,
        step: &mut Step<'_>,
        correlation: CorrelationId,
        user_id: UserId,
        path: SettlementPath,
        payment: Payment,
    ) -> Effect<BookAction> {
        if book.end_settlement(user_id).is_none() {
            tracing::warn!(%correlation, %user_id, "Settlement result without a pending settlement");
        }
        if book.backs_registration(payment.id) {
            tracing::error!(%user_id, payment_id = %payment.id, "Payment already backs a registration");
            let key = payment.idempotency_key.unwrap_or_default();
            return Self::settlement_failed(
                book,
                step,
                correlation,
                user_id,
                path,
                RegistrationError::IdempotencyConflict { key },
            );
        }

        let source = match path {
            SettlementPath::Direct => {
                book.ledger.confirm_reserved();
                RegistrationSource::Direct
            },
            SettlementPath::Waitlist => {
                if let Err(error) = book.waitlist.convert(user_id, step.now) {
                    tracing::error!(%user_id, %error, payment_id = %payment.id, "Paid entry could not convert, refunding");
                    let reconciler = Arc::clone(&step.env.reconciler);
                    return Effect::Future(Box::pin(async move {
                        reconciler.refund(&payment).await;
                        Some(BookAction::Replied {
                            correlation,
                            outcome: Err(RegistrationError::NotWaitlisted),
                        })
                    }));
                }
                book.ledger.confirm_promotion();
                RegistrationSource::Waitlist
            },
        };

        let registration = Registration {
            id: RegistrationId::new(),
            user_id,
            event_id: book.event.id,
            status: RegistrationStatus::Confirmed,
            source,
            payment_id: payment.id,
            created_at: step.now,
            cancelled_at: None,
            refund_payment_id: None,
        };
        book.registrations.push(registration.clone());
        book.record_charge(payment.clone());

        metrics::counter!("registrations.confirmed").increment(1);
        tracing::info!(
            event_id = %book.event.id,
            %user_id,
            registration_id = %registration.id,
            ?source,
            "Registration confirmed"
        );
        step.notices.push(Notice::RegistrationConfirmed {
            event_id: book.event.id,
            user_id,
            registration_id: registration.id,
        });

        match path {
            SettlementPath::Direct => {
                // A direct registration supersedes the user's own waitlist entry
                if book.waitlist.withdraw(user_id, step.now) == Ok(WaitlistState::PendingPayment) {
                    book.ledger.release_promotion();
                    Self::capacity_freed(book, step);
                }
                Self::reply(correlation, Ok(Reply::Registered { registration, payment }))
            },
            SettlementPath::Waitlist => Self::reply(correlation, Ok(Reply::Converted { registration, payment })),
        }
    }

    fn settlement_failed(
        book: &mut EventBook,
        step: &mut Step<'_>,
        correlation: CorrelationId,
        user_id: UserId,
        path: SettlementPath,
        error: RegistrationError,
    ) -> Effect<BookAction> {
        book.end_settlement(user_id);
        tracing::info!(event_id = %book.event.id, %user_id, ?path, code = error.code(), "Settlement failed");

        match path {
            SettlementPath::Direct => {
                book.ledger.abort_reserved();
                Self::capacity_freed(book, step);
            },
            SettlementPath::Waitlist => {
                // The entry keeps its slot until the deadline
                book.waitlist.set_settling(user_id, false);
                Self::expire_overdue(book, step);
            },
        }
        Self::reply(correlation, Err(error))
    }

    fn refund_issued(
        book: &mut EventBook,
        correlation: CorrelationId,
        registration_id: RegistrationId,
        refund: Payment,
    ) -> Effect<BookAction> {
        let Some(registration) = book.registrations.iter_mut().find(|r| r.id == registration_id) else {
            tracing::error!(%registration_id, "Refund for an unknown registration");
            return Self::reject(correlation, RegistrationError::NotRegistered);
        };
        registration.refund_payment_id = Some(refund.id);
        let registration = registration.clone();
        Self::reply(
            correlation,
            Ok(Reply::Cancelled {
                registration,
                refund: Some(refund),
            }),
        )
    }
}

impl Reducer for BookReducer {
    type State = EventBook;
    type Action = BookAction;
    type Environment = BookEnvironment;

    fn reduce(
        &self,
        book: &mut EventBook,
        action: BookAction,
        env: &BookEnvironment,
    ) -> SmallVec<[Effect<BookAction>; 4]> {
        if matches!(action, BookAction::Replied { .. }) {
            return SmallVec::new();
        }

        let mut step = Step {
            env,
            now: env.clock.now(),
            notices: Vec::new(),
        };
        Self::expire_overdue(book, &mut step);

        let mut effects: SmallVec<[Effect<BookAction>; 4]> = match action {
            BookAction::Register {
                correlation,
                user_id,
                intent,
            } => smallvec![Self::register(book, &step, correlation, user_id, intent)],
            BookAction::Cancel { correlation, user_id } => {
                smallvec![Self::cancel(book, &mut step, correlation, user_id)]
            },
            BookAction::JoinWaitlist { correlation, user_id } => {
                smallvec![Self::join_waitlist(book, &step, correlation, user_id)]
            },
            BookAction::LeaveWaitlist { correlation, user_id } => {
                smallvec![Self::leave_waitlist(book, &mut step, correlation, user_id)]
            },
            BookAction::PayWaitlist {
                correlation,
                user_id,
                intent,
            } => smallvec![Self::pay_waitlist(book, &step, correlation, user_id, intent)],
            BookAction::Update { correlation, patch } => smallvec![Self::update(book, correlation, patch)],
            BookAction::ExpireOverdue | BookAction::Replied { .. } => SmallVec::new(),
            BookAction::SettlementCompleted {
                correlation,
                user_id,
                path,
                payment,
            } => smallvec![Self::settlement_completed(book, &mut step, correlation, user_id, path, payment)],
            BookAction::SettlementFailed {
                correlation,
                user_id,
                path,
                error,
            } => smallvec![Self::settlement_failed(book, &mut step, correlation, user_id, path, error)],
            BookAction::RefundIssued {
                correlation,
                registration_id,
                refund,
                ..
            } => smallvec![Self::refund_issued(book, correlation, registration_id, refund)],
        };

        if !step.notices.is_empty() {
            let notifier = env.notifier.clone();
            let notices = step.notices;
            effects.push(Effect::Future(Box::pin(async move {
                notifier.publish(notices).await;
                None
            })));
        }
        effects
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::notifications::Notifier;
    use crate::payment::{InMemoryWallet, MockPaymentGateway, PaymentReconciler, WalletLedger};
    use crate::types::{
        ClosedReason, Event, EventId, EventKind, Money, PaymentKind, PaymentMethod, PaymentStatus, TransactionId,
    };
    use chrono::Duration;
    use rollcall_runtime::InMemoryEventBus;
    use rollcall_testing::{ManualClock, ReducerTest, assertions, test_clock};
    use rollcall_core::environment::Clock;

    fn clock() -> ManualClock {
        ManualClock::starting_at(test_clock().now())
    }

    fn env(clock: &ManualClock) -> BookEnvironment {
        let wallet: Arc<dyn WalletLedger> = InMemoryWallet::shared();
        let reconciler = PaymentReconciler::new(wallet, MockPaymentGateway::shared(), Arc::new(clock.clone()));
        BookEnvironment::new(
            Arc::new(clock.clone()),
            Arc::new(reconciler),
            Notifier::new(Arc::new(InMemoryEventBus::new())),
        )
    }

    fn book(capacity: u32, starts_in: Duration) -> EventBook {
        let now = test_clock().now();
        EventBook::new(Event {
            id: EventId::new(),
            name: "Intro to Embedded Rust".to_string(),
            kind: EventKind::Workshop,
            capacity,
            price: Money::from_cents(1000),
            starts_at: now + starts_in,
            ends_at: now + starts_in + Duration::hours(2),
            registration_deadline: None,
            archived: false,
            allowed_users: Vec::new(),
            created_at: now,
        })
    }

    fn charge(book: &EventBook, user_id: UserId) -> Payment {
        Payment {
            id: crate::types::PaymentId::new(),
            event_id: book.event.id,
            user_id,
            kind: PaymentKind::Charge,
            total: book.event.price,
            wallet_amount: Money::ZERO,
            gateway_amount: book.event.price,
            method: PaymentMethod::Gateway,
            transaction_id: TransactionId::new(),
            status: PaymentStatus::Succeeded,
            idempotency_key: Some(format!("key-{user_id}")),
            gateway_reference: Some("mock_ch_test".to_string()),
            receipt_url: None,
            refund_of: None,
            failure_reason: None,
            created_at: test_clock().now(),
        }
    }

    fn register(user_id: UserId) -> BookAction {
        BookAction::Register {
            correlation: CorrelationId::new(),
            user_id,
            intent: PaymentIntent::new(format!("key-{user_id}")),
        }
    }

    fn settled(book: &EventBook, user_id: UserId, path: SettlementPath) -> BookAction {
        BookAction::SettlementCompleted {
            correlation: CorrelationId::new(),
            user_id,
            path,
            payment: charge(book, user_id),
        }
    }

    fn join(user_id: UserId) -> BookAction {
        BookAction::JoinWaitlist {
            correlation: CorrelationId::new(),
            user_id,
        }
    }

    fn cancel(user_id: UserId) -> BookAction {
        BookAction::Cancel {
            correlation: CorrelationId::new(),
            user_id,
        }
    }

    /// Book with `registered` confirmed users and `queued` users on the waitlist.
    fn full_book(registered: &[UserId], queued: &[UserId], env: &BookEnvironment) -> EventBook {
        let reducer = BookReducer::new();
        let capacity = u32::try_from(registered.len()).unwrap();
        let mut state = book(capacity, Duration::days(30));
        for user in registered {
            reducer.reduce(&mut state, register(*user), env);
            let done = settled(&state, *user, SettlementPath::Direct);
            reducer.reduce(&mut state, done, env);
        }
        for user in queued {
            reducer.reduce(&mut state, join(*user), env);
        }
        state
    }

    fn outcome(effects: &[Effect<BookAction>]) -> Result<Reply, RegistrationError> {
        match assertions::dispatched(effects).as_slice() {
            [BookAction::Replied { outcome, .. }] => outcome.clone(),
            other => panic!("expected exactly one reply, got {other:?}"),
        }
    }

    #[test]
    fn register_holds_a_slot_while_payment_settles() {
        let clock = clock();
        let user = UserId::new();

        ReducerTest::new(BookReducer::new())
            .with_env(env(&clock))
            .given_state(book(2, Duration::days(30)))
            .when_action(register(user))
            .then_state(move |book| {
                assert_eq!(book.ledger.held_for_settlement(), 1);
                assert_eq!(book.ledger.available(), 1);
                assert_eq!(book.settlement(user).map(|s| s.path), Some(SettlementPath::Direct));
            })
            .then_effects(|effects| {
                assertions::assert_has_future_effect(effects);
                assert!(assertions::dispatched(effects).is_empty());
            })
            .run();
    }

    #[test]
    fn last_slot_goes_to_exactly_one_caller() {
        let clock = clock();
        let (a, b) = (UserId::new(), UserId::new());

        ReducerTest::new(BookReducer::new())
            .with_env(env(&clock))
            .given_state(book(1, Duration::days(30)))
            .given_actions(vec![register(a)])
            .when_action(register(b))
            .then_state(|book| assert_eq!(book.ledger.held_for_settlement(), 1))
            .then_effects(|effects| assert_eq!(outcome(effects), Err(RegistrationError::EventFull)))
            .run();
    }

    #[test]
    fn settlement_confirms_registration() {
        let clock = clock();
        let env = env(&clock);
        let user = UserId::new();
        let mut state = book(1, Duration::days(30));
        BookReducer.reduce(&mut state, register(user), &env);
        let done = settled(&state, user, SettlementPath::Direct);

        let effects = BookReducer.reduce(&mut state, done, &env);

        assert!(matches!(outcome(&effects), Ok(Reply::Registered { .. })));
        assert_eq!(state.ledger.confirmed(), 1);
        assert_eq!(state.ledger.held_for_settlement(), 0);
        assert!(state.confirmed_registration(user).is_some());
        assertions::assert_has_future_effect(&effects);
    }

    #[test]
    fn second_registration_is_rejected_while_first_settles_or_after() {
        let clock = clock();
        let env = env(&clock);
        let user = UserId::new();
        let mut state = book(5, Duration::days(30));
        BookReducer.reduce(&mut state, register(user), &env);

        let effects = BookReducer.reduce(&mut state, register(user), &env);
        assert_eq!(outcome(&effects), Err(RegistrationError::AlreadyRegistered));

        let done = settled(&state, user, SettlementPath::Direct);
        BookReducer.reduce(&mut state, done, &env);
        let effects = BookReducer.reduce(&mut state, register(user), &env);
        assert_eq!(outcome(&effects), Err(RegistrationError::AlreadyRegistered));
        assert_eq!(state.registrations.len(), 1);
    }

    #[test]
    fn payment_backing_an_earlier_registration_is_refused() {
        let clock = clock();
        let env = env(&clock);
        let user = UserId::new();
        let mut state = full_book(&[user], &[], &env);
        let spent = state.charge(state.registrations[0].payment_id).cloned().unwrap();
        BookReducer.reduce(&mut state, cancel(user), &env);
        let correlation = CorrelationId::new();
        BookReducer.reduce(
            &mut state,
            BookAction::Register {
                correlation,
                user_id: user,
                intent: PaymentIntent::new(format!("key-{user}")),
            },
            &env,
        );

        let effects = BookReducer.reduce(
            &mut state,
            BookAction::SettlementCompleted {
                correlation,
                user_id: user,
                path: SettlementPath::Direct,
                payment: spent,
            },
            &env,
        );

        assert_eq!(
            outcome(&effects),
            Err(RegistrationError::IdempotencyConflict {
                key: format!("key-{user}")
            })
        );
        assert_eq!(state.registrations.len(), 1);
        assert!(state.confirmed_registration(user).is_none());
        assert_eq!(state.ledger.confirmed(), 0);
        assert_eq!(state.ledger.held_for_settlement(), 0);
        assert_eq!(state.ledger.available(), 1);
    }

    #[test]
    fn archived_event_refuses_registration_and_waitlist() {
        let clock = clock();
        let mut state = book(1, Duration::days(30));
        state.event.archived = true;
        let user = UserId::new();

        ReducerTest::new(BookReducer::new())
            .with_env(env(&clock))
            .given_state(state)
            .given_actions(vec![register(user)])
            .when_action(join(user))
            .then_state(|book| assert_eq!(book.ledger.available(), 1))
            .then_effects(|effects| {
                assert_eq!(
                    outcome(effects),
                    Err(RegistrationError::RegistrationClosed(ClosedReason::Archived))
                );
            })
            .run();
    }

    #[test]
    fn failed_settlement_releases_slot_to_the_waitlist() {
        let clock = clock();
        let env = env(&clock);
        let (a, b) = (UserId::new(), UserId::new());
        let mut state = book(1, Duration::days(30));
        let correlation = CorrelationId::new();
        BookReducer.reduce(
            &mut state,
            BookAction::Register {
                correlation,
                user_id: a,
                intent: PaymentIntent::new("a"),
            },
            &env,
        );
        BookReducer.reduce(&mut state, join(b), &env);

        let effects = BookReducer.reduce(
            &mut state,
            BookAction::SettlementFailed {
                correlation,
                user_id: a,
                path: SettlementPath::Direct,
                error: RegistrationError::PaymentFailed {
                    reason: "card declined".to_string(),
                },
            },
            &env,
        );

        assert!(matches!(outcome(&effects), Err(RegistrationError::PaymentFailed { .. })));
        assert_eq!(state.ledger.held_for_settlement(), 0);
        assert_eq!(state.ledger.held_for_promotion(), 1);
        assert_eq!(state.waitlist.active(b).unwrap().status, WaitlistState::PendingPayment);
        assert!(state.confirmed_registration(a).is_none());
    }

    #[test]
    fn waitlist_join_requires_a_full_event() {
        let clock = clock();
        let env = env(&clock);
        let user = UserId::new();

        let effects = BookReducer.reduce(&mut book(3, Duration::days(30)), join(user), &env);
        assert_eq!(outcome(&effects), Err(RegistrationError::EventNotFull));

        let mut state = full_book(&[UserId::new()], &[user], &env);
        assert_eq!(state.waitlist.position(user), Some(1));
        let effects = BookReducer.reduce(&mut state, join(user), &env);
        assert_eq!(outcome(&effects), Err(RegistrationError::AlreadyWaitlisted));
    }

    #[test]
    fn cancellation_inside_refund_window_changes_nothing() {
        let clock = clock();
        let env = env(&clock);
        let a = UserId::new();
        let mut state = full_book(&[a], &[UserId::new()], &env);
        clock.advance(Duration::days(17));

        let effects = BookReducer.reduce(&mut state, cancel(a), &env);

        assert_eq!(outcome(&effects), Err(RegistrationError::RefundWindowClosed { days: 14 }));
        assert_eq!(state.ledger.confirmed(), 1);
        assert_eq!(state.waitlist.queued_len(), 1);
        assertions::assert_no_async_effects(&effects);
    }

    #[test]
    fn cancellation_promotes_the_head_of_the_queue() {
        let clock = clock();
        let env = env(&clock);
        let (a, b, c) = (UserId::new(), UserId::new(), UserId::new());
        let mut state = full_book(&[a], &[b, c], &env);
        clock.advance(Duration::days(10));

        let effects = BookReducer.reduce(&mut state, cancel(a), &env);

        assertions::assert_has_future_effect(&effects);
        let promoted = state.waitlist.active(b).unwrap();
        assert_eq!(promoted.status, WaitlistState::PendingPayment);
        assert_eq!(promoted.payment_deadline, Some(clock.now() + Duration::days(3)));
        assert_eq!(state.waitlist.position(c), Some(1));
        assert_eq!(state.ledger.confirmed(), 0);
        assert_eq!(state.ledger.available(), 0);
        assert_eq!(
            state.registrations[0].status,
            RegistrationStatus::Cancelled
        );
    }

    #[test]
    fn refund_result_links_refund_and_replies() {
        let clock = clock();
        let env = env(&clock);
        let a = UserId::new();
        let mut state = full_book(&[a], &[], &env);
        let registration_id = state.registrations[0].id;
        BookReducer.reduce(&mut state, cancel(a), &env);
        let mut refund = charge(&state, a);
        refund.kind = PaymentKind::Refund;

        let effects = BookReducer.reduce(
            &mut state,
            BookAction::RefundIssued {
                correlation: CorrelationId::new(),
                user_id: a,
                registration_id,
                refund: refund.clone(),
            },
            &env,
        );

        let Ok(Reply::Cancelled { registration, refund: Some(linked) }) = outcome(&effects) else {
            panic!("expected a cancellation reply");
        };
        assert_eq!(linked, refund);
        assert_eq!(registration.refund_payment_id, Some(refund.id));
    }

    #[test]
    fn overdue_promotion_expires_and_next_in_line_is_promoted() {
        let clock = clock();
        let env = env(&clock);
        let (a, b, c) = (UserId::new(), UserId::new(), UserId::new());
        let mut state = full_book(&[a], &[b, c], &env);
        BookReducer.reduce(&mut state, cancel(a), &env);

        clock.advance(Duration::days(3));
        BookReducer.reduce(&mut state, BookAction::ExpireOverdue, &env);
        assert_eq!(state.waitlist.active(b).unwrap().status, WaitlistState::PendingPayment);

        clock.advance(Duration::seconds(1));
        let effects = BookReducer.reduce(&mut state, BookAction::ExpireOverdue, &env);

        assertions::assert_has_future_effect(&effects);
        assert_eq!(state.waitlist.latest(b).unwrap().status, WaitlistState::Expired);
        assert_eq!(state.waitlist.active(c).unwrap().status, WaitlistState::PendingPayment);
        assert_eq!(state.ledger.held_for_promotion(), 1);

        let effects = BookReducer.reduce(&mut state, join(b), &env);
        assert!(matches!(outcome(&effects), Ok(Reply::Waitlisted(view)) if view.position == 1));
    }

    #[test]
    fn paying_for_a_queued_entry_is_refused() {
        let clock = clock();
        let env = env(&clock);
        let b = UserId::new();
        let mut state = full_book(&[UserId::new()], &[b], &env);

        let effects = BookReducer.reduce(
            &mut state,
            BookAction::PayWaitlist {
                correlation: CorrelationId::new(),
                user_id: b,
                intent: PaymentIntent::new("b"),
            },
            &env,
        );
        assert_eq!(outcome(&effects), Err(RegistrationError::PaymentNotDue));
    }

    #[test]
    fn paid_promotion_converts_into_a_registration() {
        let clock = clock();
        let env = env(&clock);
        let (a, b) = (UserId::new(), UserId::new());
        let mut state = full_book(&[a], &[b], &env);
        BookReducer.reduce(&mut state, cancel(a), &env);
        BookReducer.reduce(
            &mut state,
            BookAction::PayWaitlist {
                correlation: CorrelationId::new(),
                user_id: b,
                intent: PaymentIntent::new("b"),
            },
            &env,
        );
        assert!(state.waitlist.active(b).unwrap().settling);

        let done = settled(&state, b, SettlementPath::Waitlist);
        let effects = BookReducer.reduce(&mut state, done, &env);

        let Ok(Reply::Converted { registration, .. }) = outcome(&effects) else {
            panic!("expected conversion");
        };
        assert_eq!(registration.source, RegistrationSource::Waitlist);
        assert_eq!(state.waitlist.latest(b).unwrap().status, WaitlistState::Converted);
        assert_eq!(state.ledger.confirmed(), 1);
        assert_eq!(state.ledger.held_for_promotion(), 0);
    }

    #[test]
    fn settling_entry_outlives_its_deadline_until_payment_resolves() {
        let clock = clock();
        let env = env(&clock);
        let (a, b) = (UserId::new(), UserId::new());
        let mut state = full_book(&[a], &[b], &env);
        BookReducer.reduce(&mut state, cancel(a), &env);
        let correlation = CorrelationId::new();
        BookReducer.reduce(
            &mut state,
            BookAction::PayWaitlist {
                correlation,
                user_id: b,
                intent: PaymentIntent::new("b"),
            },
            &env,
        );

        clock.advance(Duration::days(4));
        BookReducer.reduce(&mut state, BookAction::ExpireOverdue, &env);
        assert_eq!(state.waitlist.active(b).unwrap().status, WaitlistState::PendingPayment);

        BookReducer.reduce(
            &mut state,
            BookAction::SettlementFailed {
                correlation,
                user_id: b,
                path: SettlementPath::Waitlist,
                error: RegistrationError::PaymentFailed {
                    reason: "declined".to_string(),
                },
            },
            &env,
        );
        assert_eq!(state.waitlist.latest(b).unwrap().status, WaitlistState::Expired);
        assert_eq!(state.ledger.available(), 1);
    }

    #[test]
    fn leaving_a_promoted_entry_hands_the_slot_on() {
        let clock = clock();
        let env = env(&clock);
        let (a, b, c) = (UserId::new(), UserId::new(), UserId::new());
        let mut state = full_book(&[a], &[b, c], &env);
        BookReducer.reduce(&mut state, cancel(a), &env);

        let effects = BookReducer.reduce(
            &mut state,
            BookAction::LeaveWaitlist {
                correlation: CorrelationId::new(),
                user_id: b,
            },
            &env,
        );

        assert!(matches!(
            outcome(&effects),
            Ok(Reply::LeftWaitlist(view)) if view.status == WaitlistState::Withdrawn
        ));
        assert_eq!(state.waitlist.active(c).unwrap().status, WaitlistState::PendingPayment);
        assert_eq!(state.ledger.held_for_promotion(), 1);
    }

    #[test]
    fn restricting_the_event_applies_to_new_requests() {
        let clock = clock();
        let invited = UserId::new();

        ReducerTest::new(BookReducer::new())
            .with_env(env(&clock))
            .given_state(book(2, Duration::days(30)))
            .given_actions(vec![BookAction::Update {
                correlation: CorrelationId::new(),
                patch: EventPatch {
                    archived: None,
                    allowed_users: Some(vec![invited]),
                },
            }])
            .when_action(register(UserId::new()))
            .then_effects(|effects| {
                assert_eq!(
                    outcome(effects),
                    Err(RegistrationError::RegistrationClosed(ClosedReason::Restricted))
                );
            })
            .run();
    }
}
