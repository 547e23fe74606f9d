//! Shared fixtures for engine-level tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use chrono::Duration;
use registrations::payment::{InMemoryWallet, MockPaymentGateway, PaymentReconciler};
use registrations::{Event, EventKind, Money, NewEvent, RegistrationEngine};
use rollcall_core::environment::Clock;
use rollcall_runtime::{InMemoryEventBus, RetryPolicy};
use rollcall_testing::{ManualClock, test_clock};
use std::sync::Arc;

/// Event price used throughout: 100.00
pub const PRICE: Money = Money::from_cents(10_000);

/// An engine wired to controllable collaborators.
pub struct Harness {
    pub engine: Arc<RegistrationEngine>,
    pub clock: ManualClock,
    pub wallet: Arc<InMemoryWallet>,
    pub gateway: MockPaymentGateway,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_gateway(MockPaymentGateway::new())
    }

    pub fn with_gateway(gateway: MockPaymentGateway) -> Self {
        rollcall_testing::init_test_tracing();
        let clock = ManualClock::starting_at(test_clock().now());
        let wallet = InMemoryWallet::shared();

        let retry = RetryPolicy::builder()
            .max_attempts(3)
            .initial_delay(std::time::Duration::from_millis(1))
            .max_delay(std::time::Duration::from_millis(5))
            .build();
        let reconciler = PaymentReconciler::new(wallet.clone(), Arc::new(gateway.clone()), Arc::new(clock.clone()))
            .with_retry_policy(retry);
        let engine = RegistrationEngine::new(
            Arc::new(clock.clone()),
            Arc::new(reconciler),
            Arc::new(InMemoryEventBus::new()),
        );

        Self {
            engine: Arc::new(engine),
            clock,
            wallet,
            gateway,
        }
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    /// A workshop starting `starts_in` from now.
    pub async fn event(&self, capacity: u32, starts_in: Duration) -> Event {
        let starts_at = self.now() + starts_in;
        self.engine
            .create_event(NewEvent {
                name: "Robotics Workshop".to_string(),
                kind: EventKind::Workshop,
                capacity,
                price: PRICE,
                starts_at,
                ends_at: starts_at + Duration::hours(3),
                registration_deadline: None,
                allowed_users: Vec::new(),
            })
            .await
            .expect("valid event")
    }
}
