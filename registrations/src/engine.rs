//! The registration engine.
//!
//! Owns one [`BookStore`] per event. Each store serializes every command for its
//! event, so operations on one event are totally ordered while different events
//! proceed in parallel. Requests are answered by waiting for the store to broadcast
//! the [`BookAction::Replied`] carrying the request's correlation id.

use crate::book::{BookAction, BookEnvironment, BookReducer, EventBook, Reply};
use crate::config::Config;
use crate::error::RegistrationError;
use crate::notifications::Notifier;
use crate::payment::{PaymentGateway, PaymentReconciler, ReconciliationTask, WalletLedger};
use crate::refund::RefundPolicy;
use crate::types::{
    CorrelationId, Event, EventId, EventPatch, EventSummary, NewEvent, Payment, PaymentIntent, Registration,
    UserId,
};
use crate::waitlist::WaitlistStatusView;
use rollcall_core::environment::Clock;
use rollcall_core::event_bus::{EventBus, EventBusError, EventStream};
use rollcall_runtime::metrics::RegistrationMetrics;
use rollcall_runtime::{DeadLetter, InMemoryEventBus, Store, StoreConfig, StoreError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Store running one event's book
pub type BookStore = Store<EventBook, BookAction, BookEnvironment, BookReducer>;

/// Default time a request waits for its event to answer
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Entry point for every registration operation.
pub struct RegistrationEngine {
    books: RwLock<HashMap<EventId, Arc<BookStore>>>,
    environment: BookEnvironment,
    bus: Arc<InMemoryEventBus>,
    store_config: StoreConfig,
    request_timeout: Duration,
}

impl RegistrationEngine {
    /// Engine with default windows, store settings and request timeout
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, reconciler: Arc<PaymentReconciler>, bus: Arc<InMemoryEventBus>) -> Self {
        let notifier = Notifier::new(Arc::clone(&bus) as Arc<dyn EventBus>);
        Self {
            books: RwLock::new(HashMap::new()),
            environment: BookEnvironment::new(clock, reconciler, notifier),
            bus,
            store_config: StoreConfig::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Engine wired from configuration
    #[must_use]
    pub fn from_config(
        config: &Config,
        clock: Arc<dyn Clock>,
        wallet: Arc<dyn WalletLedger>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let reconciler = PaymentReconciler::new(wallet, gateway, Arc::clone(&clock))
            .with_retry_policy(config.retry_policy())
            .with_dead_letter_capacity(config.payments.dlq_max_size);

        Self::new(clock, Arc::new(reconciler), Arc::new(InMemoryEventBus::new()))
            .with_refund_policy(RefundPolicy::new(config.refund_window()))
            .with_payment_window(config.payment_window())
            .with_store_config(config.store_config())
            .with_request_timeout(config.request_timeout())
    }

    /// Cancellation cutoff for events created afterwards
    #[must_use]
    pub fn with_refund_policy(mut self, policy: RefundPolicy) -> Self {
        self.environment = self.environment.with_refund_policy(policy);
        self
    }

    /// Payment window for events created afterwards
    #[must_use]
    pub fn with_payment_window(mut self, window: chrono::Duration) -> Self {
        self.environment = self.environment.with_payment_window(window);
        self
    }

    /// Store settings for events created afterwards
    #[must_use]
    pub fn with_store_config(mut self, config: StoreConfig) -> Self {
        self.store_config = config;
        self
    }

    /// How long a request waits for its event
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    async fn book(&self, event_id: EventId) -> Result<Arc<BookStore>, RegistrationError> {
        self.books
            .read()
            .await
            .get(&event_id)
            .cloned()
            .ok_or(RegistrationError::EventNotFound)
    }

    async fn stores(&self) -> Vec<Arc<BookStore>> {
        self.books.read().await.values().cloned().collect()
    }

    async fn request<F>(
        &self,
        event_id: EventId,
        operation: &'static str,
        command: F,
    ) -> Result<Reply, RegistrationError>
    where
        F: FnOnce(CorrelationId) -> BookAction,
    {
        let outcome = match self.book(event_id).await {
            Ok(store) => {
                let correlation = CorrelationId::new();
                store
                    .send_and_wait_for(
                        command(correlation),
                        |action| action.is_reply_to(correlation),
                        self.request_timeout,
                    )
                    .await
                    .map_err(RegistrationError::from)
                    .and_then(|action| action.into_outcome().unwrap_or(Err(RegistrationError::Unavailable)))
            },
            Err(error) => Err(error),
        };

        let label = match &outcome {
            Ok(_) => "ok",
            Err(error) => error.code(),
        };
        RegistrationMetrics::record_request(operation, label);
        outcome
    }

    fn unexpected(reply: &Reply) -> RegistrationError {
        tracing::error!(?reply, "Event answered with an unexpected reply");
        RegistrationError::Unavailable
    }

    // ========== Events ==========

    /// Create an event and start its store.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::InvalidEvent`] if the definition is inconsistent.
    pub async fn create_event(&self, draft: NewEvent) -> Result<Event, RegistrationError> {
        let event = draft
            .into_event(self.environment.clock.now())
            .map_err(RegistrationError::InvalidEvent)?;
        let store = Store::with_config(
            EventBook::new(event.clone()),
            BookReducer::new(),
            self.environment.clone(),
            self.store_config.clone(),
        );
        self.books.write().await.insert(event.id, Arc::new(store));

        tracing::info!(event_id = %event.id, name = %event.name, capacity = event.capacity, "Event created");
        Ok(event)
    }

    /// Summaries of every event, soonest first
    pub async fn list_events(&self) -> Vec<EventSummary> {
        let mut summaries = Vec::new();
        for store in self.stores().await {
            summaries.push(store.state(EventBook::summary).await);
        }
        summaries.sort_by_key(|s| s.event.starts_at);
        summaries
    }

    /// Current counts for one event, after expiring overdue promotions.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::EventNotFound`] or [`RegistrationError::Unavailable`].
    pub async fn event_summary(&self, event_id: EventId) -> Result<EventSummary, RegistrationError> {
        let store = self.book(event_id).await?;
        store.send(BookAction::ExpireOverdue).await?;
        Ok(store.state(EventBook::summary).await)
    }

    /// Archive or restrict an event.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::EventNotFound`] or [`RegistrationError::Unavailable`].
    pub async fn update_event(&self, event_id: EventId, patch: EventPatch) -> Result<Event, RegistrationError> {
        match self
            .request(event_id, "update_event", |correlation| BookAction::Update { correlation, patch })
            .await?
        {
            Reply::Updated(event) => Ok(event),
            other => Err(Self::unexpected(&other)),
        }
    }

    // ========== Registrations ==========

    /// Register and pay.
    ///
    /// # Errors
    ///
    /// Any rejection in [`RegistrationError`]; on a payment failure the slot is released.
    pub async fn register(
        &self,
        user_id: UserId,
        event_id: EventId,
        intent: PaymentIntent,
    ) -> Result<(Registration, Payment), RegistrationError> {
        match self
            .request(event_id, "register", |correlation| BookAction::Register {
                correlation,
                user_id,
                intent,
            })
            .await?
        {
            Reply::Registered { registration, payment } => Ok((registration, payment)),
            other => Err(Self::unexpected(&other)),
        }
    }

    /// Cancel a registration and refund it.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::NotRegistered`] or [`RegistrationError::RefundWindowClosed`], among others.
    pub async fn cancel(
        &self,
        user_id: UserId,
        event_id: EventId,
    ) -> Result<(Registration, Option<Payment>), RegistrationError> {
        match self
            .request(event_id, "cancel", |correlation| BookAction::Cancel { correlation, user_id })
            .await?
        {
            Reply::Cancelled { registration, refund } => Ok((registration, refund)),
            other => Err(Self::unexpected(&other)),
        }
    }

    /// Every registration the user ever had, across events
    pub async fn user_registrations(&self, user_id: UserId) -> Vec<Registration> {
        let mut registrations = Vec::new();
        for store in self.stores().await {
            registrations.extend(store.state(|book| book.registrations_for(user_id)).await);
        }
        registrations.sort_by_key(|r| r.created_at);
        registrations
    }

    /// Every payment record for the user
    #[must_use]
    pub fn user_payments(&self, user_id: UserId) -> Vec<Payment> {
        self.environment.reconciler.payments_for(user_id)
    }

    // ========== Waitlist ==========

    /// Join a full event's waitlist.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::EventNotFull`] or [`RegistrationError::AlreadyWaitlisted`], among others.
    pub async fn join_waitlist(
        &self,
        user_id: UserId,
        event_id: EventId,
    ) -> Result<WaitlistStatusView, RegistrationError> {
        match self
            .request(event_id, "join_waitlist", |correlation| BookAction::JoinWaitlist {
                correlation,
                user_id,
            })
            .await?
        {
            Reply::Waitlisted(view) => Ok(view),
            other => Err(Self::unexpected(&other)),
        }
    }

    /// Leave the waitlist.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::NotWaitlisted`] or [`RegistrationError::SettlementInProgress`].
    pub async fn leave_waitlist(
        &self,
        user_id: UserId,
        event_id: EventId,
    ) -> Result<WaitlistStatusView, RegistrationError> {
        match self
            .request(event_id, "leave_waitlist", |correlation| BookAction::LeaveWaitlist {
                correlation,
                user_id,
            })
            .await?
        {
            Reply::LeftWaitlist(view) => Ok(view),
            other => Err(Self::unexpected(&other)),
        }
    }

    /// The user's most recent waitlist entry, after expiring overdue promotions.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::NotWaitlisted`] if the user never joined.
    pub async fn waitlist_status(
        &self,
        user_id: UserId,
        event_id: EventId,
    ) -> Result<WaitlistStatusView, RegistrationError> {
        let store = self.book(event_id).await?;
        store.send(BookAction::ExpireOverdue).await?;
        store
            .state(|book| book.waitlist.status_view(user_id))
            .await
            .ok_or(RegistrationError::NotWaitlisted)
    }

    /// Pay for a promoted waitlist slot.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::PaymentNotDue`] while still queued; payment errors leave the
    /// entry `pending_payment`.
    pub async fn complete_waitlist_payment(
        &self,
        user_id: UserId,
        event_id: EventId,
        intent: PaymentIntent,
    ) -> Result<(Registration, Payment), RegistrationError> {
        match self
            .request(event_id, "complete_waitlist_payment", |correlation| BookAction::PayWaitlist {
                correlation,
                user_id,
                intent,
            })
            .await?
        {
            Reply::Converted { registration, payment } => Ok((registration, payment)),
            other => Err(Self::unexpected(&other)),
        }
    }

    /// Expire overdue promotions on every event
    pub async fn expire_all(&self) {
        for store in self.stores().await {
            if let Err(error) = store.send(BookAction::ExpireOverdue).await {
                tracing::debug!(%error, "Skipping expiry sweep for a stopped event");
            }
        }
    }

    // ========== Notifications and operations ==========

    /// Subscribe to `event-{id}` and `user-{id}` topics.
    ///
    /// # Errors
    ///
    /// [`EventBusError`] for empty or invalid topic lists.
    pub async fn subscribe(&self, topics: &[&str]) -> Result<EventStream, EventBusError> {
        self.bus.subscribe(topics).await
    }

    /// Operations waiting for manual reconciliation
    #[must_use]
    pub fn dead_letters(&self) -> Vec<DeadLetter<ReconciliationTask>> {
        self.environment.reconciler.dead_letters().snapshot()
    }

    /// Stop every event's store, waiting for running effects.
    ///
    /// # Errors
    ///
    /// The first [`StoreError`] encountered; every store is still asked to stop.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
        let mut first_error = None;
        for store in self.stores().await {
            if let Err(error) = store.shutdown(timeout).await {
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for RegistrationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationEngine")
            .field("environment", &self.environment)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}
