//! # Registrations
//!
//! Registration, capacity and waitlist lifecycle engine for university events.
//!
//! ## Architecture
//!
//! ```text
//! HTTP (axum) ──> RegistrationEngine ──> BookStore (one per event)
//!                                           │  BookReducer: ledger + waitlist
//!                                           ├─> PaymentReconciler (wallet, gateway)
//!                                           └─> Notifier ──> InMemoryEventBus
//! ```
//!
//! - [`ledger`]: slot accounting (`confirmed + held <= capacity`)
//! - [`waitlist`]: FIFO queue with a payment deadline after promotion
//! - [`refund`]: the cancellation window
//! - [`payment`]: wallet/gateway split, compensation and refunds
//! - [`book`]: the per-event reducer tying those together
//! - [`engine`]: one store per event, request/reply over the store's action broadcast
//! - [`scheduler`]: background expiry of overdue promotions
//! - [`api`] and [`server`]: the HTTP surface

pub mod api;
pub mod book;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod notifications;
pub mod payment;
pub mod refund;
pub mod scheduler;
pub mod server;
pub mod types;
pub mod waitlist;

pub use config::Config;
pub use engine::{BookStore, RegistrationEngine};
pub use error::RegistrationError;
pub use notifications::{Notice, event_topic, user_topic};
pub use scheduler::PromotionScheduler;
pub use types::{
    Event, EventId, EventKind, EventPatch, EventSummary, Money, NewEvent, Payment, PaymentIntent,
    PaymentPreference, Registration, UserId,
};
