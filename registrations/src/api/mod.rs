//! HTTP handlers.
//!
//! Handlers parse the request, call the [`RegistrationEngine`](crate::engine::RegistrationEngine)
//! and map [`RegistrationError`](crate::error::RegistrationError) to a status and
//! machine code through [`AppError`].

pub mod error;
pub mod events;
pub mod extractors;
pub mod payments;
pub mod registrations;
pub mod waitlist;

pub use error::{AppError, status_for};
pub use extractors::{Caller, USER_ID_HEADER};
pub use payments::{PaymentResponse, RefundResponse};
pub use registrations::RegistrationResponse;
