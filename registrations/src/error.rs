//! Registration error taxonomy.
//!
//! Every rejection the engine can produce carries a stable machine code (what
//! automated callers branch on) and a human message (what a person reads). The
//! HTTP status lives in the API layer.

use crate::payment::PaymentError;
use crate::types::{ClosedReason, Money};
use crate::waitlist::WaitlistError;
use thiserror::Error;

/// Why a registration request was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// A confirmed registration (or one being settled) already exists
    #[error("you are already registered for this event")]
    AlreadyRegistered,

    /// Archived, past the deadline, or restricted
    #[error("registration is closed: {0}")]
    RegistrationClosed(ClosedReason),

    /// No spots left; the waitlist is open
    #[error("the event is full, you can join the waitlist instead")]
    EventFull,

    /// Spots are available; register directly
    #[error("the event still has spots available, register instead")]
    EventNotFull,

    /// An active waitlist entry exists
    #[error("you are already on the waitlist for this event")]
    AlreadyWaitlisted,

    /// No active waitlist entry
    #[error("you are not on the waitlist for this event")]
    NotWaitlisted,

    /// No confirmed registration
    #[error("you are not registered for this event")]
    NotRegistered,

    /// Less than the refund window before the start
    #[error("cancellations close {days} days before the event starts")]
    RefundWindowClosed {
        /// Window length in days
        days: i64,
    },

    /// `wallet_only` and the wallet is short
    #[error("insufficient wallet balance: {balance} available, {required} required")]
    InsufficientWalletBalance {
        /// Balance at settlement time
        balance: Money,
        /// Amount due
        required: Money,
    },

    /// A payment leg failed; nothing was charged
    #[error("payment failed: {reason}")]
    PaymentFailed {
        /// Gateway or wallet message
        reason: String,
    },

    /// Idempotency key reused for a different payment
    #[error("idempotency key '{key}' was already used for a different payment")]
    IdempotencyConflict {
        /// The key
        key: String,
    },

    /// Unknown event
    #[error("event not found")]
    EventNotFound,

    /// A payment for this user and event is mid-flight
    #[error("a payment for this event is already being processed")]
    SettlementInProgress,

    /// Waitlist entry has not been promoted yet
    #[error("your waitlist entry has not been promoted yet, no payment is due")]
    PaymentNotDue,

    /// Event definition failed validation
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// The event's store did not answer in time or is shutting down
    #[error("the registration service is temporarily unavailable")]
    Unavailable,
}

impl RegistrationError {
    /// Stable machine-readable code
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::AlreadyRegistered => "ALREADY_REGISTERED",
            Self::RegistrationClosed(_) => "REGISTRATION_CLOSED",
            Self::EventFull => "EVENT_FULL",
            Self::EventNotFull => "EVENT_NOT_FULL",
            Self::AlreadyWaitlisted => "ALREADY_WAITLISTED",
            Self::NotWaitlisted => "NOT_WAITLISTED",
            Self::NotRegistered => "NOT_REGISTERED",
            Self::RefundWindowClosed { .. } => "REFUND_WINDOW_CLOSED",
            Self::InsufficientWalletBalance { .. } => "INSUFFICIENT_WALLET_BALANCE",
            Self::PaymentFailed { .. } => "PAYMENT_FAILED",
            Self::IdempotencyConflict { .. } => "IDEMPOTENCY_CONFLICT",
            Self::EventNotFound => "EVENT_NOT_FOUND",
            Self::SettlementInProgress => "SETTLEMENT_IN_PROGRESS",
            Self::PaymentNotDue => "PAYMENT_NOT_DUE",
            Self::InvalidEvent(_) => "INVALID_EVENT",
            Self::Unavailable => "UNAVAILABLE",
        }
    }
}

impl From<PaymentError> for RegistrationError {
    fn from(error: PaymentError) -> Self {
        match error {
            PaymentError::InsufficientWalletBalance { balance, required } => {
                Self::InsufficientWalletBalance { balance, required }
            },
            PaymentError::Failed { reason } => Self::PaymentFailed { reason },
            PaymentError::IdempotencyConflict { key } => Self::IdempotencyConflict { key },
        }
    }
}

impl From<WaitlistError> for RegistrationError {
    fn from(error: WaitlistError) -> Self {
        match error {
            WaitlistError::AlreadyWaitlisted => Self::AlreadyWaitlisted,
            WaitlistError::NotWaitlisted => Self::NotWaitlisted,
            WaitlistError::InvalidTransition { .. } => Self::PaymentNotDue,
        }
    }
}

impl From<rollcall_runtime::StoreError> for RegistrationError {
    fn from(error: rollcall_runtime::StoreError) -> Self {
        tracing::warn!(%error, "Event store did not complete the request");
        Self::Unavailable
    }
}
