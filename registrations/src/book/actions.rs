//! Actions understood by an event's book.
//!
//! Commands carry a [`CorrelationId`] so the caller can pick its own
//! [`BookAction::Replied`] out of the store's action broadcast. Settlement and refund
//! results are fed back by effects; replies are terminal and reduce to nothing.

use crate::error::RegistrationError;
use crate::types::{CorrelationId, Event, EventPatch, Payment, PaymentIntent, Registration, RegistrationId, UserId};
use crate::waitlist::WaitlistStatusView;

/// Which flow a settlement belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettlementPath {
    /// Direct registration holding a reserved slot
    Direct,
    /// Promoted waitlist entry paying for its held slot
    Waitlist,
}

/// Successful outcome of a command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    /// Direct registration confirmed
    Registered {
        /// New registration
        registration: Registration,
        /// Settled charge
        payment: Payment,
    },
    /// Registration cancelled; refund attached when one was issued
    Cancelled {
        /// Cancelled registration
        registration: Registration,
        /// Linked refund record
        refund: Option<Payment>,
    },
    /// Joined the waitlist
    Waitlisted(WaitlistStatusView),
    /// Left the waitlist
    LeftWaitlist(WaitlistStatusView),
    /// Waitlist entry paid and converted
    Converted {
        /// New registration (`source = waitlist`)
        registration: Registration,
        /// Settled charge
        payment: Payment,
    },
    /// Event settings changed
    Updated(Event),
}

/// Everything the book reducer handles.
#[derive(Clone, Debug)]
pub enum BookAction {
    // Commands
    /// Claim a slot and pay for it
    Register {
        /// Reply correlation
        correlation: CorrelationId,
        /// Registrant
        user_id: UserId,
        /// Idempotency key and wallet preference
        intent: PaymentIntent,
    },
    /// Cancel a confirmed registration and refund it
    Cancel {
        /// Reply correlation
        correlation: CorrelationId,
        /// Registrant
        user_id: UserId,
    },
    /// Join the waitlist of a full event
    JoinWaitlist {
        /// Reply correlation
        correlation: CorrelationId,
        /// Waiting user
        user_id: UserId,
    },
    /// Leave the waitlist, freeing a held slot if promoted
    LeaveWaitlist {
        /// Reply correlation
        correlation: CorrelationId,
        /// Waiting user
        user_id: UserId,
    },
    /// Pay for a promoted waitlist slot
    PayWaitlist {
        /// Reply correlation
        correlation: CorrelationId,
        /// Promoted user
        user_id: UserId,
        /// Idempotency key and wallet preference
        intent: PaymentIntent,
    },
    /// Archive or restrict the event
    Update {
        /// Reply correlation
        correlation: CorrelationId,
        /// Fields to change
        patch: EventPatch,
    },
    /// Expire overdue promotions; sent by the sweeper
    ExpireOverdue,

    // Effect results
    /// The reconciler settled a payment
    SettlementCompleted {
        /// Originating command
        correlation: CorrelationId,
        /// Payer
        user_id: UserId,
        /// Flow the payment belongs to
        path: SettlementPath,
        /// Succeeded charge
        payment: Payment,
    },
    /// The reconciler could not settle
    SettlementFailed {
        /// Originating command
        correlation: CorrelationId,
        /// Payer
        user_id: UserId,
        /// Flow the payment belonged to
        path: SettlementPath,
        /// Why
        error: RegistrationError,
    },
    /// The refund for a cancellation was processed
    RefundIssued {
        /// Originating command
        correlation: CorrelationId,
        /// Former registrant
        user_id: UserId,
        /// Cancelled registration
        registration_id: RegistrationId,
        /// Refund record
        refund: Payment,
    },

    // Replies
    /// Final answer to a command
    Replied {
        /// Originating command
        correlation: CorrelationId,
        /// Result
        outcome: Result<Reply, RegistrationError>,
    },
}

impl BookAction {
    /// Whether this is the reply to `correlation`
    #[must_use]
    pub fn is_reply_to(&self, correlation: CorrelationId) -> bool {
        matches!(self, Self::Replied { correlation: c, .. } if *c == correlation)
    }

    /// Consume a reply into its outcome
    #[must_use]
    pub fn into_outcome(self) -> Option<Result<Reply, RegistrationError>> {
        match self {
            Self::Replied { outcome, .. } => Some(outcome),
            _ => None,
        }
    }
}
