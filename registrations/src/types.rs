//! Domain types for the registration engine.
//!
//! Value objects (identifiers, [`Money`]), the records the engine owns ([`Event`],
//! [`Registration`], [`Payment`]) and the computed views it hands to clients
//! ([`EventSummary`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a university event
    EventId
);
uuid_id!(
    /// Unique identifier for a student or staff member
    UserId
);
uuid_id!(
    /// Unique identifier for a registration
    RegistrationId
);
uuid_id!(
    /// Unique identifier for a payment record (charge or refund)
    PaymentId
);
uuid_id!(
    /// Identifier shared by every leg (wallet debit, gateway charge, compensation) of one settlement
    TransactionId
);
uuid_id!(
    /// Ties a command to its reply inside an event's store
    CorrelationId
);

// ============================================================================
// Money Value Object (cents-based to avoid floating point errors)
// ============================================================================

/// An amount in minor units (cents).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Amount in cents
    #[must_use]
    pub const fn cents(self) -> u64 {
        self.0
    }

    /// Whether this is zero
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Subtraction that returns `None` instead of going negative
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        match self.0.checked_sub(other.0) {
            Some(cents) => Some(Self(cents)),
            None => None,
        }
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }
}

impl Sub for Money {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Events
// ============================================================================

/// The five kinds of university events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Academic conference
    Conference,
    /// Hands-on workshop
    Workshop,
    /// Campus bazaar
    Bazaar,
    /// Vendor booth
    Booth,
    /// Organized trip
    Trip,
}

/// Why an event does not accept a user right now.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosedReason {
    /// The event has been archived
    Archived,
    /// The registration deadline has passed
    DeadlinePassed,
    /// The event is restricted to a list the user is not on
    Restricted,
}

impl fmt::Display for ClosedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Archived => write!(f, "the event has been archived"),
            Self::DeadlinePassed => write!(f, "the registration deadline has passed"),
            Self::Restricted => write!(f, "the event is restricted to invited users"),
        }
    }
}

/// An event users can register for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Identifier
    pub id: EventId,
    /// Display name
    pub name: String,
    /// Kind of event
    pub kind: EventKind,
    /// Maximum confirmed registrants
    pub capacity: u32,
    /// Price per registration
    pub price: Money,
    /// Start time; the refund window is measured against it
    pub starts_at: DateTime<Utc>,
    /// End time
    pub ends_at: DateTime<Utc>,
    /// Last moment to register; `None` means the start time
    pub registration_deadline: Option<DateTime<Utc>>,
    /// Archived events accept no new registrations or waitlist joins
    pub archived: bool,
    /// Users allowed to register; empty means everyone
    pub allowed_users: Vec<UserId>,
    /// When the event was created
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Effective registration deadline
    #[must_use]
    pub fn deadline(&self) -> DateTime<Utc> {
        self.registration_deadline.unwrap_or(self.starts_at)
    }

    /// Check whether `user` may register or join the waitlist at `now`.
    ///
    /// # Errors
    ///
    /// Returns the first [`ClosedReason`] that applies.
    pub fn check_open(&self, user: UserId, now: DateTime<Utc>) -> Result<(), ClosedReason> {
        if self.archived {
            return Err(ClosedReason::Archived);
        }
        if now > self.deadline() {
            return Err(ClosedReason::DeadlinePassed);
        }
        if !self.allowed_users.is_empty() && !self.allowed_users.contains(&user) {
            return Err(ClosedReason::Restricted);
        }
        Ok(())
    }
}

/// Input for creating an event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewEvent {
    /// Display name
    pub name: String,
    /// Kind of event
    pub kind: EventKind,
    /// Maximum confirmed registrants
    pub capacity: u32,
    /// Price in cents
    pub price: Money,
    /// Start time
    pub starts_at: DateTime<Utc>,
    /// End time
    pub ends_at: DateTime<Utc>,
    /// Optional registration deadline (defaults to the start)
    #[serde(default)]
    pub registration_deadline: Option<DateTime<Utc>>,
    /// Restriction list (empty = open to all)
    #[serde(default)]
    pub allowed_users: Vec<UserId>,
}

impl NewEvent {
    /// Validate and turn into an [`Event`].
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the times are inconsistent or the name is blank.
    pub fn into_event(self, now: DateTime<Utc>) -> Result<Event, String> {
        if self.name.trim().is_empty() {
            return Err("event name must not be empty".to_string());
        }
        if self.ends_at < self.starts_at {
            return Err("event must not end before it starts".to_string());
        }
        if self.registration_deadline.is_some_and(|d| d > self.starts_at) {
            return Err("registration deadline must not be after the start".to_string());
        }

        Ok(Event {
            id: EventId::new(),
            name: self.name,
            kind: self.kind,
            capacity: self.capacity,
            price: self.price,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            registration_deadline: self.registration_deadline,
            archived: false,
            allowed_users: self.allowed_users,
            created_at: now,
        })
    }
}

/// Partial update of an event (archive / restrict).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPatch {
    /// Archive or unarchive
    #[serde(default)]
    pub archived: Option<bool>,
    /// Replace the restriction list
    #[serde(default)]
    pub allowed_users: Option<Vec<UserId>>,
}

/// Engine-computed view of an event; clients never derive these numbers themselves.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSummary {
    /// The event
    pub event: Event,
    /// Confirmed registrations
    pub confirmed: u32,
    /// Slots held for promoted waitlist entries
    pub held_for_promotion: u32,
    /// Slots held while a direct registration settles
    pub held_for_settlement: u32,
    /// Remaining capacity
    pub spots_left: u32,
    /// Queued plus pending-payment entries
    pub waitlist_length: usize,
    /// Whether `spots_left` is zero
    pub is_full: bool,
}

// ============================================================================
// Registrations
// ============================================================================

/// Registration status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    /// Holds a slot
    Confirmed,
    /// Cancelled and refunded
    Cancelled,
}

/// How a registration came about
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationSource {
    /// Registered while spots were available
    Direct,
    /// Converted from a promoted waitlist entry
    Waitlist,
}

/// A user's registration for an event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Identifier
    pub id: RegistrationId,
    /// Registrant
    pub user_id: UserId,
    /// Event
    pub event_id: EventId,
    /// Current status
    pub status: RegistrationStatus,
    /// Direct or via the waitlist
    pub source: RegistrationSource,
    /// The charge that paid for it
    pub payment_id: PaymentId,
    /// When it was confirmed
    pub created_at: DateTime<Utc>,
    /// When it was cancelled
    pub cancelled_at: Option<DateTime<Utc>>,
    /// The refund issued on cancellation
    pub refund_payment_id: Option<PaymentId>,
}

// ============================================================================
// Payments
// ============================================================================

/// Which instruments a settlement used
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Wallet balance only
    Wallet,
    /// External gateway only
    Gateway,
    /// Wallet first, gateway for the rest
    Combined,
}

impl PaymentMethod {
    /// Stable lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Wallet => "wallet",
            Self::Gateway => "gateway",
            Self::Combined => "combined",
        }
    }
}

/// Payment record status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// In flight, or a refund awaiting manual reconciliation
    Pending,
    /// Completed; immutable from here on
    Succeeded,
    /// Did not complete; nothing is owed either way
    Failed,
}

/// Charge or refund
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    /// Money in
    Charge,
    /// Money back, linked to a charge
    Refund,
}

/// One settlement attempt or refund.
///
/// `wallet_amount + gateway_amount == total` always holds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Identifier
    pub id: PaymentId,
    /// Event paid for
    pub event_id: EventId,
    /// Payer
    pub user_id: UserId,
    /// Charge or refund
    pub kind: PaymentKind,
    /// Total amount
    pub total: Money,
    /// Portion taken from (or returned to) the wallet
    pub wallet_amount: Money,
    /// Portion charged to (or refunded through) the gateway
    pub gateway_amount: Money,
    /// Instruments used
    pub method: PaymentMethod,
    /// Shared by every leg of this settlement
    pub transaction_id: TransactionId,
    /// Status
    pub status: PaymentStatus,
    /// Key the caller supplied for retries
    pub idempotency_key: Option<String>,
    /// Gateway reference for the gateway leg
    pub gateway_reference: Option<String>,
    /// Receipt page from the gateway
    pub receipt_url: Option<String>,
    /// For refunds: the charge being refunded
    pub refund_of: Option<PaymentId>,
    /// Why it failed or is pending
    pub failure_reason: Option<String>,
    /// When it was recorded
    pub created_at: DateTime<Utc>,
}

/// How the payer wants the amount split.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentPreference {
    /// Use the wallet as far as it goes, gateway for the rest
    #[default]
    WalletFirst,
    /// Wallet must cover everything
    WalletOnly,
    /// Never touch the wallet
    GatewayOnly,
}

/// What the caller supplies to pay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// Retrying with the same key never charges twice
    pub idempotency_key: String,
    /// Split preference
    #[serde(default)]
    pub preference: PaymentPreference,
}

impl PaymentIntent {
    /// Wallet-first intent with the given key
    #[must_use]
    pub fn new(idempotency_key: impl Into<String>) -> Self {
        Self {
            idempotency_key: idempotency_key.into(),
            preference: PaymentPreference::WalletFirst,
        }
    }

    /// Same intent with a different preference
    #[must_use]
    pub const fn with_preference(mut self, preference: PaymentPreference) -> Self {
        self.preference = preference;
        self
    }
}
