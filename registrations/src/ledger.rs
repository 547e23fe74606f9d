//! Capacity accounting for one event.
//!
//! The ledger is the only place that decides whether a slot is available. It tracks
//! three kinds of occupied slots:
//!
//! - `confirmed`: registrations that are paid for
//! - `held_for_settlement`: direct registrations whose payment is in flight
//! - `held_for_promotion`: waitlist entries promoted to `pending_payment`
//!
//! `confirmed + held_for_settlement + held_for_promotion <= capacity` holds after
//! every operation. The ledger lives inside the event's reducer state, so every
//! mutation is already serialized per event.

use serde::{Deserialize, Serialize};

/// Result of [`CapacityLedger::try_reserve`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reservation {
    /// A slot is now held for settlement
    Reserved,
    /// No slot was available
    Full,
}

/// Slot counts for one event.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityLedger {
    capacity: u32,
    confirmed: u32,
    held_for_settlement: u32,
    held_for_promotion: u32,
}

impl CapacityLedger {
    /// Empty ledger for an event of the given capacity
    #[must_use]
    pub const fn new(capacity: u32) -> Self {
        Self {
            capacity,
            confirmed: 0,
            held_for_settlement: 0,
            held_for_promotion: 0,
        }
    }

    /// Maximum confirmed registrants
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Paid registrations
    #[must_use]
    pub const fn confirmed(&self) -> u32 {
        self.confirmed
    }

    /// Slots held while a direct payment settles
    #[must_use]
    pub const fn held_for_settlement(&self) -> u32 {
        self.held_for_settlement
    }

    /// Slots held for promoted waitlist entries
    #[must_use]
    pub const fn held_for_promotion(&self) -> u32 {
        self.held_for_promotion
    }

    /// Slots nobody has claimed
    #[must_use]
    pub const fn available(&self) -> u32 {
        self.capacity
            .saturating_sub(self.confirmed)
            .saturating_sub(self.held_for_settlement)
            .saturating_sub(self.held_for_promotion)
    }

    /// Whether no slot is available
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.available() == 0
    }

    /// Claim a slot for a direct registration whose payment is about to settle.
    pub fn try_reserve(&mut self) -> Reservation {
        if self.is_full() {
            return Reservation::Full;
        }
        self.held_for_settlement += 1;
        Reservation::Reserved
    }

    /// Settlement succeeded: the held slot becomes a confirmed registration.
    pub fn confirm_reserved(&mut self) {
        if self.held_for_settlement == 0 {
            tracing::error!("confirm_reserved without a settlement hold");
            return;
        }
        self.held_for_settlement -= 1;
        self.confirmed += 1;
    }

    /// Settlement failed: give the held slot back.
    pub fn abort_reserved(&mut self) {
        if self.held_for_settlement == 0 {
            tracing::error!("abort_reserved without a settlement hold");
            return;
        }
        self.held_for_settlement -= 1;
    }

    /// Hold a free slot for a promoted waitlist entry.
    ///
    /// Returns `false` if no slot is available.
    pub fn hold_for_promotion(&mut self) -> bool {
        if self.is_full() {
            return false;
        }
        self.held_for_promotion += 1;
        true
    }

    /// A promoted entry paid: its held slot becomes a confirmed registration.
    pub fn confirm_promotion(&mut self) {
        if self.held_for_promotion == 0 {
            tracing::error!("confirm_promotion without a promotion hold");
            return;
        }
        self.held_for_promotion -= 1;
        self.confirmed += 1;
    }

    /// A promoted entry expired or withdrew: give its slot back.
    pub fn release_promotion(&mut self) {
        if self.held_for_promotion == 0 {
            tracing::error!("release_promotion without a promotion hold");
            return;
        }
        self.held_for_promotion -= 1;
    }

    /// A confirmed registration was cancelled.
    pub fn release(&mut self) {
        if self.confirmed == 0 {
            tracing::error!("release without a confirmed registration");
            return;
        }
        self.confirmed -= 1;
    }
}
