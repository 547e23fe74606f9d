//! State owned by one event's store.

use super::actions::SettlementPath;
use crate::ledger::CapacityLedger;
use crate::types::{
    CorrelationId, Event, EventSummary, Payment, PaymentId, Registration, RegistrationStatus, UserId,
};
use crate::waitlist::WaitlistQueue;
use std::collections::HashMap;

/// A payment in flight for one user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Settlement {
    /// Command waiting on it
    pub correlation: CorrelationId,
    /// Flow it belongs to
    pub path: SettlementPath,
}

/// Everything known about one event.
///
/// Registrations are never deleted: a cancelled registration stays in the list with
/// its status, cancellation time and refund link.
#[derive(Clone, Debug)]
pub struct EventBook {
    /// Event definition
    pub event: Event,
    /// Slot accounting
    pub ledger: CapacityLedger,
    /// FIFO waitlist
    pub waitlist: WaitlistQueue,
    /// Every registration, oldest first
    pub registrations: Vec<Registration>,
    settlements: HashMap<UserId, Settlement>,
    charges: HashMap<PaymentId, Payment>,
}

impl EventBook {
    /// Fresh book with an empty ledger sized to the event's capacity
    #[must_use]
    pub fn new(event: Event) -> Self {
        Self {
            ledger: CapacityLedger::new(event.capacity),
            event,
            waitlist: WaitlistQueue::new(),
            registrations: Vec::new(),
            settlements: HashMap::new(),
            charges: HashMap::new(),
        }
    }

    /// The user's confirmed registration
    #[must_use]
    pub fn confirmed_registration(&self, user_id: UserId) -> Option<&Registration> {
        self.registrations
            .iter()
            .find(|r| r.user_id == user_id && r.status == RegistrationStatus::Confirmed)
    }

    pub(crate) fn confirmed_registration_mut(&mut self, user_id: UserId) -> Option<&mut Registration> {
        self.registrations
            .iter_mut()
            .find(|r| r.user_id == user_id && r.status == RegistrationStatus::Confirmed)
    }

    /// Every registration the user ever had for this event
    #[must_use]
    pub fn registrations_for(&self, user_id: UserId) -> Vec<Registration> {
        self.registrations
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Payment in flight for the user, if any
    #[must_use]
    pub fn settlement(&self, user_id: UserId) -> Option<Settlement> {
        self.settlements.get(&user_id).copied()
    }

    pub(crate) fn begin_settlement(&mut self, user_id: UserId, settlement: Settlement) {
        self.settlements.insert(user_id, settlement);
    }

    pub(crate) fn end_settlement(&mut self, user_id: UserId) -> Option<Settlement> {
        self.settlements.remove(&user_id)
    }

    pub(crate) fn record_charge(&mut self, payment: Payment) {
        self.charges.insert(payment.id, payment);
    }

    /// Whether a registration, cancelled or not, was paid with this payment
    #[must_use]
    pub fn backs_registration(&self, payment_id: PaymentId) -> bool {
        self.registrations.iter().any(|r| r.payment_id == payment_id)
    }

    /// Charge that paid for a registration
    #[must_use]
    pub fn charge(&self, payment_id: PaymentId) -> Option<&Payment> {
        self.charges.get(&payment_id)
    }

    /// Derived counts clients display
    #[must_use]
    pub fn summary(&self) -> EventSummary {
        EventSummary {
            event: self.event.clone(),
            confirmed: self.ledger.confirmed(),
            held_for_promotion: self.ledger.held_for_promotion(),
            held_for_settlement: self.ledger.held_for_settlement(),
            spots_left: self.ledger.available(),
            waitlist_length: self.waitlist.active_len(),
            is_full: self.ledger.is_full(),
        }
    }
}
