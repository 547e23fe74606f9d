//! FIFO waitlist for one event.
//!
//! Entries are appended with a monotonically increasing sequence number and never
//! removed; an entry that leaves the queue keeps its record with a terminal status.
//! A user's position is derived on read from the sequence numbers of the entries
//! still `queued` ahead of it, so removals never renumber anything.
//!
//! ```text
//! queued ──promote──► pending_payment ──pay──► converted
//!   │                    │      │
//!   └──leave──► withdrawn ◄─leave  └──deadline──► expired
//! ```

use crate::types::{EventId, UserId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Waitlist entry status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitlistState {
    /// Waiting for a slot
    Queued,
    /// Promoted; a slot is held until the payment deadline
    PendingPayment,
    /// Deadline passed without payment
    Expired,
    /// Paid; became a registration
    Converted,
    /// Left voluntarily
    Withdrawn,
}

impl WaitlistState {
    /// Queued or pending payment
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Queued | Self::PendingPayment)
    }

    /// Whether the transition table allows `self -> next`
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::PendingPayment | Self::Withdrawn)
                | (Self::PendingPayment, Self::Converted | Self::Expired | Self::Withdrawn)
        )
    }
}

impl fmt::Display for WaitlistState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::PendingPayment => "pending_payment",
            Self::Expired => "expired",
            Self::Converted => "converted",
            Self::Withdrawn => "withdrawn",
        };
        f.write_str(name)
    }
}

/// Waitlist errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WaitlistError {
    /// The user already has an active entry
    #[error("user already has an active waitlist entry")]
    AlreadyWaitlisted,
    /// The user has no active entry
    #[error("user is not on the waitlist")]
    NotWaitlisted,
    /// A transition outside the table was attempted
    #[error("waitlist entry cannot move from {from} to {to}")]
    InvalidTransition {
        /// Current status
        from: WaitlistState,
        /// Requested status
        to: WaitlistState,
    },
}

/// One user's place on an event's waitlist.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    /// Waiting user
    pub user_id: UserId,
    /// Event
    pub event_id: EventId,
    /// Insertion order; strictly increasing
    pub sequence: u64,
    /// Status
    pub status: WaitlistState,
    /// Set while `pending_payment`
    pub payment_deadline: Option<DateTime<Utc>>,
    /// When the user joined
    pub joined_at: DateTime<Utc>,
    /// When the entry was promoted
    pub promoted_at: Option<DateTime<Utc>>,
    /// When the entry reached a terminal status
    pub closed_at: Option<DateTime<Utc>>,
    /// A payment for this entry is in flight
    #[serde(skip)]
    pub settling: bool,
}

impl WaitlistEntry {
    fn transition(&mut self, to: WaitlistState, now: DateTime<Utc>) -> Result<(), WaitlistError> {
        if !self.status.can_transition_to(to) {
            return Err(WaitlistError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        if to.is_active() {
            return Ok(());
        }
        self.payment_deadline = None;
        self.closed_at = Some(now);
        Ok(())
    }
}

/// What a user sees about their waitlist entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistStatusView {
    /// Event
    pub event_id: EventId,
    /// Status of the user's most recent entry
    pub status: WaitlistState,
    /// 1-based position among queued entries; 0 once promoted or closed
    pub position: usize,
    /// Deadline while `pending_payment`
    pub payment_deadline: Option<DateTime<Utc>>,
}

/// Ordered waitlist of one event.
///
/// Entries accumulate for the life of the event and lookups scan them in order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistQueue {
    entries: Vec<WaitlistEntry>,
    next_sequence: u64,
}

impl WaitlistQueue {
    /// Empty queue
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_sequence: 0,
        }
    }

    /// Append a `queued` entry at the tail.
    ///
    /// # Errors
    ///
    /// [`WaitlistError::AlreadyWaitlisted`] if the user has an active entry.
    pub fn join(
        &mut self,
        user_id: UserId,
        event_id: EventId,
        now: DateTime<Utc>,
    ) -> Result<&WaitlistEntry, WaitlistError> {
        if self.active(user_id).is_some() {
            return Err(WaitlistError::AlreadyWaitlisted);
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.push(WaitlistEntry {
            user_id,
            event_id,
            sequence,
            status: WaitlistState::Queued,
            payment_deadline: None,
            joined_at: now,
            promoted_at: None,
            closed_at: None,
            settling: false,
        });
        Ok(&self.entries[self.entries.len() - 1])
    }

    /// The user's active entry
    #[must_use]
    pub fn active(&self, user_id: UserId) -> Option<&WaitlistEntry> {
        self.entries
            .iter()
            .find(|e| e.user_id == user_id && e.status.is_active())
    }

    fn active_mut(&mut self, user_id: UserId) -> Option<&mut WaitlistEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.user_id == user_id && e.status.is_active())
    }

    /// The user's most recent entry, active or not
    #[must_use]
    pub fn latest(&self, user_id: UserId) -> Option<&WaitlistEntry> {
        self.entries.iter().rev().find(|e| e.user_id == user_id)
    }

    /// 1-based position of a queued user; `None` if not queued
    #[must_use]
    pub fn position(&self, user_id: UserId) -> Option<usize> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.user_id == user_id && e.status == WaitlistState::Queued)?;
        Some(
            1 + self
                .entries
                .iter()
                .filter(|e| e.status == WaitlistState::Queued && e.sequence < entry.sequence)
                .count(),
        )
    }

    /// Status view of the user's most recent entry
    #[must_use]
    pub fn status_view(&self, user_id: UserId) -> Option<WaitlistStatusView> {
        let entry = self.latest(user_id)?;
        Some(WaitlistStatusView {
            event_id: entry.event_id,
            status: entry.status,
            position: self.position(user_id).unwrap_or(0),
            payment_deadline: entry.payment_deadline,
        })
    }

    /// Promote the earliest `queued` entry to `pending_payment`.
    ///
    /// Only `queued` entries are considered, in sequence order; closed entries are
    /// never promoted again.
    pub fn promote_next(&mut self, now: DateTime<Utc>, payment_window: Duration) -> Option<&WaitlistEntry> {
        let index = self
            .entries
            .iter()
            .position(|e| e.status == WaitlistState::Queued)?;
        let entry = &mut self.entries[index];
        entry.transition(WaitlistState::PendingPayment, now).ok()?;
        entry.promoted_at = Some(now);
        entry.payment_deadline = Some(now + payment_window);
        Some(&*entry)
    }

    /// Withdraw the user's active entry; returns the status it had.
    ///
    /// # Errors
    ///
    /// [`WaitlistError::NotWaitlisted`] if the user has no active entry.
    pub fn withdraw(&mut self, user_id: UserId, now: DateTime<Utc>) -> Result<WaitlistState, WaitlistError> {
        let entry = self.active_mut(user_id).ok_or(WaitlistError::NotWaitlisted)?;
        let previous = entry.status;
        entry.transition(WaitlistState::Withdrawn, now)?;
        Ok(previous)
    }

    /// Mark the user's `pending_payment` entry as converted.
    ///
    /// # Errors
    ///
    /// [`WaitlistError::NotWaitlisted`] without an active entry, or
    /// [`WaitlistError::InvalidTransition`] if the entry is still `queued`.
    pub fn convert(&mut self, user_id: UserId, now: DateTime<Utc>) -> Result<(), WaitlistError> {
        let entry = self.active_mut(user_id).ok_or(WaitlistError::NotWaitlisted)?;
        entry.settling = false;
        entry.transition(WaitlistState::Converted, now)
    }

    /// Flag (or unflag) a payment in flight for the user's active entry
    pub fn set_settling(&mut self, user_id: UserId, settling: bool) {
        if let Some(entry) = self.active_mut(user_id) {
            entry.settling = settling;
        }
    }

    /// Expire every `pending_payment` entry whose deadline is before `now`.
    ///
    /// Entries with a payment in flight are left alone until it resolves. Returns the
    /// users whose entries expired, in queue order.
    pub fn expire_overdue(&mut self, now: DateTime<Utc>) -> Vec<UserId> {
        let mut expired = Vec::new();
        for entry in &mut self.entries {
            let overdue = entry.status == WaitlistState::PendingPayment
                && !entry.settling
                && entry.payment_deadline.is_some_and(|deadline| now > deadline);
            if overdue && entry.transition(WaitlistState::Expired, now).is_ok() {
                expired.push(entry.user_id);
            }
        }
        expired
    }

    /// Queued plus pending-payment entries
    #[must_use]
    pub fn active_len(&self) -> usize {
        self.entries.iter().filter(|e| e.status.is_active()).count()
    }

    /// Entries still waiting for promotion
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status == WaitlistState::Queued)
            .count()
    }

    /// Every entry ever added, in insertion order
    #[must_use]
    pub fn entries(&self) -> &[WaitlistEntry] {
        &self.entries
    }
}
