//! Notification payloads published by the engine.
//!
//! Anything a consumer can subscribe to (capacity freed, waitlist promotion,
//! registration confirmed, ...) is a [`Notification`]. On the bus it travels as a
//! [`SerializedEvent`]: a stable type name plus JSON bytes, so subscribers in other
//! processes or languages can decode it without sharing Rust types.
//!
//! # Example
//!
//! ```
//! use rollcall_core::event::{Notification, SerializedEvent};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! enum SeatNotice {
//!     SeatFreed { remaining: u32 },
//! }
//!
//! impl Notification for SeatNotice {
//!     fn notification_type(&self) -> &'static str {
//!         "SeatFreed.v1"
//!     }
//! }
//!
//! let event = SerializedEvent::from_notification(&SeatNotice::SeatFreed { remaining: 1 }, None).unwrap();
//! assert_eq!(event.event_type, "SeatFreed.v1");
//! ```

use serde::{Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;

/// Error types for notification encoding.
#[derive(Error, Debug)]
pub enum EventError {
    /// Failed to serialize a notification to bytes.
    #[error("Failed to serialize notification: {0}")]
    SerializationError(String),

    /// Failed to deserialize a notification from bytes.
    #[error("Failed to deserialize notification: {0}")]
    DeserializationError(String),
}

/// A fact the engine announces to interested subscribers.
///
/// `notification_type()` must be stable and versioned (`"WaitlistPromoted.v1"`).
pub trait Notification: Send + Sync + 'static {
    /// Stable, versioned type identifier.
    fn notification_type(&self) -> &'static str;

    /// Encode as JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the value cannot be serialized.
    fn to_bytes(&self) -> Result<Vec<u8>, EventError>
    where
        Self: Serialize,
    {
        serde_json::to_vec(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Decode from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::DeserializationError` if the bytes are not a valid encoding.
    fn from_bytes(bytes: &[u8]) -> Result<Self, EventError>
    where
        Self: DeserializeOwned + Sized,
    {
        serde_json::from_slice(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}

/// A serialized notification ready for the bus.
#[derive(Clone, Debug)]
pub struct SerializedEvent {
    /// The notification type identifier (e.g., "CapacityFreed.v1").
    pub event_type: String,

    /// JSON-encoded notification.
    pub data: Vec<u8>,

    /// Optional metadata (`correlation_id`, `event_id`, `user_id`).
    pub metadata: Option<serde_json::Value>,
}

impl SerializedEvent {
    /// Create a new serialized event.
    #[must_use]
    pub const fn new(
        event_type: String,
        data: Vec<u8>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            event_type,
            data,
            metadata,
        }
    }

    /// Encode a [`Notification`].
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the notification cannot be serialized.
    pub fn from_notification<N: Notification + Serialize>(
        notification: &N,
        metadata: Option<serde_json::Value>,
    ) -> Result<Self, EventError> {
        Ok(Self {
            event_type: notification.notification_type().to_string(),
            data: notification.to_bytes()?,
            metadata,
        })
    }

    /// Decode the payload back into a [`Notification`].
    ///
    /// # Errors
    ///
    /// Returns `EventError::DeserializationError` if the payload does not decode as `N`.
    pub fn decode<N: Notification + DeserializeOwned>(&self) -> Result<N, EventError> {
        N::from_bytes(&self.data)
    }
}

impl fmt::Display for SerializedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SerializedEvent {{ type: {}, size: {} bytes }}",
            self.event_type,
            self.data.len()
        )
    }
}
