//! Dead letter queue for operations that exhausted their retries.
//!
//! A compensating wallet credit or a refund that keeps failing is not dropped: it lands
//! here with its payload, the attempt count and the last error, so an operator can
//! inspect and replay it.

use rollcall_core::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// Entry in the dead letter queue
#[derive(Debug, Clone)]
pub struct DeadLetter<T> {
    /// The failed operation payload
    pub payload: T,
    /// Number of attempts made before giving up
    pub attempts: usize,
    /// The error message from the last failure
    pub error_message: String,
    /// When the entry was queued
    pub failed_at: DateTime<Utc>,
}

/// Bounded FIFO of failed operations.
///
/// When full, the oldest entry is dropped to make room. Clones share the same queue.
#[derive(Debug)]
pub struct DeadLetterQueue<T> {
    queue: Arc<Mutex<VecDeque<DeadLetter<T>>>>,
    max_size: usize,
}

impl<T> DeadLetterQueue<T> {
    /// Create an empty queue holding at most `max_size` entries
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            max_size: max_size.max(1),
        }
    }

    /// Queue a failed operation
    pub fn push(&self, payload: T, error_message: impl Into<String>, attempts: usize) {
        let error_message = error_message.into();
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);

        if queue.len() >= self.max_size {
            queue.pop_front();
            metrics::counter!("dlq.dropped").increment(1);
            tracing::warn!(max_size = self.max_size, "DLQ at capacity, dropping oldest entry");
        }

        queue.push_back(DeadLetter {
            payload,
            attempts,
            error_message: error_message.clone(),
            failed_at: Utc::now(),
        });

        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("dlq.size").set(queue.len() as f64);
        metrics::counter!("dlq.pushed").increment(1);
        tracing::warn!(attempts, error = %error_message, queue_size = queue.len(), "Operation added to dead letter queue");
    }

    /// Current number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return every entry, oldest first
    pub fn drain(&self) -> Vec<DeadLetter<T>> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let entries: Vec<_> = queue.drain(..).collect();

        metrics::gauge!("dlq.size").set(0.0);
        tracing::info!(count = entries.len(), "Drained dead letter queue");
        entries
    }

    /// Copy of every entry without removing them
    #[must_use]
    pub fn snapshot(&self) -> Vec<DeadLetter<T>>
    where
        T: Clone,
    {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Maximum number of entries kept
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }
}

impl<T> Clone for DeadLetterQueue<T> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            max_size: self.max_size,
        }
    }
}

impl<T> Default for DeadLetterQueue<T> {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_entry_is_dropped_when_full() {
        let dlq = DeadLetterQueue::new(2);
        dlq.push("credit-1", "ledger down", 5);
        dlq.push("credit-2", "ledger down", 5);
        dlq.push("credit-3", "ledger down", 5);

        let payloads: Vec<_> = dlq.snapshot().into_iter().map(|e| e.payload).collect();
        assert_eq!(payloads, vec!["credit-2", "credit-3"]);
    }

    #[test]
    fn drain_empties_shared_queue() {
        let dlq = DeadLetterQueue::new(10);
        let shared = dlq.clone();
        shared.push(42_u64, "refund rejected", 3);

        let drained = dlq.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].attempts, 3);
        assert_eq!(drained[0].error_message, "refund rejected");
        assert!(shared.is_empty());
    }
}
