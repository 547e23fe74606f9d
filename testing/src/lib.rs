//! # Rollcall Testing
//!
//! Testing utilities for the Rollcall registration engine.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - A Given-When-Then harness for reducers ([`ReducerTest`])
//! - Assertion helpers for effects
//! - One-line tracing setup for tests
//!
//! ## Example
//!
//! ```ignore
//! use rollcall_testing::{ManualClock, test_clock};
//!
//! #[tokio::test]
//! async fn promotion_expires_after_three_days() {
//!     let clock = ManualClock::starting_at(test_clock().now());
//!     let engine = engine_with_clock(clock.clone());
//!
//!     engine.leave(event, alice).await?;
//!     clock.advance(chrono::Duration::days(3) + chrono::Duration::seconds(1));
//!
//!     assert_eq!(engine.waitlist(event).await?[0].status, WaitlistStatus::Expired);
//! }
//! ```

use chrono::{DateTime, Utc};
use rollcall_core::environment::Clock;


pub use reducer_test::{ReducerTest, assertions};

/// Mock implementations of Environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, PoisonError, RwLock};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use rollcall_testing::mocks::FixedClock;
    /// use rollcall_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// A clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can keep one handle and give another to
    /// the code under test, then advance past a payment or refund deadline.
    ///
    /// ```
    /// use rollcall_testing::mocks::ManualClock;
    /// use rollcall_core::environment::Clock;
    ///
    /// let clock = ManualClock::starting_at(rollcall_testing::test_clock().now());
    /// let start = clock.now();
    /// clock.advance(chrono::Duration::days(3));
    /// assert_eq!(clock.now() - start, chrono::Duration::days(3));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock frozen at `time`
        #[must_use]
        pub fn starting_at(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Move the clock forward
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.write().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to an absolute time
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.write().unwrap_or_else(PoisonError::into_inner) = to;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Default fixed clock for tests (2026-03-02 09:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::from_timestamp(1_772_442_000, 0).unwrap_or_default())
    }
}

/// Install a test-friendly tracing subscriber once.
///
/// Respects `RUST_LOG`; output is captured by the test harness.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub use mocks::{FixedClock, ManualClock, test_clock};
