//! Retry with exponential backoff.
//!
//! Used for operations that must eventually happen even though a collaborator is
//! flaky: compensating a wallet debit after a gateway decline, issuing a refund after
//! a cancellation. When retries run out the caller gets an [`Exhausted`] carrying the
//! attempt count, which is what a dead letter entry records.
//!
//! # Example
//!
//! ```rust
//! use rollcall_runtime::retry::{RetryPolicy, retry_with_backoff};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let policy = RetryPolicy::builder()
//!     .max_attempts(5)
//!     .initial_delay(Duration::from_millis(1))
//!     .build();
//!
//! let credited = retry_with_backoff(&policy, "wallet_credit", || async {
//!     Ok::<_, String>(2_500_u64)
//! })
//! .await;
//! assert_eq!(credited.ok(), Some(2_500));
//! # }
//! ```

use rand::Rng;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry policy for exponential backoff.
///
/// `max_attempts` counts the first try, so `max_attempts = 1` never retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: usize,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Growth factor between delays
    pub multiplier: f64,
    /// Randomize each delay by up to +/-25%
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Create a new policy builder starting from the defaults.
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            policy: Self::default(),
        }
    }

    /// Delay to wait after the given failed attempt (0-based).
    ///
    /// `initial_delay * multiplier^attempt`, capped at `max_delay`, before jitter.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let base_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        #[allow(clippy::cast_precision_loss)]
        let capped_ms = base_ms.min(self.max_delay.as_millis() as f64);

        let jittered_ms = if self.jitter {
            let factor = rand::thread_rng().gen_range(0.75..=1.25);
            (capped_ms * factor).min(self.max_delay.as_millis() as f64)
        } else {
            capped_ms
        };

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis(jittered_ms.max(0.0) as u64)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    /// Set the total number of attempts (clamped to at least 1).
    #[must_use]
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.policy.max_attempts = attempts.max(1);
        self
    }

    /// Set the delay before the second attempt.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    /// Cap any single delay.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    /// Set the backoff multiplier.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.policy.multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn jitter(mut self, jitter: bool) -> Self {
        self.policy.jitter = jitter;
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}

/// An operation that failed on every attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted<E> {
    /// How many times the operation ran
    pub attempts: usize,
    /// The error from the final attempt
    pub last_error: E,
}

impl<E: fmt::Display> fmt::Display for Exhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gave up after {} attempts: {}", self.attempts, self.last_error)
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for Exhausted<E> {}

/// Run `operation` until it succeeds or the policy's attempts are used up.
///
/// `name` labels the log lines and the `retry.*` metrics.
///
/// # Errors
///
/// Returns [`Exhausted`] with the last error once every attempt has failed.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    name: &'static str,
    mut operation: F,
) -> Result<T, Exhausted<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        metrics::counter!("retry.attempts", "operation" => name).increment(1);

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    metrics::counter!("retry.recovered", "operation" => name).increment(1);
                    tracing::info!(operation = name, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            },
            Err(error) if attempt >= max_attempts => {
                metrics::counter!("retry.exhausted", "operation" => name).increment(1);
                tracing::error!(operation = name, attempt, %error, "Operation failed on every attempt");
                return Err(Exhausted {
                    attempts: attempt,
                    last_error: error,
                });
            },
            Err(error) => {
                let delay = policy.delay_for_attempt(attempt - 1);
                tracing::warn!(
                    operation = name,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    %error,
                    "Operation failed, retrying"
                );
                sleep(delay).await;
            },
        }
    }
}
