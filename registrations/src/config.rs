//! Configuration management for the registration service.
//!
//! Loads configuration from environment variables with sensible defaults.

use chrono::Duration as ChronoDuration;
use rollcall_runtime::{RetryPolicy, StoreConfig};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A value that must be positive was zero
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server
    pub server: ServerConfig,
    /// Refund and payment windows
    pub policy: PolicyConfig,
    /// Per-event store tuning
    pub runtime: RuntimeConfig,
    /// Compensation retries and dead letters
    pub payments: PaymentsConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

/// Time windows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Cancellation closes this many days before the start
    pub refund_window_days: i64,
    /// Days a promoted waitlist entry has to pay
    pub payment_window_days: i64,
    /// Seconds between background expiry sweeps
    pub expiry_sweep_interval_secs: u64,
}

/// Store tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Actions buffered per event for reply observers
    pub store_broadcast_capacity: usize,
    /// How long a request waits for its event to answer, in milliseconds
    pub request_timeout_ms: u64,
}

/// Payment reconciliation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentsConfig {
    /// Attempts for a compensating credit or refund, first included
    pub compensation_max_attempts: usize,
    /// Delay before the first retry, in milliseconds
    pub compensation_initial_delay_ms: u64,
    /// Dead letters kept for manual reconciliation
    pub dlq_max_size: usize,
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key).and_then(|s| s.parse().ok()).unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup; unset or unparsable keys use defaults.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            server: ServerConfig {
                host: lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parsed(&lookup, "SERVER_PORT", 8080),
                log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
                shutdown_timeout: parsed(&lookup, "SHUTDOWN_TIMEOUT", 30),
            },
            policy: PolicyConfig {
                refund_window_days: parsed(&lookup, "REFUND_WINDOW_DAYS", 14),
                payment_window_days: parsed(&lookup, "PAYMENT_WINDOW_DAYS", 3),
                expiry_sweep_interval_secs: parsed(&lookup, "EXPIRY_SWEEP_INTERVAL_SECS", 60),
            },
            runtime: RuntimeConfig {
                store_broadcast_capacity: parsed(&lookup, "STORE_BROADCAST_CAPACITY", 1024),
                request_timeout_ms: parsed(&lookup, "REQUEST_TIMEOUT_MS", 10_000),
            },
            payments: PaymentsConfig {
                compensation_max_attempts: parsed(&lookup, "COMPENSATION_MAX_ATTEMPTS", 5),
                compensation_initial_delay_ms: parsed(&lookup, "COMPENSATION_INITIAL_DELAY_MS", 100),
                dlq_max_size: parsed(&lookup, "DLQ_MAX_SIZE", 1000),
            },
        }
    }

    /// Reject values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Zero`] naming the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.server.port == 0, "SERVER_PORT"),
            (self.policy.refund_window_days <= 0, "REFUND_WINDOW_DAYS"),
            (self.policy.payment_window_days <= 0, "PAYMENT_WINDOW_DAYS"),
            (self.policy.expiry_sweep_interval_secs == 0, "EXPIRY_SWEEP_INTERVAL_SECS"),
            (self.runtime.store_broadcast_capacity == 0, "STORE_BROADCAST_CAPACITY"),
            (self.runtime.request_timeout_ms == 0, "REQUEST_TIMEOUT_MS"),
            (self.payments.compensation_max_attempts == 0, "COMPENSATION_MAX_ATTEMPTS"),
            (self.payments.dlq_max_size == 0, "DLQ_MAX_SIZE"),
        ];
        match checks.into_iter().find(|(failed, _)| *failed) {
            Some((_, name)) => Err(ConfigError::Zero(name)),
            None => Ok(()),
        }
    }

    /// `host:port`
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Graceful shutdown timeout
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout)
    }

    /// Cancellation cutoff
    #[must_use]
    pub fn refund_window(&self) -> ChronoDuration {
        ChronoDuration::days(self.policy.refund_window_days)
    }

    /// Promoted entry payment window
    #[must_use]
    pub fn payment_window(&self) -> ChronoDuration {
        ChronoDuration::days(self.policy.payment_window_days)
    }

    /// Interval of the background expiry sweep
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.policy.expiry_sweep_interval_secs)
    }

    /// Request timeout
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.runtime.request_timeout_ms)
    }

    /// Store configuration for every event
    #[must_use]
    pub const fn store_config(&self) -> StoreConfig {
        StoreConfig::new(self.runtime.store_broadcast_capacity, self.shutdown_timeout())
    }

    /// Retry policy for compensations and refunds
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_attempts(self.payments.compensation_max_attempts)
            .initial_delay(Duration::from_millis(self.payments.compensation_initial_delay_ms))
            .build()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}
