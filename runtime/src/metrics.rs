//! Prometheus metrics.
//!
//! [`MetricsExporter::install`] installs the global recorder once per process; the HTTP
//! layer serves [`MetricsExporter::render`] at `/metrics`.
//!
//! ```rust,no_run
//! use rollcall_runtime::metrics::MetricsExporter;
//!
//! let exporter = MetricsExporter::install().expect("recorder");
//! let body = exporter.render();
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Handle to the installed Prometheus recorder.
#[derive(Clone)]
pub struct MetricsExporter {
    handle: Option<PrometheusHandle>,
}

impl MetricsExporter {
    /// Install the global Prometheus recorder and describe every metric.
    ///
    /// If another recorder is already installed (several servers in one test binary),
    /// the returned exporter renders an empty body instead of failing.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or installed for a
    /// reason other than an existing recorder.
    pub fn install() -> Result<Self, MetricsError> {
        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                describe_metrics();
                tracing::info!("Prometheus recorder installed");
                Ok(Self {
                    handle: Some(handle),
                })
            },
            Err(e) if e.to_string().contains("already") => {
                tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                Ok(Self::disabled())
            },
            Err(e) => Err(MetricsError::Install(e.to_string())),
        }
    }

    /// Exporter that renders nothing
    #[must_use]
    pub const fn disabled() -> Self {
        Self { handle: None }
    }

    /// Render current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.as_ref().map(PrometheusHandle::render).unwrap_or_default()
    }
}

impl std::fmt::Debug for MetricsExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsExporter")
            .field("installed", &self.handle.is_some())
            .finish()
    }
}

fn describe_metrics() {
    describe_counter!("store.actions.reduced", "Actions reduced by any store");
    describe_counter!("store.effects.executed", "Effects executed, labelled by type");

    describe_counter!("registration.requests", "Registration commands, labelled by operation and outcome");
    describe_counter!("registrations.confirmed", "Registrations confirmed");
    describe_counter!("registrations.cancelled", "Registrations cancelled");
    describe_counter!("waitlist.promoted", "Waitlist entries promoted to pending payment");
    describe_counter!("waitlist.expired", "Waitlist promotions that lapsed");
    describe_counter!("waitlist.sweeps", "Background expiry sweeps over every event");
    describe_gauge!("events.spots_left", "Remaining capacity summed over all events");
    describe_gauge!("events.full", "Events with no capacity left");

    describe_histogram!("payment.settlement.duration_seconds", "Time taken to settle a payment");
    describe_counter!("payment.settled", "Payments settled, labelled by method");
    describe_counter!("payment.failed", "Payments that failed, labelled by reason");
    describe_counter!("payment.refunded", "Refunds issued");
    describe_counter!("payments.compensations", "Compensating wallet credits after a gateway decline");

    describe_counter!("retry.attempts", "Attempts made by retried operations");
    describe_counter!("retry.recovered", "Retried operations that eventually succeeded");
    describe_counter!("retry.exhausted", "Retried operations that gave up");
    describe_gauge!("dlq.size", "Entries waiting in the dead letter queue");
    describe_counter!("dlq.pushed", "Entries added to the dead letter queue");
    describe_counter!("dlq.dropped", "Entries evicted from a full dead letter queue");

    describe_counter!("event_bus.published", "Notifications published");
    describe_counter!("event_bus.lagged", "Notifications skipped by slow subscribers");
}

/// Recorder for registration-domain metrics.
pub struct RegistrationMetrics;

impl RegistrationMetrics {
    /// Record the outcome of a command (`"registered"`, `"event_full"`, ...).
    pub fn record_request(operation: &'static str, outcome: &'static str) {
        counter!("registration.requests", "operation" => operation, "outcome" => outcome).increment(1);
    }

    /// Record a settled payment.
    pub fn record_settlement(method: &'static str, duration: Duration) {
        counter!("payment.settled", "method" => method).increment(1);
        histogram!("payment.settlement.duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a failed payment.
    pub fn record_payment_failure(reason: &'static str) {
        counter!("payment.failed", "reason" => reason).increment(1);
    }

    /// Publish capacity totals across every event.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_capacity(spots_left: u64, full_events: usize) {
        gauge!("events.spots_left").set(spots_left as f64);
        gauge!("events.full").set(full_events as f64);
    }
}
