//! Application state shared across handlers.

use crate::engine::RegistrationEngine;
use rollcall_runtime::metrics::MetricsExporter;
use std::sync::Arc;

/// Shared by every handler; cheap to clone.
#[derive(Clone, Debug)]
pub struct AppState {
    /// The engine behind every endpoint
    pub engine: Arc<RegistrationEngine>,
    /// Renders `/metrics`
    pub metrics: MetricsExporter,
}

impl AppState {
    /// State around an engine
    #[must_use]
    pub const fn new(engine: Arc<RegistrationEngine>, metrics: MetricsExporter) -> Self {
        Self { engine, metrics }
    }
}
