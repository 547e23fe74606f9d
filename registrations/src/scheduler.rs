//! Background expiry sweep.
//!
//! Every command already expires overdue promotions for its own event before it
//! runs. The sweeper covers events nobody touches: on each tick it sends
//! `ExpireOverdue` to every event, so freed slots reach the next person in line
//! without waiting for traffic.

use crate::engine::RegistrationEngine;
use rollcall_runtime::metrics::RegistrationMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handle to a running sweeper.
#[derive(Debug)]
pub struct PromotionScheduler {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PromotionScheduler {
    /// Start sweeping every `interval`.
    ///
    /// The first sweep runs one full interval after start.
    #[must_use]
    pub fn spawn(engine: Arc<RegistrationEngine>, interval: Duration) -> Self {
        let (shutdown, mut stop) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(interval_ms = interval.as_millis(), "Promotion sweeper started");

            while !*stop.borrow() {
                tokio::select! {
                    _ = ticker.tick() => {
                        engine.expire_all().await;
                        record_capacity(&engine).await;
                        metrics::counter!("waitlist.sweeps").increment(1);
                    }
                    changed = stop.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Promotion sweeper stopped");
        });

        Self { shutdown, task }
    }

    /// Stop the sweeper and wait for the current sweep to finish
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(error) = self.task.await {
            tracing::error!(%error, "Promotion sweeper task failed");
        }
    }
}

async fn record_capacity(engine: &RegistrationEngine) {
    let events = engine.list_events().await;
    let spots_left = events.iter().map(|e| u64::from(e.spots_left)).sum();
    let full = events.iter().filter(|e| e.is_full).count();
    RegistrationMetrics::record_capacity(spots_left, full);
}
