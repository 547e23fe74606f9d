//! Route table.

use super::{AppState, health};
use crate::api::{events, payments, registrations, waitlist};
use axum::{
    Router,
    routing::{get, post},
};

/// Build the application router.
///
/// | Method | Path | Handler |
/// |---|---|---|
/// | POST | `/users/:user_id/register/:event_id` | register |
/// | GET | `/users/:user_id/registrations` | registration history |
/// | GET | `/users/:user_id/payments` | payment history |
/// | POST, GET | `/events` | create, list |
/// | GET, PATCH | `/events/:event_id` | summary, archive or restrict |
/// | POST, GET, DELETE | `/waitlist/:event_id` | join, status, leave |
/// | POST | `/payments/:event_id` | pay for a promoted slot |
/// | POST | `/payments/:event_id/refund` | cancel and refund |
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness))
        .route("/metrics", get(health::metrics))
        .route("/events", post(events::create_event).get(events::list_events))
        .route("/events/:event_id", get(events::get_event).patch(events::update_event))
        .route("/users/:user_id/register/:event_id", post(registrations::register))
        .route("/users/:user_id/registrations", get(registrations::user_registrations))
        .route("/users/:user_id/payments", get(registrations::user_payments))
        .route(
            "/waitlist/:event_id",
            post(waitlist::join).get(waitlist::status).delete(waitlist::leave),
        )
        .route("/payments/:event_id", post(payments::pay))
        .route("/payments/:event_id/refund", post(payments::refund))
        .with_state(state)
}
