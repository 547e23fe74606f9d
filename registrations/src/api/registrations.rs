//! Direct registration and per-user history.

use super::error::AppError;
use crate::server::AppState;
use crate::types::{EventId, Payment, PaymentIntent, Registration, UserId};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

/// A confirmed registration and the charge that paid for it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationResponse {
    /// The registration
    pub registration: Registration,
    /// The charge
    pub payment: Payment,
}

/// `POST /users/:user_id/register/:event_id`
///
/// # Errors
///
/// 404 `ALREADY_REGISTERED`, 409 `EVENT_FULL`, 402 on payment failure, among others.
pub async fn register(
    State(state): State<AppState>,
    Path((user_id, event_id)): Path<(UserId, EventId)>,
    Json(intent): Json<PaymentIntent>,
) -> Result<(StatusCode, Json<RegistrationResponse>), AppError> {
    let (registration, payment) = state.engine.register(user_id, event_id, intent).await?;
    Ok((StatusCode::CREATED, Json(RegistrationResponse { registration, payment })))
}

/// `GET /users/:user_id/registrations`
pub async fn user_registrations(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Json<Vec<Registration>> {
    Json(state.engine.user_registrations(user_id).await)
}

/// `GET /users/:user_id/payments`
pub async fn user_payments(State(state): State<AppState>, Path(user_id): Path<UserId>) -> Json<Vec<Payment>> {
    Json(state.engine.user_payments(user_id))
}
