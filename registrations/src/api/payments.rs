//! Waitlist payment and refund endpoints.
//!
//! `POST /payments/:event_id` pays for a promoted waitlist slot. The response carries
//! the gateway's receipt page instead of redirecting to a hosted checkout.

use super::error::AppError;
use super::extractors::Caller;
use crate::server::AppState;
use crate::types::{EventId, Payment, PaymentIntent, Registration};
use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};

/// Result of paying for a promoted slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentResponse {
    /// The new registration (`source = waitlist`)
    pub registration: Registration,
    /// The charge
    pub payment: Payment,
    /// Gateway receipt, absent for wallet-only payments
    pub receipt_url: Option<String>,
}

/// Result of cancelling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundResponse {
    /// The cancelled registration
    pub registration: Registration,
    /// The refund; absent when nothing was charged
    pub refund: Option<Payment>,
}

/// `POST /payments/:event_id`
///
/// # Errors
///
/// 409 `PAYMENT_NOT_DUE` while still queued, 402 on payment failure.
pub async fn pay(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(event_id): Path<EventId>,
    Json(intent): Json<PaymentIntent>,
) -> Result<Json<PaymentResponse>, AppError> {
    let (registration, payment) = state
        .engine
        .complete_waitlist_payment(user_id, event_id, intent)
        .await?;
    Ok(Json(PaymentResponse {
        receipt_url: payment.receipt_url.clone(),
        registration,
        payment,
    }))
}

/// `POST /payments/:event_id/refund`
///
/// # Errors
///
/// 400 `REFUND_WINDOW_CLOSED`, 404 `NOT_REGISTERED`.
pub async fn refund(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(event_id): Path<EventId>,
) -> Result<Json<RefundResponse>, AppError> {
    let (registration, refund) = state.engine.cancel(user_id, event_id).await?;
    Ok(Json(RefundResponse { registration, refund }))
}
