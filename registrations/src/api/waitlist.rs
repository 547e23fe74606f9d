//! Waitlist endpoints. The caller is taken from `X-User-Id`.

use super::error::AppError;
use super::extractors::Caller;
use crate::server::AppState;
use crate::types::EventId;
use crate::waitlist::WaitlistStatusView;
use axum::{
    Json,
    extract::{Path, State},
};

/// `POST /waitlist/:event_id`
///
/// # Errors
///
/// 409 `ALREADY_WAITLISTED` or `EVENT_NOT_FULL`, 403 `REGISTRATION_CLOSED`.
pub async fn join(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(event_id): Path<EventId>,
) -> Result<Json<WaitlistStatusView>, AppError> {
    Ok(Json(state.engine.join_waitlist(user_id, event_id).await?))
}

/// `DELETE /waitlist/:event_id`
///
/// # Errors
///
/// 404 `NOT_WAITLISTED`.
pub async fn leave(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(event_id): Path<EventId>,
) -> Result<Json<WaitlistStatusView>, AppError> {
    Ok(Json(state.engine.leave_waitlist(user_id, event_id).await?))
}

/// `GET /waitlist/:event_id`
///
/// # Errors
///
/// 404 `NOT_WAITLISTED` if the caller never joined.
pub async fn status(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(event_id): Path<EventId>,
) -> Result<Json<WaitlistStatusView>, AppError> {
    Ok(Json(state.engine.waitlist_status(user_id, event_id).await?))
}
