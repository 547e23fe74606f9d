//! Event administration and summaries.

use super::error::AppError;
use crate::server::AppState;
use crate::types::{Event, EventId, EventPatch, EventSummary, NewEvent};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

/// `POST /events`
///
/// # Errors
///
/// 422 `INVALID_EVENT` when the times or name are inconsistent.
pub async fn create_event(
    State(state): State<AppState>,
    Json(draft): Json<NewEvent>,
) -> Result<(StatusCode, Json<Event>), AppError> {
    let event = state.engine.create_event(draft).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

/// `GET /events`
pub async fn list_events(State(state): State<AppState>) -> Json<Vec<EventSummary>> {
    Json(state.engine.list_events().await)
}

/// `GET /events/:event_id`
///
/// # Errors
///
/// 404 `EVENT_NOT_FOUND`.
pub async fn get_event(
    State(state): State<AppState>,
    Path(event_id): Path<EventId>,
) -> Result<Json<EventSummary>, AppError> {
    Ok(Json(state.engine.event_summary(event_id).await?))
}

/// `PATCH /events/:event_id` with `archived` and/or `allowed_users`
///
/// # Errors
///
/// 404 `EVENT_NOT_FOUND`.
pub async fn update_event(
    State(state): State<AppState>,
    Path(event_id): Path<EventId>,
    Json(patch): Json<EventPatch>,
) -> Result<Json<Event>, AppError> {
    let event = state.engine.update_event(event_id, patch).await?;
    tracing::info!(%event_id, archived = event.archived, "Event updated");
    Ok(Json(event))
}
