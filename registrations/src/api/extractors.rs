//! Custom extractors.

use super::error::AppError;
use crate::types::UserId;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

/// Header carrying the authenticated caller.
pub const USER_ID_HEADER: &str = "X-User-Id";

/// The caller, as identified by the `X-User-Id` header.
///
/// Authentication happens upstream; the header is trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| AppError::unauthorized(format!("missing {USER_ID_HEADER} header")))?;

        value
            .to_str()
            .ok()
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .map(|uuid| Self(UserId::from_uuid(uuid)))
            .ok_or_else(|| AppError::bad_request(format!("{USER_ID_HEADER} must be a UUID")))
    }
}
