use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::ApiError;

/// Authenticated caller, placed in request extensions by the host's auth
/// layer before the IAP routes run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: i64,
}

/// Axum extractor for user identity
///
/// Only works on routes mounted behind the host's authentication middleware.
impl<S> FromRequestParts<S> for UserIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<UserIdentity>()
            .copied()
            .ok_or_else(|| {
                ApiError::Unauthorized(
                    "User identity not found - route must be behind the auth layer".to_string(),
                )
            })
    }
}
