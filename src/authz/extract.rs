use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde_json::Value;

use super::cache::CachedPermissions;
use super::identity::{Identity, PermissionSet};
use super::middleware::AUTHORIZATION_MISSING;
use crate::errors::AppError;

/// Caller resolved by the authorization layer, available to handlers.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub identity: Identity,
    pub permissions: PermissionSet,
    pub extra_claims: Value,
}

impl From<CachedPermissions> for CurrentUser {
    fn from(value: CachedPermissions) -> Self {
        Self {
            identity: value.identity,
            permissions: value.permissions,
            extra_claims: value.extra_claims,
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| AppError::unauthorized(AUTHORIZATION_MISSING))
    }
}
