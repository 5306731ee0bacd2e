//! Slug gate: a second, independent check for slug-tagged routes.
//!
//! The allow-list is fetched from the authority on every call. A 403 from the
//! authority means "use the static defaults"; any other failure also leaves
//! the defaults in effect. Callers only ever see one rejection message.

use std::sync::Arc;

use super::authority::{AuthorityError, PermissionAuthority};
use crate::errors::AppError;

pub const SLUG_DENIED_MESSAGE: &str = "Unauthorized: Permissions not found";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlugRejection {
    EmptySlug,
    NotInList,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlugDecision {
    Allow,
    Reject(SlugRejection),
}

impl SlugDecision {
    pub fn into_result(self) -> Result<(), AppError> {
        match self {
            SlugDecision::Allow => Ok(()),
            SlugDecision::Reject(_) => Err(AppError::unauthorized(SLUG_DENIED_MESSAGE)),
        }
    }
}

#[derive(Clone)]
pub struct SlugGate {
    authority: Arc<dyn PermissionAuthority>,
    role_id: String,
    defaults: Vec<String>,
}

impl SlugGate {
    pub fn new(authority: Arc<dyn PermissionAuthority>, role_id: impl Into<String>, defaults: Vec<String>) -> Self {
        Self {
            authority,
            role_id: role_id.into(),
            defaults,
        }
    }

    pub fn defaults(&self) -> &[String] {
        &self.defaults
    }

    pub async fn authorize_slug(&self, slug: &str, token: Option<&str>) -> SlugDecision {
        if slug.trim().is_empty() {
            tracing::warn!("slug gate called without a slug");
            return SlugDecision::Reject(SlugRejection::EmptySlug);
        }

        let allowed = self.resolve_allow_list(token).await;

        if allowed.iter().any(|s| s == slug) {
            tracing::debug!(slug, "slug allowed");
            SlugDecision::Allow
        } else {
            tracing::info!(slug, role_id = %self.role_id, "slug not in allow-list");
            SlugDecision::Reject(SlugRejection::NotInList)
        }
    }

    async fn resolve_allow_list(&self, token: Option<&str>) -> Vec<String> {
        let mut allowed = self.defaults.clone();

        match self.authority.fetch_slugs(token, &self.role_id).await {
            Ok(list) => allowed = list,
            Err(AuthorityError::Forbidden) => {
                tracing::info!(role_id = %self.role_id, "slug lookup forbidden, using defaults");
            }
            Err(err) => {
                tracing::warn!(role_id = %self.role_id, error = %err, "slug lookup failed, using defaults");
            }
        }

        allowed
    }
}
