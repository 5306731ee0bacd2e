use std::str::FromStr;
use std::time::Duration;

use crate::authz::{AuthoritySettings, AuthorizerSettings, CacheStrategy};
use crate::errors::AppError;

const DEFAULT_PERMISSION_PATH: &str = "permissions/user";
const DEFAULT_SLUG_PATH: &str = "permissions/slugs";
const DEFAULT_SERVICE: &str = "enquiry";
const DEFAULT_SLUG_ROLE: &str = "enquiry-admin";
const DEFAULT_SLUGS: &str = "enquiry-approve";

#[derive(Debug, Clone)]
pub struct AuthzConfig {
    pub authority: AuthoritySettings,
    pub cache_strategy: CacheStrategy,
    pub redis_url: Option<String>,
    /// TTL for the distributed cache.
    pub cache_ttl: Duration,
    /// Session lifetime bounding local cache entries.
    pub session_ttl: Duration,
    pub slug_role_id: String,
    pub slug_defaults: Vec<String>,
    pub max_body_bytes: usize,
}

impl AuthzConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let base_url = required("AUTHORITY_BASE_URL")?;
        let application_id = required("APPLICATION_ID")?;

        let cache_strategy = CacheStrategy::from_str(&optional("CACHE_STRATEGY").unwrap_or_default())
            .map_err(AppError::configuration)?;
        let redis_url = optional("REDIS_URL");
        if cache_strategy == CacheStrategy::Redis && redis_url.is_none() {
            return Err(AppError::configuration("REDIS_URL must be set when CACHE_STRATEGY=redis"));
        }

        Ok(Self {
            authority: AuthoritySettings {
                base_url,
                permission_path: optional("AUTHORITY_PERMISSION_PATH")
                    .unwrap_or_else(|| DEFAULT_PERMISSION_PATH.to_string()),
                slug_path: optional("AUTHORITY_SLUG_PATH").unwrap_or_else(|| DEFAULT_SLUG_PATH.to_string()),
                service: optional("SERVICE_NAME").unwrap_or_else(|| DEFAULT_SERVICE.to_string()),
                application_id,
                timeout: Duration::from_secs(parsed("AUTHORITY_TIMEOUT_SECS", 10)?),
            },
            cache_strategy,
            redis_url,
            cache_ttl: Duration::from_secs(parsed("CACHE_TTL_SECS", 3600)?),
            session_ttl: Duration::from_secs(parsed("SESSION_TTL_SECS", 86_400)?),
            slug_role_id: optional("SLUG_ROLE_ID").unwrap_or_else(|| DEFAULT_SLUG_ROLE.to_string()),
            slug_defaults: split_list(&optional("SLUG_DEFAULTS").unwrap_or_else(|| DEFAULT_SLUGS.to_string())),
            max_body_bytes: parsed("MAX_BODY_BYTES", 10_485_760)?,
        })
    }

    /// TTL applied to cache writes under the active strategy.
    pub fn entry_ttl(&self) -> Duration {
        match self.cache_strategy {
            CacheStrategy::Redis => self.cache_ttl,
            CacheStrategy::Session => self.session_ttl,
        }
    }

    pub fn authorizer_settings(&self) -> AuthorizerSettings {
        AuthorizerSettings {
            entry_ttl: self.entry_ttl(),
            max_body_bytes: self.max_body_bytes,
        }
    }
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn required(key: &str) -> Result<String, AppError> {
    optional(key).ok_or_else(|| AppError::configuration(format!("{key} not set")))
}

fn parsed<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match optional(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| AppError::configuration(format!("{key} must be a valid number"))),
        None => Ok(default),
    }
}

pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
