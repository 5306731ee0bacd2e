//! Permission cache.
//!
//! Two interchangeable backends sit behind [`PermissionCache`]:
//! - [`SessionCache`]: process-local map keyed by the bearer token, entries
//!   live as long as a session would
//! - [`RedisCache`]: shared Redis instance, entries written with `SET .. EX`
//!
//! The backend is chosen once at startup from `CACHE_STRATEGY`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use super::identity::{Identity, PermissionSet};
use crate::utils::sha256_hex;

/// What the authority told us about one token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedPermissions {
    pub identity: Identity,
    pub permissions: PermissionSet,
    #[serde(default)]
    pub extra_claims: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStrategy {
    Session,
    Redis,
}

impl FromStr for CacheStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "" | "session" | "local" => Ok(CacheStrategy::Session),
            "redis" | "distributed" => Ok(CacheStrategy::Redis),
            other => Err(format!("unknown cache strategy `{other}`")),
        }
    }
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheStrategy::Session => f.write_str("session"),
            CacheStrategy::Redis => f.write_str("redis"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("cache payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

#[async_trait]
pub trait PermissionCache: Send + Sync {
    fn strategy(&self) -> CacheStrategy;

    /// Live entry for `token`, or `None` on a miss. Expired entries are misses.
    async fn get(&self, token: &str) -> Result<Option<CachedPermissions>, CacheError>;

    /// Replaces whatever is stored for `token`.
    async fn put(&self, token: &str, payload: &CachedPermissions, ttl: Duration) -> Result<(), CacheError>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: CachedPermissions,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-process store. No lock is held across an await point.
#[derive(Debug, Default)]
pub struct SessionCache {
    entries: DashMap<String, CacheEntry>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl PermissionCache for SessionCache {
    fn strategy(&self) -> CacheStrategy {
        CacheStrategy::Session
    }

    async fn get(&self, token: &str) -> Result<Option<CachedPermissions>, CacheError> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(token) {
            if entry.is_live(now) {
                return Ok(Some(entry.payload.clone()));
            }
        }
        self.entries.remove_if(token, |_, entry| !entry.is_live(now));
        Ok(None)
    }

    async fn put(&self, token: &str, payload: &CachedPermissions, ttl: Duration) -> Result<(), CacheError> {
        self.entries.insert(
            token.to_string(),
            CacheEntry {
                payload: payload.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }
}

const REDIS_KEY_PREFIX: &str = "authz";

/// Shared cache. Keys are `authz:<sha256(token)>`.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    pub fn key_for(token: &str) -> String {
        format!("{}:{}", REDIS_KEY_PREFIX, sha256_hex(token))
    }
}

#[async_trait]
impl PermissionCache for RedisCache {
    fn strategy(&self) -> CacheStrategy {
        CacheStrategy::Redis
    }

    async fn get(&self, token: &str) -> Result<Option<CachedPermissions>, CacheError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(Self::key_for(token)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, token: &str, payload: &CachedPermissions, ttl: Duration) -> Result<(), CacheError> {
        let raw = serde_json::to_string(payload)?;
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(Self::key_for(token), raw, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }
}
