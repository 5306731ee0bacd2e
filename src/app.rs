use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as CorsAny, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::{
    authorize, Authorizer, CacheStrategy, HttpAuthority, PermissionAuthority, PermissionCache, RedisCache,
    SessionCache, SlugGate,
};
use crate::config::AuthzConfig;
use crate::errors::AppError;
use crate::routes::{self, admission, enquiry, health};

const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub authz: Authorizer,
}

impl AppState {
    pub fn new(pool: SqlitePool, authz: Authorizer) -> Self {
        Self { pool, authz }
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let config = AuthzConfig::from_env()?;
    let authorizer = build_authorizer(&config).await?;
    Ok(build_router(pool, authorizer))
}

/// Wires the registry, the configured cache backend and the authority client.
pub async fn build_authorizer(config: &AuthzConfig) -> Result<Authorizer, AppError> {
    let registry = Arc::new(routes::registry());

    let cache: Arc<dyn PermissionCache> = match config.cache_strategy {
        CacheStrategy::Session => {
            let cache = Arc::new(SessionCache::new());
            spawn_session_purge(&cache);
            cache
        }
        CacheStrategy::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .ok_or_else(|| AppError::configuration("REDIS_URL not set"))?;
            let cache = RedisCache::connect(url)
                .await
                .map_err(|err| AppError::configuration(format!("failed to connect to redis: {err}")))?;
            Arc::new(cache)
        }
    };

    let authority: Arc<dyn PermissionAuthority> = Arc::new(
        HttpAuthority::new(config.authority.clone())
            .map_err(|err| AppError::configuration(format!("failed to build authority client: {err}")))?,
    );

    let slug_gate = SlugGate::new(
        Arc::clone(&authority),
        config.slug_role_id.clone(),
        config.slug_defaults.clone(),
    );

    tracing::info!(
        strategy = %config.cache_strategy,
        rules = registry.len(),
        entry_ttl_secs = config.entry_ttl().as_secs(),
        "authorization engine ready"
    );

    Ok(Authorizer::new(
        registry,
        cache,
        authority,
        slug_gate,
        config.authorizer_settings(),
    ))
}

pub fn build_router(pool: SqlitePool, authorizer: Authorizer) -> Router {
    let state = AppState::new(pool, authorizer.clone());

    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_origin(CorsAny)
        .allow_headers(CorsAny);

    // Every route sits behind the authorizer; `authenticate = false` rules pass through it.
    Router::new()
        .merge(health::routes())
        .merge(enquiry::routes())
        .merge(admission::routes())
        .route_layer(middleware::from_fn_with_state(authorizer, authorize))
        .with_state(state)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn spawn_session_purge(cache: &Arc<SessionCache>) {
    let weak = Arc::downgrade(cache);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            let Some(cache) = weak.upgrade() else { break };
            let purged = cache.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, "purged expired session cache entries");
            }
        }
    });
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    AppError::internal(format!("handler panicked: {detail}")).into_response()
}
