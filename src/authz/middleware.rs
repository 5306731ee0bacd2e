//! Authorization middleware.
//!
//! Per request, strictly in order:
//! 1. bearer token from `Authorization`
//! 2. origin from `platform=app`
//! 3. permission cache lookup
//! 4. on a miss, the authority call and a cache write
//! 5. permission check against the matched [`RouteRule`]
//! 6. slug gate for slug-tagged routes
//! 7. `created_by` stamp on the forwarded body
//!
//! Every failure becomes an [`AppError`] envelope; nothing reaches the
//! handler before the stamp is in place.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};

use super::authority::{Origin, PermissionAuthority};
use super::cache::{CachedPermissions, PermissionCache};
use super::evaluator::evaluate;
use super::extract::CurrentUser;
use super::identity::{resolve_identity, Identity, IdentitySources};
use super::registry::RouteRegistry;
use super::slug::SlugGate;
use crate::errors::{AppError, AppResult};
use crate::utils::token_hint;

pub const AUTHORIZATION_MISSING: &str = "Authorization header missing";
pub const TOKEN_NOT_FOUND: &str = "Token not found";
pub const PERMISSION_DENIED: &str = "User does not have permission to accept this API";
pub const AUTHORIZATION_FAILED: &str = "Something went wrong while checking authorization";

/// Body field every allowed request carries downstream.
pub const CREATED_BY_FIELD: &str = "created_by";

#[derive(Debug, Clone)]
pub struct AuthorizerSettings {
    /// TTL handed to the cache on every write.
    pub entry_ttl: Duration,
    pub max_body_bytes: usize,
}

impl Default for AuthorizerSettings {
    fn default() -> Self {
        Self {
            entry_ttl: Duration::from_secs(3600),
            max_body_bytes: 10_485_760,
        }
    }
}

#[derive(Clone)]
pub struct Authorizer {
    registry: Arc<RouteRegistry>,
    cache: Arc<dyn PermissionCache>,
    authority: Arc<dyn PermissionAuthority>,
    slug_gate: SlugGate,
    settings: AuthorizerSettings,
}

impl Authorizer {
    pub fn new(
        registry: Arc<RouteRegistry>,
        cache: Arc<dyn PermissionCache>,
        authority: Arc<dyn PermissionAuthority>,
        slug_gate: SlugGate,
        settings: AuthorizerSettings,
    ) -> Self {
        Self {
            registry,
            cache,
            authority,
            slug_gate,
            settings,
        }
    }

    pub fn cache(&self) -> &Arc<dyn PermissionCache> {
        &self.cache
    }

    /// Runs the whole pipeline and returns the enriched request on Allow.
    pub async fn authorize_request(&self, request: Request) -> AppResult<Request> {
        let rule = self
            .registry
            .match_route(request.uri().path(), request.method())
            .cloned();

        if rule.as_ref().is_some_and(|rule| !rule.authenticate) {
            return Ok(request);
        }

        let (mut parts, body) = request.into_parts();

        let token = bearer_token(&parts.headers)?.to_string();
        let hint = token_hint(&token);

        let rule = rule.ok_or_else(|| {
            tracing::warn!(
                method = %parts.method,
                path = %parts.uri.path(),
                "no route rule matched, denying"
            );
            AppError::forbidden(PERMISSION_DENIED)
        })?;

        let origin = Origin::from_uri(&parts.uri);
        let mut body = RequestBody::read(body, self.settings.max_body_bytes).await?;
        let email = body.take_email();

        let resolved = match self.cache.get(&token).await {
            Ok(Some(hit)) => {
                tracing::debug!(token_hint = %hint, strategy = %self.cache.strategy(), "permission cache hit");
                hit
            }
            Ok(None) => {
                tracing::debug!(token_hint = %hint, strategy = %self.cache.strategy(), "permission cache miss");
                self.resolve_from_authority(&token, &hint, origin, email.as_deref(), &body)
                    .await?
            }
            Err(err) => {
                tracing::warn!(token_hint = %hint, error = %err, "permission cache read failed, treating as miss");
                self.resolve_from_authority(&token, &hint, origin, email.as_deref(), &body)
                    .await?
            }
        };

        if !evaluate(&rule, &resolved.identity, &resolved.permissions).is_allowed() {
            tracing::info!(
                token_hint = %hint,
                method = %parts.method,
                route = %rule.pattern.as_str(),
                "request denied"
            );
            return Err(AppError::forbidden(PERMISSION_DENIED));
        }

        if let Some(slug) = rule.slug.as_deref() {
            self.slug_gate
                .authorize_slug(slug, Some(&token))
                .await
                .into_result()?;
        }

        body.stamp_created_by(&resolved.identity)?;
        let body = body.into_body(&mut parts.headers)?;
        parts.extensions.insert(CurrentUser::from(resolved));

        Ok(Request::from_parts(parts, body))
    }

    async fn resolve_from_authority(
        &self,
        token: &str,
        hint: &str,
        origin: Origin,
        email: Option<&str>,
        body: &RequestBody,
    ) -> AppResult<CachedPermissions> {
        tracing::debug!(token_hint = %hint, has_email = email.is_some(), "asking permission authority");

        let response = self
            .authority
            .fetch_permissions(token, email, origin)
            .await
            .map_err(|err| {
                tracing::error!(token_hint = %hint, error = %err, "permission authority call failed");
                AppError::unauthorized(AUTHORIZATION_FAILED)
            })?;

        let identity = resolve_identity(IdentitySources {
            user: response.user.as_ref(),
            user_info: response.user_info.as_ref(),
            request: body.identity_fallback(origin),
            email,
        });

        let payload = CachedPermissions {
            identity,
            permissions: response.permissions.into_iter().collect(),
            extra_claims: response.hris_codes.unwrap_or_default(),
        };

        // A failed write costs a future authority call, not this request.
        if let Err(err) = self.cache.put(token, &payload, self.settings.entry_ttl).await {
            tracing::warn!(token_hint = %hint, error = %err, "permission cache write failed");
        }

        Ok(payload)
    }
}

/// `from_fn_with_state` entry point.
pub async fn authorize(State(authorizer): State<Authorizer>, request: Request, next: Next) -> Response {
    match authorizer.authorize_request(request).await {
        Ok(request) => next.run(request).await,
        Err(err) => err.into_response(),
    }
}

fn bearer_token(headers: &HeaderMap) -> AppResult<&str> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| AppError::unauthorized(AUTHORIZATION_MISSING))?;

    value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::unauthorized(TOKEN_NOT_FOUND))
}

/// Buffered request body. JSON objects are editable; anything else passes through.
#[derive(Debug)]
enum RequestBody {
    Empty,
    Json(Value),
    Opaque(Bytes),
}

impl RequestBody {
    async fn read(body: Body, limit: usize) -> AppResult<Self> {
        let bytes = axum::body::to_bytes(body, limit)
            .await
            .map_err(|_| AppError::bad_request("Request body could not be read"))?;

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(RequestBody::Empty);
        }

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(value @ Value::Object(_)) => Ok(RequestBody::Json(value)),
            _ => Ok(RequestBody::Opaque(bytes)),
        }
    }

    /// Removes the caller email (`email`, then `userInfo.email`) and returns it.
    fn take_email(&mut self) -> Option<String> {
        let RequestBody::Json(Value::Object(map)) = self else {
            return None;
        };

        let top = map.remove("email");
        let nested = map
            .get_mut("userInfo")
            .and_then(Value::as_object_mut)
            .and_then(|info| info.remove("email"));

        [top, nested]
            .into_iter()
            .flatten()
            .find_map(|v| v.as_str().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string))
    }

    /// Identity fields the body may carry: app clients send them at the top
    /// level, browser clients inside `userInfo`.
    fn identity_fallback(&self, origin: Origin) -> Option<&Value> {
        let RequestBody::Json(value) = self else {
            return None;
        };

        match origin {
            Origin::App => Some(value),
            Origin::Standard => value
                .get("userInfo")
                .filter(|info| info.is_object())
                .or(Some(value)),
        }
    }

    fn stamp_created_by(&mut self, identity: &Identity) -> AppResult<()> {
        let stamp = serde_json::to_value(identity)
            .map_err(|err| AppError::internal(format!("failed to serialize created_by: {err}")))?;

        match self {
            RequestBody::Empty => *self = RequestBody::Json(json!({ CREATED_BY_FIELD: stamp })),
            RequestBody::Json(Value::Object(map)) => {
                map.insert(CREATED_BY_FIELD.to_string(), stamp);
            }
            // Non-JSON bodies keep their bytes; handlers use the CurrentUser extension.
            RequestBody::Json(_) | RequestBody::Opaque(_) => {}
        }
        Ok(())
    }

    fn into_body(self, headers: &mut HeaderMap) -> AppResult<Body> {
        match self {
            RequestBody::Empty => Ok(Body::empty()),
            RequestBody::Opaque(bytes) => Ok(Body::from(bytes)),
            RequestBody::Json(value) => {
                let bytes = serde_json::to_vec(&value)
                    .map_err(|err| AppError::internal(format!("failed to serialize request body: {err}")))?;
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
                Ok(Body::from(bytes))
            }
        }
    }
}
