use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::routing::post;
use axum::{middleware, Json, Router};
use serde_json::{json, Value};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::util::ServiceExt; // for `oneshot`

use enquiry_desk::authz::{
    authorize, AuthorityError, AuthorityResponse, Authorizer, AuthorizerSettings, CachedPermissions, Identity,
    Origin, PermissionAuthority, PermissionCache, RouteRegistry, RouteRule, SessionCache, SlugGate,
    AUTHORIZATION_FAILED, AUTHORIZATION_MISSING, PERMISSION_DENIED, SLUG_DENIED_MESSAGE, TOKEN_NOT_FOUND,
};
use enquiry_desk::{build_router, routes};

/// Authority double that counts calls and answers from fixed data.
#[derive(Default)]
struct FakeAuthority {
    calls: AtomicUsize,
    permissions: Vec<String>,
    user: Option<Value>,
    fail: bool,
    delay: Option<Duration>,
    slugs: Mutex<Vec<String>>,
    last_origin: Mutex<Option<Origin>>,
    last_email: Mutex<Option<String>>,
}

impl FakeAuthority {
    fn granting(permissions: &[&str]) -> Self {
        Self {
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
            user: Some(json!({"id": "u-42", "first_name": "Ada", "last_name": "Lovelace"})),
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PermissionAuthority for FakeAuthority {
    async fn fetch_permissions(
        &self,
        _token: &str,
        email: Option<&str>,
        origin: Origin,
    ) -> Result<AuthorityResponse, AuthorityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_origin.lock().unwrap() = Some(origin);
        *self.last_email.lock().unwrap() = email.map(str::to_string);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(AuthorityError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(AuthorityResponse {
            permissions: self.permissions.clone(),
            user: self.user.clone(),
            ..AuthorityResponse::default()
        })
    }

    async fn fetch_slugs(&self, _token: Option<&str>, _role_id: &str) -> Result<Vec<String>, AuthorityError> {
        Ok(self.slugs.lock().unwrap().clone())
    }
}

struct Harness {
    app: Router,
    pool: SqlitePool,
    cache: Arc<SessionCache>,
    authority: Arc<FakeAuthority>,
    _dir: TempDir,
}

fn authorizer_for(registry: RouteRegistry, cache: Arc<SessionCache>, authority: Arc<FakeAuthority>) -> Authorizer {
    let slug_gate = SlugGate::new(authority.clone(), "enquiry-admin", vec!["fallback-slug".to_string()]);
    Authorizer::new(
        Arc::new(registry),
        cache,
        authority,
        slug_gate,
        AuthorizerSettings::default(),
    )
}

async fn setup(authority: FakeAuthority) -> Result<Harness> {
    // create temp dir and sqlite db
    let dir = tempdir()?;
    let opts = SqliteConnectOptions::new()
        .filename(dir.path().join("test.db"))
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;

    let cache = Arc::new(SessionCache::new());
    let authority = Arc::new(authority);
    let authorizer = authorizer_for(routes::registry(), cache.clone(), authority.clone());
    let app = build_router(pool.clone(), authorizer);

    Ok(Harness {
        app,
        pool,
        cache,
        authority,
        _dir: dir,
    })
}

fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Result<Request<Body>> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    Ok(builder.body(Body::from(body.to_string()))?)
}

async fn read_json(resp: Response) -> Result<Value> {
    let bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn seed_cache(cache: &SessionCache, token: &str, permissions: &[&str]) -> Result<()> {
    let payload = CachedPermissions {
        identity: Identity::new("u-7").with_name("Grace Hopper").with_email("grace@example.com"),
        permissions: permissions.iter().copied().collect(),
        extra_claims: Value::Null,
    };
    cache.put(token, &payload, Duration::from_secs(3600)).await?;
    Ok(())
}

async fn enquiry_count(pool: &SqlitePool) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(1) FROM enquiries").fetch_one(pool).await?)
}

#[tokio::test]
async fn missing_authorization_header_is_rejected_before_any_lookup() -> Result<()> {
    let h = setup(FakeAuthority::granting(&["enquiry:create"])).await?;

    let req = Request::builder()
        .method("POST")
        .uri("/enquiry")
        .header("content-type", "application/json")
        .body(Body::from(json!({"student_name": "Sam", "email": "a@x.io"}).to_string()))?;
    let resp = h.app.clone().oneshot(req).await?;

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let v = read_json(resp).await?;
    assert_eq!(v["status"], false);
    assert_eq!(v["message"], AUTHORIZATION_MISSING);
    assert_eq!(h.authority.calls(), 0);
    assert!(h.cache.is_empty());
    assert_eq!(enquiry_count(&h.pool).await?, 0);
    Ok(())
}

#[tokio::test]
async fn non_bearer_header_reports_token_not_found() -> Result<()> {
    let h = setup(FakeAuthority::granting(&["enquiry:read"])).await?;

    let req = Request::builder()
        .method("GET")
        .uri("/enquiry")
        .header("authorization", "Basic abc")
        .body(Body::empty())?;
    let resp = h.app.clone().oneshot(req).await?;

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(read_json(resp).await?["message"], TOKEN_NOT_FOUND);
    assert_eq!(h.authority.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn cache_hit_skips_the_authority() -> Result<()> {
    let h = setup(FakeAuthority::granting(&[])).await?;
    seed_cache(&h.cache, "tok-hit", &["enquiry:read"]).await?;

    let req = json_request("GET", "/enquiry", Some("tok-hit"), json!({}))?;
    let resp = h.app.clone().oneshot(req).await?;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(h.authority.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn cache_miss_calls_the_authority_once_and_fills_the_cache() -> Result<()> {
    let h = setup(FakeAuthority::granting(&["enquiry:create"])).await?;

    let first = json_request(
        "POST",
        "/enquiry",
        Some("tok-miss"),
        json!({"student_name": "Sam", "email": "ada@example.com"}),
    )?;
    let resp = h.app.clone().oneshot(first).await?;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(h.authority.calls(), 1);
    assert_eq!(h.cache.len(), 1);

    // second request carries no email; it must be served from the cache
    let second = json_request("POST", "/enquiry", Some("tok-miss"), json!({"student_name": "Kim"}))?;
    let resp = h.app.clone().oneshot(second).await?;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(h.authority.calls(), 1);
    assert_eq!(enquiry_count(&h.pool).await?, 2);
    Ok(())
}

#[tokio::test]
async fn concurrent_misses_for_one_token_each_call_the_authority() -> Result<()> {
    let authority = FakeAuthority {
        delay: Some(Duration::from_millis(50)),
        ..FakeAuthority::granting(&["enquiry:create"])
    };
    let h = setup(authority).await?;

    let body = json!({"student_name": "Sam", "email": "ada@example.com"});
    let a = h.app.clone().oneshot(json_request("POST", "/enquiry", Some("tok-race"), body.clone())?);
    let b = h.app.clone().oneshot(json_request("POST", "/enquiry", Some("tok-race"), body)?);
    let (a, b) = tokio::join!(a, b);

    assert_eq!(a?.status(), StatusCode::CREATED);
    assert_eq!(b?.status(), StatusCode::CREATED);
    assert_eq!(h.authority.calls(), 2);
    assert_eq!(h.cache.len(), 1);
    Ok(())
}

#[tokio::test]
async fn missing_permission_is_forbidden_and_handler_never_runs() -> Result<()> {
    let h = setup(FakeAuthority::granting(&["enquiry:read"])).await?;

    let req = json_request(
        "POST",
        "/enquiry",
        Some("tok-reader"),
        json!({"student_name": "Sam", "email": "ada@example.com"}),
    )?;
    let resp = h.app.clone().oneshot(req).await?;

    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(read_json(resp).await?["message"], PERMISSION_DENIED);
    assert_eq!(enquiry_count(&h.pool).await?, 0);
    Ok(())
}

#[tokio::test]
async fn any_one_of_several_required_permissions_is_enough() -> Result<()> {
    let h = setup(FakeAuthority::granting(&[])).await?;
    seed_cache(&h.cache, "tok-admin", &["enquiry:admin"]).await?;

    // passes authorization; the handler then reports the unknown enquiry
    let uri = format!("/enquiry/{}/cancel", uuid::Uuid::new_v4());
    let req = json_request("PATCH", &uri, Some("tok-admin"), json!({"reason": "duplicate"}))?;
    let resp = h.app.clone().oneshot(req).await?;

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn wildcard_route_admits_an_identity_without_permissions() -> Result<()> {
    let h = setup(FakeAuthority::granting(&[])).await?;
    seed_cache(&h.cache, "tok-empty", &[]).await?;

    let uri = format!("/enquiry/{}", uuid::Uuid::new_v4());
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .header("authorization", "Bearer tok-empty")
        .body(Body::empty())?;
    let resp = h.app.clone().oneshot(req).await?;

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn authority_failure_is_a_generic_unauthorized() -> Result<()> {
    let authority = FakeAuthority {
        fail: true,
        ..FakeAuthority::granting(&["enquiry:create"])
    };
    let h = setup(authority).await?;

    let req = json_request(
        "POST",
        "/enquiry",
        Some("tok-down"),
        json!({"student_name": "Sam", "email": "ada@example.com"}),
    )?;
    let resp = h.app.clone().oneshot(req).await?;

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let v = read_json(resp).await?;
    assert_eq!(v["message"], AUTHORIZATION_FAILED);
    assert!(!v.to_string().contains("unavailable"));
    assert_eq!(h.authority.calls(), 1);
    assert!(h.cache.is_empty());
    Ok(())
}

#[tokio::test]
async fn cold_cache_get_without_a_body_asks_the_authority_by_token() -> Result<()> {
    let h = setup(FakeAuthority::granting(&["enquiry:read"])).await?;

    let req = Request::builder()
        .method("GET")
        .uri("/enquiry")
        .header("authorization", "Bearer tok-cold")
        .body(Body::empty())?;
    let resp = h.app.clone().oneshot(req).await?;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(h.authority.calls(), 1);
    assert_eq!(*h.authority.last_email.lock().unwrap(), None);
    assert_eq!(h.cache.len(), 1);

    // the identity resolved for the token is reused without an email
    let req = json_request("POST", "/enquiry", Some("tok-cold"), json!({"student_name": "Sam"}))?;
    let resp = h.app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(h.authority.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn platform_app_query_reaches_the_authority_as_app_origin() -> Result<()> {
    let h = setup(FakeAuthority::granting(&["enquiry:create"])).await?;

    let req = json_request(
        "POST",
        "/enquiry?platform=app",
        Some("tok-app"),
        json!({"student_name": "Sam", "email": "ada@example.com"}),
    )?;
    let resp = h.app.clone().oneshot(req).await?;

    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(*h.authority.last_origin.lock().unwrap(), Some(Origin::App));
    Ok(())
}

#[tokio::test]
async fn health_is_public() -> Result<()> {
    let h = setup(FakeAuthority::granting(&[])).await?;

    let req = Request::builder().method("GET").uri("/api/health").body(Body::empty())?;
    let resp = h.app.clone().oneshot(req).await?;

    assert_eq!(resp.status(), StatusCode::OK);
    let v = read_json(resp).await?;
    assert_eq!(v["db_ok"], true);
    assert_eq!(v["cache_strategy"], "session");
    assert_eq!(h.authority.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn public_rule_in_the_registry_skips_the_pipeline() -> Result<()> {
    let cache = Arc::new(SessionCache::new());
    let authority = Arc::new(FakeAuthority::granting(&[]));
    let registry = RouteRegistry::new([RouteRule::post("/echo").public()]);
    let authorizer = authorizer_for(registry, cache.clone(), authority.clone());

    let app = Router::new()
        .route("/echo", post(|Json(body): Json<Value>| async move { Json(body) }))
        .route_layer(middleware::from_fn_with_state(authorizer, authorize));

    let req = json_request("POST", "/echo", None, json!({"email": "ada@example.com"}))?;
    let resp = app.oneshot(req).await?;

    assert_eq!(resp.status(), StatusCode::OK);
    let v = read_json(resp).await?;
    assert_eq!(v["email"], "ada@example.com");
    assert!(v.get("created_by").is_none());
    assert_eq!(authority.calls(), 0);
    assert!(cache.is_empty());
    Ok(())
}

#[tokio::test]
async fn unmatched_route_is_denied() -> Result<()> {
    let cache = Arc::new(SessionCache::new());
    let authority = Arc::new(FakeAuthority::granting(&["enquiry:admin"]));
    let authorizer = authorizer_for(routes::registry(), cache, authority.clone());

    let req = json_request("DELETE", "/enquiry", Some("tok"), json!({"email": "ada@example.com"}))?;
    let Err(err) = authorizer.authorize_request(req).await else {
        panic!("unmatched route was allowed");
    };

    assert_eq!(err.status(), StatusCode::FORBIDDEN);
    assert_eq!(err.public_message(), PERMISSION_DENIED);
    assert_eq!(authority.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn allowed_request_reaches_handler_stamped_and_without_email() -> Result<()> {
    let cache = Arc::new(SessionCache::new());
    let authority = Arc::new(FakeAuthority::granting(&["enquiry:create"]));
    let registry = RouteRegistry::new([RouteRule::post("/echo").permissions(&["enquiry:create"])]);
    let authorizer = authorizer_for(registry, cache, authority.clone());

    let app = Router::new()
        .route("/echo", post(|Json(body): Json<Value>| async move { Json(body) }))
        .route_layer(middleware::from_fn_with_state(authorizer, authorize));

    let req = json_request(
        "POST",
        "/echo",
        Some("tok-e2e"),
        json!({
            "email": "ada@example.com",
            "note": "hello",
            "userInfo": {"email": "ada@example.com", "phone": "123"}
        }),
    )?;
    let resp = app.oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let v = read_json(resp).await?;
    assert_eq!(v["note"], "hello");
    assert!(v.get("email").is_none());
    assert!(v["userInfo"].get("email").is_none());
    assert_eq!(v["userInfo"]["phone"], "123");
    assert_eq!(v["created_by"]["user_id"], "u-42");
    assert_eq!(v["created_by"]["user_name"], "Ada Lovelace");
    assert_eq!(v["created_by"]["email"], "ada@example.com");
    assert_eq!(authority.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn created_enquiry_records_the_resolved_caller() -> Result<()> {
    let h = setup(FakeAuthority::granting(&["enquiry:create"])).await?;

    let req = json_request(
        "POST",
        "/enquiry",
        Some("tok-owner"),
        json!({"student_name": "Sam", "course": "BSc", "email": "ada@example.com"}),
    )?;
    let resp = h.app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let v = read_json(resp).await?;
    assert_eq!(v["status"], "open");
    assert_eq!(v["created_by"]["user_id"], "u-42");
    assert_eq!(v["created_by"]["user_name"], "Ada Lovelace");
    assert_eq!(v["created_by"]["email"], "ada@example.com");
    Ok(())
}

#[tokio::test]
async fn slug_gated_approval_follows_the_allow_list() -> Result<()> {
    let h = setup(FakeAuthority::granting(&[])).await?;
    seed_cache(
        &h.cache,
        "tok-approver",
        &["enquiry:create", "admission:create", "admission:approve"],
    )
    .await?;

    let req = json_request("POST", "/enquiry", Some("tok-approver"), json!({"student_name": "Sam"}))?;
    let enquiry = read_json(h.app.clone().oneshot(req).await?).await?;
    let enquiry_id = enquiry["id"].as_str().unwrap_or_default().to_string();

    let req = json_request(
        "POST",
        &format!("/enquiry/{enquiry_id}/admission"),
        Some("tok-approver"),
        json!({"remarks": "strong candidate"}),
    )?;
    let resp = h.app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let admission_id = read_json(resp).await?["id"].as_str().unwrap_or_default().to_string();
    let approve_uri = format!("/admission/{admission_id}/approve");

    // the authority's list does not carry the approval slug
    *h.authority.slugs.lock().unwrap() = vec!["slug9".to_string()];
    let resp = h
        .app
        .clone()
        .oneshot(json_request("PATCH", &approve_uri, Some("tok-approver"), json!({}))?)
        .await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let v = read_json(resp).await?;
    assert_eq!(v["status"], false);
    assert_eq!(v["message"], SLUG_DENIED_MESSAGE);

    *h.authority.slugs.lock().unwrap() = vec!["enquiry-approve".to_string(), "slug9".to_string()];
    let resp = h
        .app
        .clone()
        .oneshot(json_request("PATCH", &approve_uri, Some("tok-approver"), json!({}))?)
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let v = read_json(resp).await?;
    assert_eq!(v["status"], "approved");
    assert_eq!(v["approved_by"]["user_id"], "u-7");

    let status: String = sqlx::query_scalar("SELECT status FROM enquiries WHERE id = ?")
        .bind(&enquiry_id)
        .fetch_one(&h.pool)
        .await?;
    assert_eq!(status, "admitted");
    Ok(())
}
