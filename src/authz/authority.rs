//! Client for the remote permission authority.

use std::time::Duration;

use async_trait::async_trait;
use axum::extract::Query;
use axum::http::Uri;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which client the request came from. Selects the authority request shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Companion mobile app, flagged by `platform=app`.
    App,
    Standard,
}

#[derive(Debug, Deserialize)]
struct OriginQuery {
    platform: Option<String>,
}

impl Origin {
    /// Unparseable query strings count as a standard request.
    pub fn from_uri(uri: &Uri) -> Self {
        match Query::<OriginQuery>::try_from_uri(uri) {
            Ok(Query(OriginQuery { platform: Some(platform) })) if platform == "app" => Origin::App,
            _ => Origin::Standard,
        }
    }
}

/// Request body sent to the permission endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PermissionQuery {
    App {
        #[serde(skip_serializing_if = "Option::is_none")]
        email: Option<String>,
        service: String,
    },
    Standard {
        #[serde(skip_serializing_if = "Option::is_none")]
        user_email: Option<String>,
        application_id: String,
        service: String,
    },
}

impl PermissionQuery {
    pub fn new(origin: Origin, email: Option<&str>, service: &str, application_id: &str) -> Self {
        let email = email.map(str::to_string);
        match origin {
            Origin::App => PermissionQuery::App {
                email,
                service: service.to_string(),
            },
            Origin::Standard => PermissionQuery::Standard {
                user_email: email,
                application_id: application_id.to_string(),
                service: service.to_string(),
            },
        }
    }
}

/// Raw authority answer. `user` and `userInfo` are kept loose because the
/// authority is inconsistent about id and name field names.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AuthorityResponse {
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub user: Option<Value>,
    #[serde(default, rename = "userInfo")]
    pub user_info: Option<Value>,
    #[serde(default, rename = "hrisCodes")]
    pub hris_codes: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SlugListResponse {
    Bare(Vec<String>),
    Wrapped {
        #[serde(alias = "data", alias = "slugs")]
        permissions: Vec<String>,
    },
}

impl From<SlugListResponse> for Vec<String> {
    fn from(value: SlugListResponse) -> Self {
        match value {
            SlugListResponse::Bare(list) => list,
            SlugListResponse::Wrapped { permissions } => permissions,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthorityError {
    #[error("authority request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("authority refused the request")]
    Forbidden,
    #[error("authority returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid authority request: {0}")]
    InvalidRequest(String),
}

#[async_trait]
pub trait PermissionAuthority: Send + Sync {
    /// Resolves the caller behind `token` into identity material and permissions.
    async fn fetch_permissions(
        &self,
        token: &str,
        email: Option<&str>,
        origin: Origin,
    ) -> Result<AuthorityResponse, AuthorityError>;

    /// Current slug allow-list for `role_id`.
    async fn fetch_slugs(&self, token: Option<&str>, role_id: &str) -> Result<Vec<String>, AuthorityError>;
}

#[derive(Debug, Clone)]
pub struct AuthoritySettings {
    pub base_url: String,
    pub permission_path: String,
    pub slug_path: String,
    pub service: String,
    pub application_id: String,
    pub timeout: Duration,
}

/// reqwest-backed authority client with a bounded per-call timeout.
#[derive(Debug, Clone)]
pub struct HttpAuthority {
    client: Client,
    permission_url: String,
    slug_url: String,
    service: String,
    application_id: String,
}

impl HttpAuthority {
    pub fn new(settings: AuthoritySettings) -> Result<Self, AuthorityError> {
        let client = Client::builder()
            .connect_timeout(settings.timeout)
            .timeout(settings.timeout)
            .build()?;

        let base = settings.base_url.trim_end_matches('/');
        Ok(Self {
            client,
            permission_url: format!("{}/{}", base, settings.permission_path.trim_start_matches('/')),
            slug_url: format!("{}/{}", base, settings.slug_path.trim_start_matches('/')),
            service: settings.service,
            application_id: settings.application_id,
        })
    }

    fn headers(token: Option<&str>) -> Result<HeaderMap, AuthorityError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| AuthorityError::InvalidRequest("token is not a valid header value".to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, AuthorityError> {
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::FORBIDDEN => Err(AuthorityError::Forbidden),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(AuthorityError::Status {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }
}

#[async_trait]
impl PermissionAuthority for HttpAuthority {
    async fn fetch_permissions(
        &self,
        token: &str,
        email: Option<&str>,
        origin: Origin,
    ) -> Result<AuthorityResponse, AuthorityError> {
        let query = PermissionQuery::new(origin, email, &self.service, &self.application_id);
        let response = self
            .client
            .post(&self.permission_url)
            .headers(Self::headers(Some(token))?)
            .json(&query)
            .send()
            .await?;

        let response = Self::check_status(response).await?;
        Ok(response.json::<AuthorityResponse>().await?)
    }

    async fn fetch_slugs(&self, token: Option<&str>, role_id: &str) -> Result<Vec<String>, AuthorityError> {
        let response = self
            .client
            .post(&self.slug_url)
            .headers(Self::headers(token)?)
            .json(&serde_json::json!({ "role_id": role_id, "service": self.service }))
            .send()
            .await?;

        let response = Self::check_status(response).await?;
        Ok(response.json::<SlugListResponse>().await?.into())
    }
}
