use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch};
use axum::{Json, Router};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::permissions::{ENQUIRY_ADMIN, ENQUIRY_CANCEL, ENQUIRY_CREATE, ENQUIRY_READ};
use crate::authz::{CurrentUser, RouteRule};
use crate::errors::{AppError, AppResult};
use crate::models::enquiry::{
    DbEnquiry, Enquiry, EnquiryCancelRequest, EnquiryCreateRequest, EnquiryListQuery, STATUS_CANCELLED,
    STATUS_OPEN,
};
use crate::utils::utc_now;

const SELECT_ENQUIRY: &str = "SELECT id, student_name, contact_email, contact_phone, course, status, cancel_reason, \
     created_by_id, created_by_name, created_by_email, cancelled_by_id, cancelled_by_name, cancelled_by_email, \
     created_at, updated_at FROM enquiries";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/enquiry", get(list_enquiries).post(create_enquiry))
        .route("/enquiry/:id", get(get_enquiry))
        .route("/enquiry/:id/cancel", patch(cancel_enquiry))
}

pub fn route_rules() -> Vec<RouteRule> {
    vec![
        RouteRule::post("/enquiry").permissions(&[ENQUIRY_CREATE]),
        RouteRule::get("/enquiry").permissions(&[ENQUIRY_READ]),
        RouteRule::get("/enquiry/:id").any_permission(),
        RouteRule::patch("/enquiry/:id/cancel").permissions(&[ENQUIRY_CANCEL, ENQUIRY_ADMIN]),
    ]
}

#[utoipa::path(
    post,
    path = "/enquiry",
    tag = "Enquiry",
    request_body = EnquiryCreateRequest,
    responses(
        (status = 201, description = "Enquiry created", body = Enquiry),
        (status = 403, description = "Missing enquiry:create")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_enquiry(
    State(state): State<AppState>,
    Json(payload): Json<EnquiryCreateRequest>,
) -> AppResult<(StatusCode, Json<Enquiry>)> {
    if payload.student_name.trim().is_empty() {
        return Err(AppError::bad_request("student_name is required"));
    }

    let id = Uuid::new_v4();
    let now = utc_now();
    let actor = &payload.created_by;

    sqlx::query(
        "INSERT INTO enquiries (id, student_name, contact_email, contact_phone, course, status, created_by_id, created_by_name, created_by_email, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(payload.student_name.trim())
    .bind(&payload.contact_email)
    .bind(&payload.contact_phone)
    .bind(&payload.course)
    .bind(STATUS_OPEN)
    .bind(&actor.user_id)
    .bind(&actor.user_name)
    .bind(&actor.email)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    tracing::info!(enquiry_id = %id, created_by = ?actor.user_id, "enquiry created");

    let enquiry: Enquiry = fetch_enquiry(&state.pool, id).await?.try_into()?;
    Ok((StatusCode::CREATED, Json(enquiry)))
}

#[utoipa::path(
    get,
    path = "/enquiry",
    tag = "Enquiry",
    params(("status" = Option<String>, Query, description = "Filter by status")),
    responses((status = 200, description = "List enquiries", body = [Enquiry])),
    security(("bearerAuth" = []))
)]
pub async fn list_enquiries(
    State(state): State<AppState>,
    Query(query): Query<EnquiryListQuery>,
) -> AppResult<Json<Vec<Enquiry>>> {
    let rows = match query.status.as_deref() {
        Some(status) => {
            sqlx::query_as::<_, DbEnquiry>(&format!("{SELECT_ENQUIRY} WHERE status = ? ORDER BY created_at DESC"))
                .bind(status)
                .fetch_all(&state.pool)
                .await?
        }
        None => {
            sqlx::query_as::<_, DbEnquiry>(&format!("{SELECT_ENQUIRY} ORDER BY created_at DESC"))
                .fetch_all(&state.pool)
                .await?
        }
    };

    let enquiries: Vec<Enquiry> = rows
        .into_iter()
        .map(Enquiry::try_from)
        .collect::<Result<_, _>>()?;

    Ok(Json(enquiries))
}

#[utoipa::path(
    get,
    path = "/enquiry/{id}",
    tag = "Enquiry",
    params(("id" = Uuid, Path, description = "Enquiry id")),
    responses((status = 200, description = "Enquiry detail", body = Enquiry)),
    security(("bearerAuth" = []))
)]
pub async fn get_enquiry(
    State(state): State<AppState>,
    caller: CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Enquiry>> {
    tracing::debug!(enquiry_id = %id, viewed_by = ?caller.identity.user_id, "enquiry read");
    let enquiry: Enquiry = fetch_enquiry(&state.pool, id).await?.try_into()?;
    Ok(Json(enquiry))
}

#[utoipa::path(
    patch,
    path = "/enquiry/{id}/cancel",
    tag = "Enquiry",
    params(("id" = Uuid, Path, description = "Enquiry id")),
    request_body = EnquiryCancelRequest,
    responses(
        (status = 200, description = "Enquiry cancelled", body = Enquiry),
        (status = 409, description = "Enquiry is not open")
    ),
    security(("bearerAuth" = []))
)]
pub async fn cancel_enquiry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<EnquiryCancelRequest>,
) -> AppResult<Json<Enquiry>> {
    let existing = fetch_enquiry(&state.pool, id).await?;
    if existing.status != STATUS_OPEN {
        return Err(AppError::conflict(format!("enquiry is {}", existing.status)));
    }

    let now = utc_now();
    let actor = &payload.created_by;

    sqlx::query(
        "UPDATE enquiries SET status = ?, cancel_reason = ?, cancelled_by_id = ?, cancelled_by_name = ?, cancelled_by_email = ?, updated_at = ? WHERE id = ?",
    )
    .bind(STATUS_CANCELLED)
    .bind(&payload.reason)
    .bind(&actor.user_id)
    .bind(&actor.user_name)
    .bind(&actor.email)
    .bind(now)
    .bind(id.to_string())
    .execute(&state.pool)
    .await?;

    let enquiry: Enquiry = fetch_enquiry(&state.pool, id).await?.try_into()?;
    Ok(Json(enquiry))
}

pub(crate) async fn fetch_enquiry(pool: &SqlitePool, id: Uuid) -> AppResult<DbEnquiry> {
    sqlx::query_as::<_, DbEnquiry>(&format!("{SELECT_ENQUIRY} WHERE id = ?"))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("enquiry not found"))
}
