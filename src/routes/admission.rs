use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::permissions::{ADMISSION_APPROVE, ADMISSION_CREATE, ENQUIRY_READ};
use crate::authz::slugs;
use crate::authz::RouteRule;
use crate::errors::{AppError, AppResult};
use crate::models::admission::{
    Admission, AdmissionApproveRequest, AdmissionCreateRequest, DbAdmission, STATUS_APPROVED, STATUS_PENDING,
};
use crate::models::enquiry::{STATUS_ADMITTED, STATUS_OPEN};
use crate::routes::enquiry::fetch_enquiry;
use crate::utils::utc_now;

const SELECT_ADMISSION: &str = "SELECT id, enquiry_id, status, remarks, created_by_id, created_by_name, \
     created_by_email, approved_by_id, approved_by_name, approved_by_email, created_at, updated_at FROM admissions";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/enquiry/:id/admission", post(create_admission))
        .route("/admission/:id", get(get_admission))
        .route("/admission/:id/approve", patch(approve_admission))
}

pub fn route_rules() -> Vec<RouteRule> {
    vec![
        RouteRule::post("/enquiry/:id/admission").permissions(&[ADMISSION_CREATE]),
        RouteRule::get("/admission/:id").permissions(&[ENQUIRY_READ, ADMISSION_CREATE]),
        RouteRule::patch("/admission/:id/approve")
            .permissions(&[ADMISSION_APPROVE])
            .slug(slugs::ADMISSION_APPROVE),
    ]
}

#[utoipa::path(
    post,
    path = "/enquiry/{id}/admission",
    tag = "Admission",
    params(("id" = Uuid, Path, description = "Enquiry id")),
    request_body = AdmissionCreateRequest,
    responses(
        (status = 201, description = "Admission opened", body = Admission),
        (status = 409, description = "Enquiry is not open or already has an admission")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_admission(
    State(state): State<AppState>,
    Path(enquiry_id): Path<Uuid>,
    Json(payload): Json<AdmissionCreateRequest>,
) -> AppResult<(StatusCode, Json<Admission>)> {
    let enquiry = fetch_enquiry(&state.pool, enquiry_id).await?;
    if enquiry.status != STATUS_OPEN {
        return Err(AppError::conflict(format!("enquiry is {}", enquiry.status)));
    }

    let existing: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM admissions WHERE enquiry_id = ?")
        .bind(enquiry_id.to_string())
        .fetch_one(&state.pool)
        .await?;
    if existing > 0 {
        return Err(AppError::conflict("admission already exists for this enquiry"));
    }

    let id = Uuid::new_v4();
    let now = utc_now();
    let actor = &payload.created_by;

    sqlx::query(
        "INSERT INTO admissions (id, enquiry_id, status, remarks, created_by_id, created_by_name, created_by_email, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(enquiry_id.to_string())
    .bind(STATUS_PENDING)
    .bind(&payload.remarks)
    .bind(&actor.user_id)
    .bind(&actor.user_name)
    .bind(&actor.email)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let admission: Admission = fetch_admission(&state.pool, id).await?.try_into()?;
    Ok((StatusCode::CREATED, Json(admission)))
}

#[utoipa::path(
    get,
    path = "/admission/{id}",
    tag = "Admission",
    params(("id" = Uuid, Path, description = "Admission id")),
    responses((status = 200, description = "Admission detail", body = Admission)),
    security(("bearerAuth" = []))
)]
pub async fn get_admission(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<Json<Admission>> {
    let admission: Admission = fetch_admission(&state.pool, id).await?.try_into()?;
    Ok(Json(admission))
}

#[utoipa::path(
    patch,
    path = "/admission/{id}/approve",
    tag = "Admission",
    params(("id" = Uuid, Path, description = "Admission id")),
    request_body = AdmissionApproveRequest,
    responses(
        (status = 200, description = "Admission approved", body = Admission),
        (status = 401, description = "Unauthorized: Permissions not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn approve_admission(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AdmissionApproveRequest>,
) -> AppResult<Json<Admission>> {
    let admission = fetch_admission(&state.pool, id).await?;
    if admission.status != STATUS_PENDING {
        return Err(AppError::conflict(format!("admission is {}", admission.status)));
    }

    let now = utc_now();
    let actor = &payload.created_by;
    let mut tx = state.pool.begin().await?;

    sqlx::query(
        "UPDATE admissions SET status = ?, approved_by_id = ?, approved_by_name = ?, approved_by_email = ?, updated_at = ? WHERE id = ?",
    )
    .bind(STATUS_APPROVED)
    .bind(&actor.user_id)
    .bind(&actor.user_name)
    .bind(&actor.email)
    .bind(now)
    .bind(id.to_string())
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE enquiries SET status = ?, updated_at = ? WHERE id = ?")
        .bind(STATUS_ADMITTED)
        .bind(now)
        .bind(&admission.enquiry_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(admission_id = %id, approved_by = ?actor.user_id, "admission approved");

    let admission: Admission = fetch_admission(&state.pool, id).await?.try_into()?;
    Ok(Json(admission))
}

async fn fetch_admission(pool: &SqlitePool, id: Uuid) -> AppResult<DbAdmission> {
    sqlx::query_as::<_, DbAdmission>(&format!("{SELECT_ADMISSION} WHERE id = ?"))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("admission not found"))
}
