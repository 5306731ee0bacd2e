use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use super::actor_from_columns;
use crate::authz::Identity;
use crate::errors::AppError;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_APPROVED: &str = "approved";

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Admission {
    pub id: Uuid,
    pub enquiry_id: Uuid,
    pub status: String,
    pub remarks: Option<String>,
    pub created_by: Identity,
    pub approved_by: Option<Identity>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbAdmission {
    pub id: String,
    pub enquiry_id: String,
    pub status: String,
    pub remarks: Option<String>,
    pub created_by_id: Option<String>,
    pub created_by_name: Option<String>,
    pub created_by_email: Option<String>,
    pub approved_by_id: Option<String>,
    pub approved_by_name: Option<String>,
    pub approved_by_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbAdmission> for Admission {
    type Error = AppError;

    fn try_from(value: DbAdmission) -> Result<Self, Self::Error> {
        let parse = |raw: &str| {
            Uuid::parse_str(raw).map_err(|err| AppError::internal(format!("invalid admission uuid {raw}: {err}")))
        };

        Ok(Admission {
            id: parse(&value.id)?,
            enquiry_id: parse(&value.enquiry_id)?,
            status: value.status,
            remarks: value.remarks,
            created_by: actor_from_columns(value.created_by_id, value.created_by_name, value.created_by_email)
                .unwrap_or_default(),
            approved_by: actor_from_columns(value.approved_by_id, value.approved_by_name, value.approved_by_email),
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AdmissionCreateRequest {
    #[schema(example = "Documents verified")]
    pub remarks: Option<String>,
    #[serde(default)]
    #[schema(read_only)]
    pub created_by: Identity,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AdmissionApproveRequest {
    #[serde(default)]
    #[schema(read_only)]
    pub created_by: Identity,
}
