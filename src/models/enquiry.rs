use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use super::actor_from_columns;
use crate::authz::Identity;
use crate::errors::AppError;

pub const STATUS_OPEN: &str = "open";
pub const STATUS_CANCELLED: &str = "cancelled";
pub const STATUS_ADMITTED: &str = "admitted";

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Enquiry {
    pub id: Uuid,
    pub student_name: String,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub course: Option<String>,
    pub status: String,
    pub cancel_reason: Option<String>,
    pub created_by: Identity,
    pub cancelled_by: Option<Identity>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbEnquiry {
    pub id: String,
    pub student_name: String,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub course: Option<String>,
    pub status: String,
    pub cancel_reason: Option<String>,
    pub created_by_id: Option<String>,
    pub created_by_name: Option<String>,
    pub created_by_email: Option<String>,
    pub cancelled_by_id: Option<String>,
    pub cancelled_by_name: Option<String>,
    pub cancelled_by_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbEnquiry> for Enquiry {
    type Error = AppError;

    fn try_from(value: DbEnquiry) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&value.id)
            .map_err(|err| AppError::internal(format!("invalid enquiry id {}: {err}", value.id)))?;

        Ok(Enquiry {
            id,
            student_name: value.student_name,
            contact_email: value.contact_email,
            contact_phone: value.contact_phone,
            course: value.course,
            status: value.status,
            cancel_reason: value.cancel_reason,
            created_by: actor_from_columns(value.created_by_id, value.created_by_name, value.created_by_email)
                .unwrap_or_default(),
            cancelled_by: actor_from_columns(
                value.cancelled_by_id,
                value.cancelled_by_name,
                value.cancelled_by_email,
            ),
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

/// `created_by` is injected by the authorization layer, never by the client.
#[derive(Debug, Deserialize, ToSchema)]
pub struct EnquiryCreateRequest {
    #[schema(example = "Ada Lovelace")]
    pub student_name: String,
    #[schema(example = "parent@example.com")]
    pub contact_email: Option<String>,
    #[schema(example = "+44 20 7946 0000")]
    pub contact_phone: Option<String>,
    #[schema(example = "Grade 5")]
    pub course: Option<String>,
    #[serde(default)]
    #[schema(read_only)]
    pub created_by: Identity,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct EnquiryCancelRequest {
    #[schema(example = "Family relocated")]
    pub reason: Option<String>,
    #[serde(default)]
    #[schema(read_only)]
    pub created_by: Identity,
}

#[derive(Debug, Deserialize)]
pub struct EnquiryListQuery {
    pub status: Option<String>,
}
