use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::sms::template::MessageKind;
use crate::sms::SmsContext;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub session_ttl_hours: i64,
    pub sms: Arc<SmsContext>,
}

/// Roles stored as smallint in cirs_user.roles.
pub const ROLE_PARENT: i16 = 0;
pub const ROLE_ADMIN: i16 = 1;
pub const ROLE_NURSE: i16 = 2;

/// child.status values.
pub const CHILD_STATUS_ACTIVE: i16 = 0;
pub const CHILD_STATUS_ARCHIVED: i16 = 3;

/* -------------------------
   API DTOs
--------------------------*/

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub device_name: Option<String>,
    pub remember_me: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub data: LoginResponseData,
}

#[derive(Debug, Serialize)]
pub struct LoginResponseData {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub cirs_user: UserProfile,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub data: MeResponseData,
}

#[derive(Debug, Serialize)]
pub struct MeResponseData {
    pub cirs_user: UserProfile,
    pub session: SessionInfo,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub data: OkData,
}

#[derive(Debug, Serialize)]
pub struct OkData {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    /// We store a single role as smallint in DB; clients expect an array.
    pub roles: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/* -------------------------
   DB Row Models
--------------------------*/

#[derive(Debug, sqlx::FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    pub password_hash: String,
    pub roles: i16,
    pub is_active: bool,
}

#[derive(Debug, sqlx::FromRow)]
pub struct SessionTokenRow {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChildRow {
    pub child_id: Uuid,
    pub full_name: String,
    pub guardian_name: String,
    /// Guardian phone, stored exactly as entered; normalization happens at
    /// send time, per the configured policy.
    pub phone: Option<String>,
    pub birthday: NaiveDate,
    pub gender: i16,
    pub status: i16,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct VaccinationScheduleRow {
    pub schedule_id: Uuid,
    pub child_id: Uuid,
    pub vaccine_name: String,
    pub dose_number: i32,
    pub target_disease: String,
    pub due_date: NaiveDate,
    pub administered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SmsLogRow {
    pub sms_log_id: Uuid,
    pub child_id: Option<Uuid>,
    pub phone: String,
    pub message: String,
    pub provider_response: Option<String>,
    pub status: i16,
    pub message_kind: MessageKind,
    pub created_at: DateTime<Utc>,
}

/* -------------------------
   Helpers
--------------------------*/

/// Role mapping: 0 Parent, 1 Admin, 2 Nurse.
pub fn role_to_string(role: i16) -> String {
    match role {
        0 => "parent",
        1 => "admin",
        2 => "nurse",
        _ => "unknown",
    }
    .to_string()
}
