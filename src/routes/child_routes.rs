// src/routes/child_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{
        AppState, ChildRow, VaccinationScheduleRow, CHILD_STATUS_ACTIVE, CHILD_STATUS_ARCHIVED,
        ROLE_ADMIN, ROLE_NURSE,
    },
    sms::audit::PgAttemptStore,
    sms::ensure_dispatch_role,
    sms::fallback::FallbackCoordinator,
    sms::template::ScheduleEntry,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/children", post(create_child).get(search_children))
        .route("/children/{child_id}", get(get_child).patch(update_child))
        .route("/children/{child_id}/archive", post(archive_child))
        .route("/children/{child_id}/restore", post(restore_child))
        .route(
            "/children/{child_id}/schedule",
            get(list_schedule).post(add_schedule_entry),
        )
        .route(
            "/children/{child_id}/send_registration_sms",
            post(send_registration_sms),
        )
}

use serde::de::Deserializer;

fn deserialize_double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    // This is called only when the field is present (even if it's `null`).
    // - null => Option::<T>::deserialize => None => we wrap => Some(None)
    // - value => Some(value) => we wrap => Some(Some(value))
    let inner = Option::<T>::deserialize(deserializer)?;
    Ok(Some(inner))
}

fn ensure_staff(auth: &AuthContext) -> Result<(), ApiError> {
    if auth.role == ROLE_ADMIN || auth.role == ROLE_NURSE {
        Ok(())
    } else {
        Err(ApiError::Forbidden("FORBIDDEN", "admin/nurse only".into()))
    }
}

fn validate_gender(gender: i16) -> Result<(), ApiError> {
    if !(0..=2).contains(&gender) {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "gender must be 0,1,2".into(),
        ));
    }
    Ok(())
}

// --------------------------
// Registry CRUD
// --------------------------

#[derive(Debug, Deserialize)]
pub struct CreateChildRequest {
    pub full_name: String,
    pub guardian_name: String,
    /// Stored as entered; normalization happens at send time.
    pub phone: Option<String>,
    pub birthday: chrono::NaiveDate,
    pub gender: i16, // 0,1,2
    pub status: Option<i16>, // default 0
}

pub async fn create_child(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateChildRequest>,
) -> Result<Json<ChildRow>, ApiError> {
    ensure_staff(&auth)?;

    let full_name = req.full_name.trim();
    let guardian_name = req.guardian_name.trim();

    if full_name.is_empty() || guardian_name.is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "full_name and guardian_name are required".to_string(),
        ));
    }
    validate_gender(req.gender)?;

    let phone = req
        .phone
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let status = req.status.unwrap_or(CHILD_STATUS_ACTIVE);

    let row: ChildRow = sqlx::query_as::<_, ChildRow>(
        r#"
        INSERT INTO child (full_name, guardian_name, phone, birthday, gender, status, created_at, updated_at)
        VALUES ($1,$2,$3,$4,$5,$6, now(), now())
        RETURNING child_id, full_name, guardian_name, phone, birthday, gender, status, created_at, updated_at
        "#,
    )
    .bind(full_name)
    .bind(guardian_name)
    .bind(phone)
    .bind(req.birthday)
    .bind(req.gender)
    .bind(status)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(row))
}

pub async fn get_child(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(child_id): Path<Uuid>,
) -> Result<Json<ChildRow>, ApiError> {
    ensure_staff(&auth)?;

    let row: ChildRow = sqlx::query_as::<_, ChildRow>(
        r#"
        SELECT child_id, full_name, guardian_name, phone, birthday, gender, status, created_at, updated_at
        FROM child
        WHERE child_id = $1
        "#,
    )
    .bind(child_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "child not found".to_string()))?;

    Ok(Json(row))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: Option<String>,
}

pub async fn search_children(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<SearchQuery>,
) -> Result<Json<Vec<ChildRow>>, ApiError> {
    ensure_staff(&auth)?;

    let query = q.query.unwrap_or_default().trim().to_string();
    if query.is_empty() {
        // default: most recent
        let rows: Vec<ChildRow> = sqlx::query_as::<_, ChildRow>(
            r#"
            SELECT child_id, full_name, guardian_name, phone, birthday, gender, status, created_at, updated_at
            FROM child
            ORDER BY created_at DESC
            LIMIT 50
            "#,
        )
        .fetch_all(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;
        return Ok(Json(rows));
    }

    let like = format!("%{}%", query);

    let rows: Vec<ChildRow> = sqlx::query_as::<_, ChildRow>(
        r#"
        SELECT child_id, full_name, guardian_name, phone, birthday, gender, status, created_at, updated_at
        FROM child
        WHERE full_name ILIKE $1
           OR guardian_name ILIKE $1
        ORDER BY created_at DESC
        LIMIT 50
        "#,
    )
    .bind(like)
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct UpdateChildRequest {
    pub full_name: Option<String>,
    pub guardian_name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub phone: Option<Option<String>>,
    pub birthday: Option<chrono::NaiveDate>,
    pub gender: Option<i16>,
    pub status: Option<i16>,
}

pub async fn update_child(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(child_id): Path<Uuid>,
    Json(req): Json<UpdateChildRequest>,
) -> Result<Json<ChildRow>, ApiError> {
    ensure_staff(&auth)?;

    // Load existing
    let existing: ChildRow = sqlx::query_as::<_, ChildRow>(
        r#"
        SELECT child_id, full_name, guardian_name, phone, birthday, gender, status, created_at, updated_at
        FROM child
        WHERE child_id = $1
        "#,
    )
    .bind(child_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "child not found".to_string()))?;

    let full_name = match req.full_name.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => existing.full_name.clone(),
    };

    let guardian_name = match req.guardian_name.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => existing.guardian_name.clone(),
    };

    // For phone: explicitly null clears it; empty string also clears
    let phone: Option<String> = match req.phone {
        None => existing.phone.clone(), // field not provided => keep old
        Some(None) => None,             // explicitly null => clear
        Some(Some(p)) => {
            let t = p.trim();
            if t.is_empty() { None } else { Some(t.to_string()) }
        }
    };

    let birthday = req.birthday.unwrap_or(existing.birthday);
    let gender = req.gender.unwrap_or(existing.gender);
    let status = req.status.unwrap_or(existing.status);

    validate_gender(gender)?;
    if status < 0 || status > 3 {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "status must be 0..3".into(),
        ));
    }

    let updated: ChildRow = sqlx::query_as::<_, ChildRow>(
        r#"
        UPDATE child
        SET full_name = $1,
            guardian_name = $2,
            phone = $3,
            birthday = $4,
            gender = $5,
            status = $6,
            updated_at = now()
        WHERE child_id = $7
        RETURNING child_id, full_name, guardian_name, phone, birthday, gender, status, created_at, updated_at
        "#,
    )
    .bind(full_name)
    .bind(guardian_name)
    .bind(phone)
    .bind(birthday)
    .bind(gender)
    .bind(status)
    .bind(child_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(updated))
}

pub async fn archive_child(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(child_id): Path<Uuid>,
) -> Result<Json<ChildRow>, ApiError> {
    ensure_staff(&auth)?;
    set_child_status(&state, child_id, CHILD_STATUS_ARCHIVED).await
}

pub async fn restore_child(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(child_id): Path<Uuid>,
) -> Result<Json<ChildRow>, ApiError> {
    ensure_staff(&auth)?;
    set_child_status(&state, child_id, CHILD_STATUS_ACTIVE).await
}

async fn set_child_status(
    state: &AppState,
    child_id: Uuid,
    status: i16,
) -> Result<Json<ChildRow>, ApiError> {
    let updated: ChildRow = sqlx::query_as::<_, ChildRow>(
        r#"
        UPDATE child
        SET status = $1, updated_at = now()
        WHERE child_id = $2
        RETURNING child_id, full_name, guardian_name, phone, birthday, gender, status, created_at, updated_at
        "#,
    )
    .bind(status)
    .bind(child_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "child not found".into()))?;

    Ok(Json(updated))
}

// --------------------------
// Vaccination schedule
// --------------------------

pub async fn list_schedule(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(child_id): Path<Uuid>,
) -> Result<Json<Vec<VaccinationScheduleRow>>, ApiError> {
    ensure_staff(&auth)?;

    let rows: Vec<VaccinationScheduleRow> = sqlx::query_as::<_, VaccinationScheduleRow>(
        r#"
        SELECT schedule_id, child_id, vaccine_name, dose_number, target_disease,
               due_date, administered_at, created_at
        FROM vaccination_schedule
        WHERE child_id = $1
        ORDER BY due_date ASC, vaccine_name ASC
        "#,
    )
    .bind(child_id)
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct AddScheduleEntryRequest {
    pub vaccine_name: String,
    pub dose_number: i32,
    pub target_disease: String,
    pub due_date: chrono::NaiveDate,
}

fn validate_schedule_entry(vaccine_name: &str, dose_number: i32, target_disease: &str) -> Result<(), ApiError> {
    if vaccine_name.is_empty() || target_disease.is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "vaccine_name and target_disease are required".into(),
        ));
    }
    if dose_number < 1 {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "dose_number must be >= 1".into(),
        ));
    }
    Ok(())
}

pub async fn add_schedule_entry(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(child_id): Path<Uuid>,
    Json(req): Json<AddScheduleEntryRequest>,
) -> Result<Json<VaccinationScheduleRow>, ApiError> {
    ensure_staff(&auth)?;

    let vaccine_name = req.vaccine_name.trim();
    let target_disease = req.target_disease.trim();
    validate_schedule_entry(vaccine_name, req.dose_number, target_disease)?;

    // Ensure the child exists so a bad id surfaces as 404, not an FK error
    let exists: Option<Uuid> = sqlx::query_scalar(
        r#"
        SELECT child_id
        FROM child
        WHERE child_id = $1
        "#,
    )
    .bind(child_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    if exists.is_none() {
        return Err(ApiError::NotFound("NOT_FOUND", "child not found".into()));
    }

    let row: VaccinationScheduleRow = sqlx::query_as::<_, VaccinationScheduleRow>(
        r#"
        INSERT INTO vaccination_schedule (child_id, vaccine_name, dose_number, target_disease, due_date)
        VALUES ($1,$2,$3,$4,$5)
        RETURNING schedule_id, child_id, vaccine_name, dose_number, target_disease,
                  due_date, administered_at, created_at
        "#,
    )
    .bind(child_id)
    .bind(vaccine_name)
    .bind(req.dose_number)
    .bind(target_disease)
    .bind(req.due_date)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(row))
}

// --------------------------
// Registration SMS (fallback path)
// --------------------------

/// Flat legacy shape, same as /sms/broadcast.
#[derive(Debug, Serialize)]
pub struct SendRegistrationResponse {
    pub success: bool,
    pub message: String,
}

pub async fn send_registration_sms(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(child_id): Path<Uuid>,
) -> Result<Json<SendRegistrationResponse>, ApiError> {
    ensure_dispatch_role(auth.role)?;

    let child: ChildRow = sqlx::query_as::<_, ChildRow>(
        r#"
        SELECT child_id, full_name, guardian_name, phone, birthday, gender, status, created_at, updated_at
        FROM child
        WHERE child_id = $1
        "#,
    )
    .bind(child_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "child not found".into()))?;

    let phone = child
        .phone
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            ApiError::BadRequest(
                "VALIDATION_ERROR",
                "child has no guardian phone on record".into(),
            )
        })?;

    let schedule: Vec<VaccinationScheduleRow> = sqlx::query_as::<_, VaccinationScheduleRow>(
        r#"
        SELECT schedule_id, child_id, vaccine_name, dose_number, target_disease,
               due_date, administered_at, created_at
        FROM vaccination_schedule
        WHERE child_id = $1
        ORDER BY due_date ASC
        "#,
    )
    .bind(child_id)
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let entries: Vec<ScheduleEntry> = schedule
        .into_iter()
        .map(|r| ScheduleEntry {
            vaccine_name: r.vaccine_name,
            dose_number: r.dose_number,
            target_disease: r.target_disease,
            due_date: r.due_date,
        })
        .collect();

    let audit = PgAttemptStore::new(state.db.clone());
    let coordinator = FallbackCoordinator::new(
        state.sms.gateway.as_ref(),
        state.sms.direct_gateway.as_deref(),
        &audit,
        state.sms.phone_policy,
    );

    let outcome = coordinator
        .send_registration(
            child.child_id,
            &child.guardian_name,
            &child.full_name,
            phone,
            &entries,
            Utc::now().date_naive(),
        )
        .await;

    let message = if outcome.success {
        "registration SMS sent".to_string()
    } else {
        outcome
            .error_detail
            .unwrap_or_else(|| "registration SMS failed".to_string())
    };

    Ok(Json(SendRegistrationResponse {
        success: outcome.success,
        message,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_entry_validator() {
        assert!(validate_schedule_entry("BCG", 1, "Tuberculosis").is_ok());
        assert!(validate_schedule_entry("", 1, "Tuberculosis").is_err());
        assert!(validate_schedule_entry("BCG", 0, "Tuberculosis").is_err());
        assert!(validate_schedule_entry("BCG", 1, "").is_err());
    }

    #[test]
    fn gender_validator_bounds() {
        assert!(validate_gender(0).is_ok());
        assert!(validate_gender(2).is_ok());
        assert!(validate_gender(3).is_err());
        assert!(validate_gender(-1).is_err());
    }
}
