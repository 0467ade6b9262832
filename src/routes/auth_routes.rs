use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use chrono::{Duration, Utc};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::{generate_access_token, hash_access_token, hash_password, verify_password},
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{role_to_string, *},
};

// Session type according to migrations/002_session_token.sql
const SESSION_TYPE_STAFF_PORTAL: i16 = 1;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/me", get(me))
        .route("/logout", post(logout))
        // Rotate access token for the current session (invalidates old token immediately)
        .route("/refresh", post(refresh))
        .route("/change_password", post(change_password))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let username = req.username.trim();
    if username.is_empty() || req.password.is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "username and password are required".into(),
        ));
    }

    // 1) Load cirs_user
    let cirs_user: UserRow = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT user_id, username, display_name, password_hash, roles, is_active
        FROM "cirs_user"
        WHERE username = $1
        "#,
    )
    .bind(username)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(ApiError::invalid_credentials)?;

    if !cirs_user.is_active {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Account is disabled".into(),
        ));
    }

    // 2) Verify password
    if !verify_password(&req.password, &cirs_user.password_hash) {
        return Err(ApiError::invalid_credentials());
    }

    // 3) Create session_token
    let access_token = generate_access_token();
    let token_hash = hash_access_token(&access_token);

    let ttl_hours = if req.remember_me.unwrap_or(false) {
        24 * 7
    } else {
        state.session_ttl_hours
    };

    let expires_at = Utc::now() + Duration::hours(ttl_hours);

    let session: SessionTokenRow = sqlx::query_as::<_, SessionTokenRow>(
        r#"
        INSERT INTO session_token
            (user_id, session_token_hash, session_type, device_name, expires_at)
        VALUES
            ($1, $2, $3, $4, $5)
        RETURNING session_token_id, user_id, expires_at
        "#,
    )
    .bind(cirs_user.user_id)
    .bind(&token_hash)
    .bind(SESSION_TYPE_STAFF_PORTAL)
    .bind(req.device_name.as_deref())
    .bind(expires_at)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(LoginResponse {
        data: LoginResponseData {
            access_token,
            expires_at: session.expires_at,
            cirs_user: UserProfile {
                user_id: cirs_user.user_id,
                username: cirs_user.username,
                display_name: cirs_user.display_name,
                roles: vec![role_to_string(cirs_user.roles)],
            },
        },
    }))
}

pub async fn me(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<MeResponse>, ApiError> {
    // Load cirs_user
    let cirs_user: UserRow = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT user_id, username, display_name, password_hash, roles, is_active
        FROM "cirs_user"
        WHERE user_id = $1
        "#,
    )
    .bind(auth.user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(ApiError::session_expired)?;

    if !cirs_user.is_active {
        return Err(ApiError::session_expired());
    }

    // Load session token (ensure still active)
    let session: SessionTokenRow = sqlx::query_as::<_, SessionTokenRow>(
        r#"
        SELECT session_token_id, user_id, expires_at
        FROM session_token
        WHERE session_token_id = $1
          AND user_id = $2
          AND revoked_at IS NULL
          AND expires_at > now()
        "#,
    )
    .bind(auth.session_token_id)
    .bind(auth.user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(ApiError::session_expired)?;

    Ok(Json(MeResponse {
        data: MeResponseData {
            cirs_user: UserProfile {
                user_id: cirs_user.user_id,
                username: cirs_user.username,
                display_name: cirs_user.display_name,
                roles: vec![role_to_string(cirs_user.roles)],
            },
            session: SessionInfo {
                session_token_id: session.session_token_id,
                expires_at: session.expires_at,
            },
            message: "login success".into(),
        },
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<OkResponse>, ApiError> {
    let rows = sqlx::query(
        r#"
        UPDATE session_token
        SET revoked_at = now()
        WHERE session_token_id = $1
          AND user_id = $2
          AND revoked_at IS NULL
        "#,
    )
    .bind(auth.session_token_id)
    .bind(auth.user_id)
    .execute(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    if rows.rows_affected() == 0 {
        return Err(ApiError::session_expired());
    }

    Ok(Json(OkResponse {
        data: OkData { ok: true },
    }))
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub data: RefreshData,
}

#[derive(Debug, Serialize)]
pub struct RefreshData {
    pub ok: bool,
    pub access_token: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub session_token_id: Uuid,
}

/// POST /api/v1/auth/refresh
/// Rotates the access token for the *current* session.
/// This immediately invalidates the old token, but keeps the same session_token_id.
pub async fn refresh(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<RefreshResponse>, ApiError> {
    let new_token = generate_access_token();
    let new_hash = hash_access_token(&new_token);

    let row: Option<(chrono::DateTime<chrono::Utc>,)> = sqlx::query_as(
        r#"
        UPDATE session_token
        SET session_token_hash = $1,
            last_seen_at = now()
        WHERE session_token_id = $2
          AND user_id = $3
          AND revoked_at IS NULL
          AND expires_at > now()
        RETURNING expires_at
        "#,
    )
    .bind(new_hash)
    .bind(auth.session_token_id)
    .bind(auth.user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let expires_at = row.ok_or_else(ApiError::session_expired)?.0;

    Ok(Json(RefreshResponse {
        data: RefreshData {
            ok: true,
            access_token: new_token,
            expires_at,
            session_token_id: auth.session_token_id,
        },
    }))
}

// =========================
// Password management
// =========================

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct ChangePasswordResponse {
    pub data: OkData,
}

fn validate_new_password(pw: &str) -> Result<(), ApiError> {
    let pw = pw.trim();
    if pw.len() < 8 {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "new_password must be at least 8 characters".into(),
        ));
    }
    Ok(())
}

pub async fn change_password(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<ChangePasswordResponse>, ApiError> {
    if req.old_password.is_empty() || req.new_password.is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "old_password and new_password are required".into(),
        ));
    }
    validate_new_password(&req.new_password)?;

    // Load current hash
    let row: (String,) = sqlx::query_as(
        r#"
        SELECT password_hash
        FROM "cirs_user"
        WHERE user_id = $1
          AND is_active = true
        "#,
    )
    .bind(auth.user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(ApiError::session_expired)?;

    // Verify old password
    if !verify_password(&req.old_password, &row.0) {
        // Use invalid_credentials to avoid leaking info
        return Err(ApiError::invalid_credentials());
    }

    // Hash + update
    let new_hash = hash_password(&req.new_password).map_err(ApiError::Internal)?;

    // Do in a transaction so we can revoke sessions consistently
    let mut tx = state
        .db
        .begin()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    sqlx::query(
        r#"
        UPDATE "cirs_user"
        SET password_hash = $1
        WHERE user_id = $2
        "#,
    )
    .bind(new_hash)
    .bind(auth.user_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    // Security: revoke all OTHER active sessions (keep current)
    sqlx::query(
        r#"
        UPDATE session_token
        SET revoked_at = now()
        WHERE user_id = $1
          AND revoked_at IS NULL
          AND expires_at > now()
          AND session_token_id <> $2
        "#,
    )
    .bind(auth.user_id)
    .bind(auth.session_token_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    tx.commit()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(ChangePasswordResponse {
        data: OkData { ok: true },
    }))
}
