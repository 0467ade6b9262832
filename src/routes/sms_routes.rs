// src/routes/sms_routes.rs

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::QueryBuilder;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{AppState, SmsLogRow},
    sms::audit::PgAttemptStore,
    sms::dispatcher::Dispatcher,
    sms::ensure_dispatch_role,
    sms::error::SmsError,
    sms::phone::{self, PhonePolicy},
    sms::recipients::{PgRecipientSource, Recipient, RecipientSource, Scope},
    sms::template::{self, MessageKind, SimpleValues},
};

// --------------------------
// Router
// --------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sms/broadcast", post(broadcast_sms))
        .route("/sms/recipients", get(list_recipients))
        .route("/sms/log", get(search_sms_log))
        .route("/sms/preview", post(preview_sms))
        .route("/phone_numbers/normalize", post(normalize_phone_number))
        .route("/sms/gateway/health", get(gateway_health))
}

// --------------------------
// RBAC helpers
// --------------------------
// roles: 0 parent, 1 admin, 2 nurse. Dispatch endpoints go through
// ensure_dispatch_role; read-only endpoints accept any staff session.

fn ensure_staff(auth: &AuthContext) -> Result<(), ApiError> {
    if auth.role == crate::models::ROLE_ADMIN || auth.role == crate::models::ROLE_NURSE {
        Ok(())
    } else {
        Err(ApiError::Forbidden("FORBIDDEN", "admin/nurse only".into()))
    }
}

// --------------------------
// Broadcast
// --------------------------

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub message: String,
    /// "all" or "specific"
    pub scope: String,
    pub child_ids: Option<Vec<Uuid>>,
    /// Template selector from the admin UI: missed | upcoming | rescheduled | custom
    pub template: String,
}

/// Flat legacy shape; clients read the counts out of `message`.
#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    pub success: bool,
    pub message: String,
}

pub async fn broadcast_sms(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<BroadcastRequest>,
) -> Result<Json<BroadcastResponse>, ApiError> {
    ensure_dispatch_role(auth.role)?;

    let kind = MessageKind::from_selector(req.template.trim())?;
    let scope = Scope::parse(req.scope.trim(), req.child_ids.clone())?;

    let source = PgRecipientSource::new(state.db.clone());
    let audit = PgAttemptStore::new(state.db.clone());
    let dispatcher = Dispatcher::new(
        &source,
        state.sms.gateway.as_ref(),
        &audit,
        state.sms.phone_policy,
        state.sms.strict_templates,
    );

    let outcome = dispatcher.dispatch(&req.message, &scope, kind).await?;

    tracing::info!(
        sent = outcome.sent,
        failed = outcome.failed,
        kind = kind.as_str(),
        "sms broadcast finished"
    );

    Ok(Json(BroadcastResponse {
        success: outcome.success(),
        message: outcome.message(),
    }))
}

// --------------------------
// Recipients
// --------------------------

pub async fn list_recipients(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<Vec<Recipient>>, ApiError> {
    ensure_staff(&auth)?;

    let source = PgRecipientSource::new(state.db.clone());
    let recipients = match source.resolve(&Scope::All).await {
        Ok(r) => r,
        // An empty registry is an empty list here, not an error; the
        // distinct NoRecipients error belongs to the broadcast path.
        Err(SmsError::NoRecipients) => Vec::new(),
        Err(e) => return Err(e.into()),
    };

    Ok(Json(recipients))
}

// --------------------------
// Audit log search
// --------------------------

#[derive(Debug, Deserialize)]
pub struct SmsLogSearchQuery {
    pub child_id: Option<Uuid>,
    pub status: Option<i16>, // 0 failed, 1 success
    pub kind: Option<i16>,   // MessageKind as smallint
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub q: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

fn validate_log_query(status: Option<i16>, kind: Option<i16>) -> Result<(), ApiError> {
    if let Some(s) = status {
        if s != 0 && s != 1 {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "status must be 0 or 1".into(),
            ));
        }
    }
    if let Some(k) = kind {
        if !(0..=4).contains(&k) {
            return Err(ApiError::BadRequest(
                "VALIDATION_ERROR",
                "kind must be between 0 and 4".into(),
            ));
        }
    }
    Ok(())
}

pub async fn search_sms_log(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<SmsLogSearchQuery>,
) -> Result<Json<Vec<SmsLogRow>>, ApiError> {
    ensure_staff(&auth)?;

    validate_log_query(q.status, q.kind)?;

    let limit = q.limit.unwrap_or(50).clamp(1, 200);
    let offset = q.offset.unwrap_or(0).max(0);

    // Use QueryBuilder for safe dynamic SQL
    let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
        r#"
        SELECT
          l.sms_log_id,
          l.child_id,
          l.phone,
          l.message,
          l.provider_response,
          l.status,
          l.message_kind,
          l.created_at
        FROM sms_log l
        WHERE 1=1
        "#,
    );

    if let Some(cid) = q.child_id {
        qb.push(" AND l.child_id = ");
        qb.push_bind(cid);
    }
    if let Some(status) = q.status {
        qb.push(" AND l.status = ");
        qb.push_bind(status);
    }
    if let Some(kind) = q.kind {
        qb.push(" AND l.message_kind = ");
        qb.push_bind(kind);
    }
    if let Some(from) = q.from {
        qb.push(" AND l.created_at >= ");
        qb.push_bind(from);
    }
    if let Some(to) = q.to {
        qb.push(" AND l.created_at <= ");
        qb.push_bind(to);
    }
    if let Some(keyword) = q.q.as_ref().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        let like = format!("%{}%", keyword);

        qb.push(" AND (l.message ILIKE ");
        qb.push_bind(like.clone()); // bind owned
        qb.push(" OR l.phone ILIKE ");
        qb.push_bind(like); // move owned
        qb.push(") ");
    }

    qb.push(" ORDER BY l.created_at DESC ");
    qb.push(" LIMIT ");
    qb.push_bind(limit);
    qb.push(" OFFSET ");
    qb.push_bind(offset);

    let rows: Vec<SmsLogRow> = qb
        .build_query_as::<SmsLogRow>()
        .fetch_all(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(rows))
}

// --------------------------
// Preview: render without sending
// --------------------------

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub template: String,
    pub child_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub data: PreviewData,
}

#[derive(Debug, Serialize)]
pub struct PreviewData {
    pub rendered: String,
}

#[derive(Debug, sqlx::FromRow)]
struct ChildLiteRow {
    full_name: String,
    guardian_name: String,
}

pub async fn preview_sms(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<PreviewRequest>,
) -> Result<Json<PreviewResponse>, ApiError> {
    ensure_staff(&auth)?;

    let tpl = req.template.trim().to_string();
    if tpl.is_empty() {
        return Err(ApiError::BadRequest(
            "VALIDATION_ERROR",
            "template is required".into(),
        ));
    }

    let child: ChildLiteRow = sqlx::query_as::<_, ChildLiteRow>(
        r#"
        SELECT full_name, guardian_name
        FROM child
        WHERE child_id = $1
        "#,
    )
    .bind(req.child_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
    .ok_or_else(|| ApiError::NotFound("NOT_FOUND", "child not found".into()))?;

    if state.sms.strict_templates {
        template::ensure_no_unbound_named(&tpl)?;
    }

    let rendered = template::render_simple(
        &tpl,
        SimpleValues {
            guardian_name: Some(&child.guardian_name),
            child_name: Some(&child.full_name),
        },
        state.sms.strict_templates,
    )?;

    Ok(Json(PreviewResponse {
        data: PreviewData { rendered },
    }))
}

// --------------------------
// Phone normalize utility
// --------------------------

#[derive(Debug, Deserialize)]
pub struct NormalizeRequest {
    pub raw: String,
    /// "e164" or "kenya_local"; defaults to the configured broadcast policy.
    pub policy: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NormalizeResponse {
    pub data: NormalizeData,
}

#[derive(Debug, Serialize)]
pub struct NormalizeData {
    pub normalized: String,
    pub policy: PhonePolicy,
}

pub async fn normalize_phone_number(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<NormalizeRequest>,
) -> Result<Json<NormalizeResponse>, ApiError> {
    ensure_staff(&auth)?;

    let policy = match req.policy.as_deref() {
        Some(s) => s
            .parse::<PhonePolicy>()
            .map_err(|e| ApiError::BadRequest("VALIDATION_ERROR", e))?,
        None => state.sms.phone_policy,
    };

    let normalized = phone::normalize(req.raw.trim(), policy)?;
    Ok(Json(NormalizeResponse {
        data: NormalizeData { normalized, policy },
    }))
}

// --------------------------
// Gateway health passthrough
// --------------------------

#[derive(Debug, Serialize)]
pub struct GatewayHealthResponse {
    pub data: GatewayHealthData,
}

#[derive(Debug, Serialize)]
pub struct GatewayHealthData {
    pub gateway: String,
    pub healthy: bool,
}

pub async fn gateway_health(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<GatewayHealthResponse>, ApiError> {
    ensure_staff(&auth)?;

    let healthy = state.sms.gateway.is_healthy().await;
    Ok(Json(GatewayHealthResponse {
        data: GatewayHealthData {
            gateway: state.sms.gateway.name().to_string(),
            healthy,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_query_validator_bounds() {
        assert!(validate_log_query(None, None).is_ok());
        assert!(validate_log_query(Some(0), Some(4)).is_ok());
        assert!(validate_log_query(Some(2), None).is_err());
        assert!(validate_log_query(None, Some(5)).is_err());
        assert!(validate_log_query(None, Some(-1)).is_err());
    }
}
