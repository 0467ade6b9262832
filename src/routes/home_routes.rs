use axum::{Json, Router, extract::State, routing::get};

use crate::error::ApiError;
use crate::middleware::auth_context::AuthContext;
use crate::models::AppState;

#[derive(serde::Serialize)]
pub struct HomeResponse {
    pub data: HomeData,
}

#[derive(serde::Serialize)]
pub struct HomeData {
    pub view: String,
    pub message: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/home", get(home))
}

pub async fn home(
    State(_state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<HomeResponse>, ApiError> {
    // DB stores a single role (smallint):
    // 0 parent, 1 admin, 2 nurse
    let view = match auth.role {
        1 => "admin",
        2 => "nurse",
        0 => "parent",
        _ => "unknown",
    };

    Ok(Json(HomeResponse {
        data: HomeData {
            view: view.to_string(),
            message: "placeholder home payload (role-based)".to_string(),
        },
    }))
}
