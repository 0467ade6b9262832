use crate::models::AppState;
use axum::Router;

pub mod auth_routes;
pub mod child_routes;
pub mod home_routes;
pub mod sms_routes;
pub mod user_routes;

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1/auth", auth_routes::router())
        .nest("/api/v1/users", user_routes::router())
        .nest("/api/v1", child_routes::router())
        .nest("/api/v1", sms_routes::router())
        .nest("/api/v1", home_routes::router())
        .with_state(state)
}
