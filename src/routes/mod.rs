use crate::models::AppState;
use axum::Router;

pub mod health_routes;
pub mod image_routes;

pub fn router(state: AppState) -> Router {
    let max_upload_bytes = state.max_upload_bytes;
    Router::new()
        .nest("/api/v1", image_routes::router(max_upload_bytes))
        .merge(health_routes::router())
        .with_state(state)
}
