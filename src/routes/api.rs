use crate::{handlers::{health_check, list_collaborators, ready_check}, routes::auth_middleware::auth_middleware, AppState};
use axum::{routing::get, Router, middleware};

/// Create API routes
pub fn create_api_routes(state: AppState) -> Router {
    let protected = Router::<AppState>::new()
        .route("/collaboration/:lesson_id/users", get(list_collaborators))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware)); // Applies to all routes added above

    Router::<AppState>::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .merge(protected)
        .with_state(state)
}
