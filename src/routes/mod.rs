pub mod api;
pub mod auth_middleware;

use axum::{http::HeaderValue, routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::Config;
use crate::docs::ApiDoc;
use crate::ws::handler::websocket_handler;
use crate::AppState;

pub use api::create_api_routes;

/// Everything the server exposes: the lesson channel, the REST API and its docs.
pub fn create_app(state: AppState, config: &Config) -> Router {
    let ws_routes = Router::new()
        .route("/ws/lesson/:lesson_id", get(websocket_handler))
        .with_state(state.clone());

    Router::new()
        .merge(ws_routes)
        // Mount API routes
        .nest("/api", create_api_routes(state))
        // Mount Swagger UI
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors_layer(config))
        // Add tracing layer
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origin_list()
        .into_iter()
        .filter_map(|origin| match HeaderValue::from_str(&origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        if config.is_development() {
            return layer.allow_origin(Any);
        }
        return layer;
    }
    layer.allow_origin(origins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::DenyAllAuthenticator;
    use crate::services::lesson_store::LoggingLessonStore;
    use crate::ws::{HubConfig, RoomHub};
    use axum::{body::Body, http::{Request, StatusCode}};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let hub = Arc::new(RoomHub::new(HubConfig::default(), Arc::new(LoggingLessonStore)));
        create_app(AppState::new(hub, Arc::new(DenyAllAuthenticator)), &Config::default())
    }

    #[tokio::test]
    async fn health_is_public() {
        let response = app()
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn collaborators_without_token_are_unauthorized() {
        let response = app()
            .oneshot(Request::builder().uri("/api/collaboration/L1/users").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn collaborators_with_rejected_token_are_unauthorized() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/api/collaboration/L1/users")
                    .header("Authorization", "Bearer whatever")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let response = app()
            .oneshot(Request::builder().uri("/api-docs/openapi.json").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
