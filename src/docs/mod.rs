use utoipa::OpenApi;
use crate::models::*;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Readiness check endpoint
#[utoipa::path(
    get,
    path = "/api/ready",
    responses(
        (status = 200, description = "Service is ready", body = ReadyResponse)
    )
)]
#[allow(dead_code)]
pub async fn ready_check_doc() {}

/// Users currently connected to a lesson
#[utoipa::path(
    get,
    path = "/api/collaboration/{lesson_id}/users",
    params(
        ("lesson_id" = String, Path, description = "Lesson identifier")
    ),
    responses(
        (status = 200, description = "Active collaborators", body = CollaboratorsResponse),
        (status = 400, description = "Invalid lesson id", body = ErrorResponse),
        (status = 401, description = "Missing or invalid token")
    )
)]
#[allow(dead_code)]
pub async fn list_collaborators_doc() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        ready_check_doc,
        list_collaborators_doc,
    ),
    components(
        schemas(HealthResponse, ReadyResponse, CollaboratorsResponse, ActiveUser, ErrorResponse)
    ),
    tags(
        (name = "api", description = "API endpoints")
    )
)]
pub struct ApiDoc;
