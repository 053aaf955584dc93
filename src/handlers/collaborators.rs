use crate::{auth::Identity, models::{CollaboratorsResponse, ErrorResponse}, AppState};
use axum::{extract::{State, Path, Extension}, http::StatusCode, Json};
use tracing::debug;

/// List the users currently connected to a lesson
pub async fn list_collaborators(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(lesson_id): Path<String>,
) -> Result<(StatusCode, Json<CollaboratorsResponse>), (StatusCode, Json<ErrorResponse>)> {

    let lesson_id = lesson_id.trim();
    if lesson_id.is_empty() {
        return Err(ErrorResponse::with_status(StatusCode::BAD_REQUEST, "Lesson id must not be empty"));
    }

    debug!("User {} listing collaborators of {}", identity.user_id, lesson_id);
    let active_users = state.hub.active_users(lesson_id);

    Ok((StatusCode::OK, Json(CollaboratorsResponse {
        lesson_id: lesson_id.to_string(),
        active_users,
    })))
}
