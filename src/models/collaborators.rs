use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::ActiveUser;

/// Users currently connected to a lesson channel
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CollaboratorsResponse {
    pub lesson_id: String,
    pub active_users: Vec<ActiveUser>,
}
