use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Liveness of the collaboration server
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
}
