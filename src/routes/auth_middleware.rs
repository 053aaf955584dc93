use axum::{
    extract::{Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use serde::Deserialize;
use tracing::{debug, warn};
use crate::AppState;
use crate::auth::AuthError;
use crate::services::auth_service::get_auth_token;

#[derive(Debug, Default, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Resolve the caller's identity and make it available to handlers as an `Identity` extension.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {

    // 1. Get the auth token from the header, the cookie or the query string
    let query = Query::<TokenQuery>::try_from_uri(req.uri())
        .map(|Query(q)| q)
        .unwrap_or_default();
    let token = match get_auth_token(req.headers(), query.token.as_deref()) {
        Ok(token) => token,
        Err(e) => {
            debug!("Rejecting request to {}: {}", req.uri().path(), e);
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    // 2. Resolve it into an identity
    let identity = match state.authenticator.resolve(&token).await {
        Ok(identity) => identity,
        Err(AuthError::Upstream(e)) => {
            warn!("Identity lookup failed: {}", e);
            return Err(StatusCode::BAD_GATEWAY);
        }
        Err(e) => {
            warn!("Token rejected: {}", e);
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    // 3. Hand it to downstream handlers
    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
