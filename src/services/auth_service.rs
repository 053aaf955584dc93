use std::sync::Arc;
use std::time::Duration;
use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation, TokenData};
use moka::future::Cache;
use tracing::{debug, info, warn};

use crate::auth::{AuthError, AuthFuture, Authenticator, Identity};
use crate::clients::app_service_client::AppServiceClient;

const AUTH_COOKIE: &str = "auth_token";

// Get the auth token from the request headers, falling back to the `token` query parameter
pub fn get_auth_token(headers: &HeaderMap, query_token: Option<&str>) -> Result<String, AuthError> {
    // 1. Try to get token from Authorization header
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        let auth_str = auth_header
            .to_str()
            .map_err(|_| AuthError::InvalidToken("Invalid Authorization header".to_string()))?;
        let token = auth_str.strip_prefix("Bearer ").unwrap_or(auth_str).trim();
        if !token.is_empty() {
            return Ok(token.to_string());
        }
    }

    // 2. Try to get token from cookies
    if let Some(cookie_header) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) {
        for cookie in cookie::Cookie::split_parse(cookie_header).flatten() {
            if cookie.name() == AUTH_COOKIE && !cookie.value().is_empty() {
                return Ok(cookie.value().to_string());
            }
        }
    }

    // 3. Browsers cannot set headers on a WebSocket handshake, so accept ?token=
    match query_token.map(str::trim).filter(|t| !t.is_empty()) {
        Some(token) => Ok(token.to_string()),
        None => Err(AuthError::MissingToken),
    }
}

// Validate a JWT token and return the token data
pub fn validate_jwt(token: &str, secret: &str) -> Result<TokenData<serde_json::Value>, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    decode::<serde_json::Value>(token, &decoding_key, &validation)
}

/// Resolves identities from HS256 user JWTs.
pub struct JwtAuthenticator {
    secret: String,
}

impl JwtAuthenticator {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }

    fn identity_from_token(&self, token: &str) -> Result<Identity, AuthError> {
        let token_data = validate_jwt(token, &self.secret)
            .map_err(|e| AuthError::InvalidToken(format!("JWT validation failed: {}", e)))?;
        let claims = &token_data.claims;

        // Service tokens are for the app service, not for lesson channels
        if let Some(token_type) = claims.get("type").and_then(|v| v.as_str()) {
            if token_type != "user" {
                return Err(AuthError::InvalidToken(format!("Unexpected token type '{}'", token_type)));
            }
        }

        let uid = claims
            .get("sub")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AuthError::InvalidToken("Can't extract a UID from the JWT token".to_string()))?;

        let name = claims
            .get("name")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .or_else(|| claims.get("email").and_then(|v| v.as_str()))
            .unwrap_or_default();

        debug!("JWT token validated successfully for user: {}", uid);
        Ok(Identity::new(uid, name))
    }
}

impl Authenticator for JwtAuthenticator {
    fn resolve<'a>(&'a self, token: &'a str) -> AuthFuture<'a> {
        Box::pin(async move { self.identity_from_token(token) })
    }
}

/// Resolves opaque session tokens through the app service, caching hits.
pub struct AppServiceAuthenticator {
    client: Arc<AppServiceClient>,
    cache: Cache<String, Identity>,
}

impl AppServiceAuthenticator {
    pub fn new(client: Arc<AppServiceClient>, cache_ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(cache_ttl)
            .build();
        info!("Session token cache initialized");
        Self { client, cache }
    }

    async fn lookup(&self, token: &str) -> Result<Identity, AuthError> {
        if let Some(identity) = self.cache.get(token).await {
            return Ok(identity);
        }

        let user = self.client.get_session_user(token).await.map_err(|e| {
            warn!("Session lookup failed: {}", e);
            match e {
                crate::clients::app_service_client::AppServiceError::Status(status)
                    if status.is_client_error() => AuthError::InvalidToken(format!("app service answered {}", status)),
                other => AuthError::Upstream(other.to_string()),
            }
        })?;

        let name = user
            .name
            .filter(|n| !n.trim().is_empty())
            .or(user.email)
            .unwrap_or_default();
        let identity = Identity::new(user.id, name);
        self.cache.insert(token.to_string(), identity.clone()).await;
        Ok(identity)
    }
}

impl Authenticator for AppServiceAuthenticator {
    fn resolve<'a>(&'a self, token: &'a str) -> AuthFuture<'a> {
        Box::pin(self.lookup(token))
    }
}
