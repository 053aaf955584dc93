use std::future::Future;
use std::pin::Pin;

/// Display name used when the identity provider has none for the user.
pub const UNKNOWN_USER_NAME: &str = "Unknown";

/// The authenticated user behind a token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub user_name: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, user_name: impl Into<String>) -> Self {
        let user_name = user_name.into();
        let user_name = if user_name.trim().is_empty() {
            UNKNOWN_USER_NAME.to_string()
        } else {
            user_name.trim().to_string()
        };
        Self {
            user_id: user_id.into(),
            user_name,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing auth token")]
    MissingToken,
    #[error("invalid auth token: {0}")]
    InvalidToken(String),
    #[error("identity lookup failed: {0}")]
    Upstream(String),
    #[error("no authenticator configured")]
    NotConfigured,
}

pub type AuthFuture<'a> = Pin<Box<dyn Future<Output = Result<Identity, AuthError>> + Send + 'a>>;

/// Resolves a session token into the identity it was issued for.
pub trait Authenticator: Send + Sync {
    fn resolve<'a>(&'a self, token: &'a str) -> AuthFuture<'a>;
}

/// Refuses every token. Used when neither a JWT secret nor an app service is configured.
pub struct DenyAllAuthenticator;

impl Authenticator for DenyAllAuthenticator {
    fn resolve<'a>(&'a self, _token: &'a str) -> AuthFuture<'a> {
        Box::pin(async { Err(AuthError::NotConfigured) })
    }
}
