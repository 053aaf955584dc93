use reqwest::{Client, StatusCode};
use jsonwebtoken::{encode, Header, EncodingKey};
use serde::{Serialize, Deserialize};
use chrono::{Utc, Duration};

#[derive(Debug, thiserror::Error)]
pub enum AppServiceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to sign service token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("app service answered {0}")]
    Status(StatusCode),
}

/// HTTP client for the app service that owns users, sessions and lessons.
#[derive(Debug)]
pub struct AppServiceClient {
    client: Client,
    base_url: String,
    jwt_secret: Option<String>,
    service_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    #[serde(rename = "type")]
    type_: String,
    exp: usize,
}

/// User record returned for a session token
#[derive(Debug, Clone, Deserialize)]
pub struct SessionUser {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LessonFieldPatch<'a> {
    section_index: u32,
    field: &'a str,
    value: &'a str,
}

impl AppServiceClient {
    pub fn new(base_url: String, jwt_secret: Option<String>, service_name: String) -> Result<Self, AppServiceError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            jwt_secret,
            service_name,
        })
    }

    fn generate_token(&self, secret: &str) -> Result<String, AppServiceError> {
        let expiration = (Utc::now() + Duration::seconds(60)).timestamp(); // 1 minute expiration

        let claims = Claims {
            sub: self.service_name.clone(),
            type_: "service".to_string(),
            exp: expiration as usize,
        };

        Ok(encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))?)
    }

    /// Resolve the user behind a session token
    pub async fn get_session_user(&self, user_token: &str) -> Result<SessionUser, AppServiceError> {
        let url = format!("{}/auth/me", self.base_url);
        let response = self.client.get(&url)
            .header("Authorization", format!("Bearer {}", user_token))
            .send().await?;

        if !response.status().is_success() {
            return Err(AppServiceError::Status(response.status()));
        }
        Ok(response.json().await?)
    }

    /// Durably write one lesson field
    pub async fn patch_lesson_field(&self, lesson_id: &str, section_index: u32, field: &str, value: &str) -> Result<(), AppServiceError> {
        let url = format!("{}/lessons/{}/fields", self.base_url, lesson_id);
        let mut request = self.client.patch(&url)
            .json(&LessonFieldPatch { section_index, field, value });

        if let Some(secret) = &self.jwt_secret {
            let token = self.generate_token(secret)?;
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(AppServiceError::Status(response.status()));
        }
        Ok(())
    }
}
