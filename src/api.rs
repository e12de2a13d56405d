//! HTTP client for the messaging backend.
//!
//! DESIGN
//! ======
//! [`MessagingApi`] is the seam between the controller and the network so
//! tests can swap in a scripted fake. [`HttpApi`] is the real implementation:
//! form-encoded requests, JSON responses, one shared `reqwest::Client`.
//!
//! ERROR HANDLING
//! ==============
//! Transport errors, non-2xx statuses, and undecodable bodies all surface as
//! [`ApiError`]. The controller does not distinguish between them.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::{ClientConfig, HttpTimeouts};
use crate::types::{User, WireRecord};

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request never produced a response.
    #[error("request failed: {0}")]
    Request(String),

    /// The backend answered with a non-success status.
    #[error("backend returned status {status}")]
    Status { status: u16, body: String },

    /// The response body was not the expected JSON shape.
    #[error("response decode failed: {0}")]
    Decode(String),

    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

impl ApiError {
    /// HTTP status for log lines; `0` when no response arrived.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::Status { status, .. } => *status,
            _ => 0,
        }
    }
}

// =============================================================================
// TRAIT
// =============================================================================

/// Operations the client needs from the backend.
#[async_trait::async_trait]
pub trait MessagingApi: Send + Sync {
    /// `GET /fetch_messages`
    async fn fetch_messages(&self) -> Result<Vec<WireRecord>, ApiError>;

    /// `GET /users/`
    async fn fetch_users(&self) -> Result<Vec<WireRecord>, ApiError>;

    /// `GET /users?user_id={id}`. Returns the raw body; unknown users come
    /// back as `{}`.
    async fn lookup_user(&self, user_id: &str) -> Result<Value, ApiError>;

    /// `POST /users` with `name` (and `avatar` when given).
    async fn create_user(&self, name: &str, avatar: Option<&str>) -> Result<User, ApiError>;

    /// `POST /send_message` with `message` (and `user_id` when given).
    async fn send_message(&self, text: &str, user_id: Option<&str>) -> Result<(), ApiError>;
}

// =============================================================================
// HTTP IMPLEMENTATION
// =============================================================================

pub struct HttpApi {
    http: reqwest::Client,
    base_url: String,
}

impl HttpApi {
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn new(base_url: &str, timeouts: HttpTimeouts) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeouts.request_secs))
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .build()
            .map_err(|e| ApiError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, base_url: crate::config::normalize_base_url(base_url) })
    }

    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ApiError> {
        Self::new(&config.base_url, config.timeouts)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String, ApiError> {
        let response = request.send().await.map_err(|e| ApiError::Request(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Request(e.to_string()))?;
        if !status.is_success() {
            return Err(ApiError::Status { status: status.as_u16(), body });
        }
        Ok(body)
    }

    async fn get_json<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T, ApiError> {
        let body = self.send(request).await?;
        serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait::async_trait]
impl MessagingApi for HttpApi {
    async fn fetch_messages(&self) -> Result<Vec<WireRecord>, ApiError> {
        self.get_json(self.http.get(self.url("/fetch_messages"))).await
    }

    async fn fetch_users(&self) -> Result<Vec<WireRecord>, ApiError> {
        self.get_json(self.http.get(self.url("/users/"))).await
    }

    async fn lookup_user(&self, user_id: &str) -> Result<Value, ApiError> {
        let request = self.http.get(self.url("/users")).query(&[("user_id", user_id)]);
        self.get_json(request).await
    }

    async fn create_user(&self, name: &str, avatar: Option<&str>) -> Result<User, ApiError> {
        let mut form = vec![("name", name)];
        if let Some(avatar) = avatar {
            form.push(("avatar", avatar));
        }
        let value: Value = self.get_json(self.http.post(self.url("/users")).form(&form)).await?;
        User::from_lookup(value).ok_or_else(|| ApiError::Decode("created user has no user_id".to_owned()))
    }

    async fn send_message(&self, text: &str, user_id: Option<&str>) -> Result<(), ApiError> {
        let mut form = vec![("message", text)];
        if let Some(user_id) = user_id {
            form.push(("user_id", user_id));
        }
        self.send(self.http.post(self.url("/send_message")).form(&form)).await?;
        Ok(())
    }
}
