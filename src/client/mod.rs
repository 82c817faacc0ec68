//! HTTP client for the notification service.
//!
//! [`NotificationApi`] is the seam between the engine and the network; the
//! engine only ever talks to the service through it. [`HttpNotificationApi`]
//! is the reqwest implementation:
//! - `GET  {base}/notifications` (timeout 10s)
//! - `PUT  {base}/notifications/{id}/read` (timeout 5s)

mod credential;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;

pub use credential::{CredentialSource, EnvCredential, StaticCredential};

use crate::config::{EngineConfig, DEFAULT_FETCH_TIMEOUT, DEFAULT_MARK_TIMEOUT};
use crate::engine::rate_limit::classify_status;
use crate::error::SyncError;
use crate::models::Notification;

/// Remote operations the engine needs from the notification service.
#[async_trait]
pub trait NotificationApi: Send + Sync {
    /// Full notification feed of the user owning `token`.
    async fn fetch_notifications(&self, token: &str) -> Result<Vec<Notification>, SyncError>;

    /// Acknowledge one notification as read. Idempotent.
    async fn mark_read(&self, id: &str, token: &str) -> Result<(), SyncError>;
}

/// reqwest-backed [`NotificationApi`].
#[derive(Debug, Clone)]
pub struct HttpNotificationApi {
    base_url: String,
    client: Client,
    fetch_timeout: Duration,
    mark_timeout: Duration,
}

impl HttpNotificationApi {
    /// Create with an explicit base URL and default timeouts.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: Client::new(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            mark_timeout: DEFAULT_MARK_TIMEOUT,
        }
    }

    /// Create from environment variables.
    pub fn from_env() -> Self {
        Self::from_config(&EngineConfig::from_env())
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.base_url.clone()).with_timeouts(config.fetch_timeout, config.mark_timeout)
    }

    pub fn with_timeouts(mut self, fetch: Duration, mark: Duration) -> Self {
        self.fetch_timeout = fetch;
        self.mark_timeout = mark;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build an authenticated request with a per-call timeout.
    fn request(
        &self,
        method: Method,
        path: &str,
        token: &str,
        timeout: Duration,
    ) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client
            .request(method, &url)
            .bearer_auth(token)
            .timeout(timeout)
    }

    /// Decode a successful response, converting HTTP errors to [`SyncError`].
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, SyncError> {
        let status = response.status();
        if status.is_success() {
            response.json().await.map_err(|e| SyncError::Server {
                status: status.as_u16(),
                message: format!("invalid response body: {e}"),
            })
        } else {
            Err(Self::error_for(status, response).await)
        }
    }

    /// Handle response that may return empty body (204 No Content).
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<(), SyncError> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Self::error_for(status, response).await)
        }
    }

    async fn error_for(status: StatusCode, response: reqwest::Response) -> SyncError {
        let body = response.text().await.unwrap_or_default();
        let message = if body.is_empty() {
            status.to_string()
        } else {
            body
        };
        classify_status(status.as_u16(), message)
    }
}

#[async_trait]
impl NotificationApi for HttpNotificationApi {
    async fn fetch_notifications(&self, token: &str) -> Result<Vec<Notification>, SyncError> {
        let response = self
            .request(Method::GET, "/notifications", token, self.fetch_timeout)
            .send()
            .await
            .map_err(transport_error)?;
        self.handle_response(response).await
    }

    async fn mark_read(&self, id: &str, token: &str) -> Result<(), SyncError> {
        let path = format!("/notifications/{}/read", urlencoding::encode(id));
        let response = self
            .request(Method::PUT, &path, token, self.mark_timeout)
            .send()
            .await
            .map_err(transport_error)?;
        self.handle_empty_response(response).await
    }
}

/// Network failures and timeouts both land in the retryable transport bucket.
fn transport_error(error: reqwest::Error) -> SyncError {
    if error.is_timeout() {
        tracing::debug!(error = %error, "request timed out");
    }
    SyncError::Transport(error.to_string())
}
