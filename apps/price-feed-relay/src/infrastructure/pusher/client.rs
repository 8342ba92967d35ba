//! Pusher HTTP Client
//!
//! Publishes one event per call to
//! `POST https://api-{cluster}.pusher.com/apps/{app_id}/events` with body:
//!
//! ```json
//! {"name": "price-update", "channels": ["price-feed-channel"], "data": "{\"feeds\":[...]}"}
//! ```
//!
//! `data` is the payload encoded as a JSON string.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::auth;
use crate::application::ports::{BroadcastPort, PublishError};
use crate::infrastructure::config::{PusherCredentials, PusherSettings};

/// Largest `data` string Pusher accepts per event.
pub const MAX_DATA_BYTES: usize = 10 * 1024;

/// Configuration for the Pusher client.
#[derive(Debug, Clone)]
pub struct PusherConfig {
    /// Application credentials.
    pub credentials: PusherCredentials,
    /// Cluster name.
    pub cluster: String,
    /// Overrides the cluster host, e.g. for a local test server.
    pub base_url: Option<String>,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl PusherConfig {
    /// Base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> String {
        self.base_url.as_ref().map_or_else(
            || format!("https://api-{}.pusher.com", self.cluster),
            |url| url.trim_end_matches('/').to_string(),
        )
    }

    /// Path of the events endpoint.
    #[must_use]
    pub fn events_path(&self) -> String {
        format!("/apps/{}/events", self.credentials.app_id())
    }
}

impl From<&PusherSettings> for PusherConfig {
    fn from(settings: &PusherSettings) -> Self {
        Self {
            credentials: settings.credentials.clone(),
            cluster: settings.cluster.clone(),
            base_url: None,
            request_timeout: settings.request_timeout,
        }
    }
}

#[derive(Serialize)]
struct EventBody<'a> {
    name: &'a str,
    channels: [&'a str; 1],
    data: String,
}

/// Pusher adapter for `BroadcastPort`.
#[derive(Debug, Clone)]
pub struct PusherClient {
    config: PusherConfig,
    http: reqwest::Client,
}

impl PusherClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: PusherConfig) -> Result<Self, PublishError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| PublishError::Request(e.to_string()))?;

        Ok(Self { config, http })
    }

    /// Encode the request body for one event.
    fn encode(event: &str, channel: &str, payload: &serde_json::Value) -> Result<Vec<u8>, PublishError> {
        let data = serde_json::to_string(payload).map_err(|e| PublishError::Encode(e.to_string()))?;
        if data.len() > MAX_DATA_BYTES {
            return Err(PublishError::PayloadTooLarge {
                size: data.len(),
                limit: MAX_DATA_BYTES,
            });
        }

        serde_json::to_vec(&EventBody {
            name: event,
            channels: [channel],
            data,
        })
        .map_err(|e| PublishError::Encode(e.to_string()))
    }
}

#[async_trait]
impl BroadcastPort for PusherClient {
    async fn publish(
        &self,
        channel: &str,
        event: &str,
        payload: &serde_json::Value,
    ) -> Result<(), PublishError> {
        let body = Self::encode(event, channel, payload)?;
        let path = self.config.events_path();
        let credentials = &self.config.credentials;

        let query = auth::signed_query(
            credentials.key(),
            credentials.secret(),
            &path,
            &body,
            chrono::Utc::now().timestamp(),
        )
        .map_err(|e| PublishError::Encode(format!("failed to sign request: {e}")))?;

        let response = self
            .http
            .post(format!("{}{path}", self.config.base_url()))
            .query(&query)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| PublishError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::Rejected { status, body });
        }

        tracing::trace!(channel, event, "Published event");
        Ok(())
    }
}
