//! Hermes Client
//!
//! # Endpoints
//!
//! - REST: `GET {endpoint}/api/latest_price_feeds?ids[]=...`
//! - Stream: `{endpoint with wss scheme}/ws`
//!
//! A session is one WebSocket connection. `subscribe` hands the socket to a
//! reader task that forwards `price_update` frames until cancelled or until
//! the socket ends.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::messages::{self, ClientMessage, ServerMessage, UpdateProcessingError};
use crate::application::ports::{FeedError, PriceFeedPort, Subscription};
use crate::domain::price::{PriceId, PriceUpdate};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the Hermes client.
#[derive(Debug, Clone)]
pub struct HermesConfig {
    /// Base HTTP(S) endpoint, without a trailing slash.
    pub endpoint: String,
    /// Timeout for REST calls, the WebSocket handshake and the subscribe ack.
    pub request_timeout: Duration,
}

impl HermesConfig {
    /// Create a configuration.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, request_timeout: Duration) -> Self {
        let endpoint: String = endpoint.into();
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            request_timeout,
        }
    }

    /// WebSocket URL derived from the endpoint.
    #[must_use]
    pub fn ws_url(&self) -> String {
        let base = if let Some(rest) = self.endpoint.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.endpoint.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.endpoint.clone()
        };
        format!("{base}/ws")
    }

    /// REST URL for latest values.
    #[must_use]
    pub fn latest_url(&self) -> String {
        format!("{}/api/latest_price_feeds", self.endpoint)
    }
}

// =============================================================================
// Client
// =============================================================================

/// Hermes adapter for `PriceFeedPort`.
pub struct HermesClient {
    config: HermesConfig,
    http: reqwest::Client,
    session: Mutex<Option<WsStream>>,
}

impl std::fmt::Debug for HermesClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HermesClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl HermesClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: HermesConfig) -> Result<Self, FeedError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| FeedError::Request(e.to_string()))?;

        Ok(Self {
            config,
            http,
            session: Mutex::new(None),
        })
    }

    async fn send(write: &mut WsWrite, message: &ClientMessage) -> Result<(), FeedError> {
        let json = message
            .to_json()
            .map_err(|e| FeedError::Subscription(format!("failed to serialize request: {e}")))?;
        write
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| FeedError::Subscription(format!("failed to send request: {e}")))
    }

    /// Read frames until the server acknowledges the subscribe request.
    async fn await_ack(
        write: &mut WsWrite,
        read: &mut WsRead,
        updates: &mpsc::Sender<PriceUpdate>,
    ) -> Result<(), FeedError> {
        loop {
            let frame = read
                .next()
                .await
                .ok_or_else(|| FeedError::Subscription("stream ended before ack".to_string()))?
                .map_err(|e| FeedError::Subscription(e.to_string()))?;

            match frame {
                Message::Text(text) => match messages::decode(text.as_str()) {
                    Ok(ServerMessage::Response(response)) if response.is_success() => {
                        return Ok(());
                    }
                    Ok(ServerMessage::Response(response)) => {
                        return Err(FeedError::Subscription(
                            response
                                .error
                                .unwrap_or_else(|| "subscription rejected".to_string()),
                        ));
                    }
                    Ok(ServerMessage::PriceUpdate { price_feed }) => {
                        let _ = updates.send(price_feed.into()).await;
                    }
                    Ok(ServerMessage::Unknown) => {}
                    Err(e) => tracing::warn!(error = %e, "Skipping frame while awaiting ack"),
                },
                Message::Ping(data) => {
                    write
                        .send(Message::Pong(data))
                        .await
                        .map_err(|e| FeedError::Subscription(e.to_string()))?;
                }
                Message::Close(_) => {
                    return Err(FeedError::Subscription(
                        "server closed the socket before ack".to_string(),
                    ));
                }
                _ => {}
            }
        }
    }
}

/// Forward pushed updates until cancelled or the socket ends.
async fn pump(
    mut write: WsWrite,
    mut read: WsRead,
    ids: Vec<PriceId>,
    updates: mpsc::Sender<PriceUpdate>,
    cancel: CancellationToken,
) -> Result<(), FeedError> {
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                if let Ok(json) = ClientMessage::unsubscribe(&ids).to_json() {
                    let _ = write.send(Message::Text(json.into())).await;
                }
                let _ = write.close().await;
                tracing::debug!("Hermes subscription cancelled");
                return Ok(());
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match messages::decode(text.as_str()) {
                            Ok(ServerMessage::PriceUpdate { price_feed }) => {
                                if updates.send(price_feed.into()).await.is_err() {
                                    tracing::debug!("Update receiver dropped, ending subscription");
                                    let _ = write.close().await;
                                    return Ok(());
                                }
                            }
                            Ok(ServerMessage::Response(response)) => {
                                if !response.is_success() {
                                    tracing::warn!(
                                        error = ?response.error,
                                        "Hermes reported an error on the stream"
                                    );
                                }
                            }
                            Ok(ServerMessage::Unknown) => {
                                tracing::trace!("Ignoring unhandled message type");
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Skipping malformed Hermes frame");
                            }
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        let e = UpdateProcessingError::UnexpectedBinary(data.len());
                        tracing::warn!(error = %e, "Skipping Hermes frame");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        write
                            .send(Message::Pong(data))
                            .await
                            .map_err(|e| FeedError::StreamClosed(e.to_string()))?;
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("Hermes sent close frame");
                        return Err(FeedError::StreamClosed("server sent close frame".to_string()));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(FeedError::StreamClosed(e.to_string())),
                    None => {
                        return Err(FeedError::StreamClosed("stream ended".to_string()));
                    }
                }
            }
        }
    }
}

#[async_trait]
impl PriceFeedPort for HermesClient {
    async fn connect(&self) -> Result<(), FeedError> {
        let url = self.config.ws_url();
        tracing::info!(url = %url, "Connecting to Hermes stream");

        let mut session = self.session.lock().await;
        if let Some(mut stale) = session.take() {
            let _ = stale.close(None).await;
        }

        let (ws, _response) =
            tokio::time::timeout(self.config.request_timeout, tokio_tungstenite::connect_async(&url))
                .await
                .map_err(|_| FeedError::Connection("handshake timed out".to_string()))?
                .map_err(|e| FeedError::Connection(e.to_string()))?;

        *session = Some(ws);
        Ok(())
    }

    async fn latest_prices(&self, ids: &[PriceId]) -> Result<Vec<PriceUpdate>, FeedError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let query: Vec<(&str, &str)> = ids.iter().map(|id| ("ids[]", id.as_str())).collect();
        let response = self
            .http
            .get(self.config.latest_url())
            .query(&query)
            .send()
            .await
            .map_err(|e| FeedError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(FeedError::Request(format!("status {}: {body}", status.as_u16())));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FeedError::Request(e.to_string()))?;
        messages::decode_latest(&body).map_err(|e| FeedError::Decode(e.to_string()))
    }

    async fn subscribe(
        &self,
        ids: &[PriceId],
        updates: mpsc::Sender<PriceUpdate>,
    ) -> Result<Subscription, FeedError> {
        let ws = self
            .session
            .lock()
            .await
            .take()
            .ok_or(FeedError::NotConnected)?;
        let (mut write, mut read) = ws.split();

        Self::send(&mut write, &ClientMessage::subscribe(ids)).await?;
        tracing::debug!(ids = ids.len(), "Sent subscribe request");

        tokio::time::timeout(
            self.config.request_timeout,
            Self::await_ack(&mut write, &mut read, &updates),
        )
        .await
        .map_err(|_| FeedError::Subscription("timed out waiting for ack".to_string()))??;

        let cancel = CancellationToken::new();
        let ids = ids.to_vec();
        let token = cancel.clone();
        Ok(Subscription::spawn(cancel, pump(write, read, ids, updates, token)))
    }

    async fn close(&self) {
        if let Some(mut ws) = self.session.lock().await.take() {
            if let Err(e) = ws.close(None).await {
                tracing::debug!(error = %e, "Error closing Hermes socket");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_switches_scheme() {
        let config = HermesConfig::new("https://hermes.pyth.network/", Duration::from_secs(10));
        assert_eq!(config.endpoint, "https://hermes.pyth.network");
        assert_eq!(config.ws_url(), "wss://hermes.pyth.network/ws");

        let config = HermesConfig::new("http://127.0.0.1:8080", Duration::from_secs(10));
        assert_eq!(config.ws_url(), "ws://127.0.0.1:8080/ws");
    }

    #[test]
    fn latest_url_appends_api_path() {
        let config = HermesConfig::new("https://hermes.pyth.network", Duration::from_secs(10));
        assert_eq!(
            config.latest_url(),
            "https://hermes.pyth.network/api/latest_price_feeds"
        );
    }

    #[tokio::test]
    async fn subscribe_without_session_fails() {
        let client =
            HermesClient::new(HermesConfig::new("http://127.0.0.1:1", Duration::from_secs(1)))
                .unwrap();
        let (tx, _rx) = mpsc::channel(1);

        let err = client.subscribe(&[PriceId::new("ab")], tx).await.unwrap_err();
        assert!(matches!(err, FeedError::NotConnected));
    }

    #[tokio::test]
    async fn close_without_session_is_noop() {
        let client =
            HermesClient::new(HermesConfig::new("http://127.0.0.1:1", Duration::from_secs(1)))
                .unwrap();
        client.close().await;
        client.close().await;
    }

    #[tokio::test]
    async fn latest_prices_with_no_ids_skips_request() {
        let client =
            HermesClient::new(HermesConfig::new("http://127.0.0.1:1", Duration::from_secs(1)))
                .unwrap();
        assert!(client.latest_prices(&[]).await.unwrap().is_empty());
    }
}
