//! Port Interfaces
//!
//! Contracts between the relay services and the outside world.
//!
//! ## Driven Ports (Outbound)
//!
//! - `PriceFeedPort`: upstream price service (session, latest values, push subscription)
//! - `BroadcastPort`: downstream pub/sub transport

use std::future::Future;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::domain::price::{PriceId, PriceUpdate};

// =============================================================================
// Errors
// =============================================================================

/// Errors raised by the upstream feed.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// The session could not be opened.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The push subscription could not be registered.
    #[error("subscription failed: {0}")]
    Subscription(String),

    /// No session is open.
    #[error("no open session")]
    NotConnected,

    /// A request/response call failed.
    #[error("request failed: {0}")]
    Request(String),

    /// A response body could not be decoded.
    #[error("decode failed: {0}")]
    Decode(String),

    /// The push stream ended.
    #[error("upstream stream closed: {0}")]
    StreamClosed(String),

    /// The reconnection budget is spent.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    ReconnectAttemptsExhausted(u32),
}

/// Errors raised by the broadcast transport.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The payload could not be serialized.
    #[error("failed to encode payload: {0}")]
    Encode(String),

    /// The payload exceeds the transport limit.
    #[error("payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge {
        /// Encoded payload size.
        size: usize,
        /// Transport limit.
        limit: usize,
    },

    /// The request could not be delivered.
    #[error("publish request failed: {0}")]
    Request(String),

    /// The transport answered with a non-success status.
    #[error("publish rejected with status {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
}

// =============================================================================
// Subscription Handle
// =============================================================================

/// A live push subscription.
///
/// Wraps the task that forwards upstream messages. Cancelling the handle's
/// token stops delivery; the task result reports why the stream ended.
#[derive(Debug)]
pub struct Subscription {
    cancel: CancellationToken,
    task: JoinHandle<Result<(), FeedError>>,
}

impl Subscription {
    /// Spawn the delivery task for a subscription.
    ///
    /// The future must stop once `cancel` fires.
    pub fn spawn<F>(cancel: CancellationToken, delivery: F) -> Self
    where
        F: Future<Output = Result<(), FeedError>> + Send + 'static,
    {
        Self {
            cancel,
            task: tokio::spawn(delivery),
        }
    }

    /// Token that cancels this subscription.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop delivery.
    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }

    /// Wait until the delivery task ends.
    ///
    /// Returns `Ok(())` when the subscription was cancelled.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the stream.
    pub async fn closed(self) -> Result<(), FeedError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(FeedError::StreamClosed(format!("delivery task failed: {e}"))),
        }
    }
}

// =============================================================================
// Ports
// =============================================================================

/// Upstream price service.
#[async_trait]
pub trait PriceFeedPort: Send + Sync {
    /// Open the transport session.
    async fn connect(&self) -> Result<(), FeedError>;

    /// Fetch the latest values for `ids` (request/response).
    async fn latest_prices(&self, ids: &[PriceId]) -> Result<Vec<PriceUpdate>, FeedError>;

    /// Register for push updates on the open session.
    ///
    /// Updates are delivered into `updates` until the returned subscription
    /// is cancelled or the stream ends.
    async fn subscribe(
        &self,
        ids: &[PriceId],
        updates: mpsc::Sender<PriceUpdate>,
    ) -> Result<Subscription, FeedError>;

    /// Close the session. No-op when none is open.
    async fn close(&self);
}

/// Downstream broadcast transport.
#[async_trait]
pub trait BroadcastPort: Send + Sync {
    /// Publish `payload` under `event` on `channel`.
    async fn publish(
        &self,
        channel: &str,
        event: &str,
        payload: &serde_json::Value,
    ) -> Result<(), PublishError>;
}
