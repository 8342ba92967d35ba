//! In-memory port implementations for testing.
//!
//! `MockPriceFeed` scripts the upstream behaviour per subscribe call;
//! `RecordingBroadcaster` captures everything published to it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    BroadcastPort, FeedError, PriceFeedPort, PublishError, Subscription,
};
use crate::domain::price::{Price, PriceId, PriceUpdate};

/// Build an update with a current publish time.
#[must_use]
pub fn sample_update(id: &str, mantissa: i64) -> PriceUpdate {
    let price = Price {
        price: mantissa,
        conf: 1,
        expo: -2,
        publish_time: chrono::Utc::now().timestamp(),
    };
    PriceUpdate {
        id: PriceId::new(id),
        price,
        ema_price: price,
        timestamp: None,
    }
}

// =============================================================================
// Mock Price Feed
// =============================================================================

/// Outcome of one `subscribe` call.
#[derive(Debug, Clone)]
pub enum SubscribeBehavior {
    /// Registration fails.
    Fail(String),
    /// Deliver the updates, then stay open until cancelled.
    Stream(Vec<PriceUpdate>),
    /// Deliver the updates, then end the stream with an error.
    StreamThenClose(Vec<PriceUpdate>),
    /// Hold `subscribe` until notified, then behave like `Stream`.
    Gated(Arc<Notify>, Vec<PriceUpdate>),
    /// Hold `subscribe` until notified, then fail.
    GatedFail(Arc<Notify>, String),
}

/// Scripted upstream feed.
///
/// Each `subscribe` call consumes the next scripted behaviour; once the
/// script is exhausted the fallback behaviour repeats.
#[derive(Debug)]
pub struct MockPriceFeed {
    script: Mutex<VecDeque<SubscribeBehavior>>,
    fallback: SubscribeBehavior,
    fail_connect: bool,
    latest: Mutex<Vec<PriceUpdate>>,
    fail_latest: AtomicBool,
    connect_times: Mutex<Vec<Instant>>,
    subscription_tokens: Mutex<Vec<CancellationToken>>,
    subscribe_calls: AtomicUsize,
    close_calls: AtomicUsize,
}

impl MockPriceFeed {
    fn build(script: Vec<SubscribeBehavior>, fallback: SubscribeBehavior, fail_connect: bool) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            fail_connect,
            latest: Mutex::new(Vec::new()),
            fail_latest: AtomicBool::new(false),
            connect_times: Mutex::new(Vec::new()),
            subscription_tokens: Mutex::new(Vec::new()),
            subscribe_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
        }
    }

    /// Feed that plays `script` and then keeps the last subscription open.
    #[must_use]
    pub fn scripted(script: Vec<SubscribeBehavior>) -> Self {
        Self::build(script, SubscribeBehavior::Stream(Vec::new()), false)
    }

    /// Feed whose subscriptions always fail.
    #[must_use]
    pub fn failing_subscribe(reason: &str) -> Self {
        Self::build(Vec::new(), SubscribeBehavior::Fail(reason.to_string()), false)
    }

    /// Feed whose sessions never open.
    #[must_use]
    pub fn failing_connect() -> Self {
        Self::build(Vec::new(), SubscribeBehavior::Stream(Vec::new()), true)
    }

    /// Set the values returned by `latest_prices`.
    pub fn set_latest(&self, updates: Vec<PriceUpdate>) {
        *self.latest.lock() = updates;
    }

    /// Make `latest_prices` fail.
    pub fn fail_latest(&self) {
        self.fail_latest.store(true, Ordering::SeqCst);
    }

    /// Times at which `connect` was called.
    #[must_use]
    pub fn connect_times(&self) -> Vec<Instant> {
        self.connect_times.lock().clone()
    }

    /// Number of `subscribe` calls.
    #[must_use]
    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Number of `close` calls.
    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Number of handed-out subscriptions that have been cancelled.
    #[must_use]
    pub fn cancelled_subscriptions(&self) -> usize {
        self.subscription_tokens
            .lock()
            .iter()
            .filter(|token| token.is_cancelled())
            .count()
    }
}

#[async_trait]
impl PriceFeedPort for MockPriceFeed {
    async fn connect(&self) -> Result<(), FeedError> {
        self.connect_times.lock().push(Instant::now());
        if self.fail_connect {
            return Err(FeedError::Connection("mock connect failure".to_string()));
        }
        Ok(())
    }

    async fn latest_prices(&self, ids: &[PriceId]) -> Result<Vec<PriceUpdate>, FeedError> {
        if self.fail_latest.load(Ordering::SeqCst) {
            return Err(FeedError::Request("mock latest failure".to_string()));
        }
        Ok(self
            .latest
            .lock()
            .iter()
            .filter(|update| ids.contains(&update.id))
            .cloned()
            .collect())
    }

    async fn subscribe(
        &self,
        _ids: &[PriceId],
        updates: mpsc::Sender<PriceUpdate>,
    ) -> Result<Subscription, FeedError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        let behavior = match behavior {
            SubscribeBehavior::Gated(gate, batch) => {
                gate.notified().await;
                SubscribeBehavior::Stream(batch)
            }
            SubscribeBehavior::GatedFail(gate, reason) => {
                gate.notified().await;
                SubscribeBehavior::Fail(reason)
            }
            other => other,
        };

        let cancel = CancellationToken::new();
        match behavior {
            SubscribeBehavior::Fail(reason) => Err(FeedError::Subscription(reason)),
            SubscribeBehavior::Stream(batch) => {
                self.subscription_tokens.lock().push(cancel.clone());
                let token = cancel.clone();
                Ok(Subscription::spawn(cancel, async move {
                    for update in batch {
                        let _ = updates.send(update).await;
                    }
                    token.cancelled().await;
                    Ok(())
                }))
            }
            SubscribeBehavior::StreamThenClose(batch) => {
                self.subscription_tokens.lock().push(cancel.clone());
                Ok(Subscription::spawn(cancel, async move {
                    for update in batch {
                        let _ = updates.send(update).await;
                    }
                    Err(FeedError::StreamClosed("mock stream closed".to_string()))
                }))
            }
            SubscribeBehavior::Gated(..) | SubscribeBehavior::GatedFail(..) => {
                Err(FeedError::Subscription("gate already resolved".to_string()))
            }
        }
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Recording Broadcaster
// =============================================================================

/// One captured publish call.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    /// Channel published to.
    pub channel: String,
    /// Event name.
    pub event: String,
    /// Payload.
    pub payload: serde_json::Value,
}

/// Broadcast transport that records publishes.
#[derive(Debug, Default)]
pub struct RecordingBroadcaster {
    published: Mutex<Vec<PublishedMessage>>,
    attempts: AtomicUsize,
    fail: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

impl RecordingBroadcaster {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent publishes fail.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Delay every publish by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Successfully published messages.
    #[must_use]
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().clone()
    }

    /// Publish calls made, including failed ones.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BroadcastPort for RecordingBroadcaster {
    async fn publish(
        &self,
        channel: &str,
        event: &str,
        payload: &serde_json::Value,
    ) -> Result<(), PublishError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if self.fail.load(Ordering::SeqCst) {
            return Err(PublishError::Request("mock publish failure".to_string()));
        }

        self.published.lock().push(PublishedMessage {
            channel: channel.to_string(),
            event: event.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }
}
