//! Feed Connector
//!
//! Owns the upstream subscription lifecycle. Opens a session, subscribes to
//! the configured ids, and re-enters a capped exponential backoff whenever
//! the session, the subscription, or the live stream fails.
//!
//! Updates are not handled here: the upstream delivery task sends them into
//! the update channel, and the cache writer applies them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{FeedError, PriceFeedPort, Subscription};
use crate::domain::connection::{ConnectionState, FeedStatus, ReconnectConfig, ReconnectPolicy};
use crate::domain::price::{PriceId, PriceUpdate};
use crate::infrastructure::metrics;

/// Connector configuration.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Ids to subscribe to.
    pub ids: Vec<PriceId>,
    /// Backoff between reconnection attempts.
    pub reconnect: ReconnectConfig,
}

/// Connection lifecycle manager for the upstream feed.
pub struct FeedConnector {
    config: ConnectorConfig,
    feed: Arc<dyn PriceFeedPort>,
    updates: mpsc::Sender<PriceUpdate>,
    status: Arc<FeedStatus>,
    shutdown: CancellationToken,
    active_subscription: Mutex<Option<CancellationToken>>,
    session_open: AtomicBool,
}

impl FeedConnector {
    /// Create a connector.
    ///
    /// `shutdown` is the process-wide token; cancelling it stops the
    /// connection loop and any pending reconnect delay.
    #[must_use]
    pub fn new(
        config: ConnectorConfig,
        feed: Arc<dyn PriceFeedPort>,
        updates: mpsc::Sender<PriceUpdate>,
        status: Arc<FeedStatus>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            feed,
            updates,
            status,
            shutdown,
            active_subscription: Mutex::new(None),
            session_open: AtomicBool::new(false),
        }
    }

    /// Shared connection status.
    #[must_use]
    pub fn status(&self) -> Arc<FeedStatus> {
        Arc::clone(&self.status)
    }

    /// Run the connection loop until shutdown or until reconnection gives up.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::ReconnectAttemptsExhausted` when the backoff
    /// budget is spent. The process keeps running; only the upstream link
    /// is abandoned.
    pub async fn run(&self) -> Result<(), FeedError> {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.shutdown.is_cancelled() {
                tracing::info!("Feed connector cancelled");
                return Ok(());
            }

            match self.connect(&mut policy).await {
                Ok(()) => {
                    tracing::info!("Feed connector stopped");
                    return Ok(());
                }
                Err(_) if self.shutdown.is_cancelled() => {
                    self.close_session().await;
                    self.mark_disconnected();
                    tracing::info!("Feed connector stopped");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Upstream feed failure");
                    self.status.set_failed(e.to_string());
                    metrics::set_connection_state(ConnectionState::Failed);
                    self.close_session().await;

                    if !self.schedule_reconnect(&mut policy).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Open the session, subscribe, and hold the subscription until it ends.
    ///
    /// Returns `Ok(())` only when stopped by shutdown.
    async fn connect(&self, policy: &mut ReconnectPolicy) -> Result<(), FeedError> {
        self.status.set_state(ConnectionState::Connecting);
        metrics::set_connection_state(ConnectionState::Connecting);

        tracing::info!("Connecting to upstream price feed");
        self.feed.connect().await?;
        self.session_open.store(true, Ordering::SeqCst);

        let subscription = self.subscribe().await?;
        let token = subscription.cancel_token();
        policy.reset();
        self.status.set_reconnect_attempts(0);

        // A shutdown that landed while `subscribe` was pending found nothing
        // to cancel, so this subscription is released here.
        let result = tokio::select! {
            () = self.shutdown.cancelled() => {
                self.release(&token).await;
                return Ok(());
            }
            result = subscription.closed() => result,
        };

        if self.shutdown.is_cancelled() {
            self.release(&token).await;
            return Ok(());
        }

        self.active_subscription.lock().take();
        match result {
            Ok(()) => Err(FeedError::StreamClosed("subscription ended".to_string())),
            Err(e) => Err(e),
        }
    }

    /// Register the push subscription for the configured ids.
    async fn subscribe(&self) -> Result<Subscription, FeedError> {
        match self
            .feed
            .subscribe(&self.config.ids, self.updates.clone())
            .await
        {
            Ok(subscription) => {
                *self.active_subscription.lock() = Some(subscription.cancel_token());
                self.status.set_state(ConnectionState::Subscribed);
                metrics::set_connection_state(ConnectionState::Subscribed);
                tracing::info!(ids = self.config.ids.len(), "Subscribed to price feed updates");
                Ok(subscription)
            }
            Err(e) => {
                tracing::error!(error = %e, "Error subscribing to price feed updates");
                Err(e)
            }
        }
    }

    /// Wait out the next backoff delay.
    ///
    /// Returns `Ok(true)` when the next attempt should start and `Ok(false)`
    /// when shutdown interrupted the wait.
    async fn schedule_reconnect(&self, policy: &mut ReconnectPolicy) -> Result<bool, FeedError> {
        let Some(delay) = policy.next_delay() else {
            let attempts = policy.attempt_count();
            tracing::error!(attempts, "Max reconnection attempts reached, giving up");
            return Err(FeedError::ReconnectAttemptsExhausted(attempts));
        };

        let attempt = policy.attempt_count();
        self.status.set_reconnect_attempts(attempt);
        metrics::record_reconnect();
        tracing::info!(
            attempt,
            delay_ms = delay.as_millis(),
            "Scheduling reconnection"
        );

        tokio::select! {
            () = self.shutdown.cancelled() => {
                tracing::info!("Reconnect cancelled by shutdown");
                Ok(false)
            }
            () = tokio::time::sleep(delay) => {
                tracing::info!(attempt, "Reconnection attempt");
                Ok(true)
            }
        }
    }

    async fn release(&self, subscription: &CancellationToken) {
        subscription.cancel();
        self.active_subscription.lock().take();
        self.close_session().await;
        self.mark_disconnected();
    }

    fn mark_disconnected(&self) {
        self.status.set_state(ConnectionState::Disconnected);
        metrics::set_connection_state(ConnectionState::Disconnected);
    }

    async fn close_session(&self) {
        if self.session_open.swap(false, Ordering::SeqCst) {
            self.feed.close().await;
        }
    }

    /// Cancel the live subscription and close the session.
    ///
    /// Also cancels the shutdown token so the connection loop and any pending
    /// reconnect delay stop. Safe to call repeatedly and before `run`.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down feed connector");
        self.shutdown.cancel();

        let active = self.active_subscription.lock().take();
        if let Some(subscription) = active {
            subscription.cancel();
            tracing::info!("Unsubscribed from price updates");
        } else {
            tracing::debug!("No active subscription to cancel");
        }

        if self.session_open.swap(false, Ordering::SeqCst) {
            self.feed.close().await;
            tracing::info!("Upstream session closed");
        }

        self.mark_disconnected();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::Notify;
    use tokio::time::Instant;

    use super::*;
    use crate::infrastructure::mock::{MockPriceFeed, SubscribeBehavior, sample_update};

    fn ids() -> Vec<PriceId> {
        vec![PriceId::new("aa"), PriceId::new("bb"), PriceId::new("cc")]
    }

    fn connector(
        feed: Arc<MockPriceFeed>,
        reconnect: ReconnectConfig,
    ) -> (Arc<FeedConnector>, mpsc::Receiver<PriceUpdate>) {
        let (tx, rx) = mpsc::channel(64);
        let connector = FeedConnector::new(
            ConnectorConfig {
                ids: ids(),
                reconnect,
            },
            feed,
            tx,
            Arc::new(FeedStatus::new()),
            CancellationToken::new(),
        );
        (Arc::new(connector), rx)
    }

    fn gaps(instants: &[Instant]) -> Vec<u128> {
        instants
            .windows(2)
            .map(|w| (w[1] - w[0]).as_millis())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_budget_with_expected_delays() {
        let feed = Arc::new(MockPriceFeed::failing_subscribe("boom"));
        let (connector, _rx) = connector(Arc::clone(&feed), ReconnectConfig::default());

        let result = connector.run().await;

        assert!(matches!(result, Err(FeedError::ReconnectAttemptsExhausted(10))));
        // Initial attempt plus ten reconnections.
        assert_eq!(feed.subscribe_calls(), 11);
        assert_eq!(
            gaps(&feed.connect_times()),
            vec![
                1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000, 30_000, 30_000, 30_000
            ]
        );
        assert_eq!(connector.status().state(), ConnectionState::Failed);
        assert_eq!(connector.status().reconnect_attempts(), 10);
        // Each failed attempt closed its session.
        assert_eq!(feed.close_calls(), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribes_after_two_failures() {
        let feed = Arc::new(MockPriceFeed::scripted(vec![
            SubscribeBehavior::Fail("first".to_string()),
            SubscribeBehavior::Fail("second".to_string()),
            SubscribeBehavior::Stream(vec![sample_update("aa", 1)]),
        ]));
        let (connector, mut rx) = connector(Arc::clone(&feed), ReconnectConfig::default());

        let runner = Arc::clone(&connector);
        let handle = tokio::spawn(async move { runner.run().await });

        let update = rx.recv().await.unwrap();
        assert_eq!(update.id, PriceId::new("aa"));
        assert_eq!(gaps(&feed.connect_times()), vec![1_000, 2_000]);
        assert_eq!(connector.status().state(), ConnectionState::Subscribed);
        assert_eq!(connector.status().reconnect_attempts(), 0);

        connector.shutdown().await;
        assert!(handle.await.unwrap().is_ok());
        assert_eq!(connector.status().state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_stream_reconnects_with_fresh_budget() {
        let feed = Arc::new(MockPriceFeed::scripted(vec![
            SubscribeBehavior::Fail("first".to_string()),
            SubscribeBehavior::StreamThenClose(vec![sample_update("aa", 1)]),
            SubscribeBehavior::Stream(vec![sample_update("bb", 2)]),
        ]));
        let (connector, mut rx) = connector(Arc::clone(&feed), ReconnectConfig::default());

        let runner = Arc::clone(&connector);
        let handle = tokio::spawn(async move { runner.run().await });

        assert_eq!(rx.recv().await.unwrap().id, PriceId::new("aa"));
        assert_eq!(rx.recv().await.unwrap().id, PriceId::new("bb"));

        // The budget was reset by the successful subscription, so the
        // reconnection after the dropped stream waits the initial delay again.
        assert_eq!(gaps(&feed.connect_times()), vec![1_000, 1_000]);

        connector.shutdown().await;
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_pending_reconnect() {
        let feed = Arc::new(MockPriceFeed::failing_subscribe("boom"));
        let (connector, _rx) = connector(Arc::clone(&feed), ReconnectConfig::default());

        let runner = Arc::clone(&connector);
        let handle = tokio::spawn(async move { runner.run().await });

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(feed.subscribe_calls(), 2);

        connector.shutdown().await;
        assert!(handle.await.unwrap().is_ok());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(feed.subscribe_calls(), 2);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_without_session() {
        let feed = Arc::new(MockPriceFeed::failing_subscribe("unused"));
        let (connector, _rx) = connector(Arc::clone(&feed), ReconnectConfig::default());

        connector.shutdown().await;
        connector.shutdown().await;

        assert_eq!(feed.close_calls(), 0);
        assert_eq!(connector.status().state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_live_subscription_and_closes_session() {
        let feed = Arc::new(MockPriceFeed::scripted(vec![SubscribeBehavior::Stream(
            vec![sample_update("aa", 1)],
        )]));
        let (connector, mut rx) = connector(Arc::clone(&feed), ReconnectConfig::default());

        let runner = Arc::clone(&connector);
        let handle = tokio::spawn(async move { runner.run().await });
        rx.recv().await.unwrap();

        connector.shutdown().await;
        assert!(handle.await.unwrap().is_ok());
        assert_eq!(feed.close_calls(), 1);
        assert_eq!(feed.cancelled_subscriptions(), 1);

        connector.shutdown().await;
        assert_eq!(feed.close_calls(), 1);
    }

    #[tokio::test]
    async fn shutdown_while_subscribing_releases_late_subscription() {
        let gate = Arc::new(Notify::new());
        let feed = Arc::new(MockPriceFeed::scripted(vec![SubscribeBehavior::Gated(
            Arc::clone(&gate),
            vec![sample_update("aa", 1)],
        )]));
        let (connector, _rx) = connector(Arc::clone(&feed), ReconnectConfig::default());

        let runner = Arc::clone(&connector);
        let handle = tokio::spawn(async move { runner.run().await });
        while feed.subscribe_calls() == 0 {
            tokio::task::yield_now().await;
        }

        connector.shutdown().await;
        gate.notify_one();

        assert!(handle.await.unwrap().is_ok());
        assert_eq!(feed.subscribe_calls(), 1);
        assert_eq!(feed.cancelled_subscriptions(), 1);
        assert_eq!(feed.close_calls(), 1);
        assert_eq!(connector.status().state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn shutdown_while_subscribing_ignores_late_failure() {
        let gate = Arc::new(Notify::new());
        let feed = Arc::new(MockPriceFeed::scripted(vec![SubscribeBehavior::GatedFail(
            Arc::clone(&gate),
            "late".to_string(),
        )]));
        let (connector, _rx) = connector(Arc::clone(&feed), ReconnectConfig::default());

        let runner = Arc::clone(&connector);
        let handle = tokio::spawn(async move { runner.run().await });
        while feed.subscribe_calls() == 0 {
            tokio::task::yield_now().await;
        }

        connector.shutdown().await;
        gate.notify_one();

        assert!(handle.await.unwrap().is_ok());
        assert_eq!(feed.subscribe_calls(), 1);
        assert_eq!(connector.status().state(), ConnectionState::Disconnected);
        assert_eq!(connector.status().reconnect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failure_takes_backoff_path() {
        let feed = Arc::new(MockPriceFeed::failing_connect());
        let (connector, _rx) = connector(
            Arc::clone(&feed),
            ReconnectConfig {
                max_attempts: 2,
                ..ReconnectConfig::default()
            },
        );

        let result = connector.run().await;

        assert!(matches!(result, Err(FeedError::ReconnectAttemptsExhausted(2))));
        assert_eq!(gaps(&feed.connect_times()), vec![1_000, 2_000]);
        assert_eq!(feed.subscribe_calls(), 0);
        assert_eq!(feed.close_calls(), 0);
    }
}
