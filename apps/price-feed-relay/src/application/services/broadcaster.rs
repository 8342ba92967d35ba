//! Snapshot Broadcaster
//!
//! Publishes the full contents of the latest-value cache on a fixed-rate
//! timer, plus the one-off startup publish of values fetched directly from
//! the upstream feed.
//!
//! # Payloads
//!
//! ```json
//! // periodic snapshot (event: price-update)
//! {"feeds": [{"id": "...", "price": {...}, "timestamp": "..."}]}
//!
//! // startup fetch (event: price-feeds-update)
//! {"message": {"priceFeeds": [{"id": "...", "price": {...}, "ema_price": {...}}]}}
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{BroadcastPort, PriceFeedPort, PublishError};
use crate::domain::cache::SharedPriceCache;
use crate::domain::price::{PriceId, PriceRecord, PriceUpdate};
use crate::infrastructure::metrics::{self, PublishKind};

/// Channel and event names used for publishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastTopic {
    /// Channel all messages go to.
    pub channel: String,
    /// Event for periodic cache snapshots.
    pub snapshot_event: String,
    /// Event for the startup fetch.
    pub initial_event: String,
}

impl Default for BroadcastTopic {
    fn default() -> Self {
        Self {
            channel: "price-feed-channel".to_string(),
            snapshot_event: "price-update".to_string(),
            initial_event: "price-feeds-update".to_string(),
        }
    }
}

#[derive(Serialize)]
struct SnapshotPayload<'a> {
    feeds: &'a [PriceRecord],
}

#[derive(Serialize)]
struct InitialPayload<'a> {
    message: InitialMessage<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitialMessage<'a> {
    price_feeds: &'a [PriceUpdate],
}

/// Result of one broadcaster tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A snapshot with this many records was published.
    Published(usize),
    /// The cache was empty; nothing was published.
    Empty,
    /// The publish failed and was dropped.
    Failed,
}

/// Periodic publisher of cache snapshots.
pub struct Broadcaster {
    cache: SharedPriceCache,
    publisher: Arc<dyn BroadcastPort>,
    topic: BroadcastTopic,
    interval: Duration,
    cancel: CancellationToken,
}

impl Broadcaster {
    /// Create a broadcaster publishing every `interval`.
    #[must_use]
    pub fn new(
        cache: SharedPriceCache,
        publisher: Arc<dyn BroadcastPort>,
        topic: BroadcastTopic,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cache,
            publisher,
            topic,
            interval,
            cancel,
        }
    }

    /// Publish the current snapshot once.
    ///
    /// Nothing is published when the cache is empty. Failures are logged and
    /// not retried; the next tick publishes whatever the cache holds then.
    pub async fn tick(&self) -> TickOutcome {
        let snapshot = self.cache.read().snapshot();

        if snapshot.is_empty() {
            tracing::info!("No new price updates to broadcast at this time");
            return TickOutcome::Empty;
        }

        let count = snapshot.len();
        let result = match serde_json::to_value(SnapshotPayload { feeds: &snapshot }) {
            Ok(payload) => {
                self.publish(&self.topic.snapshot_event, &payload, PublishKind::Snapshot)
                    .await
            }
            Err(e) => Err(PublishError::Encode(e.to_string())),
        };

        match result {
            Ok(()) => {
                tracing::debug!(records = count, "Snapshot broadcast");
                TickOutcome::Published(count)
            }
            Err(e) => {
                tracing::error!(error = %e, records = count, "Failed to broadcast snapshot");
                TickOutcome::Failed
            }
        }
    }

    async fn publish(
        &self,
        event: &str,
        payload: &serde_json::Value,
        kind: PublishKind,
    ) -> Result<(), PublishError> {
        let started = Instant::now();
        let result = self
            .publisher
            .publish(&self.topic.channel, event, payload)
            .await;
        metrics::record_publish(kind, result.is_ok(), started.elapsed());
        result
    }

    /// Tick every interval until cancelled.
    ///
    /// The first tick fires one interval after start. Publishes are awaited
    /// in turn, so they never overlap: a tick that comes due during a slow
    /// publish fires as soon as it returns, and any further missed ticks are
    /// skipped.
    pub async fn run(&self) {
        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            interval_ms = self.interval.as_millis(),
            channel = %self.topic.channel,
            "Broadcaster started"
        );

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("Broadcaster stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// Fetch the latest values straight from the feed and publish them.
    ///
    /// Bypasses the cache. Fetch and publish failures are logged only.
    /// Returns whether a message was published.
    pub async fn publish_initial(&self, feed: &dyn PriceFeedPort, ids: &[PriceId]) -> bool {
        let updates = match feed.latest_prices(ids).await {
            Ok(updates) => updates,
            Err(e) => {
                tracing::error!(error = %e, "Error fetching latest price feeds");
                return false;
            }
        };

        tracing::info!(count = updates.len(), "Fetched latest price feeds");

        let payload = match serde_json::to_value(InitialPayload {
            message: InitialMessage {
                price_feeds: &updates,
            },
        }) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode initial prices");
                return false;
            }
        };

        match self
            .publish(&self.topic.initial_event, &payload, PublishKind::Initial)
            .await
        {
            Ok(()) => {
                tracing::info!("Initial prices broadcasted");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to broadcast initial prices");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::domain::cache::PriceCache;
    use crate::infrastructure::mock::{MockPriceFeed, RecordingBroadcaster, sample_update};

    fn broadcaster(
        cache: SharedPriceCache,
        publisher: Arc<RecordingBroadcaster>,
    ) -> (Broadcaster, CancellationToken) {
        let cancel = CancellationToken::new();
        let broadcaster = Broadcaster::new(
            cache,
            publisher,
            BroadcastTopic::default(),
            Duration::from_secs(5),
            cancel.clone(),
        );
        (broadcaster, cancel)
    }

    fn seed(cache: &SharedPriceCache, id: &str, mantissa: i64) {
        cache.write().apply(PriceRecord::from_update(
            sample_update(id, mantissa),
            None,
            Utc::now(),
        ));
    }

    #[tokio::test]
    async fn empty_cache_publishes_nothing() {
        let publisher = Arc::new(RecordingBroadcaster::new());
        let (broadcaster, _) = broadcaster(PriceCache::shared(), Arc::clone(&publisher));

        assert_eq!(broadcaster.tick().await, TickOutcome::Empty);
        assert_eq!(publisher.attempts(), 0);
    }

    #[tokio::test]
    async fn non_empty_cache_publishes_one_message_with_all_records() {
        let cache = PriceCache::shared();
        seed(&cache, "aa", 1);
        seed(&cache, "bb", 2);
        let publisher = Arc::new(RecordingBroadcaster::new());
        let (broadcaster, _) = broadcaster(cache, Arc::clone(&publisher));

        assert_eq!(broadcaster.tick().await, TickOutcome::Published(2));

        let published = publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].channel, "price-feed-channel");
        assert_eq!(published[0].event, "price-update");

        let feeds = published[0].payload["feeds"].as_array().unwrap();
        assert_eq!(feeds.len(), 2);
        assert_eq!(feeds[0]["id"], "aa");
        assert_eq!(feeds[1]["id"], "bb");
        assert_eq!(feeds[1]["price"]["price"], "2");
    }

    #[tokio::test]
    async fn publish_failure_is_swallowed() {
        let cache = PriceCache::shared();
        seed(&cache, "aa", 1);
        let publisher = Arc::new(RecordingBroadcaster::new());
        publisher.set_failing(true);
        let (broadcaster, _) = broadcaster(cache, Arc::clone(&publisher));

        assert_eq!(broadcaster.tick().await, TickOutcome::Failed);
        assert_eq!(publisher.attempts(), 1);

        publisher.set_failing(false);
        assert_eq!(broadcaster.tick().await, TickOutcome::Published(1));
    }

    #[tokio::test(start_paused = true)]
    async fn run_ticks_at_fixed_interval() {
        let cache = PriceCache::shared();
        seed(&cache, "aa", 1);
        let publisher = Arc::new(RecordingBroadcaster::new());
        let (broadcaster, cancel) = broadcaster(cache, Arc::clone(&publisher));
        let broadcaster = Arc::new(broadcaster);

        let runner = Arc::clone(&broadcaster);
        let handle = tokio::spawn(async move { runner.run().await });

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(publisher.attempts(), 0);

        tokio::time::sleep(Duration::from_millis(10_200)).await;
        assert_eq!(publisher.attempts(), 3);

        cancel.cancel();
        handle.await.unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(publisher.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_publish_skips_overlapping_ticks() {
        let cache = PriceCache::shared();
        seed(&cache, "aa", 1);
        let publisher = Arc::new(RecordingBroadcaster::new());
        publisher.set_latency(Duration::from_millis(7_000));
        let (broadcaster, cancel) = broadcaster(cache, Arc::clone(&publisher));
        let broadcaster = Arc::new(broadcaster);

        let runner = Arc::clone(&broadcaster);
        let handle = tokio::spawn(async move { runner.run().await });

        // The first publish runs 5s..12s. The 10s tick is overdue and fires at
        // 12s; the 15s tick is then overdue behind it.
        tokio::time::sleep(Duration::from_millis(16_000)).await;
        assert_eq!(publisher.attempts(), 2);
        assert_eq!(publisher.published().len(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn initial_publish_uses_feed_directly() {
        let feed = MockPriceFeed::scripted(Vec::new());
        feed.set_latest(vec![sample_update("aa", 1), sample_update("bb", 2)]);
        let publisher = Arc::new(RecordingBroadcaster::new());
        let cache = PriceCache::shared();
        let (broadcaster, _) = broadcaster(cache.clone(), Arc::clone(&publisher));

        let ids = vec![PriceId::new("aa"), PriceId::new("bb")];
        assert!(broadcaster.publish_initial(&feed, &ids).await);

        let published = publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].event, "price-feeds-update");
        let feeds = published[0].payload["message"]["priceFeeds"]
            .as_array()
            .unwrap();
        assert_eq!(feeds.len(), 2);
        assert!(feeds[0].get("ema_price").is_some());
        assert!(cache.read().is_empty());
    }

    #[tokio::test]
    async fn initial_fetch_failure_is_logged_only() {
        let feed = MockPriceFeed::scripted(Vec::new());
        feed.fail_latest();
        let publisher = Arc::new(RecordingBroadcaster::new());
        let (broadcaster, _) = broadcaster(PriceCache::shared(), Arc::clone(&publisher));

        assert!(!broadcaster.publish_initial(&feed, &[PriceId::new("aa")]).await);
        assert_eq!(publisher.attempts(), 0);
    }
}
