//! Relay Flow Integration Tests
//!
//! Drives the connector, cache writer and broadcaster together against
//! in-memory ports.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use price_feed_relay::infrastructure::mock::{
    MockPriceFeed, RecordingBroadcaster, SubscribeBehavior, sample_update,
};
use price_feed_relay::{
    BroadcastTopic, Broadcaster, CacheWriter, ConnectionState, ConnectorConfig, FeedConnector,
    PriceId, ReconnectConfig, RelayContext, TickOutcome,
};

const ID_A: &str = "0x23d7315113f5b1d3ba7a83604c44b94d79f4fd69af77f804fc7f920a6dc65744";
const ID_B: &str = "0x6120ffcf96395c70aa77e72dcb900bf9d40dccab228efca59a17b90ce423d5e8";
const ID_C: &str = "0xeba0732395fae9dec4bae12e52760b35fc1c5671e2da8b449c9af4efe5d54341";

struct Relay {
    context: RelayContext,
    connector: Arc<FeedConnector>,
    broadcaster: Broadcaster,
    publisher: Arc<RecordingBroadcaster>,
    feed: Arc<MockPriceFeed>,
}

fn relay(feed: MockPriceFeed) -> Relay {
    let context = RelayContext::new();
    let feed = Arc::new(feed);
    let publisher = Arc::new(RecordingBroadcaster::new());
    let (tx, rx) = mpsc::channel(64);

    let writer = CacheWriter::new(context.cache(), Some(Duration::from_secs(60)), context.status());
    tokio::spawn(writer.run(rx, context.shutdown_token()));

    let connector = Arc::new(FeedConnector::new(
        ConnectorConfig {
            ids: [ID_A, ID_B, ID_C].iter().map(|id| PriceId::new(id)).collect(),
            reconnect: ReconnectConfig::default(),
        },
        feed.clone(),
        tx,
        context.status(),
        context.shutdown_token(),
    ));

    let broadcaster = Broadcaster::new(
        context.cache(),
        publisher.clone(),
        BroadcastTopic::default(),
        Duration::from_millis(5000),
        context.shutdown_token(),
    );

    Relay {
        context,
        connector,
        broadcaster,
        publisher,
        feed,
    }
}

async fn wait_for_records(context: &RelayContext, count: usize) {
    timeout(Duration::from_secs(5), async {
        while context.cache().read().len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("updates were not cached in time");
}

#[tokio::test]
async fn snapshot_contains_only_ids_with_updates() {
    let relay = relay(MockPriceFeed::scripted(vec![SubscribeBehavior::Stream(vec![
        sample_update(ID_A, 100),
        sample_update(ID_B, 200),
    ])]));

    let connector = Arc::clone(&relay.connector);
    let run = tokio::spawn(async move { connector.run().await });

    wait_for_records(&relay.context, 2).await;
    assert_eq!(relay.context.status().state(), ConnectionState::Subscribed);

    assert_eq!(relay.broadcaster.tick().await, TickOutcome::Published(2));

    let published = relay.publisher.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].channel, "price-feed-channel");
    assert_eq!(published[0].event, "price-update");

    let ids: Vec<&str> = published[0].payload["feeds"]
        .as_array()
        .unwrap()
        .iter()
        .map(|feed| feed["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec![PriceId::new(ID_A).as_str(), PriceId::new(ID_B).as_str()]);

    relay.connector.shutdown().await;
    run.await.unwrap().unwrap();
    assert_eq!(relay.feed.close_calls(), 1);
    assert_eq!(relay.feed.cancelled_subscriptions(), 1);
    assert!(relay.context.is_shutting_down());
}

#[tokio::test]
async fn later_update_replaces_earlier_in_snapshot() {
    let relay = relay(MockPriceFeed::scripted(vec![SubscribeBehavior::Stream(vec![
        sample_update(ID_A, 1),
        sample_update(ID_A, 2),
        sample_update(ID_C, 3),
    ])]));

    let connector = Arc::clone(&relay.connector);
    tokio::spawn(async move { connector.run().await });

    wait_for_records(&relay.context, 2).await;
    timeout(Duration::from_secs(5), async {
        while relay.context.status().updates_received() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    relay.broadcaster.tick().await;
    let payload = &relay.publisher.published()[0].payload;
    assert_eq!(payload["feeds"][0]["price"]["price"], "2");
    assert_eq!(payload["feeds"].as_array().unwrap().len(), 2);

    relay.connector.shutdown().await;
}

#[tokio::test]
async fn empty_cache_publishes_nothing() {
    let relay = relay(MockPriceFeed::failing_connect());
    assert_eq!(relay.broadcaster.tick().await, TickOutcome::Empty);
    assert_eq!(relay.publisher.attempts(), 0);
}

#[tokio::test]
async fn startup_publish_uses_latest_values() {
    let relay = relay(MockPriceFeed::scripted(Vec::new()));
    relay
        .feed
        .set_latest(vec![sample_update(ID_A, 10), sample_update(ID_B, 20)]);

    let ids: Vec<PriceId> = [ID_A, ID_B, ID_C].iter().map(|id| PriceId::new(id)).collect();
    assert!(relay.broadcaster.publish_initial(relay.feed.as_ref(), &ids).await);

    let published = relay.publisher.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].event, "price-feeds-update");
    assert_eq!(
        published[0].payload["message"]["priceFeeds"]
            .as_array()
            .unwrap()
            .len(),
        2
    );
    assert!(relay.context.cache().read().is_empty());
}

#[tokio::test]
async fn shutdown_before_run_is_harmless() {
    let relay = relay(MockPriceFeed::scripted(Vec::new()));
    relay.connector.shutdown().await;
    relay.connector.shutdown().await;

    relay.connector.run().await.unwrap();
    assert_eq!(relay.feed.close_calls(), 0);
    assert!(relay.feed.connect_times().is_empty());
}
