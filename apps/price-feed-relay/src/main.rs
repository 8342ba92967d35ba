//! Price Feed Relay Binary
//!
//! Starts the Hermes to Pusher relay.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin price-feed-relay
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `PUSHER_APP_ID`, `PUSHER_KEY`, `PUSHER_SECRET`, `PUSHER_CLUSTER`
//!
//! ## Optional
//! - `PORT`: HTTP port (default: 3000)
//! - `HERMES_ENDPOINT`: Hermes base URL (default: <https://hermes.pyth.network>)
//! - `PRICE_IDS`: Comma-separated price ids (default: three built-in feeds)
//! - `RELAY_BROADCAST_INTERVAL_MS`: Snapshot interval (default: 5000)
//! - `RELAY_FRESHNESS_SECS`: Max price age, 0 stores raw prices (default: 60)
//! - `RELAY_RECONNECT_DELAY_INITIAL_MS` / `RELAY_RECONNECT_DELAY_MAX_MS`: Backoff bounds (default: 1000 / 30000)
//! - `RELAY_RECONNECT_MULTIPLIER`: Backoff multiplier (default: 2.0)
//! - `RELAY_MAX_RECONNECT_ATTEMPTS`: Attempts before giving up, 0 = unlimited (default: 10)
//! - `RELAY_RECONNECT_JITTER`: Jitter fraction (default: 0.0)
//! - `RELAY_CHANNEL`, `RELAY_SNAPSHOT_EVENT`, `RELAY_INITIAL_EVENT`: Pusher names
//! - `RELAY_HTTP_TIMEOUT_SECS`: Outbound request timeout (default: 10)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use price_feed_relay::application::services::{
    Broadcaster, CacheWriter, ConnectorConfig, FeedConnector,
};
use price_feed_relay::infrastructure::health::{HealthServer, HttpState};
use price_feed_relay::infrastructure::hermes::{HermesClient, HermesConfig};
use price_feed_relay::infrastructure::pusher::{PusherClient, PusherConfig};
use price_feed_relay::infrastructure::telemetry;
use price_feed_relay::{
    BroadcastPort, PriceFeedPort, PriceUpdate, RelayConfig, RelayContext, init_metrics,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Buffered updates between the upstream reader and the cache writer.
const UPDATE_CHANNEL_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "failed to install rustls crypto provider")?;

    load_dotenv();

    let telemetry_guard = telemetry::init()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        otlp_export = telemetry_guard.is_exporting(),
        "Starting Price Feed Relay"
    );

    let _metrics_handle = init_metrics()?;

    let config = RelayConfig::from_env()?;
    log_config(&config);

    let context = RelayContext::new();
    let shutdown_token = context.shutdown_token();

    // Adapters
    let feed: Arc<dyn PriceFeedPort> = Arc::new(HermesClient::new(HermesConfig::new(
        config.hermes.endpoint.clone(),
        config.hermes.request_timeout,
    ))?);
    let publisher: Arc<dyn BroadcastPort> =
        Arc::new(PusherClient::new(PusherConfig::from(&config.pusher))?);

    // HTTP server
    let http_state = Arc::new(HttpState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        context.status(),
        context.cache(),
    ));
    let http_server =
        HealthServer::bind(config.server.port, http_state, shutdown_token.clone()).await?;

    let mut tasks = Vec::new();
    tasks.push(spawn_supervised("http", async move {
        if let Err(e) = http_server.run().await {
            tracing::error!(error = %e, "HTTP server error");
        }
    }));

    // Cache writer
    let (update_tx, update_rx) = mpsc::channel::<PriceUpdate>(UPDATE_CHANNEL_CAPACITY);
    let cache_writer = CacheWriter::new(context.cache(), config.hermes.freshness, context.status());
    tasks.push(spawn_supervised(
        "cache-writer",
        cache_writer.run(update_rx, shutdown_token.clone()),
    ));

    // Feed connector
    let connector = Arc::new(FeedConnector::new(
        ConnectorConfig {
            ids: config.hermes.price_ids.clone(),
            reconnect: config.reconnect_config(),
        },
        Arc::clone(&feed),
        update_tx,
        context.status(),
        shutdown_token.clone(),
    ));
    let run_connector = Arc::clone(&connector);
    tasks.push(spawn_supervised("feed-connector", async move {
        if let Err(e) = run_connector.run().await {
            tracing::error!(error = %e, "Feed connector stopped permanently");
        }
    }));

    // Startup publish, then the periodic broadcaster
    let broadcaster = Broadcaster::new(
        context.cache(),
        publisher,
        config.broadcast.topic.clone(),
        config.broadcast.interval,
        shutdown_token.clone(),
    );
    let ids = config.hermes.price_ids.clone();
    tasks.push(spawn_supervised("broadcaster", async move {
        broadcaster.publish_initial(feed.as_ref(), &ids).await;
        broadcaster.run().await;
    }));

    tracing::info!("Price feed relay ready");

    await_shutdown().await;

    connector.shutdown().await;
    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, join_all(tasks))
        .await
        .is_err()
    {
        tracing::warn!("Background tasks did not stop before the shutdown timeout");
    }

    tracing::info!("Price feed relay stopped");
    Ok(())
}

/// Spawn a background task whose panic is logged instead of lost.
fn spawn_supervised<F>(name: &'static str, task: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let handle = tokio::spawn(task);
    tokio::spawn(async move {
        match handle.await {
            Ok(()) => tracing::debug!(task = name, "Task finished"),
            Err(e) if e.is_panic() => tracing::error!(task = name, error = %e, "Task panicked"),
            Err(e) => tracing::warn!(task = name, error = %e, "Task aborted"),
        }
    })
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        port = config.server.port,
        hermes = %config.hermes.endpoint,
        price_ids = config.hermes.price_ids.len(),
        freshness_secs = config.hermes.freshness.map(|d| d.as_secs()),
        cluster = %config.pusher.cluster,
        channel = %config.broadcast.topic.channel,
        interval_ms = config.broadcast.interval.as_millis(),
        "Configuration loaded"
    );
    tracing::debug!(
        initial_ms = config.reconnect.delay_initial.as_millis(),
        max_ms = config.reconnect.delay_max.as_millis(),
        multiplier = config.reconnect.multiplier,
        max_attempts = config.reconnect.max_attempts,
        "Reconnection policy"
    );
}

/// Wait for SIGINT or SIGTERM.
///
/// A handler that cannot be installed is logged and never fires.
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
