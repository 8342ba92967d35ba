//! Prometheus Metrics Module
//!
//! Relay metrics rendered in Prometheus text format.
//!
//! # Metrics Categories
//!
//! - **Updates**: upstream updates received and stale values stored
//! - **Cache**: number of cached records
//! - **Publishing**: publish outcomes and latency by kind
//! - **Connection**: upstream state and reconnection attempts
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::connection::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder and describe the relay metrics.
///
/// Calling this again returns the handle installed by the first call.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "price_relay_updates_received_total",
        "Total price updates received from the upstream feed"
    );
    describe_counter!(
        "price_relay_stale_updates_total",
        "Updates stored without a value because they failed the freshness check"
    );

    describe_gauge!(
        "price_relay_cached_records",
        "Number of price identifiers held in the cache"
    );

    describe_counter!(
        "price_relay_publishes_total",
        "Publish attempts by kind and outcome"
    );
    describe_histogram!(
        "price_relay_publish_duration_seconds",
        "Time spent delivering one publish"
    );

    describe_gauge!(
        "price_relay_connection_state",
        "Upstream connection state (0 disconnected, 1 connecting, 2 subscribed, 3 failed)"
    );
    describe_counter!(
        "price_relay_reconnects_total",
        "Total upstream reconnection attempts"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for publish kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishKind {
    /// Periodic cache snapshot.
    Snapshot,
    /// One-off startup publish.
    Initial,
}

impl PublishKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::Initial => "initial",
        }
    }
}

const fn outcome(ok: bool) -> &'static str {
    if ok { "success" } else { "failure" }
}

const fn state_value(state: ConnectionState) -> f64 {
    match state {
        ConnectionState::Disconnected => 0.0,
        ConnectionState::Connecting => 1.0,
        ConnectionState::Subscribed => 2.0,
        ConnectionState::Failed => 3.0,
    }
}

/// Record an update received from upstream.
pub fn record_update_received() {
    counter!("price_relay_updates_received_total").increment(1);
}

/// Record an update stored without a value.
pub fn record_stale_update() {
    counter!("price_relay_stale_updates_total").increment(1);
}

/// Update the cached record count.
#[allow(clippy::cast_precision_loss)]
pub fn set_cached_records(count: usize) {
    gauge!("price_relay_cached_records").set(count as f64);
}

/// Record one publish attempt.
pub fn record_publish(kind: PublishKind, ok: bool, elapsed: Duration) {
    counter!(
        "price_relay_publishes_total",
        "kind" => kind.as_str(),
        "outcome" => outcome(ok)
    )
    .increment(1);
    histogram!(
        "price_relay_publish_duration_seconds",
        "kind" => kind.as_str()
    )
    .record(elapsed.as_secs_f64());
}

/// Record an upstream reconnection attempt.
pub fn record_reconnect() {
    counter!("price_relay_reconnects_total").increment(1);
}

/// Update the upstream connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("price_relay_connection_state").set(state_value(state));
}

// =============================================================================
// Tests
// =============================================================================
