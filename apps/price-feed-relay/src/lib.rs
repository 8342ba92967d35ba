#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::cast_possible_truncation
    )
)]

//! Price Feed Relay - Hermes to Pusher Fan-out
//!
//! Keeps one subscription open to the Pyth Hermes price service, holds the
//! latest value per price id, and publishes the full snapshot to a Pusher
//! channel on a fixed interval.
//!
//! # Layers (inside to outside)
//!
//! - **Domain**: Price types, the latest-value cache and connection state
//!   - `price`: Ids, fixed-point prices, updates and cached records
//!   - `cache`: Latest-value cache keyed by price id
//!   - `connection`: Connection state and the reconnection backoff policy
//!
//! - **Application**: Services and port definitions
//!   - `ports`: Upstream feed and broadcast transport interfaces
//!   - `services`: Feed connector, cache writer, broadcaster
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `hermes`: Hermes REST and WebSocket client
//!   - `pusher`: Signed Pusher HTTP publisher
//!   - `config`: Environment configuration
//!   - `health`: Liveness, status and metrics endpoint
//!
//! # Data Flow
//!
//! ```text
//! Hermes WS --> FeedConnector --mpsc--> CacheWriter --> PriceCache
//!                                                           |
//!                                              every 5s     v
//!                                  Pusher <-- Broadcaster (snapshot)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Price types, cache and connection state.
pub mod domain;

/// Application layer - Services and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::cache::{PriceCache, SharedPriceCache};
pub use domain::connection::{
    ConnectionState, FeedStatus, ReconnectConfig, ReconnectPolicy,
};
pub use domain::price::{Price, PriceId, PriceRecord, PriceUpdate};

// Ports and services
pub use application::RelayContext;
pub use application::ports::{
    BroadcastPort, FeedError, PriceFeedPort, PublishError, Subscription,
};
pub use application::services::{
    BroadcastTopic, Broadcaster, CacheWriter, ConnectorConfig, FeedConnector, TickOutcome,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, RelayConfig};

// Adapters
pub use infrastructure::hermes::{HermesClient, HermesConfig};
pub use infrastructure::pusher::{PusherClient, PusherConfig};

// HTTP server
pub use infrastructure::health::{HealthServer, HealthServerError, HttpState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
