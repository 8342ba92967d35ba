//! Application Services
//!
//! - `FeedConnector`: upstream session, subscription and reconnection
//! - `CacheWriter`: applies pushed updates to the latest-value cache
//! - `Broadcaster`: periodic snapshot publishing and the startup publish

pub mod broadcaster;
pub mod cache_writer;
pub mod connector;

pub use broadcaster::{BroadcastTopic, Broadcaster, TickOutcome};
pub use cache_writer::CacheWriter;
pub use connector::{ConnectorConfig, FeedConnector};
