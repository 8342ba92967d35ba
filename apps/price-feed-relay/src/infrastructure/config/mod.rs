//! Configuration Module
//!
//! Environment-driven settings for the relay.

mod settings;

pub use settings::{
    BroadcastSettings, ConfigError, DEFAULT_PRICE_IDS, HermesSettings, PusherCredentials,
    PusherSettings, ReconnectSettings, RelayConfig, ServerSettings,
};
