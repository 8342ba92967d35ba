//! Hermes Price Service Adapter
//!
//! Implements `PriceFeedPort` against Pyth Hermes: REST for latest values,
//! WebSocket for pushed updates.

mod client;
pub mod messages;

pub use client::{HermesClient, HermesConfig};
pub use messages::UpdateProcessingError;
