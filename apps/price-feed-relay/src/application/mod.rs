//! Application Layer - Relay services, port definitions and the process context.
//!
//! This layer wires the domain types to the outside world through ports.

/// Port interfaces for the upstream feed and the broadcast transport.
pub mod ports;

/// Connector, cache writer and broadcaster.
pub mod services;

/// Process-scoped state shared by the services.
pub mod context;

pub use context::RelayContext;
