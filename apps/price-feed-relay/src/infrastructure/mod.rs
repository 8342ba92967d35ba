//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Hermes price service adapter (REST + WebSocket).
pub mod hermes;

/// Pusher Channels broadcast adapter.
pub mod pusher;

/// Environment-driven configuration.
pub mod config;

/// Liveness, status and metrics HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing subscriber and OpenTelemetry export.
pub mod telemetry;

/// In-memory port implementations for tests.
#[doc(hidden)]
pub mod mock;
