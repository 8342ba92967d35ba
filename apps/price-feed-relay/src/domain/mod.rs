//! Domain Layer - Price records, the latest-value cache and connection state.
//!
//! Pure types with no I/O. Everything here is usable from tests without a
//! runtime.

/// Price identifiers, payloads and cached records.
pub mod price;

/// Latest-value cache keyed by price identifier.
pub mod cache;

/// Upstream connection state and reconnection policy.
pub mod connection;
