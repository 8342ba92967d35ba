//! Upstream Connection State
//!
//! Connection lifecycle of the feed connector and the shared status handle
//! other components read it through.
//!
//! ```text
//! Disconnected ──► Connecting ──► Subscribed
//!       │               │              │
//!       └───────────────┴──────┬───────┘
//!                              ▼
//!                           Failed ──(backoff)──► Connecting
//! ```

mod reconnect;

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

pub use reconnect::{ReconnectConfig, ReconnectPolicy};

/// Connection state of the upstream feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No session open.
    #[default]
    Disconnected,
    /// Session being opened or subscription being registered.
    Connecting,
    /// Push updates are flowing.
    Subscribed,
    /// The last connection or subscription attempt failed.
    Failed,
}

impl ConnectionState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Failed => "failed",
        }
    }
}

/// Connection status shared between the connector and observers.
#[derive(Debug, Default)]
pub struct FeedStatus {
    state: RwLock<ConnectionState>,
    last_subscribed_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    reconnect_attempts: AtomicU32,
    updates_received: AtomicU64,
}

impl FeedStatus {
    /// Create a status in the `Disconnected` state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection state.
    pub fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
        if state == ConnectionState::Subscribed {
            *self.last_subscribed_at.write() = Some(Utc::now());
            *self.last_error.write() = None;
        }
    }

    /// Enter the `Failed` state with a reason.
    pub fn set_failed(&self, message: String) {
        *self.state.write() = ConnectionState::Failed;
        *self.last_error.write() = Some(message);
    }

    /// Record the number of reconnection attempts made so far.
    pub fn set_reconnect_attempts(&self, attempts: u32) {
        self.reconnect_attempts.store(attempts, Ordering::Relaxed);
    }

    /// Increment the received update counter.
    pub fn increment_updates(&self) {
        self.updates_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Time of the most recent successful subscription.
    #[must_use]
    pub fn last_subscribed_at(&self) -> Option<DateTime<Utc>> {
        *self.last_subscribed_at.read()
    }

    /// Reason for the most recent failure.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Reconnection attempts made since the last successful subscription.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Total updates received.
    #[must_use]
    pub fn updates_received(&self) -> u64 {
        self.updates_received.load(Ordering::Relaxed)
    }
}
