//! Relay Context
//!
//! State owned by the process root and handed to each service: the
//! latest-value cache, the upstream connection status and the shutdown
//! token that every background task observes.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::domain::cache::{PriceCache, SharedPriceCache};
use crate::domain::connection::FeedStatus;

/// Process-scoped relay state.
#[derive(Debug, Clone)]
pub struct RelayContext {
    cache: SharedPriceCache,
    status: Arc<FeedStatus>,
    shutdown: CancellationToken,
}

impl Default for RelayContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayContext {
    /// Create a context with an empty cache and a fresh shutdown token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache: PriceCache::shared(),
            status: Arc::new(FeedStatus::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Handle to the latest-value cache.
    #[must_use]
    pub fn cache(&self) -> SharedPriceCache {
        Arc::clone(&self.cache)
    }

    /// Handle to the upstream connection status.
    #[must_use]
    pub fn status(&self) -> Arc<FeedStatus> {
        Arc::clone(&self.status)
    }

    /// The process-wide shutdown token.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Whether shutdown has begun.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
