//! Cache Writer
//!
//! The single consumer of the update channel and the only task that writes
//! to the latest-value cache.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::cache::SharedPriceCache;
use crate::domain::connection::FeedStatus;
use crate::domain::price::{PriceRecord, PriceUpdate};
use crate::infrastructure::metrics;

/// Applies upstream updates to the cache.
pub struct CacheWriter {
    cache: SharedPriceCache,
    freshness: Option<Duration>,
    status: Arc<FeedStatus>,
}

impl CacheWriter {
    /// Create a writer.
    ///
    /// With `freshness` set, prices published outside the window are stored
    /// as `None`; without it the raw price is stored.
    #[must_use]
    pub const fn new(
        cache: SharedPriceCache,
        freshness: Option<Duration>,
        status: Arc<FeedStatus>,
    ) -> Self {
        Self {
            cache,
            freshness,
            status,
        }
    }

    /// Apply one update using the current wall-clock time.
    pub fn on_update(&self, update: PriceUpdate) -> PriceRecord {
        self.on_update_at(update, Utc::now())
    }

    /// Apply one update as of `now`.
    pub fn on_update_at(&self, update: PriceUpdate, now: DateTime<Utc>) -> PriceRecord {
        let record = PriceRecord::from_update(update, self.freshness, now);

        if record.price.is_none() {
            metrics::record_stale_update();
            tracing::debug!(id = %record.id, "Stale price stored without value");
        }

        let cached = {
            let mut cache = self.cache.write();
            cache.apply(record.clone());
            cache.len()
        };

        self.status.increment_updates();
        metrics::record_update_received();
        metrics::set_cached_records(cached);
        tracing::trace!(id = %record.id, "Price update cached");

        record
    }

    /// Drain the update channel until it closes or `cancel` fires.
    pub async fn run(self, mut updates: mpsc::Receiver<PriceUpdate>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Cache writer cancelled");
                    return;
                }
                update = updates.recv() => {
                    let Some(update) = update else {
                        tracing::debug!("Update channel closed");
                        return;
                    };
                    self.on_update(update);
                }
            }
        }
    }
}
