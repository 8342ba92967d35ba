//! Latest-Value Cache
//!
//! Holds the most recent `PriceRecord` per `PriceId`. A single writer task
//! applies updates; the broadcaster reads snapshots.
//!
//! Snapshots are returned in first-insertion order so consecutive broadcasts
//! list series in a stable order.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::price::{PriceId, PriceRecord};

/// Shared handle to the cache.
pub type SharedPriceCache = Arc<RwLock<PriceCache>>;

/// Mapping from series identifier to its latest record.
#[derive(Debug, Default)]
pub struct PriceCache {
    records: Vec<PriceRecord>,
    index: HashMap<PriceId, usize>,
}

impl PriceCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty cache behind a shared lock.
    #[must_use]
    pub fn shared() -> SharedPriceCache {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Store a record, replacing any previous record for the same id.
    ///
    /// Returns the replaced record.
    pub fn apply(&mut self, record: PriceRecord) -> Option<PriceRecord> {
        if let Some(&slot) = self.index.get(&record.id) {
            return Some(std::mem::replace(&mut self.records[slot], record));
        }

        self.index.insert(record.id.clone(), self.records.len());
        self.records.push(record);
        None
    }

    /// Get the record for an id.
    #[must_use]
    pub fn get(&self, id: &PriceId) -> Option<&PriceRecord> {
        self.index.get(id).map(|&slot| &self.records[slot])
    }

    /// Copy of all current records.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PriceRecord> {
        self.records.clone()
    }

    /// Number of series with a record.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no record has been stored yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
