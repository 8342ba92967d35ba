//! Price Types
//!
//! Identifiers for tracked price series, the price payload delivered by the
//! upstream feed, and the records kept in the latest-value cache.
//!
//! # Wire Shape
//!
//! Hermes encodes `price` and `conf` as decimal strings and scales them by
//! `10^expo`:
//!
//! ```json
//! {"price":"6140993501000","conf":"2947184823","expo":-8,"publish_time":1718200000}
//! ```

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Price Identifier
// =============================================================================

/// Identifier of one tracked price series.
///
/// Stored as lowercase hex without a `0x` prefix, which is the form Hermes
/// uses when echoing ids back in push messages. Configured ids with a prefix
/// therefore compare equal to the ids carried by updates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct PriceId(String);

impl PriceId {
    /// Create an identifier, normalising case and stripping any `0x` prefix.
    #[must_use]
    pub fn new(raw: impl AsRef<str>) -> Self {
        let trimmed = raw.as_ref().trim();
        let hex = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        Self(hex.to_ascii_lowercase())
    }

    /// Parse an identifier, rejecting empty or non-hex input.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let id = Self::new(raw);
        if id.0.is_empty() || !id.0.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        Some(id)
    }

    /// The normalised hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The identifier with a `0x` prefix.
    #[must_use]
    pub fn to_prefixed(&self) -> String {
        format!("0x{}", self.0)
    }
}

impl From<String> for PriceId {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<PriceId> for String {
    fn from(id: PriceId) -> Self {
        id.0
    }
}

impl fmt::Display for PriceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Price
// =============================================================================

/// A fixed-point price as published by the upstream feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Price mantissa.
    #[serde(with = "as_string")]
    pub price: i64,
    /// Confidence interval mantissa.
    #[serde(with = "as_string")]
    pub conf: u64,
    /// Decimal exponent applied to `price` and `conf`.
    pub expo: i32,
    /// Unix time (seconds) at which the price was published.
    pub publish_time: i64,
}

impl Price {
    /// The price scaled by its exponent.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn value(&self) -> f64 {
        self.price as f64 * 10f64.powi(self.expo)
    }

    /// The confidence interval scaled by the price exponent.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn confidence(&self) -> f64 {
        self.conf as f64 * 10f64.powi(self.expo)
    }

    /// Return the price only if its publish time lies within `max_age` of `now`.
    ///
    /// The distance is absolute, so a publish time ahead of the local clock
    /// is accepted as long as the skew stays inside the window.
    #[must_use]
    pub fn no_older_than(&self, now: DateTime<Utc>, max_age: Duration) -> Option<Self> {
        let age = now.timestamp().abs_diff(self.publish_time);
        (age <= max_age.as_secs()).then_some(*self)
    }
}

/// Serialize numbers as decimal strings, matching the Hermes encoding.
mod as_string {
    use std::fmt::Display;
    use std::str::FromStr;

    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Display,
        S: Serializer,
    {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

// =============================================================================
// Updates and Records
// =============================================================================

/// One push message from the upstream feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceUpdate {
    /// Series the update belongs to.
    pub id: PriceId,
    /// Latest aggregate price.
    pub price: Price,
    /// Exponentially-weighted moving average price.
    pub ema_price: Price,
    /// Time the upstream service received the price, when the message carries it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// The latest known value for one series, as held in the cache and broadcast.
///
/// `price` is `None` when the freshness filter rejected a stale value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceRecord {
    /// Series identifier.
    pub id: PriceId,
    /// Price accepted for this record.
    pub price: Option<Price>,
    /// Observation time.
    pub timestamp: DateTime<Utc>,
}

impl PriceRecord {
    /// Build a record from an update.
    ///
    /// With a freshness window the price must have been published within it;
    /// without one the raw price is taken. Updates that carry no timestamp are
    /// stamped with `now`.
    #[must_use]
    pub fn from_update(update: PriceUpdate, freshness: Option<Duration>, now: DateTime<Utc>) -> Self {
        let price = match freshness {
            Some(max_age) => update.price.no_older_than(now, max_age),
            None => Some(update.price),
        };

        Self {
            id: update.id,
            price,
            timestamp: update.timestamp.unwrap_or(now),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
