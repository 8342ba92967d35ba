//! Hermes Wire Messages
//!
//! JSON types for the Hermes WebSocket protocol and REST responses.
//!
//! # Client Messages
//!
//! ```json
//! {"type": "subscribe", "ids": ["e62d..."], "verbose": true}
//! {"type": "unsubscribe", "ids": ["e62d..."]}
//! ```
//!
//! # Server Messages
//!
//! ```json
//! {"type": "response", "status": "success"}
//! {"type": "response", "status": "error", "error": "Price ids not found: ..."}
//! {"type": "price_update", "price_feed": {"id": "...", "price": {...}, "ema_price": {...}}}
//! ```
//!
//! `latest_price_feeds` returns a JSON array of the same `price_feed` objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::price::{Price, PriceId, PriceUpdate};

// =============================================================================
// Client Messages
// =============================================================================

/// Request sent over the WebSocket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start streaming updates for `ids`.
    Subscribe {
        /// Ids to subscribe to.
        ids: Vec<PriceId>,
        /// Ask for per-update metadata.
        verbose: bool,
    },
    /// Stop streaming updates for `ids`.
    Unsubscribe {
        /// Ids to drop.
        ids: Vec<PriceId>,
    },
}

impl ClientMessage {
    /// Verbose subscribe request.
    #[must_use]
    pub fn subscribe(ids: &[PriceId]) -> Self {
        Self::Subscribe {
            ids: ids.to_vec(),
            verbose: true,
        }
    }

    /// Unsubscribe request.
    #[must_use]
    pub fn unsubscribe(ids: &[PriceId]) -> Self {
        Self::Unsubscribe { ids: ids.to_vec() }
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Server Messages
// =============================================================================

/// Message received over the WebSocket.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Acknowledgement of a client request.
    Response(ResponseMessage),
    /// A pushed price.
    PriceUpdate {
        /// The updated feed.
        price_feed: PriceFeedMessage,
    },
    /// Any message type this client does not handle.
    #[serde(other)]
    Unknown,
}

/// Outcome of a client request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    /// Request accepted.
    Success,
    /// Request rejected.
    Error,
}

/// Acknowledgement body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResponseMessage {
    /// Whether the request was accepted.
    pub status: ResponseStatus,
    /// Reason for a rejection.
    #[serde(default)]
    pub error: Option<String>,
}

impl ResponseMessage {
    /// Whether the request was accepted.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

/// One price feed as encoded by Hermes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PriceFeedMessage {
    /// Feed id, without `0x`.
    pub id: PriceId,
    /// Aggregate price.
    pub price: Price,
    /// EMA price.
    pub ema_price: Price,
    /// Present on verbose subscriptions.
    #[serde(default)]
    pub metadata: Option<PriceFeedMetadata>,
}

/// Per-update metadata attached to verbose subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PriceFeedMetadata {
    /// Slot the price was produced in.
    #[serde(default)]
    pub slot: Option<u64>,
    /// Wormhole emitter chain.
    #[serde(default)]
    pub emitter_chain: Option<u16>,
    /// Unix time (seconds) the price service received the update.
    #[serde(default)]
    pub price_service_receive_time: Option<i64>,
    /// Publish time of the previous update.
    #[serde(default)]
    pub prev_publish_time: Option<i64>,
}

impl From<PriceFeedMessage> for PriceUpdate {
    fn from(feed: PriceFeedMessage) -> Self {
        let timestamp = feed
            .metadata
            .and_then(|m| m.price_service_receive_time)
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));

        Self {
            id: feed.id,
            price: feed.price,
            ema_price: feed.ema_price,
            timestamp,
        }
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// A frame that could not be turned into an update.
#[derive(Debug, thiserror::Error)]
pub enum UpdateProcessingError {
    /// The frame is not valid JSON for any known message.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A binary frame arrived on a JSON stream.
    #[error("unexpected binary frame of {0} bytes")]
    UnexpectedBinary(usize),
}

/// Decode one text frame.
///
/// # Errors
///
/// Returns an error if the frame is not a recognised JSON message.
pub fn decode(text: &str) -> Result<ServerMessage, UpdateProcessingError> {
    Ok(serde_json::from_str(text)?)
}

/// Decode a `latest_price_feeds` response body.
///
/// # Errors
///
/// Returns an error if the body is not an array of price feeds.
pub fn decode_latest(body: &str) -> Result<Vec<PriceUpdate>, UpdateProcessingError> {
    let feeds: Vec<PriceFeedMessage> = serde_json::from_str(body)?;
    Ok(feeds.into_iter().map(PriceUpdate::from).collect())
}
