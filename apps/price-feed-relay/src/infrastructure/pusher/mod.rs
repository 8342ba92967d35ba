//! Pusher Channels Adapter
//!
//! Implements `BroadcastPort` over the Pusher HTTP events API.

pub mod auth;
mod client;

pub use client::{MAX_DATA_BYTES, PusherClient, PusherConfig};
