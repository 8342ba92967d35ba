//! HTTP Endpoint
//!
//! Liveness, relay status and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /` - Plain-text liveness banner, independent of upstream health
//! - `GET /status` - JSON snapshot of the upstream connection and cache
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::domain::cache::SharedPriceCache;
use crate::domain::connection::FeedStatus;
use crate::infrastructure::metrics::get_metrics_handle;

/// Body served at `/`.
pub const LIVENESS_BANNER: &str = "Price Feed Backend is running.";

// =============================================================================
// Status Response
// =============================================================================

/// Relay status served at `/status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    /// Relay version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Upstream connection state.
    pub connection: String,
    /// Last time the subscription was established.
    pub last_subscribed_at: Option<DateTime<Utc>>,
    /// Most recent upstream error.
    pub last_error: Option<String>,
    /// Reconnection attempts in the current backoff cycle.
    pub reconnect_attempts: u32,
    /// Updates received since start.
    pub updates_received: u64,
    /// Ids currently held in the cache.
    pub cached_records: usize,
}

// =============================================================================
// Server State
// =============================================================================

/// Shared state for the HTTP handlers.
pub struct HttpState {
    version: String,
    started_at: Instant,
    status: Arc<FeedStatus>,
    cache: SharedPriceCache,
}

impl HttpState {
    /// Create handler state.
    #[must_use]
    pub fn new(version: String, status: Arc<FeedStatus>, cache: SharedPriceCache) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            status,
            cache,
        }
    }

    fn status_response(&self) -> StatusResponse {
        StatusResponse {
            version: self.version.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            connection: self.status.state().as_str().to_string(),
            last_subscribed_at: self.status.last_subscribed_at(),
            last_error: self.status.last_error(),
            reconnect_attempts: self.status.reconnect_attempts(),
            updates_received: self.status.updates_received(),
            cached_records: self.cache.read().len(),
        }
    }
}

/// Build the HTTP router.
pub fn router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/", get(liveness_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// Server
// =============================================================================

/// HTTP server bound to its listening socket.
pub struct HealthServer {
    listener: TcpListener,
    state: Arc<HttpState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Bind the listening socket on all interfaces.
    ///
    /// Port 0 picks a free port; see [`HealthServer::local_addr`].
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError::BindFailed` if the port is unavailable.
    pub async fn bind(
        port: u16,
        state: Arc<HttpState>,
        cancel: CancellationToken,
    ) -> Result<Self, HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(port, e.to_string()))?;

        Ok(Self {
            listener,
            state,
            cancel,
        })
    }

    /// Address the server is listening on.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr, HealthServerError> {
        self.listener
            .local_addr()
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))
    }

    /// Serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError::ServerFailed` if the server stops with an error.
    pub async fn run(self) -> Result<(), HealthServerError> {
        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!(port = addr.port(), "HTTP server listening");
        }

        axum::serve(self.listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, LIVENESS_BANNER)
}

async fn status_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    Json(state.status_response())
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

// =============================================================================
// Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
