//! Fleet log collector.
//!
//! Provides:
//! - Agent stream sessions over WebSocket (`GET /stream`, `POST /uuid`)
//! - HTTP control plane (`GET /connections`, `POST /send`, `POST /broadcast`)
//! - TLS listener for the stream endpoint

pub mod config;
pub mod control;
pub mod session;
pub mod tls;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use fleetwatch_core::ConnectionRegistry;
use fleetwatch_logwriter::RotatingLogWriter;
use tower_http::trace::TraceLayer;

pub use config::{HubConfig, TlsFiles};
pub use session::{LogRecord, SessionState, StreamSession, WsCommandSink};
pub use tls::{TlsError, TlsListener, load_server_config};

/// State shared by the stream handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub writer: Arc<RotatingLogWriter>,
}

impl AppState {
    #[must_use]
    pub const fn new(registry: Arc<ConnectionRegistry>, writer: Arc<RotatingLogWriter>) -> Self {
        Self { registry, writer }
    }
}

/// Agent-facing router: session bootstrap and the stream itself.
#[must_use]
pub fn stream_router(state: AppState) -> Router {
    Router::new()
        .route("/uuid", post(session::uuid_handler))
        .route("/stream", get(session::stream_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Operator-facing router.
#[must_use]
pub fn control_router(registry: Arc<ConnectionRegistry>) -> Router {
    Router::new()
        .route("/connections", get(control::list_connections))
        .route("/send", post(control::send_to_agent))
        .route("/broadcast", post(control::broadcast))
        .layer(TraceLayer::new_for_http())
        .with_state(registry)
}
