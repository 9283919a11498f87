//! Core traits and error types shared by hub and agent.

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::{ConnectionId, HubEnvelope};

/// Transport error: a stream send or receive failed.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Stream closed")]
    Closed,
    #[error("Send failed: {0}")]
    Send(String),
    #[error("Receive failed: {0}")]
    Receive(String),
    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Registry error.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Connection not found: {0}")]
    NotFound(ConnectionId),
    #[error("Send to {id} failed: {source}")]
    SendFailed {
        id: ConnectionId,
        #[source]
        source: TransportError,
    },
}

/// Outbound half of one agent session, as seen by the registry.
///
/// Implemented by the hub's WebSocket writer; tests plug in channel-backed sinks.
#[async_trait]
pub trait CommandSink: Send + Sync {
    /// Deliver one envelope to the agent.
    async fn send(&self, envelope: HubEnvelope) -> Result<(), TransportError>;
}
