//! Wire protocol between agents and the hub.
//!
//! Every frame on the stream is one JSON-encoded envelope.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Source tag used for envelopes that carry a command response.
pub const DIRECT_SOURCE: &str = "direct";

/// Identifier of one agent session, minted by the hub at bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Mint a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is the empty string.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for ConnectionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message from agent to hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentEnvelope {
    /// Session the envelope belongs to.
    pub connection_id: ConnectionId,
    /// Originating file path, or [`DIRECT_SOURCE`] for command responses.
    pub source: String,
    /// Raw log line or encoded command response.
    pub payload: String,
}

impl AgentEnvelope {
    /// Envelope carrying one tailed line.
    #[must_use]
    pub fn line(connection_id: ConnectionId, source: impl Into<String>, line: impl Into<String>) -> Self {
        Self {
            connection_id,
            source: source.into(),
            payload: line.into(),
        }
    }

    /// Envelope carrying a command response document.
    #[must_use]
    pub fn direct(connection_id: ConnectionId, payload: impl Into<String>) -> Self {
        Self {
            connection_id,
            source: DIRECT_SOURCE.to_string(),
            payload: payload.into(),
        }
    }

    /// Whether this envelope carries a command response.
    #[must_use]
    pub fn is_direct(&self) -> bool {
        self.source == DIRECT_SOURCE
    }
}

/// Message from hub to agent: a command line to execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubEnvelope {
    pub payload: String,
}

impl HubEnvelope {
    #[must_use]
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

/// Reply to the session bootstrap request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UuidResponse {
    pub uuid: String,
}

impl UuidResponse {
    /// The minted id as a [`ConnectionId`].
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        ConnectionId::from(self.uuid.as_str())
    }
}
