//! Agent stream sessions.
//!
//! One [`StreamSession`] per connected agent. The first envelope on the
//! stream names the session's connection id and registers the socket's write
//! half in the [`ConnectionRegistry`]; every envelope is appended to the log.
//! The entry is removed when the stream ends.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use axum::{
    Json,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use fleetwatch_core::{
    AgentEnvelope, CommandSink, ConnectionId, ConnectionRegistry, HubEnvelope, TransportError,
    UuidResponse,
};
use fleetwatch_executor::{CommandResponse, ResponseBody};
use fleetwatch_logwriter::RotatingLogWriter;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::AppState;

/// One line of the hub's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub received_at: DateTime<Utc>,
    pub connection_id: ConnectionId,
    pub source: String,
    pub payload: String,
}

impl LogRecord {
    /// Record `envelope` as received on the session `connection_id`.
    #[must_use]
    pub fn new(connection_id: ConnectionId, envelope: &AgentEnvelope) -> Self {
        Self {
            received_at: Utc::now(),
            connection_id,
            source: envelope.source.clone(),
            payload: envelope.payload.clone(),
        }
    }
}

/// Write half of an agent socket, shared with the registry.
pub struct WsCommandSink<S> {
    sender: Mutex<S>,
}

impl<S> WsCommandSink<S> {
    #[must_use]
    pub fn new(sender: S) -> Self {
        Self {
            sender: Mutex::new(sender),
        }
    }
}

#[async_trait]
impl<S> CommandSink for WsCommandSink<S>
where
    S: Sink<Message> + Unpin + Send,
    S::Error: fmt::Display,
{
    async fn send(&self, envelope: HubEnvelope) -> Result<(), TransportError> {
        let json = serde_json::to_string(&envelope)?;
        self.sender
            .lock()
            .await
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

/// Session lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No envelope received yet.
    Unregistered,
    /// The first envelope named this id.
    Registered(ConnectionId),
    Closed,
}

/// Hub side of one agent stream.
pub struct StreamSession {
    registry: Arc<ConnectionRegistry>,
    writer: Arc<RotatingLogWriter>,
    sink: Arc<dyn CommandSink>,
    state: SessionState,
    /// False when another session already held this id at registration.
    owns_entry: bool,
}

impl StreamSession {
    #[must_use]
    pub fn new(state: &AppState, sink: Arc<dyn CommandSink>) -> Self {
        Self {
            registry: Arc::clone(&state.registry),
            writer: Arc::clone(&state.writer),
            sink,
            state: SessionState::Unregistered,
            owns_entry: false,
        }
    }

    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// Consume frames until the stream closes or fails, then unregister.
    pub async fn run<St, E>(&mut self, mut frames: St)
    where
        St: Stream<Item = Result<Message, E>> + Unpin,
        E: fmt::Display,
    {
        while let Some(frame) = frames.next().await {
            let envelope = match frame {
                Ok(Message::Text(text)) => parse_envelope(text.as_str()),
                Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                    Ok(text) => parse_envelope(text),
                    Err(_) => continue,
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(connection_id = ?self.connection_id(), "Stream receive failed: {e}");
                    break;
                }
            };
            if let Some(envelope) = envelope {
                self.handle_envelope(envelope).await;
            }
        }
        self.close().await;
    }

    /// Register on the first envelope, then log it.
    ///
    /// Once registered, records carry the session's id whatever the
    /// envelope claims.
    pub async fn handle_envelope(&mut self, envelope: AgentEnvelope) {
        if self.state == SessionState::Unregistered {
            self.register(&envelope.connection_id).await;
        }
        let connection_id = self
            .connection_id()
            .unwrap_or(&envelope.connection_id)
            .clone();
        if connection_id != envelope.connection_id {
            tracing::debug!(
                %connection_id,
                claimed = %envelope.connection_id,
                "Envelope id differs from session id"
            );
        }

        if envelope.is_direct() {
            log_command_response(&connection_id, &envelope);
        } else {
            tracing::debug!(
                %connection_id,
                source = %envelope.source,
                "Received line"
            );
        }

        let record = LogRecord::new(connection_id, &envelope);
        if let Err(e) = self.writer.append(&record).await {
            tracing::error!(connection_id = %record.connection_id, "Failed to append log record: {e}");
        }
    }

    /// Unregister and move to `Closed`. Idempotent.
    pub async fn close(&mut self) {
        let previous = std::mem::replace(&mut self.state, SessionState::Closed);
        if let SessionState::Registered(id) = previous {
            if self.owns_entry {
                self.registry.unregister(&id).await;
            }
            tracing::info!(connection_id = %id, "Agent disconnected");
        }
    }

    async fn register(&mut self, id: &ConnectionId) {
        if id.is_empty() {
            tracing::warn!("Envelope without connection id; session stays unregistered");
            return;
        }
        self.owns_entry = self.registry.register(id.clone(), Arc::clone(&self.sink)).await;
        if self.owns_entry {
            tracing::info!(connection_id = %id, "Agent connected");
        } else {
            tracing::warn!(connection_id = %id, "Connection id already registered by another session");
        }
        self.state = SessionState::Registered(id.clone());
    }

    fn connection_id(&self) -> Option<&ConnectionId> {
        match &self.state {
            SessionState::Registered(id) => Some(id),
            _ => None,
        }
    }
}

fn parse_envelope(text: &str) -> Option<AgentEnvelope> {
    match serde_json::from_str(text) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            tracing::warn!("Skipping invalid agent frame: {e}");
            None
        }
    }
}

fn log_command_response(connection_id: &ConnectionId, envelope: &AgentEnvelope) {
    match CommandResponse::from_envelope(envelope) {
        Ok(response) => match response.body() {
            ResponseBody::Output(output) => tracing::info!(
                %connection_id,
                status = ?response.status,
                bytes = output.len(),
                "Command completed"
            ),
            ResponseBody::Error(message) => tracing::info!(
                %connection_id,
                "Command failed: {message}"
            ),
        },
        Err(e) => tracing::warn!(%connection_id, "Unreadable command response: {e}"),
    }
}

/// `GET /stream`
pub async fn stream_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sender, receiver) = socket.split();
    let sink: Arc<dyn CommandSink> = Arc::new(WsCommandSink::new(sender));
    StreamSession::new(&state, sink).run(receiver).await;
}

/// `POST /uuid`: mint a connection id for a new session.
pub async fn uuid_handler() -> Json<UuidResponse> {
    let id = ConnectionId::generate();
    tracing::debug!(connection_id = %id, "Issued connection id");
    Json(UuidResponse {
        uuid: id.to_string(),
    })
}
