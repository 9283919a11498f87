//! Agent side of the hub session.
//!
//! One tailer task per watched file pushes lines to the hub; the inbound
//! loop runs hub-issued commands one at a time and answers each before
//! reading the next. Both write through a single [`EnvelopeSender`].

use std::{fmt, sync::Arc};

use fleetwatch_core::{AgentEnvelope, ConnectionId, HubEnvelope, TransportError};
use fleetwatch_executor::{CommandExecutor, CommandResponse};
use futures::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::{sync::Mutex, task::JoinSet};
use tokio_tungstenite::tungstenite::{self, Message};

use crate::tailer::LineSource;

/// Uplink failure. Every variant ends the session.
#[derive(Debug, Error)]
pub enum UplinkError {
    #[error("Hub closed the stream")]
    StreamClosed,
    #[error("Stream receive failed: {0}")]
    Transport(#[from] tungstenite::Error),
    #[error("Failed to send command response: {0}")]
    ResponseSend(#[source] TransportError),
    #[error("Failed to encode command response: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Serialises outbound envelopes onto the shared write half.
pub struct EnvelopeSender<S> {
    sink: Mutex<S>,
}

impl<S> EnvelopeSender<S>
where
    S: Sink<Message> + Unpin + Send,
    S::Error: fmt::Display,
{
    #[must_use]
    pub fn new(sink: S) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }

    /// Send one envelope as a JSON text frame.
    ///
    /// # Errors
    /// Returns error if encoding or the underlying write fails.
    pub async fn send(&self, envelope: &AgentEnvelope) -> Result<(), TransportError> {
        let json = serde_json::to_string(envelope)?;
        self.sink
            .lock()
            .await
            .send(Message::text(json))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

/// A watched file: the path used as the envelope source, and its lines.
pub struct WatchedFile {
    pub source: String,
    pub lines: Box<dyn LineSource>,
}

impl WatchedFile {
    #[must_use]
    pub fn new(source: impl Into<String>, lines: Box<dyn LineSource>) -> Self {
        Self {
            source: source.into(),
            lines,
        }
    }
}

/// One agent session.
pub struct Uplink {
    connection_id: ConnectionId,
    executor: CommandExecutor,
}

impl Uplink {
    #[must_use]
    pub const fn new(connection_id: ConnectionId, executor: CommandExecutor) -> Self {
        Self {
            connection_id,
            executor,
        }
    }

    /// Start one tailer per file, then serve commands until the stream ends.
    ///
    /// Tailers are stopped when this returns.
    ///
    /// # Errors
    /// Always returns an error describing why the session ended: the hub
    /// closed the stream, a receive failed, or a command response could not
    /// be sent.
    pub async fn run<Si, St>(
        &self,
        sink: Si,
        mut inbound: St,
        files: Vec<WatchedFile>,
    ) -> Result<(), UplinkError>
    where
        Si: Sink<Message> + Unpin + Send + 'static,
        Si::Error: fmt::Display,
        St: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    {
        let sender = Arc::new(EnvelopeSender::new(sink));

        let mut tailers = JoinSet::new();
        for file in files {
            tailers.spawn(tail(
                file,
                self.connection_id.clone(),
                Arc::clone(&sender),
            ));
        }

        let result = self.serve_commands(&mut inbound, &sender).await;
        tailers.shutdown().await;
        result
    }

    async fn serve_commands<Si, St>(
        &self,
        inbound: &mut St,
        sender: &EnvelopeSender<Si>,
    ) -> Result<(), UplinkError>
    where
        Si: Sink<Message> + Unpin + Send,
        Si::Error: fmt::Display,
        St: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    {
        while let Some(frame) = inbound.next().await {
            let text = match frame? {
                Message::Text(text) => text,
                Message::Close(_) => return Err(UplinkError::StreamClosed),
                _ => continue,
            };
            let command: HubEnvelope = match serde_json::from_str(text.as_str()) {
                Ok(command) => command,
                Err(e) => {
                    tracing::warn!("Skipping invalid hub frame: {e}");
                    continue;
                }
            };

            tracing::info!(command = %command.payload, "Executing command");
            let result = self.executor.execute(&command.payload).await;
            if let Err(failure) = &result {
                tracing::warn!(command = %command.payload, "Command failed: {failure}");
            }

            let envelope =
                CommandResponse::from_result(self.connection_id.clone(), &result).into_envelope()?;
            sender
                .send(&envelope)
                .await
                .map_err(UplinkError::ResponseSend)?;
        }
        Err(UplinkError::StreamClosed)
    }
}

async fn tail<S>(mut file: WatchedFile, connection_id: ConnectionId, sender: Arc<EnvelopeSender<S>>)
where
    S: Sink<Message> + Unpin + Send,
    S::Error: fmt::Display,
{
    loop {
        match file.lines.next_line().await {
            Ok(Some(line)) => {
                let envelope = AgentEnvelope::line(connection_id.clone(), file.source.as_str(), line);
                if let Err(e) = sender.send(&envelope).await {
                    tracing::warn!(source = %file.source, "Stopping tailer, send failed: {e}");
                    return;
                }
            }
            Ok(None) => {
                tracing::info!(source = %file.source, "Source finished");
                return;
            }
            Err(e) => {
                tracing::warn!(source = %file.source, "Stopping tailer, read failed: {e}");
                return;
            }
        }
    }
}
