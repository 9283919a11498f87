//! Connection registry: the hub's table of live agent sessions.
//!
//! Shared by every session handler and by the control plane. Callers never
//! see the underlying map; the lock is never held across a send.

use std::{collections::HashMap, fmt, sync::Arc};

use futures::future;
use tokio::sync::RwLock;

use crate::{
    protocol::{ConnectionId, HubEnvelope},
    traits::{CommandSink, RegistryError},
};

/// One registered session.
#[derive(Clone)]
pub struct ConnectionEntry {
    pub connection_id: ConnectionId,
    pub handle: Arc<dyn CommandSink>,
    /// False once a send to this session has failed.
    pub active: bool,
}

impl fmt::Debug for ConnectionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionEntry")
            .field("connection_id", &self.connection_id)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

/// Outcome of a broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Concurrent table of live sessions.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: RwLock<HashMap<ConnectionId, ConnectionEntry>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an active entry for `id`.
    ///
    /// Returns false, leaving the existing entry untouched, if `id` is
    /// already registered.
    pub async fn register(&self, id: ConnectionId, handle: Arc<dyn CommandSink>) -> bool {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&id) {
            tracing::debug!(connection_id = %id, "Duplicate registration ignored");
            return false;
        }
        entries.insert(
            id.clone(),
            ConnectionEntry {
                connection_id: id,
                handle,
                active: true,
            },
        );
        true
    }

    /// Look up an entry.
    ///
    /// # Errors
    /// Returns `RegistryError::NotFound` if `id` is not registered.
    pub async fn lookup(&self, id: &ConnectionId) -> Result<ConnectionEntry, RegistryError> {
        self.entries
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.clone()))
    }

    /// Mark an entry inactive without removing it.
    ///
    /// Returns false if `id` is not registered.
    pub async fn deactivate(&self, id: &ConnectionId) -> bool {
        match self.entries.write().await.get_mut(id) {
            Some(entry) => {
                entry.active = false;
                true
            }
            None => false,
        }
    }

    /// Remove an entry. Returns whether it existed.
    pub async fn unregister(&self, id: &ConnectionId) -> bool {
        self.entries.write().await.remove(id).is_some()
    }

    /// Ids of all active entries, in no particular order.
    pub async fn list_active(&self) -> Vec<ConnectionId> {
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| entry.active)
            .map(|entry| entry.connection_id.clone())
            .collect()
    }

    /// Number of registered entries, active or not.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether no entries are registered.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Send a command to one session.
    ///
    /// A failed send deactivates the entry.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown id and `SendFailed` if the
    /// transport rejects the envelope.
    pub async fn send_to(
        &self,
        id: &ConnectionId,
        payload: impl Into<String>,
    ) -> Result<(), RegistryError> {
        let handle = self.lookup(id).await?.handle;

        if let Err(source) = handle.send(HubEnvelope::new(payload)).await {
            tracing::warn!(connection_id = %id, error = %source, "Send failed, deactivating connection");
            self.deactivate_handle(id, &handle).await;
            return Err(RegistryError::SendFailed {
                id: id.clone(),
                source,
            });
        }
        Ok(())
    }

    /// Best-effort fan-out to every active entry except `exclude`.
    ///
    /// Each failed recipient is deactivated; the others still receive the
    /// envelope.
    pub async fn broadcast(
        &self,
        payload: impl Into<String>,
        exclude: Option<&ConnectionId>,
    ) -> BroadcastReport {
        let envelope = HubEnvelope::new(payload);

        let targets: Vec<(ConnectionId, Arc<dyn CommandSink>)> = {
            let entries = self.entries.read().await;
            entries
                .values()
                .filter(|entry| entry.active && Some(&entry.connection_id) != exclude)
                .map(|entry| (entry.connection_id.clone(), Arc::clone(&entry.handle)))
                .collect()
        };

        let results = future::join_all(targets.into_iter().map(|(id, handle)| {
            let envelope = envelope.clone();
            async move {
                let result = handle.send(envelope).await;
                (id, handle, result)
            }
        }))
        .await;

        let mut report = BroadcastReport::default();
        for (id, handle, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(connection_id = %id, error = %e, "Broadcast send failed, deactivating connection");
                    self.deactivate_handle(&id, &handle).await;
                    report.failed += 1;
                }
            }
        }

        tracing::debug!(
            delivered = report.delivered,
            failed = report.failed,
            "Broadcast complete"
        );
        report
    }

    /// Deactivate `id` only if it is still bound to `handle`.
    ///
    /// The session may have been replaced while the send was in flight.
    async fn deactivate_handle(&self, id: &ConnectionId, handle: &Arc<dyn CommandSink>) {
        if let Some(entry) = self.entries.write().await.get_mut(id) {
            if Arc::ptr_eq(&entry.handle, handle) {
                entry.active = false;
            } else {
                tracing::debug!(connection_id = %id, "Connection re-registered during send, keeping it active");
            }
        }
    }
}
