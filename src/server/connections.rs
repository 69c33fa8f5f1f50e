//! Connection handles and the per-principal registry

use crate::server::protocol::ServerMessage;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

/// A serialized frame queued for one client
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub payload: String,
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("connection closed")]
    Closed,

    #[error("outbound buffer full")]
    Full,

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl<T> From<mpsc::error::TrySendError<T>> for SendError {
    fn from(e: mpsc::error::TrySendError<T>) -> Self {
        match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        }
    }
}

/// Sending side of one live connection.
///
/// Clones share the same outbound queue and close signal.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    principal_id: i64,
    conn_id: Uuid,
    opened_at: DateTime<Utc>,
    tx: mpsc::Sender<OutboundMessage>,
    close: Arc<Notify>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its writer task drains
    pub fn new(principal_id: i64, buffer: usize) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));

        let handle = Self {
            principal_id,
            conn_id: Uuid::new_v4(),
            opened_at: Utc::now(),
            tx,
            close: Arc::new(Notify::new()),
        };

        (handle, rx)
    }

    pub fn principal_id(&self) -> i64 {
        self.principal_id
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Whether both handles refer to the same physical connection
    pub fn same_connection(&self, other: &ConnectionHandle) -> bool {
        self.conn_id == other.conn_id
    }

    /// Queue a frame without waiting. Fails if the queue is full or the
    /// writer has gone away.
    pub fn try_send(&self, msg: &ServerMessage) -> Result<(), SendError> {
        let payload = serde_json::to_string(msg)?;
        self.tx.try_send(OutboundMessage { payload })?;
        Ok(())
    }

    /// Queue a frame, waiting for room in the queue
    pub async fn send(&self, msg: &ServerMessage) -> Result<(), SendError> {
        let payload = serde_json::to_string(msg)?;
        self.tx
            .send(OutboundMessage { payload })
            .await
            .map_err(|_| SendError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Ask the connection's session loop to shut down
    pub fn close(&self) {
        self.close.notify_one();
    }

    /// Resolves once [`close`](Self::close) has been called
    pub async fn closed(&self) {
        self.close.notified().await;
    }
}

/// Principal id to live connection; at most one entry per principal
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<i64, ConnectionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for the handle's principal.
    ///
    /// Returns the handle it replaced. Closing it is the caller's business.
    pub fn register(&mut self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        self.connections.insert(handle.principal_id, handle)
    }

    pub fn unregister(&mut self, principal_id: i64) -> Option<ConnectionHandle> {
        self.connections.remove(&principal_id)
    }

    pub fn get(&self, principal_id: i64) -> Option<&ConnectionHandle> {
        self.connections.get(&principal_id)
    }

    pub fn contains(&self, principal_id: i64) -> bool {
        self.connections.contains_key(&principal_id)
    }

    /// Whether `handle` is still the registered connection for its principal
    pub fn is_current(&self, handle: &ConnectionHandle) -> bool {
        self.connections
            .get(&handle.principal_id)
            .is_some_and(|current| current.same_connection(handle))
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
