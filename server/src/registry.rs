//! Connection membership and fan-out for the relay server
//!
//! This module tracks every open websocket channel and delivers payloads to
//! them:
//! - Connection lifecycle (register on open, unregister on close)
//! - Capacity enforcement
//! - Broadcast to everyone, or to everyone except the sender
//!
//! Each connection owns a bounded outbound queue drained by its own writer
//! task. Delivery never waits: a connection whose queue is closed or full is
//! skipped for that payload, so one slow peer cannot stall the others.

use log::{debug, info};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_tungstenite::tungstenite::Message;

pub type ConnectionId = u64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectionWriteError {
    #[error("connection {0} outbound queue is full")]
    QueueFull(ConnectionId),

    #[error("connection {0} is closed")]
    Closed(ConnectionId),
}

/// One open client channel
#[derive(Debug)]
pub struct Connection {
    /// Server-assigned identifier, unique for the lifetime of the process
    pub id: ConnectionId,
    /// Peer address, for logging only
    pub addr: SocketAddr,
    /// When the channel was registered
    pub connected_at: Instant,
    outbound: mpsc::Sender<Message>,
}

impl Connection {
    pub fn new(id: ConnectionId, addr: SocketAddr, outbound: mpsc::Sender<Message>) -> Self {
        Self {
            id,
            addr,
            connected_at: Instant::now(),
            outbound,
        }
    }

    /// A connection is ready while its writer task is still draining the queue
    pub fn is_ready(&self) -> bool {
        !self.outbound.is_closed()
    }

    /// Queues a payload without waiting
    pub fn send(&self, message: Message) -> Result<(), ConnectionWriteError> {
        self.outbound.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => ConnectionWriteError::QueueFull(self.id),
            TrySendError::Closed(_) => ConnectionWriteError::Closed(self.id),
        })
    }
}

/// Tracks all currently open client channels
///
/// Membership is exactly the set of channels that have been registered and
/// not yet unregistered. Ids are never reused.
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
    next_connection_id: ConnectionId,
    max_connections: usize,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: HashMap::new(),
            next_connection_id: 1,
            max_connections,
        }
    }

    /// Adds a connection and returns its id, or None when at capacity
    pub fn register(
        &mut self,
        addr: SocketAddr,
        outbound: mpsc::Sender<Message>,
    ) -> Option<ConnectionId> {
        if self.connections.len() >= self.max_connections {
            return None;
        }

        let id = self.next_connection_id;
        self.next_connection_id += 1;

        info!("Connection {} opened from {}", id, addr);
        self.connections
            .insert(id, Connection::new(id, addr, outbound));

        Some(id)
    }

    /// Removes a connection. Returns false if it was already gone.
    ///
    /// Dropping the connection drops its outbound sender, which ends the
    /// writer task and closes the socket.
    pub fn unregister(&mut self, id: &ConnectionId) -> bool {
        if let Some(connection) = self.connections.remove(id) {
            info!(
                "Connection {} from {} closed after {:?}",
                connection.id,
                connection.addr,
                connection.connected_at.elapsed()
            );
            true
        } else {
            false
        }
    }

    /// Sends a payload to a single connection
    pub fn send_to(&self, id: ConnectionId, message: Message) -> Result<(), ConnectionWriteError> {
        match self.connections.get(&id) {
            Some(connection) => connection.send(message),
            None => Err(ConnectionWriteError::Closed(id)),
        }
    }

    /// Delivers a payload to every ready connection.
    /// Returns how many connections accepted it.
    pub fn broadcast_all(&self, message: &Message) -> usize {
        self.fan_out(message, None)
    }

    /// Delivers a payload to every ready connection other than `sender`.
    /// Returns how many connections accepted it.
    pub fn broadcast_except(&self, sender: ConnectionId, message: &Message) -> usize {
        self.fan_out(message, Some(sender))
    }

    fn fan_out(&self, message: &Message, exclude: Option<ConnectionId>) -> usize {
        let mut delivered = 0;

        for (id, connection) in &self.connections {
            if Some(*id) == exclude || !connection.is_ready() {
                continue;
            }

            match connection.send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => debug!("Skipping delivery: {}", e),
            }
        }

        delivered
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Returns the number of currently registered connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
