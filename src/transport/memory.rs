//! In-process transport.
//!
//! [`memory_channel`] returns a connector and the server end that accepts
//! its connections. Frames travel over unbounded channels, so ordering is
//! exactly send order. The server end can refuse or stall handshakes to
//! drive the reconnect path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{ProtocolError, TransportError};
use crate::protocol::{Command, Frame};

use super::{Connector, Transport};

/// Create a connected connector/server pair.
pub fn memory_channel() -> (MemoryConnector, MemoryServer) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    let behaviour = Arc::new(Behaviour::default());
    (
        MemoryConnector {
            accept_tx,
            behaviour: behaviour.clone(),
        },
        MemoryServer {
            accept_rx,
            behaviour,
        },
    )
}

#[derive(Default)]
struct Behaviour {
    refuse: AtomicUsize,
    stall: AtomicUsize,
    attempts: AtomicUsize,
}

/// Take one unit from a countdown, returning whether one was available.
fn take(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

// =============================================================================
// Client side
// =============================================================================

/// Connector whose transports end in a [`MemoryServer`].
#[derive(Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<ServerConnection>,
    behaviour: Arc<Behaviour>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Transport>, TransportError> {
        self.behaviour.attempts.fetch_add(1, Ordering::SeqCst);

        if take(&self.behaviour.refuse) {
            return Err(TransportError::Refused(format!("{} refused", endpoint)));
        }
        if take(&self.behaviour.stall) {
            std::future::pending::<()>().await;
        }

        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();

        self.accept_tx
            .send(ServerConnection {
                tx: Some(to_client),
                rx: from_client,
            })
            .map_err(|_| TransportError::Refused(format!("{} is not listening", endpoint)))?;

        Ok(Box::new(MemoryTransport {
            tx: Some(to_server),
            rx: from_server,
        }))
    }
}

struct MemoryTransport {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame).map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<Bytes, TransportError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.tx = None;
        self.rx.close();
    }
}

// =============================================================================
// Server side
// =============================================================================

/// Accepting end of a [`memory_channel`].
pub struct MemoryServer {
    accept_rx: mpsc::UnboundedReceiver<ServerConnection>,
    behaviour: Arc<Behaviour>,
}

impl MemoryServer {
    /// Wait for the next client connection.
    pub async fn accept(&mut self) -> Option<ServerConnection> {
        self.accept_rx.recv().await
    }

    /// Refuse the next `n` connect attempts.
    pub fn refuse_next(&self, n: usize) {
        self.behaviour.refuse.store(n, Ordering::SeqCst);
    }

    /// Never complete the handshake of the next `n` connect attempts.
    pub fn stall_next(&self, n: usize) {
        self.behaviour.stall.store(n, Ordering::SeqCst);
    }

    /// Total connect attempts seen so far, including refused ones.
    pub fn attempts(&self) -> usize {
        self.behaviour.attempts.load(Ordering::SeqCst)
    }
}

/// Server end of one accepted connection.
///
/// Dropping it (or calling [`ServerConnection::close`]) looks like a lost
/// connection to the client.
pub struct ServerConnection {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl ServerConnection {
    /// Push a frame to the client.
    pub fn send_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        let bytes = frame
            .encode()
            .map_err(|e| TransportError::Io(e.to_string()))?;
        self.send_raw(bytes)
    }

    /// Push raw bytes to the client, bypassing the encoder.
    pub fn send_raw(&self, bytes: Bytes) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(bytes).map_err(|_| TransportError::Closed)
    }

    /// Wait for the next command from the client.
    ///
    /// Returns `None` once the client has closed the connection.
    pub async fn recv_command(&mut self) -> Option<Result<Command, ProtocolError>> {
        let bytes = self.rx.recv().await?;
        trace!(len = bytes.len(), "Server received frame");
        Some(Command::decode(&bytes))
    }

    /// Return a command if one is already queued.
    pub fn try_recv_command(&mut self) -> Option<Result<Command, ProtocolError>> {
        self.rx.try_recv().ok().map(|bytes| Command::decode(&bytes))
    }

    /// Drop the connection.
    pub fn close(&mut self) {
        self.tx = None;
        self.rx.close();
    }
}
