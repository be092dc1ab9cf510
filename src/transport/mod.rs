//! Message-oriented transports.
//!
//! A [`Transport`] is one open, bidirectional connection carrying binary
//! frames. A [`Connector`] opens transports to an endpoint. The connection
//! manager only sees these two traits, so the WebSocket implementation can
//! be swapped for the in-process one in tests:
//!
//! ```text
//!  ConnectionManager ──connect(endpoint)──▶ Connector
//!          │                                   │
//!          │◀────────── Box<dyn Transport> ────┘
//!          │
//!          ├── send(frame) ──▶ wire
//!          └── recv()      ◀── wire
//! ```

mod memory;
mod websocket;

pub use memory::{memory_channel, MemoryConnector, MemoryServer, ServerConnection};
pub use websocket::{WsConnector, PROTOCOL_HEADER};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportError;

/// One open connection carrying binary frames.
///
/// `recv` must be cancel-safe: the I/O task polls it inside `select!`
/// alongside the outbound queue.
#[async_trait]
pub trait Transport: Send {
    /// Send one binary frame.
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError>;

    /// Receive the next binary frame.
    ///
    /// Returns `None` once the peer has closed the connection.
    async fn recv(&mut self) -> Option<Result<Bytes, TransportError>>;

    /// Close the connection. Further sends fail with [`TransportError::Closed`].
    async fn close(&mut self);
}

/// Opens transports to an endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a connection and complete the handshake.
    ///
    /// The caller bounds this with its own timeout.
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Transport>, TransportError>;
}
