use std::time::Duration;

use thiserror::Error;

use crate::protocol::SlideId;

/// Errors raised by the transport layer.
///
/// These are recovered by the reconnect policy and only reach callers as a
/// connection state change plus a diagnostic message.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The endpoint refused the connection or the handshake failed
    #[error("Connection refused: {0}")]
    Refused(String),

    /// The handshake did not complete in time
    #[error("Connect attempt timed out after {after:?}")]
    Timeout { after: Duration },

    /// The peer closed the connection
    #[error("Connection closed by peer")]
    Closed,

    /// A command was issued while no transport is open
    #[error("Not connected")]
    NotConnected,

    /// Read or write failure on an open transport
    #[error("Transport I/O error: {0}")]
    Io(String),
}

/// Errors raised while decoding a frame.
///
/// The offending frame is logged and dropped; the connection stays up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Zero-length frame
    #[error("Empty frame")]
    Empty,

    /// Frame was produced by an incompatible protocol revision
    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Discriminator byte does not name a known message
    #[error("Unknown message kind: {0}")]
    UnknownKind(u8),

    /// Frame ended before its fixed header was complete
    #[error("Truncated {kind} frame: need at least {expected} bytes, got {actual}")]
    Truncated {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Fixed-size frame has the wrong length
    #[error("Invalid {kind} frame length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Header was well-formed but the payload could not be interpreted
    #[error("Invalid {kind} payload: {message}")]
    InvalidPayload { kind: &'static str, message: String },
}

/// Errors raised while decoding tile bytes into a bitmap.
///
/// A failed tile is treated as absent and is never re-requested.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// Tile frame carried no image bytes
    #[error("Tile payload is empty")]
    Empty,

    /// The image codec rejected the bytes
    #[error("Failed to decode tile image: {0}")]
    Image(String),

    /// The blocking decode task panicked or was cancelled
    #[error("Decode task failed: {0}")]
    Join(String),
}

/// Errors surfaced by the session registry.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// Every slot of the connection is in use
    #[error("No free slide slots (capacity {capacity})")]
    Exhausted { capacity: usize },

    /// No session is tracked for this slide
    #[error("Slide {0} is not open")]
    NotOpen(SlideId),

    /// The server refused to open the slide
    #[error("Server rejected slide {id}: {message}")]
    Rejected { id: SlideId, message: String },

    /// The command could not be sent
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Errors returned by [`crate::viewer::ViewerHandle`].
#[derive(Debug, Clone, Error)]
pub enum ViewerError {
    /// The viewer event loop is no longer running
    #[error("Viewer event loop has stopped")]
    Stopped,

    /// Session-level failure
    #[error(transparent)]
    Session(#[from] SessionError),
}
