//! Connection Manager.
//!
//! Owns the one transport of a viewer and keeps it alive:
//!
//! - drives the four-state lifecycle with exponential retry,
//! - moves outbound commands onto the wire through an I/O task,
//! - decodes inbound frames and hands them back to the event loop,
//! - re-issues `Open` for every tracked session after a reconnect.
//!
//! The manager itself is not shared. The event loop owns it and feeds it the
//! [`ConnectionEvent`]s produced by its background tasks; every event is
//! tagged with the attempt that produced it so late events from a dead
//! transport are ignored.

mod manager;
mod state;

pub use manager::{ConnectionEvent, ConnectionManager, ConnectionUpdate, StateChange};
pub use state::{
    ConnectionState, ReconnectPolicy, DEFAULT_CONNECT_TIMEOUT, DEFAULT_RECONNECT_BASE_DELAY,
    DEFAULT_RECONNECT_MAX_DELAY,
};

use crate::error::TransportError;
use crate::protocol::Command;

/// Destination for outgoing commands.
///
/// `send` fails with [`TransportError::NotConnected`] when no transport is
/// open; the command is not queued.
pub trait CommandSink {
    fn send(&mut self, command: Command) -> Result<(), TransportError>;
}

/// Records commands; always "connected".
impl CommandSink for Vec<Command> {
    fn send(&mut self, command: Command) -> Result<(), TransportError> {
        self.push(command);
        Ok(())
    }
}
