use crate::connection::ConnectionState;
use crate::error::{DecodeError, ProtocolError, SessionError};
use crate::protocol::{Progress, SlideCreated, SlideId, Slot};
use crate::tile::TileKey;

/// Notifications broadcast by the viewer event loop.
///
/// Slow subscribers may lag and miss events; the [`StoreSnapshot`] is the
/// authoritative state.
///
/// [`StoreSnapshot`]: super::StoreSnapshot
#[derive(Debug, Clone)]
pub enum ViewerEvent {
    ConnectionChanged {
        state: ConnectionState,
        diagnostic: Option<String>,
    },
    SessionOpened {
        id: SlideId,
        slot: Slot,
    },
    SessionClosed {
        id: SlideId,
        slot: Option<Slot>,
    },
    /// The server refused a pending session and it was dropped
    SessionFailed {
        id: SlideId,
        error: SessionError,
    },
    SlotReassigned {
        id: SlideId,
        old_slot: Slot,
        new_slot: Slot,
    },
    TileReady(TileKey),
    TileDecodeFailed {
        key: TileKey,
        error: DecodeError,
    },
    Progress(Progress),
    SlideCreated(SlideCreated),
    RateLimited,
    /// Diagnostic from a failed or lost transport
    TransportError(String),
    /// A frame was dropped as malformed
    ProtocolError(ProtocolError),
    /// Something visible changed; redraw with a fresh frame
    RenderRequested {
        generation: u64,
    },
}
