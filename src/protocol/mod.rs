//! Wire protocol between the client and the tile server.
//!
//! The client sends small commands that describe what it wants to see; the
//! server pushes tiles and notifications as they become available:
//!
//! ```text
//!   client                                server
//!     │ ── Open(dpi, descriptor) ────────▶ │
//!     │ ◀──────── OpenResponse(slot, id) ── │
//!     │ ── UpdateViewport(slot, region) ─▶ │
//!     │ ◀──── Tile(slot, col, row, level) ─ │  (many)
//!     │ ◀──── Progress / SlideCreated ───── │  (any time)
//!     │ ◀──── SlotReassigned(id, old, new)  │  (any time)
//!     │ ── Close(slot) ──────────────────▶ │
//! ```
//!
//! Slots are connection-local and may change; [`SlideId`]s are stable.

mod codec;
mod types;

pub use codec::{Command, Frame, MessageKind, HEADER_SIZE, PROTOCOL_VERSION};
pub use types::{
    ErrorCode, ImageDescriptor, Progress, SlideCreated, SlideId, Slot, IMAGE_DESCRIPTOR_SIZE,
};
