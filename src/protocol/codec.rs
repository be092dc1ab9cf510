//! Binary framing for commands and frames.
//!
//! # Frame Structure
//!
//! ```text
//! Byte 0:    Protocol version (currently 1)
//! Byte 1:    Message kind
//! Bytes 2..: Kind-specific payload, integers little-endian
//! ```
//!
//! Both directions are implemented so that in-process peers and tests can
//! play the server side of the conversation.

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::viewport::{ProtocolViewport, PROTOCOL_VIEWPORT_SIZE};

use super::types::{
    ErrorCode, ImageDescriptor, Progress, SlideCreated, SlideId, Slot, IMAGE_DESCRIPTOR_SIZE,
};

// =============================================================================
// Constants
// =============================================================================

/// Protocol revision written into every frame.
pub const PROTOCOL_VERSION: u8 = 1;

/// Version byte + kind byte.
pub const HEADER_SIZE: usize = 2;

/// Open payload: dpi + image descriptor.
const OPEN_SIZE: usize = 4 + IMAGE_DESCRIPTOR_SIZE;

/// UpdateViewport payload: slot + viewport.
const UPDATE_VIEWPORT_SIZE: usize = 1 + PROTOCOL_VIEWPORT_SIZE;

/// Tile coordinates: slot + column + row + level.
const TILE_HEADER_SIZE: usize = 13;

/// OpenResponse payload: slot + id.
const OPEN_RESPONSE_SIZE: usize = 17;

/// Progress payload: id + completed + total.
const PROGRESS_SIZE: usize = 24;

/// SlotReassigned payload: id + old slot + new slot.
const SLOT_REASSIGNED_SIZE: usize = 18;

/// Error frame fixed part: code + id.
const ERROR_HEADER_SIZE: usize = 17;

// =============================================================================
// MessageKind
// =============================================================================

/// Discriminator byte shared by both directions.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    UpdateViewport = 0,
    Open = 1,
    Close = 2,
    ClearCache = 3,
    Progress = 4,
    RequestTile = 5,
    RateLimited = 6,
    SlideCreated = 7,
    Tile = 8,
    SlotReassigned = 9,
    Error = 10,
}

impl MessageKind {
    pub fn name(self) -> &'static str {
        match self {
            MessageKind::UpdateViewport => "UpdateViewport",
            MessageKind::Open => "Open",
            MessageKind::Close => "Close",
            MessageKind::ClearCache => "ClearCache",
            MessageKind::Progress => "Progress",
            MessageKind::RequestTile => "RequestTile",
            MessageKind::RateLimited => "RateLimited",
            MessageKind::SlideCreated => "SlideCreated",
            MessageKind::Tile => "Tile",
            MessageKind::SlotReassigned => "SlotReassigned",
            MessageKind::Error => "Error",
        }
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(MessageKind::UpdateViewport),
            1 => Ok(MessageKind::Open),
            2 => Ok(MessageKind::Close),
            3 => Ok(MessageKind::ClearCache),
            4 => Ok(MessageKind::Progress),
            5 => Ok(MessageKind::RequestTile),
            6 => Ok(MessageKind::RateLimited),
            7 => Ok(MessageKind::SlideCreated),
            8 => Ok(MessageKind::Tile),
            9 => Ok(MessageKind::SlotReassigned),
            10 => Ok(MessageKind::Error),
            other => Err(ProtocolError::UnknownKind(other)),
        }
    }
}

// =============================================================================
// Builder / Reader helpers
// =============================================================================

struct FrameBuilder {
    buf: Vec<u8>,
}

impl FrameBuilder {
    fn new(kind: MessageKind, payload_capacity: usize) -> Self {
        let mut buf = Vec::with_capacity(HEADER_SIZE + payload_capacity);
        buf.push(PROTOCOL_VERSION);
        buf.push(kind as u8);
        Self { buf }
    }

    fn u8(mut self, value: u8) -> Self {
        self.buf.push(value);
        self
    }

    fn u32(mut self, value: u32) -> Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    fn f32(mut self, value: f32) -> Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    fn bytes(mut self, value: &[u8]) -> Self {
        self.buf.extend_from_slice(value);
        self
    }

    fn with(mut self, write: impl FnOnce(&mut Vec<u8>)) -> Self {
        write(&mut self.buf);
        self
    }

    fn finish(self) -> Bytes {
        self.buf.into()
    }
}

/// Split a frame into its kind and payload after checking the version byte.
fn split_header(data: &[u8]) -> Result<(MessageKind, usize), ProtocolError> {
    match data {
        [] => Err(ProtocolError::Empty),
        [version, ..] if *version != PROTOCOL_VERSION => {
            Err(ProtocolError::UnsupportedVersion(*version))
        }
        [_] => Err(ProtocolError::Truncated {
            kind: "header",
            expected: HEADER_SIZE,
            actual: 1,
        }),
        [_, kind, ..] => Ok((MessageKind::try_from(*kind)?, HEADER_SIZE)),
    }
}

fn expect_exact(kind: MessageKind, payload: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if payload.len() != expected {
        return Err(ProtocolError::InvalidLength {
            kind: kind.name(),
            expected,
            actual: payload.len(),
        });
    }
    Ok(())
}

fn expect_at_least(
    kind: MessageKind,
    payload: &[u8],
    expected: usize,
) -> Result<(), ProtocolError> {
    if payload.len() < expected {
        return Err(ProtocolError::Truncated {
            kind: kind.name(),
            expected,
            actual: payload.len(),
        });
    }
    Ok(())
}

#[inline]
fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

#[inline]
fn read_id(bytes: &[u8], at: usize) -> SlideId {
    let mut id = [0u8; 16];
    id.copy_from_slice(&bytes[at..at + 16]);
    SlideId::from_bytes(id)
}

fn unexpected(kind: MessageKind, direction: &str) -> ProtocolError {
    ProtocolError::InvalidPayload {
        kind: kind.name(),
        message: format!("not a {} message", direction),
    }
}

// =============================================================================
// Command (client -> server)
// =============================================================================

/// Outgoing command. Fire-and-forget over the open transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Ask for a slot for this slide; answered by `OpenResponse`
    Open { dpi: f32, image: ImageDescriptor },

    /// Release a slot
    Close { slot: Slot },

    /// Replace the region of interest for a slot
    UpdateViewport {
        slot: Slot,
        viewport: ProtocolViewport,
    },

    /// Ask the server to forget which tiles it has already pushed for a slot
    ClearCache { slot: Slot },

    /// Explicitly re-request a tile that never arrived
    RequestTile {
        slot: Slot,
        column: u32,
        row: u32,
        level: u32,
    },
}

impl Command {
    pub fn kind(&self) -> MessageKind {
        match self {
            Command::Open { .. } => MessageKind::Open,
            Command::Close { .. } => MessageKind::Close,
            Command::UpdateViewport { .. } => MessageKind::UpdateViewport,
            Command::ClearCache { .. } => MessageKind::ClearCache,
            Command::RequestTile { .. } => MessageKind::RequestTile,
        }
    }

    /// Slot addressed by this command, if any.
    pub fn slot(&self) -> Option<Slot> {
        match self {
            Command::Open { .. } => None,
            Command::Close { slot }
            | Command::UpdateViewport { slot, .. }
            | Command::ClearCache { slot }
            | Command::RequestTile { slot, .. } => Some(*slot),
        }
    }

    pub fn encode(&self) -> Bytes {
        match self {
            Command::Open { dpi, image } => FrameBuilder::new(MessageKind::Open, OPEN_SIZE)
                .f32(*dpi)
                .with(|buf| image.write_to(buf))
                .finish(),
            Command::Close { slot } => FrameBuilder::new(MessageKind::Close, 1).u8(*slot).finish(),
            Command::UpdateViewport { slot, viewport } => {
                FrameBuilder::new(MessageKind::UpdateViewport, UPDATE_VIEWPORT_SIZE)
                    .u8(*slot)
                    .with(|buf| viewport.write_to(buf))
                    .finish()
            }
            Command::ClearCache { slot } => FrameBuilder::new(MessageKind::ClearCache, 1)
                .u8(*slot)
                .finish(),
            Command::RequestTile {
                slot,
                column,
                row,
                level,
            } => FrameBuilder::new(MessageKind::RequestTile, TILE_HEADER_SIZE)
                .u8(*slot)
                .u32(*column)
                .u32(*row)
                .u32(*level)
                .finish(),
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let (kind, offset) = split_header(data)?;
        let payload = &data[offset..];

        match kind {
            MessageKind::Open => {
                expect_exact(kind, payload, OPEN_SIZE)?;
                let dpi = f32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
                let image = ImageDescriptor::from_slice(&payload[4..]).ok_or(
                    ProtocolError::InvalidPayload {
                        kind: kind.name(),
                        message: "bad image descriptor".to_string(),
                    },
                )?;
                Ok(Command::Open { dpi, image })
            }
            MessageKind::Close => {
                expect_exact(kind, payload, 1)?;
                Ok(Command::Close { slot: payload[0] })
            }
            MessageKind::UpdateViewport => {
                expect_exact(kind, payload, UPDATE_VIEWPORT_SIZE)?;
                let viewport = ProtocolViewport::from_slice(&payload[1..]).ok_or(
                    ProtocolError::InvalidPayload {
                        kind: kind.name(),
                        message: "bad viewport".to_string(),
                    },
                )?;
                Ok(Command::UpdateViewport {
                    slot: payload[0],
                    viewport,
                })
            }
            MessageKind::ClearCache => {
                expect_exact(kind, payload, 1)?;
                Ok(Command::ClearCache { slot: payload[0] })
            }
            MessageKind::RequestTile => {
                expect_exact(kind, payload, TILE_HEADER_SIZE)?;
                Ok(Command::RequestTile {
                    slot: payload[0],
                    column: read_u32(payload, 1),
                    row: read_u32(payload, 5),
                    level: read_u32(payload, 9),
                })
            }
            other => Err(unexpected(other, "client")),
        }
    }
}

// =============================================================================
// Frame (server -> client)
// =============================================================================

/// Incoming frame pushed by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A slot was assigned for a previously requested `Open`
    OpenResponse { slot: Slot, id: SlideId },

    /// Encoded tile bitmap for one grid cell
    Tile {
        slot: Slot,
        column: u32,
        row: u32,
        level: u32,
        data: Bytes,
    },

    /// Ingestion progress for a slide
    Progress(Progress),

    /// The client is sending too fast
    RateLimited,

    /// A new slide became available
    SlideCreated(SlideCreated),

    /// The slide now lives on a different slot
    SlotReassigned {
        id: SlideId,
        old_slot: Slot,
        new_slot: Slot,
    },

    /// The server refused a request
    Error {
        code: ErrorCode,
        id: Option<SlideId>,
        message: String,
    },
}

impl Frame {
    pub fn kind(&self) -> MessageKind {
        match self {
            Frame::OpenResponse { .. } => MessageKind::Open,
            Frame::Tile { .. } => MessageKind::Tile,
            Frame::Progress(_) => MessageKind::Progress,
            Frame::RateLimited => MessageKind::RateLimited,
            Frame::SlideCreated(_) => MessageKind::SlideCreated,
            Frame::SlotReassigned { .. } => MessageKind::SlotReassigned,
            Frame::Error { .. } => MessageKind::Error,
        }
    }

    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let frame = match self {
            Frame::OpenResponse { slot, id } => {
                FrameBuilder::new(MessageKind::Open, OPEN_RESPONSE_SIZE)
                    .u8(*slot)
                    .bytes(id.as_bytes())
                    .finish()
            }
            Frame::Tile {
                slot,
                column,
                row,
                level,
                data,
            } => FrameBuilder::new(MessageKind::Tile, TILE_HEADER_SIZE + data.len())
                .u8(*slot)
                .u32(*column)
                .u32(*row)
                .u32(*level)
                .bytes(data)
                .finish(),
            Frame::Progress(progress) => FrameBuilder::new(MessageKind::Progress, PROGRESS_SIZE)
                .bytes(progress.slide_id.as_bytes())
                .u32(progress.steps_completed)
                .u32(progress.steps_total)
                .finish(),
            Frame::RateLimited => FrameBuilder::new(MessageKind::RateLimited, 0).finish(),
            Frame::SlideCreated(event) => {
                let json =
                    serde_json::to_vec(event).map_err(|e| ProtocolError::InvalidPayload {
                        kind: MessageKind::SlideCreated.name(),
                        message: e.to_string(),
                    })?;
                FrameBuilder::new(MessageKind::SlideCreated, json.len())
                    .bytes(&json)
                    .finish()
            }
            Frame::SlotReassigned {
                id,
                old_slot,
                new_slot,
            } => FrameBuilder::new(MessageKind::SlotReassigned, SLOT_REASSIGNED_SIZE)
                .bytes(id.as_bytes())
                .u8(*old_slot)
                .u8(*new_slot)
                .finish(),
            Frame::Error { code, id, message } => {
                FrameBuilder::new(MessageKind::Error, ERROR_HEADER_SIZE + message.len())
                    .u8(code.as_u8())
                    .bytes(id.unwrap_or(SlideId::NIL).as_bytes())
                    .bytes(message.as_bytes())
                    .finish()
            }
        };
        Ok(frame)
    }

    /// Decode a frame. Tile payloads are sliced out of `data` without copying.
    pub fn decode(data: Bytes) -> Result<Self, ProtocolError> {
        let (kind, offset) = split_header(&data)?;
        let payload = &data[offset..];

        match kind {
            MessageKind::Open => {
                expect_exact(kind, payload, OPEN_RESPONSE_SIZE)?;
                Ok(Frame::OpenResponse {
                    slot: payload[0],
                    id: read_id(payload, 1),
                })
            }
            MessageKind::Tile => {
                expect_at_least(kind, payload, TILE_HEADER_SIZE)?;
                Ok(Frame::Tile {
                    slot: payload[0],
                    column: read_u32(payload, 1),
                    row: read_u32(payload, 5),
                    level: read_u32(payload, 9),
                    data: data.slice(offset + TILE_HEADER_SIZE..),
                })
            }
            MessageKind::Progress => {
                expect_exact(kind, payload, PROGRESS_SIZE)?;
                Ok(Frame::Progress(Progress {
                    slide_id: read_id(payload, 0),
                    steps_completed: read_u32(payload, 16),
                    steps_total: read_u32(payload, 20),
                }))
            }
            MessageKind::RateLimited => {
                expect_exact(kind, payload, 0)?;
                Ok(Frame::RateLimited)
            }
            MessageKind::SlideCreated => {
                let event = serde_json::from_slice(payload).map_err(|e| {
                    ProtocolError::InvalidPayload {
                        kind: kind.name(),
                        message: e.to_string(),
                    }
                })?;
                Ok(Frame::SlideCreated(event))
            }
            MessageKind::SlotReassigned => {
                expect_exact(kind, payload, SLOT_REASSIGNED_SIZE)?;
                Ok(Frame::SlotReassigned {
                    id: read_id(payload, 0),
                    old_slot: payload[16],
                    new_slot: payload[17],
                })
            }
            MessageKind::Error => {
                expect_at_least(kind, payload, ERROR_HEADER_SIZE)?;
                let id = read_id(payload, 1);
                let message = std::str::from_utf8(&payload[ERROR_HEADER_SIZE..])
                    .map_err(|e| ProtocolError::InvalidPayload {
                        kind: kind.name(),
                        message: e.to_string(),
                    })?
                    .to_string();
                Ok(Frame::Error {
                    code: ErrorCode::from_u8(payload[0]),
                    id: (!id.is_nil()).then_some(id),
                    message,
                })
            }
            other => Err(unexpected(other, "server")),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
