use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Server-assigned handle for one open slide on one connection.
///
/// Slots are a finite resource: a connection has at most 256 of them.
pub type Slot = u8;

/// Encoded size of an [`ImageDescriptor`]: 16-byte id + width + height + levels.
pub const IMAGE_DESCRIPTOR_SIZE: usize = 28;

// =============================================================================
// SlideId
// =============================================================================

/// Stable 16-byte identity of a slide.
///
/// Unlike a [`Slot`], the identity never changes for the lifetime of a slide,
/// so everything that must survive reconnects or slot reassignment is keyed
/// by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlideId(Uuid);

impl SlideId {
    /// The all-zero identity, used on the wire for "no slide".
    pub const NIL: SlideId = SlideId(Uuid::nil());

    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Generate a random identity.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for SlideId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for SlideId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for SlideId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// ImageDescriptor
// =============================================================================

/// Geometry of one slide: identity, level-0 size and pyramid depth.
///
/// Immutable once loaded; one per open slide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageDescriptor {
    /// Slide identity
    pub id: SlideId,

    /// Width of level 0 in pixels
    pub width: u32,

    /// Height of level 0 in pixels
    pub height: u32,

    /// Number of pyramid levels (level 0 = full resolution)
    pub levels: u32,
}

impl ImageDescriptor {
    pub fn new(id: SlideId, width: u32, height: u32, levels: u32) -> Self {
        Self {
            id,
            width,
            height,
            levels,
        }
    }

    /// Index of the coarsest level.
    pub fn max_level(&self) -> u32 {
        self.levels.saturating_sub(1)
    }

    /// Size of a level in pixels. Each level halves the previous one, rounding up.
    pub fn level_dimensions(&self, level: u32) -> (u32, u32) {
        let scale = 1u64 << level.min(31);
        (
            div_ceil(self.width as u64, scale) as u32,
            div_ceil(self.height as u64, scale) as u32,
        )
    }

    /// Serialize as `[id 16][width u32][height u32][levels u32]`, little-endian.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.id.as_bytes());
        buf.extend_from_slice(&self.width.to_le_bytes());
        buf.extend_from_slice(&self.height.to_le_bytes());
        buf.extend_from_slice(&self.levels.to_le_bytes());
    }

    /// Parse from exactly [`IMAGE_DESCRIPTOR_SIZE`] bytes.
    pub fn from_slice(data: &[u8]) -> Option<Self> {
        if data.len() != IMAGE_DESCRIPTOR_SIZE {
            return None;
        }
        let mut id = [0u8; 16];
        id.copy_from_slice(&data[0..16]);
        Some(Self {
            id: SlideId::from_bytes(id),
            width: u32::from_le_bytes([data[16], data[17], data[18], data[19]]),
            height: u32::from_le_bytes([data[20], data[21], data[22], data[23]]),
            levels: u32::from_le_bytes([data[24], data[25], data[26], data[27]]),
        })
    }
}

fn div_ceil(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

// =============================================================================
// Server push payloads
// =============================================================================

/// Processing progress of a slide that is still being ingested.
///
/// Ephemeral and last-value-wins per slide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub slide_id: SlideId,
    pub steps_completed: u32,
    pub steps_total: u32,
}

impl Progress {
    /// Completed fraction in `[0, 1]`; zero when the total is unknown.
    pub fn fraction(&self) -> f64 {
        if self.steps_total == 0 {
            0.0
        } else {
            (self.steps_completed as f64 / self.steps_total as f64).min(1.0)
        }
    }

    pub fn is_complete(&self) -> bool {
        self.steps_total > 0 && self.steps_completed >= self.steps_total
    }
}

/// Announcement of a slide that has just become available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlideCreated {
    pub id: SlideId,
    pub width: u32,
    pub height: u32,
    pub filename: String,
    pub size_bytes: u64,
    pub url: String,
}

/// Reason code carried by an `Error` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// The connection has no free slot for another slide
    SlotsExhausted,
    /// The server does not know the slide
    UnknownSlide,
    /// Any other failure
    Other(u8),
}

impl ErrorCode {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => ErrorCode::SlotsExhausted,
            2 => ErrorCode::UnknownSlide,
            other => ErrorCode::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            ErrorCode::SlotsExhausted => 1,
            ErrorCode::UnknownSlide => 2,
            ErrorCode::Other(value) => value,
        }
    }
}
