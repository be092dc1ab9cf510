//! Tile Cache.
//!
//! Decoded tile bitmaps keyed by slide, level and grid cell. The cache sits
//! between the network and the renderer:
//!
//! ```text
//! ┌──────────────────────┐
//! │   Tile frame bytes   │
//! └──────────┬───────────┘
//!            │  TileDecoder (blocking pool)
//!            ▼
//! ┌──────────────────────┐      peek()      ┌───────────────┐
//! │      TileCache       │ ◀─────────────── │   Scheduler   │
//! │  (LRU, count-bound)  │                  └───────────────┘
//! │                      │      get()       ┌───────────────┐
//! │                      │ ◀─────────────── │   Renderer    │
//! └──────────────────────┘                  └───────────────┘
//! ```
//!
//! Tiles are immutable once received. The cache is cleared whenever the
//! active slide changes.

mod cache;
mod decoder;

pub use cache::{TileCache, DEFAULT_MAX_CACHED_TILES};
pub use decoder::TileDecoder;

use std::fmt;

use image::RgbaImage;

use crate::protocol::SlideId;

/// Address of one tile: one grid cell of one pyramid level of one slide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    /// Slide identity (stable across slot changes)
    pub slide: SlideId,

    /// Pyramid level (0 = full resolution)
    pub level: u32,

    /// Tile column (0-indexed from left)
    pub column: u32,

    /// Tile row (0-indexed from top)
    pub row: u32,
}

impl TileKey {
    pub fn new(slide: SlideId, level: u32, column: u32, row: u32) -> Self {
        Self {
            slide,
            level,
            column,
            row,
        }
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}_{}",
            self.slide, self.level, self.column, self.row
        )
    }
}

/// A decoded tile.
#[derive(Debug, Clone)]
pub struct TileRecord {
    pub key: TileKey,

    /// Decoded pixels
    pub bitmap: RgbaImage,

    /// Approximate memory footprint of `bitmap`
    pub size_bytes: usize,
}

impl TileRecord {
    pub fn new(key: TileKey, bitmap: RgbaImage) -> Self {
        let size_bytes = bitmap.as_raw().len();
        Self {
            key,
            bitmap,
            size_bytes,
        }
    }

    pub fn width(&self) -> u32 {
        self.bitmap.width()
    }

    pub fn height(&self) -> u32 {
        self.bitmap.height()
    }
}
