//! Tile decoder.
//!
//! Tile frames carry an encoded image (JPEG in practice, PNG accepted).
//! Decoding is CPU-bound, so the async entry point moves it onto the
//! blocking pool and the event loop never stalls on it.

use std::io::Cursor;

use bytes::Bytes;
use image::ImageReader;

use crate::error::DecodeError;

use super::{TileKey, TileRecord};

/// Decodes tile payloads into RGBA bitmaps.
#[derive(Debug, Clone, Default)]
pub struct TileDecoder {
    // Stateless for now
}

impl TileDecoder {
    pub fn new() -> Self {
        Self {}
    }

    /// Decode on the current thread.
    ///
    /// The format is sniffed from the payload.
    pub fn decode(&self, key: TileKey, data: &[u8]) -> Result<TileRecord, DecodeError> {
        if data.is_empty() {
            return Err(DecodeError::Empty);
        }

        let reader = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| DecodeError::Image(e.to_string()))?;

        let img = reader
            .decode()
            .map_err(|e| DecodeError::Image(e.to_string()))?;

        Ok(TileRecord::new(key, img.to_rgba8()))
    }

    /// Decode on the blocking pool.
    pub async fn decode_async(&self, key: TileKey, data: Bytes) -> Result<TileRecord, DecodeError> {
        let decoder = self.clone();
        tokio::task::spawn_blocking(move || decoder.decode(key, &data))
            .await
            .map_err(|e| DecodeError::Join(e.to_string()))?
    }
}
