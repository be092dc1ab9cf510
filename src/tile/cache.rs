//! Bounded cache of decoded tiles.
//!
//! # Recency
//!
//! Two kinds of lookups exist on purpose:
//!
//! - [`TileCache::get`] is the render path. It marks the tile as recently used.
//! - [`TileCache::peek`] / [`TileCache::contains`] are for scheduling. They
//!   leave the LRU order alone, so a tile that is visible but not drawn yet
//!   is not kept alive by planning alone.
//!
//! # Eviction
//!
//! The cache is bounded by tile count. Inserting into a full cache evicts
//! the least-recently-used record first. Approximate memory use (decoded
//! RGBA bytes) is tracked for reporting.

use std::num::NonZeroUsize;
use std::sync::Arc;

use bytes::Bytes;
use lru::LruCache;
use tracing::trace;

use crate::error::DecodeError;

use super::{TileDecoder, TileKey, TileRecord};

/// Default maximum number of decoded tiles.
pub const DEFAULT_MAX_CACHED_TILES: usize = 512;

/// LRU cache of decoded tiles, bounded by tile count.
///
/// Owned by a single writer (the viewer event loop). Records are handed out
/// as `Arc`s, so a frame being drawn keeps its tiles even if they are
/// evicted meanwhile.
pub struct TileCache {
    /// The underlying LRU cache
    cache: LruCache<TileKey, Arc<TileRecord>>,

    /// Sum of `size_bytes` over all cached records
    memory_bytes: usize,

    decoder: TileDecoder,
}

impl TileCache {
    /// Create a cache holding at most `max_tiles` tiles (at least one).
    pub fn new(max_tiles: usize) -> Self {
        Self {
            cache: LruCache::new(NonZeroUsize::new(max_tiles).unwrap_or(NonZeroUsize::MIN)),
            memory_bytes: 0,
            decoder: TileDecoder::new(),
        }
    }

    /// Look up a tile for drawing. Marks it as recently used.
    pub fn get(&mut self, key: &TileKey) -> Option<Arc<TileRecord>> {
        self.cache.get(key).cloned()
    }

    /// Look up a tile without touching the LRU order.
    pub fn peek(&self, key: &TileKey) -> Option<Arc<TileRecord>> {
        self.cache.peek(key).cloned()
    }

    /// Check presence without touching the LRU order.
    pub fn contains(&self, key: &TileKey) -> bool {
        self.cache.contains(key)
    }

    /// Store a decoded tile, evicting the least-recently-used one if full.
    ///
    /// Re-inserting an existing key replaces it and marks it as recently used.
    pub fn insert(&mut self, record: TileRecord) -> Arc<TileRecord> {
        let record = Arc::new(record);
        self.memory_bytes += record.size_bytes;

        if let Some((old_key, old)) = self.cache.push(record.key, record.clone()) {
            self.memory_bytes = self.memory_bytes.saturating_sub(old.size_bytes);
            if old_key != record.key {
                trace!(
                    slide_id = %old_key.slide,
                    level = old_key.level,
                    column = old_key.column,
                    row = old_key.row,
                    "Evicted tile"
                );
            }
        }
        record
    }

    /// Decode `data` off the current thread and store the result.
    ///
    /// A decode failure leaves the cache untouched.
    pub async fn set(&mut self, key: TileKey, data: Bytes) -> Result<Arc<TileRecord>, DecodeError> {
        let record = self.decoder.decode_async(key, data).await?;
        Ok(self.insert(record))
    }

    /// Drop every tile.
    pub fn clear(&mut self) {
        self.cache.clear();
        self.memory_bytes = 0;
    }

    /// Number of cached tiles.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Approximate decoded size of all cached tiles in bytes.
    pub fn memory_bytes(&self) -> usize {
        self.memory_bytes
    }

    /// Maximum number of tiles.
    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }

    /// Cached keys, most recently used first.
    pub fn keys(&self) -> impl Iterator<Item = &TileKey> {
        self.cache.iter().map(|(key, _)| key)
    }

    /// Decoder used by [`set`](Self::set).
    pub fn decoder(&self) -> &TileDecoder {
        &self.decoder
    }
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CACHED_TILES)
    }
}

// =============================================================================
// Tests
// =============================================================================
