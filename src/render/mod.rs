//! Draw-surface contract.
//!
//! A [`RenderFrame`] is a resolved [`RenderPlan`]: every cell holds the tile
//! it will be drawn with. Resolving is the step that marks tiles as used in
//! the cache. UI layers implement [`DrawSurface`]; [`RgbaSurface`] is a CPU
//! compositor used by the CLI and the tests.

mod surface;

pub use surface::RgbaSurface;

use std::sync::Arc;

use crate::protocol::SlideId;
use crate::scheduler::{CellKind, CellSource, FrameStats, RenderPlan, ScreenRect, SourceRect};
use crate::tile::{TileCache, TileKey, TileRecord};
use crate::viewport::ViewportState;

/// Something a frame can be drawn onto.
pub trait DrawSurface {
    /// Reset the whole surface before a frame.
    fn clear(&mut self);

    /// Draw `src` of `tile` scaled into `dst`.
    fn draw_tile(&mut self, tile: &TileRecord, src: SourceRect, dst: ScreenRect);

    /// Mark a cell that has nothing to show yet.
    fn draw_placeholder(&mut self, dst: ScreenRect);
}

/// One cell of a resolved frame.
#[derive(Debug, Clone)]
pub struct FrameCell {
    /// The exact tile this cell wants
    pub key: TileKey,
    pub kind: CellKind,
    /// Tile actually drawn, with the part of it to use
    pub tile: Option<(Arc<TileRecord>, SourceRect)>,
    pub dst: ScreenRect,
}

/// Everything needed to draw one frame, detached from the cache.
#[derive(Debug, Clone)]
pub struct RenderFrame {
    pub slide: Option<SlideId>,
    pub level: u32,
    pub viewport: Option<ViewportState>,
    pub cells: Vec<FrameCell>,
    pub stats: FrameStats,
    /// Render generation the frame was built at
    pub generation: u64,
}

impl RenderFrame {
    /// A frame with nothing to draw.
    pub fn empty(generation: u64) -> Self {
        Self {
            slide: None,
            level: 0,
            viewport: None,
            cells: Vec::new(),
            stats: FrameStats::default(),
            generation,
        }
    }

    /// Take the tiles of `plan` out of the cache, marking them as used.
    ///
    /// A tile evicted since planning degrades its cell to a placeholder.
    pub fn resolve(
        plan: &RenderPlan,
        viewport: ViewportState,
        cache: &mut TileCache,
        generation: u64,
    ) -> Self {
        let mut stats = FrameStats::default();
        let cells = plan
            .cells
            .iter()
            .map(|cell| {
                let tile = match cell.source {
                    CellSource::Exact { key, src } | CellSource::Fallback { key, src, .. } => {
                        cache.get(&key).map(|record| (record, src))
                    }
                    CellSource::Placeholder => None,
                };
                let kind = if tile.is_some() {
                    cell.source.kind()
                } else {
                    CellKind::Placeholder
                };
                match kind {
                    CellKind::Exact => stats.exact += 1,
                    CellKind::Fallback => stats.fallback += 1,
                    CellKind::Placeholder => stats.placeholder += 1,
                }
                FrameCell {
                    key: cell.key,
                    kind,
                    tile,
                    dst: cell.dst,
                }
            })
            .collect();

        Self {
            slide: Some(plan.slide),
            level: plan.level,
            viewport: Some(viewport),
            cells,
            stats,
            generation,
        }
    }

    /// Draw every cell onto `surface`.
    pub fn draw(&self, surface: &mut dyn DrawSurface) {
        surface.clear();
        for cell in &self.cells {
            match &cell.tile {
                Some((record, src)) => surface.draw_tile(record, *src, cell.dst),
                None => surface.draw_placeholder(cell.dst),
            }
        }
    }
}
