//! Per-frame render planning.
//!
//! For every visible cell at the ideal level the plan picks, in order:
//!
//! 1. the exact tile, if cached;
//! 2. otherwise the nearest cached ancestor, scaled up ("fallback");
//! 3. otherwise a placeholder.
//!
//! Planning only peeks at the cache. Recency is updated when a frame is
//! actually drawn.

use serde::Serialize;

use crate::protocol::{ImageDescriptor, SlideId};
use crate::tile::{TileCache, TileKey};
use crate::viewport::ViewportState;

use super::grid::{effective_scale, ideal_level, tile_span, visible_range, TileRange, TILE_SIZE};

/// Rectangle in tile-bitmap pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Rectangle in screen pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// How a cell is filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CellKind {
    Exact,
    Fallback,
    Placeholder,
}

/// Chosen content for one cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CellSource {
    /// The tile for this exact cell
    Exact { key: TileKey, src: SourceRect },

    /// Part of a coarser ancestor tile, magnified by `scale` (a power of two)
    Fallback {
        key: TileKey,
        src: SourceRect,
        scale: u32,
    },

    /// Nothing cached covers this cell
    Placeholder,
}

impl CellSource {
    pub fn kind(&self) -> CellKind {
        match self {
            CellSource::Exact { .. } => CellKind::Exact,
            CellSource::Fallback { .. } => CellKind::Fallback,
            CellSource::Placeholder => CellKind::Placeholder,
        }
    }

    /// Tile drawn for this cell, if any.
    pub fn key(&self) -> Option<&TileKey> {
        match self {
            CellSource::Exact { key, .. } | CellSource::Fallback { key, .. } => Some(key),
            CellSource::Placeholder => None,
        }
    }
}

/// One visible cell of the ideal level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannedCell {
    /// The exact tile this cell wants
    pub key: TileKey,
    pub source: CellSource,
    pub dst: ScreenRect,
}

/// Exact / fallback / placeholder counts of one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameStats {
    pub exact: usize,
    pub fallback: usize,
    pub placeholder: usize,
}

impl FrameStats {
    pub fn total(&self) -> usize {
        self.exact + self.fallback + self.placeholder
    }

    fn count(&mut self, kind: CellKind) {
        match kind {
            CellKind::Exact => self.exact += 1,
            CellKind::Fallback => self.fallback += 1,
            CellKind::Placeholder => self.placeholder += 1,
        }
    }
}

/// What to draw for one viewport, cells ordered center-out.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPlan {
    pub slide: SlideId,
    pub level: u32,
    pub range: Option<TileRange>,
    pub cells: Vec<PlannedCell>,
    pub stats: FrameStats,
}

impl RenderPlan {
    /// Exact tiles still missing, center-out.
    pub fn missing(&self) -> impl Iterator<Item = TileKey> + '_ {
        self.cells
            .iter()
            .filter(|cell| cell.source.kind() != CellKind::Exact)
            .map(|cell| cell.key)
    }

    pub fn is_complete(&self) -> bool {
        self.stats.exact == self.cells.len()
    }
}

/// Build the plan for `viewport` over `descriptor`.
pub fn plan_frame(
    viewport: &ViewportState,
    descriptor: &ImageDescriptor,
    dpi: f32,
    cache: &TileCache,
) -> RenderPlan {
    let level = ideal_level(effective_scale(viewport.zoom, dpi), descriptor.levels);
    let range = visible_range(viewport, descriptor, level);

    let mut cells = Vec::with_capacity(range.map_or(0, |r| r.len()));
    let mut stats = FrameStats::default();

    if let Some(range) = range {
        for (column, row) in range.cells() {
            let key = TileKey::new(descriptor.id, level, column, row);
            let (extent_w, extent_h) = cell_extent(descriptor, level, column, row);
            let source = choose_source(descriptor, cache, key, extent_w, extent_h);
            stats.count(source.kind());

            let span = tile_span(level);
            let (sx, sy) = viewport.image_to_screen(f64::from(column) * span, f64::from(row) * span);
            let scale = 2f64.powi(level as i32) * viewport.zoom;
            cells.push(PlannedCell {
                key,
                source,
                dst: ScreenRect {
                    x: sx,
                    y: sy,
                    width: extent_w * scale,
                    height: extent_h * scale,
                },
            });
        }
        order_center_out(&mut cells, viewport, level);
    }

    RenderPlan {
        slide: descriptor.id,
        level,
        range,
        cells,
        stats,
    }
}

/// Size of a cell in pixels of its own level. Edge cells are partial.
fn cell_extent(descriptor: &ImageDescriptor, level: u32, column: u32, row: u32) -> (f64, f64) {
    let (lw, lh) = descriptor.level_dimensions(level);
    let w = lw.saturating_sub(column * TILE_SIZE).min(TILE_SIZE);
    let h = lh.saturating_sub(row * TILE_SIZE).min(TILE_SIZE);
    (f64::from(w), f64::from(h))
}

fn choose_source(
    descriptor: &ImageDescriptor,
    cache: &TileCache,
    key: TileKey,
    extent_w: f64,
    extent_h: f64,
) -> CellSource {
    if cache.contains(&key) {
        return CellSource::Exact {
            key,
            src: SourceRect {
                x: 0.0,
                y: 0.0,
                width: extent_w,
                height: extent_h,
            },
        };
    }

    for ancestor_level in (key.level + 1)..descriptor.levels {
        let d = ancestor_level - key.level;
        if d >= 32 {
            break;
        }
        let ancestor = TileKey::new(key.slide, ancestor_level, key.column >> d, key.row >> d);
        if !cache.contains(&ancestor) {
            continue;
        }

        let factor = 1u32 << d;
        let sub = f64::from(TILE_SIZE) / f64::from(factor);
        return CellSource::Fallback {
            key: ancestor,
            src: SourceRect {
                x: f64::from(key.column % factor) * sub,
                y: f64::from(key.row % factor) * sub,
                width: extent_w / f64::from(factor),
                height: extent_h / f64::from(factor),
            },
            scale: factor,
        };
    }

    CellSource::Placeholder
}

/// Sort by distance of the cell center to the viewport center.
fn order_center_out(cells: &mut [PlannedCell], viewport: &ViewportState, level: u32) {
    let (cx, cy) = viewport.center();
    let span = tile_span(level);
    let distance = |cell: &PlannedCell| {
        let dx = (f64::from(cell.key.column) + 0.5) * span - cx;
        let dy = (f64::from(cell.key.row) + 0.5) * span - cy;
        dx * dx + dy * dy
    };
    cells.sort_by(|a, b| {
        distance(a)
            .total_cmp(&distance(b))
            .then_with(|| (a.key.row, a.key.column).cmp(&(b.key.row, b.key.column)))
    });
}
