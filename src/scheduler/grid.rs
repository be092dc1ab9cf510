use crate::protocol::ImageDescriptor;
use crate::viewport::ViewportState;

/// Tile edge in pixels, at every level.
pub const TILE_SIZE: u32 = 512;

/// Reference DPI; at this DPI one CSS pixel is one device pixel.
pub const BASE_DPI: f32 = 96.0;

const LEVEL_EPSILON: f64 = 1e-9;

/// Screen pixels per level-0 pixel, corrected for display density.
pub fn effective_scale(zoom: f64, dpi: f32) -> f64 {
    zoom * dpi as f64 / BASE_DPI as f64
}

/// Pick the pyramid level for a scale.
///
/// The coarsest level whose pixels still map to at most one screen pixel:
/// the largest `L < levels` with `scale * 2^L <= 1`. At `scale >= 1` this is
/// level 0.
pub fn ideal_level(scale: f64, levels: u32) -> u32 {
    if levels == 0 || !(scale > 0.0) {
        return 0;
    }
    let mut level = 0;
    while level + 1 < levels && scale * f64::from(1u32 << (level + 1).min(31)) <= 1.0 + LEVEL_EPSILON
    {
        level += 1;
    }
    level
}

/// Edge of one tile at `level`, in level-0 pixels.
pub fn tile_span(level: u32) -> f64 {
    f64::from(TILE_SIZE) * 2f64.powi(level as i32)
}

/// Number of tile columns and rows at `level`.
pub fn grid_size(descriptor: &ImageDescriptor, level: u32) -> (u32, u32) {
    let (w, h) = descriptor.level_dimensions(level);
    (w.div_ceil(TILE_SIZE), h.div_ceil(TILE_SIZE))
}

/// Half-open rectangle of tile indices at one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    pub level: u32,
    pub col_start: u32,
    pub col_end: u32,
    pub row_start: u32,
    pub row_end: u32,
}

impl TileRange {
    pub fn columns(&self) -> u32 {
        self.col_end - self.col_start
    }

    pub fn rows(&self) -> u32 {
        self.row_end - self.row_start
    }

    pub fn len(&self) -> usize {
        self.columns() as usize * self.rows() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, column: u32, row: u32) -> bool {
        (self.col_start..self.col_end).contains(&column)
            && (self.row_start..self.row_end).contains(&row)
    }

    /// Every `(column, row)` in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        (self.row_start..self.row_end)
            .flat_map(move |row| (self.col_start..self.col_end).map(move |col| (col, row)))
    }
}

/// Tiles at `level` that intersect the viewport.
///
/// `None` when the viewport does not overlap the image.
pub fn visible_range(
    viewport: &ViewportState,
    descriptor: &ImageDescriptor,
    level: u32,
) -> Option<TileRange> {
    let width = f64::from(descriptor.width);
    let height = f64::from(descriptor.height);

    let left = viewport.x.max(0.0);
    let top = viewport.y.max(0.0);
    let right = (viewport.x + viewport.visible_width()).min(width);
    let bottom = (viewport.y + viewport.visible_height()).min(height);

    if !(right > left && bottom > top) {
        return None;
    }

    let span = tile_span(level);
    let (columns, rows) = grid_size(descriptor, level);

    let range = TileRange {
        level,
        col_start: ((left / span).floor() as u32).min(columns),
        col_end: ((right / span).ceil() as u32).min(columns),
        row_start: ((top / span).floor() as u32).min(rows),
        row_end: ((bottom / span).ceil() as u32).min(rows),
    };

    (!range.is_empty()).then_some(range)
}
