//! Tile Scheduler.
//!
//! Turns a viewport into a plan of what to draw and what to ask for:
//!
//! ```text
//!  ViewportState ──▶ ideal level ──▶ visible TileRange ──▶ RenderPlan
//!                    (zoom · dpi)      (grid at level)      exact / fallback / placeholder
//!                                                              │
//!                            TileRetryTracker ◀── missing ─────┘
//! ```
//!
//! Viewport updates to the server are coalesced by a [`Debouncer`].

mod debounce;
mod grid;
mod plan;
mod retry;

pub use debounce::{Debouncer, Fired, DEFAULT_VIEWPORT_DEBOUNCE};
pub use grid::{
    effective_scale, grid_size, ideal_level, tile_span, visible_range, TileRange, BASE_DPI,
    TILE_SIZE,
};
pub use plan::{
    plan_frame, CellKind, CellSource, FrameStats, PlannedCell, RenderPlan, ScreenRect, SourceRect,
};
pub use retry::{TileRetryTracker, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY};
