//! Viewport math.
//!
//! A viewport is a rectangle of screen pixels looking at a fixed-size image
//! plane. Its state is an image-space offset (level-0 pixels) plus a zoom
//! factor expressed in screen pixels per image pixel:
//!
//! ```text
//!   image plane (level 0)
//!  ┌───────────────────────────────────────────┐
//!  │        (x, y)                             │
//!  │          ┌───────────────┐                │
//!  │          │   visible     │ height / zoom  │
//!  │          │   region      │                │
//!  │          └───────────────┘                │
//!  │             width / zoom                  │
//!  └───────────────────────────────────────────┘
//! ```
//!
//! Everything here is pure. Callers validate user- or URL-supplied numbers
//! before handing them in; the functions assume finite inputs and `zoom > 0`.

mod math;
mod state;

pub use math::{center_viewport, clamp_viewport, pan, resize, zoom_around};
pub use state::{ProtocolViewport, ViewportState, PROTOCOL_VIEWPORT_SIZE};
