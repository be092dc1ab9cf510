use serde::{Deserialize, Serialize};

/// Encoded size of a [`ProtocolViewport`] in bytes.
pub const PROTOCOL_VIEWPORT_SIZE: usize = 20;

/// The client's view over one image.
///
/// `x`/`y` are the image-space top-left offset in level-0 pixels, `width`/
/// `height` the viewport size in screen pixels, and `zoom` the number of
/// screen pixels per image pixel. Offsets may be negative when an image
/// smaller than the viewport is centered.
///
/// The state is replaced wholesale on every pan, zoom or resize; the network
/// layer never mutates it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewportState {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub zoom: f64,
}

impl ViewportState {
    pub fn new(x: f64, y: f64, width: f64, height: f64, zoom: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
            zoom,
        }
    }

    /// Width of the visible region in image pixels.
    pub fn visible_width(&self) -> f64 {
        self.width / self.zoom
    }

    /// Height of the visible region in image pixels.
    pub fn visible_height(&self) -> f64 {
        self.height / self.zoom
    }

    /// Convert a screen-space point to image space.
    pub fn screen_to_image(&self, sx: f64, sy: f64) -> (f64, f64) {
        (self.x + sx / self.zoom, self.y + sy / self.zoom)
    }

    /// Convert an image-space point to screen space.
    pub fn image_to_screen(&self, ix: f64, iy: f64) -> (f64, f64) {
        ((ix - self.x) * self.zoom, (iy - self.y) * self.zoom)
    }

    /// Image-space point under the center of the viewport.
    pub fn center(&self) -> (f64, f64) {
        self.screen_to_image(self.width / 2.0, self.height / 2.0)
    }
}

/// Region of interest as sent to the server in `UpdateViewport`.
///
/// Single precision is plenty for the server, which only uses the region to
/// pick and prioritize tiles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProtocolViewport {
    pub x: f32,
    pub y: f32,
    pub width: u32,
    pub height: u32,
    pub zoom: f32,
}

impl ProtocolViewport {
    /// Serialize as `[x f32][y f32][width u32][height u32][zoom f32]`, little-endian.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.x.to_le_bytes());
        buf.extend_from_slice(&self.y.to_le_bytes());
        buf.extend_from_slice(&self.width.to_le_bytes());
        buf.extend_from_slice(&self.height.to_le_bytes());
        buf.extend_from_slice(&self.zoom.to_le_bytes());
    }

    /// Parse from exactly [`PROTOCOL_VIEWPORT_SIZE`] bytes.
    pub fn from_slice(data: &[u8]) -> Option<Self> {
        if data.len() != PROTOCOL_VIEWPORT_SIZE {
            return None;
        }
        Some(Self {
            x: f32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            y: f32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            width: u32::from_le_bytes([data[8], data[9], data[10], data[11]]),
            height: u32::from_le_bytes([data[12], data[13], data[14], data[15]]),
            zoom: f32::from_le_bytes([data[16], data[17], data[18], data[19]]),
        })
    }
}

impl From<&ViewportState> for ProtocolViewport {
    fn from(v: &ViewportState) -> Self {
        Self {
            x: v.x as f32,
            y: v.y as f32,
            width: v.width.max(0.0).round() as u32,
            height: v.height.max(0.0).round() as u32,
            zoom: v.zoom as f32,
        }
    }
}
