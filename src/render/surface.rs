use std::path::Path;

use image::{ImageResult, Rgba, RgbaImage};

use crate::scheduler::{ScreenRect, SourceRect};
use crate::tile::TileRecord;

use super::DrawSurface;

const DEFAULT_BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 0]);
const DEFAULT_PLACEHOLDER: Rgba<u8> = Rgba([224, 224, 224, 255]);

/// CPU compositor into an RGBA image, nearest-neighbour sampling.
pub struct RgbaSurface {
    image: RgbaImage,
    background: Rgba<u8>,
    placeholder: Rgba<u8>,
}

impl RgbaSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::from_pixel(width, height, DEFAULT_BACKGROUND),
            background: DEFAULT_BACKGROUND,
            placeholder: DEFAULT_PLACEHOLDER,
        }
    }

    pub fn with_colors(mut self, background: Rgba<u8>, placeholder: Rgba<u8>) -> Self {
        self.background = background;
        self.placeholder = placeholder;
        self
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    /// Write the surface as PNG.
    pub fn save_png(&self, path: impl AsRef<Path>) -> ImageResult<()> {
        self.image
            .save_with_format(path, image::ImageFormat::Png)
    }

    /// Integer pixel span covered by `[start, start + len)`, clipped to `[0, max)`.
    fn span(start: f64, len: f64, max: u32) -> (u32, u32) {
        let from = start.round().max(0.0).min(max as f64) as u32;
        let to = (start + len).round().max(0.0).min(max as f64) as u32;
        (from, to.max(from))
    }

    fn fill(&mut self, dst: ScreenRect, color: Rgba<u8>) {
        let (x0, x1) = Self::span(dst.x, dst.width, self.image.width());
        let (y0, y1) = Self::span(dst.y, dst.height, self.image.height());
        for y in y0..y1 {
            for x in x0..x1 {
                self.image.put_pixel(x, y, color);
            }
        }
    }
}

impl DrawSurface for RgbaSurface {
    fn clear(&mut self) {
        let background = self.background;
        for pixel in self.image.pixels_mut() {
            *pixel = background;
        }
    }

    fn draw_tile(&mut self, tile: &TileRecord, src: SourceRect, dst: ScreenRect) {
        let (tw, th) = tile.bitmap.dimensions();
        if tw == 0 || th == 0 || !(dst.width > 0.0) || !(dst.height > 0.0) {
            return;
        }

        let (x0, x1) = Self::span(dst.x, dst.width, self.image.width());
        let (y0, y1) = Self::span(dst.y, dst.height, self.image.height());

        for y in y0..y1 {
            let v = src.y + (f64::from(y) + 0.5 - dst.y) / dst.height * src.height;
            let ty = (v.max(0.0) as u32).min(th - 1);
            for x in x0..x1 {
                let u = src.x + (f64::from(x) + 0.5 - dst.x) / dst.width * src.width;
                let tx = (u.max(0.0) as u32).min(tw - 1);
                self.image.put_pixel(x, y, *tile.bitmap.get_pixel(tx, ty));
            }
        }
    }

    fn draw_placeholder(&mut self, dst: ScreenRect) {
        let placeholder = self.placeholder;
        self.fill(dst, placeholder);
    }
}
