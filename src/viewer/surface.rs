//! Render targets

use log::warn;

use super::backend::{Pixmap, rgba_len};

/// A drawable target owned by one viewer.
///
/// The active render task is the only writer. It clears the surface when it
/// starts, resizes it to the page viewport and presents a finished raster.
pub trait Surface {
    fn clear(&mut self);

    fn resize(&mut self, width: u32, height: u32);

    /// Copy a finished raster onto the surface
    fn present(&mut self, pixmap: &Pixmap);
}

/// Background shown while nothing is presented
pub const CLEAR_COLOR: [u8; 4] = [0, 0, 0, 0];

/// In-memory RGBA surface
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PixelSurface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl PixelSurface {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// True when every pixel is [`CLEAR_COLOR`]
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.pixels.chunks_exact(4).all(|px| px == CLEAR_COLOR)
    }

    /// Copy out as an `image` buffer for encoding
    #[must_use]
    pub fn to_image(&self) -> Option<image::RgbaImage> {
        image::RgbaImage::from_raw(self.width, self.height, self.pixels.clone())
    }
}

impl Surface for PixelSurface {
    fn clear(&mut self) {
        for px in self.pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&CLEAR_COLOR);
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.pixels.clear();
        let Some(len) = rgba_len(width, height) else {
            warn!("Surface size {width}x{height} does not fit in memory, leaving it empty");
            self.width = 0;
            self.height = 0;
            return;
        };
        self.width = width;
        self.height = height;
        self.pixels.resize(len, 0);
        self.clear();
    }

    fn present(&mut self, pixmap: &Pixmap) {
        if (self.width, self.height) != (pixmap.width, pixmap.height) {
            self.resize(pixmap.width, pixmap.height);
        }
        let len = self.pixels.len().min(pixmap.pixels.len());
        self.pixels[..len].copy_from_slice(&pixmap.pixels[..len]);
    }
}
