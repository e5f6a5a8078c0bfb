//! Document backend interface
//!
//! Backends are driven from a single thread, so none of these traits
//! require `Send`. Native engines such as MuPDF are not thread-safe anyway.

use async_trait::async_trait;

use super::error::BackendError;
use super::render::CancelFlag;
use super::source::DocumentSource;

/// Page dimensions in points at scale 1.0
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    #[must_use]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// Largest raster a viewer draws by default (64 Mpx, 256 MiB of RGBA)
pub const DEFAULT_MAX_PIXELS: u64 = 64 * 1024 * 1024;

/// Pixel area a page is rasterized into
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub scale: f32,
}

impl Viewport {
    /// Size a viewport for a page at the given scale; never smaller than 1x1
    #[must_use]
    pub fn for_page(size: PageSize, scale: f32) -> Self {
        let width = (size.width * scale).ceil().max(1.0) as u32;
        let height = (size.height * scale).ceil().max(1.0) as u32;
        Self {
            width,
            height,
            scale,
        }
    }

    /// Width times height; cannot overflow for `u32` dimensions
    #[must_use]
    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Byte length of a `width x height` RGBA buffer, `None` if it does not fit in memory
#[must_use]
pub fn rgba_len(width: u32, height: u32) -> Option<usize> {
    usize::try_from(width)
        .ok()?
        .checked_mul(usize::try_from(height).ok()?)?
        .checked_mul(4)
}

/// RGBA8 raster produced by a backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pixmap {
    pub width: u32,
    pub height: u32,
    /// Row-major RGBA, `width * height * 4` bytes
    pub pixels: Vec<u8>,
}

impl Pixmap {
    /// Solid-filled raster. Sizes that overflow the address space give an empty 0x0 raster.
    #[must_use]
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let Some(len) = rgba_len(width, height) else {
            return Self {
                width: 0,
                height: 0,
                pixels: Vec::new(),
            };
        };
        Self {
            width,
            height,
            pixels: rgba.repeat(len / 4),
        }
    }

    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

/// Opens documents from validated sources
#[async_trait(?Send)]
pub trait DocumentBackend {
    async fn open(&self, source: &DocumentSource) -> Result<Box<dyn BackendDocument>, BackendError>;
}

/// An opened document as seen by the backend
#[async_trait(?Send)]
pub trait BackendDocument {
    fn page_count(&self) -> usize;

    /// Fetch a page by 0-based index
    async fn load_page(&self, index: usize) -> Result<Box<dyn BackendPage>, BackendError>;

    /// Release native resources. Called at most once by the owning handle.
    fn close(&self);
}

/// A page ready to be drawn
#[async_trait(?Send)]
pub trait BackendPage {
    fn size(&self) -> PageSize;

    /// Rasterize the page into a viewport-sized pixmap.
    ///
    /// Implementations that can stop mid-draw should poll `cancel` and return
    /// [`BackendError::Cancelled`]. Those that cannot may ignore it; the
    /// renderer discards results of cancelled tasks.
    async fn draw(&self, viewport: Viewport, cancel: &CancelFlag) -> Result<Pixmap, BackendError>;
}
