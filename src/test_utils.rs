//! Scripted backend and recording surface for tests

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;

use crate::viewer::{
    BackendDocument, BackendError, BackendPage, CancelFlag, DocumentBackend, DocumentSource,
    PageSize, Pixmap, Surface, Viewport,
};

const FAKE_MAGIC: &[u8] = b"%PDF-fake";

#[derive(Debug, Default)]
struct FakeStats {
    open_calls: Cell<usize>,
    close_calls: Cell<usize>,
    drawn: RefCell<Vec<usize>>,
}

#[derive(Clone, Debug, Default)]
struct FakeScript {
    page_count: usize,
    open_delay: Duration,
    draw_delay: Duration,
    failing_pages: Vec<usize>,
    cancelling_pages: Vec<usize>,
}

/// In-memory document backend.
///
/// Accepts byte sources starting with `%PDF-fake` (optionally
/// `%PDF-fake:<pages>`) and any URL source. Anything else is reported as a
/// corrupt document. Clones share call counters.
#[derive(Clone, Debug)]
pub struct FakeBackend {
    script: FakeScript,
    stats: Rc<FakeStats>,
}

impl FakeBackend {
    pub const PAGE_WIDTH: u32 = 60;
    pub const PAGE_HEIGHT: u32 = 80;

    #[must_use]
    pub fn new(page_count: usize) -> Self {
        Self {
            script: FakeScript {
                page_count,
                ..FakeScript::default()
            },
            stats: Rc::default(),
        }
    }

    /// Source the backend opens with its default page count
    #[must_use]
    pub fn source() -> DocumentSource {
        DocumentSource::from_bytes(FAKE_MAGIC.to_vec()).expect("non-empty")
    }

    /// Source that opens with exactly `pages` pages
    #[must_use]
    pub fn source_with_pages(pages: usize) -> DocumentSource {
        let mut bytes = FAKE_MAGIC.to_vec();
        bytes.extend_from_slice(format!(":{pages}").as_bytes());
        DocumentSource::from_bytes(bytes).expect("non-empty")
    }

    #[must_use]
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.script.open_delay = delay;
        self
    }

    #[must_use]
    pub fn with_draw_delay(mut self, delay: Duration) -> Self {
        self.script.draw_delay = delay;
        self
    }

    /// Drawing this page fails with a backend error
    #[must_use]
    pub fn with_failing_page(mut self, page: usize) -> Self {
        self.script.failing_pages.push(page);
        self
    }

    /// Drawing this page reports [`BackendError::Cancelled`]
    #[must_use]
    pub fn with_cancelling_page(mut self, page: usize) -> Self {
        self.script.cancelling_pages.push(page);
        self
    }

    #[must_use]
    pub fn open_calls(&self) -> usize {
        self.stats.open_calls.get()
    }

    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.stats.close_calls.get()
    }

    /// 1-based pages that reached the draw call, in order
    #[must_use]
    pub fn drawn_pages(&self) -> Vec<usize> {
        self.stats.drawn.borrow().clone()
    }

    fn page_count_for(&self, bytes: &[u8]) -> Option<usize> {
        let rest = bytes.strip_prefix(FAKE_MAGIC)?;
        match rest.strip_prefix(b":") {
            Some(count) => std::str::from_utf8(count).ok()?.parse().ok(),
            None if rest.is_empty() => Some(self.script.page_count),
            None => None,
        }
    }
}

#[async_trait(?Send)]
impl DocumentBackend for FakeBackend {
    async fn open(&self, source: &DocumentSource) -> Result<Box<dyn BackendDocument>, BackendError> {
        self.stats.open_calls.set(self.stats.open_calls.get() + 1);
        if !self.script.open_delay.is_zero() {
            tokio::time::sleep(self.script.open_delay).await;
        }

        let page_count = match source.bytes() {
            Some(bytes) => self
                .page_count_for(bytes)
                .ok_or_else(|| BackendError::generic("corrupt document"))?,
            None => self.script.page_count,
        };

        Ok(Box::new(FakeDocument {
            page_count,
            script: self.script.clone(),
            stats: Rc::clone(&self.stats),
            closed: Cell::new(false),
        }))
    }
}

struct FakeDocument {
    page_count: usize,
    script: FakeScript,
    stats: Rc<FakeStats>,
    closed: Cell<bool>,
}

#[async_trait(?Send)]
impl BackendDocument for FakeDocument {
    fn page_count(&self) -> usize {
        self.page_count
    }

    async fn load_page(&self, index: usize) -> Result<Box<dyn BackendPage>, BackendError> {
        if self.closed.get() {
            return Err(BackendError::Destroyed);
        }
        Ok(Box::new(FakePage {
            number: index + 1,
            script: self.script.clone(),
            stats: Rc::clone(&self.stats),
        }))
    }

    fn close(&self) {
        self.closed.set(true);
        self.stats.close_calls.set(self.stats.close_calls.get() + 1);
    }
}

struct FakePage {
    number: usize,
    script: FakeScript,
    stats: Rc<FakeStats>,
}

#[async_trait(?Send)]
impl BackendPage for FakePage {
    fn size(&self) -> PageSize {
        PageSize::new(FakeBackend::PAGE_WIDTH as f32, FakeBackend::PAGE_HEIGHT as f32)
    }

    // Ignores `cancel` on purpose: models engines that cannot stop mid-draw
    async fn draw(&self, viewport: Viewport, _cancel: &CancelFlag) -> Result<Pixmap, BackendError> {
        self.stats.drawn.borrow_mut().push(self.number);

        if self.script.cancelling_pages.contains(&self.number) {
            return Err(BackendError::Cancelled);
        }
        if !self.script.draw_delay.is_zero() {
            tokio::time::sleep(self.script.draw_delay).await;
        }
        if self.script.failing_pages.contains(&self.number) {
            return Err(BackendError::generic("simulated draw failure"));
        }

        Ok(Pixmap::filled(
            viewport.width,
            viewport.height,
            [self.number as u8, 0, 0, 255],
        ))
    }
}

/// A surface write, as seen by [`RecordingSurface`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SurfaceOp {
    Clear,
    Resize(u32, u32),
    /// Raster presented; `page` is read back from the fake raster's red channel
    Present { page: usize },
}

/// Surface that logs every write
#[derive(Debug, Default)]
pub struct RecordingSurface {
    ops: Vec<SurfaceOp>,
    shown: Option<usize>,
}

impl RecordingSurface {
    #[must_use]
    pub fn ops(&self) -> &[SurfaceOp] {
        &self.ops
    }

    /// Page currently visible, `None` after a clear
    #[must_use]
    pub fn shown_page(&self) -> Option<usize> {
        self.shown
    }

    #[must_use]
    pub fn presented_pages(&self) -> Vec<usize> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                SurfaceOp::Present { page } => Some(*page),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn write_count(&self) -> usize {
        self.ops.len()
    }
}

impl Surface for RecordingSurface {
    fn clear(&mut self) {
        self.ops.push(SurfaceOp::Clear);
        self.shown = None;
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.ops.push(SurfaceOp::Resize(width, height));
        self.shown = None;
    }

    fn present(&mut self, pixmap: &Pixmap) {
        let page = usize::from(pixmap.pixels.first().copied().unwrap_or(0));
        self.ops.push(SurfaceOp::Present { page });
        self.shown = Some(page);
    }
}
