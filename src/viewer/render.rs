//! Cancellable page render tasks

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use log::debug;

use super::backend::{DEFAULT_MAX_PIXELS, Pixmap, Viewport};
use super::cache::{CacheKey, PageCache};
use super::document::DocumentHandle;
use super::error::{BackendError, RenderError};
use super::pagination::PageIndex;
use super::surface::Surface;

/// Unique identifier for render requests
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

impl RequestId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Cooperative cancellation signal shared between a task and its backend
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// How a render task ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RenderOutcome {
    Success,
    Cancelled,
    Failed(RenderError),
}

impl RenderOutcome {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Shared render target handed to tasks
pub type SharedSurface = Rc<RefCell<dyn Surface>>;

/// One in-flight draw of one page at one scale.
///
/// Awaiting the task drives the draw. Once cancelled, the task resolves to
/// [`RenderOutcome::Cancelled`] and never touches the surface again, even if
/// the backend finishes the raster afterwards.
pub struct RenderTask {
    id: RequestId,
    page: PageIndex,
    scale: f32,
    cancel: CancelFlag,
    work: Option<LocalBoxFuture<'static, RenderOutcome>>,
    finished: Option<RenderOutcome>,
}

impl RenderTask {
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    #[must_use]
    pub fn page(&self) -> PageIndex {
        self.page
    }

    #[must_use]
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Request cancellation; a no-op once the task has finished
    pub fn cancel(&self) {
        if self.finished.is_none() {
            self.cancel.cancel();
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    #[must_use]
    pub fn outcome(&self) -> Option<&RenderOutcome> {
        self.finished.as_ref()
    }
}

impl Future for RenderTask {
    type Output = RenderOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<RenderOutcome> {
        if let Some(outcome) = &self.finished {
            return Poll::Ready(outcome.clone());
        }

        let outcome = if self.cancel.is_cancelled() {
            RenderOutcome::Cancelled
        } else {
            let Some(work) = self.work.as_mut() else {
                return Poll::Ready(RenderOutcome::Cancelled);
            };
            match work.poll_unpin(cx) {
                Poll::Ready(outcome) => outcome,
                Poll::Pending => return Poll::Pending,
            }
        };

        if outcome.is_cancelled() {
            debug!("Render of page {} (request {:?}) cancelled", self.page, self.id);
        }
        self.work = None;
        self.finished = Some(outcome.clone());
        Poll::Ready(outcome)
    }
}

impl std::fmt::Debug for RenderTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTask")
            .field("id", &self.id)
            .field("page", &self.page)
            .field("scale", &self.scale)
            .field("cancelled", &self.is_cancelled())
            .field("finished", &self.finished)
            .finish()
    }
}

/// Issues render tasks, keeping at most one outstanding
pub struct PageRenderer {
    next_request_id: u64,
    outstanding: Option<(RequestId, CancelFlag)>,
    cache: Rc<RefCell<PageCache>>,
    max_pixels: u64,
}

impl PageRenderer {
    #[must_use]
    pub fn new(cache_size: usize) -> Self {
        Self {
            next_request_id: 1,
            outstanding: None,
            cache: Rc::new(RefCell::new(PageCache::new(cache_size))),
            max_pixels: DEFAULT_MAX_PIXELS,
        }
    }

    /// Refuse viewports larger than `max_pixels`
    #[must_use]
    pub fn with_pixel_limit(mut self, max_pixels: u64) -> Self {
        self.max_pixels = max_pixels.max(1);
        self
    }

    /// Start drawing `page` onto `surface`.
    ///
    /// Any task previously issued by this renderer is cancelled first, and
    /// the surface is cleared before this returns, so a stale page is never
    /// left under a slow or failed render.
    pub fn render(
        &mut self,
        handle: &DocumentHandle,
        page: PageIndex,
        scale: f32,
        surface: SharedSurface,
    ) -> Result<RenderTask, RenderError> {
        if page.get() > handle.page_count() {
            return Err(RenderError::new(
                page.get(),
                format!("page is outside 1..={}", handle.page_count()),
            ));
        }
        if !scale.is_finite() || scale <= 0.0 {
            return Err(RenderError::new(
                page.get(),
                format!("invalid scale {scale}"),
            ));
        }

        self.cancel_outstanding();

        let id = self.next_id();
        let cancel = CancelFlag::new();
        self.outstanding = Some((id, cancel.clone()));

        surface.borrow_mut().clear();

        let work = draw_page(
            handle.share(),
            page,
            scale,
            surface,
            Rc::clone(&self.cache),
            cancel.clone(),
            self.max_pixels,
        )
        .boxed_local();

        debug!("Render request {id:?}: page {page} at scale {scale}");
        Ok(RenderTask {
            id,
            page,
            scale,
            cancel,
            work: Some(work),
            finished: None,
        })
    }

    /// Cancel `task`, releasing its slot if it is the outstanding one
    pub fn cancel(&mut self, task: &RenderTask) {
        task.cancel();
        if matches!(self.outstanding, Some((id, _)) if id == task.id()) {
            self.outstanding = None;
        }
    }

    /// Cancel whatever task this renderer issued last
    pub fn cancel_outstanding(&mut self) {
        if let Some((id, flag)) = self.outstanding.take() {
            if !flag.is_cancelled() {
                debug!("Cancelling render request {id:?}");
            }
            flag.cancel();
        }
    }

    pub fn invalidate_cache(&mut self) {
        self.cache.borrow_mut().invalidate_all();
    }

    #[must_use]
    pub fn cached_pages(&self) -> usize {
        self.cache.borrow().len()
    }

    fn next_id(&mut self) -> RequestId {
        let id = RequestId::new(self.next_request_id);
        self.next_request_id += 1;
        id
    }
}

async fn draw_page(
    handle: DocumentHandle,
    page: PageIndex,
    scale: f32,
    surface: SharedSurface,
    cache: Rc<RefCell<PageCache>>,
    cancel: CancelFlag,
    max_pixels: u64,
) -> RenderOutcome {
    let key = CacheKey::new(page, scale);
    let cached = cache.borrow_mut().get(&key);

    let raster: Rc<Pixmap> = match cached {
        Some(raster) => {
            debug!("Page {page} at scale {scale} served from cache");
            surface.borrow_mut().resize(raster.width, raster.height);
            raster
        }
        None => {
            let backend_page = match handle.get_page(page).await {
                Ok(p) => p,
                Err(e) => return classify(page, &cancel, e),
            };
            if cancel.is_cancelled() {
                return RenderOutcome::Cancelled;
            }

            let viewport = Viewport::for_page(backend_page.size(), scale);
            if viewport.pixel_count() > max_pixels {
                return RenderOutcome::Failed(RenderError::new(
                    page.get(),
                    format!(
                        "viewport {}x{} at scale {scale} exceeds the {max_pixels} pixel limit",
                        viewport.width, viewport.height
                    ),
                ));
            }
            surface.borrow_mut().resize(viewport.width, viewport.height);

            let drawn = match backend_page.draw(viewport, &cancel).await {
                Ok(pixmap) => pixmap,
                Err(e) => return classify(page, &cancel, e),
            };
            cache.borrow_mut().insert(key, drawn)
        }
    };

    // Last check before the only visible side effect
    if cancel.is_cancelled() {
        return RenderOutcome::Cancelled;
    }
    surface.borrow_mut().present(&raster);
    RenderOutcome::Success
}

fn classify(page: PageIndex, cancel: &CancelFlag, error: BackendError) -> RenderOutcome {
    if cancel.is_cancelled() || error.is_cancellation() {
        RenderOutcome::Cancelled
    } else {
        RenderOutcome::Failed(RenderError::new(page.get(), error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::test_utils::{FakeBackend, RecordingSurface, SurfaceOp};

    fn page(n: usize) -> PageIndex {
        PageIndex::new(n).unwrap()
    }

    async fn open(backend: &FakeBackend) -> DocumentHandle {
        DocumentHandle::open(backend, &FakeBackend::source())
            .await
            .unwrap()
    }

    fn surface() -> (Rc<RefCell<RecordingSurface>>, SharedSurface) {
        let concrete = Rc::new(RefCell::new(RecordingSurface::default()));
        let shared: SharedSurface = concrete.clone();
        (concrete, shared)
    }

    #[tokio::test]
    async fn renders_page_onto_surface() {
        let backend = FakeBackend::new(3);
        let handle = open(&backend).await;
        let (recorded, shared) = surface();
        let mut renderer = PageRenderer::new(4);

        let task = renderer.render(&handle, page(2), 1.0, shared).unwrap();
        assert_eq!(task.await, RenderOutcome::Success);

        let ops = recorded.borrow().ops().to_vec();
        assert_eq!(
            ops,
            vec![
                SurfaceOp::Clear,
                SurfaceOp::Resize(FakeBackend::PAGE_WIDTH, FakeBackend::PAGE_HEIGHT),
                SurfaceOp::Present { page: 2 },
            ]
        );
        assert_eq!(recorded.borrow().shown_page(), Some(2));
    }

    #[tokio::test]
    async fn rejects_bad_arguments_without_touching_surface() {
        let backend = FakeBackend::new(3);
        let handle = open(&backend).await;
        let (recorded, shared) = surface();
        let mut renderer = PageRenderer::new(4);

        assert!(renderer.render(&handle, page(4), 1.0, shared.clone()).is_err());
        assert!(renderer.render(&handle, page(1), 0.0, shared.clone()).is_err());
        assert!(renderer.render(&handle, page(1), f32::NAN, shared).is_err());
        assert!(recorded.borrow().ops().is_empty());
    }

    #[tokio::test]
    async fn extreme_scale_fails_before_drawing() {
        let backend = FakeBackend::new(1);
        let handle = open(&backend).await;
        let (recorded, shared) = surface();
        let mut renderer = PageRenderer::new(4);

        let task = renderer.render(&handle, PageIndex::FIRST, 1.0e8, shared).unwrap();
        match task.await {
            RenderOutcome::Failed(err) => {
                assert_eq!(err.page, 1);
                assert!(err.detail.contains("pixel limit"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(backend.drawn_pages().is_empty());
        assert_eq!(recorded.borrow().ops().to_vec(), vec![SurfaceOp::Clear]);
        assert_eq!(renderer.cached_pages(), 0);
    }

    #[tokio::test]
    async fn extreme_scale_on_pixel_surface_does_not_panic() {
        let backend = FakeBackend::new(1);
        let handle = open(&backend).await;
        let pixels = Rc::new(RefCell::new(crate::viewer::PixelSurface::new()));
        let mut renderer = PageRenderer::new(4);

        let task = renderer
            .render(&handle, PageIndex::FIRST, 1.0e8, pixels.clone())
            .unwrap();
        assert!(matches!(task.await, RenderOutcome::Failed(_)));
        assert!(pixels.borrow().pixels().is_empty());
    }

    #[tokio::test]
    async fn pixel_limit_is_configurable() {
        let backend = FakeBackend::new(1);
        let handle = open(&backend).await;
        let (_, shared) = surface();
        let area = u64::from(FakeBackend::PAGE_WIDTH * FakeBackend::PAGE_HEIGHT);

        let mut tight = PageRenderer::new(4).with_pixel_limit(area - 1);
        let task = tight.render(&handle, PageIndex::FIRST, 1.0, shared.clone()).unwrap();
        assert!(matches!(task.await, RenderOutcome::Failed(_)));

        let mut exact = PageRenderer::new(4).with_pixel_limit(area);
        let task = exact.render(&handle, PageIndex::FIRST, 1.0, shared).unwrap();
        assert_eq!(task.await, RenderOutcome::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn new_render_cancels_previous() {
        let backend = FakeBackend::new(3).with_draw_delay(Duration::from_millis(100));
        let handle = open(&backend).await;
        let (recorded, shared) = surface();
        let mut renderer = PageRenderer::new(4);

        let first = renderer.render(&handle, page(1), 1.0, shared.clone()).unwrap();
        let second = renderer.render(&handle, page(2), 1.0, shared).unwrap();

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(first.await, RenderOutcome::Cancelled);
        assert_eq!(second.await, RenderOutcome::Success);
        assert_eq!(recorded.borrow().presented_pages(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_mid_draw_never_presents() {
        // The fake backend ignores the flag, like engines that cannot stop mid-draw
        let backend = FakeBackend::new(3).with_draw_delay(Duration::from_millis(100));
        let handle = open(&backend).await;
        let (recorded, shared) = surface();
        let mut renderer = PageRenderer::new(4);

        let mut task = renderer.render(&handle, page(1), 1.0, shared).unwrap();
        let cancel = task.cancel.clone();

        let outcome = tokio::select! {
            outcome = &mut task => outcome,
            () = async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                cancel.cancel();
                std::future::pending::<()>().await;
            } => unreachable!(),
        };

        assert_eq!(outcome, RenderOutcome::Cancelled);
        assert_eq!(backend.drawn_pages(), vec![1]);
        assert!(recorded.borrow().presented_pages().is_empty());
        assert_eq!(task.outcome(), Some(&RenderOutcome::Cancelled));
    }

    #[tokio::test]
    async fn backend_failure_is_failed_not_cancelled() {
        let backend = FakeBackend::new(3).with_failing_page(2);
        let handle = open(&backend).await;
        let (_recorded, shared) = surface();
        let mut renderer = PageRenderer::new(4);

        let outcome = renderer.render(&handle, page(2), 1.0, shared).unwrap().await;
        match outcome {
            RenderOutcome::Failed(err) => assert_eq!(err.page, 2),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn backend_reported_cancellation_is_cancelled() {
        let backend = FakeBackend::new(3).with_cancelling_page(1);
        let handle = open(&backend).await;
        let (recorded, shared) = surface();
        let mut renderer = PageRenderer::new(4);

        let outcome = renderer.render(&handle, page(1), 1.0, shared).unwrap().await;
        assert_eq!(outcome, RenderOutcome::Cancelled);
        assert!(recorded.borrow().presented_pages().is_empty());
    }

    #[tokio::test]
    async fn destroyed_handle_fails_render() {
        let backend = FakeBackend::new(3);
        let handle = open(&backend).await;
        let (_recorded, shared) = surface();
        let mut renderer = PageRenderer::new(4);

        handle.destroy();
        let outcome = renderer.render(&handle, page(1), 1.0, shared).unwrap().await;
        assert!(matches!(outcome, RenderOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn cached_pages_skip_the_backend() {
        let backend = FakeBackend::new(3);
        let handle = open(&backend).await;
        let (recorded, shared) = surface();
        let mut renderer = PageRenderer::new(4);

        for _ in 0..2 {
            let task = renderer.render(&handle, page(3), 2.0, shared.clone()).unwrap();
            assert_eq!(task.await, RenderOutcome::Success);
        }

        assert_eq!(backend.drawn_pages(), vec![3]);
        assert_eq!(recorded.borrow().presented_pages(), vec![3, 3]);
        assert_eq!(renderer.cached_pages(), 1);

        renderer.invalidate_cache();
        assert_eq!(renderer.cached_pages(), 0);
    }

    #[tokio::test]
    async fn cancel_after_finish_is_noop() {
        let backend = FakeBackend::new(1);
        let handle = open(&backend).await;
        let (_recorded, shared) = surface();
        let mut renderer = PageRenderer::new(4);

        let mut task = renderer.render(&handle, page(1), 1.0, shared).unwrap();
        assert_eq!((&mut task).await, RenderOutcome::Success);
        renderer.cancel(&task);
        assert!(!task.is_cancelled());
        assert_eq!(task.await, RenderOutcome::Success);
    }
}
