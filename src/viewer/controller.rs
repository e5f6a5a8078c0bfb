//! Viewer controller: runs the state machine against real documents
//!
//! The controller is a single-threaded actor. The host talks to it through a
//! [`ViewerHandle`]; commands arrive on a channel, state snapshots go out on a
//! watch channel and page changes and errors go out as [`ViewerEvent`]s.
//! Loads and renders are polled inside the actor loop and never spawned, so
//! two renders can never run at once.

use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use super::backend::{DEFAULT_MAX_PIXELS, DocumentBackend};
use super::document::DocumentHandle;
use super::error::{LoadError, RenderError, ViewerError};
use super::render::{PageRenderer, RenderOutcome, RenderTask, SharedSurface};
use super::source::DocumentSource;
use super::state::{Command, Effect, Navigation, Phase, ViewerState};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(50);
pub const DEFAULT_SCALE: f32 = 1.5;
pub const DEFAULT_CACHE_SIZE: usize = 8;

/// Tunables for a viewer instance
#[derive(Clone, Debug, PartialEq)]
pub struct ViewerConfig {
    /// Quiet period after the last navigation request before rendering
    pub debounce: Duration,
    /// Initial render scale
    pub scale: f32,
    /// Give up on a document open after this long
    pub load_timeout: Option<Duration>,
    /// Give up on a single page render after this long
    pub render_timeout: Option<Duration>,
    /// Rasterized pages kept for quick revisits
    pub cache_size: usize,
    /// Largest viewport, in pixels, a render may allocate
    pub max_pixels: u64,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            scale: DEFAULT_SCALE,
            load_timeout: None,
            render_timeout: None,
            cache_size: DEFAULT_CACHE_SIZE,
            max_pixels: DEFAULT_MAX_PIXELS,
        }
    }
}

/// Notifications for the host UI
#[derive(Clone, Debug, PartialEq)]
pub enum ViewerEvent {
    /// A page finished rendering; carries the 0-based index for the text panel
    PageChanged(usize),
    /// A load or render failed. Cancellations are never reported.
    Error(ViewerError),
}

type PendingLoad = LocalBoxFuture<'static, Result<DocumentHandle, LoadError>>;

/// Owns the document, the renderer and the state machine of one viewer
pub struct ViewerController {
    config: ViewerConfig,
    backend: Rc<dyn DocumentBackend>,
    surface: SharedSurface,
    state: ViewerState,
    renderer: PageRenderer,
    document: Option<DocumentHandle>,
    pending_load: Option<PendingLoad>,
    active: Option<RenderTask>,
    debounce_until: Option<Instant>,
    render_deadline: Option<Instant>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ViewerEvent>,
    published: watch::Sender<ViewerState>,
}

impl ViewerController {
    /// Build a controller plus the host's handle and event stream.
    ///
    /// Nothing happens until [`run`](Self::run) is polled.
    pub fn new(
        backend: impl DocumentBackend + 'static,
        surface: SharedSurface,
        config: ViewerConfig,
    ) -> (Self, ViewerHandle, mpsc::UnboundedReceiver<ViewerEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let state = ViewerState::new(config.scale);
        let (published, state_rx) = watch::channel(state.clone());

        let controller = Self {
            renderer: PageRenderer::new(config.cache_size).with_pixel_limit(config.max_pixels),
            config,
            backend: Rc::new(backend),
            surface,
            state,
            document: None,
            pending_load: None,
            active: None,
            debounce_until: None,
            render_deadline: None,
            commands: command_rx,
            events: event_tx,
            published,
        };
        let handle = ViewerHandle {
            commands: command_tx,
            state: state_rx,
        };

        (controller, handle, event_rx)
    }

    /// Process commands until every [`ViewerHandle`] is dropped, then tear down
    pub async fn run(mut self) {
        info!("Viewer started");

        loop {
            tokio::select! {
                biased;

                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.dispatch(cmd),
                    None => break,
                },

                result = next_load(&mut self.pending_load) => {
                    self.pending_load = None;
                    self.finish_load(result);
                }

                outcome = next_render(&mut self.active) => {
                    self.render_deadline = None;
                    if let Some(task) = self.active.take() {
                        self.dispatch(Command::RenderFinished { page: task.page(), outcome });
                    }
                }

                () = sleep_until(self.render_deadline) => {
                    self.render_deadline = None;
                    self.expire_render();
                }

                () = sleep_until(self.debounce_until) => {
                    self.debounce_until = None;
                    self.dispatch(Command::DebounceElapsed);
                }
            }
        }

        self.dispatch(Command::Close);
        info!("Viewer stopped");
    }

    fn dispatch(&mut self, cmd: Command) {
        let mut queue = VecDeque::from([cmd]);
        while let Some(cmd) = queue.pop_front() {
            for effect in self.state.apply(cmd) {
                if let Some(follow_up) = self.execute(effect) {
                    queue.push_back(follow_up);
                }
            }
        }
        self.published.send_replace(self.state.clone());
    }

    fn execute(&mut self, effect: Effect) -> Option<Command> {
        match effect {
            Effect::CancelRender => {
                self.debounce_until = None;
                self.render_deadline = None;
                if let Some(task) = self.active.take() {
                    self.renderer.cancel(&task);
                }
                self.renderer.cancel_outstanding();
            }

            Effect::DestroyDocument => {
                if self.pending_load.take().is_some() {
                    debug!("Abandoning in-flight document load");
                }
                if let Some(document) = self.document.take() {
                    document.destroy();
                }
            }

            Effect::InvalidateCache => self.renderer.invalidate_cache(),

            Effect::OpenDocument(source) => {
                self.pending_load = Some(self.open_document(source));
            }

            Effect::ScheduleRender(page) => {
                debug!("Render of page {page} scheduled after {:?}", self.config.debounce);
                self.debounce_until = Some(Instant::now() + self.config.debounce);
            }

            Effect::Render(page) => {
                self.debounce_until = None;
                let Some(document) = &self.document else {
                    return Some(Command::RenderFinished {
                        page,
                        outcome: RenderOutcome::Failed(RenderError::new(
                            page.get(),
                            "no document is open",
                        )),
                    });
                };

                let scale = self.state.scale;
                match self
                    .renderer
                    .render(document, page, scale, Rc::clone(&self.surface))
                {
                    Ok(task) => {
                        self.render_deadline =
                            self.config.render_timeout.map(|limit| Instant::now() + limit);
                        self.active = Some(task);
                    }
                    Err(err) => {
                        return Some(Command::RenderFinished {
                            page,
                            outcome: RenderOutcome::Failed(err),
                        });
                    }
                }
            }

            Effect::NotifyPageChange(index) => {
                info!("Displaying page {}", index + 1);
                let _ = self.events.send(ViewerEvent::PageChanged(index));
            }

            Effect::ReportError(err) => {
                error!("Viewer error: {err}");
                let _ = self.events.send(ViewerEvent::Error(err));
            }
        }
        None
    }

    fn open_document(&self, source: DocumentSource) -> PendingLoad {
        let backend = Rc::clone(&self.backend);
        let timeout = self.config.load_timeout;

        async move {
            let open = DocumentHandle::open(backend.as_ref(), &source);
            match timeout {
                Some(limit) => tokio::time::timeout(limit, open)
                    .await
                    .unwrap_or_else(|_| Err(LoadError::TimedOut(limit))),
                None => open.await,
            }
        }
        .boxed_local()
    }

    fn finish_load(&mut self, result: Result<DocumentHandle, LoadError>) {
        match result {
            Ok(document) => {
                if self.state.phase != Phase::Loading {
                    document.destroy();
                    return;
                }
                let page_count = document.page_count();
                self.document = Some(document);
                self.dispatch(Command::Loaded { page_count });
            }
            Err(err) => self.dispatch(Command::LoadFailed(err)),
        }
    }

    fn expire_render(&mut self) {
        let Some(task) = self.active.take() else {
            return;
        };
        self.renderer.cancel(&task);

        let limit = self.config.render_timeout.unwrap_or_default();
        warn!("Render of page {} timed out after {limit:?}", task.page());
        let page = task.page();
        self.dispatch(Command::RenderFinished {
            page,
            outcome: RenderOutcome::Failed(RenderError::new(
                page.get(),
                format!("timed out after {limit:?}"),
            )),
        });
    }
}

impl Drop for ViewerController {
    fn drop(&mut self) {
        // Teardown never fails loudly
        if let Some(task) = self.active.take() {
            task.cancel();
        }
        self.pending_load = None;
        if let Some(document) = self.document.take() {
            document.destroy();
        }
    }
}

async fn next_load(slot: &mut Option<PendingLoad>) -> Result<DocumentHandle, LoadError> {
    match slot {
        Some(load) => load.await,
        None => std::future::pending().await,
    }
}

async fn next_render(slot: &mut Option<RenderTask>) -> RenderOutcome {
    match slot {
        Some(task) => task.await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Host-side handle to a running [`ViewerController`].
///
/// Dropping every handle tears the viewer down.
#[derive(Clone)]
pub struct ViewerHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ViewerState>,
}

impl ViewerHandle {
    pub fn open(&self, source: DocumentSource) {
        self.send(Command::Open(source));
    }

    /// Open a URL-style reference; invalid ones put the viewer in the error state
    pub fn open_reference(&self, reference: &str) {
        match DocumentSource::parse(reference) {
            Ok(source) => self.open(source),
            Err(err) => self.send(Command::Reject(err)),
        }
    }

    pub fn open_bytes(&self, bytes: Vec<u8>) {
        match DocumentSource::from_bytes(bytes) {
            Ok(source) => self.open(source),
            Err(err) => self.send(Command::Reject(err)),
        }
    }

    pub fn navigate(&self, navigation: Navigation) {
        self.send(Command::Navigate(navigation));
    }

    /// Go to a 1-based document page
    pub fn go_to_page(&self, page: usize) {
        self.navigate(Navigation::Page(page));
    }

    /// Go to the page matching a 0-based text panel index
    pub fn go_to_text_page(&self, index: usize) {
        self.navigate(Navigation::External(index));
    }

    pub fn next_page(&self) {
        self.navigate(Navigation::Next);
    }

    pub fn previous_page(&self) {
        self.navigate(Navigation::Previous);
    }

    pub fn first_page(&self) {
        self.navigate(Navigation::First);
    }

    pub fn last_page(&self) {
        self.navigate(Navigation::Last);
    }

    pub fn set_scale(&self, scale: f32) {
        self.send(Command::SetScale(scale));
    }

    pub fn retry(&self) {
        self.send(Command::Retry);
    }

    /// Drop the current document and return to idle
    pub fn close(&self) {
        self.send(Command::Close);
    }

    /// Latest published state
    #[must_use]
    pub fn state(&self) -> ViewerState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ViewerState> {
        self.state.clone()
    }

    /// Wait until the published state satisfies `predicate`.
    /// Returns `None` once the viewer has stopped.
    pub async fn wait_for(
        &mut self,
        predicate: impl FnMut(&ViewerState) -> bool,
    ) -> Option<ViewerState> {
        self.state.wait_for(predicate).await.ok().map(|s| s.clone())
    }

    fn send(&self, cmd: Command) {
        if self.commands.send(cmd).is_err() {
            warn!("Viewer is not running; command dropped");
        }
    }
}
