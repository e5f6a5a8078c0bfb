//! Document viewer core
//!
//! A viewer opens a document from a URL reference or an in-memory buffer,
//! renders one page at a time onto a host [`Surface`] and keeps the page
//! shown in step with an OCR text panel that counts pages from zero.
//!
//! Navigation requests are debounced, superseded renders are cancelled and
//! every failure other than a cancellation ends up in [`ViewerState::error`].

mod backend;
mod cache;
mod controller;
mod document;
mod error;
mod pagination;
mod render;
mod source;
mod state;
mod surface;

pub use backend::{
    BackendDocument, BackendPage, DEFAULT_MAX_PIXELS, DocumentBackend, PageSize, Pixmap, Viewport,
    rgba_len,
};
pub use cache::{CacheKey, PageCache};
pub use controller::{
    DEFAULT_CACHE_SIZE, DEFAULT_DEBOUNCE, DEFAULT_SCALE, ViewerConfig, ViewerController,
    ViewerEvent, ViewerHandle,
};
pub use document::DocumentHandle;
pub use error::{BackendError, LoadError, RenderError, ViewerError};
pub use pagination::{PageIndex, PageTextSequence, PaginationCoordinator};
pub use render::{CancelFlag, PageRenderer, RenderOutcome, RenderTask, RequestId, SharedSurface};
pub use source::{DocumentSource, SourceKind};
pub use state::{Command, Effect, Navigation, Phase, ViewerState};
pub use surface::{CLEAR_COLOR, PixelSurface, Surface};
