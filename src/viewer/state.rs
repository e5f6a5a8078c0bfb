//! Viewer state machine
//!
//! `ViewerState::apply` is pure: it updates the state and returns the
//! effects the controller must carry out. All timing, I/O and cancellation
//! live in [`ViewerController`](super::ViewerController).

use log::{debug, info, warn};

use super::error::{LoadError, ViewerError};
use super::pagination::{PageIndex, PaginationCoordinator};
use super::render::RenderOutcome;
use super::source::DocumentSource;

/// Lifecycle phase of a viewer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    Loading,
    Ready,
    Rendering,
    Error,
}

/// Where a navigation request wants to go
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Navigation {
    First,
    Last,
    Next,
    Previous,
    /// 1-based document page; out-of-range values are clamped
    Page(usize),
    /// 0-based index from the OCR text side
    External(usize),
}

/// Current viewer state, published to the host after every change
#[derive(Clone, Debug, PartialEq)]
pub struct ViewerState {
    pub phase: Phase,

    /// True while a load or render is outstanding
    pub loading: bool,

    pub error: Option<ViewerError>,

    /// Last page presented; `None` exactly when no document is loaded
    pub current_page: Option<PageIndex>,

    /// Latest requested page that has not been presented yet
    pub pending_page: Option<PageIndex>,

    /// Scale factor used for rendering
    pub scale: f32,

    /// Most recently accepted source, kept for retries
    pub source: Option<DocumentSource>,

    /// Page bounds of the loaded document
    pub pagination: Option<PaginationCoordinator>,
}

impl ViewerState {
    #[must_use]
    pub fn new(scale: f32) -> Self {
        Self {
            phase: Phase::Idle,
            loading: false,
            error: None,
            current_page: None,
            pending_page: None,
            scale,
            source: None,
            pagination: None,
        }
    }

    #[must_use]
    pub fn page_count(&self) -> Option<usize> {
        self.pagination.map(|p| p.page_count())
    }

    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }

    /// 0-based index of the displayed page, for the text panel
    #[must_use]
    pub fn current_external(&self) -> Option<usize> {
        self.current_page.map(PageIndex::to_external)
    }

    /// Page indicator such as `3 of 10`
    #[must_use]
    pub fn page_label(&self) -> Option<String> {
        Some(self.pagination?.label(self.current_page?))
    }

    /// True once a load or render has settled
    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(self.phase, Phase::Idle | Phase::Ready | Phase::Error)
    }

    /// Apply a command and return resulting effects
    #[must_use]
    pub fn apply(&mut self, cmd: Command) -> Vec<Effect> {
        match cmd {
            Command::Open(source) => {
                info!("Opening {source:?}");
                self.reset();
                self.source = Some(source.clone());
                self.set_phase(Phase::Loading);
                vec![
                    Effect::CancelRender,
                    Effect::DestroyDocument,
                    Effect::InvalidateCache,
                    Effect::OpenDocument(source),
                ]
            }

            Command::Reject(err) => {
                warn!("Rejected document source: {err}");
                self.reset();
                self.source = None;
                let err = ViewerError::Load(err);
                self.error = Some(err.clone());
                self.set_phase(Phase::Error);
                vec![
                    Effect::CancelRender,
                    Effect::DestroyDocument,
                    Effect::InvalidateCache,
                    Effect::ReportError(err),
                ]
            }

            Command::Loaded { page_count } => {
                if self.phase != Phase::Loading {
                    debug!("Ignoring load completion in phase {:?}", self.phase);
                    return vec![];
                }
                let Some(pages) = PaginationCoordinator::new(page_count) else {
                    return self.apply(Command::LoadFailed(LoadError::BackendFailure(
                        "document has no pages".to_string(),
                    )));
                };

                let first = pages.first();
                self.pagination = Some(pages);
                self.current_page = Some(first);
                self.pending_page = Some(first);
                self.set_phase(Phase::Rendering);
                vec![Effect::Render(first)]
            }

            Command::LoadFailed(err) => {
                if self.phase != Phase::Loading {
                    debug!("Ignoring load failure in phase {:?}: {err}", self.phase);
                    return vec![];
                }
                let err = ViewerError::Load(err);
                self.reset();
                self.error = Some(err.clone());
                self.set_phase(Phase::Error);
                vec![Effect::ReportError(err)]
            }

            Command::Navigate(nav) => {
                let Some(pages) = self.pagination else {
                    warn!("Ignoring navigation {nav:?}: no document loaded");
                    return vec![];
                };

                let target = self.resolve(&pages, nav);
                let unchanged = match self.pending_page {
                    Some(pending) => pending == target,
                    None => self.phase == Phase::Ready && self.current_page == Some(target),
                };
                if unchanged {
                    return vec![];
                }

                self.pending_page = Some(target);
                self.set_phase(Phase::Rendering);
                vec![Effect::CancelRender, Effect::ScheduleRender(target)]
            }

            Command::DebounceElapsed => match self.pending_page {
                Some(page) if self.pagination.is_some() => vec![Effect::Render(page)],
                _ => vec![],
            },

            Command::RenderFinished { page, outcome } => {
                if self.pending_page != Some(page) {
                    debug!("Discarding stale completion for page {page}");
                    return vec![];
                }
                self.pending_page = None;

                match outcome {
                    RenderOutcome::Success => {
                        self.current_page = Some(page);
                        self.error = None;
                        self.set_phase(Phase::Ready);
                        vec![Effect::NotifyPageChange(page.to_external())]
                    }
                    RenderOutcome::Cancelled => {
                        let phase = if self.error.is_some() {
                            Phase::Error
                        } else {
                            Phase::Ready
                        };
                        self.set_phase(phase);
                        vec![]
                    }
                    RenderOutcome::Failed(err) => {
                        let err = ViewerError::Render(err);
                        self.error = Some(err.clone());
                        self.set_phase(Phase::Error);
                        vec![Effect::ReportError(err)]
                    }
                }
            }

            Command::SetScale(scale) => {
                if !scale.is_finite() || scale <= 0.0 {
                    warn!("Ignoring invalid scale {scale}");
                    return vec![];
                }
                if (self.scale - scale).abs() <= f32::EPSILON {
                    return vec![];
                }
                self.scale = scale;

                if self.pagination.is_none() {
                    return vec![];
                }
                let Some(target) = self.pending_page.or(self.current_page) else {
                    return vec![];
                };
                self.pending_page = Some(target);
                self.set_phase(Phase::Rendering);
                vec![Effect::CancelRender, Effect::ScheduleRender(target)]
            }

            Command::Retry => {
                if self.phase != Phase::Error {
                    return vec![];
                }
                match (&self.error, &self.source, self.pagination) {
                    (Some(ViewerError::Render(_)), _, Some(_)) => {
                        let target = self.current_page.unwrap_or(PageIndex::FIRST);
                        info!("Retrying render of page {target}");
                        self.pending_page = Some(target);
                        self.set_phase(Phase::Rendering);
                        vec![Effect::Render(target)]
                    }
                    (Some(ViewerError::Load(_)), Some(source), _) => {
                        let source = source.clone();
                        self.apply(Command::Open(source))
                    }
                    _ => vec![],
                }
            }

            Command::Close => {
                self.reset();
                self.source = None;
                self.set_phase(Phase::Idle);
                vec![
                    Effect::CancelRender,
                    Effect::DestroyDocument,
                    Effect::InvalidateCache,
                ]
            }
        }
    }

    fn resolve(&self, pages: &PaginationCoordinator, nav: Navigation) -> PageIndex {
        let base = self
            .pending_page
            .or(self.current_page)
            .unwrap_or(PageIndex::FIRST);

        match nav {
            Navigation::First => pages.first(),
            Navigation::Last => pages.last(),
            Navigation::Next => pages.next(base),
            Navigation::Previous => pages.previous(base),
            Navigation::Page(page) => {
                let target = pages.clamp(page);
                if target.get() != page {
                    warn!("Page {page} is out of range, clamped to {target}");
                }
                target
            }
            Navigation::External(index) => pages.to_internal(index),
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.loading = matches!(phase, Phase::Loading | Phase::Rendering);
    }

    fn reset(&mut self) {
        self.error = None;
        self.current_page = None;
        self.pending_page = None;
        self.pagination = None;
    }
}

/// Inputs to the viewer state machine
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Load a new document, replacing any current one
    Open(DocumentSource),
    /// A source failed validation before reaching the backend
    Reject(LoadError),
    /// The backend opened the document
    Loaded { page_count: usize },
    /// The backend could not open the document
    LoadFailed(LoadError),
    /// Go somewhere; the single entry point for both sides
    Navigate(Navigation),
    /// The debounce window closed
    DebounceElapsed,
    /// The active render task finished
    RenderFinished {
        page: PageIndex,
        outcome: RenderOutcome,
    },
    /// Change the render scale
    SetScale(f32),
    /// Recover from the error state
    Retry,
    /// Tear down and return to idle
    Close,
}

/// Effects produced by state changes
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// Cancel and drop the in-flight render task
    CancelRender,
    /// Destroy the current document handle and abandon any pending load
    DestroyDocument,
    /// Drop cached rasters
    InvalidateCache,
    /// Start opening a source
    OpenDocument(DocumentSource),
    /// Render after the debounce window
    ScheduleRender(PageIndex),
    /// Render now
    Render(PageIndex),
    /// Tell the host which 0-based page is displayed
    NotifyPageChange(usize),
    /// Surface an error to the host
    ReportError(ViewerError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::viewer::error::RenderError;

    fn page(n: usize) -> PageIndex {
        PageIndex::new(n).unwrap()
    }

    fn source() -> DocumentSource {
        DocumentSource::from_bytes(b"%PDF-test".to_vec()).unwrap()
    }

    fn loaded_state(pages: usize) -> ViewerState {
        let mut state = ViewerState::new(1.0);
        let _ = state.apply(Command::Open(source()));
        let _ = state.apply(Command::Loaded { page_count: pages });
        let _ = state.apply(Command::RenderFinished {
            page: page(1),
            outcome: RenderOutcome::Success,
        });
        state
    }

    #[test]
    fn open_enters_loading() {
        let mut state = ViewerState::new(1.0);
        let effects = state.apply(Command::Open(source()));

        assert_eq!(state.phase, Phase::Loading);
        assert!(state.loading);
        assert_eq!(state.current_page, None);
        assert_eq!(state.page_count(), None);
        assert_eq!(
            effects,
            vec![
                Effect::CancelRender,
                Effect::DestroyDocument,
                Effect::InvalidateCache,
                Effect::OpenDocument(source()),
            ]
        );
    }

    #[test]
    fn loaded_renders_first_page_immediately() {
        let mut state = ViewerState::new(1.0);
        let _ = state.apply(Command::Open(source()));
        let effects = state.apply(Command::Loaded { page_count: 3 });

        assert_eq!(state.phase, Phase::Rendering);
        assert_eq!(state.current_page, Some(page(1)));
        assert_eq!(state.page_count(), Some(3));
        assert_eq!(effects, vec![Effect::Render(page(1))]);
    }

    #[test]
    fn first_render_notifies_external_zero() {
        let mut state = ViewerState::new(1.0);
        let _ = state.apply(Command::Open(source()));
        let _ = state.apply(Command::Loaded { page_count: 3 });
        let effects = state.apply(Command::RenderFinished {
            page: page(1),
            outcome: RenderOutcome::Success,
        });

        assert_eq!(state.phase, Phase::Ready);
        assert!(!state.loading);
        assert_eq!(effects, vec![Effect::NotifyPageChange(0)]);
        assert_eq!(state.page_label().as_deref(), Some("1 of 3"));
    }

    #[test]
    fn load_failure_leaves_page_count_unset() {
        let mut state = ViewerState::new(1.0);
        let _ = state.apply(Command::Open(source()));
        let err = LoadError::BackendFailure("corrupt".to_string());
        let effects = state.apply(Command::LoadFailed(err.clone()));

        assert_eq!(state.phase, Phase::Error);
        assert_eq!(state.page_count(), None);
        assert_eq!(state.current_page, None);
        assert_eq!(
            state.error_message().as_deref(),
            Some("failed to open document: corrupt")
        );
        assert_eq!(effects, vec![Effect::ReportError(ViewerError::Load(err))]);
    }

    #[test]
    fn loaded_with_zero_pages_is_failure() {
        let mut state = ViewerState::new(1.0);
        let _ = state.apply(Command::Open(source()));
        let effects = state.apply(Command::Loaded { page_count: 0 });
        assert_eq!(state.phase, Phase::Error);
        assert!(matches!(effects.as_slice(), [Effect::ReportError(_)]));
    }

    #[test]
    fn stale_load_results_ignored() {
        let mut state = loaded_state(3);
        assert!(state.apply(Command::Loaded { page_count: 9 }).is_empty());
        assert!(
            state
                .apply(Command::LoadFailed(LoadError::BackendFailure("x".into())))
                .is_empty()
        );
        assert_eq!(state.page_count(), Some(3));
    }

    #[test]
    fn rejected_source_is_error_without_document() {
        let mut state = loaded_state(3);
        let effects = state.apply(Command::Reject(LoadError::invalid("ftp")));

        assert_eq!(state.phase, Phase::Error);
        assert_eq!(state.current_page, None);
        assert_eq!(state.page_count(), None);
        assert!(effects.contains(&Effect::DestroyDocument));
    }

    #[test]
    fn navigation_without_document_is_rejected() {
        let mut state = ViewerState::new(1.0);
        assert!(state.apply(Command::Navigate(Navigation::Next)).is_empty());
        assert_eq!(state.phase, Phase::Idle);

        let _ = state.apply(Command::Open(source()));
        assert!(state.apply(Command::Navigate(Navigation::Page(2))).is_empty());
        assert_eq!(state.phase, Phase::Loading);
    }

    #[test]
    fn navigation_schedules_debounced_render() {
        let mut state = loaded_state(5);
        let effects = state.apply(Command::Navigate(Navigation::Page(3)));

        assert_eq!(state.phase, Phase::Rendering);
        assert_eq!(state.pending_page, Some(page(3)));
        assert_eq!(state.current_page, Some(page(1)));
        assert_eq!(
            effects,
            vec![Effect::CancelRender, Effect::ScheduleRender(page(3))]
        );

        let effects = state.apply(Command::DebounceElapsed);
        assert_eq!(effects, vec![Effect::Render(page(3))]);
    }

    #[test]
    fn rapid_next_presses_accumulate_from_pending() {
        let mut state = loaded_state(5);
        for _ in 0..3 {
            let _ = state.apply(Command::Navigate(Navigation::Next));
        }
        assert_eq!(state.pending_page, Some(page(4)));
        assert_eq!(state.apply(Command::DebounceElapsed), vec![Effect::Render(page(4))]);
    }

    #[test]
    fn navigation_clamps_to_document() {
        let mut state = loaded_state(3);
        let _ = state.apply(Command::Navigate(Navigation::Page(99)));
        assert_eq!(state.pending_page, Some(page(3)));

        let mut state = loaded_state(3);
        let _ = state.apply(Command::Navigate(Navigation::External(4)));
        assert_eq!(state.pending_page, Some(page(3)));

        let mut state = loaded_state(3);
        assert!(state.apply(Command::Navigate(Navigation::Previous)).is_empty());
        assert!(state.apply(Command::Navigate(Navigation::Page(0))).is_empty());
        assert_eq!(state.phase, Phase::Ready);
    }

    #[test]
    fn navigating_to_displayed_page_is_noop() {
        let mut state = loaded_state(3);
        assert!(state.apply(Command::Navigate(Navigation::First)).is_empty());
        assert!(state.apply(Command::Navigate(Navigation::External(0))).is_empty());
    }

    #[test]
    fn repeating_in_flight_target_keeps_render() {
        let mut state = loaded_state(3);
        let _ = state.apply(Command::Navigate(Navigation::Page(2)));
        assert_eq!(state.apply(Command::DebounceElapsed), vec![Effect::Render(page(2))]);

        assert!(state.apply(Command::Navigate(Navigation::Page(2))).is_empty());
        assert!(state.apply(Command::Navigate(Navigation::External(1))).is_empty());
        assert_eq!(state.pending_page, Some(page(2)));
        assert_eq!(state.phase, Phase::Rendering);

        let effects = state.apply(Command::RenderFinished {
            page: page(2),
            outcome: RenderOutcome::Success,
        });
        assert_eq!(effects, vec![Effect::NotifyPageChange(1)]);
        assert_eq!(state.current_page, Some(page(2)));
    }

    #[test]
    fn navigating_back_to_displayed_page_while_pending() {
        let mut state = loaded_state(3);
        let _ = state.apply(Command::Navigate(Navigation::Page(2)));
        let effects = state.apply(Command::Navigate(Navigation::Page(1)));
        assert_eq!(
            effects,
            vec![Effect::CancelRender, Effect::ScheduleRender(page(1))]
        );
    }

    #[test]
    fn render_success_updates_page_and_clears_error() {
        let mut state = loaded_state(3);
        let _ = state.apply(Command::Navigate(Navigation::Page(2)));
        let _ = state.apply(Command::RenderFinished {
            page: page(2),
            outcome: RenderOutcome::Failed(RenderError::new(2, "boom")),
        });
        assert_eq!(state.phase, Phase::Error);
        assert_eq!(state.current_page, Some(page(1)));

        let _ = state.apply(Command::Navigate(Navigation::Page(3)));
        let effects = state.apply(Command::RenderFinished {
            page: page(3),
            outcome: RenderOutcome::Success,
        });
        assert_eq!(state.phase, Phase::Ready);
        assert_eq!(state.error, None);
        assert_eq!(state.current_page, Some(page(3)));
        assert_eq!(effects, vec![Effect::NotifyPageChange(2)]);
    }

    #[test]
    fn cancelled_render_is_not_an_error() {
        let mut state = loaded_state(3);
        let _ = state.apply(Command::Navigate(Navigation::Page(2)));
        let effects = state.apply(Command::RenderFinished {
            page: page(2),
            outcome: RenderOutcome::Cancelled,
        });

        assert!(effects.is_empty());
        assert_eq!(state.phase, Phase::Ready);
        assert_eq!(state.error, None);
        assert_eq!(state.current_page, Some(page(1)));
    }

    #[test]
    fn superseded_completion_is_discarded() {
        let mut state = loaded_state(5);
        let _ = state.apply(Command::Navigate(Navigation::Page(2)));
        let _ = state.apply(Command::Navigate(Navigation::Page(4)));

        let effects = state.apply(Command::RenderFinished {
            page: page(2),
            outcome: RenderOutcome::Success,
        });
        assert!(effects.is_empty());
        assert_eq!(state.current_page, Some(page(1)));
        assert_eq!(state.pending_page, Some(page(4)));
    }

    #[test]
    fn retry_after_render_error_rerenders_current() {
        let mut state = loaded_state(3);
        let _ = state.apply(Command::Navigate(Navigation::Page(2)));
        let _ = state.apply(Command::RenderFinished {
            page: page(2),
            outcome: RenderOutcome::Failed(RenderError::new(2, "boom")),
        });

        let effects = state.apply(Command::Retry);
        assert_eq!(effects, vec![Effect::Render(page(1))]);
        assert_eq!(state.phase, Phase::Rendering);
    }

    #[test]
    fn retry_after_load_error_reopens_source() {
        let mut state = ViewerState::new(1.0);
        let _ = state.apply(Command::Open(source()));
        let _ = state.apply(Command::LoadFailed(LoadError::BackendFailure("x".into())));

        let effects = state.apply(Command::Retry);
        assert_eq!(state.phase, Phase::Loading);
        assert_eq!(effects.last(), Some(&Effect::OpenDocument(source())));
    }

    #[test]
    fn retry_outside_error_is_noop() {
        let mut state = loaded_state(3);
        assert!(state.apply(Command::Retry).is_empty());

        let mut state = ViewerState::new(1.0);
        let _ = state.apply(Command::Reject(LoadError::invalid("bad")));
        assert!(state.apply(Command::Retry).is_empty());
    }

    #[test]
    fn set_scale_rerenders_current_page() {
        let mut state = loaded_state(3);
        let effects = state.apply(Command::SetScale(2.0));
        assert_eq!(state.scale, 2.0);
        assert_eq!(
            effects,
            vec![Effect::CancelRender, Effect::ScheduleRender(page(1))]
        );

        assert!(state.apply(Command::SetScale(2.0)).is_empty());
        assert!(state.apply(Command::SetScale(0.0)).is_empty());
        assert!(state.apply(Command::SetScale(f32::INFINITY)).is_empty());
    }

    #[test]
    fn set_scale_without_document_only_records() {
        let mut state = ViewerState::new(1.0);
        assert!(state.apply(Command::SetScale(3.0)).is_empty());
        assert_eq!(state.scale, 3.0);
    }

    #[test]
    fn close_returns_to_idle() {
        let mut state = loaded_state(3);
        let effects = state.apply(Command::Close);

        assert_eq!(state.phase, Phase::Idle);
        assert_eq!(state.current_page, None);
        assert_eq!(state.page_count(), None);
        assert_eq!(state.source, None);
        assert_eq!(
            effects,
            vec![
                Effect::CancelRender,
                Effect::DestroyDocument,
                Effect::InvalidateCache,
            ]
        );
    }
}
