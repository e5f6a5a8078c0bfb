//! Error taxonomy for loading and rendering

use std::time::Duration;

/// Failure to turn a source into an open document
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("invalid document source: {reason}")]
    InvalidSource { reason: String },

    #[error("failed to open document: {0}")]
    BackendFailure(String),

    #[error("document load timed out after {0:?}")]
    TimedOut(Duration),
}

impl LoadError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidSource {
            reason: reason.into(),
        }
    }
}

/// Non-cancellation failure while drawing a page
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("failed to render page {page}: {detail}")]
pub struct RenderError {
    pub page: usize,
    pub detail: String,
}

impl RenderError {
    pub fn new(page: usize, detail: impl Into<String>) -> Self {
        Self {
            page,
            detail: detail.into(),
        }
    }
}

/// Errors reported by a document backend
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[cfg(feature = "pdf")]
    #[error("PDF engine: {0}")]
    Pdf(#[from] mupdf::error::Error),

    #[cfg(feature = "pdf")]
    #[error("download failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend observed the cancel flag and stopped early
    #[error("operation cancelled")]
    Cancelled,

    #[error("document has been destroyed")]
    Destroyed,

    #[error("page {page} is out of range (document has {page_count} pages)")]
    PageOutOfRange { page: usize, page_count: usize },

    #[error("unsupported source: {0}")]
    Unsupported(String),

    #[error("{detail}")]
    Generic { detail: String },
}

impl BackendError {
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic { detail: msg.into() }
    }

    /// Whether this error reports a cancellation rather than a failure.
    ///
    /// Only consulted after the task's own cancel flag. Matching on the
    /// message of a generic error is a fallback for backends that cannot
    /// report cancellation through [`BackendError::Cancelled`].
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Generic { detail } => {
                let lower = detail.to_ascii_lowercase();
                lower.contains("cancelled") || lower.contains("canceled")
            }
            _ => false,
        }
    }
}

/// Error surfaced to the host through [`ViewerState`](super::ViewerState)
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ViewerError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Render(#[from] RenderError),
}

impl ViewerError {
    /// Load failures can be retried by reopening the source
    #[must_use]
    pub fn is_load(&self) -> bool {
        matches!(self, Self::Load(_))
    }
}
