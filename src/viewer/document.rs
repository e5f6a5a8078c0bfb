//! Owned handle over an opened document

use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, info};

use super::backend::{BackendDocument, BackendPage, DocumentBackend};
use super::error::{BackendError, LoadError};
use super::pagination::PageIndex;
use super::source::DocumentSource;

/// An opened document owned by exactly one viewer.
///
/// The handle is `!Send` and only the viewer crate can duplicate it, so an
/// open document never escapes the viewer that loaded it. The backend
/// document is closed once, on the first [`destroy`](Self::destroy) or when
/// the last reference drops.
pub struct DocumentHandle {
    inner: Rc<HandleInner>,
}

struct HandleInner {
    page_count: usize,
    label: String,
    document: RefCell<Option<Rc<dyn BackendDocument>>>,
}

impl DocumentHandle {
    /// Open a validated source through the backend
    pub async fn open(
        backend: &dyn DocumentBackend,
        source: &DocumentSource,
    ) -> Result<Self, LoadError> {
        let label = format!("{source:?}");
        info!("Opening document from {label}");

        let document = backend
            .open(source)
            .await
            .map_err(|e| LoadError::BackendFailure(e.to_string()))?;

        let page_count = document.page_count();
        if page_count == 0 {
            document.close();
            return Err(LoadError::BackendFailure(
                "document has no pages".to_string(),
            ));
        }

        info!("Opened {label}: {page_count} pages");
        Ok(Self {
            inner: Rc::new(HandleInner {
                page_count,
                label,
                document: RefCell::new(Some(Rc::from(document))),
            }),
        })
    }

    /// Validate a raw reference, then open it.
    ///
    /// Invalid references fail with [`LoadError::InvalidSource`] before the
    /// backend is consulted.
    pub async fn open_reference(
        backend: &dyn DocumentBackend,
        reference: &str,
    ) -> Result<Self, LoadError> {
        let source = DocumentSource::parse(reference)?;
        Self::open(backend, &source).await
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.inner.page_count
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.document.borrow().is_none()
    }

    /// Fetch a page; fails on destroyed handles and out-of-range pages
    pub async fn get_page(&self, page: PageIndex) -> Result<Box<dyn BackendPage>, BackendError> {
        // Clone out so no RefCell borrow is held across the await
        let document = self
            .inner
            .document
            .borrow()
            .clone()
            .ok_or(BackendError::Destroyed)?;

        if page.get() > self.inner.page_count {
            return Err(BackendError::PageOutOfRange {
                page: page.get(),
                page_count: self.inner.page_count,
            });
        }

        document.load_page(page.to_external()).await
    }

    /// Release the backend document. Safe to call repeatedly.
    pub fn destroy(&self) {
        self.inner.release();
    }

    pub(crate) fn share(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl HandleInner {
    fn release(&self) {
        let taken = self.document.borrow_mut().take();
        if let Some(document) = taken {
            debug!("Destroying document {}", self.label);
            document.close();
        }
    }
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for DocumentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentHandle")
            .field("source", &self.inner.label)
            .field("page_count", &self.inner.page_count)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeBackend;

    fn page(n: usize) -> PageIndex {
        PageIndex::new(n).unwrap()
    }

    #[tokio::test]
    async fn open_reports_page_count() {
        let backend = FakeBackend::new(3);
        let handle = DocumentHandle::open(&backend, &FakeBackend::source())
            .await
            .unwrap();
        assert_eq!(handle.page_count(), 3);
        assert!(!handle.is_destroyed());
        assert!(handle.get_page(page(3)).await.is_ok());
    }

    #[tokio::test]
    async fn invalid_reference_never_reaches_backend() {
        let backend = FakeBackend::new(3);
        let err = DocumentHandle::open_reference(&backend, "ftp://example.com/a.pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::InvalidSource { .. }));
        assert_eq!(backend.open_calls(), 0);
    }

    #[tokio::test]
    async fn corrupt_bytes_are_backend_failures() {
        let backend = FakeBackend::new(3);
        let source = DocumentSource::from_bytes(b"garbage".to_vec()).unwrap();
        let err = DocumentHandle::open(&backend, &source).await.unwrap_err();
        assert!(matches!(err, LoadError::BackendFailure(_)));
    }

    #[tokio::test]
    async fn empty_documents_are_rejected_and_closed() {
        let backend = FakeBackend::new(0);
        let err = DocumentHandle::open(&backend, &FakeBackend::source())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LoadError::BackendFailure("document has no pages".to_string())
        );
        assert_eq!(backend.close_calls(), 1);
    }

    #[tokio::test]
    async fn get_page_after_destroy_fails() {
        let backend = FakeBackend::new(2);
        let handle = DocumentHandle::open(&backend, &FakeBackend::source())
            .await
            .unwrap();

        handle.destroy();
        handle.destroy();

        assert!(handle.is_destroyed());
        assert_eq!(backend.close_calls(), 1);
        assert!(matches!(
            handle.get_page(page(1)).await,
            Err(BackendError::Destroyed)
        ));
    }

    #[tokio::test]
    async fn out_of_range_page_fails() {
        let backend = FakeBackend::new(2);
        let handle = DocumentHandle::open(&backend, &FakeBackend::source())
            .await
            .unwrap();
        assert!(matches!(
            handle.get_page(page(3)).await,
            Err(BackendError::PageOutOfRange {
                page: 3,
                page_count: 2
            })
        ));
    }

    #[tokio::test]
    async fn dropping_last_reference_closes_document() {
        let backend = FakeBackend::new(2);
        let handle = DocumentHandle::open(&backend, &FakeBackend::source())
            .await
            .unwrap();
        let shared = handle.share();

        drop(handle);
        assert_eq!(backend.close_calls(), 0);
        assert!(!shared.is_destroyed());

        drop(shared);
        assert_eq!(backend.close_calls(), 1);
    }
}
