use std::cell::RefCell;

use async_trait::async_trait;
use log::{debug, info};
use mupdf::{Colorspace, Document, Matrix, Page};

use crate::viewer::{
    BackendDocument, BackendError, BackendPage, CancelFlag, DocumentBackend, DocumentSource,
    PageSize, Pixmap, SourceKind, Viewport,
};

/// Opens documents with MuPDF.
///
/// In-memory and `data:` sources open directly and `http(s)` sources are
/// downloaded first. Object URLs only resolve inside the page that minted
/// them, so they report [`BackendError::Unsupported`].
#[derive(Clone, Debug, Default)]
pub struct MupdfBackend {
    http: reqwest::Client,
}

impl MupdfBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured client for `http(s)` sources
    #[must_use]
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, BackendError> {
        debug!("Fetching {url}");
        let response = self.http.get(url).send().await?.error_for_status()?;
        let body = response.bytes().await?;
        info!("Fetched {} bytes from {url}", body.len());
        Ok(body.to_vec())
    }
}

#[async_trait(?Send)]
impl DocumentBackend for MupdfBackend {
    async fn open(&self, source: &DocumentSource) -> Result<Box<dyn BackendDocument>, BackendError> {
        let fetched;
        let bytes = match (source.kind(), source.bytes(), source.url()) {
            (_, Some(bytes), _) => bytes,
            (SourceKind::HttpUrl, None, Some(url)) => {
                fetched = self.fetch(url).await?;
                fetched.as_slice()
            }
            _ => {
                return Err(BackendError::Unsupported(format!(
                    "{} sources must be fetched by the host",
                    source.kind()
                )));
            }
        };

        let doc = Document::from_bytes(bytes, source.media_type())?;
        let page_count = doc.page_count()?;
        let page_count = usize::try_from(page_count)
            .map_err(|_| BackendError::generic(format!("invalid page count {page_count}")))?;

        info!("MuPDF opened {} bytes, {page_count} pages", bytes.len());
        Ok(Box::new(MupdfDocument {
            page_count,
            document: RefCell::new(Some(doc)),
        }))
    }
}

struct MupdfDocument {
    page_count: usize,
    document: RefCell<Option<Document>>,
}

#[async_trait(?Send)]
impl BackendDocument for MupdfDocument {
    fn page_count(&self) -> usize {
        self.page_count
    }

    async fn load_page(&self, index: usize) -> Result<Box<dyn BackendPage>, BackendError> {
        let document = self.document.borrow();
        let Some(doc) = document.as_ref() else {
            return Err(BackendError::Destroyed);
        };
        if index >= self.page_count {
            return Err(BackendError::PageOutOfRange {
                page: index + 1,
                page_count: self.page_count,
            });
        }

        let page = doc.load_page(index as i32)?;
        let bounds = page.bounds()?;
        let size = PageSize::new(bounds.x1 - bounds.x0, bounds.y1 - bounds.y0);
        Ok(Box::new(MupdfPage { page, size }))
    }

    fn close(&self) {
        if self.document.borrow_mut().take().is_some() {
            debug!("MuPDF document released");
        }
    }
}

struct MupdfPage {
    page: Page,
    size: PageSize,
}

#[async_trait(?Send)]
impl BackendPage for MupdfPage {
    fn size(&self) -> PageSize {
        self.size
    }

    async fn draw(&self, viewport: Viewport, cancel: &CancelFlag) -> Result<Pixmap, BackendError> {
        // MuPDF draws synchronously; give a pending cancel a chance to land first
        tokio::task::yield_now().await;
        if cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }

        let transform = Matrix::new_scale(viewport.scale, viewport.scale);
        let rgb = Colorspace::device_rgb();
        let pixmap = self.page.to_pixmap(&transform, &rgb, false, false)?;
        pixmap_to_rgba(&pixmap)
    }
}

/// Convert a MuPDF pixmap (RGB or RGBA, possibly padded) into packed RGBA8
pub fn pixmap_to_rgba(pixmap: &mupdf::Pixmap) -> Result<Pixmap, BackendError> {
    pack_rgba(
        pixmap.n() as usize,
        pixmap.width(),
        pixmap.height(),
        pixmap.stride() as usize,
        pixmap.samples(),
    )
}

fn pack_rgba(
    n: usize,
    width: u32,
    height: u32,
    stride: usize,
    samples: &[u8],
) -> Result<Pixmap, BackendError> {
    if n < 3 {
        return Err(BackendError::generic(format!(
            "Unsupported pixmap format: {n} channels"
        )));
    }

    let w = width as usize;
    let h = height as usize;
    let row_bytes = w * n;
    if samples.len() < stride.saturating_mul(h) || row_bytes > stride {
        return Err(BackendError::generic("Pixmap buffer size mismatch"));
    }

    let mut pixels = Vec::with_capacity(w * h * 4);
    for y in 0..h {
        let row_start = y * stride;
        let row = &samples[row_start..row_start + row_bytes];
        for px in row.chunks_exact(n) {
            pixels.extend_from_slice(&px[..3]);
            pixels.push(if n >= 4 { px[3] } else { 255 });
        }
    }

    Ok(Pixmap {
        width,
        height,
        pixels,
    })
}
