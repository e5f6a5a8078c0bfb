//! Page numbering shared by the document view and the OCR text panel
//!
//! The document counts pages from 1. The OCR text store is an independent
//! 0-based sequence whose length may not match the document. Every
//! conversion between the two goes through this module, and navigation is
//! always bounded by the document's page count.

use std::fmt;
use std::num::NonZeroUsize;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// 1-based page number on the document side
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageIndex(NonZeroUsize);

impl PageIndex {
    pub const FIRST: PageIndex = PageIndex(NonZeroUsize::MIN);

    /// `None` for 0
    #[must_use]
    pub const fn new(page: usize) -> Option<Self> {
        match NonZeroUsize::new(page) {
            Some(n) => Some(Self(n)),
            None => None,
        }
    }

    #[must_use]
    pub const fn get(self) -> usize {
        self.0.get()
    }

    /// 0-based index used by the OCR text store
    #[must_use]
    pub const fn to_external(self) -> usize {
        self.0.get() - 1
    }

    /// Unclamped inverse of [`to_external`](Self::to_external)
    #[must_use]
    pub fn from_external(index: usize) -> Self {
        Self(NonZeroUsize::MIN.saturating_add(index))
    }
}

impl fmt::Display for PageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bounded translation between internal pages and external text indices
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PaginationCoordinator {
    page_count: NonZeroUsize,
}

impl PaginationCoordinator {
    /// `None` for an empty document
    #[must_use]
    pub fn new(page_count: usize) -> Option<Self> {
        NonZeroUsize::new(page_count).map(|page_count| Self { page_count })
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.page_count.get()
    }

    #[must_use]
    pub fn first(&self) -> PageIndex {
        PageIndex::FIRST
    }

    #[must_use]
    pub fn last(&self) -> PageIndex {
        PageIndex(self.page_count)
    }

    /// Clamp a 1-based request into `[1, page_count]`
    #[must_use]
    pub fn clamp(&self, page: usize) -> PageIndex {
        let bounded = page.clamp(1, self.page_count.get());
        PageIndex::new(bounded).unwrap_or(PageIndex::FIRST)
    }

    #[must_use]
    pub fn contains(&self, page: PageIndex) -> bool {
        page.get() <= self.page_count.get()
    }

    #[must_use]
    pub fn to_external(&self, page: PageIndex) -> usize {
        page.to_external()
    }

    /// External index to page, clamped to the document
    #[must_use]
    pub fn to_internal(&self, index: usize) -> PageIndex {
        self.clamp(index.saturating_add(1))
    }

    #[must_use]
    pub fn next(&self, from: PageIndex) -> PageIndex {
        self.clamp(from.get().saturating_add(1))
    }

    #[must_use]
    pub fn previous(&self, from: PageIndex) -> PageIndex {
        self.clamp(from.get() - 1)
    }

    /// Text shown beside `page`; empty when the sequence is shorter than the document
    #[must_use]
    pub fn text_for<'a>(&self, text: &'a PageTextSequence, page: PageIndex) -> &'a str {
        text.get(self.to_external(page)).unwrap_or("")
    }

    /// Page indicator, e.g. `3 of 10`
    #[must_use]
    pub fn label(&self, page: PageIndex) -> String {
        format!("{page} of {}", self.page_count)
    }
}

/// Per-page OCR text, produced independently of the document
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageTextSequence {
    pages: Vec<String>,
}

impl PageTextSequence {
    #[must_use]
    pub fn new(pages: Vec<String>) -> Self {
        Self { pages }
    }

    /// Load a JSON array of strings
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read OCR text from {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse OCR text in {}", path.display()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&str> {
        self.pages.get(index).map(String::as_str)
    }

    /// Replace the text for one page, as the editing panel does.
    /// Returns false when `index` is past the end.
    pub fn set(&mut self, index: usize, text: impl Into<String>) -> bool {
        match self.pages.get_mut(index) {
            Some(slot) => {
                *slot = text.into();
                true
            }
            None => false,
        }
    }

    /// All pages joined, used when no page is selected
    #[must_use]
    pub fn full_text(&self) -> String {
        self.pages.join("\n\n")
    }
}

impl From<Vec<String>> for PageTextSequence {
    fn from(pages: Vec<String>) -> Self {
        Self::new(pages)
    }
}
