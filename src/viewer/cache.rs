//! LRU cache for rasterized pages

use std::num::NonZeroUsize;
use std::rc::Rc;

use lru::LruCache;

use super::backend::Pixmap;
use super::pagination::PageIndex;

/// Cache key for rasterized pages
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub page: PageIndex,
    /// Bit pattern of the scale, so every distinct finite scale hashes apart
    pub scale_bits: u32,
}

impl CacheKey {
    #[must_use]
    pub fn new(page: PageIndex, scale: f32) -> Self {
        Self {
            page,
            // -0.0 and 0.0 compare equal but differ in bits
            scale_bits: (scale + 0.0).to_bits(),
        }
    }
}

/// LRU cache of rasters for the currently open document
pub struct PageCache {
    cache: LruCache<CacheKey, Rc<Pixmap>>,
}

impl PageCache {
    /// Create a new cache with the given capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    /// Get a cached raster, promoting it in the LRU order
    #[must_use]
    pub fn get(&mut self, key: &CacheKey) -> Option<Rc<Pixmap>> {
        self.cache.get(key).cloned()
    }

    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.cache.contains(key)
    }

    pub fn insert(&mut self, key: CacheKey, pixmap: Pixmap) -> Rc<Pixmap> {
        let rc = Rc::new(pixmap);
        self.cache.put(key, Rc::clone(&rc));
        rc
    }

    /// Drop everything; used when the document changes
    pub fn invalidate_all(&mut self) {
        self.cache.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
