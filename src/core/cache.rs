//! Purpose: Blob caches: a per-production MRU list and the cursor-level (column, row) cache.
//! Exports: `ProductionCache`, `CursorCache`.
//! Role: Avoid re-materializing blobs for rows that were recently fetched.
//! Invariants: Entries are deduplicated by position only, never by content.
//! Invariants: `no_cache` blobs may occupy a slot but never satisfy a lookup.
//! Invariants: Eviction drops the evicted handle before the slot is reused.

use crate::core::blob::Blob;
use std::collections::VecDeque;
use tracing::trace;

/// Bounded most-recently-used list owned by one production.
#[derive(Debug)]
pub struct ProductionCache {
    entries: VecDeque<Blob>,
    capacity: usize,
}

impl ProductionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find a cacheable blob covering `row_id`, rotating it to the head.
    pub fn find(&mut self, row_id: i64) -> Option<Blob> {
        let pos = self
            .entries
            .iter()
            .position(|blob| !blob.no_cache() && blob.covers(row_id))?;
        if pos != 0 {
            let blob = self.entries.remove(pos)?;
            self.entries.push_front(blob);
        }
        self.entries.front().cloned()
    }

    pub fn insert(&mut self, blob: Blob) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            if let Some(evicted) = self.entries.pop_back() {
                trace!(
                    start = evicted.start_id(),
                    stop = evicted.stop_id(),
                    "production cache eviction"
                );
            }
        }
        self.entries.push_front(blob);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Debug)]
struct CursorEntry {
    column: u32,
    blob: Blob,
}

/// Byte-bounded cache shared by all columns of one cursor.
#[derive(Debug)]
pub struct CursorCache {
    entries: VecDeque<CursorEntry>,
    capacity_bytes: usize,
    used_bytes: usize,
}

impl CursorCache {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity_bytes,
            used_bytes: 0,
        }
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&mut self, column: u32, row_id: i64) -> Option<Blob> {
        let pos = self
            .entries
            .iter()
            .position(|entry| entry.column == column && entry.blob.covers(row_id))?;
        if pos != 0 {
            let entry = self.entries.remove(pos)?;
            self.entries.push_front(entry);
        }
        trace!(column, row_id, "cursor cache hit");
        self.entries.front().map(|entry| entry.blob.clone())
    }

    pub fn save(&mut self, column: u32, blob: Blob) {
        let size = blob.size_bytes();
        if blob.no_cache() || size > self.capacity_bytes {
            return;
        }
        if self
            .entries
            .iter()
            .any(|entry| entry.column == column && Blob::ptr_eq(&entry.blob, &blob))
        {
            return;
        }
        while self.used_bytes + size > self.capacity_bytes {
            let Some(evicted) = self.entries.pop_back() else {
                break;
            };
            self.used_bytes -= evicted.blob.size_bytes();
            trace!(column = evicted.column, "cursor cache eviction");
        }
        self.used_bytes += size;
        self.entries.push_front(CursorEntry { column, blob });
    }
}

#[cfg(test)]
mod tests {
    use super::{CursorCache, ProductionCache};
    use crate::core::bits::DataBuffer;
    use crate::core::blob::Blob;
    use crate::core::pagemap::PageMap;
    use std::sync::Arc;

    fn blob(start: i64, stop: i64) -> Blob {
        let rows = (stop - start + 1) as u64;
        Blob::builder(
            start,
            stop,
            DataBuffer::from_bytes(vec![0u8; rows as usize * 8], 8).expect("data"),
        )
        .page_map(Arc::new(PageMap::new_fixed(rows, 8)))
        .build()
        .expect("blob")
    }

    #[test]
    fn hit_rotates_to_head_and_tail_is_evicted() {
        let mut cache = ProductionCache::new(2);
        let a = blob(1, 10);
        let b = blob(11, 20);
        cache.insert(a.clone());
        cache.insert(b.clone());
        let hit = cache.find(5).expect("hit");
        assert!(Blob::ptr_eq(&hit, &a));
        cache.insert(blob(21, 30));
        assert_eq!(cache.len(), 2);
        assert!(cache.find(15).is_none(), "b was least recently used");
        assert!(cache.find(3).is_some());
    }

    #[test]
    fn no_cache_blob_is_kept_but_never_served() {
        let mut cache = ProductionCache::new(2);
        cache.insert(blob(1, 10).with_no_cache(true));
        assert_eq!(cache.len(), 1);
        assert!(cache.find(4).is_none());
    }

    #[test]
    fn cursor_cache_is_keyed_by_column() {
        let mut cache = CursorCache::new(1 << 20);
        cache.save(0, blob(1, 100));
        assert!(cache.find(0, 50).is_some());
        assert!(cache.find(1, 50).is_none());
        assert!(cache.find(0, 101).is_none());
    }

    #[test]
    fn cursor_cache_evicts_to_stay_under_capacity() {
        let one = blob(1, 100);
        let mut cache = CursorCache::new(one.size_bytes() * 2);
        cache.save(0, one);
        cache.save(0, blob(101, 200));
        cache.save(1, blob(1, 100));
        assert_eq!(cache.len(), 2);
        assert!(cache.used_bytes() <= cache.capacity_bytes());
        assert!(cache.find(0, 10).is_none());
        assert!(cache.find(1, 10).is_some());
    }
}
