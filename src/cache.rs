//! Session-scoped extraction cache.
//!
//! One slot per [`DocumentKey`]. The first caller for a key runs the build
//! future; concurrent callers for the same key wait on the same slot instead
//! of starting a second pipeline. A failed build leaves the slot empty, so
//! the next call retries. Entries never expire: they live until
//! [`ExtractionCache::invalidate`], [`ExtractionCache::clear`], or the end of
//! the session.

use crate::document::DocumentKey;
use crate::error::Pdf2FactsError;
use crate::output::CacheEntry;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OnceCell;
use tracing::{debug, info};

type Slot = Arc<OnceCell<Arc<CacheEntry>>>;

#[derive(Debug, Default)]
pub struct ExtractionCache {
    slots: Mutex<HashMap<DocumentKey, Slot>>,
}

impl ExtractionCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<DocumentKey, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn slot(&self, key: &DocumentKey) -> Slot {
        Arc::clone(self.lock().entry(key.clone()).or_default())
    }

    /// Return the cached entry for `key`, or run `build` once to create it.
    pub async fn get_or_build<F, Fut>(&self, key: &DocumentKey, build: F) -> Result<Arc<CacheEntry>, Pdf2FactsError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CacheEntry, Pdf2FactsError>>,
    {
        let slot = self.slot(key);
        if let Some(entry) = slot.get() {
            debug!("Cache hit for {}", key);
            return Ok(Arc::clone(entry));
        }
        let entry = slot
            .get_or_try_init(|| async move {
                info!("Cache miss for {}: running extraction", key);
                build().await.map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(entry))
    }

    /// The cached entry for `key`, without building.
    pub fn get(&self, key: &DocumentKey) -> Option<Arc<CacheEntry>> {
        self.lock().get(key).and_then(|slot| slot.get().cloned())
    }

    /// Drop the entry for `key`. Returns whether a finished entry was removed.
    ///
    /// A build still in flight for `key` completes into a detached slot and
    /// is never visible to later calls.
    pub fn invalidate(&self, key: &DocumentKey) -> bool {
        let removed = self.lock().remove(key);
        let had_entry = removed.is_some_and(|slot| slot.initialized());
        if had_entry {
            info!("Invalidated cached extraction for {}", key);
        }
        had_entry
    }

    /// Drop the slot for `key` only if it still holds `entry`.
    ///
    /// A slot that was replaced since `entry` was returned (for instance by a
    /// concurrent reload) is left alone.
    pub fn invalidate_entry(&self, key: &DocumentKey, entry: &Arc<CacheEntry>) -> bool {
        let mut slots = self.lock();
        let holds_entry = slots
            .get(key)
            .and_then(|slot| slot.get())
            .is_some_and(|current| Arc::ptr_eq(current, entry));
        if holds_entry {
            slots.remove(key);
            debug!("Dropped cached extraction for {}", key);
        }
        holds_entry
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of finished entries.
    pub fn len(&self) -> usize {
        self.lock().values().filter(|s| s.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
