use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::filename::with_hash_suffix;
use crate::ResourceInfo;

/// Result of [`ResourceStore::put_if_absent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    /// Stored under the returned path, which may carry a collision suffix.
    Inserted(String),
    /// Another worker stored the URL first; its path is returned.
    Existing(String),
    /// The capacity was reached; nothing was stored.
    Full,
}

#[derive(Debug, Default)]
struct StoreInner {
    by_url: HashMap<String, Arc<ResourceInfo>>,
    /// Local path -> owning URL, covering stored and reserved paths.
    owners: HashMap<String, String>,
}

/// Deduplicating, capacity-bounded map of downloaded resources.
///
/// Never hold the lock across a network call: callers fetch first and then
/// insert, and insertion re-checks both dedup and capacity under the write lock.
#[derive(Debug)]
pub struct ResourceStore {
    capacity: usize,
    inner: RwLock<StoreInner>,
}

impl ResourceStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: RwLock::new(StoreInner::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, url: &str) -> Option<Arc<ResourceInfo>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.by_url.get(url).cloned()
    }

    pub fn local_path(&self, url: &str) -> Option<String> {
        self.get(url).map(|info| info.local_path.clone())
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.by_url.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Claim `path` for `url` before the download exists. Returns the path the
    /// download must use, suffixed when another URL already owns `path`.
    pub fn reserve_path(&self, url: &str, path: &str) -> String {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let path = unique_path(&inner, url, path);
        inner.owners.insert(path.clone(), url.to_string());
        path
    }

    pub fn put_if_absent(&self, mut info: ResourceInfo) -> StoreOutcome {
        {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = inner.by_url.get(&info.url) {
                return StoreOutcome::Existing(existing.local_path.clone());
            }
            if inner.by_url.len() >= self.capacity {
                return StoreOutcome::Full;
            }
        }

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        // Another worker may have won the race between the two locks.
        if let Some(existing) = inner.by_url.get(&info.url) {
            return StoreOutcome::Existing(existing.local_path.clone());
        }
        if inner.by_url.len() >= self.capacity {
            return StoreOutcome::Full;
        }

        info.local_path = unique_path(&inner, &info.url, &info.local_path);
        let path = info.local_path.clone();
        inner.owners.insert(path.clone(), info.url.clone());
        inner.by_url.insert(info.url.clone(), Arc::new(info));
        StoreOutcome::Inserted(path)
    }

    /// Stored resources ordered by local path.
    pub fn snapshot(&self) -> Vec<Arc<ResourceInfo>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut resources: Vec<_> = inner.by_url.values().cloned().collect();
        resources.sort_by(|a, b| a.local_path.cmp(&b.local_path));
        resources
    }
}

fn unique_path(inner: &StoreInner, url: &str, path: &str) -> String {
    match inner.owners.get(path) {
        Some(owner) if owner != url => with_hash_suffix(path, url),
        _ => path.to_string(),
    }
}
