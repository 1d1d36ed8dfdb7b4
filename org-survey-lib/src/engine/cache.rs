//! Process-lifetime read-through cache.
//!
//! Entries never expire and are never written to disk; every invocation starts empty.

use super::ClassifiedError;
use crate::HashMap;
use chrono::{DateTime, Utc};
use compact_str::CompactString;
use core::any::Any;
use core::fmt;
use std::sync::{Arc, PoisonError, RwLock};

const LOG_TARGET: &str = "     cache";

/// Identifies a cached value by what kind of data it is and which entity it belongs to,
/// e.g. `("orgRepos", "octo-org")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeKey {
    pub kind: &'static str,
    pub key: CompactString,
}

impl ScopeKey {
    #[must_use]
    pub fn new(kind: &'static str, key: impl Into<CompactString>) -> Self {
        Self { kind, key: key.into() }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.key)
    }
}

#[derive(Clone)]
pub struct CacheEntry {
    value: Arc<dyn Any + Send + Sync>,
    fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    #[must_use]
    pub const fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry").field("fetched_at", &self.fetched_at).finish_non_exhaustive()
    }
}

/// Concurrency-safe map from [`ScopeKey`] to a value of any type.
///
/// Reading a key under a different type than it was stored with reports it as absent.
#[derive(Debug, Default)]
pub struct SharedCache {
    entries: RwLock<HashMap<ScopeKey, CacheEntry>>,
}

impl SharedCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self, key: &ScopeKey) -> Option<Arc<T>> {
        let guard = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        guard.get(key).and_then(CacheEntry::downcast)
    }

    pub fn set<T: Send + Sync + 'static>(&self, key: ScopeKey, value: T) -> Arc<T> {
        let value = Arc::new(value);
        self.insert(key, Arc::clone(&value));
        value
    }

    fn insert<T: Send + Sync + 'static>(&self, key: ScopeKey, value: Arc<T>) {
        let entry = CacheEntry {
            value,
            fetched_at: Utc::now(),
        };
        let _ = self.entries.write().unwrap_or_else(PoisonError::into_inner).insert(key, entry);
    }

    /// When the value under `key` was stored, if present.
    #[must_use]
    pub fn fetched_at(&self, key: &ScopeKey) -> Option<DateTime<Utc>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(CacheEntry::fetched_at)
    }

    /// Return the cached value for `key`, or run `fetch` and cache its result.
    ///
    /// Failures are not cached. Two tasks missing on the same key at the same time may both
    /// fetch; the last one to finish wins.
    pub async fn get_or_fetch<T, F, Fut>(&self, key: ScopeKey, fetch: F) -> Result<Arc<T>, ClassifiedError>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ClassifiedError>>,
    {
        if let Some(hit) = self.get::<T>(&key) {
            log::debug!(target: LOG_TARGET, "Cache hit for {key}");
            return Ok(hit);
        }

        log::debug!(target: LOG_TARGET, "Cache miss for {key}");
        let value = Arc::new(fetch().await?);
        self.insert(key, Arc::clone(&value));
        Ok(value)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
