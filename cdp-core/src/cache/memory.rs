// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Expiring in-process key/value store
//!
//! ## Expiry
//!
//! Items are never swept in the background. Whether an item is stale is a pure
//! function of `(item, now)` evaluated when it is read:
//!
//! - `get` on a stale item fails with [`CdpError::Expired`]
//! - `contains` on a stale item returns `false` and deletes it
//!
//! ## Purge
//!
//! Every `max_pool_size`-th `set` since the previous purge removes every entry
//! that has already expired. Live entries are kept regardless of count, so the
//! pool may stay above `max_pool_size` until they expire. The trigger counts
//! insertions rather than entries, so a pool full of live items is not rescanned
//! on every write.
//!
//! The map is sharded (`DashMap`), so writers on different keys do not contend
//! and a replacement on the same key is a single slot assignment.

use crate::error::{CdpError, Result};
use dashmap::DashMap;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default pool size before a purge is attempted
pub const DEFAULT_MAX_POOL_SIZE: usize = 1000;

/// Cached value with its absolute expiry
#[derive(Clone)]
pub struct CacheItem {
    data: Arc<dyn Any + Send + Sync>,
    expires_at: Instant,
}

impl CacheItem {
    /// Wrap `data` so that it expires `ttl` from now
    pub fn new<T: Any + Send + Sync>(data: T, ttl: Duration) -> Self {
        Self {
            data: Arc::new(data),
            expires_at: Instant::now() + ttl,
        }
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Borrow the payload as `T`; `None` if it holds another type
    pub fn data<T: Any>(&self) -> Option<&T> {
        self.data.downcast_ref::<T>()
    }

    /// Take the shared payload as `T`
    pub fn into_data<T: Any + Send + Sync>(self) -> Option<Arc<T>> {
        self.data.downcast::<T>().ok()
    }
}

impl fmt::Debug for CacheItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheItem")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub name: String,
    pub entries: usize,
    /// Number of `set` calls since creation
    pub insertions: u64,
    pub hits: u64,
    pub misses: u64,
    /// Number of purge passes run
    pub purges: u64,
}

/// Named TTL cache
pub struct MemoryCache {
    name: String,
    max_pool_size: usize,
    entries: DashMap<String, CacheItem>,
    insertions: AtomicU64,
    since_purge: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    purges: AtomicU64,
}

impl MemoryCache {
    pub fn new(name: impl Into<String>, max_pool_size: usize) -> Self {
        Self {
            name: name.into(),
            max_pool_size,
            entries: DashMap::new(),
            insertions: AtomicU64::new(0),
            since_purge: AtomicUsize::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            purges: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_pool_size(&self) -> usize {
        self.max_pool_size
    }

    /// Read an item
    ///
    /// `Ok(None)` if the key was never set (or was deleted),
    /// `Err(CdpError::Expired)` if it is present but stale.
    pub fn get(&self, key: &str) -> Result<Option<CacheItem>> {
        let item = match self.entries.get(key) {
            Some(entry) => entry.value().clone(),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        };

        if item.is_expired() {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Err(CdpError::Expired {
                key: key.to_string(),
            });
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        Ok(Some(item))
    }

    /// Whether `key` holds a live item; deletes it if it turned out stale
    pub fn contains(&self, key: &str) -> bool {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.value().is_expired(),
            None => return false,
        };

        if expired {
            // A concurrent set may have replaced the stale item in between.
            self.entries.remove_if(key, |_, item| item.is_expired());
            return false;
        }
        true
    }

    /// Store `data` under `key` for `ttl`, replacing any previous item
    pub fn set<T: Any + Send + Sync>(&self, key: impl Into<String>, data: T, ttl: Duration) {
        self.set_item(key, CacheItem::new(data, ttl));
    }

    /// Store a prepared item
    pub fn set_item(&self, key: impl Into<String>, item: CacheItem) {
        self.entries.insert(key.into(), item);
        self.insertions.fetch_add(1, Ordering::Relaxed);

        let pending = self.since_purge.fetch_add(1, Ordering::AcqRel) + 1;
        // only the writer that resets the counter runs the purge
        if pending >= self.max_pool_size
            && self.since_purge.swap(0, Ordering::AcqRel) >= self.max_pool_size
        {
            self.purge_expired();
        }
    }

    /// Remove every expired item, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, item| !item.is_expired_at(now));
        let removed = before.saturating_sub(self.entries.len());

        self.purges.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(cache = %self.name, removed, "purged expired cache entries");
        removed
    }

    pub fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn delete_all<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for key in keys {
            self.entries.remove(key.as_ref());
        }
    }

    /// Drop every item
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of stored items, stale ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            name: self.name.clone(),
            entries: self.entries.len(),
            insertions: self.insertions.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            purges: self.purges.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCache")
            .field("name", &self.name)
            .field("max_pool_size", &self.max_pool_size)
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_get_missing_is_none() {
        let cache = MemoryCache::new("test", 10);
        assert!(cache.get("nope").unwrap().is_none());
        assert!(!cache.contains("nope"));
    }

    #[test]
    fn test_set_overwrites() {
        let cache = MemoryCache::new("test", 10);
        cache.set("k", 1u32, Duration::from_secs(60));
        cache.set("k", 2u32, Duration::from_secs(60));

        let item = cache.get("k").unwrap().unwrap();
        assert_eq!(item.data::<u32>(), Some(&2));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().insertions, 2);
    }

    #[test]
    fn test_data_type_mismatch() {
        let cache = MemoryCache::new("test", 10);
        cache.set("k", "text".to_string(), Duration::from_secs(60));
        let item = cache.get("k").unwrap().unwrap();
        assert!(item.data::<u64>().is_none());
        assert_eq!(item.into_data::<String>().as_deref().map(String::as_str), Some("text"));
    }

    #[test]
    fn test_expired_get_errors_but_contains_is_false() {
        let cache = MemoryCache::new("test", 10);
        cache.set("k", "v".to_string(), Duration::from_millis(500));

        let item = cache.get("k").unwrap().unwrap();
        assert_eq!(item.data::<String>().map(String::as_str), Some("v"));

        sleep(Duration::from_secs(1));

        match cache.get("k") {
            Err(CdpError::Expired { key }) => assert_eq!(key, "k"),
            other => panic!("expected expiry, got {other:?}"),
        }
        assert!(!cache.contains("k"));
        // contains removed it, so the key now reads as never cached
        assert!(cache.get("k").unwrap().is_none());
    }

    #[test]
    fn test_live_pool_is_not_purged_on_every_insert() {
        let cache = MemoryCache::new("pool", 2);
        for i in 0..10 {
            cache.set(format!("k{i}"), i, Duration::from_secs(60));
        }

        let stats = cache.stats();
        assert_eq!(stats.entries, 10);
        assert_eq!(stats.insertions, 10);
        assert_eq!(stats.purges, 5);

        let cache = MemoryCache::new("wide", 100);
        for i in 0..250 {
            cache.set(format!("k{i}"), i, Duration::from_secs(60));
        }
        assert_eq!(cache.stats().purges, 2);
    }

    #[test]
    fn test_purge_keeps_live_entries() {
        let cache = MemoryCache::new("pool", 2);

        cache.set("t1", 1, Duration::from_millis(500));
        cache.set("t2", 2, Duration::from_secs(3));
        cache.set("t3", 3, Duration::from_millis(500));
        // over the pool size, but nothing has expired yet
        assert_eq!(cache.len(), 3);

        sleep(Duration::from_secs(1));
        cache.set("t4", 4, Duration::from_millis(500));

        assert_eq!(cache.len(), 2);
        assert!(cache.contains("t2"));
        assert!(cache.contains("t4"));
        assert!(!cache.contains("t1"));
        assert!(!cache.contains("t3"));

        sleep(Duration::from_secs(1));
        assert!(cache.contains("t2"));
        assert!(!cache.contains("t4"));
        assert_eq!(cache.len(), 1);

        sleep(Duration::from_secs(1));
        assert!(!cache.contains("t2"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_delete_all_ignores_missing() {
        let cache = MemoryCache::new("test", 10);
        cache.set("a", 1, Duration::from_secs(60));
        cache.set("b", 2, Duration::from_secs(60));
        cache.delete_all(["a", "b", "c"]);
        cache.delete("zzz");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_stats_hits_and_misses() {
        let cache = MemoryCache::new("test", 10);
        cache.set("a", 1, Duration::from_secs(60));
        let _ = cache.get("a");
        let _ = cache.get("b");
        let _ = cache.get("a");

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }
}
