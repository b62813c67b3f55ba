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

//! Memoization on top of [`MemoryCache`]
//!
//! ## Cache Key Generation
//!
//! ```text
//! key = name || ":" || hex(SHA256(json(canonical(args))))
//! ```
//!
//! `name` identifies the memoized function; `args` is anything `Serialize`,
//! typically a tuple of the call arguments. Arguments pass through
//! `serde_json::Value` first, whose objects keep their keys sorted, so a
//! `HashMap` argument hashes the same whatever its iteration order. Callers that depend on tenant or
//! environment must put them in `args`.
//!
//! An expired entry is a plain miss here: the function is invoked again and
//! the fresh result replaces the stale one. Two callers racing on the same
//! miss both compute; the later write wins.

use super::memory::MemoryCache;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Decides whether a computed value counts as "no result"
///
/// Null results are only cached when the memoizer allows it.
pub trait CacheableResult {
    fn is_null_result(&self) -> bool {
        false
    }
}

impl<T> CacheableResult for Option<T> {
    fn is_null_result(&self) -> bool {
        self.is_none()
    }
}

impl<T> CacheableResult for Vec<T> {
    fn is_null_result(&self) -> bool {
        self.is_empty()
    }
}

impl<K, V> CacheableResult for HashMap<K, V> {
    fn is_null_result(&self) -> bool {
        self.is_empty()
    }
}

impl<K, V> CacheableResult for BTreeMap<K, V> {
    fn is_null_result(&self) -> bool {
        self.is_empty()
    }
}

impl CacheableResult for String {
    fn is_null_result(&self) -> bool {
        self.is_empty()
    }
}

impl CacheableResult for Value {
    fn is_null_result(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Array(items) => items.is_empty(),
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }
}

impl<T: CacheableResult> CacheableResult for Arc<T> {
    fn is_null_result(&self) -> bool {
        self.as_ref().is_null_result()
    }
}

macro_rules! never_null {
    ($($t:ty),*) => {
        $(impl CacheableResult for $t {})*
    };
}

never_null!(bool, u32, u64, usize, i32, i64, f64);

/// Read-through wrapper for one function
#[derive(Debug, Clone)]
pub struct Memoizer {
    cache: Arc<MemoryCache>,
    name: String,
    ttl: Duration,
    allow_null_results: bool,
}

impl Memoizer {
    /// Memoize into a shared cache
    pub fn new(cache: Arc<MemoryCache>, name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            cache,
            name: name.into(),
            ttl,
            allow_null_results: false,
        }
    }

    /// Memoize into a private cache of `max_size` entries
    pub fn with_own_cache(name: impl Into<String>, ttl: Duration, max_size: usize) -> Self {
        let name = name.into();
        let cache = Arc::new(MemoryCache::new(name.clone(), max_size));
        Self::new(cache, name, ttl)
    }

    /// Also cache null/empty results
    pub fn allow_null_results(mut self, allow: bool) -> Self {
        self.allow_null_results = allow;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn cache(&self) -> &Arc<MemoryCache> {
        &self.cache
    }

    /// Cache key for a call with `args`; `None` if the arguments do not serialize
    pub fn key<A: Serialize + ?Sized>(&self, args: &A) -> Option<String> {
        let canonical = serde_json::to_value(args).ok()?;
        let encoded = serde_json::to_vec(&canonical).ok()?;
        let digest = Sha256::digest(&encoded);
        Some(format!("{}:{}", self.name, hex::encode(digest)))
    }

    /// Drop the cached result for `args`
    pub fn invalidate<A: Serialize + ?Sized>(&self, args: &A) {
        if let Some(key) = self.key(args) {
            self.cache.delete(&key);
        }
    }

    /// Return the cached result for `args`, or await `compute` and cache it
    pub async fn call<A, T, E, F, Fut>(&self, args: &A, compute: F) -> Result<T, E>
    where
        A: Serialize + ?Sized,
        T: CacheableResult + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = self.key(args);
        if let Some(hit) = key.as_deref().and_then(|k| self.lookup::<T>(k)) {
            return Ok(hit);
        }

        let value = compute().await?;
        if let Some(key) = key {
            self.store(key, &value);
        }
        Ok(value)
    }

    /// Synchronous counterpart of [`Memoizer::call`]
    pub fn call_blocking<A, T, E, F>(&self, args: &A, compute: F) -> Result<T, E>
    where
        A: Serialize + ?Sized,
        T: CacheableResult + Clone + Send + Sync + 'static,
        F: FnOnce() -> Result<T, E>,
    {
        let key = self.key(args);
        if let Some(hit) = key.as_deref().and_then(|k| self.lookup::<T>(k)) {
            return Ok(hit);
        }

        let value = compute()?;
        if let Some(key) = key {
            self.store(key, &value);
        }
        Ok(value)
    }

    fn lookup<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        match self.cache.get(key) {
            Ok(Some(item)) => {
                tracing::trace!(memoizer = %self.name, "cache hit");
                item.data::<T>().cloned()
            }
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(memoizer = %self.name, error = %e, "stale entry, recomputing");
                None
            }
        }
    }

    fn store<T>(&self, key: String, value: &T)
    where
        T: CacheableResult + Clone + Send + Sync + 'static,
    {
        if value.is_null_result() && !self.allow_null_results {
            return;
        }
        self.cache.set(key, value.clone(), self.ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_key_depends_on_args() {
        let memo = Memoizer::with_own_cache("load_rules", Duration::from_secs(1), 10);
        let a = memo.key(&("acme", "page-view")).unwrap();
        let b = memo.key(&("acme", "page-view")).unwrap();
        let c = memo.key(&("other", "page-view")).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("load_rules:"));
    }

    #[test]
    fn test_key_ignores_map_order() {
        let memo = Memoizer::with_own_cache("by_fields", Duration::from_secs(1), 10);
        let forward: HashMap<String, u32> = (0..64).map(|i| (format!("f{i}"), i)).collect();
        let backward: HashMap<String, u32> = (0..64).rev().map(|i| (format!("f{i}"), i)).collect();

        assert_eq!(
            memo.key(&("acme", &forward)).unwrap(),
            memo.key(&("acme", &backward)).unwrap()
        );
    }

    #[tokio::test]
    async fn test_hit_skips_compute() {
        let memo = Memoizer::with_own_cache("f", Duration::from_secs(60), 10);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: Result<u64, Infallible> = memo
                .call(&(1, 2), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(3)
                })
                .await;
            assert_eq!(value.unwrap(), 3);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let memo = Memoizer::with_own_cache("f", Duration::from_secs(60), 10);
        let first: Result<u64, String> = memo.call("x", || async { Err("boom".into()) }).await;
        assert!(first.is_err());

        let second: Result<u64, String> = memo.call("x", || async { Ok(7) }).await;
        assert_eq!(second.unwrap(), 7);
    }

    #[test]
    fn test_null_results_respect_flag() {
        let calls = AtomicUsize::new(0);
        let compute = || -> Result<Vec<u8>, Infallible> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        };

        let memo = Memoizer::with_own_cache("empty", Duration::from_secs(60), 10);
        memo.call_blocking("k", compute).unwrap();
        memo.call_blocking("k", compute).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let memo = memo.allow_null_results(true);
        memo.call_blocking("j", compute).unwrap();
        memo.call_blocking("j", compute).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_expired_entry_is_recomputed() {
        let memo = Memoizer::with_own_cache("short", Duration::from_millis(100), 10);
        let calls = AtomicUsize::new(0);
        let compute = || -> Result<String, Infallible> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok("v".to_string())
        };

        memo.call_blocking("k", compute).unwrap();
        std::thread::sleep(Duration::from_millis(200));
        memo.call_blocking("k", compute).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_invalidate() {
        let memo = Memoizer::with_own_cache("f", Duration::from_secs(60), 10);
        let calls = AtomicUsize::new(0);
        let compute = || -> Result<bool, Infallible> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        };

        memo.call_blocking("k", compute).unwrap();
        memo.invalidate("k");
        memo.call_blocking("k", compute).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
