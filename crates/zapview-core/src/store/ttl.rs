use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::time::Instant;

/// Map whose entries expire `ttl` after they were last written.
///
/// Expired entries stay readable through [`TtlCache::get_stale`] until purged.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: HashMap<K, (V, Instant)>,
    ttl: Duration,
}

impl<K: Eq + Hash, V> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Fresh value for `key`
    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries
            .get(key)
            .filter(|(_, written)| written.elapsed() < self.ttl)
            .map(|(value, _)| value)
    }

    /// Value for `key` regardless of age
    pub fn get_stale(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|(value, _)| value)
    }

    /// Insert or refresh an entry. Values are replaced whole.
    pub fn insert(&mut self, key: K, value: V) {
        self.entries.insert(key, (value, Instant::now()));
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(value, _)| value)
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&mut self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, (_, written)| written.elapsed() < ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

type PendingFetch<V> = Shared<BoxFuture<'static, V>>;

struct CacheAsideState<K, V> {
    cache: TtlCache<K, V>,
    pending: HashMap<K, PendingFetch<V>>,
    /// Bumped by `clear`; fetches started earlier do not write back
    generation: u64,
}

/// Cache-aside lookups over a shared pending-fetch registry.
///
/// A miss starts exactly one fetch per key; concurrent callers for the same
/// key await that fetch. Whatever the fetch settles to, `None` included, is
/// cached for the TTL.
pub struct CacheAside<K, V> {
    state: Arc<Mutex<CacheAsideState<K, V>>>,
}

impl<K, V> Clone for CacheAside<K, V> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<K, V> CacheAside<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheAsideState {
                cache: TtlCache::new(ttl),
                pending: HashMap::new(),
                generation: 0,
            })),
        }
    }

    pub async fn get_or_fetch<F>(&self, key: K, fetch: F) -> V
    where
        F: FnOnce() -> BoxFuture<'static, V>,
    {
        let future = {
            let mut state = self.state.lock();
            if let Some(value) = state.cache.get(&key) {
                return value.clone();
            }
            if let Some(pending) = state.pending.get(&key) {
                pending.clone()
            } else {
                let registry = self.state.clone();
                let inner = fetch();
                let owned_key = key.clone();
                let generation = state.generation;
                let future = async move {
                    let value = inner.await;
                    let mut state = registry.lock();
                    if state.generation == generation {
                        state.cache.insert(owned_key.clone(), value.clone());
                        state.pending.remove(&owned_key);
                    }
                    value
                }
                .boxed()
                .shared();
                state.pending.insert(key, future.clone());
                future
            }
        };
        future.await
    }

    /// Fresh cached value, without fetching
    pub fn peek(&self, key: &K) -> Option<V> {
        self.state.lock().cache.get(key).cloned()
    }

    pub fn insert(&self, key: K, value: V) {
        self.state.lock().cache.insert(key, value);
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn purge_expired(&self) -> usize {
        self.state.lock().cache.purge_expired()
    }

    /// Drop every cached entry and forget pending fetches
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.cache.clear();
        state.pending.clear();
        state.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let mut cache = TtlCache::new(Duration::from_secs(10));
        cache.insert("a", 1);
        assert_eq!(cache.get(&"a"), Some(&1));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get_stale(&"a"), Some(&1));
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_fetch_once() {
        let cache: CacheAside<&'static str, Option<u32>> = CacheAside::new(Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));

        let lookups = (0..4).map(|_| {
            let calls = calls.clone();
            cache.get_or_fetch("k", move || {
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Some(7)
                }
                .boxed()
            })
        });
        let results = futures::future::join_all(lookups).await;

        assert!(results.iter().all(|r| *r == Some(7)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.in_flight(), 0);
        assert_eq!(cache.peek(&"k"), Some(Some(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_negative_result_is_cached() {
        let cache: CacheAside<u8, Option<u32>> = CacheAside::new(Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = |calls: Arc<AtomicUsize>| {
            move || {
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    None
                }
                .boxed()
            }
        };

        assert_eq!(cache.get_or_fetch(1, fetch(calls.clone())).await, None);
        assert_eq!(cache.get_or_fetch(1, fetch(calls.clone())).await, None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        cache.get_or_fetch(1, fetch(calls.clone())).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_started_before_clear_does_not_write_back() {
        let cache: CacheAside<&'static str, Option<u32>> = CacheAside::new(Duration::from_secs(60));
        let delayed = |value: u32, delay_ms: u64| {
            move || {
                async move {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    Some(value)
                }
                .boxed()
            }
        };

        let first = tokio::spawn({
            let cache = cache.clone();
            async move { cache.get_or_fetch("k", delayed(1, 100)).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.clear();
        let second = tokio::spawn({
            let cache = cache.clone();
            async move { cache.get_or_fetch("k", delayed(2, 200)).await }
        });

        assert_eq!(first.await.unwrap(), Some(1));
        assert_eq!(cache.peek(&"k"), None);
        assert_eq!(cache.in_flight(), 1);

        assert_eq!(second.await.unwrap(), Some(2));
        assert_eq!(cache.peek(&"k"), Some(Some(2)));
        assert_eq!(cache.in_flight(), 0);
    }
}
