//! Request coalescing.
//!
//! Many callers asking for single keys are grouped into one fetch per batch.
//! A batch flushes when it reaches `max_batch_size` keys or when `batch_delay`
//! has elapsed since its first key, whichever happens first. At most one
//! request per key is in flight at any time.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

/// Grouped lookup used by a [`BatchRequestProcessor`].
///
/// Keys missing from the returned map resolve to `None`.
pub trait BatchFetcher<K, V>: Send + Sync + 'static {
    fn fetch_batch(&self, keys: Vec<K>) -> BoxFuture<'static, anyhow::Result<HashMap<K, V>>>;
}

/// Future handed to every caller waiting on the same key
pub type BatchFuture<V> = Shared<BoxFuture<'static, Option<V>>>;

#[derive(Debug, Clone, Copy)]
pub struct BatchSettings {
    pub max_batch_size: usize,
    pub batch_delay: Duration,
    /// Upper bound on one grouped fetch; elapsed batches resolve to `None`
    pub fetch_timeout: Duration,
}

struct BatchState<K, V> {
    in_flight: HashMap<K, BatchFuture<V>>,
    queued: Vec<(K, oneshot::Sender<Option<V>>)>,
    /// Bumped on every flush so a stale delay timer does nothing
    generation: u64,
    /// Bumped by `clear_pending`; a flush started before a clear leaves
    /// `in_flight` alone
    epoch: u64,
}

struct Inner<K, V> {
    fetcher: Arc<dyn BatchFetcher<K, V>>,
    settings: BatchSettings,
    state: Mutex<BatchState<K, V>>,
}

/// Coalesces single-key requests into grouped fetches. Cheap to clone.
pub struct BatchRequestProcessor<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for BatchRequestProcessor<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> BatchRequestProcessor<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(fetcher: Arc<dyn BatchFetcher<K, V>>, settings: BatchSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                settings: BatchSettings {
                    max_batch_size: settings.max_batch_size.max(1),
                    ..settings
                },
                state: Mutex::new(BatchState {
                    in_flight: HashMap::new(),
                    queued: Vec::new(),
                    generation: 0,
                    epoch: 0,
                }),
            }),
        }
    }

    /// Return the in-flight future for `key`, or queue `key` and return a new one.
    ///
    /// Must be called within a tokio runtime. The future resolves to `None` on
    /// a missing key, a failed fetch or a timeout.
    pub fn get_or_create(&self, key: K) -> BatchFuture<V> {
        let mut state = self.inner.state.lock();
        if let Some(existing) = state.in_flight.get(&key) {
            trace!(?key, "joining in-flight batch request");
            return existing.clone();
        }

        let (tx, rx) = oneshot::channel();
        let future = async move { rx.await.ok().flatten() }.boxed().shared();
        state.in_flight.insert(key.clone(), future.clone());
        state.queued.push((key, tx));

        if state.queued.len() >= self.inner.settings.max_batch_size {
            let batch = take_batch(&mut state);
            let epoch = state.epoch;
            drop(state);
            self.spawn_flush(batch, epoch);
        } else if state.queued.len() == 1 {
            let generation = state.generation;
            drop(state);
            self.spawn_delay_timer(generation);
        }

        future
    }

    /// Keys queued or awaiting a fetch
    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }

    /// Forget queued and in-flight keys. Their waiters resolve to `None`.
    pub fn clear_pending(&self) {
        let mut state = self.inner.state.lock();
        state.queued.clear();
        state.in_flight.clear();
        state.generation += 1;
        state.epoch += 1;
    }

    fn spawn_delay_timer(&self, generation: u64) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(this.inner.settings.batch_delay).await;
            let (batch, epoch) = {
                let mut state = this.inner.state.lock();
                if state.generation != generation || state.queued.is_empty() {
                    return;
                }
                (take_batch(&mut state), state.epoch)
            };
            this.flush(batch, epoch).await;
        });
    }

    fn spawn_flush(&self, batch: Vec<(K, oneshot::Sender<Option<V>>)>, epoch: u64) {
        let this = self.clone();
        tokio::spawn(async move { this.flush(batch, epoch).await });
    }

    async fn flush(&self, batch: Vec<(K, oneshot::Sender<Option<V>>)>, epoch: u64) {
        let keys: Vec<K> = batch.iter().map(|(key, _)| key.clone()).collect();
        let size = keys.len();
        let timeout = self.inner.settings.fetch_timeout;

        let mut results = match tokio::time::timeout(timeout, self.inner.fetcher.fetch_batch(keys)).await {
            Ok(Ok(results)) => results,
            Ok(Err(e)) => {
                warn!(size, error = %e, "batch fetch failed");
                HashMap::new()
            }
            Err(_) => {
                debug!(size, ?timeout, "batch fetch timed out");
                HashMap::new()
            }
        };
        trace!(size, resolved = results.len(), "batch flushed");

        let mut state = self.inner.state.lock();
        let current = state.epoch == epoch;
        for (key, tx) in batch {
            if current {
                state.in_flight.remove(&key);
            }
            let _ = tx.send(results.remove(&key));
        }
    }
}

fn take_batch<K, V>(state: &mut BatchState<K, V>) -> Vec<(K, oneshot::Sender<Option<V>>)> {
    state.generation += 1;
    std::mem::take(&mut state.queued)
}
