//! Trailing-edge batch coalescer for high-frequency reorders.
//!
//! Every `schedule` call updates the cache immediately, so each intermediate
//! drag position renders. The network write waits until the buffer has been
//! quiet for the configured window and then carries only the entries whose
//! position actually changed relative to the confirmed collection.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tasklane_core::{EngineEvent, EngineEventBus, Entity, Error, OrderEntry, RemoteResult, Result};

use crate::cache::{lock, CacheKey};
use crate::config::EngineConfig;
use crate::mutation::{MutationExecutor, MutationPlan, Staged};
use crate::patch::Op;

/// Persists one batch of changed positions.
pub type FlushFn =
    Arc<dyn Fn(Vec<OrderEntry>) -> BoxFuture<'static, RemoteResult<()>> + Send + Sync>;

/// Called once a batch settles: number of entries written, or the error
/// after rollback.
pub type SettledFn = Arc<dyn Fn(&Result<usize>) + Send + Sync>;

/// Key of one coalescing buffer (one logical operation, e.g. reordering
/// the tasks of one list).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferKey(String);

impl BufferKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Buffer for reordering the collection under `cache_key`.
    pub fn reorder(cache_key: &CacheKey) -> Self {
        Self(format!("reorder:{cache_key}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BufferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Write-back target of a buffer.
#[derive(Clone)]
pub struct BatchFlush {
    write: FlushFn,
    on_settled: Option<SettledFn>,
    delay: Option<Duration>,
}

impl BatchFlush {
    pub fn new<F>(write: F) -> Self
    where
        F: Fn(Vec<OrderEntry>) -> BoxFuture<'static, RemoteResult<()>> + Send + Sync + 'static,
    {
        Self {
            write: Arc::new(write),
            on_settled: None,
            delay: None,
        }
    }

    /// Quiescence window for this buffer instead of the configured one.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Observe the batch result (used by facades for status and notices).
    pub fn on_settled<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Result<usize>) + Send + Sync + 'static,
    {
        self.on_settled = Some(Arc::new(callback));
        self
    }

    fn settled(&self, result: &Result<usize>) {
        if let Some(callback) = &self.on_settled {
            callback(result);
        }
    }
}

struct Buffer<E: Entity> {
    staged: Staged<E>,
    cache_key: CacheKey,
    generation: u64,
    timer: JoinHandle<()>,
    flush: BatchFlush,
}

struct CoalescerInner<E: Entity> {
    executor: MutationExecutor<E>,
    events: EngineEventBus,
    delay: Duration,
    buffers: Mutex<HashMap<BufferKey, Buffer<E>>>,
    /// Cancelled reorders, still pending in the cache and never sent.
    parked: Mutex<HashMap<CacheKey, Staged<E>>>,
    next_generation: AtomicU64,
}

/// Debounces bursts of reorders into one batched write per buffer key.
///
/// At most one timer is outstanding per key; every new payload restarts it.
/// Cache listeners must not call back into the coalescer that is writing to
/// their cache.
pub struct BatchCoalescer<E: Entity> {
    inner: Arc<CoalescerInner<E>>,
}

impl<E: Entity> Clone for BatchCoalescer<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Entity> BatchCoalescer<E> {
    pub fn new(executor: MutationExecutor<E>, config: &EngineConfig) -> Self {
        Self {
            inner: Arc::new(CoalescerInner {
                events: executor.events().clone(),
                executor,
                delay: config.reorder_debounce(),
                buffers: Mutex::new(HashMap::new()),
                parked: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    pub fn delay(&self) -> Duration {
        self.inner.delay
    }

    /// Apply `entries` to the cache now and (re)start the buffer's timer.
    ///
    /// `entries` is the full next ordering and replaces any payload already
    /// buffered under `key`. Must be called from within a Tokio runtime.
    pub fn schedule(
        &self,
        key: BufferKey,
        cache_key: CacheKey,
        entries: Vec<OrderEntry>,
        flush: BatchFlush,
    ) -> Result<()> {
        let handle = Handle::try_current()
            .map_err(|e| Error::Internal(format!("coalescer needs a Tokio runtime: {e}")))?;
        let entry_count = entries.len();
        let op = Op::Reorder(entries);

        // The buffer is taken out while the cache is written so cache
        // listeners never run under the buffer lock.
        let existing = lock(&self.inner.buffers).remove(&key);
        let reusable = match existing {
            Some(buffer) => {
                buffer.timer.abort();
                if buffer.cache_key == cache_key {
                    Some(buffer.staged)
                } else {
                    self.inner.park(buffer.cache_key, buffer.staged);
                    self.inner.unpark(&cache_key)
                }
            }
            None => self.inner.unpark(&cache_key),
        };
        let staged = match reusable {
            Some(staged) if staged.amend(op.clone()) => {
                debug!(buffer_key = %key, entry_count, "Reorder buffer reset");
                staged
            }
            stale => {
                if let Some(stale) = stale {
                    stale.discard("reorder target removed");
                }
                debug!(buffer_key = %key, entry_count, "Reorder buffer opened");
                self.inner
                    .executor
                    .stage(MutationPlan::single(cache_key.clone(), op))?
            }
        };

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let timer = handle.spawn(fire_after(
            Arc::downgrade(&self.inner),
            key.clone(),
            generation,
            flush.delay.unwrap_or(self.inner.delay),
        ));
        let replaced = lock(&self.inner.buffers).insert(
            key.clone(),
            Buffer {
                staged,
                cache_key,
                generation,
                timer,
                flush,
            },
        );
        if let Some(raced) = replaced {
            raced.timer.abort();
            raced.staged.discard("superseded by a newer reorder");
        }

        self.inner.events.emit(EngineEvent::BatchScheduled {
            buffer_key: key.to_string(),
            entry_count,
        });
        Ok(())
    }

    /// Stop the buffer's timer without writing.
    ///
    /// The order already shown stays visible as a pending mutation but is
    /// never confirmed on its own. The next `schedule` on the same cache key
    /// takes it over, so its write is diffed against the last order the
    /// server actually accepted.
    pub fn cancel(&self, key: &BufferKey) -> bool {
        let Some(buffer) = lock(&self.inner.buffers).remove(key) else {
            return false;
        };
        buffer.timer.abort();
        self.inner.park(buffer.cache_key, buffer.staged);
        info!(buffer_key = %key, "Reorder buffer cancelled");
        self.inner.events.emit(EngineEvent::BatchCancelled {
            buffer_key: key.to_string(),
        });
        true
    }

    /// Cancel every buffer (view teardown). Returns how many were discarded.
    pub fn cancel_all(&self) -> usize {
        let keys = self.pending_buffers();
        keys.iter().filter(|key| self.cancel(key)).count()
    }

    /// Flush a buffer now instead of waiting for its timer.
    ///
    /// Resolves to `Ok(None)` when nothing was buffered under `key`, else to
    /// the number of entries written.
    pub async fn flush_now(&self, key: &BufferKey) -> Result<Option<usize>> {
        let buffer = lock(&self.inner.buffers).remove(key);
        match buffer {
            Some(buffer) => {
                buffer.timer.abort();
                self.inner.flush(key, buffer).await.map(Some)
            }
            None => Ok(None),
        }
    }

    /// Buffer keys with an outstanding timer.
    pub fn pending_buffers(&self) -> Vec<BufferKey> {
        let mut keys: Vec<BufferKey> = lock(&self.inner.buffers).keys().cloned().collect();
        keys.sort();
        keys
    }
}

async fn fire_after<E: Entity>(
    inner: Weak<CoalescerInner<E>>,
    key: BufferKey,
    generation: u64,
    delay: Duration,
) {
    tokio::time::sleep(delay).await;
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let buffer = {
        let mut buffers = lock(&inner.buffers);
        let current = buffers
            .get(&key)
            .is_some_and(|buffer| buffer.generation == generation);
        if current {
            buffers.remove(&key)
        } else {
            None
        }
    };
    if let Some(buffer) = buffer {
        // Failures are reported through the buffer's settle callback.
        let _ = inner.flush(&key, buffer).await;
    }
}

impl<E: Entity> CoalescerInner<E> {
    fn park(&self, cache_key: CacheKey, staged: Staged<E>) {
        let superseded = lock(&self.parked).insert(cache_key, staged);
        if let Some(superseded) = superseded {
            superseded.discard("superseded by a newer reorder");
        }
    }

    fn unpark(&self, cache_key: &CacheKey) -> Option<Staged<E>> {
        lock(&self.parked).remove(cache_key)
    }

    async fn flush(&self, key: &BufferKey, buffer: Buffer<E>) -> Result<usize> {
        let Buffer {
            staged,
            cache_key,
            flush,
            ..
        } = buffer;
        let entries = match staged.current_op() {
            Some(Op::Reorder(entries)) => entries,
            _ => Vec::new(),
        };
        let changed = self.executor.cache().changed_positions(&cache_key, &entries);

        if changed.is_empty() {
            staged.settle_locally();
            info!(buffer_key = %key, entry_count = 0, "Reorder batch had no changes");
            self.events.emit(EngineEvent::BatchFlushed {
                buffer_key: key.to_string(),
                entry_count: 0,
            });
            let result = Ok(0);
            flush.settled(&result);
            return result;
        }

        let entry_count = changed.len();
        let write = (flush.write)(changed);
        let result = staged
            .settle(async move { write.await.map(|()| None) })
            .await
            .map(|_| entry_count);
        match &result {
            Ok(_) => {
                info!(buffer_key = %key, entry_count, "Reorder batch flushed");
                self.events.emit(EngineEvent::BatchFlushed {
                    buffer_key: key.to_string(),
                    entry_count,
                });
            }
            Err(err) => {
                warn!(buffer_key = %key, entry_count, error = %err, "Reorder batch failed");
                self.events.emit(EngineEvent::BatchFailed {
                    buffer_key: key.to_string(),
                    error: err.to_string(),
                });
            }
        }
        flush.settled(&result);
        result
    }
}

impl<E: Entity> Drop for CoalescerInner<E> {
    fn drop(&mut self) {
        let buffers = match self.buffers.get_mut() {
            Ok(buffers) => buffers,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (key, buffer) in buffers.drain() {
            buffer.timer.abort();
            buffer.staged.discard("coalescer shut down");
            debug!(buffer_key = %key, "Reorder buffer discarded on shutdown");
        }
        let parked = match self.parked.get_mut() {
            Ok(parked) => parked,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (_, staged) in parked.drain() {
            staged.discard("coalescer shut down");
        }
    }
}
