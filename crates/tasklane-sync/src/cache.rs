//! Entity cache: the canonical, renderable state per cache key.
//!
//! Each key holds two layers. The *confirmed* collection is what the server
//! has acknowledged (an authoritative fetch plus every committed mutation).
//! On top of it sits an ordered stack of pending optimistic operations. The
//! *visible* collection, the one readers get, is the confirmed collection with
//! every pending operation replayed in call order.
//!
//! Removing a pending operation (commit or rollback) re-derives the visible
//! collection, so a mutation only ever takes back its own delta, whatever
//! order the network answers in.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use tasklane_core::defaults::{LISTS_KEY, TAGS_KEY, TASKS_KEY};
use tasklane_core::{new_v7, Entity, Error, OrderEntry, Result};

use crate::patch::{dedupe_by_id, Op};

/// Shared, immutable snapshot of one collection.
pub type Collection<E> = Arc<Vec<E>>;

/// Listener invoked after every write that changes a key's visible collection.
/// `None` means the key is back to unfetched.
pub type Listener<E> = Arc<dyn Fn(&CacheKey, Option<&[E]>) + Send + Sync>;

// =============================================================================
// KEYS AND IDS
// =============================================================================

/// Identifier under which a collection is stored and invalidated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Tasks that are not filed under a list.
    pub fn tasks() -> Self {
        Self(TASKS_KEY.to_string())
    }

    /// Tasks of one list.
    pub fn tasks_in(list_id: Uuid) -> Self {
        Self(format!("{TASKS_KEY}:{list_id}"))
    }

    /// Tasks of `list_id`, or the unfiled tasks for `None`.
    pub fn tasks_for(list_id: Option<Uuid>) -> Self {
        list_id.map_or_else(Self::tasks, Self::tasks_in)
    }

    pub fn lists() -> Self {
        Self(LISTS_KEY.to_string())
    }

    pub fn tags() -> Self {
        Self(TAGS_KEY.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one optimistic mutation (UUIDv7, so ids sort in call order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutationId(Uuid);

impl MutationId {
    pub fn new() -> Self {
        Self(new_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MutationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Whether a commit merged into the collection its mutation started from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitReport {
    /// The key was replaced or invalidated while the mutation was in flight.
    pub stale: bool,
}

// =============================================================================
// ENTRY
// =============================================================================

/// Bookkeeping for one in-flight mutation on one key.
struct PendingRecord<E: Entity> {
    id: MutationId,
    op: Op<E>,
    /// Visible collection right before this mutation was applied.
    snapshot: Option<Collection<E>>,
    /// `base_version` of the entry when the snapshot was taken.
    base_version: u64,
    /// `generation` of the entry when the mutation started.
    generation: u64,
}

struct Entry<E: Entity> {
    confirmed: Option<Collection<E>>,
    pending: Vec<PendingRecord<E>>,
    visible: Option<Collection<E>>,
    /// Bumped on every change to `confirmed` and whenever a pending
    /// operation other than the newest is amended or dropped.
    base_version: u64,
    /// Bumped when `confirmed` is wholesale replaced or invalidated.
    generation: u64,
}

impl<E: Entity> Entry<E> {
    fn new() -> Self {
        Self {
            confirmed: None,
            pending: Vec::new(),
            visible: None,
            base_version: 0,
            generation: 0,
        }
    }

    fn derive_visible(&self) -> Option<Vec<E>> {
        if self.confirmed.is_none() && self.pending.is_empty() {
            return None;
        }
        let mut items = self
            .confirmed
            .as_ref()
            .map(|c| c.as_ref().clone())
            .unwrap_or_default();
        for record in &self.pending {
            record.op.apply_to(&mut items);
        }
        Some(items)
    }

    /// Store a new visible collection. Returns false (and keeps the existing
    /// reference) when it is deep-equal to the current one.
    fn set_visible(&mut self, next: Option<Collection<E>>) -> bool {
        let unchanged = match (&self.visible, &next) {
            (None, None) => true,
            (Some(current), Some(next)) => Arc::ptr_eq(current, next) || current == next,
            _ => false,
        };
        if unchanged {
            return false;
        }
        self.visible = next;
        true
    }

    fn recompute(&mut self) -> bool {
        let next = if self.pending.is_empty() {
            self.confirmed.clone()
        } else {
            self.derive_visible().map(Arc::new)
        };
        self.set_visible(next)
    }

    fn set_confirmed(&mut self, items: Vec<E>) {
        self.confirmed = Some(Arc::new(items));
        self.base_version += 1;
    }

    fn position(&self, id: MutationId) -> Option<usize> {
        self.pending.iter().position(|r| r.id == id)
    }
}

// =============================================================================
// CACHE
// =============================================================================

struct ListenerSlot<E: Entity> {
    id: u64,
    listener: Listener<E>,
}

struct CacheInner<E: Entity> {
    entries: Mutex<HashMap<CacheKey, Entry<E>>>,
    listeners: Mutex<HashMap<CacheKey, Vec<ListenerSlot<E>>>>,
    next_listener_id: AtomicU64,
}

/// In-memory keyed store of entity collections for one entity kind.
///
/// Cloning is cheap and every clone observes the same state. All operations
/// are synchronous; the internal lock is never held across an await point or
/// while listeners run.
pub struct EntityCache<E: Entity> {
    inner: Arc<CacheInner<E>>,
}

impl<E: Entity> Clone for EntityCache<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Entity> Default for EntityCache<E> {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        error!("Recovered poisoned lock");
        poisoned.into_inner()
    })
}

impl<E: Entity> EntityCache<E> {
    /// Create an empty cache where every key is unfetched.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: Mutex::new(HashMap::new()),
                listeners: Mutex::new(HashMap::new()),
                next_listener_id: AtomicU64::new(1),
            }),
        }
    }

    /// Current visible collection, or `None` if no fetch or write has
    /// populated the key yet.
    ///
    /// Successive reads return the same `Arc` until the next write that
    /// changes the key.
    pub fn get(&self, key: &CacheKey) -> Option<Collection<E>> {
        lock(&self.inner.entries)
            .get(key)
            .and_then(|entry| entry.visible.clone())
    }

    /// Visible record with `id` under `key`.
    pub fn find(&self, key: &CacheKey, id: Uuid) -> Option<E> {
        self.get(key)
            .and_then(|items| items.iter().find(|e| e.id() == id).cloned())
    }

    /// First key (in key order) whose visible collection contains `id`.
    pub fn locate(&self, id: Uuid) -> Option<CacheKey> {
        let entries = lock(&self.inner.entries);
        let mut keys: Vec<&CacheKey> = entries
            .iter()
            .filter(|(_, entry)| {
                entry
                    .visible
                    .as_ref()
                    .is_some_and(|items| items.iter().any(|e| e.id() == id))
            })
            .map(|(key, _)| key)
            .collect();
        keys.sort();
        keys.first().map(|key| (*key).clone())
    }

    /// Keys that currently hold a visible collection.
    pub fn keys(&self) -> Vec<CacheKey> {
        let entries = lock(&self.inner.entries);
        let mut keys: Vec<CacheKey> = entries
            .iter()
            .filter(|(_, entry)| entry.visible.is_some())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of optimistic mutations still pending on `key`.
    pub fn pending_count(&self, key: &CacheKey) -> usize {
        lock(&self.inner.entries)
            .get(key)
            .map_or(0, |entry| entry.pending.len())
    }

    /// Swap in an authoritative collection (after a successful fetch).
    ///
    /// Pending optimistic operations stay on top of the new collection, so a
    /// fetch that races an in-flight write does not hide it.
    pub fn replace(&self, key: &CacheKey, items: Vec<E>) {
        let mut items = items;
        let dropped = dedupe_by_id(&mut items);
        if dropped > 0 {
            warn!(cache_key = %key, dropped, "Duplicate ids in replaced collection");
        }
        self.write(key, true, |entry| {
            entry.set_confirmed(items);
            entry.generation += 1;
            debug!(
                cache_key = %key,
                pending_count = entry.pending.len(),
                "Cache collection replaced"
            );
        });
    }

    /// Apply a pure transform to the confirmed collection (unfetched counts
    /// as empty). Pending optimistic operations are replayed on the result.
    pub fn patch<F>(&self, key: &CacheKey, transform: F)
    where
        F: FnOnce(&[E]) -> Vec<E>,
    {
        self.write(key, true, |entry| {
            let current: &[E] = entry
                .confirmed
                .as_deref()
                .map(|c| c.as_slice())
                .unwrap_or(&[]);
            let mut next = transform(current);
            let dropped = dedupe_by_id(&mut next);
            if dropped > 0 {
                warn!(cache_key = %key, dropped, "Patch produced duplicate ids; kept first");
            }
            entry.set_confirmed(next);
        });
    }

    /// Forget the confirmed collection so the key reads as unfetched once no
    /// mutation is pending on it.
    pub fn invalidate(&self, key: &CacheKey) {
        self.write(key, false, |entry| {
            entry.confirmed = None;
            entry.base_version += 1;
            entry.generation += 1;
        });
    }

    /// Drop the key together with its pending mutations. Late commits and
    /// rollbacks for those mutations become no-ops.
    pub fn remove(&self, key: &CacheKey) {
        let had_visible = lock(&self.inner.entries)
            .remove(key)
            .is_some_and(|entry| entry.visible.is_some());
        if had_visible {
            debug!(cache_key = %key, "Cache key removed");
            self.notify(key, None);
        }
    }

    /// Register a listener for `key`. It stays registered until the returned
    /// [`Subscription`] is dropped.
    ///
    /// Listeners run synchronously after the write, outside the cache lock.
    /// They must not call back into a `BatchCoalescer` for the same cache.
    pub fn subscribe<F>(&self, key: &CacheKey, listener: F) -> Subscription<E>
    where
        F: Fn(&CacheKey, Option<&[E]>) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.listeners)
            .entry(key.clone())
            .or_default()
            .push(ListenerSlot {
                id,
                listener: Arc::new(listener),
            });
        Subscription {
            cache: Arc::downgrade(&self.inner),
            key: key.clone(),
            id,
        }
    }

    // ---------------------------------------------------------------------
    // Optimistic protocol (used by the executor and coalescer)
    // ---------------------------------------------------------------------

    /// Push a pending operation and apply it to the visible collection.
    pub(crate) fn begin(
        &self,
        key: &CacheKey,
        id: MutationId,
        op: Op<E>,
        max_pending: usize,
    ) -> Result<()> {
        let mut op = Some(op);
        self.write(key, true, |entry| {
            if entry.pending.len() >= max_pending {
                return Err(Error::Internal(format!(
                    "too many pending mutations on `{key}` ({max_pending})"
                )));
            }
            if let Some(op) = op.take() {
                entry.pending.push(PendingRecord {
                    id,
                    op,
                    snapshot: entry.visible.clone(),
                    base_version: entry.base_version,
                    generation: entry.generation,
                });
            }
            Ok(())
        })
        .unwrap_or_else(|| Err(Error::Internal(format!("cache key `{key}` unavailable"))))
    }

    /// Replace the operation of a pending mutation (coalesced bursts).
    pub(crate) fn amend(&self, key: &CacheKey, id: MutationId, op: Op<E>) -> bool {
        self.write(key, false, |entry| match entry.position(id) {
            Some(index) => {
                entry.pending[index].op = op;
                if index + 1 < entry.pending.len() {
                    entry.base_version += 1;
                }
                true
            }
            None => false,
        })
        .unwrap_or(false)
    }

    /// Current operation of a pending mutation.
    pub(crate) fn pending_op(&self, key: &CacheKey, id: MutationId) -> Option<Op<E>> {
        let entries = lock(&self.inner.entries);
        let entry = entries.get(key)?;
        entry
            .position(id)
            .map(|index| entry.pending[index].op.clone())
    }

    /// Fold a pending mutation into the confirmed collection, reconciling it
    /// with the server's record when one was returned.
    ///
    /// Returns `None` when the key or the mutation is gone (key removed).
    pub(crate) fn commit(
        &self,
        key: &CacheKey,
        id: MutationId,
        server: Option<&E>,
    ) -> Option<CommitReport> {
        self.write(key, false, |entry| {
            let index = entry.position(id)?;
            let record = entry.pending.remove(index);
            let mut base = entry
                .confirmed
                .as_ref()
                .map(|c| c.as_ref().clone())
                .unwrap_or_default();
            record.op.apply_to(&mut base);

            if let Some(server) = server {
                match &record.op {
                    Op::Insert(local) => {
                        let temp_id = local.id();
                        let real_id = server.id();
                        if temp_id != real_id && base.iter().any(|e| e.id() == real_id) {
                            // A fetch already delivered the real record.
                            base.retain(|e| e.id() != temp_id);
                        } else if let Some(slot) = base.iter_mut().find(|e| e.id() == temp_id) {
                            *slot = server.clone();
                        }
                        if temp_id != real_id {
                            for pending in &mut entry.pending {
                                pending.op.rewrite_id(temp_id, real_id);
                            }
                        }
                    }
                    Op::Update { .. } => {
                        if let Some(slot) = base.iter_mut().find(|e| e.id() == server.id()) {
                            slot.reconcile(server);
                        }
                    }
                    Op::Remove(_) | Op::Reorder(_) => {}
                }
            }

            entry.set_confirmed(base);
            Some(CommitReport {
                stale: record.generation != entry.generation,
            })
        })
        .flatten()
    }

    /// Remove a pending mutation's delta from the visible collection.
    ///
    /// When nothing else touched the key since the mutation started, the
    /// visible collection is restored from the mutation's snapshot, which is
    /// exactly the pre-mutation state. Otherwise the remaining pending
    /// operations are replayed over the confirmed collection.
    pub(crate) fn rollback(&self, key: &CacheKey, id: MutationId) -> bool {
        let (found, changed, visible) = {
            let mut entries = lock(&self.inner.entries);
            let Some(entry) = entries.get_mut(key) else {
                return false;
            };
            let Some(index) = entry.position(id) else {
                return false;
            };
            let was_top = index + 1 == entry.pending.len();
            let record = entry.pending.remove(index);
            let changed = if was_top && record.base_version == entry.base_version {
                entry.set_visible(record.snapshot)
            } else {
                entry.base_version += 1;
                entry.recompute()
            };
            (true, changed, entry.visible.clone())
        };
        if changed {
            self.notify(key, visible.as_ref().map(|c| c.as_slice()));
        }
        found
    }

    /// Confirmed entries whose position differs from `entries`. Ids missing
    /// from the confirmed collection are skipped: they have nothing to move
    /// on the server yet.
    pub(crate) fn changed_positions(
        &self,
        key: &CacheKey,
        entries: &[OrderEntry],
    ) -> Vec<OrderEntry> {
        let map = lock(&self.inner.entries);
        let Some(confirmed) = map.get(key).and_then(|entry| entry.confirmed.clone()) else {
            return Vec::new();
        };
        drop(map);
        let current: HashMap<Uuid, Option<i64>> = confirmed
            .iter()
            .map(|e| (e.id(), e.sort_index()))
            .collect();
        entries
            .iter()
            .filter(|entry| match current.get(&entry.id) {
                Some(Some(index)) => *index != entry.sort_index,
                Some(None) | None => false,
            })
            .copied()
            .collect()
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    /// Run `f` against the entry for `key`, recompute the visible collection,
    /// and notify listeners if it changed. Returns `None` when the entry does
    /// not exist and `create` is false.
    fn write<R>(
        &self,
        key: &CacheKey,
        create: bool,
        f: impl FnOnce(&mut Entry<E>) -> R,
    ) -> Option<R> {
        let (result, notify) = {
            let mut entries = lock(&self.inner.entries);
            let entry = if create {
                entries.entry(key.clone()).or_insert_with(Entry::new)
            } else {
                entries.get_mut(key)?
            };
            let result = f(entry);
            let changed = entry.recompute();
            (result, changed.then(|| entry.visible.clone()))
        };
        if let Some(visible) = notify {
            self.notify(key, visible.as_ref().map(|c| c.as_slice()));
        }
        Some(result)
    }

    fn notify(&self, key: &CacheKey, items: Option<&[E]>) {
        let listeners: Vec<Listener<E>> = lock(&self.inner.listeners)
            .get(key)
            .map(|slots| slots.iter().map(|s| Arc::clone(&s.listener)).collect())
            .unwrap_or_default();
        for listener in listeners {
            trace!(cache_key = %key, "Notifying cache listener");
            listener(key, items);
        }
    }
}

/// Handle that keeps a cache listener registered.
pub struct Subscription<E: Entity> {
    cache: Weak<CacheInner<E>>,
    key: CacheKey,
    id: u64,
}

impl<E: Entity> Drop for Subscription<E> {
    fn drop(&mut self) {
        if let Some(inner) = self.cache.upgrade() {
            let mut listeners = lock(&inner.listeners);
            if let Some(slots) = listeners.get_mut(&self.key) {
                slots.retain(|slot| slot.id != self.id);
                if slots.is_empty() {
                    listeners.remove(&self.key);
                }
            }
        }
    }
}
