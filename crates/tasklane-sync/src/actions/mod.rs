//! Action facades: the caller-facing surface of the engine.
//!
//! Each facade method is one user intent. Methods apply their optimistic
//! write before returning and hand back a future for the network half, so
//! the cache already shows the change when the caller gets control back.
//! Failures are rolled back, reported through the [`Notifier`], and returned.

mod lists;
mod tags;
mod tasks;

pub use lists::ListActions;
pub use tags::TagActions;
pub use tasks::TaskActions;

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use tokio::sync::watch;
use tracing::warn;
use uuid::Uuid;

use tasklane_core::{
    EngineEvent, EngineEventBus, Entity, EntityKind, Error, IdentitySource, NoticeKind, Notifier,
    OrderEntry, RemoteResult, Result, SessionGuard,
};

use crate::cache::{CacheKey, Collection, EntityCache};
use crate::coalescer::{BatchCoalescer, BatchFlush, BufferKey};
use crate::config::EngineConfig;
use crate::mutation::{MutationExecutor, MutationOutcome, MutationPlan};

// =============================================================================
// CONTEXT
// =============================================================================

/// External collaborators shared by every facade.
#[derive(Clone)]
pub struct ActionContext {
    pub notifier: Arc<dyn Notifier>,
    pub identity: Arc<dyn IdentitySource>,
    pub session: Option<Arc<dyn SessionGuard>>,
}

impl ActionContext {
    pub fn new(notifier: Arc<dyn Notifier>, identity: Arc<dyn IdentitySource>) -> Self {
        Self {
            notifier,
            identity,
            session: None,
        }
    }

    pub fn with_session(mut self, session: Arc<dyn SessionGuard>) -> Self {
        self.session = Some(session);
        self
    }

    /// Tell the user that `action` (e.g. "create task") failed.
    pub(crate) fn report(&self, action: &str, kind: EntityKind, err: &Error) {
        warn!(entity_kind = %kind, action, error = %err, "Action failed");
        let message = format!("failed to {action} ({})", err.category());
        self.notifier.notify(NoticeKind::Error, &message);
        if let (Error::Unauthorized(_), Some(session)) = (err, &self.session) {
            session.signed_out(kind, &message);
        }
    }

    pub(crate) fn success(&self, message: &str) {
        self.notifier.notify(NoticeKind::Success, message);
    }
}

// =============================================================================
// STATUS
// =============================================================================

/// Outcome of the most recent action of a facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActionStatus {
    #[default]
    Idle,
    Submitting,
    Succeeded,
    Failed,
}

/// Aggregate action state of one entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActionState {
    /// Mutations of this kind whose remote call has not settled.
    pub in_flight: usize,
    pub last: ActionStatus,
}

impl ActionState {
    /// True while any mutation of this kind is outstanding.
    pub fn is_loading(&self) -> bool {
        self.in_flight > 0
    }
}

#[derive(Clone)]
pub(crate) struct ActionTracker {
    tx: Arc<watch::Sender<ActionState>>,
}

impl ActionTracker {
    fn new() -> Self {
        let (tx, _) = watch::channel(ActionState::default());
        Self { tx: Arc::new(tx) }
    }

    fn begin(&self) -> ActionGuard {
        self.tx.send_modify(|state| {
            state.in_flight += 1;
            state.last = ActionStatus::Submitting;
        });
        ActionGuard {
            tx: Arc::clone(&self.tx),
            finished: false,
        }
    }

    /// Record an outcome without touching `in_flight` (batches that needed
    /// no write, rejected input).
    fn record(&self, status: ActionStatus) {
        self.tx.send_modify(|state| state.last = status);
    }

    fn current(&self) -> ActionState {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<ActionState> {
        self.tx.subscribe()
    }
}

/// One in-flight action. Counts as failed if dropped unfinished.
struct ActionGuard {
    tx: Arc<watch::Sender<ActionState>>,
    finished: bool,
}

impl ActionGuard {
    fn succeeded(mut self) {
        self.finish(ActionStatus::Succeeded);
    }

    fn failed(mut self) {
        self.finish(ActionStatus::Failed);
    }

    fn finish(&mut self, status: ActionStatus) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.tx.send_modify(|state| {
            state.in_flight = state.in_flight.saturating_sub(1);
            state.last = status;
        });
    }
}

impl Drop for ActionGuard {
    fn drop(&mut self) {
        self.finish(ActionStatus::Failed);
    }
}

// =============================================================================
// SHARED FACADE CORE
// =============================================================================

pub(crate) struct ActionCore<E: Entity> {
    executor: MutationExecutor<E>,
    coalescer: BatchCoalescer<E>,
    ctx: ActionContext,
    tracker: ActionTracker,
}

impl<E: Entity> Clone for ActionCore<E> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            coalescer: self.coalescer.clone(),
            ctx: self.ctx.clone(),
            tracker: self.tracker.clone(),
        }
    }
}

impl<E: Entity> ActionCore<E> {
    pub(crate) fn new(
        cache: EntityCache<E>,
        events: EngineEventBus,
        config: &EngineConfig,
        ctx: ActionContext,
    ) -> Self {
        let executor = MutationExecutor::new(cache, events, config);
        let coalescer = BatchCoalescer::new(executor.clone(), config);
        Self {
            executor,
            coalescer,
            ctx,
            tracker: ActionTracker::new(),
        }
    }

    pub(crate) fn cache(&self) -> &EntityCache<E> {
        self.executor.cache()
    }

    pub(crate) fn status(&self) -> ActionState {
        self.tracker.current()
    }

    pub(crate) fn watch_status(&self) -> watch::Receiver<ActionState> {
        self.tracker.subscribe()
    }

    /// Acting user's id, or `Unauthorized` when nobody is signed in.
    pub(crate) fn user_id(&self) -> Result<String> {
        self.ctx
            .identity
            .current_user_id()
            .ok_or_else(|| Error::Unauthorized("no signed-in user".to_string()))
    }

    /// Visible record with `id` and the key it lives under.
    pub(crate) fn locate(&self, id: Uuid) -> Result<(CacheKey, E)> {
        let cache = self.cache();
        cache
            .locate(id)
            .and_then(|key| cache.find(&key, id).map(|record| (key, record)))
            .ok_or_else(|| Error::NotFound(format!("{} {id}", E::KIND)))
    }

    /// Report a failure detected before any optimistic write.
    pub(crate) fn reject<T: Send + 'static>(
        &self,
        action: &'static str,
        err: Error,
    ) -> BoxFuture<'static, Result<T>> {
        self.tracker.record(ActionStatus::Failed);
        self.ctx.report(action, E::KIND, &err);
        future::ready(Err(err)).boxed()
    }

    /// Optimistically apply `plan`, then settle it with `remote`.
    pub(crate) fn mutate<F>(
        &self,
        action: &'static str,
        plan: MutationPlan<E>,
        remote: F,
        success: Option<String>,
    ) -> BoxFuture<'static, Result<MutationOutcome<E>>>
    where
        F: Future<Output = RemoteResult<Option<E>>> + Send + 'static,
    {
        let staged = match self.executor.stage(plan) {
            Ok(staged) => staged,
            Err(err) => return self.reject(action, err),
        };
        let guard = self.tracker.begin();
        let ctx = self.ctx.clone();
        async move {
            match staged.settle(remote).await {
                Ok(outcome) => {
                    guard.succeeded();
                    if let Some(message) = success {
                        ctx.success(&message);
                    }
                    Ok(outcome)
                }
                Err(err) => {
                    guard.failed();
                    ctx.report(action, E::KIND, &err);
                    Err(err)
                }
            }
        }
        .boxed()
    }

    /// Fetch an authoritative collection and swap it into the cache.
    pub(crate) fn refresh<F>(
        &self,
        action: &'static str,
        key: CacheKey,
        fetch: F,
    ) -> BoxFuture<'static, Result<Collection<E>>>
    where
        F: Future<Output = RemoteResult<Vec<E>>> + Send + 'static,
    {
        let cache = self.cache().clone();
        let events = self.executor.events().clone();
        let ctx = self.ctx.clone();
        async move {
            match fetch.await {
                Ok(items) => {
                    let count = items.len();
                    cache.replace(&key, items);
                    events.emit(EngineEvent::Replaced {
                        cache_key: key.to_string(),
                        entity_kind: E::KIND,
                        count,
                    });
                    Ok(cache.get(&key).unwrap_or_default())
                }
                Err(remote_err) => {
                    let err = Error::from(remote_err);
                    ctx.report(action, E::KIND, &err);
                    Err(err)
                }
            }
        }
        .boxed()
    }

    /// Show `ordered` immediately and persist it once the burst settles.
    pub(crate) fn reorder<W>(
        &self,
        action: &'static str,
        key: CacheKey,
        ordered: &[Uuid],
        write: W,
    ) -> Result<()>
    where
        W: Fn(Vec<OrderEntry>) -> BoxFuture<'static, RemoteResult<()>> + Send + Sync + 'static,
    {
        let mut seen = HashSet::with_capacity(ordered.len());
        if let Some(dup) = ordered.iter().find(|id| !seen.insert(**id)) {
            let err = Error::InvalidInput(format!("{dup} appears twice in the new order"));
            self.tracker.record(ActionStatus::Failed);
            self.ctx.report(action, E::KIND, &err);
            return Err(err);
        }

        // The batch counts as in flight from dispatch until the server answers.
        let dispatch = self.tracker.clone();
        let write = move |entries: Vec<OrderEntry>| -> BoxFuture<'static, RemoteResult<()>> {
            let guard = dispatch.begin();
            let request = write(entries);
            async move {
                let result = request.await;
                match &result {
                    Ok(()) => guard.succeeded(),
                    Err(_) => guard.failed(),
                }
                result
            }
            .boxed()
        };

        let ctx = self.ctx.clone();
        let tracker = self.tracker.clone();
        let flush = BatchFlush::new(write).on_settled(move |result| match result {
            Ok(_) => tracker.record(ActionStatus::Succeeded),
            Err(err) => {
                tracker.record(ActionStatus::Failed);
                ctx.report(action, E::KIND, err);
            }
        });
        let buffer = BufferKey::reorder(&key);
        let entries = OrderEntry::sequence(ordered);
        self.coalescer
            .schedule(buffer, key, entries, flush)
            .map_err(|err| {
                self.ctx.report(action, E::KIND, &err);
                err
            })
    }

    pub(crate) fn cancel_reorder(&self, key: &CacheKey) -> bool {
        self.coalescer.cancel(&BufferKey::reorder(key))
    }

    pub(crate) fn flush_reorder(
        &self,
        key: &CacheKey,
    ) -> BoxFuture<'static, Result<Option<usize>>> {
        let coalescer = self.coalescer.clone();
        let buffer = BufferKey::reorder(key);
        async move { coalescer.flush_now(&buffer).await }.boxed()
    }

    pub(crate) fn cancel_all_reorders(&self) -> usize {
        self.coalescer.cancel_all()
    }
}
