//! Mutation executor: optimistic apply, then commit or rollback.
//!
//! A mutation is staged synchronously: its operations are pushed onto the
//! pending stacks of the affected cache keys and become visible to readers
//! before any network work starts. The returned [`Staged`] handle is then
//! settled with the remote call's result. Success folds the operations into
//! the confirmed collections (reconciled with the server record); failure
//! removes exactly this mutation's delta and leaves everything else alone.

use std::collections::HashSet;
use std::future::Future;
use std::time::Instant;

use futures::future::{self, BoxFuture, FutureExt};
use tracing::{debug, info, warn};

use tasklane_core::{EngineEvent, EngineEventBus, Entity, Error, RemoteResult, Result};

use crate::cache::{CacheKey, EntityCache, MutationId};
use crate::config::EngineConfig;
use crate::patch::Op;

// =============================================================================
// TYPES
// =============================================================================

/// Lifecycle of one mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
    Pending,
    Committed,
    RolledBack,
}

impl MutationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationStatus::Pending => "pending",
            MutationStatus::Committed => "committed",
            MutationStatus::RolledBack => "rolled_back",
        }
    }
}

/// Result of a committed mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome<E: Entity> {
    pub mutation_id: MutationId,
    pub status: MutationStatus,
    /// Record returned by the server, if the call returns one.
    pub record: Option<E>,
    /// A fetch replaced one of the affected collections while the call was in
    /// flight; the result was merged into the newer collection.
    pub stale: bool,
}

impl<E: Entity> MutationOutcome<E> {
    /// The server record, for calls that must return one (create, update).
    pub fn into_record(self) -> Result<E> {
        self.record.ok_or_else(|| {
            Error::Internal(format!("{} write returned no record", E::KIND))
        })
    }
}

/// The cache operations of one logical write, one per affected key.
///
/// Moving a task between lists, for example, removes it from one key and
/// inserts it into another; both halves commit or roll back together.
#[derive(Debug, Clone)]
pub struct MutationPlan<E: Entity> {
    steps: Vec<(CacheKey, Op<E>)>,
}

impl<E: Entity> MutationPlan<E> {
    pub fn single(key: CacheKey, op: Op<E>) -> Self {
        Self {
            steps: vec![(key, op)],
        }
    }

    /// Add an operation on another key.
    pub fn then(mut self, key: CacheKey, op: Op<E>) -> Self {
        self.steps.push((key, op));
        self
    }

    pub fn keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.steps.iter().map(|(key, _)| key)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

// =============================================================================
// EXECUTOR
// =============================================================================

/// Runs optimistic mutations against one entity cache.
pub struct MutationExecutor<E: Entity> {
    cache: EntityCache<E>,
    events: EngineEventBus,
    max_pending: usize,
}

impl<E: Entity> Clone for MutationExecutor<E> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            events: self.events.clone(),
            max_pending: self.max_pending,
        }
    }
}

impl<E: Entity> MutationExecutor<E> {
    pub fn new(cache: EntityCache<E>, events: EngineEventBus, config: &EngineConfig) -> Self {
        Self {
            cache,
            events,
            max_pending: config.max_pending_per_key,
        }
    }

    pub fn cache(&self) -> &EntityCache<E> {
        &self.cache
    }

    pub fn events(&self) -> &EngineEventBus {
        &self.events
    }

    /// Apply the plan's operations to the cache and return the handle that
    /// settles them.
    ///
    /// Either every step is applied or none is: if a later step is rejected
    /// the earlier ones are rolled back before the error is returned.
    pub fn stage(&self, plan: MutationPlan<E>) -> Result<Staged<E>> {
        let mut seen = HashSet::new();
        if let Some(key) = plan.keys().find(|key| !seen.insert(*key)) {
            return Err(Error::InvalidInput(format!(
                "mutation touches `{key}` more than once"
            )));
        }

        let mut staged = Staged {
            cache: self.cache.clone(),
            events: self.events.clone(),
            id: MutationId::new(),
            keys: Vec::with_capacity(plan.len()),
            started: Instant::now(),
            status: MutationStatus::Pending,
        };
        for (key, op) in plan.steps {
            let op_name = op.name();
            self.cache.begin(&key, staged.id, op, self.max_pending)?;
            debug!(
                mutation_id = %staged.id,
                cache_key = %key,
                entity_kind = %E::KIND,
                op = op_name,
                pending_count = self.cache.pending_count(&key),
                "Optimistic patch applied"
            );
            self.events.emit(EngineEvent::Applied {
                mutation_id: staged.id.as_uuid(),
                cache_key: key.to_string(),
                entity_kind: E::KIND,
                op: op_name,
            });
            staged.keys.push(key);
        }
        Ok(staged)
    }

    /// Stage `plan`, then settle it with `remote`.
    ///
    /// The optimistic write happens before this function returns; only the
    /// returned future waits on the network.
    pub fn run<F>(
        &self,
        plan: MutationPlan<E>,
        remote: F,
    ) -> BoxFuture<'static, Result<MutationOutcome<E>>>
    where
        F: Future<Output = RemoteResult<Option<E>>> + Send + 'static,
    {
        match self.stage(plan) {
            Ok(staged) => staged.settle(remote).boxed(),
            Err(err) => future::ready(Err(err)).boxed(),
        }
    }
}

// =============================================================================
// STAGED MUTATION
// =============================================================================

/// An applied, not yet settled mutation.
///
/// Dropping it without settling rolls the optimistic delta back, so an
/// abandoned future never leaves a phantom write in the cache.
pub struct Staged<E: Entity> {
    cache: EntityCache<E>,
    events: EngineEventBus,
    id: MutationId,
    keys: Vec<CacheKey>,
    started: Instant,
    status: MutationStatus,
}

impl<E: Entity> Staged<E> {
    pub fn id(&self) -> MutationId {
        self.id
    }

    pub fn keys(&self) -> &[CacheKey] {
        &self.keys
    }

    pub fn status(&self) -> MutationStatus {
        self.status
    }

    /// Await the remote call and commit or roll back accordingly.
    pub async fn settle<F>(self, remote: F) -> Result<MutationOutcome<E>>
    where
        F: Future<Output = RemoteResult<Option<E>>>,
    {
        match remote.await {
            Ok(record) => Ok(self.commit(record)),
            Err(remote_err) => {
                let status = remote_err.status;
                let error = Error::from(remote_err);
                warn!(
                    mutation_id = %self.id,
                    entity_kind = %E::KIND,
                    status = ?status,
                    error = %error,
                    "Remote write failed"
                );
                self.rollback(&error);
                Err(error)
            }
        }
    }

    /// Fold the mutation into the confirmed collections.
    pub fn commit(mut self, record: Option<E>) -> MutationOutcome<E> {
        let duration_ms = self.started.elapsed().as_millis() as u64;
        let mut stale = false;
        for key in &self.keys {
            match self.cache.commit(key, self.id, record.as_ref()) {
                Some(report) => {
                    stale |= report.stale;
                    info!(
                        mutation_id = %self.id,
                        cache_key = %key,
                        entity_kind = %E::KIND,
                        duration_ms,
                        stale = report.stale,
                        "Mutation committed"
                    );
                    self.events.emit(EngineEvent::Committed {
                        mutation_id: self.id.as_uuid(),
                        cache_key: key.to_string(),
                        entity_kind: E::KIND,
                        duration_ms,
                    });
                }
                None => {
                    debug!(
                        mutation_id = %self.id,
                        cache_key = %key,
                        "Cache key removed before commit"
                    );
                }
            }
        }
        self.status = MutationStatus::Committed;
        MutationOutcome {
            mutation_id: self.id,
            status: self.status,
            record,
            stale,
        }
    }

    /// Remove this mutation's optimistic delta.
    pub fn rollback(mut self, error: &Error) {
        self.undo(&error.to_string());
    }

    /// Keep the optimistic state without a server round trip.
    pub fn settle_locally(self) -> MutationOutcome<E> {
        self.commit(None)
    }

    /// Remove the optimistic delta of a mutation that will never be sent.
    pub(crate) fn discard(mut self, reason: &str) {
        self.undo(reason);
    }

    /// Replace the staged operation on the first key. Returns false if the
    /// key was removed in the meantime.
    pub fn amend(&self, op: Op<E>) -> bool {
        let Some(key) = self.keys.first() else {
            return false;
        };
        let amended = self.cache.amend(key, self.id, op);
        if amended {
            debug!(mutation_id = %self.id, cache_key = %key, "Staged operation amended");
        }
        amended
    }

    /// Current operation on the first key.
    pub fn current_op(&self) -> Option<Op<E>> {
        self.keys
            .first()
            .and_then(|key| self.cache.pending_op(key, self.id))
    }

    fn undo(&mut self, reason: &str) {
        for key in &self.keys {
            if self.cache.rollback(key, self.id) {
                info!(
                    mutation_id = %self.id,
                    cache_key = %key,
                    entity_kind = %E::KIND,
                    error = reason,
                    "Mutation rolled back"
                );
                self.events.emit(EngineEvent::RolledBack {
                    mutation_id: self.id.as_uuid(),
                    cache_key: key.to_string(),
                    entity_kind: E::KIND,
                    error: reason.to_string(),
                });
            }
        }
        self.status = MutationStatus::RolledBack;
    }
}

impl<E: Entity> Drop for Staged<E> {
    fn drop(&mut self) {
        if self.status == MutationStatus::Pending {
            warn!(mutation_id = %self.id, "Mutation dropped before settling; rolling back");
            self.undo("abandoned before settling");
        }
    }
}
