//! List facade.

use std::sync::Arc;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use tasklane_core::{
    new_v7, EngineEventBus, ListRemote, Result, Task, TaskList, TaskListDraft, TaskListPatch,
};

use super::{ActionContext, ActionCore, ActionState};
use crate::cache::{CacheKey, Collection, EntityCache};
use crate::config::EngineConfig;
use crate::mutation::{MutationOutcome, MutationPlan};
use crate::patch::{next_sort_index, Op};

/// User intents on lists.
#[derive(Clone)]
pub struct ListActions {
    core: ActionCore<TaskList>,
    remote: Arc<dyn ListRemote>,
    tasks: Option<EntityCache<Task>>,
}

impl ListActions {
    pub fn new(
        cache: EntityCache<TaskList>,
        remote: Arc<dyn ListRemote>,
        events: EngineEventBus,
        config: &EngineConfig,
        ctx: ActionContext,
    ) -> Self {
        Self {
            core: ActionCore::new(cache, events, config, ctx),
            remote,
            tasks: None,
        }
    }

    /// Task cache whose per-list collections are dropped with their list.
    pub fn with_task_cache(mut self, tasks: EntityCache<Task>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn cache(&self) -> &EntityCache<TaskList> {
        self.core.cache()
    }

    pub fn lists(&self) -> Option<Collection<TaskList>> {
        self.cache().get(&CacheKey::lists())
    }

    pub fn status(&self) -> ActionState {
        self.core.status()
    }

    pub fn is_loading(&self) -> bool {
        self.core.status().is_loading()
    }

    pub fn watch_status(&self) -> watch::Receiver<ActionState> {
        self.core.watch_status()
    }

    pub fn refresh(&self) -> BoxFuture<'static, Result<Collection<TaskList>>> {
        let remote = Arc::clone(&self.remote);
        self.core
            .refresh("load lists", CacheKey::lists(), async move { remote.list().await })
    }

    pub fn create(&self, draft: TaskListDraft) -> BoxFuture<'static, Result<TaskList>> {
        self.create_as("create list", draft)
    }

    /// Create a list with the same name, color and pin state.
    pub fn duplicate(&self, id: Uuid) -> BoxFuture<'static, Result<TaskList>> {
        match self.core.locate(id) {
            Ok((_, list)) => self.create_as("duplicate list", list.to_draft()),
            Err(err) => self.core.reject("duplicate list", err),
        }
    }

    pub fn rename(
        &self,
        id: Uuid,
        name: impl Into<String>,
    ) -> BoxFuture<'static, Result<TaskList>> {
        let patch = TaskListPatch {
            name: Some(name.into()),
            ..TaskListPatch::default()
        };
        self.update_as("rename list", id, patch)
    }

    pub fn recolor(&self, id: Uuid, color: Option<String>) -> BoxFuture<'static, Result<TaskList>> {
        let patch = TaskListPatch {
            color: Some(color),
            ..TaskListPatch::default()
        };
        self.update_as("recolor list", id, patch)
    }

    pub fn toggle_pinned(&self, id: Uuid) -> BoxFuture<'static, Result<TaskList>> {
        match self.core.locate(id) {
            Ok((_, list)) => {
                let patch = TaskListPatch {
                    is_pinned: Some(!list.is_pinned),
                    ..TaskListPatch::default()
                };
                self.update_as("pin list", id, patch)
            }
            Err(err) => self.core.reject("pin list", err),
        }
    }

    /// Delete a list. Once the server confirms, the list's task collection is
    /// dropped from the task cache as well.
    pub fn delete(&self, id: Uuid) -> BoxFuture<'static, Result<()>> {
        const ACTION: &str = "delete list";
        let key = match self.core.locate(id) {
            Ok((key, _)) => key,
            Err(err) => return self.core.reject(ACTION, err),
        };
        let remote = Arc::clone(&self.remote);
        let tasks = self.tasks.clone();
        self.core
            .mutate(
                ACTION,
                MutationPlan::single(key, Op::Remove(vec![id])),
                async move { remote.delete(id).await.map(|()| None) },
                Some("list deleted".to_string()),
            )
            .map(move |result| {
                if let (Ok(_), Some(tasks)) = (&result, tasks) {
                    let task_key = CacheKey::tasks_in(id);
                    tasks.remove(&task_key);
                    debug!(cache_key = %task_key, "Dropped tasks of deleted list");
                }
                result.map(|_| ())
            })
            .boxed()
    }

    pub fn reorder(&self, ordered: &[Uuid]) -> Result<()> {
        let remote = Arc::clone(&self.remote);
        self.core
            .reorder("reorder lists", CacheKey::lists(), ordered, move |entries| {
                let remote = Arc::clone(&remote);
                async move { remote.reorder(entries).await }.boxed()
            })
    }

    pub fn cancel_reorder(&self) -> bool {
        self.core.cancel_reorder(&CacheKey::lists())
    }

    pub fn flush_reorder(&self) -> BoxFuture<'static, Result<Option<usize>>> {
        self.core.flush_reorder(&CacheKey::lists())
    }

    fn create_as(
        &self,
        action: &'static str,
        draft: TaskListDraft,
    ) -> BoxFuture<'static, Result<TaskList>> {
        let user_id = match self.core.user_id() {
            Ok(user_id) => user_id,
            Err(err) => return self.core.reject(action, err),
        };
        let key = CacheKey::lists();
        let sort_index = draft.sort_index.unwrap_or_else(|| {
            next_sort_index(self.cache().get(&key).as_deref().map(Vec::as_slice))
        });
        let mut draft = draft;
        draft.sort_index = Some(sort_index);
        let temp = TaskList::from_draft(new_v7(), user_id.as_str(), &draft, sort_index, Utc::now());

        let remote = Arc::clone(&self.remote);
        self.core
            .mutate(
                action,
                MutationPlan::single(key, Op::Insert(temp)),
                async move { remote.create(&user_id, draft).await.map(Some) },
                None,
            )
            .map(|result| result.and_then(MutationOutcome::into_record))
            .boxed()
    }

    fn update_as(
        &self,
        action: &'static str,
        id: Uuid,
        patch: TaskListPatch,
    ) -> BoxFuture<'static, Result<TaskList>> {
        let key = match self.core.locate(id) {
            Ok((key, _)) => key,
            Err(err) => return self.core.reject(action, err),
        };
        let remote = Arc::clone(&self.remote);
        let request = patch.clone();
        self.core
            .mutate(
                action,
                MutationPlan::single(key, Op::Update { id, patch }),
                async move { remote.update(id, request).await.map(Some) },
                None,
            )
            .map(|result| result.and_then(MutationOutcome::into_record))
            .boxed()
    }
}
