//! Task facade.

use std::sync::Arc;

use chrono::Utc;
use futures::future::{self, BoxFuture, FutureExt};
use tokio::sync::watch;
use uuid::Uuid;

use tasklane_core::{
    new_v7, EngineEventBus, Result, Task, TaskDraft, TaskFilter, TaskPatch, TaskRemote,
};

use super::{ActionContext, ActionCore, ActionState};
use crate::cache::{CacheKey, Collection, EntityCache};
use crate::config::EngineConfig;
use crate::mutation::{MutationOutcome, MutationPlan};
use crate::patch::{next_sort_index, Op};

/// User intents on tasks.
#[derive(Clone)]
pub struct TaskActions {
    core: ActionCore<Task>,
    remote: Arc<dyn TaskRemote>,
}

impl TaskActions {
    pub fn new(
        cache: EntityCache<Task>,
        remote: Arc<dyn TaskRemote>,
        events: EngineEventBus,
        config: &EngineConfig,
        ctx: ActionContext,
    ) -> Self {
        Self {
            core: ActionCore::new(cache, events, config, ctx),
            remote,
        }
    }

    pub fn cache(&self) -> &EntityCache<Task> {
        self.core.cache()
    }

    /// Visible tasks of a list (`None`: tasks without a list).
    pub fn tasks(&self, list_id: Option<Uuid>) -> Option<Collection<Task>> {
        self.cache().get(&CacheKey::tasks_for(list_id))
    }

    pub fn status(&self) -> ActionState {
        self.core.status()
    }

    /// True while any task mutation is waiting on the server.
    pub fn is_loading(&self) -> bool {
        self.core.status().is_loading()
    }

    pub fn watch_status(&self) -> watch::Receiver<ActionState> {
        self.core.watch_status()
    }

    /// Load the tasks of a list from the server.
    pub fn refresh(&self, list_id: Option<Uuid>) -> BoxFuture<'static, Result<Collection<Task>>> {
        let remote = Arc::clone(&self.remote);
        self.core.refresh(
            "load tasks",
            CacheKey::tasks_for(list_id),
            async move { remote.list(TaskFilter { list_id }).await },
        )
    }

    /// Create a task. It is shown under a temporary id until the server
    /// answers, then swapped for the server's record.
    pub fn create(&self, draft: TaskDraft) -> BoxFuture<'static, Result<Task>> {
        self.create_as("create task", draft)
    }

    /// Create a copy of a task in the same list.
    pub fn duplicate(&self, id: Uuid) -> BoxFuture<'static, Result<Task>> {
        match self.core.locate(id) {
            Ok((_, task)) => self.create_as("duplicate task", task.to_draft()),
            Err(err) => self.core.reject("duplicate task", err),
        }
    }

    pub fn update(&self, id: Uuid, patch: TaskPatch) -> BoxFuture<'static, Result<Task>> {
        self.update_as("update task", id, patch)
    }

    pub fn rename(&self, id: Uuid, title: impl Into<String>) -> BoxFuture<'static, Result<Task>> {
        self.update_as("rename task", id, TaskPatch::title(title))
    }

    pub fn toggle_completed(&self, id: Uuid) -> BoxFuture<'static, Result<Task>> {
        match self.core.locate(id) {
            Ok((_, task)) => {
                self.update_as("update task", id, TaskPatch::completed(!task.is_completed))
            }
            Err(err) => self.core.reject("update task", err),
        }
    }

    pub fn toggle_pinned(&self, id: Uuid) -> BoxFuture<'static, Result<Task>> {
        match self.core.locate(id) {
            Ok((_, task)) => self.update_as("pin task", id, TaskPatch::pinned(!task.is_pinned)),
            Err(err) => self.core.reject("pin task", err),
        }
    }

    /// File a task under another list (`None`: no list). It is appended
    /// after the target list's last task.
    pub fn move_to_list(
        &self,
        id: Uuid,
        list_id: Option<Uuid>,
    ) -> BoxFuture<'static, Result<Task>> {
        const ACTION: &str = "move task";
        let (from, task) = match self.core.locate(id) {
            Ok(found) => found,
            Err(err) => return self.core.reject(ACTION, err),
        };
        let to = CacheKey::tasks_for(list_id);
        if from == to {
            return future::ready(Ok(task)).boxed();
        }

        let sort_index = next_sort_index(self.cache().get(&to).as_deref().map(Vec::as_slice));
        let patch = TaskPatch {
            list_id: Some(list_id),
            sort_index: Some(sort_index),
            ..TaskPatch::default()
        };
        let mut moved = task;
        moved.list_id = list_id;
        moved.sort_index = sort_index;

        let plan = MutationPlan::single(from, Op::Remove(vec![id])).then(to, Op::Insert(moved));
        let remote = Arc::clone(&self.remote);
        self.core
            .mutate(
                ACTION,
                plan,
                async move { remote.update(id, patch).await.map(Some) },
                None,
            )
            .map(|result| result.and_then(MutationOutcome::into_record))
            .boxed()
    }

    pub fn delete(&self, id: Uuid) -> BoxFuture<'static, Result<()>> {
        const ACTION: &str = "delete task";
        let key = match self.core.locate(id) {
            Ok((key, _)) => key,
            Err(err) => return self.core.reject(ACTION, err),
        };
        let remote = Arc::clone(&self.remote);
        self.core
            .mutate(
                ACTION,
                MutationPlan::single(key, Op::Remove(vec![id])),
                async move { remote.delete(id).await.map(|()| None) },
                Some("task deleted".to_string()),
            )
            .map(|result| result.map(|_| ()))
            .boxed()
    }

    /// Delete every completed task of a list in one request. Resolves to the
    /// number of tasks removed.
    pub fn clear_completed(&self, list_id: Option<Uuid>) -> BoxFuture<'static, Result<usize>> {
        let key = CacheKey::tasks_for(list_id);
        let ids: Vec<Uuid> = self
            .cache()
            .get(&key)
            .map(|tasks| {
                tasks
                    .iter()
                    .filter(|t| t.is_completed)
                    .map(|t| t.id)
                    .collect()
            })
            .unwrap_or_default();
        if ids.is_empty() {
            return future::ready(Ok(0)).boxed();
        }

        let count = ids.len();
        let remote = Arc::clone(&self.remote);
        let request = ids.clone();
        self.core
            .mutate(
                "clear completed tasks",
                MutationPlan::single(key, Op::Remove(ids)),
                async move { remote.delete_many(request).await.map(|()| None) },
                Some(format!("cleared {count} completed tasks")),
            )
            .map(move |result| result.map(|_| count))
            .boxed()
    }

    /// Show a new order immediately; the write goes out once the burst of
    /// reorders has been quiet for the debounce window.
    pub fn reorder(&self, list_id: Option<Uuid>, ordered: &[Uuid]) -> Result<()> {
        let remote = Arc::clone(&self.remote);
        self.core.reorder(
            "reorder tasks",
            CacheKey::tasks_for(list_id),
            ordered,
            move |entries| {
                let remote = Arc::clone(&remote);
                async move { remote.reorder(entries).await }.boxed()
            },
        )
    }

    /// Stop a buffered reorder without writing it. The order shown stays
    /// pending until the next reorder of the same list sends it.
    pub fn cancel_reorder(&self, list_id: Option<Uuid>) -> bool {
        self.core.cancel_reorder(&CacheKey::tasks_for(list_id))
    }

    /// Write a buffered reorder now.
    pub fn flush_reorder(
        &self,
        list_id: Option<Uuid>,
    ) -> BoxFuture<'static, Result<Option<usize>>> {
        self.core.flush_reorder(&CacheKey::tasks_for(list_id))
    }

    /// Discard every buffered task reorder (view teardown).
    pub fn cancel_all_reorders(&self) -> usize {
        self.core.cancel_all_reorders()
    }

    fn create_as(
        &self,
        action: &'static str,
        draft: TaskDraft,
    ) -> BoxFuture<'static, Result<Task>> {
        let user_id = match self.core.user_id() {
            Ok(user_id) => user_id,
            Err(err) => return self.core.reject(action, err),
        };
        let key = CacheKey::tasks_for(draft.list_id);
        let sort_index = draft.sort_index.unwrap_or_else(|| {
            next_sort_index(self.cache().get(&key).as_deref().map(Vec::as_slice))
        });
        let mut draft = draft;
        draft.sort_index = Some(sort_index);
        let temp = Task::from_draft(new_v7(), user_id.as_str(), &draft, sort_index, Utc::now());

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
        patch: TaskPatch,
    ) -> BoxFuture<'static, Result<Task>> {
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
