//! Tag facade.

use std::sync::Arc;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use tokio::sync::watch;
use uuid::Uuid;

use tasklane_core::{new_v7, EngineEventBus, Result, Tag, TagDraft, TagPatch, TagRemote, Task};

use super::{ActionContext, ActionCore, ActionState};
use crate::cache::{CacheKey, Collection, EntityCache};
use crate::config::EngineConfig;
use crate::mutation::{MutationOutcome, MutationPlan};
use crate::patch::Op;

/// User intents on tags.
#[derive(Clone)]
pub struct TagActions {
    core: ActionCore<Tag>,
    remote: Arc<dyn TagRemote>,
    tasks: Option<EntityCache<Task>>,
}

impl TagActions {
    pub fn new(
        cache: EntityCache<Tag>,
        remote: Arc<dyn TagRemote>,
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

    /// Task cache from which a deleted tag is detached.
    pub fn with_task_cache(mut self, tasks: EntityCache<Task>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn cache(&self) -> &EntityCache<Tag> {
        self.core.cache()
    }

    pub fn tags(&self) -> Option<Collection<Tag>> {
        self.cache().get(&CacheKey::tags())
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

    pub fn refresh(&self) -> BoxFuture<'static, Result<Collection<Tag>>> {
        let remote = Arc::clone(&self.remote);
        self.core
            .refresh("load tags", CacheKey::tags(), async move { remote.list().await })
    }

    pub fn create(&self, draft: TagDraft) -> BoxFuture<'static, Result<Tag>> {
        const ACTION: &str = "create tag";
        let user_id = match self.core.user_id() {
            Ok(user_id) => user_id,
            Err(err) => return self.core.reject(ACTION, err),
        };
        let temp = Tag::from_draft(new_v7(), user_id.as_str(), &draft, Utc::now());
        let remote = Arc::clone(&self.remote);
        self.core
            .mutate(
                ACTION,
                MutationPlan::single(CacheKey::tags(), Op::Insert(temp)),
                async move { remote.create(&user_id, draft).await.map(Some) },
                None,
            )
            .map(|result| result.and_then(MutationOutcome::into_record))
            .boxed()
    }

    pub fn rename(&self, id: Uuid, name: impl Into<String>) -> BoxFuture<'static, Result<Tag>> {
        let patch = TagPatch {
            name: Some(name.into()),
            ..TagPatch::default()
        };
        self.update_as("rename tag", id, patch)
    }

    pub fn recolor(&self, id: Uuid, color: Option<String>) -> BoxFuture<'static, Result<Tag>> {
        let patch = TagPatch {
            color: Some(color),
            ..TagPatch::default()
        };
        self.update_as("recolor tag", id, patch)
    }

    /// Delete a tag. Once the server confirms, cached tasks stop referencing it.
    pub fn delete(&self, id: Uuid) -> BoxFuture<'static, Result<()>> {
        const ACTION: &str = "delete tag";
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
                Some("tag deleted".to_string()),
            )
            .map(move |result| {
                if let (Ok(_), Some(tasks)) = (&result, tasks) {
                    detach_tag(&tasks, id);
                }
                result.map(|_| ())
            })
            .boxed()
    }

    fn update_as(
        &self,
        action: &'static str,
        id: Uuid,
        patch: TagPatch,
    ) -> BoxFuture<'static, Result<Tag>> {
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

fn detach_tag(tasks: &EntityCache<Task>, tag_id: Uuid) {
    for key in tasks.keys() {
        tasks.patch(&key, |items| {
            items
                .iter()
                .cloned()
                .map(|mut task| {
                    task.tag_ids.retain(|id| *id != tag_id);
                    task
                })
                .collect()
        });
    }
}
