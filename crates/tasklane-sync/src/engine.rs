//! Engine assembly: caches, facades, and the shared event bus.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use tasklane_core::{
    EngineEventBus, Error, EventEnvelope, IdentitySource, ListRemote, NoopNotifier, Notifier,
    Result, SessionGuard, Tag, TagRemote, Task, TaskList, TaskRemote,
};

use crate::actions::{ActionContext, ListActions, TagActions, TaskActions};
use crate::cache::EntityCache;
use crate::config::EngineConfig;

/// The optimistic engine for one signed-in application instance.
///
/// Owns one cache per entity kind and the facades that write to them.
/// Cloning shares everything.
#[derive(Clone)]
pub struct Engine {
    config: EngineConfig,
    events: EngineEventBus,
    tasks: TaskActions,
    lists: ListActions,
    tags: TagActions,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn tasks(&self) -> &TaskActions {
        &self.tasks
    }

    pub fn lists(&self) -> &ListActions {
        &self.lists
    }

    pub fn tags(&self) -> &TagActions {
        &self.tags
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn events(&self) -> &EngineEventBus {
        &self.events
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.events.subscribe()
    }

    /// True while a mutation of any kind is waiting on the server.
    pub fn is_loading(&self) -> bool {
        self.tasks.is_loading() || self.lists.is_loading() || self.tags.is_loading()
    }

    /// Discard every buffered reorder (view teardown). The order shown stays.
    pub fn cancel_pending_reorders(&self) -> usize {
        self.tasks.cancel_all_reorders() + self.lists.cancel_reorder() as usize
    }
}

/// Builder for creating an [`Engine`].
pub struct EngineBuilder {
    config: EngineConfig,
    task_remote: Option<Arc<dyn TaskRemote>>,
    list_remote: Option<Arc<dyn ListRemote>>,
    tag_remote: Option<Arc<dyn TagRemote>>,
    notifier: Arc<dyn Notifier>,
    identity: Option<Arc<dyn IdentitySource>>,
    session: Option<Arc<dyn SessionGuard>>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            task_remote: None,
            list_remote: None,
            tag_remote: None,
            notifier: Arc::new(NoopNotifier),
            identity: None,
            session: None,
        }
    }

    /// Set the engine configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Use one transport for all three entity kinds.
    pub fn with_remote<R>(self, remote: Arc<R>) -> Self
    where
        R: TaskRemote + ListRemote + TagRemote + 'static,
    {
        self.with_task_remote(remote.clone())
            .with_list_remote(remote.clone())
            .with_tag_remote(remote)
    }

    pub fn with_task_remote(mut self, remote: Arc<dyn TaskRemote>) -> Self {
        self.task_remote = Some(remote);
        self
    }

    pub fn with_list_remote(mut self, remote: Arc<dyn ListRemote>) -> Self {
        self.list_remote = Some(remote);
        self
    }

    pub fn with_tag_remote(mut self, remote: Arc<dyn TagRemote>) -> Self {
        self.tag_remote = Some(remote);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_identity(mut self, identity: Arc<dyn IdentitySource>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Sign-out flow invoked when the server rejects the session.
    pub fn with_session(mut self, session: Arc<dyn SessionGuard>) -> Self {
        self.session = Some(session);
        self
    }

    /// Build the engine. Fails when a remote or the identity source is missing.
    pub fn build(self) -> Result<Engine> {
        let task_remote = self
            .task_remote
            .ok_or_else(|| Error::Config("task remote not set".to_string()))?;
        let list_remote = self
            .list_remote
            .ok_or_else(|| Error::Config("list remote not set".to_string()))?;
        let tag_remote = self
            .tag_remote
            .ok_or_else(|| Error::Config("tag remote not set".to_string()))?;
        let identity = self
            .identity
            .ok_or_else(|| Error::Config("identity source not set".to_string()))?;

        let mut ctx = ActionContext::new(self.notifier, identity);
        if let Some(session) = self.session {
            ctx = ctx.with_session(session);
        }

        let config = self.config;
        let events = EngineEventBus::new(config.event_bus_capacity);
        let task_cache: EntityCache<Task> = EntityCache::new();
        let list_cache: EntityCache<TaskList> = EntityCache::new();
        let tag_cache: EntityCache<Tag> = EntityCache::new();

        let tasks = TaskActions::new(
            task_cache.clone(),
            task_remote,
            events.clone(),
            &config,
            ctx.clone(),
        );
        let lists = ListActions::new(list_cache, list_remote, events.clone(), &config, ctx.clone())
            .with_task_cache(task_cache.clone());
        let tags = TagActions::new(tag_cache, tag_remote, events.clone(), &config, ctx)
            .with_task_cache(task_cache);

        info!(
            reorder_debounce_ms = config.reorder_debounce_ms,
            max_pending_per_key = config.max_pending_per_key,
            "Engine initialized"
        );

        Ok(Engine {
            config,
            events,
            tasks,
            lists,
            tags,
        })
    }
}
