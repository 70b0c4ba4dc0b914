//! Test support: an in-memory scripted remote and recording collaborators.
//!
//! `ScriptedRemote` behaves like a well-formed REST backend for all three
//! entity kinds. The response of the next call can be scripted to fail, or
//! held until the test releases it, which is how tests control the order in
//! which concurrent mutations settle.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::oneshot;
use uuid::Uuid;

use tasklane_core::{
    Entity, EntityKind, IdentitySource, ListRemote, NoticeKind, Notifier, OrderEntry, RemoteError,
    RemoteResult, Result, SessionGuard, Tag, TagDraft, TagPatch, TagRemote, Task, TaskDraft,
    TaskFilter, TaskList, TaskListDraft, TaskListPatch, TaskPatch, TaskRemote,
};

use crate::cache::lock;
use crate::config::EngineConfig;
use crate::engine::Engine;

/// User id stamped on fixtures and used by [`TestHarness`].
pub const TEST_USER: &str = "user-1";

// =============================================================================
// FIXTURES
// =============================================================================

/// A confirmed task owned by [`TEST_USER`].
pub fn sample_task(list_id: Option<Uuid>, title: &str, sort_index: i64) -> Task {
    let mut draft = TaskDraft::new(title);
    draft.list_id = list_id;
    Task::from_draft(Uuid::new_v4(), TEST_USER, &draft, sort_index, fixture_time())
}

/// A confirmed list owned by [`TEST_USER`].
pub fn sample_list(name: &str, sort_index: i64) -> TaskList {
    TaskList::from_draft(
        Uuid::new_v4(),
        TEST_USER,
        &TaskListDraft::new(name),
        sort_index,
        fixture_time(),
    )
}

/// A confirmed tag owned by [`TEST_USER`].
pub fn sample_tag(name: &str) -> Tag {
    Tag::from_draft(Uuid::new_v4(), TEST_USER, &TagDraft::new(name), fixture_time())
}

fn fixture_time() -> DateTime<Utc> {
    Utc::now() - Duration::days(1)
}

// =============================================================================
// SCRIPTED REMOTE
// =============================================================================

/// One request received by [`ScriptedRemote`].
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    ListTasks(TaskFilter),
    CreateTask(TaskDraft),
    UpdateTask(Uuid, TaskPatch),
    DeleteTask(Uuid),
    DeleteTasks(Vec<Uuid>),
    ReorderTasks(Vec<OrderEntry>),
    ListLists,
    CreateList(TaskListDraft),
    UpdateList(Uuid, TaskListPatch),
    DeleteList(Uuid),
    ReorderLists(Vec<OrderEntry>),
    ListTags,
    CreateTag(TagDraft),
    UpdateTag(Uuid, TagPatch),
    DeleteTag(Uuid),
}

enum Script {
    Fail(RemoteError),
    Hold(oneshot::Receiver<()>, Option<RemoteError>),
}

#[derive(Default)]
struct ServerState {
    tasks: Vec<Task>,
    lists: Vec<TaskList>,
    tags: Vec<Tag>,
}

/// In-memory backend for tests.
#[derive(Default)]
pub struct ScriptedRemote {
    state: Mutex<ServerState>,
    script: Mutex<VecDeque<Script>>,
    calls: Mutex<Vec<RemoteCall>>,
}

impl ScriptedRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed_tasks(&self, tasks: Vec<Task>) {
        lock(&self.state).tasks.extend(tasks);
    }

    pub fn seed_lists(&self, lists: Vec<TaskList>) {
        lock(&self.state).lists.extend(lists);
    }

    pub fn seed_tags(&self, tags: Vec<Tag>) {
        lock(&self.state).tags.extend(tags);
    }

    /// Server-side copy of every task.
    pub fn server_tasks(&self) -> Vec<Task> {
        lock(&self.state).tasks.clone()
    }

    pub fn server_lists(&self) -> Vec<TaskList> {
        lock(&self.state).lists.clone()
    }

    /// Reject the next call with `error`.
    pub fn fail_next(&self, error: RemoteError) {
        lock(&self.script).push_back(Script::Fail(error));
    }

    /// Hold the next call until the returned sender fires (or is dropped),
    /// then answer normally.
    pub fn hold_next(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        lock(&self.script).push_back(Script::Hold(rx, None));
        tx
    }

    /// Hold the next call, then reject it with `error`.
    pub fn hold_next_then_fail(&self, error: RemoteError) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        lock(&self.script).push_back(Script::Hold(rx, Some(error)));
        tx
    }

    /// Every request received so far, in arrival order.
    pub fn calls(&self) -> Vec<RemoteCall> {
        lock(&self.calls).clone()
    }

    /// Reorder requests received so far.
    pub fn reorder_calls(&self) -> Vec<Vec<OrderEntry>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RemoteCall::ReorderTasks(entries) | RemoteCall::ReorderLists(entries) => {
                    Some(entries)
                }
                _ => None,
            })
            .collect()
    }

    async fn gate(&self, call: RemoteCall) -> RemoteResult<()> {
        lock(&self.calls).push(call);
        let script = lock(&self.script).pop_front();
        match script {
            None => Ok(()),
            Some(Script::Fail(error)) => Err(error),
            Some(Script::Hold(release, error)) => {
                let _ = release.await;
                error.map_or(Ok(()), Err)
            }
        }
    }
}

fn not_found(kind: EntityKind, id: Uuid) -> RemoteError {
    RemoteError::status(404, format!("{kind} {id} not found"))
}

fn next_index<E: Entity>(items: &[E]) -> i64 {
    items
        .iter()
        .filter_map(|e| e.sort_index())
        .max()
        .map_or(0, |max| max + 1)
}

fn apply_order<E: Entity>(items: &mut [E], entries: &[OrderEntry]) {
    for entry in entries {
        if let Some(item) = items.iter_mut().find(|e| e.id() == entry.id) {
            item.set_sort_index(entry.sort_index);
        }
    }
}

#[async_trait]
impl TaskRemote for ScriptedRemote {
    async fn list(&self, filter: TaskFilter) -> RemoteResult<Vec<Task>> {
        self.gate(RemoteCall::ListTasks(filter.clone())).await?;
        Ok(lock(&self.state)
            .tasks
            .iter()
            .filter(|t| t.list_id == filter.list_id)
            .cloned()
            .collect())
    }

    async fn create(&self, user_id: &str, draft: TaskDraft) -> RemoteResult<Task> {
        self.gate(RemoteCall::CreateTask(draft.clone())).await?;
        let mut state = lock(&self.state);
        let sort_index = draft.sort_index.unwrap_or_else(|| next_index(&state.tasks));
        let task = Task::from_draft(Uuid::new_v4(), user_id, &draft, sort_index, Utc::now());
        state.tasks.push(task.clone());
        Ok(task)
    }

    async fn update(&self, id: Uuid, patch: TaskPatch) -> RemoteResult<Task> {
        self.gate(RemoteCall::UpdateTask(id, patch.clone())).await?;
        let mut state = lock(&self.state);
        let task = state
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| not_found(EntityKind::Task, id))?;
        task.apply_patch(&patch);
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn delete(&self, id: Uuid) -> RemoteResult<()> {
        self.gate(RemoteCall::DeleteTask(id)).await?;
        let mut state = lock(&self.state);
        let before = state.tasks.len();
        state.tasks.retain(|t| t.id != id);
        if state.tasks.len() == before {
            return Err(not_found(EntityKind::Task, id));
        }
        Ok(())
    }

    async fn delete_many(&self, ids: Vec<Uuid>) -> RemoteResult<()> {
        self.gate(RemoteCall::DeleteTasks(ids.clone())).await?;
        lock(&self.state).tasks.retain(|t| !ids.contains(&t.id));
        Ok(())
    }

    async fn reorder(&self, entries: Vec<OrderEntry>) -> RemoteResult<()> {
        self.gate(RemoteCall::ReorderTasks(entries.clone())).await?;
        apply_order(&mut lock(&self.state).tasks, &entries);
        Ok(())
    }
}

#[async_trait]
impl ListRemote for ScriptedRemote {
    async fn list(&self) -> RemoteResult<Vec<TaskList>> {
        self.gate(RemoteCall::ListLists).await?;
        Ok(lock(&self.state).lists.clone())
    }

    async fn create(&self, user_id: &str, draft: TaskListDraft) -> RemoteResult<TaskList> {
        self.gate(RemoteCall::CreateList(draft.clone())).await?;
        let mut state = lock(&self.state);
        let sort_index = draft.sort_index.unwrap_or_else(|| next_index(&state.lists));
        let list = TaskList::from_draft(Uuid::new_v4(), user_id, &draft, sort_index, Utc::now());
        state.lists.push(list.clone());
        Ok(list)
    }

    async fn update(&self, id: Uuid, patch: TaskListPatch) -> RemoteResult<TaskList> {
        self.gate(RemoteCall::UpdateList(id, patch.clone())).await?;
        let mut state = lock(&self.state);
        let list = state
            .lists
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| not_found(EntityKind::List, id))?;
        list.apply_patch(&patch);
        list.updated_at = Utc::now();
        Ok(list.clone())
    }

    async fn delete(&self, id: Uuid) -> RemoteResult<()> {
        self.gate(RemoteCall::DeleteList(id)).await?;
        let mut state = lock(&self.state);
        let before = state.lists.len();
        state.lists.retain(|l| l.id != id);
        if state.lists.len() == before {
            return Err(not_found(EntityKind::List, id));
        }
        state.tasks.retain(|t| t.list_id != Some(id));
        Ok(())
    }

    async fn reorder(&self, entries: Vec<OrderEntry>) -> RemoteResult<()> {
        self.gate(RemoteCall::ReorderLists(entries.clone())).await?;
        apply_order(&mut lock(&self.state).lists, &entries);
        Ok(())
    }
}

#[async_trait]
impl TagRemote for ScriptedRemote {
    async fn list(&self) -> RemoteResult<Vec<Tag>> {
        self.gate(RemoteCall::ListTags).await?;
        Ok(lock(&self.state).tags.clone())
    }

    async fn create(&self, user_id: &str, draft: TagDraft) -> RemoteResult<Tag> {
        self.gate(RemoteCall::CreateTag(draft.clone())).await?;
        let tag = Tag::from_draft(Uuid::new_v4(), user_id, &draft, Utc::now());
        lock(&self.state).tags.push(tag.clone());
        Ok(tag)
    }

    async fn update(&self, id: Uuid, patch: TagPatch) -> RemoteResult<Tag> {
        self.gate(RemoteCall::UpdateTag(id, patch.clone())).await?;
        let mut state = lock(&self.state);
        let tag = state
            .tags
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| not_found(EntityKind::Tag, id))?;
        tag.apply_patch(&patch);
        tag.updated_at = Utc::now();
        Ok(tag.clone())
    }

    async fn delete(&self, id: Uuid) -> RemoteResult<()> {
        self.gate(RemoteCall::DeleteTag(id)).await?;
        let mut state = lock(&self.state);
        let before = state.tags.len();
        state.tags.retain(|t| t.id != id);
        if state.tags.len() == before {
            return Err(not_found(EntityKind::Tag, id));
        }
        for task in &mut state.tasks {
            task.tag_ids.retain(|tag| *tag != id);
        }
        Ok(())
    }
}

// =============================================================================
// RECORDING COLLABORATORS
// =============================================================================

/// Notifier that keeps every message.
#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<(NoticeKind, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn notices(&self) -> Vec<(NoticeKind, String)> {
        lock(&self.notices).clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.of_kind(NoticeKind::Error)
    }

    pub fn successes(&self) -> Vec<String> {
        self.of_kind(NoticeKind::Success)
    }

    fn of_kind(&self, kind: NoticeKind) -> Vec<String> {
        lock(&self.notices)
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, message)| message.clone())
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, kind: NoticeKind, message: &str) {
        lock(&self.notices).push((kind, message.to_string()));
    }
}

/// Identity source with a switchable user.
#[derive(Default)]
pub struct FixedIdentity {
    user_id: Mutex<Option<String>>,
}

impl FixedIdentity {
    pub fn user(user_id: &str) -> Arc<Self> {
        Arc::new(Self {
            user_id: Mutex::new(Some(user_id.to_string())),
        })
    }

    pub fn signed_out() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, user_id: Option<&str>) {
        *lock(&self.user_id) = user_id.map(str::to_string);
    }
}

impl IdentitySource for FixedIdentity {
    fn current_user_id(&self) -> Option<String> {
        lock(&self.user_id).clone()
    }
}

/// Session guard that records sign-outs.
#[derive(Default)]
pub struct RecordingSession {
    sign_outs: Mutex<Vec<(EntityKind, String)>>,
}

impl RecordingSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sign_outs(&self) -> Vec<(EntityKind, String)> {
        lock(&self.sign_outs).clone()
    }
}

impl SessionGuard for RecordingSession {
    fn signed_out(&self, entity_kind: EntityKind, message: &str) {
        lock(&self.sign_outs).push((entity_kind, message.to_string()));
    }
}

// =============================================================================
// HARNESS
// =============================================================================

/// An engine wired to a [`ScriptedRemote`] and recording collaborators.
pub struct TestHarness {
    pub engine: Engine,
    pub remote: Arc<ScriptedRemote>,
    pub notifier: Arc<RecordingNotifier>,
    pub identity: Arc<FixedIdentity>,
    pub session: Arc<RecordingSession>,
}

impl TestHarness {
    pub fn new() -> Result<Self> {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Result<Self> {
        let remote = ScriptedRemote::new();
        let notifier = RecordingNotifier::new();
        let identity = FixedIdentity::user(TEST_USER);
        let session = RecordingSession::new();
        let engine = Engine::builder()
            .with_config(config)
            .with_remote(remote.clone())
            .with_notifier(notifier.clone())
            .with_identity(identity.clone())
            .with_session(session.clone())
            .build()?;
        Ok(Self {
            engine,
            remote,
            notifier,
            identity,
            session,
        })
    }
}
