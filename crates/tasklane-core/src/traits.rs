//! Collaborator traits the engine is written against.
//!
//! Remote traits are implemented by the REST transport; the engine never
//! assumes anything about the wire beyond these request/response shapes.
//! Implementations must reject with a [`RemoteError`](crate::error::RemoteError) rather than resolve
//! with an error payload.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RemoteResult;
use crate::models::*;

// =============================================================================
// REMOTE WRITE / READ TRAITS
// =============================================================================

/// REST endpoints for tasks.
#[async_trait]
pub trait TaskRemote: Send + Sync {
    /// Fetch tasks matching the filter.
    async fn list(&self, filter: TaskFilter) -> RemoteResult<Vec<Task>>;

    /// Create a task owned by `user_id`.
    async fn create(&self, user_id: &str, draft: TaskDraft) -> RemoteResult<Task>;

    /// Update fields of a task.
    async fn update(&self, id: Uuid, patch: TaskPatch) -> RemoteResult<Task>;

    /// Delete a task.
    async fn delete(&self, id: Uuid) -> RemoteResult<()>;

    /// Delete several tasks in one request.
    async fn delete_many(&self, ids: Vec<Uuid>) -> RemoteResult<()>;

    /// Persist new sort positions in one request.
    async fn reorder(&self, entries: Vec<OrderEntry>) -> RemoteResult<()>;
}

/// REST endpoints for lists.
#[async_trait]
pub trait ListRemote: Send + Sync {
    async fn list(&self) -> RemoteResult<Vec<TaskList>>;

    async fn create(&self, user_id: &str, draft: TaskListDraft) -> RemoteResult<TaskList>;

    async fn update(&self, id: Uuid, patch: TaskListPatch) -> RemoteResult<TaskList>;

    /// Delete a list together with its tasks.
    async fn delete(&self, id: Uuid) -> RemoteResult<()>;

    async fn reorder(&self, entries: Vec<OrderEntry>) -> RemoteResult<()>;
}

/// REST endpoints for tags.
#[async_trait]
pub trait TagRemote: Send + Sync {
    async fn list(&self) -> RemoteResult<Vec<Tag>>;

    async fn create(&self, user_id: &str, draft: TagDraft) -> RemoteResult<Tag>;

    async fn update(&self, id: Uuid, patch: TagPatch) -> RemoteResult<Tag>;

    async fn delete(&self, id: Uuid) -> RemoteResult<()>;
}

// =============================================================================
// NOTIFICATION / IDENTITY / SESSION
// =============================================================================

/// Kind of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Error,
    Success,
}

/// User-facing notification channel (toasts). Fire-and-forget.
pub trait Notifier: Send + Sync {
    fn notify(&self, kind: NoticeKind, message: &str);
}

/// Supplies the acting user's id for stamping new entities.
pub trait IdentitySource: Send + Sync {
    /// `None` when nobody is signed in.
    fn current_user_id(&self) -> Option<String>;
}

/// Sign-out flow triggered when the server reports an invalid session.
pub trait SessionGuard: Send + Sync {
    /// Called once per rejected mutation with the kind that was being written.
    fn signed_out(&self, entity_kind: EntityKind, message: &str);
}

/// Notifier that drops every message.
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _kind: NoticeKind, _message: &str) {}
}
