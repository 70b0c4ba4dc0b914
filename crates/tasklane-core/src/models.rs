//! Core data models for tasklane.
//!
//! Entities are plain serializable records. Every kind has a typed patch
//! whose `apply` is total over the kind's editable fields, so reconciliation
//! never silently drops a field.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// ENTITY TRAIT
// =============================================================================

/// Entity kind, used for logging, events, and user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Task,
    List,
    Tag,
}

impl EntityKind {
    /// Singular user-facing noun.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Task => "task",
            EntityKind::List => "list",
            EntityKind::Tag => "tag",
        }
    }

    /// Plural user-facing noun.
    pub fn plural(&self) -> &'static str {
        match self {
            EntityKind::Task => "tasks",
            EntityKind::List => "lists",
            EntityKind::Tag => "tags",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A domain record held in the entity cache.
pub trait Entity: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Typed field subset that an update changes.
    type Patch: Clone + PartialEq + fmt::Debug + Send + Sync + 'static;

    /// Kind of this entity.
    const KIND: EntityKind;

    /// Stable identifier.
    fn id(&self) -> Uuid;

    /// Replace the identifier (temporary id -> server id).
    fn set_id(&mut self, id: Uuid);

    /// Manual ordering position, for kinds that support reordering.
    fn sort_index(&self) -> Option<i64> {
        None
    }

    /// Set the manual ordering position. No-op for unordered kinds.
    fn set_sort_index(&mut self, _index: i64) {}

    /// Merge the fields present in `patch`. Must be idempotent.
    fn apply_patch(&mut self, patch: &Self::Patch);

    /// Take the fields the server owns (owner, timestamps) from `server`.
    ///
    /// Client-editable fields stay as they are: they already reflect every
    /// accepted patch, including ones the server has not answered yet.
    fn reconcile(&mut self, server: &Self);
}

/// One id -> sort position pair of a reorder batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEntry {
    pub id: Uuid,
    pub sort_index: i64,
}

impl OrderEntry {
    pub fn new(id: Uuid, sort_index: i64) -> Self {
        Self { id, sort_index }
    }

    /// Assign consecutive positions to `ids` in the given order.
    pub fn sequence(ids: &[Uuid]) -> Vec<OrderEntry> {
        ids.iter()
            .enumerate()
            .map(|(position, id)| OrderEntry::new(*id, position as i64))
            .collect()
    }
}

// =============================================================================
// TASK TYPES
// =============================================================================

/// A task, optionally filed under a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub list_id: Option<Uuid>,
    pub user_id: String,
    pub title: String,
    pub note: Option<String>,
    pub is_completed: bool,
    pub is_pinned: bool,
    pub sort_index: i64,
    #[serde(default)]
    pub tag_ids: Vec<Uuid>,
    pub due_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskDraft {
    pub list_id: Option<Uuid>,
    pub title: String,
    pub note: Option<String>,
    pub is_pinned: bool,
    /// Position in the target list; appended at the end when absent.
    pub sort_index: Option<i64>,
    #[serde(default)]
    pub tag_ids: Vec<Uuid>,
    pub due_at: Option<DateTime<Utc>>,
}

impl TaskDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn in_list(mut self, list_id: Uuid) -> Self {
        self.list_id = Some(list_id);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Changed fields of a task. `None` leaves a field untouched; the nested
/// options allow clearing optional fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_pinned: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_id: Option<Option<Uuid>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_index: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_ids: Option<Vec<Uuid>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_at: Option<Option<DateTime<Utc>>>,
}

impl TaskPatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn note(note: Option<String>) -> Self {
        Self {
            note: Some(note),
            ..Default::default()
        }
    }

    pub fn completed(is_completed: bool) -> Self {
        Self {
            is_completed: Some(is_completed),
            ..Default::default()
        }
    }

    pub fn pinned(is_pinned: bool) -> Self {
        Self {
            is_pinned: Some(is_pinned),
            ..Default::default()
        }
    }

    /// True when the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl Task {
    /// Build a best-effort record from a draft, defaulting unspecified fields.
    pub fn from_draft(
        id: Uuid,
        user_id: impl Into<String>,
        draft: &TaskDraft,
        sort_index: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            list_id: draft.list_id,
            user_id: user_id.into(),
            title: draft.title.clone(),
            note: draft.note.clone(),
            is_completed: false,
            is_pinned: draft.is_pinned,
            sort_index,
            tag_ids: draft.tag_ids.clone(),
            due_at: draft.due_at,
            created_at: now,
            updated_at: now,
        }
    }

    /// Draft that recreates this task (used by duplicate).
    pub fn to_draft(&self) -> TaskDraft {
        TaskDraft {
            list_id: self.list_id,
            title: self.title.clone(),
            note: self.note.clone(),
            is_pinned: self.is_pinned,
            sort_index: None,
            tag_ids: self.tag_ids.clone(),
            due_at: self.due_at,
        }
    }
}

impl Entity for Task {
    type Patch = TaskPatch;
    const KIND: EntityKind = EntityKind::Task;

    fn id(&self) -> Uuid {
        self.id
    }

    fn set_id(&mut self, id: Uuid) {
        self.id = id;
    }

    fn sort_index(&self) -> Option<i64> {
        Some(self.sort_index)
    }

    fn set_sort_index(&mut self, index: i64) {
        self.sort_index = index;
    }

    fn apply_patch(&mut self, patch: &TaskPatch) {
        let TaskPatch {
            title,
            note,
            is_completed,
            is_pinned,
            list_id,
            sort_index,
            tag_ids,
            due_at,
        } = patch;
        if let Some(title) = title {
            self.title = title.clone();
        }
        if let Some(note) = note {
            self.note = note.clone();
        }
        if let Some(is_completed) = is_completed {
            self.is_completed = *is_completed;
        }
        if let Some(is_pinned) = is_pinned {
            self.is_pinned = *is_pinned;
        }
        if let Some(list_id) = list_id {
            self.list_id = *list_id;
        }
        if let Some(sort_index) = sort_index {
            self.sort_index = *sort_index;
        }
        if let Some(tag_ids) = tag_ids {
            self.tag_ids = tag_ids.clone();
        }
        if let Some(due_at) = due_at {
            self.due_at = *due_at;
        }
    }

    fn reconcile(&mut self, server: &Self) {
        self.user_id = server.user_id.clone();
        self.created_at = server.created_at;
        self.updated_at = server.updated_at;
    }
}

/// Filter for fetching tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFilter {
    /// Restrict to one list; `None` fetches tasks without a list.
    pub list_id: Option<Uuid>,
}

// =============================================================================
// LIST TYPES
// =============================================================================

/// A named, colored list of tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskList {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub color: Option<String>,
    pub is_pinned: bool,
    pub sort_index: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskListDraft {
    pub name: String,
    pub color: Option<String>,
    pub is_pinned: bool,
    pub sort_index: Option<i64>,
}

impl TaskListDraft {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Changed fields of a list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskListPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_pinned: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_index: Option<i64>,
}

impl TaskList {
    pub fn from_draft(
        id: Uuid,
        user_id: impl Into<String>,
        draft: &TaskListDraft,
        sort_index: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id: user_id.into(),
            name: draft.name.clone(),
            color: draft.color.clone(),
            is_pinned: draft.is_pinned,
            sort_index,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn to_draft(&self) -> TaskListDraft {
        TaskListDraft {
            name: self.name.clone(),
            color: self.color.clone(),
            is_pinned: self.is_pinned,
            sort_index: None,
        }
    }
}

impl Entity for TaskList {
    type Patch = TaskListPatch;
    const KIND: EntityKind = EntityKind::List;

    fn id(&self) -> Uuid {
        self.id
    }

    fn set_id(&mut self, id: Uuid) {
        self.id = id;
    }

    fn sort_index(&self) -> Option<i64> {
        Some(self.sort_index)
    }

    fn set_sort_index(&mut self, index: i64) {
        self.sort_index = index;
    }

    fn apply_patch(&mut self, patch: &TaskListPatch) {
        let TaskListPatch {
            name,
            color,
            is_pinned,
            sort_index,
        } = patch;
        if let Some(name) = name {
            self.name = name.clone();
        }
        if let Some(color) = color {
            self.color = color.clone();
        }
        if let Some(is_pinned) = is_pinned {
            self.is_pinned = *is_pinned;
        }
        if let Some(sort_index) = sort_index {
            self.sort_index = *sort_index;
        }
    }

    fn reconcile(&mut self, server: &Self) {
        self.user_id = server.user_id.clone();
        self.created_at = server.created_at;
        self.updated_at = server.updated_at;
    }
}

// =============================================================================
// TAG TYPES
// =============================================================================

/// A label attached to tasks. Tags are not manually ordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a tag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagDraft {
    pub name: String,
    pub color: Option<String>,
}

impl TagDraft {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: None,
        }
    }
}

/// Changed fields of a tag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<Option<String>>,
}

impl Tag {
    pub fn from_draft(
        id: Uuid,
        user_id: impl Into<String>,
        draft: &TagDraft,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id: user_id.into(),
            name: draft.name.clone(),
            color: draft.color.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl Entity for Tag {
    type Patch = TagPatch;
    const KIND: EntityKind = EntityKind::Tag;

    fn id(&self) -> Uuid {
        self.id
    }

    fn set_id(&mut self, id: Uuid) {
        self.id = id;
    }

    fn apply_patch(&mut self, patch: &TagPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(color) = &patch.color {
            self.color = color.clone();
        }
    }

    fn reconcile(&mut self, server: &Self) {
        self.user_id = server.user_id.clone();
        self.created_at = server.created_at;
        self.updated_at = server.updated_at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> Task {
        Task::from_draft(
            Uuid::new_v4(),
            "user-1",
            &TaskDraft::new("Buy milk"),
            3,
            Utc::now(),
        )
    }

    #[test]
    fn test_task_from_draft_defaults() {
        let task = sample_task();
        assert_eq!(task.title, "Buy milk");
        assert!(!task.is_completed);
        assert_eq!(task.sort_index, 3);
        assert_eq!(task.user_id, "user-1");
        assert!(task.note.is_none());
    }

    #[test]
    fn test_task_patch_is_idempotent() {
        let mut once = sample_task();
        let patch = TaskPatch {
            title: Some("A".into()),
            note: Some(Some("B".into())),
            is_completed: Some(true),
            ..Default::default()
        };
        once.apply_patch(&patch);
        let mut twice = once.clone();
        twice.apply_patch(&patch);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_task_patch_clears_optional_field() {
        let mut task = sample_task();
        task.note = Some("old".into());
        task.apply_patch(&TaskPatch::note(None));
        assert!(task.note.is_none());
    }

    #[test]
    fn test_empty_patch_changes_nothing() {
        let mut task = sample_task();
        let before = task.clone();
        assert!(TaskPatch::default().is_empty());
        task.apply_patch(&TaskPatch::default());
        assert_eq!(task, before);
    }

    #[test]
    fn test_task_patch_serializes_only_changed_fields() {
        let json = serde_json::to_value(TaskPatch::completed(true)).unwrap();
        assert_eq!(json, serde_json::json!({ "is_completed": true }));
    }

    #[test]
    fn test_reconcile_keeps_client_fields() {
        let mut local = sample_task();
        local.title = "local title".into();
        let mut server = local.clone();
        server.title = "stale".into();
        server.updated_at = local.updated_at + chrono::Duration::seconds(5);

        local.reconcile(&server);
        assert_eq!(local.title, "local title");
        assert_eq!(local.updated_at, server.updated_at);
    }

    #[test]
    fn test_tag_has_no_sort_index() {
        let tag = Tag::from_draft(Uuid::new_v4(), "u", &TagDraft::new("home"), Utc::now());
        assert_eq!(tag.sort_index(), None);
    }

    #[test]
    fn test_order_entry_sequence() {
        let ids = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let entries = OrderEntry::sequence(&ids);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0], OrderEntry::new(ids[0], 0));
        assert_eq!(entries[2], OrderEntry::new(ids[2], 2));
    }

    #[test]
    fn test_list_patch_applies_all_fields() {
        let mut list = TaskList::from_draft(
            Uuid::new_v4(),
            "u",
            &TaskListDraft::new("Groceries"),
            0,
            Utc::now(),
        );
        list.apply_patch(&TaskListPatch {
            name: Some("Errands".into()),
            color: Some(Some("#ff0000".into())),
            is_pinned: Some(true),
            sort_index: Some(4),
        });
        assert_eq!(list.name, "Errands");
        assert_eq!(list.color.as_deref(), Some("#ff0000"));
        assert!(list.is_pinned);
        assert_eq!(list.sort_index, 4);
    }

    #[test]
    fn test_entity_kind_nouns() {
        assert_eq!(EntityKind::Task.to_string(), "task");
        assert_eq!(EntityKind::List.plural(), "lists");
    }
}
