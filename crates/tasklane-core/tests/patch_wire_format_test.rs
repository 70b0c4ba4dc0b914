/// Wire shape of patches and drafts, and how remote rejections surface.
///
/// Patches are sent as partial JSON objects: absent fields are omitted,
/// cleared optional fields are sent as `null`.
use serde_json::json;
use tasklane_core::{
    Entity, Error, OrderEntry, RemoteError, Task, TaskDraft, TaskListPatch, TaskPatch,
};
use uuid::Uuid;

#[test]
fn test_task_patch_omits_untouched_fields() {
    let value = serde_json::to_value(TaskPatch::title("Buy milk")).unwrap();
    assert_eq!(value, json!({ "title": "Buy milk" }));

    let value = serde_json::to_value(TaskPatch::completed(true)).unwrap();
    assert_eq!(value, json!({ "is_completed": true }));
}

#[test]
fn test_cleared_field_is_sent_as_null() {
    let value = serde_json::to_value(TaskPatch::note(None)).unwrap();
    assert_eq!(value, json!({ "note": null }));

    let patch = TaskListPatch {
        color: Some(None),
        ..TaskListPatch::default()
    };
    assert_eq!(serde_json::to_value(patch).unwrap(), json!({ "color": null }));
}

#[test]
fn test_empty_patch() {
    assert!(TaskPatch::default().is_empty());
    assert!(!TaskPatch::pinned(false).is_empty());
}

#[test]
fn test_order_entries_follow_slice_order() {
    let ids = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
    let entries = OrderEntry::sequence(&ids);
    assert_eq!(entries.len(), 3);
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry.id, ids[i]);
        assert_eq!(entry.sort_index, i as i64);
    }
}

#[test]
fn test_reconcile_keeps_client_fields() {
    let now = chrono::Utc::now();
    let draft = TaskDraft::new("local title");
    let mut local = Task::from_draft(Uuid::new_v4(), "user-1", &draft, 3, now);
    local.is_completed = true;

    let mut server = local.clone();
    server.title = "stale server title".to_string();
    server.is_completed = false;
    server.updated_at = now + chrono::Duration::seconds(5);

    local.reconcile(&server);
    assert_eq!(local.title, "local title");
    assert!(local.is_completed);
    assert_eq!(local.updated_at, server.updated_at);
}

#[test]
fn test_remote_status_maps_to_error_kind() {
    let cases = [
        (RemoteError::network("offline"), "check your connection"),
        (RemoteError::status(503, "busy"), "check your connection"),
        (RemoteError::status(401, "expired"), "please sign in again"),
        (RemoteError::status(409, "changed"), "it was changed elsewhere"),
        (RemoteError::status(422, "too long"), "the server rejected the change"),
    ];
    for (remote, category) in cases {
        let err = Error::from(remote);
        assert_eq!(err.category(), category, "unexpected category for {err}");
    }
    assert!(Error::from(RemoteError::network("offline")).is_retryable());
    assert!(!Error::from(RemoteError::status(400, "bad")).is_retryable());
}
