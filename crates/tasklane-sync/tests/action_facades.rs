//! Facade behavior: intents, notifications, loading state, collaborators.

use std::time::Duration;

use tasklane_sync::testing::{
    sample_list, sample_tag, sample_task, RemoteCall, ScriptedRemote, TestHarness,
};
use tasklane_sync::{
    ActionStatus, CacheKey, Engine, EngineConfig, EngineEvent, EntityKind, Error, NoticeKind,
    RemoteError, TagDraft, TaskDraft, TaskListDraft,
};
use uuid::Uuid;

async fn wait_for_calls(remote: &ScriptedRemote, count: usize) {
    for _ in 0..100 {
        if remote.calls().len() >= count {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("remote never received {count} calls");
}

// =============================================================================
// Tasks
// =============================================================================

#[tokio::test]
async fn test_move_to_list_moves_between_collections() {
    let harness = TestHarness::new().unwrap();
    let list = sample_list("Groceries", 0);
    let task = sample_task(None, "milk", 0);
    let other = sample_task(Some(list.id), "eggs", 4);
    harness.remote.seed_lists(vec![list.clone()]);
    harness.remote.seed_tasks(vec![task.clone(), other]);
    let tasks = harness.engine.tasks();
    tasks.refresh(None).await.unwrap();
    tasks.refresh(Some(list.id)).await.unwrap();

    let pending = tasks.move_to_list(task.id, Some(list.id));
    assert!(tasks.tasks(None).unwrap().is_empty());
    let moved = tasks
        .cache()
        .find(&CacheKey::tasks_in(list.id), task.id)
        .unwrap();
    assert_eq!(moved.sort_index, 5);

    let confirmed = pending.await.unwrap();
    assert_eq!(confirmed.list_id, Some(list.id));
    assert_eq!(tasks.tasks(Some(list.id)).unwrap().len(), 2);
    let server = harness.remote.server_tasks();
    let on_server = server.iter().find(|t| t.id == task.id).unwrap();
    assert_eq!(on_server.list_id, Some(list.id));
}

#[tokio::test]
async fn test_failed_move_restores_both_lists() {
    let harness = TestHarness::new().unwrap();
    let list = sample_list("Groceries", 0);
    let task = sample_task(None, "milk", 0);
    harness.remote.seed_tasks(vec![task.clone()]);
    let tasks = harness.engine.tasks();
    tasks.refresh(None).await.unwrap();
    tasks.refresh(Some(list.id)).await.unwrap();
    harness.remote.fail_next(RemoteError::network("offline"));

    let result = tasks.move_to_list(task.id, Some(list.id)).await;
    assert!(matches!(result, Err(Error::Network(_))));
    assert_eq!(*tasks.tasks(None).unwrap(), vec![task]);
    assert!(tasks.tasks(Some(list.id)).unwrap().is_empty());
}

#[tokio::test]
async fn test_clear_completed_deletes_in_one_request() {
    let harness = TestHarness::new().unwrap();
    let mut done_a = sample_task(None, "a", 0);
    done_a.is_completed = true;
    let mut done_b = sample_task(None, "b", 1);
    done_b.is_completed = true;
    let open = sample_task(None, "c", 2);
    harness
        .remote
        .seed_tasks(vec![done_a.clone(), done_b.clone(), open.clone()]);
    let tasks = harness.engine.tasks();
    tasks.refresh(None).await.unwrap();

    let pending = tasks.clear_completed(None);
    assert_eq!(*tasks.tasks(None).unwrap(), vec![open.clone()]);
    assert_eq!(pending.await.unwrap(), 2);

    assert!(harness
        .remote
        .calls()
        .contains(&RemoteCall::DeleteTasks(vec![done_a.id, done_b.id])));
    assert_eq!(
        harness.notifier.successes(),
        vec!["cleared 2 completed tasks".to_string()]
    );
    assert_eq!(harness.remote.server_tasks(), vec![open]);
}

#[tokio::test]
async fn test_clear_completed_with_nothing_done_sends_nothing() {
    let harness = TestHarness::new().unwrap();
    harness.remote.seed_tasks(vec![sample_task(None, "open", 0)]);
    let tasks = harness.engine.tasks();
    tasks.refresh(None).await.unwrap();
    let calls = harness.remote.calls().len();

    assert_eq!(tasks.clear_completed(None).await.unwrap(), 0);
    assert_eq!(harness.remote.calls().len(), calls);
}

#[tokio::test]
async fn test_duplicate_creates_independent_copy() {
    let harness = TestHarness::new().unwrap();
    let original = sample_task(None, "write report", 0);
    harness.remote.seed_tasks(vec![original.clone()]);
    let tasks = harness.engine.tasks();
    tasks.refresh(None).await.unwrap();

    let copy = tasks.duplicate(original.id).await.unwrap();
    assert_ne!(copy.id, original.id);
    assert_eq!(copy.title, original.title);
    assert_eq!(copy.sort_index, 1);
    assert_eq!(tasks.tasks(None).unwrap().len(), 2);
}

#[tokio::test]
async fn test_unknown_task_is_not_found() {
    let harness = TestHarness::new().unwrap();
    let tasks = harness.engine.tasks();
    tasks.refresh(None).await.unwrap();

    let result = tasks.rename(Uuid::new_v4(), "nope").await;
    assert!(matches!(result, Err(Error::NotFound(_))));
    assert!(harness.notifier.errors()[0].starts_with("failed to rename task"));
    assert_eq!(tasks.status().last, ActionStatus::Failed);
}

#[tokio::test]
async fn test_conflict_on_delete_restores_task() {
    let harness = TestHarness::new().unwrap();
    let task = sample_task(None, "shared", 0);
    harness.remote.seed_tasks(vec![task.clone()]);
    let tasks = harness.engine.tasks();
    tasks.refresh(None).await.unwrap();
    harness.remote.fail_next(RemoteError::status(409, "changed"));

    let result = tasks.delete(task.id).await;
    assert!(matches!(result, Err(Error::Conflict(_))));
    assert_eq!(*tasks.tasks(None).unwrap(), vec![task]);
    assert!(harness.notifier.successes().is_empty());
}

// =============================================================================
// Session and identity
// =============================================================================

#[tokio::test]
async fn test_unauthorized_triggers_sign_out() {
    let harness = TestHarness::new().unwrap();
    let task = sample_task(None, "t", 0);
    harness.remote.seed_tasks(vec![task.clone()]);
    let tasks = harness.engine.tasks();
    tasks.refresh(None).await.unwrap();
    harness.remote.fail_next(RemoteError::status(401, "expired"));

    let result = tasks.rename(task.id, "x").await;
    assert!(matches!(result, Err(Error::Unauthorized(_))));

    let sign_outs = harness.session.sign_outs();
    assert_eq!(sign_outs.len(), 1);
    assert_eq!(sign_outs[0].0, EntityKind::Task);
    assert!(sign_outs[0].1.starts_with("failed to rename task"));
    assert_eq!(tasks.cache().find(&CacheKey::tasks(), task.id).unwrap().title, "t");
}

#[tokio::test]
async fn test_create_without_user_writes_nothing() {
    let harness = TestHarness::new().unwrap();
    let tasks = harness.engine.tasks();
    tasks.refresh(None).await.unwrap();
    harness.identity.set(None);
    let calls = harness.remote.calls().len();

    let pending = tasks.create(TaskDraft::new("anonymous"));
    assert!(tasks.tasks(None).unwrap().is_empty());
    assert!(!tasks.is_loading());
    assert!(matches!(pending.await, Err(Error::Unauthorized(_))));
    assert_eq!(harness.remote.calls().len(), calls);
}

// =============================================================================
// Loading state
// =============================================================================

#[tokio::test]
async fn test_loading_flag_tracks_in_flight_mutations() {
    let harness = TestHarness::new().unwrap();
    let tasks = harness.engine.tasks();
    tasks.refresh(None).await.unwrap();
    let mut status = tasks.watch_status();
    assert_eq!(tasks.status().last, ActionStatus::Idle);

    let calls = harness.remote.calls().len();
    let release = harness.remote.hold_next();
    let first = tokio::spawn(tasks.create(TaskDraft::new("one")));
    let second = tokio::spawn(tasks.create(TaskDraft::new("two")));
    assert_eq!(tasks.status().in_flight, 2);
    assert!(harness.engine.is_loading());
    assert_eq!(status.borrow_and_update().last, ActionStatus::Submitting);

    wait_for_calls(&harness.remote, calls + 2).await;
    second.await.unwrap().unwrap();
    assert!(tasks.is_loading());

    release.send(()).unwrap();
    first.await.unwrap().unwrap();
    assert!(!tasks.is_loading());
    assert!(status.has_changed().unwrap());
    assert_eq!(status.borrow_and_update().last, ActionStatus::Succeeded);
}

#[tokio::test(start_paused = true)]
async fn test_loading_flag_covers_batched_reorder_write() {
    let harness = TestHarness::new().unwrap();
    let a = sample_list("A", 0);
    let b = sample_list("B", 1);
    harness.remote.seed_lists(vec![a.clone(), b.clone()]);
    let lists = harness.engine.lists();
    lists.refresh().await.unwrap();

    let release = harness.remote.hold_next();
    lists.reorder(&[b.id, a.id]).unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(harness.remote.reorder_calls().len(), 1);
    assert!(lists.is_loading());
    assert!(harness.engine.is_loading());
    assert_eq!(lists.status().in_flight, 1);

    release.send(()).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!lists.is_loading());
    assert_eq!(lists.status().last, ActionStatus::Succeeded);
    let server = harness.remote.server_lists();
    assert_eq!(server.iter().find(|l| l.id == b.id).unwrap().sort_index, 0);
}

// =============================================================================
// Lists and tags
// =============================================================================

#[tokio::test]
async fn test_list_delete_drops_its_tasks() {
    let harness = TestHarness::new().unwrap();
    let list = sample_list("Work", 0);
    harness.remote.seed_lists(vec![list.clone()]);
    harness
        .remote
        .seed_tasks(vec![sample_task(Some(list.id), "standup", 0)]);
    let engine = &harness.engine;
    engine.lists().refresh().await.unwrap();
    engine.tasks().refresh(Some(list.id)).await.unwrap();

    let pending = engine.lists().delete(list.id);
    assert!(engine.lists().lists().unwrap().is_empty());
    assert!(engine.tasks().tasks(Some(list.id)).is_some());

    pending.await.unwrap();
    assert!(engine.tasks().tasks(Some(list.id)).is_none());
    assert!(harness.remote.server_tasks().is_empty());
    assert_eq!(harness.notifier.successes(), vec!["list deleted".to_string()]);
}

#[tokio::test]
async fn test_list_create_rename_and_pin() {
    let harness = TestHarness::new().unwrap();
    let lists = harness.engine.lists();
    lists.refresh().await.unwrap();

    let created = lists.create(TaskListDraft::new("Home")).await.unwrap();
    let renamed = lists.rename(created.id, "House").await.unwrap();
    assert_eq!(renamed.name, "House");
    let pinned = lists.toggle_pinned(created.id).await.unwrap();
    assert!(pinned.is_pinned);
    let recolored = lists
        .recolor(created.id, Some("#ff8800".to_string()))
        .await
        .unwrap();
    assert_eq!(recolored.color.as_deref(), Some("#ff8800"));

    let visible = lists.lists().unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].name, "House");
    assert!(visible[0].is_pinned);
}

#[tokio::test]
async fn test_list_duplicate_and_reorder_flush() {
    let harness = TestHarness::new().unwrap();
    let first = sample_list("A", 0);
    harness.remote.seed_lists(vec![first.clone()]);
    let lists = harness.engine.lists();
    lists.refresh().await.unwrap();

    let copy = lists.duplicate(first.id).await.unwrap();
    assert_eq!(copy.name, "A");
    assert_eq!(copy.sort_index, 1);

    lists.reorder(&[copy.id, first.id]).unwrap();
    assert_eq!(lists.flush_reorder().await.unwrap(), Some(2));
    let server = harness.remote.server_lists();
    let server_copy = server.iter().find(|l| l.id == copy.id).unwrap();
    assert_eq!(server_copy.sort_index, 0);
    assert_eq!(lists.flush_reorder().await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_reorder_keeps_order_without_write() {
    let harness = TestHarness::new().unwrap();
    let a = sample_list("A", 0);
    let b = sample_list("B", 1);
    harness.remote.seed_lists(vec![a.clone(), b.clone()]);
    let lists = harness.engine.lists();
    lists.refresh().await.unwrap();

    lists.reorder(&[b.id, a.id]).unwrap();
    assert!(lists.cancel_reorder());
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(harness.remote.reorder_calls().is_empty());
    let visible = lists.lists().unwrap();
    assert_eq!(visible.iter().find(|l| l.id == b.id).unwrap().sort_index, 0);
}

#[tokio::test(start_paused = true)]
async fn test_reorder_after_cancel_writes_order_server_never_saw() {
    let harness = TestHarness::new().unwrap();
    let a = sample_list("A", 0);
    let b = sample_list("B", 1);
    harness.remote.seed_lists(vec![a.clone(), b.clone()]);
    let lists = harness.engine.lists();
    lists.refresh().await.unwrap();

    lists.reorder(&[b.id, a.id]).unwrap();
    assert!(lists.cancel_reorder());
    lists.reorder(&[b.id, a.id]).unwrap();
    tokio::time::sleep(Duration::from_millis(700)).await;

    let batches = harness.remote.reorder_calls();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 2);
    let server = harness.remote.server_lists();
    assert_eq!(server.iter().find(|l| l.id == b.id).unwrap().sort_index, 0);
    assert_eq!(server.iter().find(|l| l.id == a.id).unwrap().sort_index, 1);
    assert_eq!(lists.cache().pending_count(&CacheKey::lists()), 0);
}

#[tokio::test]
async fn test_reorder_rejects_duplicate_ids() {
    let harness = TestHarness::new().unwrap();
    let a = sample_list("A", 0);
    harness.remote.seed_lists(vec![a.clone()]);
    let lists = harness.engine.lists();
    lists.refresh().await.unwrap();

    let result = lists.reorder(&[a.id, a.id]);
    assert!(matches!(result, Err(Error::InvalidInput(_))));
    assert_eq!(lists.cache().pending_count(&CacheKey::lists()), 0);
}

#[tokio::test]
async fn test_tag_lifecycle_and_detach_on_delete() {
    let harness = TestHarness::new().unwrap();
    let tag = sample_tag("urgent");
    let mut task = sample_task(None, "pay rent", 0);
    task.tag_ids = vec![tag.id];
    harness.remote.seed_tags(vec![tag.clone()]);
    harness.remote.seed_tasks(vec![task.clone()]);
    let engine = &harness.engine;
    engine.tags().refresh().await.unwrap();
    engine.tasks().refresh(None).await.unwrap();

    let created = engine.tags().create(TagDraft::new("later")).await.unwrap();
    let renamed = engine.tags().rename(created.id, "someday").await.unwrap();
    assert_eq!(renamed.name, "someday");
    let recolored = engine.tags().recolor(created.id, None).await.unwrap();
    assert!(recolored.color.is_none());

    engine.tags().delete(tag.id).await.unwrap();
    let tags = engine.tags().tags().unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].id, created.id);
    let cached = engine
        .tasks()
        .cache()
        .find(&CacheKey::tasks(), task.id)
        .unwrap();
    assert!(cached.tag_ids.is_empty());
    assert!(harness
        .notifier
        .notices()
        .contains(&(NoticeKind::Success, "tag deleted".to_string())));
}

// =============================================================================
// Engine assembly and events
// =============================================================================

#[tokio::test]
async fn test_events_trace_the_protocol() {
    let harness = TestHarness::new().unwrap();
    let mut events = harness.engine.subscribe();
    let tasks = harness.engine.tasks();
    tasks.refresh(None).await.unwrap();
    tasks.create(TaskDraft::new("evented")).await.unwrap();

    let types: Vec<&str> = [
        events.recv().await.unwrap(),
        events.recv().await.unwrap(),
        events.recv().await.unwrap(),
    ]
    .iter()
    .map(|e| e.event_type)
    .collect();
    assert_eq!(
        types,
        vec!["cache.replaced", "mutation.applied", "mutation.committed"]
    );
}

#[tokio::test]
async fn test_failed_refresh_reports_and_keeps_cache() {
    let harness = TestHarness::new().unwrap();
    let tasks = harness.engine.tasks();
    harness.remote.seed_tasks(vec![sample_task(None, "kept", 0)]);
    tasks.refresh(None).await.unwrap();
    harness.remote.fail_next(RemoteError::network("offline"));

    assert!(tasks.refresh(None).await.is_err());
    assert_eq!(tasks.tasks(None).unwrap().len(), 1);
    assert!(harness.notifier.errors()[0].starts_with("failed to load tasks"));
}

#[test]
fn test_builder_requires_collaborators() {
    let result = Engine::builder().with_config(EngineConfig::default()).build();
    assert!(matches!(result, Err(Error::Config(_))));

    let remote = ScriptedRemote::new();
    let result = Engine::builder().with_remote(remote).build();
    assert!(matches!(result, Err(Error::Config(message)) if message.contains("identity")));
}

#[test]
fn test_engine_event_payload_carries_kind() {
    let event = EngineEvent::Replaced {
        cache_key: CacheKey::tags().to_string(),
        entity_kind: EntityKind::Tag,
        count: 0,
    };
    assert_eq!(event.event_type(), "cache.replaced");
}
