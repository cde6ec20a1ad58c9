use serde_json::{json, Value};
use tw_api_types::{events, EventDesc, QueuedMessage, TaskStatus, TodoStatus};
use tw_core::daemon_reconciler::DaemonReconciler;
use tw_core::task_reconciler::TaskReconciler;
use tw_core::TaskStore;

fn store_with(id: &str) -> TaskStore {
    let mut store = TaskStore::new();
    DaemonReconciler::new().handle(
        &mut store,
        events::TASKS_SYNCHRONIZED,
        &json!({"tasks": [{"id": id, "name": "A", "status": "idle", "created": 1, "cwd": "/"}]})
            .to_string(),
    );
    store
}

fn send(store: &mut TaskStore, name: &str, payload: Value) {
    TaskReconciler::new("t1").handle(store, name, &payload.to_string());
}

fn event(store: &mut TaskStore, payload: Value) {
    send(store, events::TASK_EVENT, payload);
}

fn pre(id: u64, call: &str) -> Value {
    json!({"id": id, "desc": {"msg": "PreToolCall",
        "tool_call": {"id": call, "function": {"name": "read_file", "arguments": "{}"}}}})
}

fn post(id: u64, call: &str) -> Value {
    json!({"id": id, "desc": {"msg": "PostToolCall",
        "tool_call": {"id": call, "function": {"name": "read_file", "arguments": "{}"}},
        "result": {"ok": true}}})
}

fn assistant(id: u64, text: &str) -> Value {
    json!({"id": id, "desc": {"msg": "AssistantMessage",
        "message": {"role": "assistant", "content": text}}})
}

fn queued(id: u64, message_id: &str) -> Value {
    json!({"id": id, "desc": {"msg": "MessageQueued",
        "message": {"id": message_id, "content": format!("body of {message_id}")}}})
}

fn unqueued(id: u64, message_id: &str) -> Value {
    json!({"id": id, "desc": {"msg": "MessageUnqueued", "message": {"id": message_id}}})
}

fn ids(store: &TaskStore) -> Vec<u64> {
    store.get("t1").unwrap().events.iter().map(|e| e.id).collect()
}

fn queue_ids(store: &TaskStore) -> Vec<String> {
    store
        .get("t1")
        .unwrap()
        .input_queue
        .iter()
        .map(|m| m.id.clone())
        .collect()
}

#[test]
fn applying_an_event_twice_equals_applying_it_once() {
    let samples = [
        assistant(1, "hi"),
        pre(2, "c1"),
        post(3, "c1"),
        queued(4, "m1"),
        json!({"id": 5, "desc": {"msg": "PostConversation"}}),
    ];

    let mut once = store_with("t1");
    let mut twice = store_with("t1");
    for sample in &samples {
        event(&mut once, sample.clone());
        event(&mut twice, sample.clone());
        event(&mut twice, sample.clone());
    }

    let (a, b) = (once.get("t1").unwrap(), twice.get("t1").unwrap());
    assert_eq!(a.events, b.events);
    assert_eq!(a.todos, b.todos);
    assert_eq!(a.input_queue, b.input_queue);
    assert!(b.check_invariants());
}

#[test]
fn history_supersedes_prior_incremental_state() {
    let mut store = store_with("t1");
    event(&mut store, assistant(10, "stale"));
    event(&mut store, pre(11, "c9"));

    send(
        &mut store,
        events::HISTORY,
        json!([assistant(1, "a"), assistant(2, "b"), assistant(3, "c")]),
    );

    let task = store.get("t1").unwrap();
    assert_eq!(ids(&store), vec![1, 2, 3]);
    assert_eq!(task.event_ids.len(), 3);
    assert!([1, 2, 3].iter().all(|id| task.event_ids.contains(id)));
    assert!(task.check_invariants());

    // Pre-history ids are forgotten and may be applied again.
    event(&mut store, assistant(10, "fresh"));
    assert_eq!(ids(&store), vec![1, 2, 3, 10]);
}

#[test]
fn post_tool_call_takes_the_position_of_its_pre() {
    let mut store = store_with("t1");
    event(&mut store, assistant(1, "before"));
    event(&mut store, pre(2, "c1"));
    event(&mut store, assistant(3, "after"));
    event(&mut store, post(4, "c1"));

    let task = store.get("t1").unwrap();
    assert_eq!(ids(&store), vec![1, 4, 3]);
    assert!(matches!(task.events[1].desc, EventDesc::PostToolCall(_)));
    assert!(!task
        .events
        .iter()
        .any(|e| matches!(&e.desc, EventDesc::PreToolCall { tool_call } if tool_call.id == "c1")));
    assert!(task.check_invariants());
}

#[test]
fn orphan_post_tool_call_is_appended() {
    let mut store = store_with("t1");
    event(&mut store, assistant(1, "x"));
    event(&mut store, post(2, "nowhere"));
    assert_eq!(ids(&store), vec![1, 2]);
}

#[test]
fn queue_interleavings_converge() {
    let steps = [queued(1, "a"), queued(2, "b"), unqueued(3, "a")];
    let orders: [[usize; 3]; 6] = [
        [0, 1, 2],
        [0, 2, 1],
        [1, 0, 2],
        [1, 2, 0],
        [2, 0, 1],
        [2, 1, 0],
    ];

    for order in orders {
        let mut store = store_with("t1");
        for index in order {
            event(&mut store, steps[index].clone());
        }
        assert_eq!(queue_ids(&store), vec!["b".to_string()], "order {order:?}");
        assert!(store.get("t1").unwrap().events.is_empty());
    }
}

#[test]
fn queue_snapshot_overwrites_everything() {
    let mut store = store_with("t1");
    event(&mut store, queued(1, "a"));
    event(&mut store, queued(2, "b"));

    send(
        &mut store,
        events::QUEUE_SYNCHRONIZED,
        json!([{"id": "x", "content": "X"}, {"id": "y", "content": "Y"}]),
    );

    assert_eq!(
        store.get("t1").unwrap().input_queue,
        vec![
            QueuedMessage {
                id: "x".into(),
                content: "X".into()
            },
            QueuedMessage {
                id: "y".into(),
                content: "Y".into()
            },
        ]
    );
}

#[test]
fn token_counted_is_never_stored() {
    let mut store = store_with("t1");
    for id in 0..50 {
        event(
            &mut store,
            json!({"id": id, "desc": {"msg": "TokenCounted", "tokens": 12}}),
        );
    }
    let task = store.get("t1").unwrap();
    assert!(task.events.is_empty());
    assert!(task.event_ids.is_empty());
}

#[test]
fn daemon_sync_then_change() {
    let mut store = TaskStore::new();
    let daemon = DaemonReconciler::new();
    daemon.handle(
        &mut store,
        events::TASKS_SYNCHRONIZED,
        &json!({"tasks": [{"id": "t1", "name": "A", "status": "idle", "created": 0, "cwd": "/"}]})
            .to_string(),
    );
    daemon.handle(
        &mut store,
        events::TASK_CHANGED,
        &json!({"task": {"id": "t1", "name": "A", "status": "generating", "created": 0, "cwd": "/"}})
            .to_string(),
    );

    assert_eq!(store.len(), 1);
    let task = store.get("t1").unwrap();
    assert_eq!(task.status(), TaskStatus::Generating);
    assert_eq!(task.name(), "A");
    assert!(task.events.is_empty());
    assert!(task.todos.is_empty());
    assert!(task.input_queue.is_empty());
}

#[test]
fn empty_history_then_tool_call_pair() {
    let mut store = store_with("t1");
    send(&mut store, events::HISTORY, json!([]));
    event(&mut store, pre(5, "c1"));
    event(&mut store, post(6, "c1"));

    let task = store.get("t1").unwrap();
    assert_eq!(task.events.len(), 1);
    assert_eq!(task.events[0].id, 6);
    assert_eq!(task.events[0].desc.kind(), "PostToolCall");
}

#[test]
fn todo_tool_result_replaces_todos() {
    let todo = |id: &str, status: &str| {
        json!({"id": id, "content": format!("item {id}"), "priority": "High", "status": status,
               "created_at": "", "updated_at": ""})
    };
    let mut store = store_with("t1");
    event(
        &mut store,
        json!({"id": 1, "desc": {"msg": "PostToolCall",
            "tool_call": {"id": "c1", "function": {"name": "todo_write", "arguments": "{}"}},
            "result": {"todos": [todo("1", "Pending"), todo("2", "InProgress")]}}}),
    );
    assert_eq!(store.get("t1").unwrap().todos.len(), 2);

    event(
        &mut store,
        json!({"id": 2, "desc": {"msg": "PostToolCall",
            "tool_call": {"id": "c2", "function": {"name": "todo", "arguments": "{}"}},
            "result": ["Completed", {"todos": [todo("3", "Completed")]}]}}),
    );
    let todos = &store.get("t1").unwrap().todos;
    assert_eq!(todos.len(), 1);
    assert_eq!(todos[0].status, TodoStatus::Completed);

    // A failed call leaves the list alone.
    event(
        &mut store,
        json!({"id": 3, "desc": {"msg": "PostToolCall",
            "tool_call": {"id": "c3", "function": {"name": "todo", "arguments": "{}"}},
            "error": "boom"}}),
    );
    assert_eq!(store.get("t1").unwrap().todos.len(), 1);
}

#[test]
fn malformed_frames_do_not_disturb_state() {
    let mut store = store_with("t1");
    event(&mut store, assistant(1, "kept"));
    let before = store.snapshot("t1");

    TaskReconciler::new("t1").handle(&mut store, events::TASK_EVENT, "{oops");
    send(&mut store, events::HISTORY, json!({"not": "an array"}));
    send(&mut store, events::QUEUE_SYNCHRONIZED, json!("nope"));
    event(&mut store, json!({"id": 9, "desc": {"msg": "SomethingNew"}}));

    assert_eq!(store.snapshot("t1"), before);
}

#[test]
fn events_for_unseeded_tasks_are_dropped() {
    let mut store = TaskStore::new();
    let changes = TaskReconciler::new("ghost").handle(
        &mut store,
        events::TASK_EVENT,
        &assistant(1, "x").to_string(),
    );
    assert!(!changes.any());
    assert!(store.is_empty());
}
