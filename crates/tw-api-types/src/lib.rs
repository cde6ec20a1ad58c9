//! Shared wire types for the taskwatch daemon API.
//!
//! These types mirror the JSON the daemon puts on its two server-push
//! channels (`/v1/events` and `/v1/task/{id}/events`) and on the small set of
//! mutating REST endpoints. Every layer above (decoder, reconcilers, HTTP
//! client, CLI) shares this one definition.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// ── Stream event names and endpoint paths ──

/// Names of the server-push events the daemon emits.
pub mod events {
    /// Daemon-wide: full table of contents of known tasks.
    pub const TASKS_SYNCHRONIZED: &str = "daemon.tasks.synchronized";
    /// Daemon-wide: one task's overview changed.
    pub const TASK_CHANGED: &str = "daemon.task.changed";
    /// Per task: a single incremental `TaskEvent`.
    pub const TASK_EVENT: &str = "maria";
    /// Per task: full replay sent once per (re)connect.
    pub const HISTORY: &str = "maria.history";
    /// Per task: full snapshot of the pending input queue.
    pub const QUEUE_SYNCHRONIZED: &str = "maria.queued_messages.synchronized";
}

/// Relative REST/stream paths, joined onto the daemon base URL.
///
/// Task ids are opaque, so each is percent-encoded into a single path
/// segment.
pub mod paths {
    pub const DAEMON_EVENTS: &str = "/v1/events";
    pub const TASKS: &str = "/v1/task";

    pub fn task(id: &str) -> String {
        format!("/v1/task/{}", urlencoding::encode(id))
    }

    pub fn task_events(id: &str) -> String {
        format!("{}/events", task(id))
    }

    pub fn task_message(id: &str) -> String {
        format!("{}/message", task(id))
    }

    pub fn task_cancel(id: &str) -> String {
        format!("{}/cancel", task(id))
    }
}

/// Tool names whose successful results carry the task's todo list.
pub const TODO_TOOL_NAMES: &[&str] = &["todo", "todo_write"];

/// Model requested for new tasks when the caller does not pick one.
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4.5";

/// Treat an explicit JSON `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ── Task overview ──

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Idle,
    Generating,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Idle => write!(f, "idle"),
            TaskStatus::Generating => write!(f, "generating"),
        }
    }
}

/// Identity and coarse status of one task, as reported by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOverview {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: TaskStatus,
    /// Creation time in unix milliseconds.
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub cwd: String,
}

impl TaskOverview {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.created).single()
    }
}

// ── Chat messages and tool calls ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(default)]
    pub text: String,
}

/// Message content is either a bare string or a list of text parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

impl MessageContent {
    /// Flatten to plain text, concatenating parts in order.
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts.iter().map(|p| p.text.as_str()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolFunction {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(default)]
    pub function: ToolFunction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: MessageContent,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

// ── Todos ──

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TodoPriority {
    High,
    #[default]
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TodoStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    #[serde(default)]
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub priority: TodoPriority,
    #[serde(default)]
    pub status: TodoStatus,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoSnapshot {
    #[serde(default)]
    pub todos: Vec<Todo>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

// ── Task events ──

/// Completion of a tool invocation. Replaces its `PreToolCall` in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostToolCall {
    pub tool_call: ToolCall,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
}

impl PostToolCall {
    /// The tool's name: the explicit `name` field, else the function name.
    pub fn tool_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => self.tool_call.function.name.as_str(),
        }
    }

    pub fn is_todo_tool(&self) -> bool {
        TODO_TOOL_NAMES.contains(&self.tool_name())
    }

    /// The todo list carried by a successful todo-tool result.
    ///
    /// Accepts both `{"todos": [...]}` and the tagged pair
    /// `["Completed", {"todos": [...]}]`. Returns `None` for other tools,
    /// for failed calls, and for results without a parseable list.
    pub fn todos(&self) -> Option<Vec<Todo>> {
        if !self.is_todo_tool() || self.error.is_some() {
            return None;
        }
        let result = self.result.as_ref()?;
        let payload = match result {
            serde_json::Value::Array(pair) if pair.len() == 2 => &pair[1],
            other => other,
        };
        let list = payload.get("todos")?;
        serde_json::from_value(list.clone()).ok()
    }
}

/// Body of a `MessageQueued` event. The id may be absent, in which case the
/// envelope id stands in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub id: String,
}

/// The tagged payload of a task event, discriminated by `msg`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg")]
pub enum EventDesc {
    AssistantMessage {
        #[serde(default)]
        message: ChatMessage,
    },
    UserMessage {
        #[serde(default)]
        message: ChatMessage,
    },
    RequestCompleted {
        #[serde(default)]
        message: ChatMessage,
    },
    MessageAdded {
        #[serde(default)]
        message: ChatMessage,
    },
    PreToolCall {
        tool_call: ToolCall,
    },
    PostToolCall(PostToolCall),
    MessageQueued {
        #[serde(default)]
        message: QueuedBody,
    },
    MessageUnqueued {
        message: MessageRef,
    },
    TodoUpdated {
        #[serde(default)]
        todo: TodoSnapshot,
    },
    PostConversation,
    /// Billing telemetry. Never stored.
    TokenCounted,
    /// Any `msg` this build does not know about.
    #[serde(other)]
    Unknown,
}

impl EventDesc {
    /// The `msg` discriminator, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            EventDesc::AssistantMessage { .. } => "AssistantMessage",
            EventDesc::UserMessage { .. } => "UserMessage",
            EventDesc::RequestCompleted { .. } => "RequestCompleted",
            EventDesc::MessageAdded { .. } => "MessageAdded",
            EventDesc::PreToolCall { .. } => "PreToolCall",
            EventDesc::PostToolCall(_) => "PostToolCall",
            EventDesc::MessageQueued { .. } => "MessageQueued",
            EventDesc::MessageUnqueued { .. } => "MessageUnqueued",
            EventDesc::TodoUpdated { .. } => "TodoUpdated",
            EventDesc::PostConversation => "PostConversation",
            EventDesc::TokenCounted => "TokenCounted",
            EventDesc::Unknown => "Unknown",
        }
    }

    /// The tool call id for `PreToolCall` / `PostToolCall`.
    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            EventDesc::PreToolCall { tool_call } => Some(tool_call.id.as_str()),
            EventDesc::PostToolCall(post) => Some(post.tool_call.id.as_str()),
            _ => None,
        }
    }
}

/// One daemon-assigned event in a task's stream. `id` is unique within the
/// task and carries no meaning across tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub id: u64,
    pub desc: EventDesc,
}

impl TaskEvent {
    pub fn new(id: u64, desc: EventDesc) -> Self {
        Self { id, desc }
    }
}

// ── Input queue ──

/// A user message accepted by the daemon but not yet dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: String,
    #[serde(default)]
    pub content: String,
}

// ── Daemon stream payloads ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TasksSynchronized {
    pub tasks: Vec<TaskOverview>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskChanged {
    pub task: TaskOverview,
}

// ── REST request / response bodies ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub role: String,
    pub content: String,
}

impl OutgoingMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub name: String,
    pub model: String,
    pub message: OutgoingMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default)]
    pub web_search: bool,
}

impl CreateTaskRequest {
    /// A new task named after its first message, using [`DEFAULT_MODEL`].
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            name: message.clone(),
            model: DEFAULT_MODEL.into(),
            message: OutgoingMessage::user(message),
            cwd: None,
            web_search: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResponse {
    pub task: TaskOverview,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMessageRequest {
    pub message: OutgoingMessage,
    #[serde(default)]
    pub web_search: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMessageResponse {
    pub id: String,
    #[serde(default)]
    pub queued: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn overview_defaults_missing_fields() {
        let task: TaskOverview = serde_json::from_value(json!({"id": "t1"})).unwrap();
        assert_eq!(task.name, "");
        assert_eq!(task.status, TaskStatus::Idle);
        assert_eq!(task.created, 0);
    }

    #[test]
    fn overview_created_at_is_millis() {
        let task: TaskOverview = serde_json::from_value(json!({
            "id": "t1", "name": "A", "status": "generating", "created": 1_700_000_000_000i64, "cwd": "/tmp"
        }))
        .unwrap();
        assert_eq!(task.status, TaskStatus::Generating);
        assert_eq!(task.created_at().unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn unknown_msg_decodes_to_unknown() {
        let desc: EventDesc = serde_json::from_value(json!({"msg": "SomethingNew", "x": 1})).unwrap();
        assert_eq!(desc, EventDesc::Unknown);
    }

    #[test]
    fn token_counted_ignores_extra_fields() {
        let desc: EventDesc =
            serde_json::from_value(json!({"msg": "TokenCounted", "usage": {"total": 12}})).unwrap();
        assert_eq!(desc, EventDesc::TokenCounted);
    }

    #[test]
    fn assistant_message_tolerates_null_content() {
        let desc: EventDesc = serde_json::from_value(json!({
            "msg": "AssistantMessage",
            "message": {"role": "assistant", "content": null, "tool_calls": null}
        }))
        .unwrap();
        match desc {
            EventDesc::AssistantMessage { message } => {
                assert_eq!(message.content.text(), "");
                assert!(message.tool_calls.is_empty());
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn content_parts_flatten_to_text() {
        let content: MessageContent =
            serde_json::from_value(json!([{"text": "hello "}, {"text": "world"}])).unwrap();
        assert_eq!(content.text(), "hello world");
    }

    fn todo_json() -> serde_json::Value {
        json!([{
            "id": "1", "content": "write tests", "priority": "High", "status": "InProgress",
            "created_at": "2025-01-01T00:00:00Z", "updated_at": "2025-01-01T00:00:00Z"
        }])
    }

    #[test]
    fn todos_from_tagged_pair_result() {
        let post: PostToolCall = serde_json::from_value(json!({
            "tool_call": {"id": "c1", "function": {"name": "todo", "arguments": "{}"}},
            "result": ["Completed", {"todos": todo_json()}]
        }))
        .unwrap();
        let todos = post.todos().expect("todo list");
        assert_eq!(todos.len(), 1);
        assert_eq!(todos[0].priority, TodoPriority::High);
        assert_eq!(todos[0].status, TodoStatus::InProgress);
    }

    #[test]
    fn todos_from_object_result_with_explicit_name() {
        let post: PostToolCall = serde_json::from_value(json!({
            "tool_call": {"id": "c1", "function": {"name": "", "arguments": ""}},
            "name": "todo_write",
            "result": {"message": "ok", "todos": todo_json()}
        }))
        .unwrap();
        assert_eq!(post.tool_name(), "todo_write");
        assert_eq!(post.todos().unwrap()[0].content, "write tests");
    }

    #[test]
    fn failed_todo_call_yields_nothing() {
        let post: PostToolCall = serde_json::from_value(json!({
            "tool_call": {"id": "c1", "function": {"name": "todo"}},
            "error": "boom"
        }))
        .unwrap();
        assert!(post.todos().is_none());
    }

    #[test]
    fn other_tools_yield_no_todos() {
        let post: PostToolCall = serde_json::from_value(json!({
            "tool_call": {"id": "c1", "function": {"name": "read_file"}},
            "result": {"todos": todo_json()}
        }))
        .unwrap();
        assert!(post.todos().is_none());
    }

    #[test]
    fn create_task_request_uses_default_model() {
        let req = CreateTaskRequest::new("fix the build");
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["name"], "fix the build");
        assert_eq!(value["model"], DEFAULT_MODEL);
        assert_eq!(value["message"]["role"], "user");
        assert!(value.get("cwd").is_none());
    }

    #[test]
    fn paths_are_built_from_ids() {
        assert_eq!(paths::task_events("abc"), "/v1/task/abc/events");
        assert_eq!(paths::task_cancel("abc"), "/v1/task/abc/cancel");
    }

    #[test]
    fn task_ids_stay_in_one_path_segment() {
        assert_eq!(paths::task("team/42"), "/v1/task/team%2F42");
        assert_eq!(
            paths::task_events("a?b#c d"),
            "/v1/task/a%3Fb%23c%20d/events"
        );
        assert_eq!(paths::task_message("x-1_y.z~"), "/v1/task/x-1_y.z~/message");
    }
}
