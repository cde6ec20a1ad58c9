//! Plain-text rendering of store snapshots.

use tw_api_types::{EventDesc, QueuedMessage, TaskEvent, TaskOverview, Todo, TodoStatus};

const MAX_SUMMARY: usize = 120;

/// One line describing an event.
pub fn summarize(event: &TaskEvent) -> String {
    let text = match &event.desc {
        EventDesc::AssistantMessage { message } => format!("assistant: {}", message.content.text()),
        EventDesc::UserMessage { message } => format!("user: {}", message.content.text()),
        EventDesc::MessageAdded { message } => {
            format!("{}: {}", message.role, message.content.text())
        }
        EventDesc::RequestCompleted { .. } => "request completed".to_string(),
        EventDesc::PreToolCall { tool_call } => format!("tool {} ...", tool_call.function.name),
        EventDesc::PostToolCall(post) => {
            let outcome = if post.error.is_some() { "failed" } else { "done" };
            format!("tool {} {outcome}", post.tool_name())
        }
        EventDesc::TodoUpdated { todo } => format!("todos updated ({})", todo.todos.len()),
        EventDesc::PostConversation => "turn finished".to_string(),
        other => other.kind().to_string(),
    };
    format!("[{}] {}", event.id, truncate(first_line(&text), MAX_SUMMARY))
}

pub fn task_line(task: &TaskOverview) -> String {
    let created = task
        .created_at()
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    format!("{:<24} {:<10} {:<16} {}", task.id, task.status, created, task.name)
}

pub fn todo_line(todo: &Todo) -> String {
    let mark = match todo.status {
        TodoStatus::Pending => "[ ]",
        TodoStatus::InProgress => "[~]",
        TodoStatus::Completed => "[x]",
    };
    format!("{mark} {}", todo.content)
}

pub fn queue_line(message: &QueuedMessage) -> String {
    format!("queued {}: {}", message.id, truncate(first_line(&message.content), MAX_SUMMARY))
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Tracks which events have been printed so only changes are shown.
#[derive(Debug, Default)]
pub struct EventPrinter {
    shown: Vec<u64>,
}

impl EventPrinter {
    /// Lines for events that are new or changed since the last call. A
    /// position whose id changed was replaced in place (tool completion)
    /// or rewritten by a history replay.
    pub fn diff(&mut self, events: &[TaskEvent]) -> Vec<String> {
        let mut lines = Vec::new();
        for (index, event) in events.iter().enumerate() {
            match self.shown.get(index) {
                Some(id) if *id == event.id => {}
                Some(_) => lines.push(format!("~ {}", summarize(event))),
                None => lines.push(format!("+ {}", summarize(event))),
            }
        }
        self.shown = events.iter().map(|e| e.id).collect();
        lines
    }
}
