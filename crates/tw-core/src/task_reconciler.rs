//! Per-task reconciliation: history replay, the incremental merge rule and
//! input-queue synchronisation.
//!
//! Tool-call completion looks up its pending `PreToolCall` with a linear
//! backward scan over the task's events. The scan is bounded by one task's
//! event count and needs no auxiliary index to keep in step with history
//! replays; if per-task volumes grow large, a `tool_call_id -> position` map
//! rebuilt on every history replay is the replacement.

use std::ops::BitOrAssign;

use tracing::{debug, warn};
use tw_api_types::{EventDesc, QueuedMessage, TaskEvent};

use crate::decode::{decode_task, DecodeError, TaskMessage};
use crate::store::{TaskState, TaskStore};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Which slices of a [`TaskState`] an operation modified.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Changes {
    pub events: bool,
    pub todos: bool,
    pub queue: bool,
}

impl Changes {
    pub fn any(self) -> bool {
        self.events || self.todos || self.queue
    }
}

impl BitOrAssign for Changes {
    fn bitor_assign(&mut self, rhs: Self) {
        self.events |= rhs.events;
        self.todos |= rhs.todos;
        self.queue |= rhs.queue;
    }
}

/// What the merge rule did with one incremental event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Added at the end of `events`.
    Appended { todos: bool },
    /// Took the place of the matching `PreToolCall` at `index`.
    Replaced { index: usize, todos: bool },
    /// Id already applied.
    Duplicate,
    /// Never stored (`TokenCounted`, unknown kinds).
    Dropped,
    /// `MessageQueued`; `added` is false when the entry was already present
    /// or already unqueued.
    Queued { added: bool },
    /// `MessageUnqueued`; `removed` is false when nothing matched.
    Unqueued { removed: bool },
}

impl MergeOutcome {
    pub fn changes(self) -> Changes {
        match self {
            MergeOutcome::Appended { todos } | MergeOutcome::Replaced { todos, .. } => Changes {
                events: true,
                todos,
                queue: false,
            },
            MergeOutcome::Queued { added: true } | MergeOutcome::Unqueued { removed: true } => {
                Changes {
                    queue: true,
                    ..Changes::default()
                }
            }
            _ => Changes::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Merge rule
// ---------------------------------------------------------------------------

/// Apply one incremental event to a task.
///
/// 1. `TokenCounted` (and unknown kinds) are dropped.
/// 2. Already-applied ids are dropped.
/// 3. `PostToolCall` replaces its pending `PreToolCall` in place, or is
///    appended when none is found.
/// 4. A successful todo-tool `PostToolCall` replaces `todos` wholesale.
/// 5. Anything else is appended.
///
/// `MessageQueued` / `MessageUnqueued` only touch the input queue.
pub fn merge_event(task: &mut TaskState, event: TaskEvent) -> MergeOutcome {
    match &event.desc {
        EventDesc::TokenCounted => return MergeOutcome::Dropped,
        EventDesc::Unknown => {
            debug!(task_id = %task.id(), event_id = event.id, "dropping event of unknown kind");
            return MergeOutcome::Dropped;
        }
        _ => {}
    }

    if task.event_ids.contains(&event.id) {
        return MergeOutcome::Duplicate;
    }

    match &event.desc {
        EventDesc::MessageQueued { message } => {
            let id = message
                .id
                .clone()
                .unwrap_or_else(|| event.id.to_string());
            let added = enqueue(
                task,
                QueuedMessage {
                    id,
                    content: message.content.text(),
                },
            );
            return MergeOutcome::Queued { added };
        }
        EventDesc::MessageUnqueued { message } => {
            let removed = unqueue(task, &message.id);
            return MergeOutcome::Unqueued { removed };
        }
        _ => {}
    }

    let completion = match &event.desc {
        EventDesc::PostToolCall(post) => Some((post.tool_call.id.clone(), post.todos())),
        _ => None,
    };

    let Some((tool_call_id, todos)) = completion else {
        append(task, event);
        return MergeOutcome::Appended { todos: false };
    };

    let todos_replaced = match todos {
        Some(list) => {
            task.todos = list;
            true
        }
        None => false,
    };

    match find_pending_tool_call(&task.events, &tool_call_id) {
        Some(index) => {
            let replaced_id = task.events[index].id;
            task.superseded.insert(replaced_id);
            task.event_ids.insert(event.id);
            task.events[index] = event;
            MergeOutcome::Replaced {
                index,
                todos: todos_replaced,
            }
        }
        None => {
            append(task, event);
            MergeOutcome::Appended {
                todos: todos_replaced,
            }
        }
    }
}

fn append(task: &mut TaskState, event: TaskEvent) {
    task.event_ids.insert(event.id);
    task.events.push(event);
}

/// Position of the most recent `PreToolCall` for `tool_call_id`.
fn find_pending_tool_call(events: &[TaskEvent], tool_call_id: &str) -> Option<usize> {
    events.iter().rposition(|e| {
        matches!(&e.desc, EventDesc::PreToolCall { tool_call } if tool_call.id == tool_call_id)
    })
}

/// Replace the task's events with a full replay.
pub fn apply_history(task: &mut TaskState, events: Vec<TaskEvent>) -> Changes {
    task.events.clear();
    task.event_ids.clear();
    task.superseded.clear();

    let mut changes = Changes {
        events: true,
        ..Changes::default()
    };
    for event in events {
        changes |= merge_event(task, event).changes();
    }
    changes
}

/// Replace the input queue with an authoritative snapshot. Unqueue
/// tombstones from before the snapshot are discarded.
pub fn sync_queue(task: &mut TaskState, queue: Vec<QueuedMessage>) -> Changes {
    task.unqueued.clear();
    let changed = task.input_queue != queue;
    task.input_queue = queue;
    Changes {
        queue: changed,
        ..Changes::default()
    }
}

/// Record a message the daemon accepted with `queued: true`.
pub fn commit_queued(task: &mut TaskState, message: QueuedMessage) -> bool {
    enqueue(task, message)
}

fn enqueue(task: &mut TaskState, message: QueuedMessage) -> bool {
    if task.unqueued.contains(&message.id) || task.input_queue.iter().any(|m| m.id == message.id) {
        return false;
    }
    task.input_queue.push(message);
    true
}

fn unqueue(task: &mut TaskState, id: &str) -> bool {
    task.unqueued.insert(id.to_string());
    let before = task.input_queue.len();
    task.input_queue.retain(|m| m.id != id);
    task.input_queue.len() != before
}

// ---------------------------------------------------------------------------
// TaskReconciler
// ---------------------------------------------------------------------------

/// Reconciles one task's event stream into its [`TaskState`].
#[derive(Debug, Clone)]
pub struct TaskReconciler {
    task_id: String,
}

impl TaskReconciler {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Decode and apply one raw frame from the task's stream.
    pub fn handle(&self, store: &mut TaskStore, name: &str, payload: &str) -> Changes {
        match decode_task(name, payload) {
            Ok(message) => self.apply(store, message),
            Err(DecodeError::UnknownEvent(event)) => {
                debug!(task_id = %self.task_id, %event, "ignoring unknown task event");
                Changes::default()
            }
            Err(error) => {
                warn!(task_id = %self.task_id, event = name, %error, "dropping malformed task event");
                Changes::default()
            }
        }
    }

    pub fn apply(&self, store: &mut TaskStore, message: TaskMessage) -> Changes {
        let Some(task) = store.get_mut(&self.task_id) else {
            warn!(task_id = %self.task_id, "dropping event for a task the store has not seen");
            return Changes::default();
        };

        match message {
            TaskMessage::History(events) => {
                let count = events.len();
                let changes = apply_history(task, events);
                debug!(task_id = %self.task_id, count, kept = task.events.len(), "history replayed");
                changes
            }
            TaskMessage::QueueSynchronized(queue) => {
                debug!(task_id = %self.task_id, len = queue.len(), "queue synchronized");
                sync_queue(task, queue)
            }
            TaskMessage::Event(event) => {
                let event_id = event.id;
                let kind = event.desc.kind();
                let outcome = merge_event(task, event);
                debug!(task_id = %self.task_id, event_id, kind, ?outcome, "event merged");
                outcome.changes()
            }
        }
    }
}
