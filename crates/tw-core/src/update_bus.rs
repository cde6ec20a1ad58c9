use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use crate::task_reconciler::Changes;

/// What part of the store changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    /// The task was created or its name/status changed.
    Overview,
    /// Events, todos or the input queue changed.
    Content(ContentChange),
    /// The active task changed (`task_id` is the new one, if any).
    Selection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContentChange {
    pub events: bool,
    pub todos: bool,
    pub queue: bool,
}

impl From<Changes> for ContentChange {
    fn from(changes: Changes) -> Self {
        Self {
            events: changes.events,
            todos: changes.todos,
            queue: changes.queue,
        }
    }
}

/// Notification that the store was written. Readers fetch a fresh
/// snapshot; the update itself carries no state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreUpdate {
    pub task_id: Option<String>,
    pub kind: UpdateKind,
}

impl StoreUpdate {
    pub fn overview(task_id: impl Into<String>) -> Self {
        Self {
            task_id: Some(task_id.into()),
            kind: UpdateKind::Overview,
        }
    }

    pub fn content(task_id: impl Into<String>, changes: Changes) -> Self {
        Self {
            task_id: Some(task_id.into()),
            kind: UpdateKind::Content(changes.into()),
        }
    }

    pub fn selection(task_id: Option<String>) -> Self {
        Self {
            task_id,
            kind: UpdateKind::Selection,
        }
    }
}

/// A broadcast-style bus for [`StoreUpdate`]s built on flume channels.
///
/// Each call to [`subscribe`](UpdateBus::subscribe) creates a receiver that
/// sees every update published afterwards. Receivers that have been dropped
/// are pruned on the next publish.
#[derive(Clone, Default)]
pub struct UpdateBus {
    inner: Arc<Mutex<Vec<flume::Sender<StoreUpdate>>>>,
}

impl UpdateBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> flume::Receiver<StoreUpdate> {
        let (tx, rx) = flume::unbounded();
        self.senders().push(tx);
        rx
    }

    pub fn publish(&self, update: StoreUpdate) {
        self.senders()
            .retain(|tx| tx.send(update.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.senders().len()
    }

    fn senders(&self) -> std::sync::MutexGuard<'_, Vec<flume::Sender<StoreUpdate>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
