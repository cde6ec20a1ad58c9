//! The task store: the client's single source of truth for task state.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ahash::{AHashMap, AHashSet};
use tw_api_types::{QueuedMessage, TaskEvent, TaskOverview, TaskStatus, Todo};

// ---------------------------------------------------------------------------
// TaskState
// ---------------------------------------------------------------------------

/// Everything the client knows about one task.
///
/// `events` is in presentation order. `event_ids` holds the id of every
/// event that has been applied: the ids of the entries in `events` plus the
/// ids of `PreToolCall` entries that were replaced in place by their
/// `PostToolCall` (kept so a re-delivered `PreToolCall` stays a duplicate).
#[derive(Debug, Clone, PartialEq)]
pub struct TaskState {
    pub overview: TaskOverview,
    pub events: Vec<TaskEvent>,
    pub event_ids: AHashSet<u64>,
    pub todos: Vec<Todo>,
    pub input_queue: Vec<QueuedMessage>,
    /// Ids replaced in place; subset of `event_ids`, disjoint from `events`.
    pub(crate) superseded: AHashSet<u64>,
    /// Queue ids already unqueued since the last queue snapshot.
    pub(crate) unqueued: AHashSet<String>,
}

impl TaskState {
    pub fn new(overview: TaskOverview) -> Self {
        Self {
            overview,
            events: Vec::new(),
            event_ids: AHashSet::new(),
            todos: Vec::new(),
            input_queue: Vec::new(),
            superseded: AHashSet::new(),
            unqueued: AHashSet::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.overview.id
    }

    pub fn name(&self) -> &str {
        &self.overview.name
    }

    pub fn status(&self) -> TaskStatus {
        self.overview.status
    }

    /// Take `name` and `status` from a newer overview. Events, todos and
    /// the queue are left alone. Returns whether anything changed.
    pub fn update_overview(&mut self, overview: &TaskOverview) -> bool {
        let changed = self.overview.name != overview.name || self.overview.status != overview.status;
        self.overview.name.clone_from(&overview.name);
        self.overview.status = overview.status;
        changed
    }

    /// True when `event_ids` is exactly the ids in `events` plus the ids
    /// replaced in place, with no event id repeated.
    pub fn check_invariants(&self) -> bool {
        let live: AHashSet<u64> = self.events.iter().map(|e| e.id).collect();
        if live.len() != self.events.len() {
            return false;
        }
        if !live.is_disjoint(&self.superseded) {
            return false;
        }
        let expected: AHashSet<u64> = live.union(&self.superseded).copied().collect();
        expected == self.event_ids
    }
}

// ---------------------------------------------------------------------------
// TaskStore
// ---------------------------------------------------------------------------

/// Result of folding an overview into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
    Unchanged,
}

/// In-memory map from task id to [`TaskState`].
///
/// Tasks are created lazily the first time their id is observed and are
/// never removed during a session.
#[derive(Debug, Clone, Default)]
pub struct TaskStore {
    tasks: AHashMap<String, TaskState>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&TaskState> {
        self.tasks.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut TaskState> {
        self.tasks.get_mut(id)
    }

    /// An owned copy of one task, safe to hand to a presentation layer.
    pub fn snapshot(&self, id: &str) -> Option<TaskState> {
        self.tasks.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// All tasks, newest first. Ties break on id so the order is stable.
    pub fn tasks_by_recency(&self) -> Vec<&TaskState> {
        let mut tasks: Vec<&TaskState> = self.tasks.values().collect();
        tasks.sort_by(|a, b| {
            b.overview
                .created
                .cmp(&a.overview.created)
                .then_with(|| a.id().cmp(b.id()))
        });
        tasks
    }

    /// Insert a default state for every overview not yet present. Existing
    /// tasks are not touched at all. Returns the ids that were inserted.
    pub fn seed(&mut self, overviews: &[TaskOverview]) -> Vec<String> {
        let mut inserted = Vec::new();
        for overview in overviews {
            if !self.tasks.contains_key(&overview.id) {
                self.tasks
                    .insert(overview.id.clone(), TaskState::new(overview.clone()));
                inserted.push(overview.id.clone());
            }
        }
        inserted
    }

    /// Insert the task if absent, otherwise refresh only its name/status.
    pub fn upsert_overview(&mut self, overview: &TaskOverview) -> Upsert {
        match self.tasks.get_mut(&overview.id) {
            Some(task) => {
                if task.update_overview(overview) {
                    Upsert::Updated
                } else {
                    Upsert::Unchanged
                }
            }
            None => {
                self.tasks
                    .insert(overview.id.clone(), TaskState::new(overview.clone()));
                Upsert::Inserted
            }
        }
    }

    /// Overwrite a known task's status. Unknown ids are ignored.
    pub fn set_status(&mut self, id: &str, status: TaskStatus) -> bool {
        match self.tasks.get_mut(id) {
            Some(task) if task.overview.status != status => {
                task.overview.status = status;
                true
            }
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// SharedStore
// ---------------------------------------------------------------------------

/// The store as shared between the engine and read-only consumers.
///
/// Only this crate can take the write lock; everyone else reads, and should
/// copy out what they need with [`TaskStore::snapshot`].
#[derive(Debug, Clone, Default)]
pub struct SharedStore {
    inner: Arc<RwLock<TaskStore>>,
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, TaskStore> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, TaskStore> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
