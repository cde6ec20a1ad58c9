//! Folds the daemon-wide stream into the task store.

use tracing::{debug, warn};

use crate::decode::{decode_daemon, DaemonMessage, DecodeError};
use crate::store::{TaskStore, Upsert};

/// Applies `daemon.tasks.synchronized` and `daemon.task.changed`.
///
/// Both events are idempotent: replaying an identical payload changes
/// nothing. Neither ever touches a task's events, todos or queue.
#[derive(Debug, Default, Clone, Copy)]
pub struct DaemonReconciler;

impl DaemonReconciler {
    pub fn new() -> Self {
        Self
    }

    /// Decode and apply one raw frame. Malformed or unknown frames are
    /// logged and dropped. Returns the ids of tasks that changed.
    pub fn handle(&self, store: &mut TaskStore, name: &str, payload: &str) -> Vec<String> {
        match decode_daemon(name, payload) {
            Ok(message) => self.apply(store, message),
            Err(DecodeError::UnknownEvent(event)) => {
                debug!(%event, "ignoring unknown daemon event");
                Vec::new()
            }
            Err(error) => {
                warn!(event = name, %error, "dropping malformed daemon event");
                Vec::new()
            }
        }
    }

    pub fn apply(&self, store: &mut TaskStore, message: DaemonMessage) -> Vec<String> {
        match message {
            DaemonMessage::TasksSynchronized(tasks) => {
                let inserted = store.seed(&tasks);
                debug!(
                    listed = tasks.len(),
                    inserted = inserted.len(),
                    "tasks synchronized"
                );
                inserted
            }
            DaemonMessage::TaskChanged(task) => match store.upsert_overview(&task) {
                Upsert::Inserted | Upsert::Updated => {
                    debug!(task_id = %task.id, status = %task.status, "task changed");
                    vec![task.id]
                }
                Upsert::Unchanged => Vec::new(),
            },
        }
    }
}
