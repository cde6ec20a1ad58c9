//! Lifecycle of the single per-task subscription.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use tw_api_types::paths;

use crate::config::join_url;
use crate::engine::Inbound;
use crate::task_reconciler::TaskReconciler;
use crate::transport::{
    EventSink, EventTransport, StreamHandle, StreamSource, SubscriptionId, TransportError,
};

/// Transitions kept in [`SubscriptionMachine::history`].
const HISTORY_LIMIT: usize = 64;

// ---------------------------------------------------------------------------
// SubscriptionState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribing,
    Subscribed,
    Closing,
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SubscriptionState::Unsubscribed => "Unsubscribed",
            SubscriptionState::Subscribing => "Subscribing",
            SubscriptionState::Subscribed => "Subscribed",
            SubscriptionState::Closing => "Closing",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionEvent {
    Open,
    Opened,
    Fail,
    Close,
    Closed,
}

impl fmt::Display for SubscriptionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SubscriptionEvent::Open => "Open",
            SubscriptionEvent::Opened => "Opened",
            SubscriptionEvent::Fail => "Fail",
            SubscriptionEvent::Close => "Close",
            SubscriptionEvent::Closed => "Closed",
        };
        write!(f, "{label}")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error("invalid transition: cannot apply {event} in state {state}")]
    InvalidTransition {
        state: SubscriptionState,
        event: SubscriptionEvent,
    },

    #[error("failed to open stream for task {task_id}: {source}")]
    Open {
        task_id: String,
        #[source]
        source: TransportError,
    },
}

// ---------------------------------------------------------------------------
// SubscriptionMachine
// ---------------------------------------------------------------------------

/// Unsubscribed → Subscribing → Subscribed → Closing → Unsubscribed, with
/// Subscribing → Unsubscribed when the open fails.
#[derive(Debug, Clone)]
pub struct SubscriptionMachine {
    current: SubscriptionState,
    history: Vec<(SubscriptionState, SubscriptionEvent, SubscriptionState)>,
}

impl SubscriptionMachine {
    pub fn new() -> Self {
        Self {
            current: SubscriptionState::Unsubscribed,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> SubscriptionState {
        self.current
    }

    /// The most recent transitions, oldest first.
    pub fn history(&self) -> &[(SubscriptionState, SubscriptionEvent, SubscriptionState)] {
        &self.history
    }

    pub fn transition(
        &mut self,
        event: SubscriptionEvent,
    ) -> Result<SubscriptionState, SubscriptionError> {
        use SubscriptionEvent as E;
        use SubscriptionState as S;

        let next = match (self.current, event) {
            (S::Unsubscribed, E::Open) => S::Subscribing,
            (S::Subscribing, E::Opened) => S::Subscribed,
            (S::Subscribing, E::Fail) => S::Unsubscribed,
            (S::Subscribed, E::Close) => S::Closing,
            (S::Closing, E::Closed) => S::Unsubscribed,
            _ => {
                return Err(SubscriptionError::InvalidTransition {
                    state: self.current,
                    event,
                });
            }
        };

        let from = self.current;
        self.current = next;
        if self.history.len() == HISTORY_LIMIT {
            self.history.remove(0);
        }
        self.history.push((from, event, next));
        debug!(from = %from, event = %event, to = %next, "subscription transition");
        Ok(next)
    }
}

impl Default for SubscriptionMachine {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// View state
// ---------------------------------------------------------------------------

/// Transient, task-scoped UI state. Not part of [`TaskState`]; wiped every
/// time the active task changes.
///
/// [`TaskState`]: crate::store::TaskState
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScratchState {
    /// The input queue listing is currently shown.
    pub queue_panel_open: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewState {
    pub active_task: Option<String>,
    pub scratch: ScratchState,
}

/// Selection and scratch state shared with the presentation layer.
#[derive(Debug, Clone, Default)]
pub struct SharedView {
    inner: Arc<RwLock<ViewState>>,
}

impl SharedView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ViewState {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn active_task(&self) -> Option<String> {
        self.snapshot().active_task
    }

    /// Edit the scratch state of the current task.
    pub fn update_scratch(&self, f: impl FnOnce(&mut ScratchState)) {
        let mut view = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut view.scratch);
    }

    pub(crate) fn switch_to(&self, task_id: Option<&str>) {
        let mut view = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        view.active_task = task_id.map(str::to_string);
        view.scratch = ScratchState::default();
    }
}

// ---------------------------------------------------------------------------
// SubscriptionManager
// ---------------------------------------------------------------------------

/// What a call to [`SubscriptionManager::select`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// The task was already active.
    Unchanged,
    Switched {
        previous: Option<String>,
        current: Option<String>,
    },
}

struct ActiveSubscription {
    id: SubscriptionId,
    reconciler: TaskReconciler,
    handle: StreamHandle,
}

/// Owns at most one live per-task subscription.
///
/// Switching tasks closes the previous stream before the next one is opened.
/// Every stream is stamped with a fresh [`SubscriptionId`], and
/// [`accepts`](SubscriptionManager::accepts) only lets the live one through,
/// so frames still in flight from a closed stream never reach the store.
pub struct SubscriptionManager {
    transport: Arc<dyn EventTransport>,
    base_url: String,
    inbox: flume::Sender<Inbound>,
    machine: SubscriptionMachine,
    active: Option<ActiveSubscription>,
    next_id: SubscriptionId,
    view: SharedView,
}

impl SubscriptionManager {
    pub fn new(
        transport: Arc<dyn EventTransport>,
        base_url: impl Into<String>,
        inbox: flume::Sender<Inbound>,
        view: SharedView,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            inbox,
            machine: SubscriptionMachine::new(),
            active: None,
            next_id: 0,
            view,
        }
    }

    pub fn state(&self) -> SubscriptionState {
        self.machine.state()
    }

    pub fn machine(&self) -> &SubscriptionMachine {
        &self.machine
    }

    pub fn active_task(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.reconciler.task_id())
    }

    pub fn active_id(&self) -> Option<SubscriptionId> {
        self.active.as_ref().map(|a| a.id)
    }

    /// The reconciler for `task_id`, if `subscription` is the live stream
    /// for it. Anything else is a late frame.
    pub fn accepts(&self, task_id: &str, subscription: SubscriptionId) -> Option<&TaskReconciler> {
        self.active
            .as_ref()
            .filter(|a| a.id == subscription && a.reconciler.task_id() == task_id)
            .map(|a| &a.reconciler)
    }

    /// Make `task_id` the active task.
    ///
    /// Selecting the task that is already live does nothing. Otherwise the
    /// current stream is closed, the scratch state is cleared, and (for
    /// `Some`) a new stream is opened. When the open fails the task stays
    /// selected but unsubscribed, so selecting it again retries.
    pub async fn select(&mut self, task_id: Option<&str>) -> Result<Selection, SubscriptionError> {
        if task_id.is_some() && self.active_task() == task_id {
            return Ok(Selection::Unchanged);
        }
        if task_id.is_none() && self.active.is_none() && self.view.active_task().is_none() {
            return Ok(Selection::Unchanged);
        }

        let previous = self.close_active()?;
        self.view.switch_to(task_id);

        let Some(task_id) = task_id else {
            info!(previous = previous.as_deref(), "task deselected");
            return Ok(Selection::Switched {
                previous,
                current: None,
            });
        };

        self.open(task_id).await?;
        info!(task_id, previous = previous.as_deref(), "task selected");
        Ok(Selection::Switched {
            previous,
            current: Some(task_id.to_string()),
        })
    }

    /// Close the live stream, if any. Returns the task it belonged to.
    pub fn close_active(&mut self) -> Result<Option<String>, SubscriptionError> {
        let Some(active) = self.active.take() else {
            return Ok(None);
        };
        self.machine.transition(SubscriptionEvent::Close)?;
        active.handle.close();
        self.machine.transition(SubscriptionEvent::Closed)?;
        let task_id = active.reconciler.task_id().to_string();
        debug!(task_id = %task_id, subscription = active.id, "subscription closed");
        Ok(Some(task_id))
    }

    async fn open(&mut self, task_id: &str) -> Result<(), SubscriptionError> {
        self.machine.transition(SubscriptionEvent::Open)?;
        self.next_id += 1;
        let id = self.next_id;

        let sink = EventSink::new(
            StreamSource::Task {
                task_id: task_id.to_string(),
                subscription: id,
            },
            self.inbox.clone(),
        );
        let url = join_url(&self.base_url, &paths::task_events(task_id));

        match self.transport.open(&url, sink).await {
            Ok(handle) => {
                self.machine.transition(SubscriptionEvent::Opened)?;
                self.active = Some(ActiveSubscription {
                    id,
                    reconciler: TaskReconciler::new(task_id),
                    handle,
                });
                debug!(task_id, subscription = id, %url, "subscription opened");
                Ok(())
            }
            Err(source) => {
                self.machine.transition(SubscriptionEvent::Fail)?;
                warn!(task_id, %url, error = %source, "failed to open task stream");
                Err(SubscriptionError::Open {
                    task_id: task_id.to_string(),
                    source,
                })
            }
        }
    }
}
