//! The composition root.
//!
//! One [`Engine`] owns the store, the daemon-wide stream, and the
//! subscription manager. Transport frames and commands from HTTP callers
//! all arrive through a single inbox and are handled one at a time, so a
//! handler never observes another handler's half-finished write.

use std::sync::Arc;

use tracing::{debug, info, warn};
use tw_api_types::{paths, QueuedMessage, TaskOverview, TaskStatus};

use crate::config::join_url;
use crate::daemon_reconciler::DaemonReconciler;
use crate::store::{SharedStore, Upsert};
use crate::subscription::{Selection, SharedView, SubscriptionError, SubscriptionManager};
use crate::task_reconciler;
use crate::transport::{
    ConnectionState, EventSink, EventTransport, Frame, InboundFrame, StreamHandle, StreamSource,
    TransportError,
};
use crate::update_bus::{StoreUpdate, UpdateBus};

// ---------------------------------------------------------------------------
// Inbox items
// ---------------------------------------------------------------------------

/// Everything the engine reacts to.
#[derive(Debug)]
pub enum Inbound {
    Frame(InboundFrame),
    Command(Command),
}

type Reply<T> = flume::Sender<T>;

#[derive(Debug)]
pub enum Command {
    SelectTask {
        task_id: Option<String>,
        reply: Reply<Result<Selection, SubscriptionError>>,
    },
    /// Overview returned by a create or get request.
    CommitTask {
        task: TaskOverview,
        reply: Reply<Upsert>,
    },
    /// A message the daemon accepted with `queued: true`.
    CommitQueued {
        task_id: String,
        message: QueuedMessage,
        reply: Reply<bool>,
    },
    CommitStatus {
        task_id: String,
        status: TaskStatus,
        reply: Reply<bool>,
    },
    /// Answered once every item queued before it has been handled.
    Flush { reply: Reply<()> },
    Shutdown,
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine has stopped")]
    Stopped,

    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("subscription: {0}")]
    Subscription(#[from] SubscriptionError),
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    base_url: String,
    transport: Arc<dyn EventTransport>,
    store: SharedStore,
    view: SharedView,
    updates: UpdateBus,
    daemon: DaemonReconciler,
    daemon_stream: Option<StreamHandle>,
    subscriptions: SubscriptionManager,
    tx: flume::Sender<Inbound>,
    rx: flume::Receiver<Inbound>,
}

impl Engine {
    pub fn new(base_url: impl Into<String>, transport: Arc<dyn EventTransport>) -> Self {
        let base_url = base_url.into();
        let (tx, rx) = flume::unbounded();
        let view = SharedView::new();
        let subscriptions =
            SubscriptionManager::new(Arc::clone(&transport), base_url.clone(), tx.clone(), view.clone());
        Self {
            base_url,
            transport,
            store: SharedStore::new(),
            view,
            updates: UpdateBus::new(),
            daemon: DaemonReconciler::new(),
            daemon_stream: None,
            subscriptions,
            tx,
            rx,
        }
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            tx: self.tx.clone(),
            store: self.store.clone(),
            view: self.view.clone(),
            updates: self.updates.clone(),
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    /// Open the daemon stream and process the inbox until
    /// [`EngineHandle::shutdown`] is called.
    pub async fn run(mut self) -> Result<(), EngineError> {
        self.open_daemon_stream().await?;
        info!(base_url = %self.base_url, transport = %self.transport.kind(), "engine started");

        while let Ok(item) = self.rx.recv_async().await {
            if !self.process(item).await {
                break;
            }
        }

        self.stop();
        Ok(())
    }

    /// Handle everything already sitting in the inbox, then return.
    pub async fn drain(&mut self) -> bool {
        while let Ok(item) = self.rx.try_recv() {
            if !self.process(item).await {
                return false;
            }
        }
        true
    }

    pub async fn open_daemon_stream(&mut self) -> Result<(), EngineError> {
        if self.daemon_stream.is_some() {
            return Ok(());
        }
        let url = join_url(&self.base_url, paths::DAEMON_EVENTS);
        let sink = EventSink::new(StreamSource::Daemon, self.tx.clone());
        let handle = self.transport.open(&url, sink).await?;
        debug!(%url, "daemon stream opened");
        self.daemon_stream = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        if let Err(error) = self.subscriptions.close_active() {
            warn!(%error, "closing task subscription during shutdown");
        }
        if let Some(handle) = self.daemon_stream.take() {
            handle.close();
        }
        info!("engine stopped");
    }

    /// Handle one inbox item. Returns `false` on shutdown.
    pub async fn process(&mut self, item: Inbound) -> bool {
        match item {
            Inbound::Frame(frame) => {
                self.on_frame(frame);
                true
            }
            Inbound::Command(Command::Shutdown) => false,
            Inbound::Command(command) => {
                self.on_command(command).await;
                true
            }
        }
    }

    fn on_frame(&mut self, InboundFrame { source, frame }: InboundFrame) {
        match (source, frame) {
            (StreamSource::Daemon, Frame::State(state)) => log_state("daemon", None, state),
            (StreamSource::Daemon, Frame::Event { name, data }) => {
                let changed = self.daemon.handle(&mut self.store.write(), &name, &data);
                for task_id in changed {
                    self.updates.publish(StoreUpdate::overview(task_id));
                }
            }
            (
                StreamSource::Task {
                    task_id,
                    subscription,
                },
                frame,
            ) => {
                let Some(reconciler) = self.subscriptions.accepts(&task_id, subscription) else {
                    debug!(%task_id, subscription, "dropping frame from a closed subscription");
                    return;
                };
                match frame {
                    Frame::State(state) => log_state("task", Some(&task_id), state),
                    Frame::Event { name, data } => {
                        let changes = reconciler.handle(&mut self.store.write(), &name, &data);
                        if changes.any() {
                            self.updates.publish(StoreUpdate::content(task_id, changes));
                        }
                    }
                }
            }
        }
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::SelectTask { task_id, reply } => {
                let result = self.subscriptions.select(task_id.as_deref()).await;
                if let Ok(Selection::Switched { current, .. }) = &result {
                    self.updates.publish(StoreUpdate::selection(current.clone()));
                }
                let _ = reply.send(result);
            }
            Command::CommitTask { task, reply } => {
                let upsert = self.store.write().upsert_overview(&task);
                if upsert != Upsert::Unchanged {
                    self.updates.publish(StoreUpdate::overview(task.id));
                }
                let _ = reply.send(upsert);
            }
            Command::CommitQueued {
                task_id,
                message,
                reply,
            } => {
                let applied = self.commit_queued(&task_id, message);
                let _ = reply.send(applied);
            }
            Command::CommitStatus {
                task_id,
                status,
                reply,
            } => {
                let changed = self.store.write().set_status(&task_id, status);
                if changed {
                    self.updates.publish(StoreUpdate::overview(task_id));
                }
                let _ = reply.send(changed);
            }
            Command::Flush { reply } => {
                let _ = reply.send(());
            }
            Command::Shutdown => {}
        }
    }

    fn commit_queued(&mut self, task_id: &str, message: QueuedMessage) -> bool {
        if self.subscriptions.active_task() != Some(task_id) {
            debug!(task_id, message_id = %message.id, "task no longer active, dropping queued commit");
            return false;
        }
        let applied = {
            let mut store = self.store.write();
            match store.get_mut(task_id) {
                Some(task) => task_reconciler::commit_queued(task, message),
                None => false,
            }
        };
        if applied {
            self.updates.publish(StoreUpdate::content(
                task_id,
                task_reconciler::Changes {
                    queue: true,
                    ..Default::default()
                },
            ));
        }
        applied
    }
}

fn log_state(stream: &str, task_id: Option<&str>, state: ConnectionState) {
    match state {
        ConnectionState::Reconnecting => warn!(stream, task_id, %state, "stream reconnecting"),
        _ => debug!(stream, task_id, %state, "stream state"),
    }
}

// ---------------------------------------------------------------------------
// EngineHandle
// ---------------------------------------------------------------------------

/// Cloneable front door to a running [`Engine`].
#[derive(Clone)]
pub struct EngineHandle {
    tx: flume::Sender<Inbound>,
    store: SharedStore,
    view: SharedView,
    updates: UpdateBus,
}

impl EngineHandle {
    /// Read-only access to the store.
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn view(&self) -> &SharedView {
        &self.view
    }

    pub fn subscribe_updates(&self) -> flume::Receiver<StoreUpdate> {
        self.updates.subscribe()
    }

    pub async fn select_task(&self, task_id: Option<&str>) -> Result<Selection, EngineError> {
        let task_id = task_id.map(str::to_string);
        let result = self
            .request(|reply| Command::SelectTask { task_id, reply })
            .await?;
        Ok(result?)
    }

    pub async fn commit_task(&self, task: TaskOverview) -> Result<Upsert, EngineError> {
        self.request(|reply| Command::CommitTask { task, reply }).await
    }

    /// Returns whether the message was added; `false` when the task is no
    /// longer active or the id is already known.
    pub async fn commit_queued(
        &self,
        task_id: &str,
        message: QueuedMessage,
    ) -> Result<bool, EngineError> {
        let task_id = task_id.to_string();
        self.request(|reply| Command::CommitQueued {
            task_id,
            message,
            reply,
        })
        .await
    }

    pub async fn commit_status(&self, task_id: &str, status: TaskStatus) -> Result<bool, EngineError> {
        let task_id = task_id.to_string();
        self.request(|reply| Command::CommitStatus {
            task_id,
            status,
            reply,
        })
        .await
    }

    /// Wait until the engine has handled everything sent before this call.
    pub async fn flush(&self) -> Result<(), EngineError> {
        self.request(|reply| Command::Flush { reply }).await
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(Inbound::Command(Command::Shutdown));
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, EngineError> {
        let (reply, rx) = flume::bounded(1);
        self.tx
            .send_async(Inbound::Command(build(reply)))
            .await
            .map_err(|_| EngineError::Stopped)?;
        rx.recv_async().await.map_err(|_| EngineError::Stopped)
    }
}
