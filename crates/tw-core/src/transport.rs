//! The event transport capability.
//!
//! The engine never talks to a specific wire protocol. It asks an
//! [`EventTransport`] to open a URL and hands it an [`EventSink`]; the
//! transport pushes named frames into the sink until the returned
//! [`StreamHandle`] is closed or dropped. Reconnecting is the transport's
//! business, not the engine's.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use ahash::{AHashMap, AHashSet};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::Inbound;

/// Generation counter for per-task subscriptions.
pub type SubscriptionId = u64;

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection refused: {0}")]
    Refused(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("engine is no longer listening")]
    SinkClosed,
}

pub type Result<T> = std::result::Result<T, TransportError>;

// ---------------------------------------------------------------------------
// TransportKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Http,
    InProcess,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Http => write!(f, "http"),
            TransportKind::InProcess => write!(f, "in-process"),
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// Which stream a frame came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StreamSource {
    Daemon,
    Task {
        task_id: String,
        subscription: SubscriptionId,
    },
}

impl fmt::Display for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamSource::Daemon => write!(f, "daemon"),
            StreamSource::Task {
                task_id,
                subscription,
            } => write!(f, "task {task_id} (#{subscription})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// One named event with its raw payload.
    Event { name: String, data: String },
    /// The connection changed state.
    State(ConnectionState),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub source: StreamSource,
    pub frame: Frame,
}

// ---------------------------------------------------------------------------
// EventSink
// ---------------------------------------------------------------------------

/// Where a transport delivers frames for one stream.
///
/// Every frame is stamped with the sink's [`StreamSource`] so the engine can
/// tell a live subscription's frames from a closed one's.
#[derive(Debug, Clone)]
pub struct EventSink {
    source: StreamSource,
    tx: flume::Sender<Inbound>,
}

impl EventSink {
    pub(crate) fn new(source: StreamSource, tx: flume::Sender<Inbound>) -> Self {
        Self { source, tx }
    }

    /// A sink wired to a fresh channel, for driving transports in tests.
    pub fn channel(source: StreamSource) -> (Self, flume::Receiver<Inbound>) {
        let (tx, rx) = flume::unbounded();
        (Self::new(source, tx), rx)
    }

    pub fn source(&self) -> &StreamSource {
        &self.source
    }

    /// Deliver a named event. Returns `false` once the engine has gone away.
    pub fn emit(&self, name: impl Into<String>, data: impl Into<String>) -> bool {
        self.send(Frame::Event {
            name: name.into(),
            data: data.into(),
        })
    }

    /// Report a connection state change.
    pub fn state(&self, state: ConnectionState) -> bool {
        self.send(Frame::State(state))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_disconnected()
    }

    fn send(&self, frame: Frame) -> bool {
        self.tx
            .send(Inbound::Frame(InboundFrame {
                source: self.source.clone(),
                frame,
            }))
            .is_ok()
    }
}

// ---------------------------------------------------------------------------
// StreamHandle
// ---------------------------------------------------------------------------

type CloseFn = Box<dyn FnOnce() + Send + Sync>;

/// Keeps one opened stream alive. Closing (or dropping) it tears the stream
/// down immediately; calling close twice is harmless.
pub struct StreamHandle {
    close: Option<CloseFn>,
}

impl StreamHandle {
    pub fn new(close: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            close: Some(Box::new(close)),
        }
    }

    /// A handle with nothing to tear down.
    pub fn detached() -> Self {
        Self { close: None }
    }

    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(close) = self.close.take() {
            close();
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("open", &self.close.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// EventTransport trait
// ---------------------------------------------------------------------------

/// A source of named server-push frames.
///
/// `open` returns once the stream has been started. Connection failures
/// after that point are the transport's to retry; it reports them through
/// [`EventSink::state`] and stops for good when the sink is closed or the
/// handle is dropped.
#[async_trait]
pub trait EventTransport: Send + Sync + 'static {
    fn kind(&self) -> TransportKind;

    async fn open(&self, url: &str, sink: EventSink) -> Result<StreamHandle>;
}

// ---------------------------------------------------------------------------
// InProcessTransport
// ---------------------------------------------------------------------------

#[derive(Default)]
struct InProcessInner {
    next_stream: u64,
    streams: AHashMap<String, Vec<(u64, EventSink)>>,
    refused: AHashSet<String>,
    opened: AHashMap<String, usize>,
}

/// A transport that never touches the network. Tests (and embedders that
/// already have the frames in hand) push events with [`publish`].
///
/// [`publish`]: InProcessTransport::publish
#[derive(Clone, Default)]
pub struct InProcessTransport {
    inner: Arc<Mutex<InProcessInner>>,
}

impl InProcessTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to every open stream on `url`. Returns how many
    /// streams received it.
    pub fn publish(&self, url: &str, name: &str, data: &str) -> usize {
        let mut inner = self.lock();
        let Some(sinks) = inner.streams.get_mut(url) else {
            return 0;
        };
        sinks.retain(|(_, sink)| !sink.is_closed());
        sinks
            .iter()
            .filter(|(_, sink)| sink.emit(name, data))
            .count()
    }

    /// Make every later `open` of `url` fail.
    pub fn refuse(&self, url: &str) {
        self.lock().refused.insert(url.to_string());
    }

    /// Number of streams currently open on `url`.
    pub fn open_streams(&self, url: &str) -> usize {
        self.lock().streams.get(url).map_or(0, Vec::len)
    }

    /// Number of times `url` has been opened successfully.
    pub fn open_count(&self, url: &str) -> usize {
        self.lock().opened.get(url).copied().unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InProcessInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl EventTransport for InProcessTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::InProcess
    }

    async fn open(&self, url: &str, sink: EventSink) -> Result<StreamHandle> {
        if sink.is_closed() {
            return Err(TransportError::SinkClosed);
        }

        let stream_id = {
            let mut inner = self.lock();
            if inner.refused.contains(url) {
                return Err(TransportError::Refused(url.to_string()));
            }
            inner.next_stream += 1;
            let stream_id = inner.next_stream;
            inner
                .streams
                .entry(url.to_string())
                .or_default()
                .push((stream_id, sink.clone()));
            *inner.opened.entry(url.to_string()).or_default() += 1;
            stream_id
        };
        sink.state(ConnectionState::Open);

        let inner = Arc::clone(&self.inner);
        let url = url.to_string();
        Ok(StreamHandle::new(move || {
            let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(sinks) = inner.streams.get_mut(&url) {
                sinks.retain(|(id, _)| *id != stream_id);
            }
        }))
    }
}
