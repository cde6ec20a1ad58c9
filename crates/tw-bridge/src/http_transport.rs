//! [`EventTransport`] over a long-lived HTTP `text/event-stream` response.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::{StatusCode, Url};
use tracing::{debug, info, warn};
use tw_core::config::StreamConfig;
use tw_core::transport::{
    ConnectionState, EventSink, EventTransport, StreamHandle, TransportError, TransportKind,
};

use crate::sse::SseDecoder;

const LAST_EVENT_ID: &str = "Last-Event-ID";

/// Lower bound for a server-supplied `retry:` delay.
pub const MIN_RETRY: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Doubling reconnect delay, reset after every successful connect.
///
/// Failed attempts never wait less than `initial`, even after a `retry:`
/// hint shortened the first reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
        }
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(
            Duration::from_millis(config.reconnect_initial_ms),
            Duration::from_millis(config.reconnect_max_ms),
        )
    }

    pub fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).max(self.initial).min(self.max)
    }

    /// Delay before reconnecting after a stream that was open ended: the
    /// server's `retry:` hint (floored at [`MIN_RETRY`]) or `initial`.
    pub fn after_open(&self, hint: Option<Duration>) -> Duration {
        hint.map_or(self.initial, |d| d.max(MIN_RETRY))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_config(&StreamConfig::default())
    }
}

// ---------------------------------------------------------------------------
// HttpEventTransport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpEventTransport {
    client: reqwest::Client,
    backoff: Backoff,
}

impl HttpEventTransport {
    pub fn new(backoff: Backoff) -> Self {
        Self::with_client(reqwest::Client::new(), backoff)
    }

    pub fn with_client(client: reqwest::Client, backoff: Backoff) -> Self {
        Self { client, backoff }
    }
}

impl Default for HttpEventTransport {
    fn default() -> Self {
        Self::new(Backoff::default())
    }
}

#[async_trait]
impl EventTransport for HttpEventTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn open(&self, url: &str, sink: EventSink) -> Result<StreamHandle, TransportError> {
        let url = Url::parse(url).map_err(|e| TransportError::InvalidUrl(format!("{url}: {e}")))?;
        if sink.is_closed() {
            return Err(TransportError::SinkClosed);
        }
        let task = tokio::spawn(run_stream(self.client.clone(), url, sink, self.backoff));
        Ok(StreamHandle::new(move || task.abort()))
    }
}

/// How one connection ended.
enum Pump {
    /// The server closed the response.
    Ended,
    /// Reading the body failed.
    Failed(String),
    /// Nobody is listening any more.
    SinkClosed,
}

async fn run_stream(client: reqwest::Client, url: Url, sink: EventSink, backoff: Backoff) {
    let mut decoder = SseDecoder::new();
    let mut delay = backoff.initial;
    let mut state = ConnectionState::Connecting;

    loop {
        if !sink.state(state) {
            return;
        }

        match connect(&client, &url, decoder.last_event_id()).await {
            Ok(response) => {
                if !sink.state(ConnectionState::Open) {
                    return;
                }
                info!(source = %sink.source(), %url, "stream connected");

                match pump(response, &mut decoder, &sink).await {
                    Pump::SinkClosed => return,
                    Pump::Ended => debug!(source = %sink.source(), "stream ended by server"),
                    Pump::Failed(error) => {
                        warn!(source = %sink.source(), %error, "stream read failed")
                    }
                }
                // Read after the pump so a hint sent on this connection
                // governs this reconnect.
                delay = backoff.after_open(decoder.retry());
            }
            Err(TransportError::Status { status, .. }) if is_fatal(status) => {
                warn!(source = %sink.source(), %url, status, "stream rejected, giving up");
                sink.state(ConnectionState::Closed);
                return;
            }
            Err(error) => {
                warn!(source = %sink.source(), %url, %error, retry_in_ms = delay.as_millis() as u64, "stream connect failed");
            }
        }

        decoder.reset();
        if sink.is_closed() {
            return;
        }
        state = ConnectionState::Reconnecting;
        tokio::time::sleep(delay).await;
        delay = backoff.next(delay);
    }
}

/// Client errors other than rate limiting will not fix themselves.
fn is_fatal(status: u16) -> bool {
    StatusCode::from_u16(status)
        .map(|s| s.is_client_error() && s != StatusCode::TOO_MANY_REQUESTS)
        .unwrap_or(false)
}

async fn connect(
    client: &reqwest::Client,
    url: &Url,
    last_event_id: Option<&str>,
) -> Result<reqwest::Response, TransportError> {
    let mut request = client
        .get(url.clone())
        .header(ACCEPT, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache");
    if let Some(id) = last_event_id {
        request = request.header(LAST_EVENT_ID, id);
    }

    let response = request
        .send()
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;
    if !response.status().is_success() {
        return Err(TransportError::Status {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }
    Ok(response)
}

async fn pump(response: reqwest::Response, decoder: &mut SseDecoder, sink: &EventSink) -> Pump {
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => {
                for event in decoder.push(&bytes) {
                    if !sink.emit(event.event, event.data) {
                        return Pump::SinkClosed;
                    }
                }
            }
            Err(error) => return Pump::Failed(error.to_string()),
        }
    }
    Pump::Ended
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let backoff = Backoff::default();
        let mut delay = backoff.initial;
        let mut seen = vec![delay];
        for _ in 0..6 {
            delay = backoff.next(delay);
            seen.push(delay);
        }
        let secs: Vec<u64> = seen.iter().map(Duration::as_secs).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 16, 16]);
    }

    #[test]
    fn zero_delay_never_sticks() {
        let backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(16));
        assert_eq!(backoff.next(Duration::ZERO), Duration::from_millis(500));
        assert_eq!(backoff.next(MIN_RETRY), Duration::from_millis(500));
    }

    #[test]
    fn retry_hint_is_floored() {
        let backoff = Backoff::default();
        assert_eq!(backoff.after_open(Some(Duration::ZERO)), MIN_RETRY);
        assert_eq!(
            backoff.after_open(Some(Duration::from_millis(250))),
            Duration::from_millis(250)
        );
        assert_eq!(backoff.after_open(None), backoff.initial);
    }

    #[test]
    fn max_never_drops_below_initial() {
        let backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(backoff.max, Duration::from_secs(5));
    }

    #[test]
    fn only_client_errors_are_fatal() {
        assert!(is_fatal(404));
        assert!(is_fatal(410));
        assert!(!is_fatal(429));
        assert!(!is_fatal(503));
    }
}
