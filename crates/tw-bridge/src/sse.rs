//! Incremental parser for the `text/event-stream` wire format.
//!
//! Bytes arrive in arbitrary chunks; a line, a UTF-8 sequence, or a CRLF
//! pair may straddle two chunks. [`SseDecoder::push`] buffers whatever is
//! incomplete and returns every event completed by the new bytes.

use std::time::Duration;

use tracing::warn;

/// Event name used when a block carries no `event:` field.
pub const DEFAULT_EVENT: &str = "message";

/// Longest unterminated line buffered before it is discarded.
pub const MAX_LINE_LEN: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    max_line: usize,
    /// Dropping the rest of an oversized line, up to its terminator.
    discarding: bool,
    /// The previous chunk ended in `\r`; a leading `\n` belongs to it.
    skip_lf: bool,
    event: Option<String>,
    data: Vec<String>,
    last_event_id: Option<String>,
    retry: Option<Duration>,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_LEN)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_line,
            discarding: false,
            skip_lf: false,
            event: None,
            data: Vec::new(),
            last_event_id: None,
            retry: None,
        }
    }

    /// Feed raw bytes; returns the events they complete, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        loop {
            if self.skip_lf {
                match self.buffer.first() {
                    Some(b'\n') => {
                        self.buffer.remove(0);
                        self.skip_lf = false;
                    }
                    Some(_) => self.skip_lf = false,
                    None => break,
                }
            }

            let Some(end) = self.buffer.iter().position(|b| *b == b'\n' || *b == b'\r') else {
                if self.buffer.len() > self.max_line {
                    warn!(len = self.buffer.len(), "discarding oversized event-stream line");
                    self.buffer.clear();
                    self.event = None;
                    self.data.clear();
                    self.discarding = true;
                }
                break;
            };
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            self.skip_lf = line[end] == b'\r';
            if self.discarding {
                self.discarding = false;
                continue;
            }
            let line = String::from_utf8_lossy(&line[..end]);

            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }

        events
    }

    /// The most recent `id:` value, to resend as `Last-Event-ID`.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Reconnect delay requested by the server via `retry:`.
    pub fn retry(&self) -> Option<Duration> {
        self.retry
    }

    /// Forget any half-received block. Called when the connection drops;
    /// the last event id and retry hint survive.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.discarding = false;
        self.skip_lf = false;
        self.event = None;
        self.data.clear();
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" if !value.contains('\0') => {
                self.last_event_id = (!value.is_empty()).then(|| value.to_string());
            }
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.retry = Some(Duration::from_millis(ms));
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| DEFAULT_EVENT.to_string()),
            data,
            id: self.last_event_id.clone(),
        })
    }
}
