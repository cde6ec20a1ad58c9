//! Event decoder: named raw payloads in, typed messages out.
//!
//! Decoding never panics and never tears down a stream. Callers log the
//! returned [`DecodeError`] and move on to the next frame.

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;
use tw_api_types::{
    events, EventDesc, QueuedMessage, TaskChanged, TaskEvent, TaskOverview, TasksSynchronized,
};

/// A decoded event from the daemon-wide stream.
#[derive(Debug, Clone, PartialEq)]
pub enum DaemonMessage {
    TasksSynchronized(Vec<TaskOverview>),
    TaskChanged(TaskOverview),
}

/// A decoded event from a per-task stream.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskMessage {
    History(Vec<TaskEvent>),
    QueueSynchronized(Vec<QueuedMessage>),
    Event(TaskEvent),
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed {event} payload: {source}")]
    Json {
        event: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{event} payload must be a JSON array")]
    NotAnArray { event: String },
    #[error("unknown event {0:?}")]
    UnknownEvent(String),
}

impl DecodeError {
    fn json(event: &str, source: serde_json::Error) -> Self {
        DecodeError::Json {
            event: event.to_string(),
            source,
        }
    }
}

pub fn decode_daemon(name: &str, payload: &str) -> Result<DaemonMessage, DecodeError> {
    match name {
        events::TASKS_SYNCHRONIZED => {
            let TasksSynchronized { tasks } =
                serde_json::from_str(payload).map_err(|e| DecodeError::json(name, e))?;
            Ok(DaemonMessage::TasksSynchronized(tasks))
        }
        events::TASK_CHANGED => {
            let TaskChanged { task } =
                serde_json::from_str(payload).map_err(|e| DecodeError::json(name, e))?;
            Ok(DaemonMessage::TaskChanged(task))
        }
        other => Err(DecodeError::UnknownEvent(other.to_string())),
    }
}

pub fn decode_task(name: &str, payload: &str) -> Result<TaskMessage, DecodeError> {
    match name {
        events::TASK_EVENT => {
            let value: Value =
                serde_json::from_str(payload).map_err(|e| DecodeError::json(name, e))?;
            let event = decode_task_event(value).map_err(|e| DecodeError::json(name, e))?;
            Ok(TaskMessage::Event(event))
        }
        events::HISTORY => {
            let items = parse_array(name, payload)?;
            Ok(TaskMessage::History(decode_each(name, items, decode_task_event)))
        }
        events::QUEUE_SYNCHRONIZED => {
            let items = parse_array(name, payload)?;
            Ok(TaskMessage::QueueSynchronized(decode_each(
                name,
                items,
                serde_json::from_value,
            )))
        }
        other => Err(DecodeError::UnknownEvent(other.to_string())),
    }
}

/// Decode one task event.
///
/// The variant normally sits under `desc` (`{"id": 1, "desc": {"msg": ...}}`),
/// but older daemons flatten it next to the id (`{"id": 1, "msg": ...}`).
/// Both forms produce the same [`TaskEvent`].
pub fn decode_task_event(value: Value) -> Result<TaskEvent, serde_json::Error> {
    #[derive(Deserialize)]
    struct Envelope {
        id: u64,
        #[serde(default)]
        desc: Option<Value>,
        #[serde(flatten)]
        rest: serde_json::Map<String, Value>,
    }

    let envelope: Envelope = serde_json::from_value(value)?;
    let desc_value = envelope.desc.unwrap_or(Value::Object(envelope.rest));
    let desc: EventDesc = serde_json::from_value(desc_value)?;
    Ok(TaskEvent::new(envelope.id, desc))
}

fn parse_array(name: &str, payload: &str) -> Result<Vec<Value>, DecodeError> {
    match serde_json::from_str::<Value>(payload).map_err(|e| DecodeError::json(name, e))? {
        Value::Array(items) => Ok(items),
        _ => Err(DecodeError::NotAnArray {
            event: name.to_string(),
        }),
    }
}

/// Decode array elements one by one; a bad element is skipped, not fatal.
fn decode_each<T>(
    name: &str,
    items: Vec<Value>,
    decode: impl Fn(Value) -> Result<T, serde_json::Error>,
) -> Vec<T> {
    let total = items.len();
    let decoded: Vec<T> = items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match decode(item) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(event = name, index, %error, "skipping malformed snapshot entry");
                None
            }
        })
        .collect();
    if decoded.len() != total {
        warn!(
            event = name,
            kept = decoded.len(),
            total,
            "snapshot decoded with dropped entries"
        );
    }
    decoded
}
