//! A fake daemon: the REST endpoints plus server-push streams the test
//! drives by hand.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use serde_json::{json, Value};

#[derive(Clone, Default)]
pub struct FakeDaemon {
    streams: Arc<Mutex<HashMap<String, Vec<flume::Sender<String>>>>>,
    connects: Arc<Mutex<Vec<(String, Option<String>)>>>,
    connect_times: Arc<Mutex<Vec<Instant>>>,
    rejected: Arc<Mutex<HashSet<String>>>,
    scripted: Arc<Mutex<HashMap<String, VecDeque<(StatusCode, String)>>>>,
    tasks: Arc<Mutex<HashMap<String, Value>>>,
    requests: Arc<Mutex<Vec<(String, Value)>>>,
    cancel_fails: Arc<Mutex<bool>>,
    queue_messages: Arc<Mutex<bool>>,
}

impl FakeDaemon {
    pub async fn start() -> (String, FakeDaemon) {
        let daemon = FakeDaemon::default();
        let router = Router::new()
            .route("/v1/events", get(open_stream))
            .route("/v1/task", post(create_task))
            .route("/v1/task/{id}", get(get_task))
            .route("/v1/task/{id}/events", get(open_stream))
            .route("/v1/task/{id}/message", post(post_message))
            .route("/v1/task/{id}/cancel", post(cancel))
            .with_state(daemon.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to ephemeral port");
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        (format!("http://{addr}"), daemon)
    }

    pub fn add_task(&self, id: &str, name: &str, status: &str) {
        self.tasks.lock().unwrap().insert(
            id.to_string(),
            json!({"id": id, "name": name, "status": status, "created": 1, "cwd": "/work"}),
        );
    }

    pub fn reject(&self, path: &str) {
        self.rejected.lock().unwrap().insert(path.to_string());
    }

    /// Answer stream requests on `path` with canned `(status, body)` pairs,
    /// one per connection. The last pair repeats once the rest are used.
    pub fn script(&self, path: &str, responses: &[(u16, &str)]) {
        let responses = responses
            .iter()
            .map(|(status, body)| {
                let status = StatusCode::from_u16(*status).expect("valid status");
                (status, body.to_string())
            })
            .collect();
        self.scripted
            .lock()
            .unwrap()
            .insert(path.to_string(), responses);
    }

    pub fn fail_cancel(&self) {
        *self.cancel_fails.lock().unwrap() = true;
    }

    pub fn queue_messages(&self) {
        *self.queue_messages.lock().unwrap() = true;
    }

    /// Write one raw block to every open stream on `path`.
    pub fn push_raw(&self, path: &str, block: &str) -> usize {
        let mut streams = self.streams.lock().unwrap();
        let Some(senders) = streams.get_mut(path) else {
            return 0;
        };
        senders.retain(|tx| tx.send(block.to_string()).is_ok());
        senders.len()
    }

    pub fn push(&self, path: &str, event: &str, data: &Value) -> usize {
        self.push_raw(path, &format!("event: {event}\ndata: {data}\n\n"))
    }

    /// End every open response on `path`.
    pub fn disconnect(&self, path: &str) {
        self.streams.lock().unwrap().remove(path);
    }

    pub fn open_streams(&self, path: &str) -> usize {
        self.streams
            .lock()
            .unwrap()
            .get(path)
            .map_or(0, |senders| senders.iter().filter(|tx| !tx.is_disconnected()).count())
    }

    /// `(path, Last-Event-ID)` for every stream request received.
    pub fn connects(&self) -> Vec<(String, Option<String>)> {
        self.connects.lock().unwrap().clone()
    }

    /// When each stream request arrived, in order.
    pub fn connect_times(&self) -> Vec<Instant> {
        self.connect_times.lock().unwrap().clone()
    }

    pub fn requests(&self) -> Vec<(String, Value)> {
        self.requests.lock().unwrap().clone()
    }

    pub async fn wait_for_stream(&self, path: &str) {
        wait_until(|| self.open_streams(path) > 0).await;
    }
}

/// Poll `condition` every 10ms for up to five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 5s");
}

async fn open_stream(State(daemon): State<FakeDaemon>, uri: Uri, headers: HeaderMap) -> Response {
    let path = uri.path().to_string();
    let last_event_id = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    daemon
        .connects
        .lock()
        .unwrap()
        .push((path.clone(), last_event_id));
    daemon.connect_times.lock().unwrap().push(Instant::now());

    if daemon.rejected.lock().unwrap().contains(&path) {
        return StatusCode::NOT_FOUND.into_response();
    }

    let canned = daemon.scripted.lock().unwrap().get_mut(&path).and_then(|queue| {
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    });
    if let Some((status, body)) = canned {
        return Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .body(Body::from(body))
            .unwrap();
    }

    let (tx, rx) = flume::unbounded::<String>();
    daemon
        .streams
        .lock()
        .unwrap()
        .entry(path)
        .or_default()
        .push(tx);

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(rx.into_stream().map(Ok::<_, Infallible>)))
        .unwrap()
}

async fn get_task(State(daemon): State<FakeDaemon>, Path(id): Path<String>) -> Response {
    match daemon.tasks.lock().unwrap().get(&id) {
        Some(task) => Json(json!({ "task": task })).into_response(),
        None => (StatusCode::NOT_FOUND, "no such task").into_response(),
    }
}

async fn create_task(State(daemon): State<FakeDaemon>, Json(body): Json<Value>) -> Response {
    daemon
        .requests
        .lock()
        .unwrap()
        .push(("/v1/task".into(), body.clone()));
    let name = body["name"].as_str().unwrap_or_default().to_string();
    daemon.add_task("t-new", &name, "generating");
    let task = daemon.tasks.lock().unwrap()["t-new"].clone();
    Json(json!({ "task": task })).into_response()
}

async fn post_message(
    State(daemon): State<FakeDaemon>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    daemon
        .requests
        .lock()
        .unwrap()
        .push((format!("/v1/task/{id}/message"), body));
    let queued = *daemon.queue_messages.lock().unwrap();
    Json(json!({"id": "msg-1", "queued": queued})).into_response()
}

async fn cancel(State(daemon): State<FakeDaemon>, Path(id): Path<String>) -> Response {
    daemon
        .requests
        .lock()
        .unwrap()
        .push((format!("/v1/task/{id}/cancel"), Value::Null));
    if *daemon.cancel_fails.lock().unwrap() {
        (StatusCode::INTERNAL_SERVER_ERROR, "cancel exploded").into_response()
    } else {
        StatusCode::OK.into_response()
    }
}
