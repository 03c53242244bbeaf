//! Local mock vendor server for tests.
//!
//! Serves both the Replicate and Kling URL layouts from one axum router bound
//! to an ephemeral port. Status replies are consumed in order; the last one
//! repeats forever.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::{Value, json};

/// One scripted reply body.
#[derive(Clone)]
enum Body {
    Json(Value),
    Text(String),
}

impl Body {
    fn respond(self, code: StatusCode) -> Response {
        match self {
            Body::Json(value) => (code, axum::Json(value)).into_response(),
            Body::Text(text) => (code, text).into_response(),
        }
    }
}

/// Scripted behaviour of the mock server.
pub(crate) struct MockSpec {
    submit: (StatusCode, Value),
    statuses: Vec<(StatusCode, Body)>,
    files: HashMap<String, Vec<u8>>,
}

impl MockSpec {
    pub fn new() -> Self {
        Self {
            submit: (StatusCode::CREATED, json!({"id": "job-1", "status": "starting"})),
            statuses: Vec::new(),
            files: HashMap::new(),
        }
    }

    pub fn submit(mut self, status: StatusCode, body: Value) -> Self {
        self.submit = (status, body);
        self
    }

    /// Append one 200 status reply.
    pub fn status(self, body: Value) -> Self {
        self.status_with(StatusCode::OK, body)
    }

    pub fn status_with(mut self, status: StatusCode, body: Value) -> Self {
        self.statuses.push((status, Body::Json(body)));
        self
    }

    /// Append one plain-text status reply.
    pub fn status_text(mut self, status: StatusCode, text: &str) -> Self {
        self.statuses.push((status, Body::Text(text.to_string())));
        self
    }

    /// Append `n` identical 200 status replies.
    pub fn repeat_status(mut self, n: usize, body: Value) -> Self {
        for _ in 0..n {
            self.statuses.push((StatusCode::OK, Body::Json(body.clone())));
        }
        self
    }

    pub fn file(mut self, name: &str, bytes: &[u8]) -> Self {
        self.files.insert(name.to_string(), bytes.to_vec());
        self
    }
}

pub(crate) struct MockState {
    submit: (StatusCode, Value),
    statuses: Mutex<VecDeque<(StatusCode, Body)>>,
    files: HashMap<String, Vec<u8>>,
    submits: AtomicUsize,
    polls: AtomicUsize,
    downloads: AtomicUsize,
    auth_headers: Mutex<Vec<String>>,
}

impl MockState {
    fn record_auth(&self, headers: &HeaderMap) {
        let value = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        self.auth_headers.lock().unwrap().push(value);
    }
}

pub(crate) struct MockServer {
    pub base_url: String,
    state: Arc<MockState>,
}

impl MockServer {
    pub async fn start(spec: MockSpec) -> Self {
        let state = Arc::new(MockState {
            submit: spec.submit,
            statuses: Mutex::new(spec.statuses.into()),
            files: spec.files,
            submits: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
            auth_headers: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/v1/predictions", post(submit))
            .route("/v1/predictions/{id}", get(status))
            .route("/v1/videos/{task}", post(submit))
            .route("/v1/videos/{task}/{id}", get(status))
            .route("/files/{name}", get(file))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    pub fn file_url(&self, name: &str) -> String {
        format!("{}/files/{name}", self.base_url)
    }

    pub fn submits(&self) -> usize {
        self.state.submits.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> usize {
        self.state.polls.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> usize {
        self.state.downloads.load(Ordering::SeqCst)
    }

    /// `Authorization` headers of submit and status requests, in arrival order.
    pub fn auth_headers(&self) -> Vec<String> {
        self.state.auth_headers.lock().unwrap().clone()
    }
}

async fn submit(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    state.submits.fetch_add(1, Ordering::SeqCst);
    state.record_auth(&headers);
    let (code, body) = state.submit.clone();
    (code, axum::Json(body)).into_response()
}

async fn status(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    state.polls.fetch_add(1, Ordering::SeqCst);
    state.record_auth(&headers);
    let reply = {
        let mut queue = state.statuses.lock().unwrap();
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    };
    match reply {
        Some((code, body)) => body.respond(code),
        None => (StatusCode::NOT_FOUND, axum::Json(json!({"detail": "Not found."}))).into_response(),
    }
}

async fn file(State(state): State<Arc<MockState>>, Path(name): Path<String>) -> Response {
    state.downloads.fetch_add(1, Ordering::SeqCst);
    match state.files.get(&name) {
        Some(bytes) => (StatusCode::OK, bytes.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Replicate-style status body.
pub(crate) fn replicate_status(status: &str, output: Value) -> Value {
    json!({"id": "job-1", "status": status, "output": output, "error": null})
}

/// Kling-style status body.
pub(crate) fn kling_status(status: &str, data: Value) -> Value {
    let mut data = data;
    data["task_status"] = json!(status);
    json!({"code": 0, "message": "SUCCEED", "data": data})
}
