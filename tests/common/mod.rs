//! Shared test helpers: a scripted in-memory transport

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use batchflow::engine::{PreparedRequest, RawResponse, Transport, TransportError};
use batchflow::request::RequestSpec;

/// Scripted reply for one request id
#[derive(Debug, Clone)]
pub enum Reply {
    Respond(RawResponse),
    Fail(TransportError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Start(String),
    End(String),
}

/// Transport answering from a script and recording what it saw
#[derive(Default)]
pub struct MockTransport {
    replies: HashMap<String, Reply>,
    delays: HashMap<String, Duration>,
    dispatched: Mutex<Vec<String>>,
    completed: Mutex<Vec<String>>,
    requests: Mutex<Vec<PreparedRequest>>,
    events: Mutex<Vec<Event>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `id` with `status` and a JSON body naming the request
    pub fn status(mut self, id: &str, status: u16) -> Self {
        let body = json!({ "id": id }).to_string();
        self.replies.insert(
            id.to_string(),
            Reply::Respond(RawResponse::new(status, body).with_header("Content-Type", "application/json")),
        );
        self
    }

    /// Answer `id` with a fully custom response
    pub fn respond(mut self, id: &str, response: RawResponse) -> Self {
        self.replies.insert(id.to_string(), Reply::Respond(response));
        self
    }

    /// Fail `id` at the transport level
    pub fn fail(mut self, id: &str, error: TransportError) -> Self {
        self.replies.insert(id.to_string(), Reply::Fail(error));
        self
    }

    /// Delay the reply for `id`
    pub fn delay(mut self, id: &str, millis: u64) -> Self {
        self.delays.insert(id.to_string(), Duration::from_millis(millis));
        self
    }

    /// Delay every listed id by the same amount
    pub fn delay_all(mut self, ids: &[&str], millis: u64) -> Self {
        for id in ids {
            self.delays.insert(id.to_string(), Duration::from_millis(millis));
        }
        self
    }

    /// Ids in the order their dispatch began
    pub fn dispatched(&self) -> Vec<String> {
        self.dispatched.lock().clone()
    }

    /// Ids in the order their replies were produced
    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().clone()
    }

    pub fn was_dispatched(&self, id: &str) -> bool {
        self.dispatched.lock().iter().any(|d| d == id)
    }

    /// Prepared requests as received
    pub fn requests(&self) -> Vec<PreparedRequest> {
        self.requests.lock().clone()
    }

    /// Highest number of concurrently outstanding calls seen
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Whether `first` had replied before `second` was dispatched
    pub fn finished_before_start(&self, first: &str, second: &str) -> bool {
        let events = self.events.lock();
        let done = events.iter().position(|e| *e == Event::End(first.to_string()));
        let start = events.iter().position(|e| *e == Event::Start(second.to_string()));
        matches!((done, start), (Some(d), Some(s)) if d < s)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn dispatch(&self, request: &PreparedRequest) -> Result<RawResponse, TransportError> {
        self.dispatched.lock().push(request.id.clone());
        self.events.lock().push(Event::Start(request.id.clone()));
        self.requests.lock().push(request.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delays.get(&request.id) {
            tokio::time::sleep(*delay).await;
        } else {
            tokio::task::yield_now().await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.lock().push(request.id.clone());
        self.events.lock().push(Event::End(request.id.clone()));

        match self.replies.get(&request.id) {
            Some(Reply::Respond(response)) => Ok(response.clone()),
            Some(Reply::Fail(error)) => Err(error.clone()),
            None => Ok(RawResponse::new(200, json!({ "id": request.id }).to_string())),
        }
    }
}

/// GET request with an explicit id
pub fn get(id: &str) -> RequestSpec {
    RequestSpec::new("GET", format!("/{}", id)).with_id(id)
}

/// Install a test subscriber honouring `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
