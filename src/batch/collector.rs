//! Thread-safe accumulation of per-request outcomes

use std::collections::BTreeMap;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::batch::types::{BatchResponse, Outcome};

/// Collects ok, failed and errored outcomes from concurrently running requests.
///
/// An id lands in at most one of the ok/failed buckets. The error map is
/// independent: a failed response whose body could not be decoded shows up in
/// both `failed` and `errors`.
#[derive(Debug, Default)]
pub struct ResponseCollector {
    inner: Mutex<BatchResponse>,
}

impl ResponseCollector {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a response whose status matched expectations
    pub fn record_ok(&self, id: impl Into<String>, outcome: Outcome) {
        let id = id.into();
        debug!(request_id = %id, status = outcome.status, "Recording ok response");
        let mut inner = self.inner.lock();
        inner.failed.remove(&id);
        inner.ok.insert(id, outcome);
    }

    /// Record a response with an unexpected status
    pub fn record_failed(&self, id: impl Into<String>, outcome: Outcome) {
        let id = id.into();
        warn!(request_id = %id, status = outcome.status, "Recording failed response");
        let mut inner = self.inner.lock();
        inner.ok.remove(&id);
        inner.failed.insert(id, outcome);
    }

    /// Record an error message for a request without a usable response
    pub fn record_error(&self, id: impl Into<String>, message: impl Into<String>) {
        let id = id.into();
        let message = message.into();
        warn!(request_id = %id, error = %message, "Recording request error");
        self.inner.lock().errors.insert(id, message);
    }

    /// Drop everything recorded so far
    pub fn clear(&self) {
        *self.inner.lock() = BatchResponse::default();
    }

    /// Whether any request produced no usable response
    pub fn has_errors(&self) -> bool {
        !self.inner.lock().errors.is_empty()
    }

    /// Whether any request answered with an unexpected status
    pub fn has_failed_responses(&self) -> bool {
        !self.inner.lock().failed.is_empty()
    }

    /// Whether any request answered as expected
    pub fn has_ok_responses(&self) -> bool {
        !self.inner.lock().ok.is_empty()
    }

    /// Copy of the ok bucket
    pub fn ok(&self) -> BTreeMap<String, Outcome> {
        self.inner.lock().ok.clone()
    }

    /// Copy of the failed bucket
    pub fn failed(&self) -> BTreeMap<String, Outcome> {
        self.inner.lock().failed.clone()
    }

    /// Copy of the error messages
    pub fn errors(&self) -> BTreeMap<String, String> {
        self.inner.lock().errors.clone()
    }

    /// Consistent copy of all three buckets
    pub fn snapshot(&self) -> BatchResponse {
        self.inner.lock().clone()
    }
}
