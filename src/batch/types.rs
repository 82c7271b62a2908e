//! Batch submissions, per-request outcomes and aggregated results

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::PolicyOverrides;
use crate::request::{HeaderList, RequestDefinition};

/// Decoded response body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ResponseBody {
    /// Parsed JSON document
    Json(Value),
    /// UTF-8 text
    Text(String),
    /// No body, or a body that could not be decoded
    Empty,
}

/// Recorded result of one settled request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Request id
    pub id: String,
    /// HTTP status code
    pub status: u16,
    /// Response headers that passed the allow-list
    pub headers: HeaderList,
    /// Decoded body
    pub body: ResponseBody,
}

/// Aggregated result of a batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    /// Requests whose status matched expectations
    pub ok: BTreeMap<String, Outcome>,
    /// Requests that answered with an unexpected status
    pub failed: BTreeMap<String, Outcome>,
    /// Requests that produced no usable response
    pub errors: BTreeMap<String, String>,
}

impl BatchResponse {
    /// Whether any request answered as expected
    pub fn has_ok_responses(&self) -> bool {
        !self.ok.is_empty()
    }

    /// Whether any request answered with an unexpected status
    pub fn has_failed_responses(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Whether any request produced no usable response
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Whether `id` ended up in any bucket
    pub fn contains(&self, id: &str) -> bool {
        self.ok.contains_key(id) || self.failed.contains_key(id) || self.errors.contains_key(id)
    }
}

/// A batch stopped by a request with the abort policy
#[derive(Debug, Clone, PartialEq)]
pub struct BatchAborted {
    /// Request that triggered the abort
    pub request_id: String,
    /// Why it counted as a failure
    pub reason: String,
    /// Outcomes recorded before the batch settled
    pub partial: BatchResponse,
}

impl std::fmt::Display for BatchAborted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "request {} failed: {}", self.request_id, self.reason)
    }
}

/// A batch submission as received from a caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchRequest {
    /// Requests in submission order
    pub requests: Vec<RequestDefinition>,
    /// Batch-level policy overrides
    pub config: Option<PolicyOverrides>,
}

impl BatchRequest {
    /// Create a batch from request definitions
    pub fn new(requests: Vec<RequestDefinition>) -> Self {
        Self {
            requests,
            config: None,
        }
    }

    /// Attach batch-level overrides
    pub fn with_config(mut self, config: PolicyOverrides) -> Self {
        self.config = Some(config);
        self
    }
}
