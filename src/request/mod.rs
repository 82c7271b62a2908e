//! Request specifications and their resolved policies
//!
//! A [`RequestSpec`] is the immutable description of one HTTP call inside a
//! batch. Everything the scheduler needs to decide what to do after the call
//! settles lives in its [`RequestPolicy`], resolved once before execution.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::PolicyError;

/// Ordered header list. Duplicate names are allowed and kept in order.
pub type HeaderList = Vec<(String, String)>;

/// Ordered query parameter list
pub type QueryList = Vec<(String, String)>;

/// What to do when a request does not produce an expected response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Stop the whole batch; nothing new is dispatched
    Abort,
    /// Record the failure and keep going with dependents
    Proceed,
    /// Stop only the branch hanging off this request
    AbortQueue,
}

impl FailurePolicy {
    /// Canonical configuration name
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::Abort => "abort",
            FailurePolicy::Proceed => "proceed",
            FailurePolicy::AbortQueue => "abort-queue",
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailurePolicy {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(FailurePolicy::Abort),
            "proceed" => Ok(FailurePolicy::Proceed),
            "abort-queue" | "abort_queue" => Ok(FailurePolicy::AbortQueue),
            _ => Err(PolicyError::UnknownPolicy(s.to_string())),
        }
    }
}

/// How a response body is decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    /// Parse as JSON
    Json,
    /// Keep as UTF-8 text
    Text,
    /// Raw bytes. Selectable, but the codec rejects it.
    Binary,
}

impl fmt::Display for ResponseFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResponseFormat::Json => "json",
            ResponseFormat::Text => "text",
            ResponseFormat::Binary => "binary",
        };
        f.write_str(name)
    }
}

impl FromStr for ResponseFormat {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ResponseFormat::Json),
            "text" => Ok(ResponseFormat::Text),
            "binary" => Ok(ResponseFormat::Binary),
            _ => Err(PolicyError::UnknownFormat(s.to_string())),
        }
    }
}

/// Fully resolved per-request policy. The scheduler never looks further than this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestPolicy {
    /// Failure handling mode
    pub on_fail: FailurePolicy,

    /// Status codes that count as success
    pub expected_status_codes: BTreeSet<u16>,

    /// Response body decoding
    pub response_format: ResponseFormat,

    /// Lowercased response header names to keep. `None` keeps everything.
    pub response_headers: Option<BTreeSet<String>>,
}

impl RequestPolicy {
    /// Whether `status` is one of the expected codes
    pub fn expects(&self, status: u16) -> bool {
        self.expected_status_codes.contains(&status)
    }

    /// Whether a response header survives the allow-list
    pub fn keeps_header(&self, name: &str) -> bool {
        match &self.response_headers {
            Some(allowed) => allowed.contains(&name.to_ascii_lowercase()),
            None => true,
        }
    }
}

impl Default for RequestPolicy {
    fn default() -> Self {
        Self {
            on_fail: FailurePolicy::Abort,
            expected_status_codes: BTreeSet::from([200]),
            response_format: ResponseFormat::Json,
            response_headers: None,
        }
    }
}

/// Immutable description of one request in a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSpec {
    /// Unique id within the batch
    pub id: String,

    /// Uppercase HTTP method
    pub method: String,

    /// Target URI
    pub uri: Option<String>,

    /// Request headers in submission order
    pub headers: HeaderList,

    /// Query parameters in submission order
    pub query: QueryList,

    /// Opaque body, encoded by the codec at dispatch time
    pub body: Option<Value>,

    /// Ids of the requests that must finish first
    pub depends_on: Vec<String>,

    /// Resolved failure/decoding policy
    pub policy: RequestPolicy,
}

impl RequestSpec {
    /// Start a spec for `method` and `uri` with a derived id and default policy
    pub fn new(method: impl AsRef<str>, uri: impl Into<String>) -> Self {
        let uri = uri.into();
        let method = method.as_ref().to_ascii_uppercase();
        Self {
            id: derive_id(&method, Some(&uri)),
            method,
            uri: Some(uri),
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
            depends_on: Vec::new(),
            policy: RequestPolicy::default(),
        }
    }

    /// Override the id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Append a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Append a query parameter
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Set the body
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Declare a dependency. Repeated ids are ignored.
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        if !self.depends_on.contains(&id) {
            self.depends_on.push(id);
        }
        self
    }

    /// Replace the whole policy
    pub fn with_policy(mut self, policy: RequestPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the failure policy
    pub fn on_fail(mut self, on_fail: FailurePolicy) -> Self {
        self.policy.on_fail = on_fail;
        self
    }

    /// Set the expected status codes
    pub fn expect_status(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.policy.expected_status_codes = codes.into_iter().collect();
        self
    }

    /// Set the response format
    pub fn response_format(mut self, format: ResponseFormat) -> Self {
        self.policy.response_format = format;
        self
    }
}

/// Request as submitted by a caller, before ids and policies are resolved
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestDefinition {
    /// Explicit id; derived from method and uri when absent
    pub id: Option<String>,
    /// HTTP method in any case; inferred from the body when absent
    pub method: Option<String>,
    /// Target URI
    pub uri: Option<String>,
    /// Request headers
    pub headers: HeaderList,
    /// Query parameters
    pub query: QueryList,
    /// Request body
    pub body: Option<Value>,
    /// Ids of the requests that must finish first
    pub depends_on: Vec<String>,
    /// Per-request policy overrides
    pub config: Option<crate::config::PolicyOverrides>,
}

impl RequestDefinition {
    /// Effective method: explicit one uppercased, else POST with a body, else GET
    pub fn effective_method(&self) -> String {
        match &self.method {
            Some(method) if !method.trim().is_empty() => method.trim().to_ascii_uppercase(),
            _ if has_body(&self.body) => "POST".to_string(),
            _ => "GET".to_string(),
        }
    }

    /// Effective id: explicit one, else derived from method and uri
    pub fn effective_id(&self) -> String {
        match &self.id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => derive_id(&self.effective_method(), self.uri.as_deref()),
        }
    }

    /// Turn the definition into a spec with an already resolved policy
    pub fn into_spec(self, policy: RequestPolicy) -> RequestSpec {
        let id = self.effective_id();
        let method = self.effective_method();
        let mut depends_on: Vec<String> = Vec::with_capacity(self.depends_on.len());
        for dep in self.depends_on {
            if !depends_on.contains(&dep) {
                depends_on.push(dep);
            }
        }

        RequestSpec {
            id,
            method,
            uri: self.uri,
            headers: self.headers,
            query: self.query,
            body: self.body,
            depends_on,
            policy,
        }
    }
}

fn has_body(body: &Option<Value>) -> bool {
    !matches!(body, None | Some(Value::Null))
}

/// Derive a request id from an uppercase method and optional uri
pub fn derive_id(method: &str, uri: Option<&str>) -> String {
    match uri {
        Some(uri) if !uri.is_empty() => format!("{}_{}", method, uri),
        _ => method.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_derived_id_uses_method_and_uri() {
        let def = RequestDefinition {
            method: Some("delete".to_string()),
            uri: Some("/users/1".to_string()),
            ..Default::default()
        };
        assert_eq!(def.effective_id(), "DELETE_/users/1");
    }

    #[test]
    fn test_method_inferred_from_body() {
        let with_body = RequestDefinition {
            uri: Some("/items".to_string()),
            body: Some(json!({"name": "x"})),
            ..Default::default()
        };
        assert_eq!(with_body.effective_method(), "POST");
        assert_eq!(with_body.effective_id(), "POST_/items");

        let without_body = RequestDefinition {
            uri: Some("/items".to_string()),
            ..Default::default()
        };
        assert_eq!(without_body.effective_method(), "GET");

        let bare = RequestDefinition::default();
        assert_eq!(bare.effective_id(), "GET");
    }

    #[test]
    fn test_explicit_id_wins() {
        let def = RequestDefinition {
            id: Some("create".to_string()),
            method: Some("post".to_string()),
            uri: Some("/items".to_string()),
            ..Default::default()
        };
        assert_eq!(def.effective_id(), "create");
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("abort".parse::<FailurePolicy>().unwrap(), FailurePolicy::Abort);
        assert_eq!("Proceed".parse::<FailurePolicy>().unwrap(), FailurePolicy::Proceed);
        assert_eq!("abort-queue".parse::<FailurePolicy>().unwrap(), FailurePolicy::AbortQueue);
        assert!(matches!(
            "retry".parse::<FailurePolicy>(),
            Err(PolicyError::UnknownPolicy(p)) if p == "retry"
        ));
        assert!("xml".parse::<ResponseFormat>().is_err());
    }

    #[test]
    fn test_depends_on_deduplicates() {
        let spec = RequestSpec::new("get", "/a").depends_on("x").depends_on("x");
        assert_eq!(spec.depends_on, vec!["x".to_string()]);
        assert_eq!(spec.method, "GET");
        assert_eq!(spec.id, "GET_/a");
    }

    #[test]
    fn test_header_allow_list_is_case_insensitive() {
        let policy = RequestPolicy {
            response_headers: Some(BTreeSet::from(["content-type".to_string()])),
            ..Default::default()
        };
        assert!(policy.keeps_header("Content-Type"));
        assert!(!policy.keeps_header("Set-Cookie"));
    }
}
