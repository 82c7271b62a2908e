//! Channel configuration and policy resolution
//!
//! Policies come from three layers: the request's own overrides, the batch
//! overrides, and the channel defaults. They are merged once per request into
//! an immutable [`RequestPolicy`] before the graph is built.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::request::{FailurePolicy, RequestDefinition, RequestPolicy, RequestSpec, ResponseFormat};

/// Errors raised while resolving policies
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// Failure policy name not recognised
    #[error("Unknown failure policy: {0}")]
    UnknownPolicy(String),

    /// Response format name not recognised
    #[error("Unknown response format: {0}")]
    UnknownFormat(String),
}

/// Optional policy values supplied per request or per batch.
/// String values are parsed when resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicyOverrides {
    /// `abort`, `proceed` or `abort-queue`
    pub on_fail: Option<String>,

    /// Status codes counted as success
    pub expected_status_codes: Option<Vec<u16>>,

    /// `json`, `text` or `binary`
    pub response_format: Option<String>,

    /// Response header names to keep
    pub response_headers: Option<Vec<String>>,
}

impl PolicyOverrides {
    /// Set the failure policy by name
    pub fn with_on_fail(mut self, on_fail: impl Into<String>) -> Self {
        self.on_fail = Some(on_fail.into());
        self
    }

    /// Set the expected status codes
    pub fn with_expected_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.expected_status_codes = Some(codes.into_iter().collect());
        self
    }

    /// Set the response format by name
    pub fn with_response_format(mut self, format: impl Into<String>) -> Self {
        self.response_format = Some(format.into());
        self
    }
}

/// Configuration for a [`crate::batch::Channel`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Policy used when neither the request nor the batch says otherwise
    pub defaults: RequestPolicy,

    /// Upper bound on in-flight HTTP calls. `None` means no bound.
    pub max_concurrency: Option<usize>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            defaults: RequestPolicy::default(),
            max_concurrency: None,
        }
    }
}

impl ChannelConfig {
    /// Create a configuration with application defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default failure policy
    pub fn with_on_fail(mut self, on_fail: FailurePolicy) -> Self {
        self.defaults.on_fail = on_fail;
        self
    }

    /// Set the default expected status codes
    pub fn with_expected_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.defaults.expected_status_codes = codes.into_iter().collect();
        self
    }

    /// Set the default response format
    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.defaults.response_format = format;
        self
    }

    /// Restrict the response headers kept in outcomes
    pub fn with_response_headers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.defaults.response_headers = Some(lowercase_set(names));
        self
    }

    /// Bound the number of concurrent HTTP calls
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit.max(1));
        self
    }

    /// Merge request overrides, batch overrides and defaults into one policy
    pub fn resolve_policy(
        &self,
        request: Option<&PolicyOverrides>,
        batch: Option<&PolicyOverrides>,
    ) -> Result<RequestPolicy, PolicyError> {
        let on_fail = match layered(request, batch, |o| o.on_fail.as_ref()) {
            Some(name) => name.parse()?,
            None => self.defaults.on_fail,
        };

        let expected_status_codes = match layered(request, batch, |o| o.expected_status_codes.as_ref()) {
            Some(codes) => codes.iter().copied().collect(),
            None => self.defaults.expected_status_codes.clone(),
        };

        let response_format = match layered(request, batch, |o| o.response_format.as_ref()) {
            Some(name) => name.parse()?,
            None => self.defaults.response_format,
        };

        let response_headers = match layered(request, batch, |o| o.response_headers.as_ref()) {
            Some(names) => Some(lowercase_set(names)),
            None => self.defaults.response_headers.clone(),
        };

        Ok(RequestPolicy {
            on_fail,
            expected_status_codes,
            response_format,
            response_headers,
        })
    }

    /// Resolve a submitted definition into a spec
    pub fn resolve(
        &self,
        definition: RequestDefinition,
        batch: Option<&PolicyOverrides>,
    ) -> Result<RequestSpec, PolicyError> {
        let policy = self.resolve_policy(definition.config.as_ref(), batch)?;
        Ok(definition.into_spec(policy))
    }
}

/// First value set by the request, then by the batch
fn layered<'a, T>(
    request: Option<&'a PolicyOverrides>,
    batch: Option<&'a PolicyOverrides>,
    get: impl Fn(&'a PolicyOverrides) -> Option<&'a T>,
) -> Option<&'a T> {
    request.and_then(&get).or_else(|| batch.and_then(&get))
}

fn lowercase_set<I, S>(names: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|n| n.as_ref().to_ascii_lowercase())
        .collect()
}
