//! # batchflow
//!
//! Dependency-aware concurrent execution of batched HTTP requests.
//!
//! ## Overview
//!
//! A batch is a list of HTTP requests where some requests declare that they
//! depend on others. The requests are arranged into a dependency graph and
//! executed with as much concurrency as the graph allows: a request is only
//! dispatched once every request it depends on has settled.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use batchflow::batch::Channel;
//! use batchflow::config::ChannelConfig;
//! use batchflow::engine::TransportConfig;
//! use batchflow::request::{FailurePolicy, RequestSpec};
//!
//! # async fn example() -> batchflow::Result<()> {
//! let channel = Channel::with_reqwest(
//!     TransportConfig::default().with_base_url("https://api.example.com"),
//!     ChannelConfig::default(),
//! )?;
//!
//! let response = channel
//!     .send_specs(vec![
//!         RequestSpec::new("POST", "/users").with_id("create"),
//!         RequestSpec::new("GET", "/users")
//!             .with_id("list")
//!             .depends_on("create")
//!             .on_fail(FailurePolicy::Proceed),
//!     ])
//!     .await?;
//!
//! assert!(!response.has_errors());
//! # Ok(())
//! # }
//! ```
//!
//! ## Failure policies
//!
//! - **abort**: nothing new is dispatched and the batch fails with
//!   [`BatchFlowError::Aborted`]
//! - **abort-queue**: the failed request's dependents are never dispatched
//! - **proceed**: dependents run as if the request had succeeded
//!
//! ## Modules
//!
//! - [`request`]: request specs and policies
//! - [`config`]: channel configuration and policy resolution
//! - [`graph`]: the dependency graph and its builder
//! - [`engine`]: transport, codec and scheduler
//! - [`batch`]: outcome collection and the channel entry point

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

/// Result type for batchflow operations
pub type Result<T> = std::result::Result<T, BatchFlowError>;

/// Main error type for batchflow operations
#[derive(Error, Debug)]
pub enum BatchFlowError {
    /// Invalid dependency graph; nothing was dispatched
    #[error("Graph error: {0}")]
    Graph(#[from] graph::GraphError),

    /// Invalid policy configuration; nothing was dispatched
    #[error("Policy error: {0}")]
    Policy(#[from] config::PolicyError),

    /// A request with the abort policy failed
    #[error("Batch aborted: {0}")]
    Aborted(Box<batch::BatchAborted>),

    /// Transport could not be set up
    #[error("Transport error: {0}")]
    Transport(#[from] engine::TransportError),
}

impl BatchFlowError {
    /// The abort details, if this is an abort
    pub fn as_aborted(&self) -> Option<&batch::BatchAborted> {
        match self {
            BatchFlowError::Aborted(aborted) => Some(aborted),
            _ => None,
        }
    }
}

/// Request specifications and policies
pub mod request;

/// Channel configuration
pub mod config;

/// Request dependency graph
pub mod graph;

/// Execution engine
pub mod engine;

/// Batch entry point and outcome collection
pub mod batch;

/// Install a `fmt` subscriber filtered by `RUST_LOG`.
///
/// Does nothing if a global subscriber is already set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
