//! Concurrent, dependency-ordered execution of a request graph
//!
//! The walk starts at the graph roots. Each dispatched node, once settled,
//! looks at its successors and dispatches the ones whose predecessors have all
//! finished: a single candidate continues on the current task, several are
//! spawned as tokio tasks and awaited together. A node's subtree is therefore
//! fully settled when its dispatch future resolves.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::{Mutex, RwLock};
use petgraph::graph::NodeIndex;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn, Instrument};

use crate::batch::collector::ResponseCollector;
use crate::batch::types::{BatchAborted, Outcome, ResponseBody};
use crate::engine::codec;
use crate::engine::transport::{RawResponse, Transport, TransportError};
use crate::graph::RequestGraph;
use crate::request::{FailurePolicy, RequestSpec};
use crate::{BatchFlowError, Result};

/// Why a batch was aborted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortReason {
    /// Request whose failure triggered the abort
    pub request_id: String,
    /// Failure description
    pub reason: String,
}

/// Batch-wide cancellation gate.
///
/// Starting a node holds the read side while checking for an abort, raising
/// takes the write side, so no node can start once an abort is recorded.
#[derive(Debug, Default)]
pub struct AbortSignal {
    gate: RwLock<Option<AbortReason>>,
}

impl AbortSignal {
    /// Create an unraised signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an abort. Only the first one is kept; returns whether this call won.
    pub fn raise(&self, request_id: impl Into<String>, reason: impl Into<String>) -> bool {
        let mut gate = self.gate.write();
        if gate.is_some() {
            return false;
        }
        *gate = Some(AbortReason {
            request_id: request_id.into(),
            reason: reason.into(),
        });
        true
    }

    /// Whether an abort has been recorded
    pub fn is_raised(&self) -> bool {
        self.gate.read().is_some()
    }

    /// The recorded abort, if any
    pub fn reason(&self) -> Option<AbortReason> {
        self.gate.read().clone()
    }

    /// Run `start` unless an abort has been raised
    pub fn try_start(&self, start: impl FnOnce() -> bool) -> bool {
        let gate = self.gate.read();
        if gate.is_some() {
            return false;
        }
        start()
    }
}

/// How a single request settled
#[derive(Debug, Clone, PartialEq, Eq)]
enum Settlement {
    Ok,
    NotOk(String),
}

/// Executes request graphs against a [`Transport`]
#[derive(Clone)]
pub struct Scheduler {
    transport: Arc<dyn Transport>,
    max_concurrency: Option<usize>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("transport", &"dyn Transport")
            .field("max_concurrency", &self.max_concurrency)
            .finish()
    }
}

impl Scheduler {
    /// Create a scheduler with no concurrency bound
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            max_concurrency: None,
        }
    }

    /// Bound the number of in-flight HTTP calls per run
    pub fn with_max_concurrency(mut self, limit: Option<usize>) -> Self {
        self.max_concurrency = limit.map(|l| l.max(1));
        self
    }

    /// Walk `graph`, recording every settled request into `collector`.
    ///
    /// Returns [`BatchFlowError::Aborted`] once everything in flight has
    /// settled if a request with the abort policy failed.
    #[instrument(skip_all, fields(requests = graph.len(), edges = graph.edge_count()))]
    pub async fn run(
        &self,
        graph: Arc<RequestGraph>,
        collector: Arc<ResponseCollector>,
    ) -> Result<()> {
        let roots: Vec<NodeIndex> = graph.roots().collect();
        if roots.is_empty() {
            debug!("Empty request graph, nothing to dispatch");
            return Ok(());
        }

        let started = Instant::now();
        info!(roots = roots.len(), "Starting graph execution");

        let walk = Arc::new(Walk {
            graph,
            transport: self.transport.clone(),
            collector: collector.clone(),
            abort: AbortSignal::new(),
            halted: Mutex::new(HashSet::new()),
            limiter: self.max_concurrency.map(|n| Arc::new(Semaphore::new(n))),
        });
        walk.dispatch_all(roots).await;

        info!(
            duration_ms = started.elapsed().as_millis() as u64,
            aborted = walk.abort.is_raised(),
            "Graph execution finished"
        );

        match walk.abort.reason() {
            Some(abort) => Err(aborted(abort, &collector)),
            None => Ok(()),
        }
    }

    /// Send a lone request without building a graph.
    ///
    /// Recording and policy handling match what [`Scheduler::run`] does for a
    /// one-node graph.
    #[instrument(skip_all, fields(request_id = %spec.id))]
    pub async fn run_single(&self, spec: &RequestSpec, collector: Arc<ResponseCollector>) -> Result<()> {
        let limiter = self.max_concurrency.map(|n| Arc::new(Semaphore::new(n)));
        let settlement = settle(
            spec,
            self.transport.as_ref(),
            collector.as_ref(),
            limiter.as_deref(),
        )
        .await;

        match settlement {
            Settlement::NotOk(reason) if spec.policy.on_fail == FailurePolicy::Abort => {
                error!(request_id = %spec.id, reason = %reason, "Request failed, aborting batch");
                let abort = AbortReason {
                    request_id: spec.id.clone(),
                    reason,
                };
                Err(aborted(abort, &collector))
            }
            _ => Ok(()),
        }
    }
}

fn aborted(abort: AbortReason, collector: &ResponseCollector) -> BatchFlowError {
    BatchFlowError::Aborted(Box::new(BatchAborted {
        request_id: abort.request_id,
        reason: abort.reason,
        partial: collector.snapshot(),
    }))
}

/// Shared state of one graph run
struct Walk {
    graph: Arc<RequestGraph>,
    transport: Arc<dyn Transport>,
    collector: Arc<ResponseCollector>,
    abort: AbortSignal,
    /// Nodes that failed under abort-queue; their dependents never start
    halted: Mutex<HashSet<NodeIndex>>,
    limiter: Option<Arc<Semaphore>>,
}

impl Walk {
    /// Dispatch `idx` and everything that becomes ready beneath it.
    ///
    /// A lone ready successor is handled by the same loop, so a linear chain
    /// runs in constant stack depth. Only a fan-out spawns tasks.
    fn visit(self: Arc<Self>, idx: NodeIndex) -> BoxFuture<'static, ()> {
        async move {
            let mut next = Some(idx);
            while let Some(idx) = next.take() {
                let mut candidates = self.step(idx).await;
                if candidates.len() == 1 {
                    next = candidates.pop();
                } else {
                    self.spawn_all(candidates).await;
                }
            }
        }
        .boxed()
    }

    /// Claim, send and settle one node. Returns the successors it made ready.
    async fn step(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let node = self.graph.node(idx);
        let spec = node.spec();

        if !self.abort.try_start(|| node.mark_started()) {
            debug!(request_id = %spec.id, state = %node.state(), "Skipping dispatch");
            return Vec::new();
        }
        debug!(request_id = %spec.id, "Request started");

        let settlement = settle(
            spec,
            self.transport.as_ref(),
            self.collector.as_ref(),
            self.limiter.as_deref(),
        )
        .await;

        if let Settlement::NotOk(reason) = settlement {
            match spec.policy.on_fail {
                FailurePolicy::Proceed => {
                    debug!(request_id = %spec.id, "Request failed, proceeding");
                }
                FailurePolicy::Abort => {
                    error!(request_id = %spec.id, reason = %reason, "Request failed, aborting batch");
                    self.abort.raise(spec.id.clone(), reason);
                    node.mark_finished();
                    return Vec::new();
                }
                FailurePolicy::AbortQueue => {
                    warn!(request_id = %spec.id, reason = %reason, "Request failed, halting its branch");
                    self.halted.lock().insert(idx);
                    node.mark_finished();
                    return Vec::new();
                }
            }
        }

        node.mark_finished();
        debug!(request_id = %spec.id, "Request finished");

        self.ready_successors(idx)
    }

    /// Successors of `idx` whose predecessors have all finished without
    /// halting their branch
    fn ready_successors(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let halted = self.halted.lock();
        self.graph
            .successors(idx)
            .filter(|&succ| self.graph.is_ready(succ))
            .filter(|&succ| !self.graph.predecessors(succ).any(|p| halted.contains(&p)))
            .collect()
    }

    /// Dispatch a frontier: one node inline, several as concurrent tasks
    async fn dispatch_all(self: &Arc<Self>, mut candidates: Vec<NodeIndex>) {
        if candidates.len() == 1 {
            if let Some(idx) = candidates.pop() {
                self.clone().visit(idx).await;
            }
        } else {
            self.spawn_all(candidates).await;
        }
    }

    /// Run each candidate's subtree on its own task and wait for all of them
    async fn spawn_all(self: &Arc<Self>, candidates: Vec<NodeIndex>) {
        if candidates.is_empty() {
            return;
        }

        let handles: Vec<_> = candidates
            .into_iter()
            .map(|idx| {
                let task = tokio::spawn(self.clone().visit(idx).in_current_span());
                (idx, task)
            })
            .collect();

        for (idx, handle) in handles {
            if let Err(e) = handle.await {
                let id = self.graph.node(idx).id();
                error!(request_id = %id, error = %e, "Dispatch task failed");
                self.collector
                    .record_error(id, format!("Dispatch task failed: {}", e));
            }
        }
    }
}

/// Encode, send and record one request
async fn settle(
    spec: &RequestSpec,
    transport: &dyn Transport,
    collector: &ResponseCollector,
    limiter: Option<&Semaphore>,
) -> Settlement {
    let request = match codec::prepare(spec) {
        Ok(request) => request,
        Err(e) => {
            let message = format!("Could not encode request: {}", e);
            collector.record_error(spec.id.as_str(), message.clone());
            return Settlement::NotOk(message);
        }
    };

    let _permit = match limiter {
        Some(semaphore) => semaphore.acquire().await.ok(),
        None => None,
    };

    let started = Instant::now();
    let result = transport.dispatch(&request).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(response) => {
            debug!(request_id = %spec.id, status = response.status, duration_ms, "Response received");
            if spec.policy.expects(response.status) {
                record_expected(spec, response, collector)
            } else {
                record_unexpected(spec, response, collector)
            }
        }
        Err(TransportError::Response(response)) => {
            debug!(request_id = %spec.id, status = response.status, duration_ms, "Error response received");
            record_unexpected(spec, response, collector)
        }
        Err(e) => {
            error!(request_id = %spec.id, error = %e, duration_ms, "Transport error");
            let message = e.to_string();
            collector.record_error(spec.id.as_str(), message.clone());
            Settlement::NotOk(message)
        }
    }
}

fn filtered_headers(spec: &RequestSpec, response: &RawResponse) -> Vec<(String, String)> {
    response
        .headers
        .iter()
        .filter(|(name, _)| spec.policy.keeps_header(name))
        .cloned()
        .collect()
}

fn record_expected(spec: &RequestSpec, response: RawResponse, collector: &ResponseCollector) -> Settlement {
    match codec::decode_body(spec.policy.response_format, &response.body) {
        Ok(body) => {
            let outcome = Outcome {
                id: spec.id.clone(),
                status: response.status,
                headers: filtered_headers(spec, &response),
                body,
            };
            collector.record_ok(spec.id.as_str(), outcome);
            Settlement::Ok
        }
        Err(e) => {
            let message = format!("Could not decode response body: {}", e);
            collector.record_error(spec.id.as_str(), message.clone());
            Settlement::NotOk(message)
        }
    }
}

fn record_unexpected(spec: &RequestSpec, response: RawResponse, collector: &ResponseCollector) -> Settlement {
    let body = match codec::decode_body(spec.policy.response_format, &response.body) {
        Ok(body) => body,
        Err(e) => {
            collector.record_error(
                spec.id.as_str(),
                format!("Could not decode response body: {}", e),
            );
            ResponseBody::Empty
        }
    };

    let outcome = Outcome {
        id: spec.id.clone(),
        status: response.status,
        headers: filtered_headers(spec, &response),
        body,
    };
    collector.record_failed(spec.id.as_str(), outcome);
    Settlement::NotOk(format!("Unexpected status code {}", response.status))
}
