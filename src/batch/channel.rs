//! Entry point for executing a batch

use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;

use crate::batch::collector::ResponseCollector;
use crate::batch::types::{BatchRequest, BatchResponse};
use crate::config::ChannelConfig;
use crate::engine::{ReqwestTransport, Scheduler, Transport, TransportConfig};
use crate::graph::GraphBuilder;
use crate::request::RequestSpec;
use crate::Result;

/// Resolves, validates and executes batches of dependent HTTP requests
#[derive(Debug, Clone)]
pub struct Channel {
    config: ChannelConfig,
    scheduler: Scheduler,
}

impl Channel {
    /// Create a channel on top of `transport`
    pub fn new(transport: Arc<dyn Transport>, config: ChannelConfig) -> Self {
        let scheduler = Scheduler::new(transport).with_max_concurrency(config.max_concurrency);
        Self { config, scheduler }
    }

    /// Create a channel backed by reqwest
    pub fn with_reqwest(transport: TransportConfig, config: ChannelConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(transport)?;
        Ok(Self::new(Arc::new(transport), config))
    }

    /// Channel configuration
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Resolve policies for a submitted batch and execute it
    #[instrument(skip_all, fields(requests = batch.requests.len()))]
    pub async fn send(&self, batch: BatchRequest) -> Result<BatchResponse> {
        let BatchRequest { requests, config } = batch;
        let specs = requests
            .into_iter()
            .map(|definition| self.config.resolve(definition, config.as_ref()))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        self.send_specs(specs).await
    }

    /// Execute already resolved request specs.
    ///
    /// Fails before anything is dispatched if the dependency graph is invalid,
    /// and with [`crate::BatchFlowError::Aborted`] if a request with the abort
    /// policy fails.
    #[instrument(skip_all, fields(batch_id = %Uuid::new_v4(), requests = specs.len()))]
    pub async fn send_specs(&self, mut specs: Vec<RequestSpec>) -> Result<BatchResponse> {
        let collector = Arc::new(ResponseCollector::new());

        if specs.len() == 1 && specs[0].depends_on.is_empty() {
            if let Some(spec) = specs.pop() {
                self.scheduler.run_single(&spec, collector.clone()).await?;
            }
        } else {
            let graph = Arc::new(GraphBuilder::build(specs)?);
            self.scheduler.run(graph, collector.clone()).await?;
        }

        let response = collector.snapshot();
        info!(
            ok = response.ok.len(),
            failed = response.failed.len(),
            errors = response.errors.len(),
            "Batch completed"
        );
        Ok(response)
    }
}
