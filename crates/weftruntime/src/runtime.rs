use crate::cache::{MemoryCache, ResultCache};
use crate::registry::NodeRegistry;
use crate::scheduler::{JobOutcome, Scheduler, SchedulerConfig};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use weftcore::{
    import, Collaborators, GraphError, Job, JobId, JobStatus, NodeKind, ProcessingContext,
    RunJobRequest, UpdateBus, UpdateMessage, UpdateSink, ValidatedGraph, Value,
};

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    /// Ring capacity of the shared update bus.
    pub update_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            update_capacity: 1000,
        }
    }
}

/// Main entry point for running jobs: owns the node registry, the result
/// cache, collaborator handles and the shared update bus.
pub struct Engine {
    registry: Arc<NodeRegistry>,
    cache: Arc<dyn ResultCache>,
    collaborators: Arc<Collaborators>,
    bus: Arc<UpdateBus>,
    config: EngineConfig,
}

impl Engine {
    /// Engine with default settings and an empty registry
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_registry(Arc::new(NodeRegistry::new()), config)
    }

    pub fn with_registry(registry: Arc<NodeRegistry>, config: EngineConfig) -> Self {
        Self {
            registry,
            cache: Arc::new(MemoryCache::new()),
            collaborators: Arc::new(Collaborators::new()),
            bus: Arc::new(UpdateBus::new(config.update_capacity)),
            config,
        }
    }

    /// Swap the result cache backend.
    pub fn with_cache(mut self, cache: Arc<dyn ResultCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_collaborators(mut self, collaborators: Arc<Collaborators>) -> Self {
        self.collaborators = collaborators;
        self
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<UpdateBus> {
        &self.bus
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<UpdateMessage> {
        self.bus.subscribe()
    }

    /// Import a graph payload and validate it without binding parameters.
    pub fn validate_graph(&self, graph: &serde_json::Value) -> weftcore::Result<ValidatedGraph> {
        let graph = import::graph_from_json(graph, self.registry.as_ref())?;
        self.check_properties(&graph)?;
        Ok(graph.validate(self.registry.as_ref())?)
    }

    /// Normalize, bind and validate a submission into a runnable job.
    ///
    /// Matching caller params are bound onto their Input nodes, the graph is
    /// structurally validated, and the param map is swept last, so structural
    /// defects take precedence over parameter diagnostics. A bad submission
    /// fails here and never starts running.
    pub fn prepare(&self, request: &RunJobRequest) -> weftcore::Result<(Job, ValidatedGraph)> {
        self.prepare_with_id(JobId::new_v4(), request)
    }

    pub fn prepare_with_id(
        &self,
        job_id: JobId,
        request: &RunJobRequest,
    ) -> weftcore::Result<(Job, ValidatedGraph)> {
        let mut graph = import::graph_from_json(&request.graph, self.registry.as_ref())?;

        let params: HashMap<String, Value> = request
            .params
            .iter()
            .map(|(name, value)| (name.clone(), Value::from_json(value.clone())))
            .collect();

        let accepted = graph.input_schema(self.registry.as_ref());
        for spec in &accepted {
            if let Some(value) = params.get(&spec.name) {
                if let Some(node) = graph.node_mut(&spec.node_id) {
                    node.properties.insert("value".to_string(), value.clone());
                }
            }
        }

        self.check_properties(&graph)?;
        let validated = graph.clone().validate(self.registry.as_ref())?;

        // Swept after validation: a misspelled node type is a graph defect,
        // not an unknown parameter.
        for spec in &accepted {
            if spec.required && !params.contains_key(&spec.name) {
                return Err(GraphError::InvalidParameter(format!(
                    "missing required parameter '{}'",
                    spec.name
                ))
                .into());
            }
        }
        for name in params.keys() {
            if !accepted.iter().any(|spec| &spec.name == name) {
                return Err(GraphError::InvalidParameter(format!(
                    "unknown parameter '{name}'"
                ))
                .into());
            }
        }

        let job = Job::with_id(job_id, graph, params, request.user_id.clone());
        Ok((job, validated))
    }

    /// Ask each node instance to vet its static properties.
    fn check_properties(&self, graph: &weftcore::Graph) -> weftcore::Result<()> {
        for spec in &graph.nodes {
            // Unknown types are caught by structural validation; skip here.
            let Ok(node) = self.registry.create_node(&spec.node_type, &spec.properties) else {
                continue;
            };
            node.validate_properties(&spec.properties).map_err(|e| {
                GraphError::Invalid(format!("node '{}': {}", spec.id, e))
            })?;
        }
        Ok(())
    }

    /// Run a submission, streaming updates into the engine's shared bus.
    pub async fn run_request(
        &self,
        request: RunJobRequest,
        cancel: CancellationToken,
    ) -> weftcore::Result<JobOutcome> {
        let sink: Arc<dyn UpdateSink> = self.bus.clone();
        self.execute(JobId::new_v4(), request, sink, cancel).await
    }

    /// Run a submission under a caller-chosen job id, streaming updates into
    /// the given sink.
    ///
    /// Exactly one terminal JobUpdate reaches the sink on every path out of
    /// this method, including submissions that fail before any node runs.
    pub async fn execute(
        &self,
        job_id: JobId,
        request: RunJobRequest,
        sink: Arc<dyn UpdateSink>,
        cancel: CancellationToken,
    ) -> weftcore::Result<JobOutcome> {
        let (job, validated) = match self.prepare_with_id(job_id, &request) {
            Ok(prepared) => prepared,
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(job = %job_id, "Rejected submission: {}", message);
                sink.post(UpdateMessage::Error {
                    message: message.clone(),
                });
                sink.post(UpdateMessage::JobUpdate {
                    job_id,
                    status: JobStatus::Failed,
                    error: Some(message),
                });
                return Err(e);
            }
        };

        tracing::info!(
            job = %job.id,
            owner = %job.owner,
            job_type = %request.job_type,
            "Job submitted"
        );

        let scheduler = Scheduler::new(
            self.registry.clone(),
            self.cache.clone(),
            self.config.scheduler.clone(),
        );
        let ctx = ProcessingContext::new(
            job.id,
            request.user_id.clone(),
            request.auth_token.clone(),
            sink.clone(),
            self.collaborators.clone(),
        )
        .with_cancellation(cancel);

        match scheduler.run(&validated, &ctx).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                // Scheduler errors are infrastructure failures (task join
                // loss); the run is over, so close the stream properly.
                let message = e.to_string();
                tracing::error!(job = %job.id, "Job aborted: {}", message);
                sink.post(UpdateMessage::Error {
                    message: message.clone(),
                });
                sink.post(UpdateMessage::JobUpdate {
                    job_id: job.id,
                    status: JobStatus::Failed,
                    error: Some(message),
                });
                Err(e)
            }
        }
    }

    /// Input parameters a graph accepts, for listings and validation UIs.
    pub fn describe_inputs(
        &self,
        graph: &serde_json::Value,
    ) -> weftcore::Result<Vec<weftcore::ParameterSpec>> {
        let graph = import::graph_from_json(graph, self.registry.as_ref())?;
        Ok(graph.input_schema(self.registry.as_ref()))
    }

    /// Whether a graph produces any outputs at all; useful for spotting
    /// submissions that would run and return nothing.
    pub fn has_outputs(&self, graph: &weftcore::Graph) -> bool {
        graph.nodes.iter().any(|spec| {
            self.registry
                .schema(&spec.node_type)
                .map(|schema| schema.kind == NodeKind::Output)
                .unwrap_or(false)
        })
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
