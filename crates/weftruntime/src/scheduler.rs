use crate::cache::{Fingerprint, ResultCache};
use crate::registry::NodeRegistry;
use futures::stream::{FuturesUnordered, StreamExt};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use tokio::time::{sleep, Duration, Instant};
use weftcore::{
    EngineError, JobId, JobStatus, Node, NodeError, NodeKind, NodeStatus, ProcessingContext,
    RetryPolicy, SlotValues, UpdateMessage, ValidatedGraph, Value,
};

/// Scheduler tuning knobs
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on nodes in flight at once; None means unbounded and
    /// zero is treated as one.
    pub max_concurrency: Option<usize>,
    /// TTL applied to cache entries the scheduler stores.
    pub cache_ttl: Duration,
    /// Retry policy for transient failures; a node's own policy wins.
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: Some(10),
            cache_ttl: Duration::from_secs(600),
            retry: RetryPolicy::default(),
        }
    }
}

/// Everything a caller learns about a finished run
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub status: JobStatus,
    pub node_status: HashMap<String, NodeStatus>,
    /// Job results gathered from completed Output-kind nodes.
    pub outputs: HashMap<String, Value>,
    /// The failure that decided a failed run, if any.
    pub error: Option<String>,
}

/// Dependency-ordered executor for a single job.
///
/// Nodes launch as soon as every predecessor has completed, newly ready
/// nodes launching in topological-index order. A failed node poisons its
/// transitive dependents (they are skipped, never run); independent branches
/// keep going. Cancellation stops new launches and drains what is in flight.
pub struct Scheduler {
    registry: Arc<NodeRegistry>,
    cache: Arc<dyn ResultCache>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        registry: Arc<NodeRegistry>,
        cache: Arc<dyn ResultCache>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            registry,
            cache,
            config,
        }
    }

    pub async fn run(
        &self,
        graph: &ValidatedGraph,
        ctx: &ProcessingContext,
    ) -> weftcore::Result<JobOutcome> {
        let job_id = ctx.job_id;
        let started = Instant::now();
        tracing::info!(job = %job_id, nodes = graph.len(), "Starting job");
        ctx.post_message(UpdateMessage::JobUpdate {
            job_id,
            status: JobStatus::Running,
            error: None,
        });

        let mut state = RunState::new(graph);
        let mut in_flight = FuturesUnordered::new();
        let mut in_flight_count = 0usize;
        // node id -> exclusive class it holds
        let mut held_resources: HashMap<String, String> = HashMap::new();
        let mut held_classes: HashSet<String> = HashSet::new();
        let mut last_error: Option<String> = None;
        let mut cancel_requested = false;

        loop {
            if !cancel_requested && ctx.cancellation.is_cancelled() {
                cancel_requested = true;
                tracing::info!(job = %job_id, "Cancellation requested; draining in-flight nodes");
            }

            if !cancel_requested {
                let mut deferred = Vec::new();
                while let Some(Reverse(position)) = state.ready.pop() {
                    if let Some(limit) = self.config.max_concurrency {
                        // A limit of zero would defer forever; floor it at one.
                        if in_flight_count >= limit.max(1) {
                            deferred.push(Reverse(position));
                            break;
                        }
                    }
                    let node_id = graph.order()[position].clone();
                    if state.status(&node_id) != NodeStatus::Pending {
                        continue;
                    }
                    let Some(spec) = graph.node(&node_id) else {
                        continue;
                    };
                    let Some(schema) = self.registry.schema(&spec.node_type) else {
                        continue;
                    };

                    if let Some(class) = &schema.exclusive_resource {
                        if held_classes.contains(class) {
                            deferred.push(Reverse(position));
                            continue;
                        }
                    }

                    state.mark_running(&node_id, ctx);

                    let mut inputs: SlotValues = spec.properties.clone();
                    if let Some(delivered) = state.delivered.remove(&node_id) {
                        inputs.extend(delivered);
                    }

                    let node = match self.registry.create_node(&spec.node_type, &spec.properties)
                    {
                        Ok(node) => node,
                        Err(e) => {
                            last_error =
                                Some(format!("node '{}' failed: {}", spec.display_name(), e));
                            state.mark_failed(&node_id, &e.to_string(), ctx);
                            continue;
                        }
                    };

                    let fingerprint = if node.is_cacheable() {
                        match Fingerprint::compute(&spec.node_type, &inputs) {
                            Ok(fp) => Some(fp),
                            Err(e) => {
                                tracing::warn!(
                                    node = %node_id,
                                    "Fingerprint failed, running uncached: {}", e
                                );
                                None
                            }
                        }
                    } else {
                        None
                    };

                    if let Some(fp) = &fingerprint {
                        if let Some(hit) = self.cache.get(fp).await {
                            tracing::debug!(node = %node_id, fingerprint = %fp, "Cache hit");
                            state.complete(&node_id, hit, ctx);
                            continue;
                        }
                    }

                    if let Some(class) = schema.exclusive_resource.clone() {
                        held_classes.insert(class.clone());
                        held_resources.insert(node_id.clone(), class);
                    }

                    let retry = spec
                        .retry_policy
                        .clone()
                        .unwrap_or_else(|| self.config.retry.clone());
                    let node_ctx = ctx.for_node(&node_id, spec.display_name());
                    let task_id = node_id.clone();
                    in_flight.push(tokio::spawn(async move {
                        let start = Instant::now();
                        let result = execute_node(node, &node_ctx, inputs, &retry).await;
                        (task_id, fingerprint, result, start.elapsed())
                    }));
                    in_flight_count += 1;
                }
                state.ready.extend(deferred);
            }

            if in_flight_count == 0 {
                if cancel_requested || state.ready.is_empty() {
                    break;
                }
                // Cache hits above may have freed more ready nodes.
                continue;
            }

            tokio::select! {
                _ = ctx.cancellation.cancelled(), if !cancel_requested => {
                    // Picked up at the top of the loop.
                }
                joined = in_flight.next() => {
                    let Some(joined) = joined else { continue };
                    in_flight_count -= 1;
                    let (node_id, fingerprint, result, elapsed) = match joined {
                        Ok(parts) => parts,
                        Err(e) => {
                            // Siblings must not outlive the run and post updates
                            // after the caller's terminal JobUpdate.
                            for task in in_flight.iter() {
                                task.abort();
                            }
                            while in_flight.next().await.is_some() {}
                            return Err(EngineError::Execution(format!(
                                "node task join error: {e}"
                            )));
                        }
                    };
                    if let Some(class) = held_resources.remove(&node_id) {
                        held_classes.remove(&class);
                    }
                    match result {
                        Ok(outputs) => {
                            tracing::info!(
                                node = %node_id,
                                elapsed_ms = elapsed.as_millis() as u64,
                                "Node completed"
                            );
                            if let Some(fp) = &fingerprint {
                                self.cache
                                    .set(fp, outputs.clone(), self.config.cache_ttl)
                                    .await;
                            }
                            state.complete(&node_id, outputs, ctx);
                        }
                        Err(NodeError::Cancelled) => {
                            tracing::info!(node = %node_id, "Node observed cancellation");
                            state.mark_skipped(&node_id, ctx);
                        }
                        Err(e) => {
                            tracing::error!(node = %node_id, "Node failed: {}", e);
                            let display = graph
                                .node(&node_id)
                                .map(|s| s.display_name().to_string())
                                .unwrap_or_else(|| node_id.clone());
                            last_error = Some(format!("node '{display}' failed: {e}"));
                            state.mark_failed(&node_id, &e.to_string(), ctx);
                        }
                    }
                }
            }
        }

        state.finish_remaining(ctx);

        let status = if cancel_requested {
            JobStatus::Cancelled
        } else if state.any_failed() {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        };
        let outputs = self.collect_outputs(graph, &state);

        ctx.post_message(UpdateMessage::JobUpdate {
            job_id,
            status,
            error: last_error.clone(),
        });
        tracing::info!(
            job = %job_id,
            %status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Job finished"
        );

        Ok(JobOutcome {
            job_id,
            status,
            node_status: state.statuses,
            outputs,
            error: last_error,
        })
    }

    /// Job results come from Output-kind nodes that completed: the value on
    /// their "value" slot, keyed by the node's boundary name.
    fn collect_outputs(
        &self,
        graph: &ValidatedGraph,
        state: &RunState<'_>,
    ) -> HashMap<String, Value> {
        let mut outputs = HashMap::new();
        for spec in &graph.graph().nodes {
            let Some(schema) = self.registry.schema(&spec.node_type) else {
                continue;
            };
            if schema.kind != NodeKind::Output || state.status(&spec.id) != NodeStatus::Completed
            {
                continue;
            }
            if let Some(value) = state
                .node_outputs
                .get(&spec.id)
                .and_then(|slots| slots.get("value"))
            {
                outputs.insert(spec.parameter_name().to_string(), value.clone());
            }
        }
        outputs
    }
}

/// Drive one node through its lifecycle: initialize, process with retries on
/// transient failures, release. Release runs regardless of the outcome.
async fn execute_node(
    mut node: Box<dyn Node>,
    ctx: &ProcessingContext,
    inputs: SlotValues,
    retry: &RetryPolicy,
) -> Result<SlotValues, NodeError> {
    if let Err(e) = node.initialize(ctx).await {
        let _ = node.release(ctx).await;
        return Err(e);
    }

    let mut attempt = 1u32;
    let mut delay_ms = retry.delay_ms as f64;
    let result = loop {
        if ctx.is_cancelled() {
            break Err(NodeError::Cancelled);
        }
        match node.process(ctx, inputs.clone()).await {
            Ok(outputs) => break Ok(outputs),
            Err(NodeError::Transient(reason)) if attempt < retry.max_attempts => {
                tracing::warn!(
                    node = %ctx.node_id,
                    attempt,
                    "Transient failure, retrying: {}", reason
                );
                sleep(Duration::from_millis(delay_ms as u64)).await;
                attempt += 1;
                delay_ms *= retry.backoff_multiplier;
            }
            Err(NodeError::Transient(reason)) => {
                break Err(NodeError::ExecutionFailed(format!(
                    "transient failure persisted after {attempt} attempts: {reason}"
                )));
            }
            Err(e) => break Err(e),
        }
    };

    if let Err(e) = node.release(ctx).await {
        tracing::warn!(node = %ctx.node_id, "Release failed: {}", e);
    }
    result
}

/// Mutable bookkeeping for one run
struct RunState<'g> {
    graph: &'g ValidatedGraph,
    statuses: HashMap<String, NodeStatus>,
    /// Predecessors each node still waits on.
    pending_preds: HashMap<String, HashSet<String>>,
    /// Inputs delivered over edges, consumed when the target launches.
    delivered: HashMap<String, SlotValues>,
    node_outputs: HashMap<String, SlotValues>,
    /// Ready set ordered by topological index.
    ready: BinaryHeap<Reverse<usize>>,
}

impl<'g> RunState<'g> {
    fn new(graph: &'g ValidatedGraph) -> Self {
        let mut statuses = HashMap::new();
        let mut pending_preds = HashMap::new();
        let mut ready = BinaryHeap::new();
        for (position, node_id) in graph.order().iter().enumerate() {
            statuses.insert(node_id.clone(), NodeStatus::Pending);
            let preds = graph.predecessors(node_id);
            if preds.is_empty() {
                ready.push(Reverse(position));
            }
            pending_preds.insert(node_id.clone(), preds);
        }
        Self {
            graph,
            statuses,
            pending_preds,
            delivered: HashMap::new(),
            node_outputs: HashMap::new(),
            ready,
        }
    }

    fn status(&self, node_id: &str) -> NodeStatus {
        self.statuses
            .get(node_id)
            .copied()
            .unwrap_or(NodeStatus::Pending)
    }

    fn display(&self, node_id: &str) -> String {
        self.graph
            .node(node_id)
            .map(|spec| spec.display_name().to_string())
            .unwrap_or_else(|| node_id.to_string())
    }

    fn emit(&self, node_id: &str, status: NodeStatus, error: Option<String>, ctx: &ProcessingContext) {
        ctx.post_message(UpdateMessage::NodeUpdate {
            node_id: node_id.to_string(),
            node_name: self.display(node_id),
            status,
            error,
        });
    }

    fn mark_running(&mut self, node_id: &str, ctx: &ProcessingContext) {
        self.statuses
            .insert(node_id.to_string(), NodeStatus::Running);
        self.emit(node_id, NodeStatus::Running, None, ctx);
    }

    fn mark_skipped(&mut self, node_id: &str, ctx: &ProcessingContext) {
        self.statuses
            .insert(node_id.to_string(), NodeStatus::Skipped);
        self.emit(node_id, NodeStatus::Skipped, None, ctx);
    }

    /// Record a completion: deliver outputs along edges and promote any
    /// dependent whose last awaited predecessor this was.
    fn complete(&mut self, node_id: &str, outputs: SlotValues, ctx: &ProcessingContext) {
        self.statuses
            .insert(node_id.to_string(), NodeStatus::Completed);
        self.emit(node_id, NodeStatus::Completed, None, ctx);

        let graph = self.graph;
        let mut dependents: Vec<String> = Vec::new();
        for edge in graph.outgoing(node_id) {
            if let Some(value) = outputs.get(&edge.source_slot) {
                self.delivered
                    .entry(edge.target.clone())
                    .or_default()
                    .insert(edge.target_slot.clone(), value.clone());
            }
            if !dependents.contains(&edge.target) {
                dependents.push(edge.target.clone());
            }
        }
        self.node_outputs.insert(node_id.to_string(), outputs);

        for dependent in dependents {
            let now_ready = self
                .pending_preds
                .get_mut(&dependent)
                .map(|preds| {
                    preds.remove(node_id);
                    preds.is_empty()
                })
                .unwrap_or(false);
            if now_ready && self.status(&dependent) == NodeStatus::Pending {
                if let Some(position) = graph.order_index(&dependent) {
                    self.ready.push(Reverse(position));
                }
            }
        }
    }

    /// Record a failure and skip every transitive dependent. Other branches
    /// are left alone.
    fn mark_failed(&mut self, node_id: &str, error: &str, ctx: &ProcessingContext) {
        self.statuses.insert(node_id.to_string(), NodeStatus::Failed);
        self.emit(node_id, NodeStatus::Failed, Some(error.to_string()), ctx);
        for descendant in self.graph.descendants(node_id) {
            if !self.status(&descendant).is_terminal() {
                self.mark_skipped(&descendant, ctx);
            }
        }
    }

    /// Mark everything still pending as skipped, in topological order.
    fn finish_remaining(&mut self, ctx: &ProcessingContext) {
        let order: Vec<String> = self.graph.order().to_vec();
        for node_id in order {
            if !self.status(&node_id).is_terminal() {
                self.mark_skipped(&node_id, ctx);
            }
        }
    }

    fn any_failed(&self) -> bool {
        self.statuses
            .values()
            .any(|status| *status == NodeStatus::Failed)
    }
}
