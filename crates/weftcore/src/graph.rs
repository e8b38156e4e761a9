use crate::schema::{NodeKind, ParameterSpec, SchemaSource};
use crate::{GraphError, Value};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

/// Node instance in a graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub properties: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
}

impl NodeSpec {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            name: None,
            properties: HashMap::new(),
            retry_policy: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, delay_ms: u64) -> Self {
        self.retry_policy = Some(RetryPolicy {
            max_attempts,
            delay_ms,
            backoff_multiplier: 1.0,
        });
        self
    }

    /// Human-readable label used in updates; falls back to the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Name an Input or Output kind node exposes at the graph boundary:
    /// the "name" property when present, else the node id.
    pub fn parameter_name(&self) -> &str {
        self.properties
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(&self.id)
    }
}

/// Directed connection from a source output slot to a target input slot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub source_slot: String,
    pub target: String,
    pub target_slot: String,
}

/// Retry policy for transient node failures
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Workflow graph: node instances plus the edges that wire them together
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<NodeSpec>,
    pub edges: Vec<Edge>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: NodeSpec) {
        self.nodes.push(node);
    }

    pub fn add_edge(&mut self, edge: Edge) {
        self.edges.push(edge);
    }

    pub fn connect(
        &mut self,
        source: impl Into<String>,
        source_slot: impl Into<String>,
        target: impl Into<String>,
        target_slot: impl Into<String>,
    ) {
        let id = format!("e{}", self.edges.len());
        self.edges.push(Edge {
            id,
            source: source.into(),
            source_slot: source_slot.into(),
            target: target.into(),
            target_slot: target_slot.into(),
        });
    }

    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut NodeSpec> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    /// Edges feeding into the given node.
    pub fn dependencies(&self, node_id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.target == node_id).collect()
    }

    /// Edges leaving the given node.
    pub fn feeds(&self, node_id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.source == node_id).collect()
    }

    /// Caller-facing parameters, one per Input-kind node. A parameter is
    /// optional when the node already carries a "value" property to fall
    /// back on.
    pub fn input_schema(&self, schemas: &dyn SchemaSource) -> Vec<ParameterSpec> {
        self.boundary_schema(schemas, NodeKind::Input)
    }

    /// Job results the graph produces, one per Output-kind node.
    pub fn output_schema(&self, schemas: &dyn SchemaSource) -> Vec<ParameterSpec> {
        self.boundary_schema(schemas, NodeKind::Output)
    }

    fn boundary_schema(&self, schemas: &dyn SchemaSource, kind: NodeKind) -> Vec<ParameterSpec> {
        self.nodes
            .iter()
            .filter_map(|node| {
                let schema = schemas.schema_of(&node.node_type)?;
                if schema.kind != kind {
                    return None;
                }
                let data_type = match kind {
                    NodeKind::Input => schema.outputs.first(),
                    _ => schema.inputs.first(),
                }
                .map(|s| s.data_type.clone())
                .unwrap_or_else(|| "any".to_string());
                Some(ParameterSpec {
                    name: node.parameter_name().to_string(),
                    data_type,
                    required: kind == NodeKind::Input && !node.properties.contains_key("value"),
                    node_id: node.id.clone(),
                })
            })
            .collect()
    }

    /// Check structure against the registered schemas and fix a deterministic
    /// execution order. All structural problems surface here, before any node
    /// runs.
    pub fn validate(self, schemas: &dyn SchemaSource) -> Result<ValidatedGraph, GraphError> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(GraphError::DuplicateNodeId(node.id.clone()));
            }
            if schemas.schema_of(&node.node_type).is_none() {
                return Err(GraphError::UnknownNodeType(node.node_type.clone()));
            }
        }

        for edge in &self.edges {
            let source = self.node(&edge.source).ok_or_else(|| GraphError::UnknownNode {
                edge: edge.id.clone(),
                node: edge.source.clone(),
            })?;
            let target = self.node(&edge.target).ok_or_else(|| GraphError::UnknownNode {
                edge: edge.id.clone(),
                node: edge.target.clone(),
            })?;
            // Types were checked above, so the schemas exist.
            let source_schema = schemas
                .schema_of(&source.node_type)
                .ok_or_else(|| GraphError::UnknownNodeType(source.node_type.clone()))?;
            let target_schema = schemas
                .schema_of(&target.node_type)
                .ok_or_else(|| GraphError::UnknownNodeType(target.node_type.clone()))?;
            if source_schema.output(&edge.source_slot).is_none() {
                return Err(GraphError::UnknownSlot {
                    edge: edge.id.clone(),
                    direction: "output".to_string(),
                    slot: edge.source_slot.clone(),
                    node_type: source.node_type.clone(),
                });
            }
            if target_schema.input(&edge.target_slot).is_none() {
                return Err(GraphError::UnknownSlot {
                    edge: edge.id.clone(),
                    direction: "input".to_string(),
                    slot: edge.target_slot.clone(),
                    node_type: target.node_type.clone(),
                });
            }
        }

        // Required inputs must be wired or preset; catches dangling nodes at
        // load time instead of mid-run.
        for node in &self.nodes {
            let schema = schemas
                .schema_of(&node.node_type)
                .ok_or_else(|| GraphError::UnknownNodeType(node.node_type.clone()))?;
            for slot in schema.inputs.iter().filter(|s| s.required) {
                let wired = self
                    .edges
                    .iter()
                    .any(|e| e.target == node.id && e.target_slot == slot.name);
                if !wired && !node.properties.contains_key(&slot.name) {
                    return Err(GraphError::Invalid(format!(
                        "node '{}' is missing required input '{}'",
                        node.id, slot.name
                    )));
                }
            }
        }

        let mut digraph: DiGraph<usize, ()> = DiGraph::new();
        let mut node_indices: HashMap<String, NodeIndex> = HashMap::new();
        for (position, node) in self.nodes.iter().enumerate() {
            node_indices.insert(node.id.clone(), digraph.add_node(position));
        }
        for edge in &self.edges {
            digraph.add_edge(node_indices[&edge.source], node_indices[&edge.target], ());
        }

        // Kahn's algorithm with a min-heap on insertion position: the order is
        // topological and ties go to the earlier-declared node.
        let mut indegree: HashMap<NodeIndex, usize> = node_indices
            .values()
            .map(|&ix| (ix, digraph.edges_directed(ix, Direction::Incoming).count()))
            .collect();
        let mut heap: BinaryHeap<Reverse<usize>> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| indegree[&node_indices[&node.id]] == 0)
            .map(|(position, _)| Reverse(position))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(position)) = heap.pop() {
            let node_id = self.nodes[position].id.clone();
            let ix = node_indices[&node_id];
            order.push(node_id);
            // Parallel edges show up once each here, matching the per-edge
            // indegree count above.
            let targets: Vec<NodeIndex> =
                digraph.neighbors_directed(ix, Direction::Outgoing).collect();
            for target in targets {
                if let Some(remaining) = indegree.get_mut(&target) {
                    *remaining -= 1;
                    if *remaining == 0 {
                        heap.push(Reverse(digraph[target]));
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(GraphError::CyclicDependency);
        }

        let order_index = order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();

        Ok(ValidatedGraph {
            graph: self,
            order,
            order_index,
            digraph,
            node_indices,
        })
    }
}

/// A graph that passed validation, with its execution order fixed
#[derive(Debug, Clone)]
pub struct ValidatedGraph {
    graph: Graph,
    order: Vec<String>,
    order_index: HashMap<String, usize>,
    digraph: DiGraph<usize, ()>,
    node_indices: HashMap<String, NodeIndex>,
}

impl ValidatedGraph {
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Node ids in deterministic topological order.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn order_index(&self, node_id: &str) -> Option<usize> {
        self.order_index.get(node_id).copied()
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeSpec> {
        self.graph.node(node_id)
    }

    pub fn incoming(&self, node_id: &str) -> Vec<&Edge> {
        self.graph.dependencies(node_id)
    }

    pub fn outgoing(&self, node_id: &str) -> Vec<&Edge> {
        self.graph.feeds(node_id)
    }

    /// Distinct upstream node ids.
    pub fn predecessors(&self, node_id: &str) -> HashSet<String> {
        self.graph
            .dependencies(node_id)
            .iter()
            .map(|e| e.source.clone())
            .collect()
    }

    /// All transitive dependents of a node, excluding the node itself.
    /// Breadth-first, deterministic for a given graph.
    pub fn descendants(&self, node_id: &str) -> Vec<String> {
        let Some(&start) = self.node_indices.get(node_id) else {
            return Vec::new();
        };
        let mut visited = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        let mut result = Vec::new();
        while let Some(ix) = queue.pop_front() {
            let mut next: Vec<NodeIndex> = self
                .digraph
                .neighbors_directed(ix, Direction::Outgoing)
                .collect();
            // neighbors_directed iterates in reverse insertion order
            next.sort_by_key(|&n| self.digraph[n]);
            for neighbor in next {
                if visited.insert(neighbor) {
                    result.push(self.graph.nodes[self.digraph[neighbor]].id.clone());
                    queue.push_back(neighbor);
                }
            }
        }
        result
    }

    pub fn len(&self) -> usize {
        self.graph.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.nodes.is_empty()
    }
}
