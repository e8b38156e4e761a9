use std::collections::HashMap;
use std::sync::Arc;
use weftcore::{Node, NodeError, NodeSchema, SchemaSource, Value};

/// Factory trait for creating node instances
pub trait NodeFactory: Send + Sync {
    /// Node type identifier this factory produces
    fn node_type(&self) -> &str;

    /// Static schema: slots, boundary kind, wiring metadata
    fn schema(&self) -> NodeSchema;

    /// Create a fresh instance configured with the node's static properties
    fn create(&self, properties: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError>;
}

/// Registry of available node types
pub struct NodeRegistry {
    factories: HashMap<String, Arc<dyn NodeFactory>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a node factory. A later registration under the same type
    /// replaces the earlier one.
    pub fn register(&mut self, factory: Arc<dyn NodeFactory>) {
        let node_type = factory.node_type().to_string();
        tracing::info!("Registering node type: {}", node_type);
        self.factories.insert(node_type, factory);
    }

    /// Create a node instance. Unknown types cannot occur after validation,
    /// so a miss here is reported as a node-level failure.
    pub fn create_node(
        &self,
        node_type: &str,
        properties: &HashMap<String, Value>,
    ) -> Result<Box<dyn Node>, NodeError> {
        let factory = self.factories.get(node_type).ok_or_else(|| {
            NodeError::InitializationFailed(format!("unregistered node type: {node_type}"))
        })?;
        factory.create(properties)
    }

    /// All registered node types, sorted for stable listings.
    pub fn list_node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn schema(&self, node_type: &str) -> Option<NodeSchema> {
        self.factories.get(node_type).map(|f| f.schema())
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl SchemaSource for NodeRegistry {
    fn schema_of(&self, node_type: &str) -> Option<NodeSchema> {
        self.schema(node_type)
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
