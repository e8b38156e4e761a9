use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Frame error: {0}")]
    Frame(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Property error: {0}")]
    Property(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Node initialization failed: {0}")]
    InitializationFailed(String),

    /// Retryable failure; the scheduler re-runs the node per its retry policy.
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Cancelled")]
    Cancelled,
}

#[derive(Error, Debug, Clone)]
pub enum GraphError {
    #[error("Duplicate node id: {0}")]
    DuplicateNodeId(String),

    #[error("Edge '{edge}' references unknown node: {node}")]
    UnknownNode { edge: String, node: String },

    #[error("Edge '{edge}' references unknown {direction} slot '{slot}' on node type '{node_type}'")]
    UnknownSlot {
        edge: String,
        direction: String,
        slot: String,
        node_type: String,
    },

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Cyclic dependency detected")]
    CyclicDependency,

    #[error("Invalid link: {0}")]
    InvalidLink(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid graph: {0}")]
    Invalid(String),
}
