use crate::job::JobId;
use crate::update::{UpdateMessage, UpdateSink};
use crate::{NodeError, Value};
use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Resolved slot values flowing into and out of `process`
pub type SlotValues = HashMap<String, Value>;

/// Core trait that all executable nodes implement.
///
/// The scheduler drives the lifecycle in order: `initialize`, `process`
/// (possibly retried), `release`. `release` runs whether or not `process`
/// succeeded.
#[async_trait]
pub trait Node: Send + Sync {
    /// Unique type identifier (e.g. "math.add", "transform.json_parse")
    fn node_type(&self) -> &str;

    /// Whether results may be cached by input fingerprint. Nodes with side
    /// effects or time-dependent output return false.
    fn is_cacheable(&self) -> bool {
        true
    }

    /// Optional: reject bad static properties at graph load time
    fn validate_properties(&self, _properties: &HashMap<String, Value>) -> Result<(), NodeError> {
        Ok(())
    }

    /// Optional: acquire stateful resources before processing
    async fn initialize(&mut self, _ctx: &ProcessingContext) -> Result<(), NodeError> {
        Ok(())
    }

    /// Transform resolved inputs into named outputs
    async fn process(
        &self,
        ctx: &ProcessingContext,
        inputs: SlotValues,
    ) -> Result<SlotValues, NodeError>;

    /// Optional: release resources; runs on success and on failure
    async fn release(&mut self, _ctx: &ProcessingContext) -> Result<(), NodeError> {
        Ok(())
    }
}

/// Named external collaborator handles (storage, asset repositories,
/// prediction services) shared by every node in a run.
#[derive(Default)]
pub struct Collaborators {
    handles: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl Collaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Any + Send + Sync>(&mut self, name: impl Into<String>, handle: Arc<T>) {
        self.handles.insert(name.into(), handle);
    }

    /// Typed lookup; None when the name is absent or the type does not match.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.handles
            .get(name)
            .and_then(|handle| handle.clone().downcast::<T>().ok())
    }
}

/// Per-run context through which a node reaches the outside world
#[derive(Clone)]
pub struct ProcessingContext {
    pub job_id: JobId,
    pub user_id: String,
    pub auth_token: Option<String>,
    /// Id of the node currently being processed; empty at job scope.
    pub node_id: String,
    pub node_name: String,
    sink: Arc<dyn UpdateSink>,
    collaborators: Arc<Collaborators>,
    pub cancellation: CancellationToken,
}

impl ProcessingContext {
    pub fn new(
        job_id: JobId,
        user_id: impl Into<String>,
        auth_token: Option<String>,
        sink: Arc<dyn UpdateSink>,
        collaborators: Arc<Collaborators>,
    ) -> Self {
        Self {
            job_id,
            user_id: user_id.into(),
            auth_token,
            node_id: String::new(),
            node_name: String::new(),
            sink,
            collaborators,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Scope this context to a node; updates it posts carry the node identity.
    pub fn for_node(&self, node_id: &str, node_name: &str) -> Self {
        let mut ctx = self.clone();
        ctx.node_id = node_id.to_string();
        ctx.node_name = node_name.to_string();
        ctx
    }

    pub fn post_message(&self, update: UpdateMessage) {
        self.sink.post(update);
    }

    /// Report incremental progress for the current node.
    pub fn progress(&self, progress: u64, total: u64) {
        self.sink.post(UpdateMessage::NodeProgress {
            node_id: self.node_id.clone(),
            progress,
            total,
        });
    }

    pub fn collaborator<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.collaborators.get(name)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn sink(&self) -> Arc<dyn UpdateSink> {
        self.sink.clone()
    }
}

impl Default for ProcessingContext {
    fn default() -> Self {
        Self::new(
            Uuid::new_v4(),
            "anonymous",
            None,
            Arc::new(crate::update::MemorySink::new()),
            Arc::new(Collaborators::new()),
        )
    }
}

/// Input accessors shared by node implementations
pub trait SlotValuesExt {
    fn require(&self, name: &str) -> Result<&Value, NodeError>;
    fn require_str(&self, name: &str) -> Result<&str, NodeError>;
    fn require_number(&self, name: &str) -> Result<f64, NodeError>;
    fn get_or(&self, name: &str, default: Value) -> Value;
    fn number_or(&self, name: &str, default: f64) -> Result<f64, NodeError>;
}

impl SlotValuesExt for SlotValues {
    fn require(&self, name: &str) -> Result<&Value, NodeError> {
        self.get(name)
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    fn require_str(&self, name: &str) -> Result<&str, NodeError> {
        let value = self.require(name)?;
        value.as_str().ok_or_else(|| NodeError::InvalidInputType {
            field: name.to_string(),
            expected: "string".to_string(),
            actual: type_name(value).to_string(),
        })
    }

    fn require_number(&self, name: &str) -> Result<f64, NodeError> {
        let value = self.require(name)?;
        value.as_f64().ok_or_else(|| NodeError::InvalidInputType {
            field: name.to_string(),
            expected: "number".to_string(),
            actual: type_name(value).to_string(),
        })
    }

    fn get_or(&self, name: &str, default: Value) -> Value {
        self.get(name).cloned().unwrap_or(default)
    }

    fn number_or(&self, name: &str, default: f64) -> Result<f64, NodeError> {
        match self.get(name) {
            None => Ok(default),
            Some(value) => value.as_f64().ok_or_else(|| NodeError::InvalidInputType {
                field: name.to_string(),
                expected: "number".to_string(),
                actual: type_name(value).to_string(),
            }),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Bytes(_) => "bytes",
        Value::Json(_) => "json",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
