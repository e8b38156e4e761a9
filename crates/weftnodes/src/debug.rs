use async_trait::async_trait;
use std::collections::HashMap;
use weftcore::{
    Node, NodeError, NodeKind, NodeSchema, ProcessingContext, SlotSpec, SlotValues, Value,
};
use weftruntime::NodeFactory;

/// Logs its inputs and passes the message through
pub struct LogNode;

#[async_trait]
impl Node for LogNode {
    fn node_type(&self) -> &str {
        "debug.log"
    }

    fn is_cacheable(&self) -> bool {
        false
    }

    async fn process(
        &self,
        ctx: &ProcessingContext,
        inputs: SlotValues,
    ) -> Result<SlotValues, NodeError> {
        let message = inputs
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("(no message)")
            .to_string();

        tracing::info!(node = %ctx.node_id, "{}", message);
        for (key, value) in &inputs {
            tracing::debug!(node = %ctx.node_id, "  {}: {:?}", key, value);
        }

        Ok(HashMap::from([(
            "message".to_string(),
            Value::String(message),
        )]))
    }
}

pub struct LogNodeFactory;

impl NodeFactory for LogNodeFactory {
    fn node_type(&self) -> &str {
        "debug.log"
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new(
            "debug.log",
            NodeKind::Processor,
            "Logs input values for debugging",
            "debug",
        )
        .with_input(SlotSpec::optional("message", "string"))
        .with_output(SlotSpec::required("message", "string"))
    }

    fn create(&self, _properties: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(LogNode))
    }
}
