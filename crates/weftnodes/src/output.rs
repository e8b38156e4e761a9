use async_trait::async_trait;
use std::collections::HashMap;
use weftcore::{
    Node, NodeError, NodeKind, NodeSchema, ProcessingContext, SlotSpec, SlotValues, SlotValuesExt,
    Value,
};
use weftruntime::NodeFactory;

/// Graph exit point. Whatever arrives on "value" is surfaced as a job
/// output keyed by this node's boundary name.
pub struct ResultNode;

#[async_trait]
impl Node for ResultNode {
    fn node_type(&self) -> &str {
        "output.result"
    }

    async fn process(
        &self,
        _ctx: &ProcessingContext,
        inputs: SlotValues,
    ) -> Result<SlotValues, NodeError> {
        let value = inputs.require("value")?.clone();
        Ok(HashMap::from([("value".to_string(), value)]))
    }
}

pub struct ResultNodeFactory;

impl NodeFactory for ResultNodeFactory {
    fn node_type(&self) -> &str {
        "output.result"
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new(
            "output.result",
            NodeKind::Output,
            "Captures a job result",
            "output",
        )
        .with_input(SlotSpec::required("value", "any"))
    }

    fn create(&self, _properties: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(ResultNode))
    }
}
