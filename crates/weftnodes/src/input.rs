use async_trait::async_trait;
use std::collections::HashMap;
use weftcore::{
    Node, NodeError, NodeKind, NodeSchema, ProcessingContext, SlotSpec, SlotValues, SlotValuesExt,
    Value,
};
use weftruntime::NodeFactory;

/// Graph entry point. The runtime binds a caller parameter to this node's
/// "value" property; downstream nodes receive it on the "value" slot.
pub struct ParameterNode;

#[async_trait]
impl Node for ParameterNode {
    fn node_type(&self) -> &str {
        "input.parameter"
    }

    async fn process(
        &self,
        _ctx: &ProcessingContext,
        inputs: SlotValues,
    ) -> Result<SlotValues, NodeError> {
        let value = inputs.get_or("value", Value::Null);
        Ok(HashMap::from([("value".to_string(), value)]))
    }
}

pub struct ParameterNodeFactory;

impl NodeFactory for ParameterNodeFactory {
    fn node_type(&self) -> &str {
        "input.parameter"
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new(
            "input.parameter",
            NodeKind::Input,
            "Surfaces a caller-supplied parameter",
            "input",
        )
        .with_output(SlotSpec::required("value", "any"))
    }

    fn create(&self, _properties: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(ParameterNode))
    }
}
