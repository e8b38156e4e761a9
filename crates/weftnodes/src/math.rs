use async_trait::async_trait;
use std::collections::HashMap;
use weftcore::{
    Node, NodeError, NodeKind, NodeSchema, ProcessingContext, SlotSpec, SlotValues, SlotValuesExt,
    Value,
};
use weftruntime::NodeFactory;

/// Adds an addend to the incoming value. The addend can be wired in or set
/// as a static property; it defaults to zero.
pub struct AddNode;

#[async_trait]
impl Node for AddNode {
    fn node_type(&self) -> &str {
        "math.add"
    }

    fn validate_properties(&self, properties: &HashMap<String, Value>) -> Result<(), NodeError> {
        for field in ["value", "addend"] {
            if let Some(v) = properties.get(field) {
                if v.as_f64().is_none() {
                    return Err(NodeError::Property(format!(
                        "property '{field}' must be a number"
                    )));
                }
            }
        }
        Ok(())
    }

    async fn process(
        &self,
        _ctx: &ProcessingContext,
        inputs: SlotValues,
    ) -> Result<SlotValues, NodeError> {
        let value = inputs.require_number("value")?;
        let addend = inputs.number_or("addend", 0.0)?;
        Ok(HashMap::from([(
            "sum".to_string(),
            Value::Number(value + addend),
        )]))
    }
}

pub struct AddNodeFactory;

impl NodeFactory for AddNodeFactory {
    fn node_type(&self) -> &str {
        "math.add"
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new(
            "math.add",
            NodeKind::Processor,
            "Adds an addend to the input value",
            "math",
        )
        .with_input(SlotSpec::required("value", "number"))
        .with_input(SlotSpec::optional("addend", "number"))
        .with_output(SlotSpec::required("sum", "number"))
    }

    fn create(&self, _properties: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(AddNode))
    }
}
