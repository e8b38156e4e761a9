use async_trait::async_trait;
use std::collections::HashMap;
use weftcore::{
    Node, NodeError, NodeKind, NodeSchema, ProcessingContext, SlotSpec, SlotValues, SlotValuesExt,
    Value,
};
use weftruntime::NodeFactory;

/// Parse a JSON string into a structured value
pub struct JsonParseNode;

#[async_trait]
impl Node for JsonParseNode {
    fn node_type(&self) -> &str {
        "transform.json_parse"
    }

    async fn process(
        &self,
        _ctx: &ProcessingContext,
        inputs: SlotValues,
    ) -> Result<SlotValues, NodeError> {
        let text = inputs.require_str("json")?;
        let parsed: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| NodeError::ExecutionFailed(format!("JSON parse error: {e}")))?;
        Ok(HashMap::from([(
            "parsed".to_string(),
            Value::Json(parsed),
        )]))
    }
}

pub struct JsonParseNodeFactory;

impl NodeFactory for JsonParseNodeFactory {
    fn node_type(&self) -> &str {
        "transform.json_parse"
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new(
            "transform.json_parse",
            NodeKind::Processor,
            "Parse a JSON string",
            "transform",
        )
        .with_input(SlotSpec::required("json", "string"))
        .with_output(SlotSpec::required("parsed", "json"))
    }

    fn create(&self, _properties: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(JsonParseNode))
    }
}

/// Render any value as a JSON string
pub struct JsonStringifyNode;

#[async_trait]
impl Node for JsonStringifyNode {
    fn node_type(&self) -> &str {
        "transform.json_stringify"
    }

    async fn process(
        &self,
        _ctx: &ProcessingContext,
        inputs: SlotValues,
    ) -> Result<SlotValues, NodeError> {
        let value = inputs.require("value")?;
        let rendered = serde_json::to_string_pretty(&value.to_json())
            .map_err(|e| NodeError::ExecutionFailed(format!("JSON stringify error: {e}")))?;
        Ok(HashMap::from([("json".to_string(), rendered.into())]))
    }
}

pub struct JsonStringifyNodeFactory;

impl NodeFactory for JsonStringifyNodeFactory {
    fn node_type(&self) -> &str {
        "transform.json_stringify"
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new(
            "transform.json_stringify",
            NodeKind::Processor,
            "Convert a value to a JSON string",
            "transform",
        )
        .with_input(SlotSpec::required("value", "any"))
        .with_output(SlotSpec::required("json", "string"))
    }

    fn create(&self, _properties: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(JsonStringifyNode))
    }
}
