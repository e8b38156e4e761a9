use async_trait::async_trait;
use std::collections::HashMap;
use tokio::time::{sleep, Duration};
use weftcore::{
    Node, NodeError, NodeKind, NodeSchema, ProcessingContext, SlotSpec, SlotValues, SlotValuesExt,
    Value,
};
use weftruntime::NodeFactory;

/// Delay for `duration_ms` milliseconds, then pass the input through.
///
/// The delay is chunked so cancellation takes effect within one chunk, with
/// progress reported after each.
pub struct DelayNode;

const DELAY_CHUNK_MS: u64 = 100;

#[async_trait]
impl Node for DelayNode {
    fn node_type(&self) -> &str {
        "time.delay"
    }

    fn is_cacheable(&self) -> bool {
        false
    }

    fn validate_properties(&self, properties: &HashMap<String, Value>) -> Result<(), NodeError> {
        if let Some(v) = properties.get("duration_ms") {
            match v.as_f64() {
                Some(ms) if ms >= 0.0 => {}
                _ => {
                    return Err(NodeError::Property(
                        "property 'duration_ms' must be a non-negative number".to_string(),
                    ))
                }
            }
        }
        Ok(())
    }

    async fn process(
        &self,
        ctx: &ProcessingContext,
        inputs: SlotValues,
    ) -> Result<SlotValues, NodeError> {
        let total = inputs.number_or("duration_ms", 1000.0)? as u64;
        tracing::debug!(node = %ctx.node_id, "Delaying for {}ms", total);

        let mut elapsed = 0u64;
        while elapsed < total {
            let step = (total - elapsed).min(DELAY_CHUNK_MS);
            tokio::select! {
                _ = sleep(Duration::from_millis(step)) => {}
                _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
            }
            elapsed += step;
            ctx.progress(elapsed, total);
        }

        let value = inputs.get_or("value", Value::Null);
        Ok(HashMap::from([("value".to_string(), value)]))
    }
}

pub struct DelayNodeFactory;

impl NodeFactory for DelayNodeFactory {
    fn node_type(&self) -> &str {
        "time.delay"
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new(
            "time.delay",
            NodeKind::Processor,
            "Delay execution for duration_ms milliseconds",
            "time",
        )
        .with_input(SlotSpec::optional("value", "any"))
        .with_input(SlotSpec::optional("duration_ms", "number"))
        .with_output(SlotSpec::required("value", "any"))
    }

    fn create(&self, _properties: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(DelayNode))
    }
}

/// Current UTC time as an RFC 3339 string
pub struct NowNode;

#[async_trait]
impl Node for NowNode {
    fn node_type(&self) -> &str {
        "time.now"
    }

    fn is_cacheable(&self) -> bool {
        false
    }

    async fn process(
        &self,
        _ctx: &ProcessingContext,
        _inputs: SlotValues,
    ) -> Result<SlotValues, NodeError> {
        let timestamp = chrono::Utc::now().to_rfc3339();
        Ok(HashMap::from([(
            "timestamp".to_string(),
            Value::String(timestamp),
        )]))
    }
}

pub struct NowNodeFactory;

impl NodeFactory for NowNodeFactory {
    fn node_type(&self) -> &str {
        "time.now"
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new(
            "time.now",
            NodeKind::Processor,
            "Current UTC timestamp",
            "time",
        )
        .with_output(SlotSpec::required("timestamp", "string"))
    }

    fn create(&self, _properties: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(NowNode))
    }
}
