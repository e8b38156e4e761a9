use std::collections::HashMap;
use std::sync::Arc;
use weftcore::{
    Collaborators, MemorySink, Node, NodeError, ProcessingContext, SlotValues, UpdateMessage,
    Value,
};
use weftnodes::{
    AddNode, DelayNode, JsonParseNode, JsonStringifyNode, LogNode, NowNode, ParameterNode,
    ResultNode,
};

fn slots(pairs: Vec<(&str, Value)>) -> SlotValues {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

// Context wired to a sink the test can inspect afterwards
fn recording_context() -> (ProcessingContext, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let ctx = ProcessingContext::new(
        uuid::Uuid::new_v4(),
        "tester",
        None,
        sink.clone(),
        Arc::new(Collaborators::new()),
    );
    (ctx, sink)
}

#[tokio::test]
async fn test_parameter_surfaces_bound_value() {
    let node = ParameterNode;
    let ctx = ProcessingContext::default();

    let outputs = node
        .process(&ctx, slots(vec![("value", Value::Number(5.0))]))
        .await
        .unwrap();
    assert_eq!(outputs.get("value"), Some(&Value::Number(5.0)));
}

#[tokio::test]
async fn test_parameter_defaults_to_null() {
    let node = ParameterNode;
    let ctx = ProcessingContext::default();

    let outputs = node.process(&ctx, HashMap::new()).await.unwrap();
    assert_eq!(outputs.get("value"), Some(&Value::Null));
}

#[tokio::test]
async fn test_add_sums_value_and_addend() {
    let node = AddNode;
    let ctx = ProcessingContext::default();

    let inputs = slots(vec![
        ("value", Value::Number(5.0)),
        ("addend", Value::Number(3.0)),
    ]);
    let outputs = node.process(&ctx, inputs).await.unwrap();
    assert_eq!(outputs.get("sum"), Some(&Value::Number(8.0)));
}

#[tokio::test]
async fn test_add_defaults_addend_to_zero() {
    let node = AddNode;
    let ctx = ProcessingContext::default();

    let outputs = node
        .process(&ctx, slots(vec![("value", Value::Number(2.5))]))
        .await
        .unwrap();
    assert_eq!(outputs.get("sum"), Some(&Value::Number(2.5)));
}

#[tokio::test]
async fn test_add_rejects_non_numeric_input() {
    let node = AddNode;
    let ctx = ProcessingContext::default();

    let result = node
        .process(&ctx, slots(vec![("value", Value::String("x".to_string()))]))
        .await;
    assert!(matches!(
        result,
        Err(NodeError::InvalidInputType { field, .. }) if field == "value"
    ));
}

#[test]
fn test_add_validates_static_properties() {
    let node = AddNode;
    let bad: HashMap<String, Value> =
        HashMap::from([("addend".to_string(), Value::String("three".to_string()))]);
    assert!(matches!(
        node.validate_properties(&bad),
        Err(NodeError::Property(_))
    ));

    let good: HashMap<String, Value> =
        HashMap::from([("addend".to_string(), Value::Number(3.0))]);
    assert!(node.validate_properties(&good).is_ok());
}

#[tokio::test]
async fn test_result_requires_a_value() {
    let node = ResultNode;
    let ctx = ProcessingContext::default();

    let result = node.process(&ctx, HashMap::new()).await;
    assert!(matches!(result, Err(NodeError::MissingInput(name)) if name == "value"));

    let outputs = node
        .process(&ctx, slots(vec![("value", Value::Bool(true))]))
        .await
        .unwrap();
    assert_eq!(outputs.get("value"), Some(&Value::Bool(true)));
}

#[tokio::test]
async fn test_json_parse_produces_structured_value() {
    let node = JsonParseNode;
    let ctx = ProcessingContext::default();

    let inputs = slots(vec![("json", Value::String(r#"{"a": 1}"#.to_string()))]);
    let outputs = node.process(&ctx, inputs).await.unwrap();
    match outputs.get("parsed") {
        Some(Value::Json(parsed)) => assert_eq!(parsed["a"], 1),
        other => panic!("expected parsed json, got {:?}", other),
    }
}

#[tokio::test]
async fn test_json_parse_rejects_invalid_text() {
    let node = JsonParseNode;
    let ctx = ProcessingContext::default();

    let inputs = slots(vec![("json", Value::String("{not json".to_string()))]);
    let result = node.process(&ctx, inputs).await;
    assert!(matches!(result, Err(NodeError::ExecutionFailed(_))));
}

#[tokio::test]
async fn test_json_stringify_renders_plain_json() {
    let node = JsonStringifyNode;
    let ctx = ProcessingContext::default();

    let inputs = slots(vec![(
        "value",
        Value::Json(serde_json::json!({"a": 1})),
    )]);
    let outputs = node.process(&ctx, inputs).await.unwrap();
    let rendered = outputs.get("json").and_then(|v| v.as_str()).unwrap();
    assert!(rendered.contains("\"a\": 1"));
}

#[tokio::test(start_paused = true)]
async fn test_delay_passes_value_through_and_reports_progress() {
    let node = DelayNode;
    let (ctx, sink) = recording_context();
    let ctx = ctx.for_node("d1", "Delay");

    let inputs = slots(vec![
        ("value", Value::Number(7.0)),
        ("duration_ms", Value::Number(250.0)),
    ]);
    let outputs = node.process(&ctx, inputs).await.unwrap();
    assert_eq!(outputs.get("value"), Some(&Value::Number(7.0)));

    let progress: Vec<(u64, u64)> = sink
        .snapshot()
        .into_iter()
        .filter_map(|update| match update {
            UpdateMessage::NodeProgress {
                progress, total, ..
            } => Some((progress, total)),
            _ => None,
        })
        .collect();
    assert!(!progress.is_empty());
    assert_eq!(progress.last(), Some(&(250, 250)));
}

#[tokio::test(start_paused = true)]
async fn test_delay_observes_cancellation() {
    let node = DelayNode;
    let ctx = ProcessingContext::default();
    ctx.cancellation.cancel();

    let inputs = slots(vec![("duration_ms", Value::Number(60_000.0))]);
    let result = node.process(&ctx, inputs).await;
    assert!(matches!(result, Err(NodeError::Cancelled)));
}

#[test]
fn test_delay_validates_duration_property() {
    let node = DelayNode;
    let bad: HashMap<String, Value> =
        HashMap::from([("duration_ms".to_string(), Value::Number(-5.0))]);
    assert!(matches!(
        node.validate_properties(&bad),
        Err(NodeError::Property(_))
    ));
}

#[tokio::test]
async fn test_now_emits_rfc3339() {
    let node = NowNode;
    let ctx = ProcessingContext::default();

    let outputs = node.process(&ctx, HashMap::new()).await.unwrap();
    let timestamp = outputs.get("timestamp").and_then(|v| v.as_str()).unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
}

#[tokio::test]
async fn test_log_passes_message_through() {
    let node = LogNode;
    let ctx = ProcessingContext::default();
    assert!(!node.is_cacheable());

    let inputs = slots(vec![("message", Value::String("hello".to_string()))]);
    let outputs = node.process(&ctx, inputs).await.unwrap();
    assert_eq!(
        outputs.get("message").and_then(|v| v.as_str()),
        Some("hello")
    );
}
