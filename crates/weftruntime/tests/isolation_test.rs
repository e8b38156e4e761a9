// Worker protocol and child process management. The in-process worker loop
// is exercised over a duplex pipe; the runner tests spawn real commands that
// misbehave in controlled ways.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use weftcore::update::{read_frame, write_frame};
use weftcore::{
    Graph, JobStatus, MemorySink, Node, NodeError, NodeKind, NodeSchema, NodeSpec,
    ProcessingContext, RunJobRequest, SlotSpec, SlotValues, UpdateMessage, Value,
};
use weftruntime::{
    run_worker, Engine, EngineConfig, IsolationConfig, IsolationRunner, JobPayload, NodeFactory,
    NodeRegistry,
};

/// Emits a constant; just enough to drive a run end to end.
struct EchoNode;

#[async_trait]
impl Node for EchoNode {
    fn node_type(&self) -> &str {
        "test.echo"
    }

    async fn process(
        &self,
        _ctx: &ProcessingContext,
        _inputs: SlotValues,
    ) -> Result<SlotValues, NodeError> {
        Ok(HashMap::from([(
            "out".to_string(),
            Value::String("echo".to_string()),
        )]))
    }
}

struct EchoFactory;

impl NodeFactory for EchoFactory {
    fn node_type(&self) -> &str {
        "test.echo"
    }

    fn schema(&self) -> NodeSchema {
        NodeSchema::new("test.echo", NodeKind::Processor, "Emits a constant", "test")
            .with_output(SlotSpec::required("out", "string"))
    }

    fn create(&self, _properties: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(EchoNode))
    }
}

fn engine() -> Engine {
    let mut registry = NodeRegistry::new();
    registry.register(Arc::new(EchoFactory));
    Engine::with_registry(Arc::new(registry), EngineConfig::default())
}

fn echo_request() -> RunJobRequest {
    let mut graph = Graph::new();
    graph.add_node(NodeSpec::new("echo", "test.echo"));
    RunJobRequest::workflow("tester", serde_json::to_value(&graph).unwrap())
}

#[tokio::test]
async fn test_worker_streams_update_frames_until_terminal() {
    let engine = engine();
    let job_id = Uuid::new_v4();
    let payload = JobPayload {
        job_id,
        request: echo_request(),
    };

    let (mut client, server) = tokio::io::duplex(64 * 1024);
    let payload_bytes = serde_json::to_vec(&payload).unwrap();
    write_frame(&mut client, &payload_bytes).await.unwrap();

    let (server_read, server_write) = tokio::io::split(server);
    run_worker(&engine, server_read, server_write)
        .await
        .unwrap();

    let mut updates = Vec::new();
    while let Some(frame) = read_frame(&mut client).await.unwrap() {
        let update = weftcore::update::decode_update(&frame).unwrap();
        let done = update.is_terminal_job_update();
        updates.push(update);
        if done {
            break;
        }
    }

    let steps: Vec<String> = updates
        .iter()
        .map(|update| match update {
            UpdateMessage::JobUpdate { status, .. } => format!("job:{status}"),
            UpdateMessage::NodeUpdate {
                node_id, status, ..
            } => format!("node:{node_id}:{status}"),
            UpdateMessage::NodeProgress { node_id, .. } => format!("progress:{node_id}"),
            UpdateMessage::Error { .. } => "error".to_string(),
        })
        .collect();
    assert_eq!(
        steps,
        vec![
            "job:running",
            "node:echo:running",
            "node:echo:completed",
            "job:completed",
        ]
    );

    // Every job update carries the id minted on the parent side.
    for update in &updates {
        if let UpdateMessage::JobUpdate { job_id: id, .. } = update {
            assert_eq!(*id, job_id);
        }
    }
}

#[tokio::test]
async fn test_worker_rejects_a_missing_payload_frame() {
    let engine = engine();
    let (client, server) = tokio::io::duplex(1024);
    // EOF before any payload frame.
    drop(client);

    let (server_read, server_write) = tokio::io::split(server);
    let err = run_worker(&engine, server_read, server_write)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("missing job payload"));
}

#[tokio::test]
async fn test_child_dying_without_terminal_reports_a_failed_job() {
    // A child that swallows stdin and says nothing on stdout.
    let config =
        IsolationConfig::new("sh").with_args(vec!["-c".to_string(), "cat > /dev/null".to_string()]);
    let runner = IsolationRunner::new(config);
    let sink = Arc::new(MemorySink::new());

    let status = runner
        .run_job(
            Uuid::new_v4(),
            echo_request(),
            sink.clone(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(status, JobStatus::Failed);
    let updates = sink.snapshot();
    assert_eq!(updates.len(), 1);
    match &updates[0] {
        UpdateMessage::JobUpdate { status, error, .. } => {
            assert_eq!(*status, JobStatus::Failed);
            assert!(error.as_deref().unwrap_or("").contains("worker exited"));
        }
        other => panic!("expected a terminal job update, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cancellation_kills_the_worker_and_reports_cancelled() {
    let config = IsolationConfig::new("sleep").with_args(vec!["5".to_string()]);
    let runner = IsolationRunner::new(config);
    let sink = Arc::new(MemorySink::new());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let status = runner
        .run_job(Uuid::new_v4(), echo_request(), sink.clone(), cancel)
        .await
        .unwrap();

    assert_eq!(status, JobStatus::Cancelled);
    let updates = sink.snapshot();
    assert_eq!(updates.len(), 1);
    assert!(matches!(
        updates[0],
        UpdateMessage::JobUpdate {
            status: JobStatus::Cancelled,
            ..
        }
    ));
}
