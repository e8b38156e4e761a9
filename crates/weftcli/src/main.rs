use anyhow::Result;
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use weftcore::{JobId, JobStatus, NodeStatus, RunJobRequest, UpdateMessage, UpdateSink};
use weftruntime::{Engine, EngineConfig, IsolationConfig, IsolationRunner, NodeRegistry};

#[derive(Parser)]
#[command(name = "weft")]
#[command(about = "Weft workflow engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a graph file
    Run {
        /// Path to graph JSON file (canonical, native or foreign shape)
        #[arg(short, long)]
        file: PathBuf,

        /// Caller parameters as a JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Run the job inside a worker child process
        #[arg(long)]
        isolate: bool,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a graph file
    Validate {
        /// Path to graph JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create a new example graph
    Init {
        /// Output file path
        #[arg(short, long, default_value = "graph.json")]
        output: PathBuf,
    },

    /// Run as a job worker speaking update frames on stdio
    #[command(hide = true)]
    Worker,
}

fn build_engine() -> Engine {
    let mut registry = NodeRegistry::new();
    weftnodes::register_all(&mut registry);
    Engine::with_registry(Arc::new(registry), EngineConfig::default())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            isolate,
            verbose,
        } => {
            let default_filter = if verbose { "debug" } else { "warn" };
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| EnvFilter::new(default_filter)),
                )
                .init();

            run_graph(file, input, isolate).await?;
        }

        Commands::Validate { file } => {
            validate_graph(file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_graph(output)?;
        }

        Commands::Worker => {
            // stdout carries update frames; logs must go to stderr
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
                )
                .with_writer(std::io::stderr)
                .init();

            let engine = build_engine();
            weftruntime::worker_stdio(&engine).await?;
        }
    }

    Ok(())
}

async fn run_graph(file: PathBuf, input: Option<String>, isolate: bool) -> Result<()> {
    println!("🚀 Loading graph from: {}", file.display());

    let graph_text = std::fs::read_to_string(&file)?;
    let graph_json: serde_json::Value = serde_json::from_str(&graph_text)?;

    let params: HashMap<String, serde_json::Value> = match input {
        Some(text) => {
            let json: serde_json::Value = serde_json::from_str(&text)?;
            match json {
                serde_json::Value::Object(map) => map.into_iter().collect(),
                _ => return Err(anyhow::anyhow!("input must be a JSON object")),
            }
        }
        None => HashMap::new(),
    };

    let engine = build_engine();
    let mut request = RunJobRequest::workflow("cli", graph_json);
    request.params = params;

    // Print updates as they stream in
    let mut updates = engine.subscribe_updates();
    let printer = tokio::spawn(async move {
        while let Ok(update) = updates.recv().await {
            print_update(&update);
            if update.is_terminal_job_update() {
                break;
            }
        }
    });

    if isolate {
        let runner = IsolationRunner::new(IsolationConfig::current_exe()?);
        let sink: Arc<dyn UpdateSink> = engine.bus().clone();
        let status = runner
            .run_job(JobId::new_v4(), request, sink, CancellationToken::new())
            .await?;
        let _ = printer.await;

        println!();
        match status {
            JobStatus::Completed => {
                println!("✨ Job completed in a worker process");
                Ok(())
            }
            status => Err(anyhow::anyhow!("job ended {status}")),
        }
    } else {
        let outcome = engine
            .run_request(request, CancellationToken::new())
            .await?;
        let _ = printer.await;

        println!();
        println!("📊 Execution Summary:");
        println!("   Job ID: {}", outcome.job_id);
        let completed = outcome
            .node_status
            .values()
            .filter(|status| **status == NodeStatus::Completed)
            .count();
        println!(
            "   Completed: {}/{} nodes",
            completed,
            outcome.node_status.len()
        );

        if !outcome.outputs.is_empty() {
            println!();
            println!("📤 Outputs:");
            let mut names: Vec<_> = outcome.outputs.keys().collect();
            names.sort();
            for name in names {
                println!("   {}: {}", name, outcome.outputs[name].to_json());
            }
        }

        match outcome.status {
            JobStatus::Completed => Ok(()),
            status => Err(anyhow::anyhow!("job ended {status}")),
        }
    }
}

fn print_update(update: &UpdateMessage) {
    match update {
        UpdateMessage::JobUpdate { status, error, .. } => match status {
            JobStatus::Running => println!("▶️  Job started"),
            JobStatus::Completed => println!("✨ Job completed"),
            JobStatus::Failed => println!(
                "💥 Job failed: {}",
                error.as_deref().unwrap_or("unknown error")
            ),
            JobStatus::Cancelled => println!("🛑 Job cancelled"),
            JobStatus::Pending => {}
        },
        UpdateMessage::NodeUpdate {
            node_name,
            status,
            error,
            ..
        } => match status {
            NodeStatus::Running => println!("  ⚡ {} running", node_name),
            NodeStatus::Completed => println!("  ✅ {} completed", node_name),
            NodeStatus::Failed => println!(
                "  ❌ {} failed: {}",
                node_name,
                error.as_deref().unwrap_or("unknown error")
            ),
            NodeStatus::Skipped => println!("  ⏭️  {} skipped", node_name),
            NodeStatus::Pending => {}
        },
        UpdateMessage::NodeProgress {
            node_id,
            progress,
            total,
        } => {
            println!("     📊 [{}] {}/{}", node_id, progress, total);
        }
        UpdateMessage::Error { message } => {
            println!("  ⚠️  {}", message);
        }
    }
}

fn validate_graph(file: PathBuf) -> Result<()> {
    println!("🔍 Validating graph: {}", file.display());

    let graph_text = std::fs::read_to_string(&file)?;
    let graph_json: serde_json::Value = serde_json::from_str(&graph_text)?;

    let engine = build_engine();
    let validated = engine.validate_graph(&graph_json)?;

    println!("✅ Graph is valid:");
    println!("   Nodes: {}", validated.len());
    println!("   Execution order: {}", validated.order().join(" -> "));

    let inputs = engine.describe_inputs(&graph_json)?;
    if !inputs.is_empty() {
        println!("   Parameters:");
        for spec in &inputs {
            let required = if spec.required { "required" } else { "optional" };
            println!("     • {} ({}, {})", spec.name, spec.data_type, required);
        }
    }
    if !engine.has_outputs(validated.graph()) {
        println!("   ⚠️  Graph has no output nodes; runs will produce no results");
    }

    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Types:");
    println!();

    let mut registry = NodeRegistry::new();
    weftnodes::register_all(&mut registry);

    for node_type in registry.list_node_types() {
        if let Some(schema) = registry.schema(&node_type) {
            println!("  • {} ({})", node_type, schema.category);
            println!("    {}", schema.description);
        } else {
            println!("  • {}", node_type);
        }
    }
}

fn create_example_graph(output: PathBuf) -> Result<()> {
    use weftcore::{Graph, NodeSpec};

    let mut graph = Graph::new();
    graph.add_node(NodeSpec::new("in", "input.parameter").with_property("name", "value"));
    graph.add_node(
        NodeSpec::new("add", "math.add")
            .with_name("Add Three")
            .with_property("addend", 3.0),
    );
    graph.add_node(NodeSpec::new("out", "output.result").with_property("name", "result"));
    graph.connect("in", "value", "add", "value");
    graph.connect("add", "sum", "out", "value");

    let json = serde_json::to_string_pretty(&graph)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example graph: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  weft run --file {} --input '{{\"value\": 5}}'",
        output.display()
    );

    Ok(())
}
