//! Process isolation for job execution.
//!
//! Each job runs in a dedicated child process: the parent writes one job
//! payload frame to the child's stdin, then pumps binary update frames from
//! its stdout into the caller's sink. A child that dies without a terminal
//! JobUpdate is reported as a failed job, never silently dropped; a
//! cancelled job kills the child outright.

use crate::runtime::Engine;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::Command;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use weftcore::update::{self, UpdateBus};
use weftcore::{EngineError, JobId, JobStatus, RunJobRequest, UpdateMessage, UpdateSink};

/// Frame written to a worker's stdin. JSON rather than the binary update
/// encoding because graph payloads carry arbitrary JSON values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    pub job_id: JobId,
    pub request: RunJobRequest,
}

/// Configuration for spawning job worker processes
#[derive(Debug, Clone)]
pub struct IsolationConfig {
    /// Binary to spawn; it must speak the worker stdio protocol.
    pub worker_program: PathBuf,
    pub worker_args: Vec<String>,
    /// Parent-side queue between the pipe reader and the forwarding loop.
    /// When it fills, the reader blocks and the child backs up on its pipe.
    pub queue_capacity: usize,
    /// Poll interval when the queue is empty; doubles up to the ceiling.
    pub poll_interval: Duration,
    pub max_poll_interval: Duration,
}

impl IsolationConfig {
    pub fn new(worker_program: impl Into<PathBuf>) -> Self {
        Self {
            worker_program: worker_program.into(),
            worker_args: vec!["worker".to_string()],
            queue_capacity: 256,
            poll_interval: Duration::from_millis(10),
            max_poll_interval: Duration::from_millis(200),
        }
    }

    /// Re-spawn the currently running binary with the `worker` subcommand.
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.worker_args = args;
        self
    }
}

/// Runs exactly one job inside a dedicated child process
pub struct IsolationRunner {
    config: IsolationConfig,
}

impl IsolationRunner {
    pub fn new(config: IsolationConfig) -> Self {
        Self { config }
    }

    /// Spawn a worker for this job and pump its updates into `sink` until a
    /// terminal JobUpdate arrives, the child dies, or `cancel` fires.
    /// Returns the terminal status the caller observed.
    pub async fn run_job(
        &self,
        job_id: JobId,
        request: RunJobRequest,
        sink: Arc<dyn UpdateSink>,
        cancel: CancellationToken,
    ) -> weftcore::Result<JobStatus> {
        let mut child = Command::new(&self.config.worker_program)
            .args(&self.config.worker_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        tracing::info!(job = %job_id, pid = ?child.id(), "Spawned job worker");

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Execution("worker stdin unavailable".to_string()))?;
        let payload = JobPayload { job_id, request };
        let payload_bytes = serde_json::to_vec(&payload)?;
        update::write_frame(&mut stdin, &payload_bytes).await?;
        // One job per worker: close stdin so the child sees EOF after the
        // payload.
        drop(stdin);

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::warn!(job = %job_id, "worker stderr: {}", line);
                }
            });
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Execution("worker stdout unavailable".to_string()))?;
        let (tx, mut rx) = mpsc::channel::<UpdateMessage>(self.config.queue_capacity);
        let reader = tokio::spawn(async move {
            let mut stdout = stdout;
            loop {
                match update::read_frame(&mut stdout).await {
                    Ok(Some(bytes)) => match update::decode_update(&bytes) {
                        Ok(update) => {
                            if tx.send(update).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(job = %job_id, "Undecodable worker frame: {}", e);
                        }
                    },
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(job = %job_id, "Worker pipe read failed: {}", e);
                        break;
                    }
                }
            }
        });

        // Forward updates until the stream ends. The reader dropping its
        // sender turns try_recv into Disconnected once the queue is drained,
        // so no update is lost.
        let mut terminal: Option<JobStatus> = None;
        let mut interval = self.config.poll_interval;
        loop {
            if cancel.is_cancelled() {
                tracing::info!(job = %job_id, "Cancelling job; killing worker");
                let _ = child.start_kill();
                sink.post(UpdateMessage::JobUpdate {
                    job_id,
                    status: JobStatus::Cancelled,
                    error: None,
                });
                terminal = Some(JobStatus::Cancelled);
                break;
            }
            match rx.try_recv() {
                Ok(update) => {
                    interval = self.config.poll_interval;
                    let reached = match &update {
                        UpdateMessage::JobUpdate { status, .. } if status.is_terminal() => {
                            Some(*status)
                        }
                        _ => None,
                    };
                    sink.post(update);
                    if reached.is_some() {
                        terminal = reached;
                        break;
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => {
                    sleep(interval).await;
                    interval = (interval * 2).min(self.config.max_poll_interval);
                }
                Err(mpsc::error::TryRecvError::Disconnected) => break,
            }
        }

        let _ = child.start_kill();
        let exit = child.wait().await;
        reader.abort();

        match terminal {
            Some(status) => {
                tracing::info!(job = %job_id, %status, "Worker finished");
                Ok(status)
            }
            None => {
                let detail = match exit {
                    Ok(code) => format!("worker exited unexpectedly ({code})"),
                    Err(e) => format!("worker could not be reaped: {e}"),
                };
                tracing::error!(job = %job_id, "{}", detail);
                sink.post(UpdateMessage::JobUpdate {
                    job_id,
                    status: JobStatus::Failed,
                    error: Some(detail),
                });
                Ok(JobStatus::Failed)
            }
        }
    }
}

/// Child-side entry: read one job payload frame, run it, and stream update
/// frames back until the terminal JobUpdate has been written.
pub async fn run_worker<R, W>(engine: &Engine, mut reader: R, writer: W) -> weftcore::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let Some(payload_bytes) = update::read_frame(&mut reader).await? else {
        return Err(EngineError::Execution("missing job payload frame".to_string()));
    };
    let payload: JobPayload = serde_json::from_slice(&payload_bytes)?;
    let job_id = payload.job_id;
    tracing::info!(job = %job_id, "Worker received job payload");

    let bus = Arc::new(UpdateBus::new(engine.config().update_capacity));
    let mut updates = bus.subscribe();
    let writer_task = tokio::spawn(async move {
        let mut writer = writer;
        loop {
            match updates.recv().await {
                Ok(update) => {
                    let done = update.is_terminal_job_update();
                    let bytes = match update::encode_update(&update) {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            tracing::warn!("Skipping unencodable update: {}", e);
                            continue;
                        }
                    };
                    if update::write_frame(&mut writer, &bytes).await.is_err() {
                        break;
                    }
                    if done {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(dropped = n, "Update writer lagged; oldest updates dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let sink: Arc<dyn UpdateSink> = bus.clone();
    let result = engine
        .execute(job_id, payload.request, sink, CancellationToken::new())
        .await;
    // execute posts a terminal update on every path, so the writer drains
    // and exits on its own.
    let _ = writer_task.await;
    result.map(|_| ())
}

/// Run one job over this process's stdin and stdout; the body of the
/// `worker` subcommand.
pub async fn worker_stdio(engine: &Engine) -> weftcore::Result<()> {
    run_worker(engine, tokio::io::stdin(), tokio::io::stdout()).await
}
