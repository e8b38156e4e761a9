//! WebSocket job sessions.
//!
//! A session accepts JSON text commands and streams binary update frames
//! back. One job runs per session at a time; its terminal JobUpdate frees
//! the slot. Cancelling with nothing running answers an Error frame without
//! tearing the session down.

use crate::AppState;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_ws::{Message, MessageStream, Session};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use weftcore::update::encode_update;
use weftcore::{ChannelSink, JobId, RunJobRequest, UpdateMessage, UpdateSink};
use weftruntime::IsolationRunner;

/// Commands a client may send over the session socket
#[derive(Debug, Deserialize)]
#[serde(tag = "command", content = "data", rename_all = "snake_case")]
pub enum SessionCommand {
    RunJob(RunJobRequest),
    CancelJob,
}

struct ActiveJob {
    job_id: JobId,
    cancel: CancellationToken,
}

/// Tracks which session runs which job and how to cancel it.
///
/// Constructed once in `main` and handed to the transport; there is no
/// global instance.
pub struct SessionManager {
    accepting: AtomicBool,
    active: RwLock<HashMap<Uuid, ActiveJob>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            accepting: AtomicBool::new(false),
            active: RwLock::new(HashMap::new()),
        }
    }

    /// Begin accepting job registrations.
    pub fn start(&self) {
        self.accepting.store(true, Ordering::SeqCst);
        tracing::info!("Session manager started");
    }

    /// Refuse new jobs and cancel every active one.
    pub async fn stop(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        let mut active = self.active.write().await;
        for (session_id, job) in active.drain() {
            tracing::info!(
                session = %session_id,
                job = %job.job_id,
                "Cancelling job at shutdown"
            );
            job.cancel.cancel();
        }
        tracing::info!("Session manager stopped");
    }

    /// Claim the session's job slot. One job per session: false when the
    /// session already runs one or the manager is shut down.
    pub async fn begin_job(
        &self,
        session_id: Uuid,
        job_id: JobId,
        cancel: CancellationToken,
    ) -> bool {
        if !self.accepting.load(Ordering::SeqCst) {
            return false;
        }
        let mut active = self.active.write().await;
        if active.contains_key(&session_id) {
            return false;
        }
        active.insert(session_id, ActiveJob { job_id, cancel });
        true
    }

    /// Release the session's job slot.
    pub async fn finish_job(&self, session_id: Uuid) {
        self.active.write().await.remove(&session_id);
    }

    /// Cancel the session's active job. False when nothing is running.
    pub async fn cancel_job(&self, session_id: Uuid) -> bool {
        let active = self.active.read().await;
        match active.get(&session_id) {
            Some(job) => {
                tracing::info!(
                    session = %session_id,
                    job = %job.job_id,
                    "Cancellation requested"
                );
                job.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn active_job(&self, session_id: Uuid) -> Option<JobId> {
        self.active
            .read()
            .await
            .get(&session_id)
            .map(|job| job.job_id)
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Upgrade the request and hand the socket to a session task.
pub async fn run_session(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> actix_web::Result<HttpResponse> {
    let (response, session, msg_stream) = actix_ws::handle(&req, stream)?;
    let session_id = Uuid::new_v4();
    actix_web::rt::spawn(session_loop(state, session_id, session, msg_stream));
    Ok(response)
}

async fn session_loop(
    state: web::Data<AppState>,
    session_id: Uuid,
    mut session: Session,
    mut msg_stream: MessageStream,
) {
    tracing::info!(session = %session_id, "Session connected");
    // Jobs post updates into this channel; the loop owns the sender, so the
    // recv branch stays pending rather than closing between jobs.
    let (update_tx, mut update_rx) = mpsc::unbounded_channel::<UpdateMessage>();

    loop {
        tokio::select! {
            Some(update) = update_rx.recv() => {
                let terminal = update.is_terminal_job_update();
                match encode_update(&update) {
                    Ok(frame) => {
                        if session.binary(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(session = %session_id, "Dropping unencodable update: {}", e);
                    }
                }
                if terminal {
                    state.sessions.finish_job(session_id).await;
                }
            }
            msg = msg_stream.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_command(&state, session_id, &update_tx, &mut session, &text).await;
                    }
                    Some(Ok(Message::Ping(bytes))) => {
                        if session.pong(&bytes).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(session = %session_id, "Session protocol error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    // A running job keeps going detached; only the registration goes away.
    state.sessions.finish_job(session_id).await;
    tracing::info!(session = %session_id, "Session disconnected");
    let _ = session.close(None).await;
}

async fn handle_command(
    state: &web::Data<AppState>,
    session_id: Uuid,
    update_tx: &mpsc::UnboundedSender<UpdateMessage>,
    session: &mut Session,
    text: &str,
) {
    match serde_json::from_str::<SessionCommand>(text) {
        Ok(SessionCommand::RunJob(request)) => {
            start_job(state, session_id, update_tx.clone(), session, request).await;
        }
        Ok(SessionCommand::CancelJob) => {
            if !state.sessions.cancel_job(session_id).await {
                send_error(session, "no active job").await;
            }
        }
        Err(e) => {
            send_error(session, &format!("unrecognized command: {e}")).await;
        }
    }
}

async fn start_job(
    state: &web::Data<AppState>,
    session_id: Uuid,
    update_tx: mpsc::UnboundedSender<UpdateMessage>,
    session: &mut Session,
    request: RunJobRequest,
) {
    let job_id = JobId::new_v4();
    let cancel = CancellationToken::new();
    if !state
        .sessions
        .begin_job(session_id, job_id, cancel.clone())
        .await
    {
        send_error(session, "job already running").await;
        return;
    }
    tracing::info!(session = %session_id, job = %job_id, "Job accepted");

    let sink: Arc<dyn UpdateSink> = Arc::new(ChannelSink::new(update_tx));
    let engine = state.engine.clone();
    let isolation = state.isolation.clone();
    let job = async move {
        let outcome = match isolation {
            Some(config) => IsolationRunner::new(config)
                .run_job(job_id, request, sink, cancel)
                .await
                .map(|status| status.to_string()),
            None => engine
                .execute(job_id, request, sink, cancel)
                .await
                .map(|outcome| outcome.status.to_string()),
        };
        match outcome {
            Ok(status) => tracing::info!(job = %job_id, %status, "Job finished"),
            Err(e) => tracing::warn!(job = %job_id, "Job ended with error: {}", e),
        }
    };

    if let Err(e) = state.bridge.schedule(job) {
        tracing::error!(session = %session_id, "Could not schedule job: {}", e);
        state.sessions.finish_job(session_id).await;
        send_error(session, "scheduler unavailable").await;
    }
}

async fn send_error(session: &mut Session, message: &str) {
    let update = UpdateMessage::Error {
        message: message.to_string(),
    };
    if let Ok(frame) = encode_update(&update) {
        let _ = session.binary(frame).await;
    }
}
