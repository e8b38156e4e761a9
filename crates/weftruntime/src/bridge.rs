//! Threaded scheduler bridge.
//!
//! Transports and other subsystems live on their own runtimes and threads;
//! the bridge gives them one place to push scheduler work. It owns a
//! dedicated OS thread running a current-thread tokio runtime, accepts
//! futures and blocking closures from any thread, and hands back awaitable
//! handles. Stopping the bridge drains everything already accepted.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::thread;
use tokio::sync::{mpsc, oneshot};
use tokio_util::task::TaskTracker;
use weftcore::EngineError;

type BridgeTask = Box<dyn FnOnce(&TaskTracker) + Send + 'static>;

/// Handle to a value being produced on the bridge thread.
///
/// Await it from async code, or use [`BridgeHandle::join_blocking`] from a
/// plain thread.
pub struct BridgeHandle<T> {
    receiver: oneshot::Receiver<T>,
}

impl<T> BridgeHandle<T> {
    /// Block the calling thread until the value arrives. Must not be called
    /// from async context.
    pub fn join_blocking(self) -> weftcore::Result<T> {
        self.receiver
            .blocking_recv()
            .map_err(|_| EngineError::Execution("bridge task dropped before completing".to_string()))
    }
}

impl<T> Future for BridgeHandle<T> {
    type Output = weftcore::Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|result| {
            result.map_err(|_| {
                EngineError::Execution("bridge task dropped before completing".to_string())
            })
        })
    }
}

/// Owner of the scheduler thread
pub struct SchedulerBridge {
    sender: Option<mpsc::UnboundedSender<BridgeTask>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl SchedulerBridge {
    pub fn new() -> Self {
        Self {
            sender: None,
            thread: None,
        }
    }

    /// Spin up the scheduler thread. Callers serialize lifecycle calls;
    /// starting twice is an error.
    pub fn start(&mut self) -> weftcore::Result<()> {
        if self.thread.is_some() {
            return Err(EngineError::Execution("bridge already started".to_string()));
        }
        let (sender, mut receiver) = mpsc::unbounded_channel::<BridgeTask>();
        let thread = thread::Builder::new()
            .name("weft-scheduler".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        tracing::error!("Bridge runtime build failed: {}", e);
                        return;
                    }
                };
                runtime.block_on(async move {
                    let tracker = TaskTracker::new();
                    while let Some(task) = receiver.recv().await {
                        task(&tracker);
                    }
                    // Channel closed: accept no more work but finish what
                    // was already scheduled.
                    tracker.close();
                    tracker.wait().await;
                });
                tracing::debug!("Bridge thread exited");
            })?;
        self.sender = Some(sender);
        self.thread = Some(thread);
        tracing::info!("Scheduler bridge started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.sender.is_some()
    }

    /// Schedule a future onto the bridge runtime.
    pub fn schedule<F, T>(&self, future: F) -> weftcore::Result<BridgeHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| EngineError::Execution("bridge not started".to_string()))?;
        let (done, receiver) = oneshot::channel();
        let task: BridgeTask = Box::new(move |tracker| {
            tracker.spawn(async move {
                // Receiver may be gone; the caller stopped caring.
                let _ = done.send(future.await);
            });
        });
        sender
            .send(task)
            .map_err(|_| EngineError::Execution("bridge stopped".to_string()))?;
        Ok(BridgeHandle { receiver })
    }

    /// Run a blocking closure without stalling the bridge runtime.
    pub fn run_blocking<F, T>(&self, f: F) -> weftcore::Result<BridgeHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| EngineError::Execution("bridge not started".to_string()))?;
        let (done, receiver) = oneshot::channel();
        let task: BridgeTask = Box::new(move |tracker| {
            tracker.spawn(async move {
                if let Ok(value) = tokio::task::spawn_blocking(f).await {
                    let _ = done.send(value);
                }
            });
        });
        sender
            .send(task)
            .map_err(|_| EngineError::Execution("bridge stopped".to_string()))?;
        Ok(BridgeHandle { receiver })
    }

    /// Stop accepting work, drain accepted tasks, and join the thread.
    pub fn stop(&mut self) {
        self.sender = None;
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Bridge thread panicked");
            }
        }
        tracing::info!("Scheduler bridge stopped");
    }
}

impl Default for SchedulerBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SchedulerBridge {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop();
        }
    }
}
