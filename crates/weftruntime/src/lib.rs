//! Workflow execution runtime
//!
//! This crate provides the execution engine that runs workflow graphs:
//! the node registry, the dependency-ordered scheduler, the result cache,
//! the process-isolation runner, and the threaded scheduler bridge.

mod bridge;
pub mod cache;
pub mod isolation;
mod registry;
mod runtime;
mod scheduler;

pub use bridge::{BridgeHandle, SchedulerBridge};
pub use cache::{Fingerprint, MemoryCache, RemoteCache, ResultCache};
pub use isolation::{run_worker, worker_stdio, IsolationConfig, IsolationRunner, JobPayload};
pub use registry::{NodeFactory, NodeRegistry};
pub use runtime::{Engine, EngineConfig};
pub use scheduler::{JobOutcome, Scheduler, SchedulerConfig};
