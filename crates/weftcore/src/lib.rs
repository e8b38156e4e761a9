//! Core abstractions for the weft workflow engine
//!
//! This crate provides the fundamental types the other components depend on:
//! the graph model and its validation, the node execution contract, the
//! update protocol with its binary framing, and the job submission types.

mod error;
pub mod graph;
pub mod import;
mod job;
mod node;
pub mod schema;
pub mod update;
mod value;

pub use error::{EngineError, GraphError, NodeError};
pub use graph::{Edge, Graph, NodeSpec, RetryPolicy, ValidatedGraph};
pub use job::{Job, JobId, RunJobRequest};
pub use node::{Collaborators, Node, ProcessingContext, SlotValues, SlotValuesExt};
pub use schema::{NodeKind, NodeSchema, ParameterSpec, SchemaSource, SlotSpec};
pub use update::{
    ChannelSink, JobStatus, MemorySink, NodeStatus, UpdateBus, UpdateMessage, UpdateSink,
};
pub use value::Value;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
