use crate::graph::Graph;
use crate::update::JobStatus;
use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub type JobId = Uuid;

/// One submitted run of a graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub graph: Graph,
    pub params: HashMap<String, Value>,
    /// Identity of the submitting caller.
    pub owner: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(graph: Graph, params: HashMap<String, Value>, owner: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), graph, params, owner)
    }

    /// Build a job under a caller-chosen id. The isolation runner mints the
    /// id on the parent side so both processes agree on it.
    pub fn with_id(
        id: JobId,
        graph: Graph,
        params: HashMap<String, Value>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            id,
            graph,
            params,
            owner: owner.into(),
            status: JobStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

/// Submission payload accepted by every transport
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunJobRequest {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    pub job_type: String,
    /// Caller parameters bound onto the graph's Input nodes.
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
    /// Graph in any of the accepted import shapes.
    pub graph: serde_json::Value,
}

impl RunJobRequest {
    pub fn workflow(user_id: impl Into<String>, graph: serde_json::Value) -> Self {
        Self {
            user_id: user_id.into(),
            auth_token: None,
            workflow_id: None,
            job_type: "workflow".to_string(),
            params: HashMap::new(),
            graph,
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(name.into(), value);
        self
    }
}
