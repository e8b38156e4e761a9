use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Role a node type plays at the graph boundary.
///
/// Input nodes receive caller parameters, Output nodes surface job results,
/// everything else is a processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Input,
    Output,
    Processor,
}

/// Declared input or output slot on a node type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotSpec {
    pub name: String,
    pub data_type: String,
    pub required: bool,
}

impl SlotSpec {
    pub fn required(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            required: false,
        }
    }
}

/// Static schema for a node type, declared by the plugin that registers it.
///
/// Output slot order matters: positional link references in imported graphs
/// resolve against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSchema {
    #[serde(rename = "type")]
    pub node_type: String,
    pub kind: NodeKind,
    pub description: String,
    pub category: String,
    pub inputs: Vec<SlotSpec>,
    pub outputs: Vec<SlotSpec>,
    /// Mutual-exclusion class: at most one node holding the same class
    /// runs at a time across a job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusive_resource: Option<String>,
}

impl NodeSchema {
    pub fn new(
        node_type: impl Into<String>,
        kind: NodeKind,
        description: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            node_type: node_type.into(),
            kind,
            description: description.into(),
            category: category.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            exclusive_resource: None,
        }
    }

    pub fn with_input(mut self, slot: SlotSpec) -> Self {
        self.inputs.push(slot);
        self
    }

    pub fn with_output(mut self, slot: SlotSpec) -> Self {
        self.outputs.push(slot);
        self
    }

    pub fn with_exclusive_resource(mut self, class: impl Into<String>) -> Self {
        self.exclusive_resource = Some(class.into());
        self
    }

    pub fn input(&self, name: &str) -> Option<&SlotSpec> {
        self.inputs.iter().find(|s| s.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&SlotSpec> {
        self.outputs.iter().find(|s| s.name == name)
    }

    /// Output slot by position, for index-based link resolution.
    pub fn output_at(&self, index: usize) -> Option<&SlotSpec> {
        self.outputs.get(index)
    }
}

/// Lookup of node type schemas. The runtime's registry implements this;
/// graph validation and import only need the lookup.
pub trait SchemaSource {
    fn schema_of(&self, node_type: &str) -> Option<NodeSchema>;
}

impl SchemaSource for HashMap<String, NodeSchema> {
    fn schema_of(&self, node_type: &str) -> Option<NodeSchema> {
        self.get(node_type).cloned()
    }
}

/// Graph-level parameter derived from an Input or Output kind node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub data_type: String,
    pub required: bool,
    /// Node the parameter binds to.
    pub node_id: String,
}
