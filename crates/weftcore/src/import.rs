//! Graph import.
//!
//! Three payload shapes are accepted and normalized into [`Graph`]:
//! the canonical `{nodes, edges}` form, a native dictionary keyed by node id
//! with name-based links, and a foreign dictionary with index-based links
//! that are resolved positionally against the declared output slots.

use crate::graph::{Edge, Graph, NodeSpec};
use crate::schema::SchemaSource;
use crate::value::Value;
use crate::GraphError;
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// Normalize any accepted payload shape into a canonical graph.
/// The result still needs [`Graph::validate`].
pub fn graph_from_json(
    json: &JsonValue,
    schemas: &dyn SchemaSource,
) -> Result<Graph, GraphError> {
    let object = json
        .as_object()
        .ok_or_else(|| GraphError::Invalid("graph payload must be a JSON object".to_string()))?;
    if object.contains_key("nodes") {
        return from_canonical(json);
    }
    from_dictionary(object, schemas)
}

fn from_canonical(json: &JsonValue) -> Result<Graph, GraphError> {
    serde_json::from_value(json.clone())
        .map_err(|e| GraphError::Invalid(format!("canonical graph: {e}")))
}

/// A link reference found in a dictionary-shaped payload
enum LinkRef {
    /// `[sourceId, "slotName"]`
    Named(String, String),
    /// `[sourceId, slotIndex]`
    Indexed(String, usize),
}

fn from_dictionary(
    object: &serde_json::Map<String, JsonValue>,
    schemas: &dyn SchemaSource,
) -> Result<Graph, GraphError> {
    // First pass: create every node so links can be resolved against the
    // source node's type regardless of declaration order.
    let mut graph = Graph::new();
    let mut links: Vec<(String, String, LinkRef)> = Vec::new();

    for (id, body) in object {
        let body = body.as_object().ok_or_else(|| {
            GraphError::Invalid(format!("node '{id}' must be a JSON object"))
        })?;

        let (node_type, name, data) = if let Some(class) = body.get("class_type") {
            let node_type = class.as_str().ok_or_else(|| {
                GraphError::Invalid(format!("node '{id}': class_type must be a string"))
            })?;
            let name = body
                .get("_meta")
                .and_then(|m| m.get("title"))
                .and_then(JsonValue::as_str)
                .map(str::to_string);
            (node_type.to_string(), name, body.get("inputs"))
        } else if let Some(kind) = body.get("type") {
            let node_type = kind.as_str().ok_or_else(|| {
                GraphError::Invalid(format!("node '{id}': type must be a string"))
            })?;
            let name = body
                .get("name")
                .and_then(JsonValue::as_str)
                .map(str::to_string);
            (node_type.to_string(), name, body.get("data"))
        } else {
            return Err(GraphError::Invalid(format!(
                "node '{id}' has neither 'type' nor 'class_type'"
            )));
        };

        let foreign = body.contains_key("class_type");
        let mut spec = NodeSpec::new(id.clone(), node_type);
        spec.name = name;

        if let Some(data) = data {
            let entries = data.as_object().ok_or_else(|| {
                GraphError::Invalid(format!("node '{id}': inputs must be a JSON object"))
            })?;
            for (slot, raw) in entries {
                match parse_link(raw, foreign) {
                    Some(link) => links.push((id.clone(), slot.clone(), link)),
                    None => {
                        spec.properties
                            .insert(slot.clone(), Value::from_json(raw.clone()));
                    }
                }
            }
        }
        graph.add_node(spec);
    }

    // Second pass: turn link references into edges.
    let node_types: HashMap<String, String> = graph
        .nodes
        .iter()
        .map(|n| (n.id.clone(), n.node_type.clone()))
        .collect();

    for (target, target_slot, link) in links {
        let edge_id = format!("e{}", graph.edges.len());
        let (source, source_slot) = match link {
            LinkRef::Named(source, slot) => (source, slot),
            LinkRef::Indexed(source, index) => {
                let source_type =
                    node_types
                        .get(&source)
                        .ok_or_else(|| GraphError::UnknownNode {
                            edge: edge_id.clone(),
                            node: source.clone(),
                        })?;
                let schema = schemas
                    .schema_of(source_type)
                    .ok_or_else(|| GraphError::UnknownNodeType(source_type.clone()))?;
                let slot = schema.output_at(index).ok_or_else(|| {
                    GraphError::InvalidLink(format!(
                        "node '{source}' ({source_type}) has no output slot {index}"
                    ))
                })?;
                (source, slot.name.clone())
            }
        };
        if !node_types.contains_key(&source) {
            return Err(GraphError::UnknownNode {
                edge: edge_id,
                node: source,
            });
        }
        graph.add_edge(Edge {
            id: edge_id,
            source,
            source_slot,
            target,
            target_slot,
        });
    }

    Ok(graph)
}

/// A two-element array `[string, string]` (native) or `[string, integer]`
/// (foreign) is a link; anything else is a literal value.
fn parse_link(raw: &JsonValue, foreign: bool) -> Option<LinkRef> {
    let items = raw.as_array()?;
    if items.len() != 2 {
        return None;
    }
    let source = items[0].as_str()?;
    if foreign {
        let index = items[1].as_u64()?;
        Some(LinkRef::Indexed(source.to_string(), index as usize))
    } else {
        let slot = items[1].as_str()?;
        Some(LinkRef::Named(source.to_string(), slot.to_string()))
    }
}
