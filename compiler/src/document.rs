// document.rs — JSON graph documents
//
// The on-disk form of a graph: declared variables, nodes with author-chosen
// string ids, and links written as `"node.pin"` endpoints. Loading restores
// links without schema checks, then runs reconstruct so construct and generic
// pins pick up their types, the way a saved graph is reopened.
//
// Preconditions: primitives named by `call` nodes exist in the registry.
// Postconditions: `load` yields a reconstructed graph plus the id mapping.
// Failure modes: malformed JSON, unknown names, bad endpoints → `DocumentError`.
// Side effects: none.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::construct::{Construct, ForEachMap};
use crate::graph::{pn, ConnectError, Graph, NodeKind, PinDirection, VariableDecl};
use crate::id::NodeId;
use crate::registry::{Registry, RegistryError};
use crate::types::PinType;

// ── Document types ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    #[serde(default)]
    pub variables: Vec<VariableDecl>,
    pub nodes: Vec<NodeDoc>,
    #[serde(default)]
    pub links: Vec<LinkDoc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDoc {
    pub id: String,
    #[serde(flatten)]
    pub kind: KindDoc,
    /// Literal values of unlinked input pins, by pin name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub defaults: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KindDoc {
    ForEachMap,
    Event {
        name: String,
    },
    Call {
        function: String,
    },
    Temporary {
        #[serde(rename = "type")]
        ty: PinType,
    },
    Assignment,
    Branch,
    Sequence {
        outputs: usize,
    },
    GetArrayItem,
    VariableGet {
        variable: String,
    },
    Probe {
        label: String,
        #[serde(default)]
        inputs: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkDoc {
    pub from: String,
    pub to: String,
}

// ── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("invalid graph document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),
    #[error("node '{node}': {source}")]
    Primitive {
        node: String,
        #[source]
        source: RegistryError,
    },
    #[error("node '{node}' reads undeclared variable '{variable}'")]
    UnknownVariable { node: String, variable: String },
    #[error("malformed endpoint '{0}', expected 'node.pin'")]
    BadEndpoint(String),
    #[error("unknown node '{0}'")]
    UnknownNode(String),
    #[error("node '{node}' has no pin '{pin}'")]
    UnknownPin { node: String, pin: String },
    #[error("link {from} -> {to}: {source}")]
    Link {
        from: String,
        to: String,
        #[source]
        source: ConnectError,
    },
}

// ── Loading ─────────────────────────────────────────────────────────────────

/// A loaded graph and the document id of each node.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub graph: Graph,
    pub ids: BTreeMap<String, NodeId>,
}

impl LoadedDocument {
    pub fn node(&self, id: &str) -> Option<NodeId> {
        self.ids.get(id).copied()
    }
}

pub fn parse(text: &str) -> Result<GraphDocument, DocumentError> {
    Ok(serde_json::from_str(text)?)
}

/// Parse and build a graph from document text.
pub fn load(text: &str, registry: &Registry) -> Result<LoadedDocument, DocumentError> {
    build(&parse(text)?, registry)
}

/// Build a graph from a parsed document.
pub fn build(doc: &GraphDocument, registry: &Registry) -> Result<LoadedDocument, DocumentError> {
    let mut graph = Graph::new();
    for var in &doc.variables {
        graph.declare_variable(var.clone());
    }

    let mut ids = BTreeMap::new();
    for node in &doc.nodes {
        if ids.contains_key(&node.id) {
            return Err(DocumentError::DuplicateNode(node.id.clone()));
        }
        let id = spawn(&mut graph, node, registry)?;
        for (pin, value) in &node.defaults {
            let pin_id = graph
                .find_pin(id, pin)
                .ok_or_else(|| DocumentError::UnknownPin {
                    node: node.id.clone(),
                    pin: pin.clone(),
                })?;
            graph.set_default_value(pin_id, value);
        }
        ids.insert(node.id.clone(), id);
    }

    for link in &doc.links {
        let from = resolve_endpoint(&graph, &ids, &link.from)?;
        let to = resolve_endpoint(&graph, &ids, &link.to)?;
        graph
            .insert_link_unchecked(from, to)
            .map_err(|source| DocumentError::Link {
                from: link.from.clone(),
                to: link.to.clone(),
                source,
            })?;
    }

    graph.reconstruct_all();
    tracing::debug!(
        nodes = graph.node_count(),
        links = graph.links().len(),
        "loaded graph document"
    );
    Ok(LoadedDocument { graph, ids })
}

fn spawn(graph: &mut Graph, node: &NodeDoc, registry: &Registry) -> Result<NodeId, DocumentError> {
    let id = match &node.kind {
        KindDoc::ForEachMap => graph.spawn_construct(Construct::ForEachMap(ForEachMap::new())),
        KindDoc::Event { name } => graph.spawn_event(name),
        KindDoc::Call { function } => {
            let sig = registry
                .lookup_checked(function)
                .map_err(|source| DocumentError::Primitive {
                    node: node.id.clone(),
                    source,
                })?;
            graph.spawn_call(sig)
        }
        KindDoc::Temporary { ty } => graph.spawn_temporary(ty.clone()),
        KindDoc::Assignment => graph.spawn_assignment(),
        KindDoc::Branch => graph.spawn_branch(),
        KindDoc::Sequence { outputs } => graph.spawn_sequence(*outputs),
        KindDoc::GetArrayItem => graph.spawn_get_array_item(),
        KindDoc::VariableGet { variable } => {
            graph
                .spawn_variable_get(variable)
                .ok_or_else(|| DocumentError::UnknownVariable {
                    node: node.id.clone(),
                    variable: variable.clone(),
                })?
        }
        KindDoc::Probe { label, inputs } => {
            let names: Vec<&str> = inputs.iter().map(String::as_str).collect();
            graph.spawn_probe(label, &names)
        }
    };
    Ok(id)
}

fn resolve_endpoint(
    graph: &Graph,
    ids: &BTreeMap<String, NodeId>,
    endpoint: &str,
) -> Result<crate::id::PinId, DocumentError> {
    let (node, pin) = endpoint
        .split_once('.')
        .ok_or_else(|| DocumentError::BadEndpoint(endpoint.to_string()))?;
    let id = ids
        .get(node)
        .ok_or_else(|| DocumentError::UnknownNode(node.to_string()))?;
    graph
        .find_pin(*id, pin)
        .ok_or_else(|| DocumentError::UnknownPin {
            node: node.to_string(),
            pin: pin.to_string(),
        })
}

// ── Saving ──────────────────────────────────────────────────────────────────

/// Describe a graph as a document. Node ids are the graph's own (`n7`).
pub fn to_document(graph: &Graph) -> GraphDocument {
    let nodes = graph
        .nodes()
        .map(|node| {
            let kind = match &node.kind {
                NodeKind::Construct(Construct::ForEachMap(_)) => KindDoc::ForEachMap,
                NodeKind::Event { name } => KindDoc::Event { name: name.clone() },
                NodeKind::CallFunction { function, .. } => KindDoc::Call {
                    function: function.clone(),
                },
                NodeKind::TemporaryVariable { variable_type } => KindDoc::Temporary {
                    ty: variable_type.clone(),
                },
                NodeKind::Assignment => KindDoc::Assignment,
                NodeKind::Branch => KindDoc::Branch,
                NodeKind::Sequence { outputs } => KindDoc::Sequence { outputs: *outputs },
                NodeKind::GetArrayItem => KindDoc::GetArrayItem,
                NodeKind::VariableGet { variable } => KindDoc::VariableGet {
                    variable: variable.clone(),
                },
                NodeKind::Probe { label } => KindDoc::Probe {
                    label: label.clone(),
                    inputs: graph
                        .pins_of(node.id)
                        .filter(|p| p.direction == PinDirection::Input && p.name != pn::EXECUTE)
                        .map(|p| p.name.clone())
                        .collect(),
                },
            };
            let defaults = graph
                .pins_of(node.id)
                .filter_map(|p| p.default_value.clone().map(|v| (p.name.clone(), v)))
                .collect();
            NodeDoc {
                id: node.id.to_string(),
                kind,
                defaults,
            }
        })
        .collect();

    let mut links = graph.links().to_vec();
    links.sort();
    let links = links
        .into_iter()
        .map(|l| LinkDoc {
            from: graph.describe_pin(l.from),
            to: graph.describe_pin(l.to),
        })
        .collect();

    GraphDocument {
        variables: graph.variables().cloned().collect(),
        nodes,
        links,
    }
}

/// Pretty-printed JSON for a graph.
pub fn to_json(graph: &Graph) -> Result<String, DocumentError> {
    Ok(serde_json::to_string_pretty(&to_document(graph))?)
}
