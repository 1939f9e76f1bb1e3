// dot.rs — Graphviz DOT output for node graphs
//
// Transforms a Graph into DOT format suitable for rendering with `dot`,
// `neato`, or other Graphviz layout engines. Nodes spawned while lowering a
// construct are grouped into a cluster labelled with that construct.
//
// Preconditions: none; any graph (lowered or not) can be rendered.
// Postconditions: returns a valid DOT string representing the graph.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write;

use crate::graph::{Graph, Link, Node, NodeKind};
use crate::id::NodeId;

/// Emit the graph as a Graphviz DOT string.
pub fn emit_dot(graph: &Graph) -> String {
    let mut buf = String::new();
    writeln!(buf, "digraph fmc {{").unwrap();
    writeln!(buf, "    rankdir=LR;").unwrap();
    writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];").unwrap();
    writeln!(buf, "    edge [fontname=\"Helvetica\", fontsize=9];").unwrap();

    // Group intermediates by the construct they were spawned for
    let mut clusters: BTreeMap<NodeId, Vec<&Node>> = BTreeMap::new();
    let mut loose = Vec::new();
    for node in graph.nodes() {
        match node.spawned_from {
            Some(src) => clusters.entry(src).or_default().push(node),
            None => loose.push(node),
        }
    }

    writeln!(buf).unwrap();
    for node in &loose {
        writeln!(buf, "    {} [{}];", node.id, node_attrs(&node.kind)).unwrap();
    }

    for (src, nodes) in &clusters {
        writeln!(buf).unwrap();
        writeln!(buf, "    subgraph cluster_{src} {{").unwrap();
        writeln!(buf, "        label=\"expanded from {src}\";").unwrap();
        writeln!(buf, "        style=rounded;").unwrap();
        writeln!(buf, "        color=gray50;").unwrap();
        for node in nodes {
            writeln!(buf, "        {} [{}];", node.id, node_attrs(&node.kind)).unwrap();
        }
        writeln!(buf, "    }}").unwrap();
    }

    // Edges, in a stable order
    let back = back_edges(graph);
    let mut links = graph.links().to_vec();
    links.sort();
    writeln!(buf).unwrap();
    for link in &links {
        let (Some(from), Some(to)) = (graph.pin(link.from), graph.pin(link.to)) else {
            continue;
        };
        let label = format!("{} → {}", from.name, to.name);
        if !from.is_exec() {
            writeln!(
                buf,
                "    {} -> {} [label=\"{label}\", style=dashed, color=gray40];",
                from.owner, to.owner
            )
            .unwrap();
        } else if back.contains(link) {
            writeln!(
                buf,
                "    {} -> {} [label=\"{label}\", style=bold, color=blue];",
                from.owner, to.owner
            )
            .unwrap();
        } else {
            writeln!(buf, "    {} -> {} [label=\"{label}\"];", from.owner, to.owner).unwrap();
        }
    }

    writeln!(buf, "}}").unwrap();
    buf
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Return the node label for a given NodeKind.
fn node_label(kind: &NodeKind) -> String {
    match kind {
        NodeKind::Construct(c) => c.metadata().title.to_string(),
        NodeKind::Event { name } => name.clone(),
        NodeKind::CallFunction { function, .. } => function.clone(),
        NodeKind::TemporaryVariable { variable_type } => format!("local {variable_type}"),
        NodeKind::Assignment => ":=".to_string(),
        NodeKind::Branch => "branch".to_string(),
        NodeKind::Sequence { outputs } => format!("sequence/{outputs}"),
        NodeKind::GetArrayItem => "[ ]".to_string(),
        NodeKind::VariableGet { variable } => variable.clone(),
        NodeKind::Probe { label } => format!("?{label}"),
    }
}

/// Return DOT attributes string for a node kind.
fn node_attrs(kind: &NodeKind) -> String {
    let (shape, color) = match kind {
        NodeKind::Construct(_) => ("box3d", "orange"),
        NodeKind::Event { .. } => ("cds", "lightpink"),
        NodeKind::CallFunction { pure: true, .. } => ("ellipse", "lightblue"),
        NodeKind::CallFunction { pure: false, .. } => ("box", "lightblue"),
        NodeKind::TemporaryVariable { .. } | NodeKind::VariableGet { .. } => {
            ("cylinder", "lightsalmon")
        }
        NodeKind::Assignment => ("box", "lightyellow"),
        NodeKind::Branch => ("diamond", "lightyellow"),
        NodeKind::Sequence { .. } => ("invhouse", "lightyellow"),
        NodeKind::GetArrayItem => ("ellipse", "white"),
        NodeKind::Probe { .. } => ("circle", "lightgreen"),
    };
    let label = node_label(kind).replace('"', "\\\"");
    format!("shape={shape}, style=filled, fillcolor={color}, label=\"{label}\"")
}

/// Exec links that close a loop, found by depth-first search from each node
/// in id order.
fn back_edges(graph: &Graph) -> HashSet<Link> {
    let mut succ: HashMap<NodeId, Vec<Link>> = HashMap::new();
    for link in graph.links() {
        let exec = graph.pin(link.from).map(|p| p.is_exec()).unwrap_or(false);
        if let (true, Some(from)) = (exec, graph.owner(link.from)) {
            succ.entry(from).or_default().push(*link);
        }
    }
    for edges in succ.values_mut() {
        edges.sort();
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Open,
        Done,
    }
    let mut marks: HashMap<NodeId, Mark> = HashMap::new();
    let mut back = HashSet::new();

    for root in graph.nodes().map(|n| n.id) {
        if marks.contains_key(&root) {
            continue;
        }
        marks.insert(root, Mark::Open);
        let mut stack: Vec<(NodeId, usize)> = vec![(root, 0)];
        while let Some(top) = stack.last_mut() {
            let (node, next) = *top;
            let edges = succ.get(&node).map(Vec::as_slice).unwrap_or(&[]);
            if next >= edges.len() {
                marks.insert(node, Mark::Done);
                stack.pop();
                continue;
            }
            top.1 += 1;
            let link = edges[next];
            let Some(target) = graph.owner(link.to) else {
                continue;
            };
            match marks.get(&target) {
                Some(Mark::Open) => {
                    back.insert(link);
                }
                Some(Mark::Done) => {}
                None => {
                    marks.insert(target, Mark::Open);
                    stack.push((target, 0));
                }
            }
        }
    }
    back
}
