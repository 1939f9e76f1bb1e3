// lower.rs — Construct lowering: expansion driver and pruning
//
// Expands every construct in a graph into primitives, one construct at a
// time in node-id order, then removes the inert constructs so only
// primitives remain.
//
// Preconditions: types have been propagated (the reconstruct pass ran).
// Postconditions: every construct is `Expanded` and link-free; after
//   `prune_expanded`, no construct remains in the graph.
// Failure modes: structural precondition violations (missing pins, unknown
//   primitives, double moves, re-expansion) → `LowerError`, which aborts the
//   compile. Individual wiring failures are warnings, not errors.
// Side effects: mutates the graph it is given; `tracing` events.

use crate::construct::{Expandable, ExpansionState};
use crate::diag::Diagnostic;
use crate::graph::Graph;
use crate::id::NodeId;
use crate::registry::{Registry, RegistryError};
use crate::validate::extra_links;

// ── Errors ──────────────────────────────────────────────────────────────────

/// Fatal lowering failures. These indicate a mismatch between the lowering
/// rules and the primitive set, never a user error.
#[derive(Debug, thiserror::Error)]
pub enum LowerError {
    #[error("node {node} has no pin '{pin}'")]
    MissingPin { node: NodeId, pin: String },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("links of {0} were already moved")]
    AlreadyConsumed(String),
    #[error("{0} is not a construct")]
    NotAConstruct(NodeId),
    #[error("construct {node} is {state}, expected unexpanded")]
    NotUnexpanded {
        node: NodeId,
        state: ExpansionState,
    },
}

// ── Context ─────────────────────────────────────────────────────────────────

/// Everything an expansion may use: the graph being compiled, the primitive
/// registry, and the diagnostics sink.
pub struct CompilerContext<'a> {
    pub graph: Graph,
    pub registry: &'a Registry,
    pub diagnostics: Vec<Diagnostic>,
}

impl<'a> CompilerContext<'a> {
    pub fn new(graph: Graph, registry: &'a Registry) -> Self {
        CompilerContext {
            graph,
            registry,
            diagnostics: Vec::new(),
        }
    }
}

/// Outcome of expanding one construct.
#[derive(Debug, Clone)]
pub struct Expansion {
    pub construct: NodeId,
    /// Primitive nodes created, in spawn order.
    pub spawned: Vec<NodeId>,
    /// Wiring instructions applied without any failure.
    pub applied: usize,
    /// Warnings for links that were skipped.
    pub skipped: Vec<Diagnostic>,
}

// ── Passes ──────────────────────────────────────────────────────────────────

/// Expand one construct, driving its state machine.
pub fn expand_node(ctx: &mut CompilerContext<'_>, node: NodeId) -> Result<Expansion, LowerError> {
    let construct = ctx
        .graph
        .construct(node)
        .cloned()
        .ok_or(LowerError::NotAConstruct(node))?;
    if construct.state() != ExpansionState::Unexpanded {
        return Err(LowerError::NotUnexpanded {
            node,
            state: construct.state(),
        });
    }
    set_state(&mut ctx.graph, node, ExpansionState::Expanding);

    // the expansion keeps only the first link of a single-link input
    let pins: Vec<_> = ctx.graph.pins_of(node).map(|p| p.id).collect();
    for pin in pins {
        ctx.diagnostics.extend(extra_links(&ctx.graph, pin));
    }

    let expansion = construct.expand(ctx, node)?;

    set_state(&mut ctx.graph, node, ExpansionState::Expanded);
    tracing::debug!(
        %node,
        spawned = expansion.spawned.len(),
        skipped = expansion.skipped.len(),
        "expanded construct"
    );
    ctx.diagnostics.extend(expansion.skipped.iter().cloned());
    Ok(expansion)
}

/// Expand every construct in the graph, in node-id order.
pub fn expand_all(ctx: &mut CompilerContext<'_>) -> Result<Vec<Expansion>, LowerError> {
    let mut expansions = Vec::new();
    for node in ctx.graph.construct_ids() {
        expansions.push(expand_node(ctx, node)?);
    }
    Ok(expansions)
}

/// Remove expanded constructs that no longer hold links. Returns the
/// removed ids.
pub fn prune_expanded(graph: &mut Graph) -> Vec<NodeId> {
    let inert: Vec<NodeId> = graph
        .construct_ids()
        .into_iter()
        .filter(|&n| {
            graph.construct(n).map(|c| c.state()) == Some(ExpansionState::Expanded)
                && graph.node_link_count(n) == 0
        })
        .collect();
    for &node in &inert {
        graph.remove_node(node);
    }
    inert
}

fn set_state(graph: &mut Graph, node: NodeId, state: ExpansionState) {
    if let Some(c) = graph.construct_mut(node) {
        c.set_state(state);
    }
}
