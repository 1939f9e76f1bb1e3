// builder.rs — Two-phase subgraph builder for construct expansion
//
// Phase 1 spawns every intermediate node and records wiring as
// `(effect, source, dest)` instructions. Phase 2 (`finish`) applies the
// instructions in recording order and then severs the construct.
//
// A move is destructive: once a pin's links have been moved, the pin is
// consumed, and recording a second move (or a copy) from it is a fatal
// error rather than a silent no-op.
//
// Preconditions: `source` is the construct being expanded.
// Postconditions: after `finish`, `source` has no links; each failed link is
//   reported as a `W0101` warning and skipped.
// Failure modes: unknown primitive, missing pin, reuse of a consumed pin →
//   `LowerError`.
// Side effects: mutates the borrowed graph; `tracing` events.

use std::collections::BTreeSet;
use std::fmt;

use crate::diag::{codes, Diagnostic, Location};
use crate::graph::{ConnectError, Graph};
use crate::id::{NodeId, PinId};
use crate::lower::{Expansion, LowerError};
use crate::registry::Registry;
use crate::types::PinType;

/// A pin named by its node and pin name.
pub type Endpoint<'n> = (NodeId, &'n str);

/// What a wiring instruction does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Link `source` to `dest`.
    Connect,
    /// Re-home every link of `source` onto `dest`.
    Move,
    /// Give `dest` the same links as `source`.
    Copy,
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Connect => write!(f, "connect"),
            Effect::Move => write!(f, "move"),
            Effect::Copy => write!(f, "copy"),
        }
    }
}

/// One recorded wiring instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireOp {
    pub effect: Effect,
    pub source: PinId,
    pub dest: PinId,
}

pub struct SubgraphBuilder<'g> {
    graph: &'g mut Graph,
    registry: &'g Registry,
    source: NodeId,
    spawned: Vec<NodeId>,
    ops: Vec<WireOp>,
    consumed: BTreeSet<PinId>,
}

impl<'g> SubgraphBuilder<'g> {
    pub fn new(graph: &'g mut Graph, registry: &'g Registry, source: NodeId) -> Self {
        SubgraphBuilder {
            graph,
            registry,
            source,
            spawned: Vec::new(),
            ops: Vec::new(),
            consumed: BTreeSet::new(),
        }
    }

    // ── Phase 1: spawn ──────────────────────────────────────────────────

    fn adopt(&mut self, node: NodeId) -> NodeId {
        self.graph.mark_intermediate(node, self.source);
        self.spawned.push(node);
        node
    }

    /// Spawn a registry primitive by stable name.
    pub fn spawn_call(&mut self, name: &str) -> Result<NodeId, LowerError> {
        let sig = self.registry.lookup_checked(name)?;
        let node = self.graph.spawn_call(sig);
        Ok(self.adopt(node))
    }

    pub fn spawn_temporary(&mut self, ty: PinType) -> NodeId {
        let node = self.graph.spawn_temporary(ty);
        self.adopt(node)
    }

    pub fn spawn_assignment(&mut self) -> NodeId {
        let node = self.graph.spawn_assignment();
        self.adopt(node)
    }

    pub fn spawn_branch(&mut self) -> NodeId {
        let node = self.graph.spawn_branch();
        self.adopt(node)
    }

    pub fn spawn_sequence(&mut self, outputs: usize) -> NodeId {
        let node = self.graph.spawn_sequence(outputs);
        self.adopt(node)
    }

    pub fn spawn_get_array_item(&mut self) -> NodeId {
        let node = self.graph.spawn_get_array_item();
        self.adopt(node)
    }

    /// Resolve a pin; a missing pin is a version mismatch, not a user error.
    pub fn pin(&self, (node, name): Endpoint<'_>) -> Result<PinId, LowerError> {
        self.graph
            .find_pin(node, name)
            .ok_or_else(|| LowerError::MissingPin {
                node,
                pin: name.to_string(),
            })
    }

    /// Literal used when an input pin has no link.
    pub fn set_default(&mut self, at: Endpoint<'_>, value: &str) -> Result<(), LowerError> {
        let pin = self.pin(at)?;
        self.graph.set_default_value(pin, value);
        Ok(())
    }

    // ── Phase 1: record wiring ──────────────────────────────────────────

    pub fn connect(&mut self, a: Endpoint<'_>, b: Endpoint<'_>) -> Result<(), LowerError> {
        self.record(Effect::Connect, a, b)
    }

    pub fn copy_links(&mut self, source: Endpoint<'_>, dest: Endpoint<'_>) -> Result<(), LowerError> {
        self.record(Effect::Copy, source, dest)
    }

    pub fn move_links(&mut self, source: Endpoint<'_>, dest: Endpoint<'_>) -> Result<(), LowerError> {
        self.record(Effect::Move, source, dest)
    }

    fn record(&mut self, effect: Effect, a: Endpoint<'_>, b: Endpoint<'_>) -> Result<(), LowerError> {
        let source = self.pin(a)?;
        let dest = self.pin(b)?;
        if effect != Effect::Connect && self.consumed.contains(&source) {
            return Err(LowerError::AlreadyConsumed(self.graph.describe_pin(source)));
        }
        if effect == Effect::Move {
            self.consumed.insert(source);
        }
        self.ops.push(WireOp {
            effect,
            source,
            dest,
        });
        Ok(())
    }

    /// Instructions recorded so far.
    pub fn pending(&self) -> &[WireOp] {
        &self.ops
    }

    // ── Phase 2: apply ──────────────────────────────────────────────────

    /// Apply every recorded instruction, then sever the construct.
    pub fn finish(self) -> Expansion {
        let SubgraphBuilder {
            graph,
            source,
            spawned,
            ops,
            ..
        } = self;

        let mut applied = 0;
        let mut skipped = Vec::new();
        for op in ops {
            let errors = match op.effect {
                Effect::Connect => graph.try_connect(op.source, op.dest).err().into_iter().collect(),
                Effect::Move => graph.move_pin_links(op.source, op.dest),
                Effect::Copy => graph.copy_pin_links(op.source, op.dest),
            };
            if errors.is_empty() {
                applied += 1;
            }
            for err in errors {
                skipped.push(skip_diagnostic(graph, &op, &err));
            }
        }

        graph.break_all_node_links(source);

        Expansion {
            construct: source,
            spawned,
            applied,
            skipped,
        }
    }
}

fn skip_diagnostic(graph: &Graph, op: &WireOp, err: &ConnectError) -> Diagnostic {
    tracing::warn!(
        effect = %op.effect,
        source = %graph.describe_pin(op.source),
        dest = %graph.describe_pin(op.dest),
        error = %err,
        "failed to create connection, skipping"
    );
    let location = match graph.owner(op.dest) {
        Some(node) => Location::pin(node, op.dest),
        None => Location::default(),
    };
    Diagnostic::warning(
        location,
        format!(
            "{} {} -> {} skipped: {}",
            op.effect,
            graph.describe_pin(op.source),
            graph.describe_pin(op.dest),
            err
        ),
    )
    .with_code(codes::W0101)
}
