// graph.rs — Host graph model: nodes, pins, links
//
// An explicit node/pin store standing in for the editor-owned graph the
// lowering passes run against. Nodes live in an ordered map keyed by
// `NodeId`; links are `(output pin, input pin)` pairs held in a flat list and
// never own the nodes they join.
//
// The graph also plays the host's schema role: `try_connect` validates a
// link, data inputs and exec outputs keep a single link, generic primitive
// pins are re-stamped whenever their links change, and constructs are told
// when the link list of one of their pins changes.
//
// Preconditions: none.
// Postconditions: every link joins an output pin to an input pin of a
//   different node; `links` never holds duplicates.
// Failure modes: rejected connections → `ConnectError` (never panics).
// Side effects: `tracing` debug/warn events; node-changed notifications are
//   appended to the revision log returned by `changes()`.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::construct::{Construct, Typed};
use crate::id::{IdAllocator, NodeId, PinId};
use crate::registry::PrimitiveSignature;
use crate::types::{BindConflict, Bindings, PinType, TypeExpr};

// ── Pin names ───────────────────────────────────────────────────────────────

/// Well-known pin names shared by the node kinds.
pub mod pn {
    pub const EXECUTE: &str = "execute";
    pub const THEN: &str = "then";
    pub const ELSE: &str = "else";
    pub const CONDITION: &str = "Condition";
    pub const LOOP_BODY: &str = "LoopBody";
    pub const COMPLETED: &str = "Completed";
    pub const MAP: &str = "Map";
    pub const KEY: &str = "Key";
    pub const VALUE: &str = "Value";
    pub const KEYS: &str = "Keys";
    pub const TARGET_MAP: &str = "TargetMap";
    pub const RETURN_VALUE: &str = "ReturnValue";
    pub const VARIABLE: &str = "Variable";
    pub const ARRAY: &str = "Array";
    pub const INDEX: &str = "Index";
    pub const OUTPUT: &str = "Output";
    pub const A: &str = "A";
    pub const B: &str = "B";

    /// Output `index` of a sequence node (`then_0`, `then_1`, ...).
    pub fn sequence_then(index: usize) -> String {
        format!("then_{index}")
    }
}

// ── Public types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinDirection {
    Input,
    Output,
}

/// A named, typed connection point on a node.
#[derive(Debug, Clone)]
pub struct Pin {
    pub id: PinId,
    pub owner: NodeId,
    pub name: String,
    pub direction: PinDirection,
    pub pin_type: PinType,
    /// Generic declaration; `None` for pins whose type is set directly.
    pub generic: Option<TypeExpr>,
    pub default_value: Option<String>,
    /// Input names storage the node may write to; it must be fed by a variable.
    pub by_ref: bool,
}

impl Pin {
    pub fn is_exec(&self) -> bool {
        self.pin_type.is_exec()
    }

    /// Data inputs and exec outputs hold at most one link.
    pub fn holds_single_link(&self) -> bool {
        self.is_exec() == (self.direction == PinDirection::Output)
    }
}

/// Declaration used when allocating a node's pins.
#[derive(Debug, Clone)]
pub struct PinDecl {
    pub name: String,
    pub direction: PinDirection,
    pub ty: PinType,
    pub generic: Option<TypeExpr>,
    pub default_value: Option<String>,
    pub by_ref: bool,
}

impl PinDecl {
    pub fn new(name: &str, direction: PinDirection, ty: PinType) -> Self {
        PinDecl {
            name: name.to_string(),
            direction,
            ty,
            generic: None,
            default_value: None,
            by_ref: false,
        }
    }

    pub fn exec_in(name: &str) -> Self {
        Self::new(name, PinDirection::Input, PinType::exec())
    }

    pub fn exec_out(name: &str) -> Self {
        Self::new(name, PinDirection::Output, PinType::exec())
    }

    pub fn data_in(name: &str, ty: PinType) -> Self {
        Self::new(name, PinDirection::Input, ty)
    }

    pub fn data_out(name: &str, ty: PinType) -> Self {
        Self::new(name, PinDirection::Output, ty)
    }

    /// A pin whose type follows a generic expression.
    pub fn generic(name: &str, direction: PinDirection, expr: TypeExpr) -> Self {
        let ty = match &expr {
            TypeExpr::Exact { ty } => ty.clone(),
            _ => expr.instantiate(&Bindings::new()),
        };
        PinDecl {
            generic: expr.is_generic().then_some(expr),
            ..Self::new(name, direction, ty)
        }
    }

    pub fn with_default(mut self, value: &str) -> Self {
        self.default_value = Some(value.to_string());
        self
    }

    pub fn by_reference(mut self, by_ref: bool) -> Self {
        self.by_ref = by_ref;
        self
    }
}

/// What a node does.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// A high-level construct awaiting lowering.
    Construct(Construct),
    /// Entry point of an exec chain.
    Event { name: String },
    /// A registry primitive.
    CallFunction { function: String, pure: bool },
    /// A compiler-owned local of the given type.
    TemporaryVariable { variable_type: PinType },
    /// Stores `Value` into the variable linked to `Variable`.
    Assignment,
    /// Two-way branch on `Condition`.
    Branch,
    /// Runs each `then_N` output to completion, in order.
    Sequence { outputs: usize },
    /// Reads `Array[Index]`.
    GetArrayItem,
    /// Reads a declared graph variable.
    VariableGet { variable: String },
    /// Exec pass-through that observes its data inputs.
    Probe { label: String },
}

impl NodeKind {
    /// True for nodes that take part in exec flow.
    pub fn is_impure(&self) -> bool {
        match self {
            NodeKind::CallFunction { pure, .. } => !pure,
            NodeKind::Construct(_)
            | NodeKind::Event { .. }
            | NodeKind::Assignment
            | NodeKind::Branch
            | NodeKind::Sequence { .. }
            | NodeKind::Probe { .. } => true,
            NodeKind::TemporaryVariable { .. }
            | NodeKind::GetArrayItem
            | NodeKind::VariableGet { .. } => false,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Construct(c) => write!(f, "{}", c),
            NodeKind::Event { name } => write!(f, "event {}", name),
            NodeKind::CallFunction { function, .. } => write!(f, "call {}", function),
            NodeKind::TemporaryVariable { variable_type } => write!(f, "temp {}", variable_type),
            NodeKind::Assignment => write!(f, "assign"),
            NodeKind::Branch => write!(f, "branch"),
            NodeKind::Sequence { outputs } => write!(f, "sequence/{}", outputs),
            NodeKind::GetArrayItem => write!(f, "get_array_item"),
            NodeKind::VariableGet { variable } => write!(f, "get {}", variable),
            NodeKind::Probe { label } => write!(f, "probe {}", label),
        }
    }
}

/// A node and its pins, in declaration order.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub pins: Vec<PinId>,
    /// The construct this node was spawned for, if it is an intermediate.
    pub spawned_from: Option<NodeId>,
}

/// A directed link from an output pin to an input pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Link {
    pub from: PinId,
    pub to: PinId,
}

impl Link {
    pub fn touches(&self, pin: PinId) -> bool {
        self.from == pin || self.to == pin
    }

    pub fn other(&self, pin: PinId) -> PinId {
        if self.from == pin {
            self.to
        } else {
            self.from
        }
    }
}

/// A graph-level variable readable through `VariableGet` nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: PinType,
    #[serde(default)]
    pub default: serde_json::Value,
}

/// Why a connection was refused.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConnectError {
    #[error("no such pin {0}")]
    UnknownPin(PinId),
    #[error("no such node {0}")]
    UnknownNode(NodeId),
    #[error("{0} and {1} belong to the same node")]
    SameNode(String, String),
    #[error("{0} and {1} are both {2:?} pins")]
    SameDirection(String, String, PinDirection),
    #[error("cannot link exec pin to data pin ({0} -> {1})")]
    KindMismatch(String, String),
    #[error("{from} ({from_type}) is not compatible with {to} ({to_type})")]
    Incompatible {
        from: String,
        to: String,
        from_type: PinType,
        to_type: PinType,
    },
    #[error("{0} is already linked to {1}")]
    AlreadyLinked(String, String),
    #[error("linking {from} -> {to} conflicts with generic bindings: {conflict}")]
    Conflict {
        from: String,
        to: String,
        conflict: BindConflict,
    },
}

/// The graph.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    ids: IdAllocator,
    nodes: BTreeMap<NodeId, Node>,
    pins: BTreeMap<PinId, Pin>,
    links: Vec<Link>,
    variables: BTreeMap<String, VariableDecl>,
    changes: Vec<NodeId>,
    unsettled: Vec<NodeId>,
}

// ── Node creation ───────────────────────────────────────────────────────────

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a node with the given pins.
    pub fn add_node(&mut self, kind: NodeKind, decls: Vec<PinDecl>) -> NodeId {
        let id = self.ids.alloc_node();
        let mut pins = Vec::with_capacity(decls.len());
        for decl in decls {
            let pin_id = self.ids.alloc_pin();
            self.pins.insert(
                pin_id,
                Pin {
                    id: pin_id,
                    owner: id,
                    name: decl.name,
                    direction: decl.direction,
                    pin_type: decl.ty,
                    generic: decl.generic,
                    default_value: decl.default_value,
                    by_ref: decl.by_ref,
                },
            );
            pins.push(pin_id);
        }
        self.nodes.insert(
            id,
            Node {
                id,
                kind,
                pins,
                spawned_from: None,
            },
        );
        id
    }

    pub fn spawn_construct(&mut self, construct: Construct) -> NodeId {
        let decls = construct.allocate_default_pins();
        self.add_node(NodeKind::Construct(construct), decls)
    }

    pub fn spawn_event(&mut self, name: &str) -> NodeId {
        self.add_node(
            NodeKind::Event {
                name: name.to_string(),
            },
            vec![PinDecl::exec_out(pn::THEN)],
        )
    }

    /// Instantiate a registry primitive; impure primitives get exec pins.
    pub fn spawn_call(&mut self, sig: &PrimitiveSignature) -> NodeId {
        let mut decls = Vec::new();
        if !sig.pure {
            decls.push(PinDecl::exec_in(pn::EXECUTE));
            decls.push(PinDecl::exec_out(pn::THEN));
        }
        for param in &sig.params {
            decls.push(
                PinDecl::generic(&param.name, param.direction, param.ty.clone())
                    .by_reference(param.by_ref),
            );
        }
        self.add_node(
            NodeKind::CallFunction {
                function: sig.name.clone(),
                pure: sig.pure,
            },
            decls,
        )
    }

    pub fn spawn_temporary(&mut self, variable_type: PinType) -> NodeId {
        self.add_node(
            NodeKind::TemporaryVariable {
                variable_type: variable_type.clone(),
            },
            vec![PinDecl::data_out(pn::VARIABLE, variable_type)],
        )
    }

    pub fn spawn_assignment(&mut self) -> NodeId {
        self.add_node(
            NodeKind::Assignment,
            vec![
                PinDecl::exec_in(pn::EXECUTE),
                PinDecl::exec_out(pn::THEN),
                PinDecl::generic(pn::VARIABLE, PinDirection::Input, TypeExpr::param("T")),
                PinDecl::generic(pn::VALUE, PinDirection::Input, TypeExpr::param("T")),
            ],
        )
    }

    pub fn spawn_branch(&mut self) -> NodeId {
        self.add_node(
            NodeKind::Branch,
            vec![
                PinDecl::exec_in(pn::EXECUTE),
                PinDecl::data_in(pn::CONDITION, PinType::bool()),
                PinDecl::exec_out(pn::THEN),
                PinDecl::exec_out(pn::ELSE),
            ],
        )
    }

    pub fn spawn_sequence(&mut self, outputs: usize) -> NodeId {
        let mut decls = vec![PinDecl::exec_in(pn::EXECUTE)];
        for i in 0..outputs {
            decls.push(PinDecl::exec_out(&pn::sequence_then(i)));
        }
        self.add_node(NodeKind::Sequence { outputs }, decls)
    }

    pub fn spawn_get_array_item(&mut self) -> NodeId {
        self.add_node(
            NodeKind::GetArrayItem,
            vec![
                PinDecl::generic(pn::ARRAY, PinDirection::Input, TypeExpr::array_of("T")),
                PinDecl::data_in(pn::INDEX, PinType::int()),
                PinDecl::generic(pn::OUTPUT, PinDirection::Output, TypeExpr::param("T")),
            ],
        )
    }

    /// Read a declared variable. Returns `None` if it was never declared.
    pub fn spawn_variable_get(&mut self, variable: &str) -> Option<NodeId> {
        let ty = self.variables.get(variable)?.ty.clone();
        Some(self.add_node(
            NodeKind::VariableGet {
                variable: variable.to_string(),
            },
            vec![PinDecl::data_out(variable, ty)],
        ))
    }

    /// An exec pass-through with one generic input per name.
    pub fn spawn_probe(&mut self, label: &str, inputs: &[&str]) -> NodeId {
        let mut decls = vec![PinDecl::exec_in(pn::EXECUTE), PinDecl::exec_out(pn::THEN)];
        for (i, name) in inputs.iter().enumerate() {
            decls.push(PinDecl::generic(
                name,
                PinDirection::Input,
                TypeExpr::param(&format!("T{i}")),
            ));
        }
        self.add_node(
            NodeKind::Probe {
                label: label.to_string(),
            },
            decls,
        )
    }

    /// Record that `node` was spawned while lowering `source`.
    pub fn mark_intermediate(&mut self, node: NodeId, source: NodeId) {
        if let Some(n) = self.nodes.get_mut(&node) {
            n.spawned_from = Some(source);
        }
    }

    /// Remove a node, its pins and every link touching it.
    pub fn remove_node(&mut self, node: NodeId) -> Option<Node> {
        self.break_all_node_links(node);
        let removed = self.nodes.remove(&node)?;
        for pin in &removed.pins {
            self.pins.remove(pin);
        }
        Some(removed)
    }

    pub fn declare_variable(&mut self, decl: VariableDecl) {
        self.variables.insert(decl.name.clone(), decl);
    }
}

// ── Queries ─────────────────────────────────────────────────────────────────

impl Graph {
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn pin(&self, id: PinId) -> Option<&Pin> {
        self.pins.get(&id)
    }

    /// Nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn variables(&self) -> impl Iterator<Item = &VariableDecl> {
        self.variables.values()
    }

    pub fn variable(&self, name: &str) -> Option<&VariableDecl> {
        self.variables.get(name)
    }

    /// Pins of a node, in declaration order.
    pub fn pins_of(&self, node: NodeId) -> impl Iterator<Item = &Pin> {
        self.nodes
            .get(&node)
            .into_iter()
            .flat_map(|n| n.pins.iter())
            .filter_map(|p| self.pins.get(p))
    }

    pub fn find_pin(&self, node: NodeId, name: &str) -> Option<PinId> {
        self.pins_of(node).find(|p| p.name == name).map(|p| p.id)
    }

    /// Pins linked to `pin`, in link creation order.
    pub fn linked_to(&self, pin: PinId) -> Vec<PinId> {
        self.links
            .iter()
            .filter(|l| l.touches(pin))
            .map(|l| l.other(pin))
            .collect()
    }

    pub fn has_links(&self, pin: PinId) -> bool {
        self.links.iter().any(|l| l.touches(pin))
    }

    /// Number of links touching any pin of `node`.
    pub fn node_link_count(&self, node: NodeId) -> usize {
        self.links
            .iter()
            .filter(|l| self.owner(l.from) == Some(node) || self.owner(l.to) == Some(node))
            .count()
    }

    /// Nodes linked to any pin of `node`, in link order.
    pub fn neighbours(&self, node: NodeId) -> Vec<NodeId> {
        self.links
            .iter()
            .filter_map(|l| match (self.owner(l.from), self.owner(l.to)) {
                (Some(from), Some(to)) if from == node => Some(to),
                (Some(from), Some(to)) if to == node => Some(from),
                _ => None,
            })
            .collect()
    }

    pub fn owner(&self, pin: PinId) -> Option<NodeId> {
        self.pins.get(&pin).map(|p| p.owner)
    }

    pub fn construct(&self, node: NodeId) -> Option<&Construct> {
        match &self.nodes.get(&node)?.kind {
            NodeKind::Construct(c) => Some(c),
            _ => None,
        }
    }

    pub fn construct_mut(&mut self, node: NodeId) -> Option<&mut Construct> {
        match &mut self.nodes.get_mut(&node)?.kind {
            NodeKind::Construct(c) => Some(c),
            _ => None,
        }
    }

    /// Construct nodes in id order.
    pub fn construct_ids(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| matches!(n.kind, NodeKind::Construct(_)))
            .map(|n| n.id)
            .collect()
    }

    /// `n3.TargetMap`-style name for messages.
    pub fn describe_pin(&self, pin: PinId) -> String {
        match self.pins.get(&pin) {
            Some(p) => format!("{}.{}", p.owner, p.name),
            None => pin.to_string(),
        }
    }

    /// Nodes whose shape changed, in notification order.
    pub fn changes(&self) -> &[NodeId] {
        &self.changes
    }

    /// Nodes whose generic pins were still being re-stamped when resolution
    /// gave up. Their pin types are not trustworthy.
    pub fn unsettled(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.unsettled
            .iter()
            .copied()
            .filter(|n| self.nodes.contains_key(n))
    }
}

// ── Mutation ────────────────────────────────────────────────────────────────

impl Graph {
    /// Overwrite a pin's type descriptor.
    pub fn set_pin_type(&mut self, pin: PinId, ty: PinType) {
        if let Some(p) = self.pins.get_mut(&pin) {
            p.pin_type = ty;
        }
    }

    pub fn set_default_value(&mut self, pin: PinId, value: &str) {
        if let Some(p) = self.pins.get_mut(&pin) {
            p.default_value = Some(value.to_string());
        }
    }

    /// Tell observers the node's shape changed.
    pub fn notify_node_changed(&mut self, node: NodeId) {
        tracing::debug!(%node, "node changed");
        self.changes.push(node);
    }

    /// Schema-checked connection. Data inputs and exec outputs hold one
    /// link; connecting another replaces it.
    pub fn try_connect(&mut self, a: PinId, b: PinId) -> Result<(), ConnectError> {
        let (from, to) = self.check_connection(a, b)?;
        let single = if self.pins[&from].is_exec() { from } else { to };
        let mut touched = vec![from, to];

        let previous = self.links.len();
        self.links.push(Link { from, to });
        if let Some(conflict) = self.binding_conflict(from).or_else(|| self.binding_conflict(to)) {
            self.links.truncate(previous);
            return Err(ConnectError::Conflict {
                from: self.describe_pin(from),
                to: self.describe_pin(to),
                conflict,
            });
        }

        let new_link = Link { from, to };
        self.links.retain(|l| {
            if *l != new_link && l.touches(single) {
                touched.push(l.other(single));
                false
            } else {
                true
            }
        });

        tracing::debug!(
            from = %self.describe_pin(from),
            to = %self.describe_pin(to),
            "connected"
        );
        self.after_links_changed(&touched);
        Ok(())
    }

    /// Restore a link without type or single-link checks (graph reload).
    /// Pins must exist and face opposite directions.
    pub fn insert_link_unchecked(&mut self, a: PinId, b: PinId) -> Result<(), ConnectError> {
        let pa = self.pins.get(&a).ok_or(ConnectError::UnknownPin(a))?;
        let pb = self.pins.get(&b).ok_or(ConnectError::UnknownPin(b))?;
        if pa.direction == pb.direction {
            return Err(ConnectError::SameDirection(
                self.describe_pin(a),
                self.describe_pin(b),
                pa.direction,
            ));
        }
        let link = if pa.direction == PinDirection::Output {
            Link { from: a, to: b }
        } else {
            Link { from: b, to: a }
        };
        if !self.links.contains(&link) {
            self.links.push(link);
        }
        Ok(())
    }

    /// Remove every link touching `pin`.
    pub fn break_pin_links(&mut self, pin: PinId) {
        let mut touched = Vec::new();
        self.links.retain(|l| {
            if l.touches(pin) {
                touched.push(l.other(pin));
                false
            } else {
                true
            }
        });
        if !touched.is_empty() {
            touched.push(pin);
            self.after_links_changed(&touched);
        }
    }

    /// Remove every link touching any pin of `node`.
    pub fn break_all_node_links(&mut self, node: NodeId) {
        let pins = match self.nodes.get(&node) {
            Some(n) => n.pins.clone(),
            None => return,
        };
        for pin in pins {
            self.break_pin_links(pin);
        }
    }

    /// Detach every link from `source` and reattach the far ends to `dest`.
    /// Links that cannot be reattached are dropped and reported.
    pub fn move_pin_links(&mut self, source: PinId, dest: PinId) -> Vec<ConnectError> {
        if !self.pins.contains_key(&dest) {
            return vec![ConnectError::UnknownPin(dest)];
        }
        let peers = self.peers_for(source, dest);
        self.break_pin_links(source);
        peers
            .into_iter()
            .filter_map(|peer| self.try_connect(dest, peer).err())
            .collect()
    }

    /// Attach `dest` to the pins `source` is linked to, leaving `source`
    /// intact.
    pub fn copy_pin_links(&mut self, source: PinId, dest: PinId) -> Vec<ConnectError> {
        if !self.pins.contains_key(&dest) {
            return vec![ConnectError::UnknownPin(dest)];
        }
        self.peers_for(source, dest)
            .into_iter()
            .filter_map(|peer| self.try_connect(dest, peer).err())
            .collect()
    }

    /// Far ends of `source` to re-home onto `dest`. A single-link `dest`
    /// takes only the first link, matching the construct's typing.
    fn peers_for(&self, source: PinId, dest: PinId) -> Vec<PinId> {
        let mut peers = self.linked_to(source);
        if self.pins.get(&dest).is_some_and(Pin::holds_single_link) {
            peers.truncate(1);
        }
        peers
    }

    /// Run every construct's reconstruct hook and settle generic pins, as
    /// after loading a graph.
    pub fn reconstruct_all(&mut self) {
        let all: Vec<NodeId> = self.nodes.keys().copied().collect();
        self.resolve_generics(all.clone());
        for node in self.construct_ids() {
            if let Some(construct) = self.construct(node).cloned() {
                construct.post_reconstruct(self, node);
            }
        }
        // construct pins may have changed under their generic neighbours
        self.resolve_generics(all);
    }

    fn check_connection(&self, a: PinId, b: PinId) -> Result<(PinId, PinId), ConnectError> {
        let pa = self.pins.get(&a).ok_or(ConnectError::UnknownPin(a))?;
        let pb = self.pins.get(&b).ok_or(ConnectError::UnknownPin(b))?;
        if pa.owner == pb.owner {
            return Err(ConnectError::SameNode(
                self.describe_pin(a),
                self.describe_pin(b),
            ));
        }
        if pa.direction == pb.direction {
            return Err(ConnectError::SameDirection(
                self.describe_pin(a),
                self.describe_pin(b),
                pa.direction,
            ));
        }
        let (from, to) = if pa.direction == PinDirection::Output {
            (pa, pb)
        } else {
            (pb, pa)
        };
        if from.is_exec() != to.is_exec() {
            return Err(ConnectError::KindMismatch(
                self.describe_pin(from.id),
                self.describe_pin(to.id),
            ));
        }
        if !from.pin_type.is_compatible(&to.pin_type) {
            return Err(ConnectError::Incompatible {
                from: self.describe_pin(from.id),
                to: self.describe_pin(to.id),
                from_type: from.pin_type.clone(),
                to_type: to.pin_type.clone(),
            });
        }
        let link = Link {
            from: from.id,
            to: to.id,
        };
        if self.links.contains(&link) {
            return Err(ConnectError::AlreadyLinked(
                self.describe_pin(from.id),
                self.describe_pin(to.id),
            ));
        }
        Ok((from.id, to.id))
    }

    fn binding_conflict(&self, pin: PinId) -> Option<BindConflict> {
        let owner = self.owner(pin)?;
        self.derive_bindings(owner).err()
    }

    /// Dispatch connection-list changes to constructs, then re-stamp generic
    /// pins on every affected node.
    fn after_links_changed(&mut self, pins: &[PinId]) {
        let mut owners: Vec<NodeId> = pins.iter().filter_map(|p| self.owner(*p)).collect();
        for &pin in pins {
            let Some(owner) = self.owner(pin) else {
                continue;
            };
            if let Some(construct) = self.construct(owner).cloned() {
                construct.pin_connection_list_changed(self, owner, pin);
                // the construct may have re-typed pins its neighbours bind to
                owners.extend(self.neighbours(owner));
            }
        }
        owners.sort();
        owners.dedup();
        self.resolve_generics(owners);
    }

    // ── Generic resolution ──────────────────────────────────────────────

    fn has_generic_pins(&self, node: NodeId) -> bool {
        self.pins_of(node).any(|p| p.generic.is_some())
    }

    /// Bindings implied by the current links of a node's generic pins.
    pub fn derive_bindings(&self, node: NodeId) -> Result<Bindings, BindConflict> {
        let mut bindings = Bindings::new();
        for pin in self.pins_of(node) {
            let Some(expr) = &pin.generic else {
                continue;
            };
            for peer in self.linked_to(pin.id) {
                if let Some(peer_pin) = self.pins.get(&peer) {
                    expr.bind(&peer_pin.pin_type, &mut bindings)?;
                }
            }
        }
        Ok(bindings)
    }

    /// Re-stamp generic pins of the seed nodes, following links to
    /// neighbours whose inputs changed type.
    fn resolve_generics(&mut self, seeds: Vec<NodeId>) {
        let budget = self.nodes.len() * 4 + 8;
        self.resolve_generics_within(seeds, budget);
    }

    /// Worklist re-stamp bounded by `budget` node visits. Links can form
    /// cycles through generic pins, so a visit count is the only bound; nodes
    /// left queued when it runs out are recorded as unsettled.
    pub(crate) fn resolve_generics_within(&mut self, seeds: Vec<NodeId>, mut budget: usize) {
        let mut queue: VecDeque<NodeId> = seeds.into();
        while let Some(node) = queue.pop_front() {
            if budget == 0 {
                queue.push_front(node);
                tracing::warn!(pending = queue.len(), "generic pin resolution did not settle");
                for n in queue {
                    if !self.unsettled.contains(&n) {
                        self.unsettled.push(n);
                    }
                }
                return;
            }
            budget -= 1;
            self.unsettled.retain(|&n| n != node);
            if !self.has_generic_pins(node) {
                continue;
            }
            let bindings = match self.derive_bindings(node) {
                Ok(b) => b,
                Err(conflict) => {
                    tracing::warn!(%node, %conflict, "generic pins left unchanged");
                    continue;
                }
            };
            let mut changed = Vec::new();
            let pin_ids = self.nodes[&node].pins.clone();
            for pin_id in pin_ids {
                let Some(pin) = self.pins.get_mut(&pin_id) else {
                    continue;
                };
                let Some(expr) = &pin.generic else {
                    continue;
                };
                let stamped = expr.instantiate(&bindings);
                if pin.pin_type != stamped {
                    pin.pin_type = stamped;
                    changed.push(pin_id);
                }
            }
            for pin in changed {
                for peer in self.linked_to(pin) {
                    if let Some(owner) = self.owner(peer) {
                        if !queue.contains(&owner) {
                            queue.push_back(owner);
                        }
                    }
                }
            }
        }
    }
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Graph ({} nodes, {} links)",
            self.nodes.len(),
            self.links.len()
        )?;
        for var in self.variables.values() {
            writeln!(f, "  var {}: {}", var.name, var.ty)?;
        }
        for node in self.nodes.values() {
            match node.spawned_from {
                Some(src) => writeln!(f, "  {} {} (from {})", node.id, node.kind, src)?,
                None => writeln!(f, "  {} {}", node.id, node.kind)?,
            }
            for pin in self.pins_of(node.id) {
                let dir = match pin.direction {
                    PinDirection::Input => "in ",
                    PinDirection::Output => "out",
                };
                match &pin.default_value {
                    Some(v) => writeln!(f, "    {} {}: {} = {}", dir, pin.name, pin.pin_type, v)?,
                    None => writeln!(f, "    {} {}: {}", dir, pin.name, pin.pin_type)?,
                }
            }
        }
        let mut links = self.links.clone();
        links.sort();
        for link in links {
            writeln!(
                f,
                "  {} -> {}",
                self.describe_pin(link.from),
                self.describe_pin(link.to)
            )?;
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
