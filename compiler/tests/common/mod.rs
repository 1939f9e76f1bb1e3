// Shared helpers for integration tests: document fixtures, a compile helper
// and a small reference executor for lowered graphs.
//
// The executor exists only to check what a lowered graph *does*. Pure nodes
// are evaluated on demand each time an input reads them; impure nodes run
// when exec flow reaches them and cache their outputs. A sequence runs
// `then_0` to completion before `then_1`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use fmc::diag::Diagnostic;
use fmc::graph::{pn, Graph, NodeKind, PinDirection};
use fmc::id::{NodeId, PinId};
use fmc::pass::PassId;
use fmc::pipeline::{run_pipeline, CompilationState};
use fmc::registry::Registry;
use fmc::types::{ContainerType, PinCategory, PinType};

// ── Fixtures ────────────────────────────────────────────────────────────────

pub fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .to_path_buf()
}

pub fn graphs_dir() -> PathBuf {
    project_root().join("graphs")
}

/// `Begin → for each (K, V) in Scores { body(K, V) } → done` over the given
/// string-keyed, int-valued map.
pub fn scores_doc(scores: &serde_json::Value) -> String {
    serde_json::json!({
        "variables": [{
            "name": "Scores",
            "type": {"category": "string", "container": "map", "value_type": {"category": "int"}},
            "default": scores
        }],
        "nodes": [
            {"id": "begin", "kind": "event", "name": "Begin"},
            {"id": "scores", "kind": "variable_get", "variable": "Scores"},
            {"id": "loop", "kind": "for_each_map"},
            {"id": "body", "kind": "probe", "label": "body", "inputs": ["K", "V"]},
            {"id": "done", "kind": "probe", "label": "done"}
        ],
        "links": [
            {"from": "begin.then", "to": "loop.execute"},
            {"from": "scores.Scores", "to": "loop.Map"},
            {"from": "loop.LoopBody", "to": "body.execute"},
            {"from": "loop.Key", "to": "body.K"},
            {"from": "loop.Value", "to": "body.V"},
            {"from": "loop.Completed", "to": "done.execute"}
        ]
    })
    .to_string()
}

pub fn load(doc: &str) -> Graph {
    fmc::document::load(doc, &Registry::builtin())
        .unwrap_or_else(|e| panic!("failed to load document: {e}"))
        .graph
}

/// Run every pass and return the lowered graph. Panics on diagnostics of
/// error level.
pub fn compile(source: &Graph) -> Graph {
    let mut state = CompilationState::new(source.clone(), Registry::builtin());
    if let Err(e) = run_pipeline(&mut state, PassId::Validate, |_, _| {}) {
        panic!("{e}: {:#?}", state.diagnostics);
    }
    state.lowered().cloned().expect("lowered graph")
}

/// Like `compile`, also returning every diagnostic the passes reported.
pub fn compile_reporting(source: &Graph) -> (Graph, Vec<Diagnostic>) {
    let mut state = CompilationState::new(source.clone(), Registry::builtin());
    if let Err(e) = run_pipeline(&mut state, PassId::Validate, |_, _| {}) {
        panic!("{e}: {:#?}", state.diagnostics);
    }
    let lowered = state.lowered().cloned().expect("lowered graph");
    (lowered, state.diagnostics)
}

pub fn compile_doc(doc: &str) -> Graph {
    compile(&load(doc))
}

// ── Values ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<Value>),
    /// Entries in insertion order.
    Map(Vec<(Value, Value)>),
}

impl Value {
    pub fn str(s: &str) -> Value {
        Value::Str(s.to_string())
    }

    fn as_int(&self) -> i64 {
        match self {
            Value::Int(i) => *i,
            other => panic!("expected int, got {other:?}"),
        }
    }

    fn as_bool(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            other => panic!("expected bool, got {other:?}"),
        }
    }

    fn as_map(&self) -> &[(Value, Value)] {
        match self {
            Value::Map(entries) => entries,
            other => panic!("expected map, got {other:?}"),
        }
    }

    fn as_map_mut(&mut self) -> &mut Vec<(Value, Value)> {
        match self {
            Value::Map(entries) => entries,
            other => panic!("expected map, got {other:?}"),
        }
    }

    /// Zero value of a scalar category.
    fn zero(ty: &PinType) -> Value {
        match (ty.container, ty.category) {
            (ContainerType::Array, _) => Value::Array(Vec::new()),
            (ContainerType::Map, _) => Value::Map(Vec::new()),
            (_, PinCategory::Bool) => Value::Bool(false),
            (_, PinCategory::Int) | (_, PinCategory::Int64) | (_, PinCategory::Byte) => {
                Value::Int(0)
            }
            (_, PinCategory::Float) => Value::Float(0.0),
            (_, PinCategory::String) | (_, PinCategory::Name) | (_, PinCategory::Text) => {
                Value::Str(String::new())
            }
            _ => Value::Null,
        }
    }

    /// Literal pin default, read according to the pin type.
    fn literal(ty: &PinType, text: &str) -> Value {
        match ty.category {
            PinCategory::Bool => Value::Bool(text == "true"),
            PinCategory::Int | PinCategory::Int64 | PinCategory::Byte => {
                Value::Int(text.parse().unwrap_or(0))
            }
            PinCategory::Float => Value::Float(text.parse().unwrap_or(0.0)),
            PinCategory::String | PinCategory::Name | PinCategory::Text => Value::str(text),
            _ => Value::Null,
        }
    }

    /// Initial value of a declared variable.
    pub fn from_json(ty: &PinType, json: &serde_json::Value) -> Value {
        match (ty.container, json) {
            (ContainerType::Map, serde_json::Value::Object(obj)) => {
                let key_ty = ty.element();
                let value_ty = PinType::from_terminal(&ty.value_type);
                Value::Map(
                    obj.iter()
                        .map(|(k, v)| (Value::literal(&key_ty, k), Value::from_json(&value_ty, v)))
                        .collect(),
                )
            }
            (ContainerType::Array, serde_json::Value::Array(items)) => {
                let elem = ty.element();
                Value::Array(items.iter().map(|v| Value::from_json(&elem, v)).collect())
            }
            (_, serde_json::Value::Null) => Value::zero(ty),
            (_, serde_json::Value::Bool(b)) => Value::Bool(*b),
            (_, serde_json::Value::Number(n)) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(0.0)),
            },
            (_, serde_json::Value::String(s)) => Value::Str(s.clone()),
            _ => Value::Null,
        }
    }
}

// ── Executor ────────────────────────────────────────────────────────────────

/// One probe firing: its label and the values on its data inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct Firing {
    pub label: String,
    pub inputs: Vec<Value>,
}

enum Storage {
    Var(String),
    Temp(NodeId),
}

pub struct Executor<'g> {
    graph: &'g Graph,
    pub vars: HashMap<String, Value>,
    pub temps: HashMap<NodeId, Value>,
    cache: HashMap<PinId, Value>,
    pub trace: Vec<Firing>,
    pub steps: usize,
    max_steps: usize,
}

impl<'g> Executor<'g> {
    pub fn new(graph: &'g Graph) -> Self {
        let vars = graph
            .variables()
            .map(|v| (v.name.clone(), Value::from_json(&v.ty, &v.default)))
            .collect();
        Executor {
            graph,
            vars,
            temps: HashMap::new(),
            cache: HashMap::new(),
            trace: Vec::new(),
            steps: 0,
            max_steps: 10_000,
        }
    }

    fn pin(&self, node: NodeId, name: &str) -> PinId {
        self.graph
            .find_pin(node, name)
            .unwrap_or_else(|| panic!("{node} has no pin {name}"))
    }

    fn kind(&self, node: NodeId) -> &'g NodeKind {
        let graph: &'g Graph = self.graph;
        &graph.node(node).expect("node").kind
    }

    /// Fire the event with the given name and run until exec flow ends.
    pub fn run(&mut self, event: &str) -> Result<(), String> {
        let start = self
            .graph
            .nodes()
            .find(|n| matches!(&n.kind, NodeKind::Event { name } if name == event))
            .map(|n| n.id)
            .ok_or_else(|| format!("no event {event}"))?;
        let mut pending = vec![self.pin(start, pn::THEN)];
        while let Some(out) = pending.pop() {
            for target in self.graph.linked_to(out) {
                self.steps += 1;
                if self.steps > self.max_steps {
                    return Err("step limit exceeded".to_string());
                }
                let node = self.graph.owner(target).expect("owner");
                let mut next = self.exec(node)?;
                next.reverse();
                pending.extend(next);
            }
        }
        Ok(())
    }

    /// Run one impure node; returns the exec outputs to continue from, in
    /// the order they should run.
    fn exec(&mut self, node: NodeId) -> Result<Vec<PinId>, String> {
        match self.kind(node) {
            NodeKind::Construct(_) => Err(format!("{node} is a construct that was never lowered")),
            NodeKind::Event { .. } => Ok(vec![self.pin(node, pn::THEN)]),
            NodeKind::Branch => {
                let cond = self.eval_input(self.pin(node, pn::CONDITION)).as_bool();
                let out = if cond { pn::THEN } else { pn::ELSE };
                Ok(vec![self.pin(node, out)])
            }
            NodeKind::Sequence { outputs } => Ok((0..*outputs)
                .map(|i| self.pin(node, &pn::sequence_then(i)))
                .collect()),
            NodeKind::Assignment => {
                let value = self.eval_input(self.pin(node, pn::VALUE));
                let storage = self.storage(self.pin(node, pn::VARIABLE))?;
                *self.slot(storage) = value;
                Ok(vec![self.pin(node, pn::THEN)])
            }
            NodeKind::Probe { label } => {
                let graph = self.graph;
                let pins: Vec<PinId> = graph
                    .pins_of(node)
                    .filter(|p| p.direction == PinDirection::Input && !p.is_exec())
                    .map(|p| p.id)
                    .collect();
                let inputs = pins.into_iter().map(|p| self.eval_input(p)).collect();
                self.trace.push(Firing {
                    label: label.clone(),
                    inputs,
                });
                Ok(vec![self.pin(node, pn::THEN)])
            }
            NodeKind::CallFunction { function, .. } => {
                let outputs = self.call(node, function)?;
                for (name, value) in outputs {
                    let pin = self.pin(node, name);
                    self.cache.insert(pin, value);
                }
                Ok(vec![self.pin(node, pn::THEN)])
            }
            other => Err(format!("{node} ({other}) is not executable")),
        }
    }

    fn storage(&self, variable_pin: PinId) -> Result<Storage, String> {
        let peer = *self
            .graph
            .linked_to(variable_pin)
            .first()
            .ok_or_else(|| format!("{} is not linked", self.graph.describe_pin(variable_pin)))?;
        let owner = self.graph.owner(peer).expect("owner");
        match self.kind(owner) {
            NodeKind::VariableGet { variable } => Ok(Storage::Var(variable.clone())),
            NodeKind::TemporaryVariable { .. } => Ok(Storage::Temp(owner)),
            other => Err(format!("{other} is not a variable")),
        }
    }

    fn slot(&mut self, storage: Storage) -> &mut Value {
        match storage {
            Storage::Var(name) => self.vars.entry(name).or_insert(Value::Null),
            Storage::Temp(node) => {
                let zero = match self.kind(node) {
                    NodeKind::TemporaryVariable { variable_type } => Value::zero(variable_type),
                    _ => Value::Null,
                };
                self.temps.entry(node).or_insert(zero)
            }
        }
    }

    /// Value on a data input: first link wins, else the pin's literal.
    fn eval_input(&mut self, pin: PinId) -> Value {
        let graph = self.graph;
        let p = graph.pin(pin).expect("pin");
        match graph.linked_to(pin).first() {
            Some(&src) => self.eval_output(src),
            None => match &p.default_value {
                Some(text) => Value::literal(&p.pin_type, text),
                None => Value::zero(&p.pin_type),
            },
        }
    }

    fn eval_output(&mut self, pin: PinId) -> Value {
        let graph = self.graph;
        let p = graph.pin(pin).expect("pin");
        let node = p.owner;
        match self.kind(node) {
            NodeKind::VariableGet { variable } => {
                self.vars.get(variable).cloned().unwrap_or(Value::Null)
            }
            NodeKind::TemporaryVariable { .. } => self.slot(Storage::Temp(node)).clone(),
            NodeKind::GetArrayItem => {
                let array = self.eval_input(self.pin(node, pn::ARRAY));
                let index = self.eval_input(self.pin(node, pn::INDEX)).as_int();
                match array {
                    Value::Array(items) => items
                        .get(index as usize)
                        .cloned()
                        .unwrap_or_else(|| Value::zero(&p.pin_type)),
                    other => panic!("expected array, got {other:?}"),
                }
            }
            NodeKind::CallFunction { function, pure: true } => {
                let name = p.name.clone();
                let outputs = self.call(node, function).expect("pure call");
                outputs
                    .into_iter()
                    .find(|(n, _)| *n == name)
                    .map(|(_, v)| v)
                    .unwrap_or(Value::Null)
            }
            _ => self
                .cache
                .get(&pin)
                .cloned()
                .unwrap_or_else(|| Value::zero(&p.pin_type)),
        }
    }

    fn input(&mut self, node: NodeId, name: &str) -> Value {
        self.eval_input(self.pin(node, name))
    }

    fn call(&mut self, node: NodeId, function: &str) -> Result<Vec<(&'static str, Value)>, String> {
        let out = match function {
            "Map_Length" => {
                let map = self.input(node, pn::TARGET_MAP);
                vec![(pn::RETURN_VALUE, Value::Int(map.as_map().len() as i64))]
            }
            "Map_Keys" => {
                let map = self.input(node, pn::TARGET_MAP);
                let keys = map.as_map().iter().map(|(k, _)| k.clone()).collect();
                vec![(pn::KEYS, Value::Array(keys))]
            }
            "Map_Find" => {
                let map = self.input(node, pn::TARGET_MAP);
                let key = self.input(node, pn::KEY);
                let found = map.as_map().iter().find(|(k, _)| *k == key).map(|(_, v)| v.clone());
                let value_pin = self.pin(node, pn::VALUE);
                let value_ty = self.graph.pin(value_pin).expect("pin").pin_type.clone();
                vec![
                    (pn::RETURN_VALUE, Value::Bool(found.is_some())),
                    (pn::VALUE, found.unwrap_or_else(|| Value::zero(&value_ty))),
                ]
            }
            "Map_Add" => {
                let key = self.input(node, pn::KEY);
                let value = self.input(node, pn::VALUE);
                let storage = self.storage(self.pin(node, pn::TARGET_MAP))?;
                let entries = self.slot(storage).as_map_mut();
                match entries.iter_mut().find(|(k, _)| *k == key) {
                    Some(entry) => entry.1 = value,
                    None => entries.push((key, value)),
                }
                Vec::new()
            }
            "Map_Remove" => {
                let key = self.input(node, pn::KEY);
                let storage = self.storage(self.pin(node, pn::TARGET_MAP))?;
                let entries = self.slot(storage).as_map_mut();
                let before = entries.len();
                entries.retain(|(k, _)| *k != key);
                vec![(pn::RETURN_VALUE, Value::Bool(entries.len() != before))]
            }
            "Less_IntInt" => {
                let a = self.input(node, pn::A).as_int();
                let b = self.input(node, pn::B).as_int();
                vec![(pn::RETURN_VALUE, Value::Bool(a < b))]
            }
            "Add_IntInt" => {
                let a = self.input(node, pn::A).as_int();
                let b = self.input(node, pn::B).as_int();
                vec![(pn::RETURN_VALUE, Value::Int(a + b))]
            }
            other => return Err(format!("no reference semantics for {other}")),
        };
        Ok(out)
    }

    /// Firings of probes with the given label.
    pub fn firings(&self, label: &str) -> Vec<&Firing> {
        self.trace.iter().filter(|f| f.label == label).collect()
    }
}

/// The counter temporary of a lowered loop: the temp feeding `Add_IntInt.A`.
pub fn counter_of(graph: &Graph, add: NodeId) -> NodeId {
    let a = graph.find_pin(add, pn::A).expect("Add_IntInt.A");
    let src = graph.linked_to(a)[0];
    graph.owner(src).expect("owner")
}

/// Nodes running the given primitive.
pub fn calls(graph: &Graph, function: &str) -> Vec<NodeId> {
    graph
        .nodes()
        .filter(|n| matches!(&n.kind, NodeKind::CallFunction { function: f, .. } if f == function))
        .map(|n| n.id)
        .collect()
}

/// Run `Begin` on a lowered graph and return the executor.
pub fn execute(graph: &Graph) -> Executor<'_> {
    let mut exec = Executor::new(graph);
    exec.run("Begin")
        .unwrap_or_else(|e| panic!("execution failed: {e}"));
    exec
}
