// End-to-end lowering tests.
//
// Each test loads a graph document, runs the full pipeline and then executes
// the lowered graph with the reference executor in `common`, checking what
// the loop actually does: how often the body fires, which key/value pairs it
// sees, and what happens to the completion chain.

mod common;

use common::{
    calls, compile, compile_doc, compile_reporting, counter_of, execute, load, scores_doc, Value,
};
use fmc::diag::{codes, DiagLevel};
use fmc::graph::{NodeKind, PinDirection};
use fmc::registry::{ADD_INT_INT, MAP_KEYS};
use serde_json::json;

fn pairs(exec: &common::Executor<'_>, label: &str) -> Vec<(Value, Value)> {
    exec.firings(label)
        .into_iter()
        .map(|f| (f.inputs[0].clone(), f.inputs[1].clone()))
        .collect()
}

// ── Iteration ───────────────────────────────────────────────────────────────

#[test]
fn two_entries_fire_body_twice_then_complete() {
    let g = compile_doc(&scores_doc(&json!({"a": 1, "b": 2})));
    let exec = execute(&g);

    assert_eq!(
        pairs(&exec, "body"),
        vec![
            (Value::str("a"), Value::Int(1)),
            (Value::str("b"), Value::Int(2)),
        ]
    );
    assert_eq!(exec.firings("done").len(), 1);
    // completion runs after every body firing
    assert_eq!(exec.trace.last().unwrap().label, "done");

    let add = calls(&g, ADD_INT_INT)[0];
    let counter = counter_of(&g, add);
    assert_eq!(exec.temps[&counter], Value::Int(2));
}

#[test]
fn empty_map_skips_body_and_completes() {
    let g = compile_doc(&scores_doc(&json!({})));
    let exec = execute(&g);
    assert!(exec.firings("body").is_empty());
    assert_eq!(exec.firings("done").len(), 1);
}

#[test]
fn single_entry_fires_once() {
    let g = compile_doc(&scores_doc(&json!({"only": 42})));
    let exec = execute(&g);
    assert_eq!(
        pairs(&exec, "body"),
        vec![(Value::str("only"), Value::Int(42))]
    );
    assert_eq!(exec.firings("done").len(), 1);
}

#[test]
fn many_entries_visit_each_key_once_in_key_order() {
    let mut scores = serde_json::Map::new();
    for i in 0..20 {
        scores.insert(format!("k{i:02}"), json!(i * 10));
    }
    let g = compile_doc(&scores_doc(&serde_json::Value::Object(scores)));
    let exec = execute(&g);

    let seen = pairs(&exec, "body");
    assert_eq!(seen.len(), 20);
    for (i, (k, v)) in seen.iter().enumerate() {
        assert_eq!(*k, Value::Str(format!("k{i:02}")));
        assert_eq!(*v, Value::Int(i as i64 * 10));
    }
    assert_eq!(exec.firings("done").len(), 1);
}

#[test]
fn value_always_belongs_to_key() {
    let g = compile_doc(&scores_doc(&json!({"x": -3, "y": 7, "z": 0})));
    let exec = execute(&g);
    let scores = &exec.vars["Scores"];
    let Value::Map(entries) = scores else {
        panic!("Scores is not a map: {scores:?}");
    };
    for (k, v) in pairs(&exec, "body") {
        let expected = entries.iter().find(|(ek, _)| *ek == k).map(|(_, ev)| ev);
        assert_eq!(Some(&v), expected, "value for {k:?}");
    }
}

// ── Structure ───────────────────────────────────────────────────────────────

#[test]
fn lowered_graph_has_no_constructs() {
    let g = compile_doc(&scores_doc(&json!({"a": 1})));
    assert!(g.construct_ids().is_empty());
    assert!(g
        .nodes()
        .all(|n| !matches!(n.kind, NodeKind::Construct(_))));
    // begin, scores, body, done plus the expansion
    assert_eq!(g.node_count(), 4 + 15);
}

#[test]
fn every_data_input_has_at_most_one_link() {
    let g = compile_doc(&scores_doc(&json!({"a": 1})));
    for node in g.nodes() {
        for pin in g.pins_of(node.id) {
            if pin.direction == PinDirection::Input && !pin.is_exec() {
                assert!(
                    g.linked_to(pin.id).len() <= 1,
                    "{} has several links",
                    g.describe_pin(pin.id)
                );
            }
        }
    }
}

#[test]
fn compiling_twice_gives_identical_graphs() {
    let source = load(&scores_doc(&json!({"a": 1, "b": 2})));
    let first = compile(&source);
    let second = compile(&source);
    assert_eq!(first.to_string(), second.to_string());
    assert_eq!(
        fmc::document::to_json(&first).unwrap(),
        fmc::document::to_json(&second).unwrap()
    );
}

// ── Several containers on one loop ──────────────────────────────────────────

/// `First` then `Second`, both linked into the same loop's Map input.
fn two_containers_doc() -> String {
    let ty = json!({"category": "string", "container": "map", "value_type": {"category": "int"}});
    json!({
        "variables": [
            {"name": "First", "type": ty, "default": {"a": 1}},
            {"name": "Second", "type": ty, "default": {"x": 5, "y": 6}}
        ],
        "nodes": [
            {"id": "begin", "kind": "event", "name": "Begin"},
            {"id": "first", "kind": "variable_get", "variable": "First"},
            {"id": "second", "kind": "variable_get", "variable": "Second"},
            {"id": "loop", "kind": "for_each_map"},
            {"id": "body", "kind": "probe", "label": "body", "inputs": ["K", "V"]},
            {"id": "done", "kind": "probe", "label": "done"}
        ],
        "links": [
            {"from": "begin.then", "to": "loop.execute"},
            {"from": "first.First", "to": "loop.Map"},
            {"from": "second.Second", "to": "loop.Map"},
            {"from": "loop.LoopBody", "to": "body.execute"},
            {"from": "loop.Key", "to": "body.K"},
            {"from": "loop.Value", "to": "body.V"},
            {"from": "loop.Completed", "to": "done.execute"}
        ]
    })
    .to_string()
}

#[test]
fn first_linked_container_is_the_one_iterated() {
    let (g, diags) = compile_reporting(&load(&two_containers_doc()));
    let exec = execute(&g);
    assert_eq!(pairs(&exec, "body"), vec![(Value::str("a"), Value::Int(1))]);
    assert_eq!(exec.firings("done").len(), 1);

    // Keys, Length and Find all read First; Second feeds nothing
    for node in g.nodes() {
        for pin in g.pins_of(node.id) {
            if pin.name == "TargetMap" {
                let linked: Vec<String> =
                    g.linked_to(pin.id).iter().map(|p| g.describe_pin(*p)).collect();
                assert_eq!(linked.len(), 1);
                assert!(linked[0].ends_with(".First"), "{linked:?}");
            }
        }
    }

    let extra: Vec<_> = diags
        .iter()
        .filter(|d| d.code == Some(codes::W0102))
        .collect();
    assert_eq!(extra.len(), 1, "{diags:#?}");
    assert_eq!(extra[0].level, DiagLevel::Warning);
    assert!(extra[0].message.contains(".Map has 2 links"), "{}", extra[0].message);
}

// ── Body mutations ──────────────────────────────────────────────────────────

fn mutating_doc(function: &str, key: &str) -> String {
    let mut defaults = json!({"Key": key});
    if function == "Map_Add" {
        defaults["Value"] = json!("9");
    }
    json!({
        "variables": [{
            "name": "Scores",
            "type": {"category": "string", "container": "map", "value_type": {"category": "int"}},
            "default": {"a": 1, "b": 2, "c": 3}
        }],
        "nodes": [
            {"id": "begin", "kind": "event", "name": "Begin"},
            {"id": "scores", "kind": "variable_get", "variable": "Scores"},
            {"id": "loop", "kind": "for_each_map"},
            {"id": "mutate", "kind": "call", "function": function, "defaults": defaults},
            {"id": "body", "kind": "probe", "label": "body", "inputs": ["K", "V"]},
            {"id": "done", "kind": "probe", "label": "done"}
        ],
        "links": [
            {"from": "begin.then", "to": "loop.execute"},
            {"from": "scores.Scores", "to": "loop.Map"},
            {"from": "scores.Scores", "to": "mutate.TargetMap"},
            {"from": "loop.LoopBody", "to": "mutate.execute"},
            {"from": "mutate.then", "to": "body.execute"},
            {"from": "loop.Key", "to": "body.K"},
            {"from": "loop.Value", "to": "body.V"},
            {"from": "loop.Completed", "to": "done.execute"}
        ]
    })
    .to_string()
}

#[test]
fn adding_keys_in_body_does_not_extend_iteration() {
    let g = compile_doc(&mutating_doc("Map_Add", "z"));
    let exec = execute(&g);

    let keys: Vec<Value> = pairs(&exec, "body").into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec![Value::str("a"), Value::str("b"), Value::str("c")]);
    assert_eq!(exec.firings("done").len(), 1);

    let Value::Map(entries) = &exec.vars["Scores"] else {
        panic!("Scores is not a map");
    };
    assert_eq!(entries.len(), 4);
    assert!(entries.contains(&(Value::str("z"), Value::Int(9))));
}

#[test]
fn removing_a_pending_key_still_visits_it_with_default_value() {
    let g = compile_doc(&mutating_doc("Map_Remove", "c"));
    let exec = execute(&g);

    assert_eq!(
        pairs(&exec, "body"),
        vec![
            (Value::str("a"), Value::Int(1)),
            (Value::str("b"), Value::Int(2)),
            (Value::str("c"), Value::Int(0)),
        ]
    );
    assert_eq!(exec.firings("done").len(), 1);
}

#[test]
fn overwriting_a_pending_value_is_seen_by_later_iterations() {
    let g = compile_doc(&mutating_doc("Map_Add", "c"));
    let exec = execute(&g);
    assert_eq!(
        pairs(&exec, "body"),
        vec![
            (Value::str("a"), Value::Int(1)),
            (Value::str("b"), Value::Int(2)),
            (Value::str("c"), Value::Int(9)),
        ]
    );
}

// ── Several loops ───────────────────────────────────────────────────────────

fn two_maps() -> serde_json::Value {
    json!([
        {"name": "Outer",
         "type": {"category": "string", "container": "map", "value_type": {"category": "int"}},
         "default": {"p": 1, "q": 2}},
        {"name": "Inner",
         "type": {"category": "int", "container": "map", "value_type": {"category": "bool"}},
         "default": {"10": true, "20": false, "30": true}}
    ])
}

#[test]
fn chained_loops_run_one_after_the_other() {
    let doc = json!({
        "variables": two_maps(),
        "nodes": [
            {"id": "begin", "kind": "event", "name": "Begin"},
            {"id": "outer", "kind": "variable_get", "variable": "Outer"},
            {"id": "inner", "kind": "variable_get", "variable": "Inner"},
            {"id": "first", "kind": "for_each_map"},
            {"id": "second", "kind": "for_each_map"},
            {"id": "a", "kind": "probe", "label": "a", "inputs": ["K", "V"]},
            {"id": "b", "kind": "probe", "label": "b", "inputs": ["K", "V"]},
            {"id": "done", "kind": "probe", "label": "done"}
        ],
        "links": [
            {"from": "begin.then", "to": "first.execute"},
            {"from": "outer.Outer", "to": "first.Map"},
            {"from": "first.LoopBody", "to": "a.execute"},
            {"from": "first.Key", "to": "a.K"},
            {"from": "first.Value", "to": "a.V"},
            {"from": "first.Completed", "to": "second.execute"},
            {"from": "inner.Inner", "to": "second.Map"},
            {"from": "second.LoopBody", "to": "b.execute"},
            {"from": "second.Key", "to": "b.K"},
            {"from": "second.Value", "to": "b.V"},
            {"from": "second.Completed", "to": "done.execute"}
        ]
    })
    .to_string();
    let g = compile_doc(&doc);
    assert_eq!(calls(&g, MAP_KEYS).len(), 2);
    let exec = execute(&g);

    let labels: Vec<&str> = exec.trace.iter().map(|f| f.label.as_str()).collect();
    assert_eq!(labels, vec!["a", "a", "b", "b", "b", "done"]);
    // keys come back in the order the map stores them
    assert_eq!(
        pairs(&exec, "b"),
        vec![
            (Value::Int(10), Value::Bool(true)),
            (Value::Int(20), Value::Bool(false)),
            (Value::Int(30), Value::Bool(true)),
        ]
    );
}

#[test]
fn nested_loop_runs_fully_for_each_outer_entry() {
    let doc = json!({
        "variables": two_maps(),
        "nodes": [
            {"id": "begin", "kind": "event", "name": "Begin"},
            {"id": "outer", "kind": "variable_get", "variable": "Outer"},
            {"id": "inner", "kind": "variable_get", "variable": "Inner"},
            {"id": "outer_loop", "kind": "for_each_map"},
            {"id": "inner_loop", "kind": "for_each_map"},
            {"id": "pair", "kind": "probe", "label": "pair", "inputs": ["Outer", "Inner"]},
            {"id": "inner_done", "kind": "probe", "label": "inner_done"},
            {"id": "done", "kind": "probe", "label": "done"}
        ],
        "links": [
            {"from": "begin.then", "to": "outer_loop.execute"},
            {"from": "outer.Outer", "to": "outer_loop.Map"},
            {"from": "outer_loop.LoopBody", "to": "inner_loop.execute"},
            {"from": "inner.Inner", "to": "inner_loop.Map"},
            {"from": "inner_loop.LoopBody", "to": "pair.execute"},
            {"from": "outer_loop.Key", "to": "pair.Outer"},
            {"from": "inner_loop.Key", "to": "pair.Inner"},
            {"from": "inner_loop.Completed", "to": "inner_done.execute"},
            {"from": "outer_loop.Completed", "to": "done.execute"}
        ]
    })
    .to_string();
    let g = compile_doc(&doc);
    assert!(g.construct_ids().is_empty());
    let exec = execute(&g);

    assert_eq!(
        pairs(&exec, "pair"),
        vec![
            (Value::str("p"), Value::Int(10)),
            (Value::str("p"), Value::Int(20)),
            (Value::str("p"), Value::Int(30)),
            (Value::str("q"), Value::Int(10)),
            (Value::str("q"), Value::Int(20)),
            (Value::str("q"), Value::Int(30)),
        ]
    );
    assert_eq!(exec.firings("inner_done").len(), 2);
    assert_eq!(exec.firings("done").len(), 1);
    assert_eq!(exec.trace.last().unwrap().label, "done");
}
