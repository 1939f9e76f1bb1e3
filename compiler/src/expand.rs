// expand.rs — Lowering of For Each Map into an indexed loop
//
// The construct becomes:
//
//   execute → Map_Keys → keys := Keys → length := Map_Length(Map)
//           → counter := 0 → branch(counter < length)
//   branch.then → sequence: then_0 → LoopBody
//                           then_1 → counter := counter + 1 → branch
//   branch.else → Completed
//
// with Key = keys[counter] and Value = Map_Find(Map, Key).Value. The key
// array and the length are captured once, before the first comparison, so
// the body may add or remove map entries without changing the iteration.
//
// Preconditions: the construct is `Expanding` and its pin types have been
//   propagated.
// Postconditions: all external links of the construct are re-homed onto the
//   spawned primitives; the construct holds no links.
// Failure modes: see `SubgraphBuilder`.
// Side effects: mutates the context graph.

use crate::builder::SubgraphBuilder;
use crate::construct::{Expandable, ForEachMap};
use crate::graph::pn;
use crate::id::NodeId;
use crate::lower::{CompilerContext, Expansion, LowerError};
use crate::registry::{ADD_INT_INT, LESS_INT_INT, MAP_FIND, MAP_KEYS, MAP_LENGTH};
use crate::types::PinType;

impl Expandable for ForEachMap {
    fn expand(&self, ctx: &mut CompilerContext<'_>, node: NodeId) -> Result<Expansion, LowerError> {
        let map_pin = ctx
            .graph
            .find_pin(node, pn::MAP)
            .ok_or_else(|| LowerError::MissingPin {
                node,
                pin: pn::MAP.to_string(),
            })?;
        let map_type = ctx
            .graph
            .pin(map_pin)
            .map(|p| p.pin_type.clone())
            .unwrap_or_else(PinType::wildcard_map);

        let mut b = SubgraphBuilder::new(&mut ctx.graph, ctx.registry, node);

        // ── Spawn ──
        let keys = b.spawn_call(MAP_KEYS)?;
        let keys_var = b.spawn_temporary(map_type.array_of());
        let keys_assign = b.spawn_assignment();
        let length = b.spawn_call(MAP_LENGTH)?;
        let length_var = b.spawn_temporary(PinType::int());
        let length_assign = b.spawn_assignment();
        let counter_var = b.spawn_temporary(PinType::int());
        let counter_init = b.spawn_assignment();
        let less = b.spawn_call(LESS_INT_INT)?;
        let branch = b.spawn_branch();
        let sequence = b.spawn_sequence(2);
        let item = b.spawn_get_array_item();
        let find = b.spawn_call(MAP_FIND)?;
        let add = b.spawn_call(ADD_INT_INT)?;
        let counter_assign = b.spawn_assignment();

        let then_0 = pn::sequence_then(0);
        let then_1 = pn::sequence_then(1);

        // ── Preamble: snapshot keys, capture length, zero counter ──
        b.move_links((node, pn::EXECUTE), (keys, pn::EXECUTE))?;
        b.copy_links((node, pn::MAP), (keys, pn::TARGET_MAP))?;
        b.connect((keys, pn::THEN), (keys_assign, pn::EXECUTE))?;
        b.connect((keys_var, pn::VARIABLE), (keys_assign, pn::VARIABLE))?;
        b.connect((keys, pn::KEYS), (keys_assign, pn::VALUE))?;

        b.copy_links((node, pn::MAP), (length, pn::TARGET_MAP))?;
        b.connect((keys_assign, pn::THEN), (length_assign, pn::EXECUTE))?;
        b.connect((length_var, pn::VARIABLE), (length_assign, pn::VARIABLE))?;
        b.connect((length, pn::RETURN_VALUE), (length_assign, pn::VALUE))?;

        b.connect((length_assign, pn::THEN), (counter_init, pn::EXECUTE))?;
        b.connect((counter_var, pn::VARIABLE), (counter_init, pn::VARIABLE))?;
        b.set_default((counter_init, pn::VALUE), "0")?;

        // ── Condition ──
        b.connect((counter_var, pn::VARIABLE), (less, pn::A))?;
        b.connect((length_var, pn::VARIABLE), (less, pn::B))?;
        b.connect((counter_init, pn::THEN), (branch, pn::EXECUTE))?;
        b.connect((less, pn::RETURN_VALUE), (branch, pn::CONDITION))?;
        b.move_links((node, pn::COMPLETED), (branch, pn::ELSE))?;
        b.connect((branch, pn::THEN), (sequence, pn::EXECUTE))?;

        // ── Body: Key = keys[counter], Value = Map[Key] ──
        b.connect((keys_var, pn::VARIABLE), (item, pn::ARRAY))?;
        b.connect((counter_var, pn::VARIABLE), (item, pn::INDEX))?;
        b.copy_links((node, pn::MAP), (find, pn::TARGET_MAP))?;
        b.connect((item, pn::OUTPUT), (find, pn::KEY))?;
        b.move_links((node, pn::KEY), (item, pn::OUTPUT))?;
        b.move_links((node, pn::VALUE), (find, pn::VALUE))?;
        b.move_links((node, pn::LOOP_BODY), (sequence, &then_0))?;

        // ── Increment and loop back ──
        b.connect((sequence, &then_1), (counter_assign, pn::EXECUTE))?;
        b.connect((counter_var, pn::VARIABLE), (add, pn::A))?;
        b.set_default((add, pn::B), "1")?;
        b.connect((counter_var, pn::VARIABLE), (counter_assign, pn::VARIABLE))?;
        b.connect((add, pn::RETURN_VALUE), (counter_assign, pn::VALUE))?;
        b.connect((counter_assign, pn::THEN), (branch, pn::EXECUTE))?;

        Ok(b.finish())
    }
}
