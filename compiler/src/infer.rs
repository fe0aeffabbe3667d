// infer.rs — Cross-unit dependency inference
//
// Compresses each node's raw predecessor set into the minimal set of
// dependencies its execution unit must actually wait on: start nodes are
// dropped, same-unit predecessors are dropped (sequential execution already
// orders them), and per source unit only the predecessor with the greatest
// sequence step is retained.
//
// Preconditions: the hazard graph is fully constructed; steps are current.
// Postconditions: every live non-start node's `depends` holds at most one
//                 entry per foreign unit, sorted by unit id.
// Failure modes: none (pure reduction over fixed predecessor sets).
// Side effects: rewrites `depends` on every live node.

use std::collections::BTreeMap;

use crate::dag::{InstructionDag, OpId};
use crate::ir::Instruction;

/// Infer the filtered dependency list for every live node. Visits each node
/// exactly once, in arena order; the result is independent of visitation
/// order because it only reads the node's own predecessor set.
pub fn infer_dependencies(dag: &mut InstructionDag) {
    for id in dag.live_ops() {
        let node = dag.node(id);
        if node.inst == Instruction::Start {
            continue;
        }

        // Per foreign unit, keep the latest predecessor.
        let mut latest: BTreeMap<u32, OpId> = BTreeMap::new();
        for &p in &node.prev {
            let dep = dag.node(p);
            if dep.inst == Instruction::Start {
                continue;
            }
            let Some(dep_tb) = dep.tb else { continue };
            if Some(dep_tb) == node.tb {
                continue;
            }
            let replace = match latest.get(&dep_tb) {
                Some(&cur) => dag.node(cur).step < dep.step,
                None => true,
            };
            if replace {
                latest.insert(dep_tb, p);
            }
        }

        let depends: Vec<OpId> = latest.into_values().collect();
        dag.node_mut(id).depends = depends;
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
