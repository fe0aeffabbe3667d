// meta.rs — Scheduling metadata: chunk_step and priority
//
// chunk_step is the forward distance from the start nodes (start sits at
// -1); priority counts the longest chain of work still ahead of a node, so
// the emitter can schedule long chains first. Send-family nodes chase their
// paired recv in both directions: the recv is one step downstream of its
// send even though it is not a hazard successor.
//
// Both walks are iterative — forward monotonic relaxation for chunk_step,
// reverse-topological accumulation for priority — so graph depth never
// translates into call depth.
//
// Preconditions: the graph (including pairing edges) is acyclic.
// Postconditions: priority(node) ≥ priority(successor) + 1 for every
//                 successor, and ≥ priority(paired recv) + 1 for send-family.
// Failure modes: none.
// Side effects: rewrites chunk_step and priority on every live node.

use std::collections::VecDeque;

use crate::dag::{InstructionDag, OpId};
use crate::ir::Instruction;

/// Compute chunk_step and priority for every live node.
pub fn complete_metadata(dag: &mut InstructionDag) {
    relax_chunk_steps(dag);
    accumulate_priorities(dag);
}

/// Forward monotonic relaxation: a node may be revisited and its value only
/// ever increases.
fn relax_chunk_steps(dag: &mut InstructionDag) {
    let mut queue: VecDeque<OpId> = VecDeque::new();
    for id in dag.live_ops() {
        if dag.node(id).inst == Instruction::Start {
            dag.node_mut(id).chunk_step = -1;
            queue.push_back(id);
        }
    }

    while let Some(id) = queue.pop_front() {
        let cs = dag.node(id).chunk_step;
        for succ in dag.successors(id) {
            if dag.node(succ).retired {
                continue;
            }
            if dag.node(succ).chunk_step < cs + 1 {
                dag.node_mut(succ).chunk_step = cs + 1;
                queue.push_back(succ);
            }
        }
    }
}

/// Reverse-topological accumulation over hazard plus pairing edges. A node
/// with no forward edges gets priority 0; each processed node then raises
/// its predecessors (and, for a paired recv, its sender) to at least its own
/// priority + 1.
fn accumulate_priorities(dag: &mut InstructionDag) {
    let live = dag.live_ops();
    for &id in &live {
        dag.node_mut(id).priority = 0;
    }

    let mut outdeg: Vec<u32> = Vec::new();
    let mut index_of = std::collections::BTreeMap::new();
    for (i, &id) in live.iter().enumerate() {
        index_of.insert(id, i);
        let node = dag.node(id);
        let mut d = node.next.len() as u32;
        if node.inst.is_send() && node.recv_match.is_some() {
            d += 1;
        }
        outdeg.push(d);
    }

    let mut queue: VecDeque<OpId> = live
        .iter()
        .copied()
        .filter(|&id| index_of.get(&id).map(|&i| outdeg[i] == 0).unwrap_or(false))
        .collect();

    while let Some(id) = queue.pop_front() {
        let pri = dag.node(id).priority;
        let preds: Vec<OpId> = dag.node(id).prev.iter().copied().collect();
        for p in preds {
            let Some(&pi) = index_of.get(&p) else { continue };
            if dag.node(p).priority < pri + 1 {
                dag.node_mut(p).priority = pri + 1;
            }
            outdeg[pi] -= 1;
            if outdeg[pi] == 0 {
                queue.push_back(p);
            }
        }
        // The pairing edge send -> recv reverses here: finishing the recv
        // releases (and raises) its sender.
        if let Some(sender) = dag.node(id).send_match {
            if let Some(&si) = index_of.get(&sender) {
                if dag.node(sender).priority < pri + 1 {
                    dag.node_mut(sender).priority = pri + 1;
                }
                outdeg[si] -= 1;
                if outdeg[si] == 0 {
                    queue.push_back(sender);
                }
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
