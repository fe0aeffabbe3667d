// fuse.rs — Pattern-matching fusion passes
//
// Rewrites adjacent node pairs into single specialized instructions while
// preserving data-hazard semantics and cross-rank pairing:
//
//   recv + send                    -> recv_copy_send
//   recv_reduce_copy + send        -> recv_reduce_copy_send
//   recv_reduce_copy + send + recv -> recv_reduce_send   (the destination is
//                                     overwritten, so no durable copy needs
//                                     to persist at the sender)
//
// The surviving node inherits the excised send's destination and pairing;
// the send is spliced out of the graph. Every rewrite is gated on an
// acyclicity check and skipped if it would close a loop.
//
// Preconditions: hazard graph fully constructed.
// Postconditions: the graph remains acyclic; all pairings stay mutual.
// Failure modes: none (a disqualified rewrite is skipped, not an error).
// Side effects: mutates instruction kinds, destinations, pairings, edges.

use crate::dag::{InstructionDag, OpId};
use crate::ir::Instruction;

// ── Pattern predicates ──────────────────────────────────────────────────────

/// Same execution unit. Units are channel-bound, so this also implies the
/// same channel; the channel is compared anyway to keep the intent explicit.
fn same_unit(dag: &InstructionDag, a: OpId, b: OpId) -> bool {
    let (na, nb) = (dag.node(a), dag.node(b));
    na.tb == nb.tb && na.channel == nb.channel
}

fn same_size(dag: &InstructionDag, a: OpId, b: OpId) -> bool {
    dag.node(a).src.size == dag.node(b).src.size
}

fn same_dst(dag: &InstructionDag, a: OpId, b: OpId) -> bool {
    let (na, nb) = (dag.node(a), dag.node(b));
    na.dst.buffer == nb.dst.buffer && na.dst.index == nb.dst.index
}

// ── Rewrites ────────────────────────────────────────────────────────────────

/// Rewrite `keep` to the fused kind, give it the excised send's destination
/// and pairing, and splice the send out.
fn commit_fusion(dag: &mut InstructionDag, keep: OpId, send: OpId, fused: Instruction) {
    let send_dst = dag.node(send).dst.clone();
    let peer_recv = dag.node(send).recv_match;

    let node = dag.node_mut(keep);
    node.inst = fused;
    node.dst = send_dst;
    node.recv_match = peer_recv;
    if let Some(pr) = peer_recv {
        dag.node_mut(pr).send_match = Some(keep);
    }
    dag.excise(send, keep);
}

/// recv → send fusion: a recv whose qualifying successor is a send on the
/// same unit with equal size and destination becomes recv_copy_send.
pub fn fuse_recv_send(dag: &mut InstructionDag) {
    for id in dag.live_ops() {
        if dag.node(id).retired || dag.node(id).inst != Instruction::Recv {
            continue;
        }
        let succs: Vec<OpId> = dag.node(id).next.iter().copied().collect();
        for s in succs {
            let cand = dag.node(s);
            if cand.inst != Instruction::Send
                || cand.recv_match.is_none()
                || !same_unit(dag, id, s)
                || !same_size(dag, id, s)
                || !same_dst(dag, id, s)
            {
                continue;
            }
            if dag.would_form_cycle(id, s) {
                continue;
            }
            commit_fusion(dag, id, s, Instruction::RecvCopySend);
            break;
        }
    }
}

/// recv_reduce_copy → send fusion family: the unique successor send is
/// absorbed; if that send's own unique successor is a recv (the destination
/// is about to be overwritten) the result is recv_reduce_send, otherwise
/// recv_reduce_copy_send.
pub fn fuse_recv_reduce_send(dag: &mut InstructionDag) {
    for id in dag.live_ops() {
        if dag.node(id).retired || dag.node(id).inst != Instruction::RecvReduceCopy {
            continue;
        }
        if dag.node(id).next.len() != 1 {
            continue;
        }
        let Some(&s) = dag.node(id).next.iter().next() else {
            continue;
        };
        let cand = dag.node(s);
        if cand.inst != Instruction::Send
            || cand.recv_match.is_none()
            || !same_unit(dag, id, s)
            || !same_size(dag, id, s)
            || !same_dst(dag, id, s)
        {
            continue;
        }
        if dag.would_form_cycle(id, s) {
            continue;
        }

        let overwritten = dag.node(s).next.len() == 1
            && dag
                .node(s)
                .next
                .iter()
                .next()
                .map(|&nn| dag.node(nn).inst == Instruction::Recv)
                .unwrap_or(false);

        let fused = if overwritten {
            Instruction::RecvReduceSend
        } else {
            Instruction::RecvReduceCopySend
        };
        commit_fusion(dag, id, s, fused);
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
