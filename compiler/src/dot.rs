// dot.rs — Graphviz DOT output for instruction DAGs
//
// Transforms the hazard graph into DOT suitable for rendering with `dot`,
// `neato`, or other Graphviz layout engines. One cluster per rank; hazard
// edges are solid and stay inside their cluster, pairing edges cross
// clusters dashed.
//
// Preconditions: `dag` is a constructed InstructionDag (any phase).
// Postconditions: returns a valid DOT string; output is deterministic.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::fmt::Write;

use crate::dag::{InstructionDag, OpId};
use crate::ir::Instruction;

/// Emit the instruction DAG as a Graphviz DOT string.
pub fn emit_dot(dag: &InstructionDag) -> String {
    let mut buf = String::new();
    writeln!(buf, "digraph schedule {{").unwrap();
    writeln!(buf, "    rankdir=LR;").unwrap();
    writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];").unwrap();
    writeln!(buf, "    edge [fontname=\"Helvetica\", fontsize=9];").unwrap();

    let live = dag.live_ops();
    for rank in 0..dag.num_ranks() {
        let rank_ops: Vec<OpId> = live
            .iter()
            .copied()
            .filter(|&id| dag.node(id).rank == rank)
            .collect();
        if rank_ops.is_empty() {
            continue;
        }

        writeln!(buf).unwrap();
        writeln!(buf, "    subgraph cluster_rank{} {{", rank).unwrap();
        writeln!(buf, "        label=\"rank {}\";", rank).unwrap();
        writeln!(buf, "        style=rounded;").unwrap();
        writeln!(buf, "        color=gray50;").unwrap();
        for &id in &rank_ops {
            writeln!(buf, "        {} [{}];", id, node_attrs(dag, id)).unwrap();
        }

        writeln!(buf).unwrap();
        for &id in &rank_ops {
            for &next in &dag.node(id).next {
                writeln!(buf, "        {} -> {};", id, next).unwrap();
            }
        }
        writeln!(buf, "    }}").unwrap();
    }

    // Pairing edges (cross-rank, scheduling-only)
    let pairings: Vec<(OpId, OpId)> = live
        .iter()
        .copied()
        .filter_map(|id| dag.node(id).recv_match.map(|m| (id, m)))
        .collect();
    if !pairings.is_empty() {
        writeln!(buf).unwrap();
        writeln!(buf, "    // pairing edges").unwrap();
        for (send, recv) in pairings {
            writeln!(
                buf,
                "    {} -> {} [style=dashed, color=red, constraint=false];",
                send, recv
            )
            .unwrap();
        }
    }

    writeln!(buf, "}}").unwrap();
    buf
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn node_attrs(dag: &InstructionDag, id: OpId) -> String {
    let node = dag.node(id);
    let (shape, color) = if node.inst == Instruction::Start {
        ("ellipse", "gray90")
    } else if node.inst.is_send() {
        ("box", "lightsalmon")
    } else if node.inst.is_recv() {
        ("box", "lightgreen")
    } else {
        ("box", "lightblue")
    };
    let label = if node.inst == Instruction::Start {
        format!("{} {}", node.inst, node.src)
    } else {
        format!("{} {} -> {}", node.inst, node.src, node.dst)
    };
    format!(
        "shape={}, style=filled, fillcolor={}, label=\"{}\"",
        shape, color, label
    )
}

// ── Tests ───────────────────────────────────────────────────────────────────
