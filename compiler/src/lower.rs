// lower.rs — Buffer lowering
//
// Two responsibilities: assign every rank's scratch regions non-overlapping
// offsets into the single global scratch region (spaced by
// instance_size × instances so replicas fit), and rewrite lowered programs'
// chunk references from rank-local scratch names to globally addressed
// scratch indices. Input/output references pass through untouched.
//
// Preconditions: offsets are assigned before any chunk is globalized;
//                replication has already remapped per-instance local indices.
// Postconditions: no `Named` buffer reference survives in the program.
// Failure modes: undeclared scratch names / unassigned offsets → Diagnostic.
// Side effects: mutates buffer offsets and program chunk refs in place.

use crate::buffer::RankBuffers;
use crate::diag::{codes, Diagnostic};
use crate::ir::{ChunkRef, Program};
use crate::pass::StageCert;

// ── Offset assignment ───────────────────────────────────────────────────────

/// Assign each rank's scratch regions offsets into the global scratch
/// region, in stable declaration order.
pub fn lower_buffers(buffers: &mut [RankBuffers], instances: usize) {
    for rank_buffers in buffers.iter_mut() {
        let mut offset = 0;
        for scratch in rank_buffers.scratch_iter_mut() {
            scratch.set_offset(offset);
            offset += scratch.instance_size() * instances;
        }
    }
}

// ── Chunk globalization ─────────────────────────────────────────────────────

/// Rewrite one chunk reference: scratch names resolve to the global scratch
/// buffer at `offset + local index`; input/output pass through.
pub fn lower_chunk(buffers: &[RankBuffers], chunk: &ChunkRef) -> Result<ChunkRef, Diagnostic> {
    let crate::ir::BufferId::Named(name) = &chunk.buffer else {
        return Ok(chunk.clone());
    };
    let scratch = buffers[chunk.rank].scratch(name).ok_or_else(|| {
        Diagnostic::error(format!(
            "scratch buffer '{}' was never declared on rank {}",
            name, chunk.rank
        ))
        .with_code(codes::UNDECLARED_SCRATCH)
        .with_slot(chunk.rank, chunk.buffer.clone(), chunk.index)
    })?;
    let index = scratch.global_index(chunk.index).ok_or_else(|| {
        Diagnostic::error(format!(
            "scratch buffer '{}' on rank {} used before offset assignment",
            name, chunk.rank
        ))
        .with_code(codes::UNLOWERED_SCRATCH)
        .with_slot(chunk.rank, chunk.buffer.clone(), chunk.index)
    })?;
    Ok(ChunkRef {
        rank: chunk.rank,
        buffer: scratch.global_buffer(),
        index,
        size: chunk.size,
    })
}

/// Globalize every chunk reference in a lowered program.
pub fn lower_program(program: &mut Program, buffers: &[RankBuffers]) -> Result<(), Diagnostic> {
    for gpu in &mut program.gpus {
        for tb in &mut gpu.threadblocks {
            for op in &mut tb.ops {
                op.src = lower_chunk(buffers, &op.src)?;
                op.dst = lower_chunk(buffers, &op.dst)?;
                for chunk in op.srcs.iter_mut().chain(op.dsts.iter_mut()) {
                    *chunk = lower_chunk(buffers, chunk)?;
                }
            }
        }
    }
    Ok(())
}

// ── Verification ────────────────────────────────────────────────────────────

/// Machine-checkable evidence for lowering postconditions (L1-L2).
#[derive(Debug, Clone)]
pub struct LowerCert {
    /// L1: No rank-local scratch reference survives in the program.
    pub l1_no_local_scratch: bool,
    /// L2: Every dependency resolves to an existing (unit, step) on its rank.
    pub l2_depends_in_bounds: bool,
}

impl StageCert for LowerCert {
    fn all_pass(&self) -> bool {
        self.l1_no_local_scratch && self.l2_depends_in_bounds
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("L1_no_local_scratch", self.l1_no_local_scratch),
            ("L2_depends_in_bounds", self.l2_depends_in_bounds),
        ]
    }
}

/// Verify lowering postconditions on the final program.
pub fn verify_lowering(program: &Program) -> LowerCert {
    LowerCert {
        l1_no_local_scratch: verify_l1_no_local_scratch(program),
        l2_depends_in_bounds: verify_l2_depends_in_bounds(program),
    }
}

fn verify_l1_no_local_scratch(program: &Program) -> bool {
    for gpu in &program.gpus {
        for tb in &gpu.threadblocks {
            for op in &tb.ops {
                if op.src.buffer.is_local_scratch() || op.dst.buffer.is_local_scratch() {
                    return false;
                }
                if op.srcs.iter().chain(op.dsts.iter()).any(|c| c.buffer.is_local_scratch()) {
                    return false;
                }
            }
        }
    }
    true
}

fn verify_l2_depends_in_bounds(program: &Program) -> bool {
    for gpu in &program.gpus {
        for tb in &gpu.threadblocks {
            for op in &tb.ops {
                for dep in &op.depends {
                    let Some(dep_tb) = gpu.threadblocks.iter().find(|t| t.id == dep.tb) else {
                        return false;
                    };
                    if dep.step as usize >= dep_tb.ops.len() {
                        return false;
                    }
                }
            }
        }
    }
    true
}

// ── Tests ───────────────────────────────────────────────────────────────────
