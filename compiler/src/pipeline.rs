// pipeline.rs — Phase-ordered compilation driver
//
// `Compiler` owns the instruction DAG and the per-rank buffer tables and
// enforces the required call order:
//
//   construction -> lower_phase1(instances) -> optimize()
//                -> lower_phase2(instances, policy) -> Program
//
// Out-of-order calls, construction after phase 1, and an instance-count
// mismatch between the two lowering phases are usage-contract violations
// (E0100), not data errors.
//
// Preconditions: `buffers` declares every scratch region construction uses.
// Postconditions: `lower_phase2` returns a fully lowered, globally addressed
//                 program; repeated compilations of the same input are
//                 byte-identical.
// Failure modes: data-hazard violations and contract violations → Diagnostic.
// Side effects: none outside the owned state.

use sha2::{Digest, Sha256};

use crate::buffer::RankBuffers;
use crate::dag::{InstructionDag, OpId};
use crate::diag::{codes, Diagnostic};
use crate::fuse::{fuse_recv_reduce_send, fuse_recv_send};
use crate::infer::infer_dependencies;
use crate::ir::{BufferId, ChannelType, ChunkRef, Program, Rank, ReplicationPolicy};
use crate::lower::{lower_buffers, lower_program};
use crate::meta::complete_metadata;
use crate::replicate::replicate;

// ── Phase tracking ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Construct,
    DepsInferred,
    Optimized,
    Lowered,
}

impl Phase {
    fn name(self) -> &'static str {
        match self {
            Phase::Construct => "construction",
            Phase::DepsInferred => "lower_phase1",
            Phase::Optimized => "optimize",
            Phase::Lowered => "lower_phase2",
        }
    }
}

// ── Compiler ───────────────────────────────────────────────────────────────

pub struct Compiler {
    dag: InstructionDag,
    buffers: Vec<RankBuffers>,
    phase: Phase,
    instances: Option<usize>,
}

impl Compiler {
    /// One `RankBuffers` entry per rank; the rank count is taken from it.
    pub fn new(buffers: Vec<RankBuffers>) -> Self {
        let num_ranks = buffers.len();
        Compiler {
            dag: InstructionDag::new(num_ranks),
            buffers,
            phase: Phase::Construct,
            instances: None,
        }
    }

    pub fn dag(&self) -> &InstructionDag {
        &self.dag
    }

    pub fn buffers(&self) -> &[RankBuffers] {
        &self.buffers
    }

    // ── Construction surface ────────────────────────────────────────────

    pub fn add_start(
        &mut self,
        rank: Rank,
        buffer: BufferId,
        index: usize,
        chunk: ChunkRef,
    ) -> Result<OpId, Diagnostic> {
        self.expect_phase(Phase::Construct)?;
        self.check_rank(rank)?;
        self.check_ref(&chunk)?;
        Ok(self.dag.add_start(rank, buffer, index, chunk))
    }

    pub fn add_copy(
        &mut self,
        rank: Rank,
        src: ChunkRef,
        dst: ChunkRef,
        tb: u32,
        channel: u32,
        channel_type: ChannelType,
    ) -> Result<OpId, Diagnostic> {
        self.expect_phase(Phase::Construct)?;
        self.check_rank(rank)?;
        self.check_ref(&src)?;
        self.check_ref(&dst)?;
        self.dag.add_copy(rank, src, dst, tb, channel, channel_type)
    }

    pub fn add_reduce(
        &mut self,
        rank: Rank,
        src: ChunkRef,
        dst: ChunkRef,
        tb: u32,
        channel: u32,
        channel_type: ChannelType,
    ) -> Result<OpId, Diagnostic> {
        self.expect_phase(Phase::Construct)?;
        self.check_rank(rank)?;
        self.check_ref(&src)?;
        self.check_ref(&dst)?;
        self.dag
            .add_reduce(rank, src, dst, tb, channel, channel_type)
    }

    pub fn add_send(
        &mut self,
        rank: Rank,
        src: ChunkRef,
        dst: ChunkRef,
        tb: u32,
        channel: u32,
        channel_type: ChannelType,
    ) -> Result<OpId, Diagnostic> {
        self.expect_phase(Phase::Construct)?;
        self.check_rank(rank)?;
        self.check_ref(&src)?;
        self.check_ref(&dst)?;
        self.dag.add_send(rank, src, dst, tb, channel, channel_type)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_recv(
        &mut self,
        rank: Rank,
        src: ChunkRef,
        dst: ChunkRef,
        tb: u32,
        channel: u32,
        channel_type: ChannelType,
        send_match: OpId,
    ) -> Result<OpId, Diagnostic> {
        self.expect_phase(Phase::Construct)?;
        self.check_rank(rank)?;
        self.check_ref(&src)?;
        self.check_ref(&dst)?;
        self.dag
            .add_recv(rank, src, dst, tb, channel, channel_type, send_match)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_recv_reduce_copy(
        &mut self,
        rank: Rank,
        src: ChunkRef,
        dst: ChunkRef,
        tb: u32,
        channel: u32,
        channel_type: ChannelType,
        send_match: OpId,
    ) -> Result<OpId, Diagnostic> {
        self.expect_phase(Phase::Construct)?;
        self.check_rank(rank)?;
        self.check_ref(&src)?;
        self.check_ref(&dst)?;
        self.dag
            .add_recv_reduce_copy(rank, src, dst, tb, channel, channel_type, send_match)
    }

    // ── Pipeline phases ─────────────────────────────────────────────────

    /// Phase 1: dependency inference, then buffer-offset assignment.
    pub fn lower_phase1(&mut self, instances: usize) -> Result<(), Diagnostic> {
        self.expect_phase(Phase::Construct)?;
        infer_dependencies(&mut self.dag);
        lower_buffers(&mut self.buffers, instances);
        self.instances = Some(instances);
        self.phase = Phase::DepsInferred;
        Ok(())
    }

    /// Fusion passes, then re-derived dependencies and metadata on the
    /// settled graph (fusion changes adjacency and step numbering, and the
    /// replicator requires both to be final).
    pub fn optimize(&mut self) -> Result<(), Diagnostic> {
        self.expect_phase(Phase::DepsInferred)?;
        fuse_recv_reduce_send(&mut self.dag);
        fuse_recv_send(&mut self.dag);
        infer_dependencies(&mut self.dag);
        complete_metadata(&mut self.dag);
        self.phase = Phase::Optimized;
        Ok(())
    }

    /// Phase 2: replication, then chunk globalization. Returns the final
    /// per-rank program.
    pub fn lower_phase2(
        &mut self,
        instances: usize,
        policy: ReplicationPolicy,
    ) -> Result<Program, Diagnostic> {
        self.expect_phase(Phase::Optimized)?;
        if self.instances != Some(instances) {
            return Err(Diagnostic::error(format!(
                "lower_phase2 called with {} instances but lower_phase1 ran with {}",
                instances,
                self.instances.unwrap_or(0)
            ))
            .with_code(codes::PHASE_ORDER)
            .with_hint("both lowering phases must agree on the instance count"));
        }
        let mut program = replicate(&self.dag, &self.buffers, instances, policy)?;
        lower_program(&mut program, &self.buffers)?;
        self.phase = Phase::Lowered;
        Ok(program)
    }

    // ── Checks ──────────────────────────────────────────────────────────

    fn expect_phase(&self, expected: Phase) -> Result<(), Diagnostic> {
        if self.phase != expected {
            return Err(Diagnostic::error(format!(
                "invalid call sequence: expected the {} stage but the compilation is at {}",
                expected.name(),
                self.phase.name()
            ))
            .with_code(codes::PHASE_ORDER)
            .with_hint("call order: construction, lower_phase1, optimize, lower_phase2"));
        }
        Ok(())
    }

    fn check_rank(&self, rank: Rank) -> Result<(), Diagnostic> {
        if rank >= self.buffers.len() {
            return Err(Diagnostic::error(format!(
                "rank {} out of range ({} ranks)",
                rank,
                self.buffers.len()
            ))
            .with_code(codes::RANK_OUT_OF_RANGE));
        }
        Ok(())
    }

    fn check_ref(&self, chunk: &ChunkRef) -> Result<(), Diagnostic> {
        self.check_rank(chunk.rank)?;
        if let BufferId::Named(name) = &chunk.buffer {
            if self.buffers[chunk.rank].scratch(name).is_none() {
                return Err(Diagnostic::error(format!(
                    "scratch buffer '{}' was never declared on rank {}",
                    name, chunk.rank
                ))
                .with_code(codes::UNDECLARED_SCRATCH)
                .with_slot(chunk.rank, chunk.buffer.clone(), chunk.index));
            }
        }
        Ok(())
    }
}

// ── Schedule digest ────────────────────────────────────────────────────────

/// Stable digest of a compiled program: SHA-256 over the canonical text
/// rendering, truncated to 16 hex chars. Used by reproducibility checks.
pub fn schedule_digest(program: &Program) -> String {
    let mut hasher = Sha256::new();
    hasher.update(program.to_string().as_bytes());
    let hash = hasher.finalize();
    hash.iter()
        .take(8)
        .map(|b| format!("{:02x}", b))
        .collect::<String>()
}

// ── Tests ──────────────────────────────────────────────────────────────────
