// buffer.rs — Scratch-buffer allocation collaborator
//
// Per-rank bookkeeping for input/output buffer lengths and the rank-local
// logical scratch regions. Buffer lowering assigns every scratch region a
// non-overlapping offset into the single global scratch region; after that,
// `global_index` maps local chunk indices to global ones.
//
// Preconditions: scratch regions are declared before construction references
//                them (enforced by the pipeline driver).
// Postconditions: after offset assignment, every declared region maps local
//                 indices into disjoint global ranges.
// Failure modes: none (queries on unassigned offsets return `None`).
// Side effects: none.

use crate::ir::{BufferId, Rank};

// ── Scratch regions ────────────────────────────────────────────────────────

/// A rank-local logical scratch region, later mapped into the global scratch
/// buffer at an assigned offset.
#[derive(Debug, Clone)]
pub struct ScratchBuffer {
    name: String,
    instance_size: usize,
    offset: Option<usize>,
}

impl ScratchBuffer {
    pub fn new(name: impl Into<String>, instance_size: usize) -> Self {
        ScratchBuffer {
            name: name.into(),
            instance_size,
            offset: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The buffer every lowered reference points into.
    pub fn global_buffer(&self) -> BufferId {
        BufferId::Scratch
    }

    /// Map a local index into the global scratch region. `None` until an
    /// offset has been assigned.
    pub fn global_index(&self, local: usize) -> Option<usize> {
        self.offset.map(|off| off + local)
    }

    pub fn set_offset(&mut self, offset: usize) {
        self.offset = Some(offset);
    }

    pub fn offset(&self) -> Option<usize> {
        self.offset
    }

    /// Slots occupied by one replication instance.
    pub fn instance_size(&self) -> usize {
        self.instance_size
    }

    /// Logical length of a single instance of this region.
    pub fn len(&self) -> usize {
        self.instance_size
    }

    pub fn is_empty(&self) -> bool {
        self.instance_size == 0
    }
}

// ── Per-rank buffer table ──────────────────────────────────────────────────

/// All buffers of one rank: fixed input/output lengths plus the scratch
/// regions in stable declaration order (offset assignment depends on it).
#[derive(Debug, Clone)]
pub struct RankBuffers {
    input_len: usize,
    output_len: usize,
    scratch: Vec<ScratchBuffer>,
}

impl RankBuffers {
    pub fn new(input_len: usize, output_len: usize) -> Self {
        RankBuffers {
            input_len,
            output_len,
            scratch: Vec::new(),
        }
    }

    /// Declare a scratch region. Re-declaring an existing name grows it to
    /// the larger instance size (chunk references from different program
    /// fragments may imply different extents).
    pub fn declare_scratch(&mut self, name: &str, instance_size: usize) {
        if let Some(existing) = self.scratch.iter_mut().find(|s| s.name() == name) {
            if instance_size > existing.instance_size {
                existing.instance_size = instance_size;
            }
            return;
        }
        self.scratch.push(ScratchBuffer::new(name, instance_size));
    }

    pub fn scratch(&self, name: &str) -> Option<&ScratchBuffer> {
        self.scratch.iter().find(|s| s.name() == name)
    }

    /// Scratch regions in declaration order.
    pub fn scratch_iter(&self) -> impl Iterator<Item = &ScratchBuffer> {
        self.scratch.iter()
    }

    pub fn scratch_iter_mut(&mut self) -> impl Iterator<Item = &mut ScratchBuffer> {
        self.scratch.iter_mut()
    }

    /// Total length of a fixed buffer on this rank. Named regions report
    /// their single-instance length; the global scratch region reports the
    /// sum of assigned extents (meaningful only after offset assignment).
    pub fn len_of(&self, buffer: &BufferId) -> usize {
        match buffer {
            BufferId::Input => self.input_len,
            BufferId::Output => self.output_len,
            BufferId::Named(name) => self.scratch(name).map(|s| s.len()).unwrap_or(0),
            BufferId::Scratch => self.scratch.iter().map(|s| s.instance_size()).sum(),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
