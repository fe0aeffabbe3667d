// pass.rs — Pass descriptor module: metadata, dependency resolution, certs
//
// Declares the compiler's semantic passes (graph construction is outside the
// runner — the front end drives it), their dependency edges, and the
// artifacts they produce. The pipeline driver uses the declared order to
// reject out-of-sequence phase calls.

use std::collections::HashSet;

// ── Stage certification ────────────────────────────────────────────────────

/// Machine-checkable evidence that a pass's postconditions hold. Each pass
/// that verifies obligations exposes a cert type implementing this.
pub trait StageCert {
    fn all_pass(&self) -> bool;
    fn obligations(&self) -> Vec<(&'static str, bool)>;
}

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each compiler pass (DAG construction excluded — it is driven
/// incrementally by the front end before the runner starts).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    InferDeps,
    LowerBuffers,
    Fuse,
    Metadata,
    Replicate,
    LowerChunks,
}

/// Machine-readable artifact identifiers. Each maps to a concrete type or
/// field in the compilation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Depends,  // per-node filtered dependency lists
    Offsets,  // scratch-buffer offsets into the global region
    FusedDag, // DAG after pattern fusion
    Metadata, // chunk_step + priority annotations
    Replicas, // replicated per-rank unit structure
    Program,  // final globally-addressed Program
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a compiler pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// Pre/post conditions (documentation only).
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::InferDeps => PassDescriptor {
            name: "infer_deps",
            inputs: &[],
            outputs: &[ArtifactId::Depends],
            invariants: "depends holds at most one entry per foreign unit",
        },
        PassId::LowerBuffers => PassDescriptor {
            name: "lower_buffers",
            inputs: &[PassId::InferDeps],
            outputs: &[ArtifactId::Offsets],
            invariants: "scratch offsets disjoint, spaced for all instances",
        },
        PassId::Fuse => PassDescriptor {
            name: "fuse",
            inputs: &[PassId::InferDeps, PassId::LowerBuffers],
            outputs: &[ArtifactId::FusedDag],
            invariants: "graph acyclic, pairings mutual after every rewrite",
        },
        PassId::Metadata => PassDescriptor {
            name: "metadata",
            inputs: &[PassId::Fuse],
            outputs: &[ArtifactId::Metadata],
            invariants: "priority(node) >= priority(successor) + 1",
        },
        PassId::Replicate => PassDescriptor {
            name: "replicate",
            inputs: &[PassId::Metadata],
            outputs: &[ArtifactId::Replicas],
            invariants: "clone depends point at (unit x N + i, step)",
        },
        PassId::LowerChunks => PassDescriptor {
            name: "lower_chunks",
            inputs: &[PassId::Replicate],
            outputs: &[ArtifactId::Program],
            invariants: "no rank-local scratch reference survives",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All pass IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 6] = [
    PassId::InferDeps,
    PassId::LowerBuffers,
    PassId::Fuse,
    PassId::Metadata,
    PassId::Replicate,
    PassId::LowerChunks,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────
