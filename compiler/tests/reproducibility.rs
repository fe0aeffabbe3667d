// Reproducibility tests.
//
// Repeated compilations of the same input must produce byte-identical
// schedules: the text rendering, the JSON serialization, the DOT graph, and
// the schedule digest all have to match across runs.

mod common;

use ccc::dot::emit_dot;
use ccc::ir::{Program, ReplicationPolicy};
use ccc::pipeline::{schedule_digest, Compiler};

use common::*;

fn compile_ring(n: usize, instances: usize, policy: ReplicationPolicy) -> Program {
    let mut compiler = build_ring_all_reduce(n);
    compiler.lower_phase1(instances).expect("phase1");
    compiler.optimize().expect("optimize");
    compiler.lower_phase2(instances, policy).expect("phase2")
}

fn optimized_ring(n: usize) -> Compiler {
    let mut compiler = build_ring_all_reduce(n);
    compiler.lower_phase1(1).expect("phase1");
    compiler.optimize().expect("optimize");
    compiler
}

#[test]
fn same_input_identical_text() {
    let first = compile_ring(4, 2, ReplicationPolicy::Interleaved).to_string();
    let second = compile_ring(4, 2, ReplicationPolicy::Interleaved).to_string();
    assert_eq!(first, second, "text rendering should be byte-identical");
}

#[test]
fn same_input_identical_json() {
    let first =
        serde_json::to_string(&compile_ring(3, 1, ReplicationPolicy::Batched)).expect("json");
    let second =
        serde_json::to_string(&compile_ring(3, 1, ReplicationPolicy::Batched)).expect("json");
    assert_eq!(first, second, "JSON output should be byte-identical");
}

#[test]
fn same_input_identical_dot() {
    let first = emit_dot(optimized_ring(3).dag());
    let second = emit_dot(optimized_ring(3).dag());
    assert_eq!(first, second, "DOT output should be byte-identical");
}

#[test]
fn same_input_identical_digest() {
    let first = schedule_digest(&compile_ring(4, 1, ReplicationPolicy::Interleaved));
    let second = schedule_digest(&compile_ring(4, 1, ReplicationPolicy::Interleaved));
    assert_eq!(first, second);
}

#[test]
fn different_inputs_different_digests() {
    let small = schedule_digest(&compile_ring(2, 1, ReplicationPolicy::Interleaved));
    let large = schedule_digest(&compile_ring(4, 1, ReplicationPolicy::Interleaved));
    assert_ne!(small, large, "distinct schedules should not share a digest");
}

#[test]
fn policies_change_the_schedule() {
    let interleaved = compile_ring(3, 2, ReplicationPolicy::Interleaved).to_string();
    let batched = compile_ring(3, 2, ReplicationPolicy::Batched).to_string();
    assert_ne!(
        interleaved, batched,
        "replication policy must be visible in input/output indices"
    );
}

#[test]
fn exchange_is_reproducible_too() {
    let run = || {
        let mut compiler = build_exchange(3);
        compiler.lower_phase1(2).expect("phase1");
        compiler.optimize().expect("optimize");
        compiler
            .lower_phase2(2, ReplicationPolicy::Batched)
            .expect("phase2")
            .to_string()
    };
    assert_eq!(run(), run());
}
