// replicate.rs — Instance replication
//
// Clones the whole per-rank execution-unit structure N ways so the compiled
// schedule processes N independent data instances. Unit ids become
// `original × N + i`, channels become `max_channel_count × i + original`,
// chunk indices are remapped per buffer kind and policy, and every
// dependency is rebuilt against the clone at the same instance.
//
// Scratch chunks always replicate batched (`index + i × instance_size`);
// input/output chunks follow the requested policy. Interleaved keeps the
// chunks destined for a specific rank contiguous per replica, which
// rank-addressed collectives require.
//
// The output is the flat lowered IR with chunk references still rank-local;
// chunk globalization runs afterwards.
//
// Preconditions: dependencies, steps, and metadata are final (optimize ran).
// Postconditions: every clone's depends point at (unit × N + i, step).
// Failure modes: undeclared scratch names → Diagnostic.
// Side effects: none (the DAG is read-only here).

use crate::buffer::RankBuffers;
use crate::dag::InstructionDag;
use crate::diag::{codes, Diagnostic};
use crate::ir::{
    BufferId, ChunkRef, DepRef, Gpu, Instruction, LoweredOp, LoweredTb, Program, ReplicationPolicy,
};

/// Replicate the compiled schedule `instances` ways. The N = 1 case falls
/// out of the general remap formulas (identity) and takes the same path.
pub fn replicate(
    dag: &InstructionDag,
    buffers: &[RankBuffers],
    instances: usize,
    policy: ReplicationPolicy,
) -> Result<Program, Diagnostic> {
    let max_channels = dag.max_channel_count();
    let mut gpus: Vec<Gpu> = (0..dag.num_ranks())
        .map(|rank| Gpu {
            rank,
            threadblocks: Vec::new(),
        })
        .collect();

    for i in 0..instances {
        for rank in 0..dag.num_ranks() {
            for (&tbid, tb) in dag.tbs(rank) {
                let itbid = tbid * instances as u32 + i as u32;
                let ichannel = max_channels * i as u32 + tb.channel;

                let mut ops = Vec::with_capacity(tb.ops.len());
                for (step, &opid) in tb.ops.iter().enumerate() {
                    let op = dag.node(opid);
                    debug_assert!(!op.retired && op.inst != Instruction::Start);

                    let isrc = instance_ref(buffers, &op.src, i, instances, policy)?;
                    let idst = instance_ref(buffers, &op.dst, i, instances, policy)?;
                    let isrcs = op
                        .srcs
                        .iter()
                        .map(|c| instance_ref(buffers, c, i, instances, policy))
                        .collect::<Result<Vec<_>, _>>()?;
                    let idsts = op
                        .dsts
                        .iter()
                        .map(|c| instance_ref(buffers, c, i, instances, policy))
                        .collect::<Result<Vec<_>, _>>()?;

                    // Rebuild dependency links against the same-instance clone.
                    let mut depends = Vec::with_capacity(op.depends.len());
                    for &dep in &op.depends {
                        let dep_node = dag.node(dep);
                        let Some(dep_tb) = dep_node.tb else { continue };
                        depends.push(DepRef {
                            tb: dep_tb * instances as u32 + i as u32,
                            step: dep_node.step,
                        });
                    }

                    ops.push(LoweredOp {
                        inst: op.inst,
                        rank: op.rank,
                        src: isrc,
                        dst: idst,
                        srcs: isrcs,
                        dsts: idsts,
                        tb: itbid,
                        channel: ichannel,
                        channel_type: op.channel_type,
                        step: step as u32,
                        chunk_step: op.chunk_step,
                        priority: op.priority,
                        depends,
                    });
                }

                gpus[rank].threadblocks.push(LoweredTb {
                    id: itbid,
                    channel: ichannel,
                    send_peer: tb.send_peer,
                    recv_peer: tb.recv_peer,
                    ops,
                });
            }
        }
    }

    for gpu in &mut gpus {
        gpu.threadblocks.sort_by_key(|tb| tb.id);
    }
    Ok(Program { gpus })
}

/// Remap one chunk reference for instance `i`.
fn instance_ref(
    buffers: &[RankBuffers],
    chunk: &ChunkRef,
    i: usize,
    instances: usize,
    policy: ReplicationPolicy,
) -> Result<ChunkRef, Diagnostic> {
    let index = match &chunk.buffer {
        // Scratch is always batched: correctness is insensitive to policy.
        BufferId::Named(name) => {
            let scratch = buffers[chunk.rank].scratch(name).ok_or_else(|| {
                Diagnostic::error(format!(
                    "scratch buffer '{}' was never declared on rank {}",
                    name, chunk.rank
                ))
                .with_code(codes::UNDECLARED_SCRATCH)
                .with_slot(chunk.rank, chunk.buffer.clone(), chunk.index)
            })?;
            scratch.instance_size() * i + chunk.index
        }
        BufferId::Input | BufferId::Output => match policy {
            ReplicationPolicy::Interleaved => chunk.index * instances + i * chunk.size,
            ReplicationPolicy::Batched => {
                buffers[chunk.rank].len_of(&chunk.buffer) * i + chunk.index
            }
        },
        // Already globally addressed; nothing to remap.
        BufferId::Scratch => chunk.index,
    };
    Ok(ChunkRef {
        rank: chunk.rank,
        buffer: chunk.buffer.clone(),
        index,
        size: chunk.size,
    })
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ChannelType;

    fn input(rank: usize, index: usize) -> ChunkRef {
        ChunkRef::new(rank, BufferId::Input, index, 1)
    }

    fn scratch(rank: usize, index: usize) -> ChunkRef {
        ChunkRef::new(rank, BufferId::Named("s".into()), index, 1)
    }

    fn exchange() -> (InstructionDag, Vec<RankBuffers>) {
        let mut dag = InstructionDag::new(2);
        let mut buffers = Vec::new();
        for r in 0..2 {
            let mut rb = RankBuffers::new(1, 1);
            rb.declare_scratch("s", 1);
            buffers.push(rb);
            dag.add_start(r, BufferId::Input, 0, input(r, 0));
        }
        for r in 0..2usize {
            let peer = 1 - r;
            let send = dag
                .add_send(r, input(r, 0), scratch(peer, 0), 0, 0, ChannelType::Sm)
                .unwrap();
            dag.add_recv(peer, input(r, 0), scratch(peer, 0), 0, 0, ChannelType::Sm, send)
                .unwrap();
        }
        (dag, buffers)
    }

    #[test]
    fn single_instance_is_identity() {
        let (dag, buffers) = exchange();
        let program = replicate(&dag, &buffers, 1, ReplicationPolicy::Interleaved).unwrap();
        assert_eq!(program.gpus.len(), 2);
        let tb = &program.gpus[0].threadblocks[0];
        assert_eq!(tb.id, 0);
        assert_eq!(tb.channel, 0);
        assert_eq!(tb.ops[0].src.index, 0);
    }

    #[test]
    fn unit_ids_and_channels_remap() {
        let (dag, buffers) = exchange();
        let program = replicate(&dag, &buffers, 3, ReplicationPolicy::Interleaved).unwrap();
        let ids: Vec<u32> = program.gpus[0].threadblocks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        let chans: Vec<u32> = program.gpus[0]
            .threadblocks
            .iter()
            .map(|t| t.channel)
            .collect();
        // One channel per rank observed, so clones land on channels 0, 1, 2.
        assert_eq!(chans, vec![0, 1, 2]);
    }

    #[test]
    fn scratch_replicates_batched() {
        let (dag, mut buffers) = exchange();
        buffers[0].declare_scratch("s", 1);
        let program = replicate(&dag, &buffers, 3, ReplicationPolicy::Interleaved).unwrap();
        for (i, tb) in program.gpus[1].threadblocks.iter().enumerate() {
            // Rank 1's recv lands at local index 0 + i × instance_size(=1).
            let recv = tb.ops.iter().find(|o| o.inst == Instruction::Recv).unwrap();
            assert_eq!(recv.dst.index, i);
        }
    }

    #[test]
    fn interleaved_input_indices() {
        let (dag, buffers) = exchange();
        let program = replicate(&dag, &buffers, 2, ReplicationPolicy::Interleaved).unwrap();
        for (i, tb) in program.gpus[0].threadblocks.iter().enumerate() {
            let send = tb.ops.iter().find(|o| o.inst == Instruction::Send).unwrap();
            // index × N + i × size with index 0, size 1.
            assert_eq!(send.src.index, i);
        }
    }

    #[test]
    fn batched_input_indices() {
        let (dag, buffers) = exchange();
        let program = replicate(&dag, &buffers, 2, ReplicationPolicy::Batched).unwrap();
        for (i, tb) in program.gpus[0].threadblocks.iter().enumerate() {
            let send = tb.ops.iter().find(|o| o.inst == Instruction::Send).unwrap();
            // index + i × input_len with index 0, input_len 1.
            assert_eq!(send.src.index, i);
        }
    }

    #[test]
    fn depends_map_to_same_instance() {
        // Two units on rank 0: unit 1's op depends on unit 0's op.
        let mut dag = InstructionDag::new(1);
        let mut buffers = vec![RankBuffers::new(2, 2)];
        buffers[0].declare_scratch("s", 1);
        dag.add_start(0, BufferId::Input, 0, input(0, 0));
        dag.add_copy(
            0,
            input(0, 0),
            ChunkRef::new(0, BufferId::Output, 0, 1),
            0,
            0,
            ChannelType::Sm,
        )
        .unwrap();
        dag.add_copy(
            0,
            ChunkRef::new(0, BufferId::Output, 0, 1),
            ChunkRef::new(0, BufferId::Output, 1, 1),
            1,
            1,
            ChannelType::Sm,
        )
        .unwrap();
        crate::infer::infer_dependencies(&mut dag);
        let program = replicate(&dag, &buffers, 2, ReplicationPolicy::Batched).unwrap();
        for i in 0..2u32 {
            let tb = program.gpus[0]
                .threadblocks
                .iter()
                .find(|t| t.id == 2 + i)
                .unwrap();
            assert_eq!(tb.ops[0].depends, vec![DepRef { tb: i, step: 0 }]);
        }
    }
}
