// Shared builders for integration tests: small collective algorithms
// expressed through the public construction surface.
//
// Not every test crate uses every builder.
#![allow(dead_code)]

use ccc::buffer::RankBuffers;
use ccc::ir::{BufferId, ChannelType, ChunkRef};
use ccc::pipeline::Compiler;

pub fn input(rank: usize, index: usize, size: usize) -> ChunkRef {
    ChunkRef::new(rank, BufferId::Input, index, size)
}

pub fn output(rank: usize, index: usize, size: usize) -> ChunkRef {
    ChunkRef::new(rank, BufferId::Output, index, size)
}

pub fn scratch(rank: usize, name: &str, index: usize) -> ChunkRef {
    ChunkRef::new(rank, BufferId::Named(name.into()), index, 1)
}

/// Each rank sends input chunk 0 to its right neighbor's scratch buffer,
/// then copies the received chunk to its own output. Per rank the single
/// unit holds send, recv, copy — no fusion opportunity (the recv's consumer
/// is a copy).
pub fn build_exchange(ranks: usize) -> Compiler {
    let mut buffers = Vec::with_capacity(ranks);
    for _ in 0..ranks {
        let mut rb = RankBuffers::new(1, 1);
        rb.declare_scratch("recv", 1);
        buffers.push(rb);
    }
    let mut compiler = Compiler::new(buffers);

    for r in 0..ranks {
        compiler
            .add_start(r, BufferId::Input, 0, input(r, 0, 1))
            .expect("start");
    }
    let mut sends = Vec::with_capacity(ranks);
    for r in 0..ranks {
        let peer = (r + 1) % ranks;
        let send = compiler
            .add_send(r, input(r, 0, 1), scratch(peer, "recv", 0), 0, 0, ChannelType::Sm)
            .expect("send");
        sends.push(send);
    }
    for r in 0..ranks {
        let from = (r + ranks - 1) % ranks;
        compiler
            .add_recv(
                r,
                input(from, 0, 1),
                scratch(r, "recv", 0),
                0,
                0,
                ChannelType::Sm,
                sends[from],
            )
            .expect("recv");
    }
    for r in 0..ranks {
        compiler
            .add_copy(r, scratch(r, "recv", 0), output(r, 0, 1), 0, 0, ChannelType::Sm)
            .expect("copy");
    }
    compiler
}

/// Rank 0 sends to rank 1; rank 1 forwards the received chunk to rank 2.
/// The forwarding recv + send on rank 1 is the canonical recv_copy_send
/// fusion opportunity.
pub fn build_forward_pipeline() -> Compiler {
    let mut buffers = Vec::with_capacity(3);
    for _ in 0..3 {
        let mut rb = RankBuffers::new(1, 1);
        rb.declare_scratch("fwd", 1);
        buffers.push(rb);
    }
    let mut compiler = Compiler::new(buffers);

    compiler
        .add_start(0, BufferId::Input, 0, input(0, 0, 1))
        .expect("start");
    let s_ab = compiler
        .add_send(0, input(0, 0, 1), scratch(1, "fwd", 0), 0, 0, ChannelType::Sm)
        .expect("send a->b");
    compiler
        .add_recv(
            1,
            input(0, 0, 1),
            scratch(1, "fwd", 0),
            0,
            0,
            ChannelType::Sm,
            s_ab,
        )
        .expect("recv b");
    let s_bc = compiler
        .add_send(1, scratch(1, "fwd", 0), scratch(2, "fwd", 0), 0, 0, ChannelType::Sm)
        .expect("send b->c");
    compiler
        .add_recv(
            2,
            scratch(1, "fwd", 0),
            scratch(2, "fwd", 0),
            0,
            0,
            ChannelType::Sm,
            s_bc,
        )
        .expect("recv c");
    compiler
        .add_copy(2, scratch(2, "fwd", 0), output(2, 0, 1), 0, 0, ChannelType::Sm)
        .expect("copy c");
    compiler
}

/// In-place ring all-reduce over `n` chunks: n-1 reduce-scatter steps
/// followed by n-1 allgather steps, everything on unit 0 of each rank.
pub fn build_ring_all_reduce(n: usize) -> Compiler {
    let buffers = (0..n).map(|_| RankBuffers::new(n, n)).collect();
    let mut compiler = Compiler::new(buffers);

    for r in 0..n {
        for i in 0..n {
            compiler
                .add_start(r, BufferId::Input, i, input(r, i, 1))
                .expect("start");
        }
    }

    for s in 0..n - 1 {
        for r in 0..n {
            let next = (r + 1) % n;
            let idx = (r + n - s) % n;
            let send = compiler
                .add_send(r, input(r, idx, 1), input(next, idx, 1), 0, 0, ChannelType::Sm)
                .expect("rs send");
            compiler
                .add_recv_reduce_copy(
                    next,
                    input(r, idx, 1),
                    input(next, idx, 1),
                    0,
                    0,
                    ChannelType::Sm,
                    send,
                )
                .expect("rrc");
        }
    }

    for s in 0..n - 1 {
        for r in 0..n {
            let next = (r + 1) % n;
            let idx = (r + 1 + n - s) % n;
            let send = compiler
                .add_send(r, input(r, idx, 1), input(next, idx, 1), 0, 0, ChannelType::Sm)
                .expect("ag send");
            compiler
                .add_recv(
                    next,
                    input(r, idx, 1),
                    input(next, idx, 1),
                    0,
                    0,
                    ChannelType::Sm,
                    send,
                )
                .expect("ag recv");
        }
    }

    compiler
}
