use clap::Parser;

use ccc::buffer::RankBuffers;
use ccc::diag::Diagnostic;
use ccc::dot::emit_dot;
use ccc::ir::{BufferId, ChannelType, ChunkRef, ReplicationPolicy};
use ccc::pipeline::{schedule_digest, Compiler};

#[derive(Debug, Clone, clap::ValueEnum)]
enum Demo {
    /// Each rank sends one chunk to its neighbor and copies it to output.
    Exchange,
    /// Ring all-reduce: reduce-scatter then allgather, in place.
    Ring,
}

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    Text,
    Json,
    Dot,
}

#[derive(Debug, Clone, clap::ValueEnum)]
enum Policy {
    Interleaved,
    Batched,
}

#[derive(Parser, Debug)]
#[command(
    name = "ccc",
    version,
    about = "Collective Communication Compiler — lowers GPU collective algorithms to per-rank instruction schedules"
)]
struct Cli {
    /// Built-in demo algorithm to compile
    #[arg(long, value_enum, default_value_t = Demo::Exchange)]
    demo: Demo,

    /// Number of participating ranks
    #[arg(short, long, default_value_t = 2)]
    ranks: usize,

    /// Replication instance count
    #[arg(short, long, default_value_t = 1)]
    instances: usize,

    /// Input/output index remapping policy during replication
    #[arg(long, value_enum, default_value_t = Policy::Interleaved)]
    policy: Policy,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Text)]
    emit: EmitStage,

    /// Print the schedule digest to stderr
    #[arg(long)]
    digest: bool,

    /// Print compiler phases as they run
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprintln!("ccc: {}", e);
        std::process::exit(2);
    }
}

fn run(cli: &Cli) -> Result<(), Diagnostic> {
    if cli.ranks < 2 {
        return Err(Diagnostic::error("demo algorithms need at least 2 ranks"));
    }
    if cli.instances < 1 {
        return Err(Diagnostic::error("instance count must be at least 1"));
    }

    let mut compiler = match cli.demo {
        Demo::Exchange => build_exchange(cli.ranks)?,
        Demo::Ring => build_ring_all_reduce(cli.ranks)?,
    };

    if cli.verbose {
        eprintln!("ccc: demo = {:?}, ranks = {}", cli.demo, cli.ranks);
        let plan: Vec<&str> = ccc::pass::required_passes(ccc::pass::PassId::LowerChunks)
            .into_iter()
            .map(|p| ccc::pass::descriptor(p).name)
            .collect();
        eprintln!("ccc: pass plan: {}", plan.join(" -> "));
        eprintln!("ccc: lower_phase1({})", cli.instances);
    }
    compiler.lower_phase1(cli.instances)?;

    if cli.verbose {
        eprintln!("ccc: optimize");
    }
    compiler.optimize()?;

    if let EmitStage::Dot = cli.emit {
        print!("{}", emit_dot(compiler.dag()));
        return Ok(());
    }

    let policy = match cli.policy {
        Policy::Interleaved => ReplicationPolicy::Interleaved,
        Policy::Batched => ReplicationPolicy::Batched,
    };
    if cli.verbose {
        eprintln!("ccc: lower_phase2({}, {:?})", cli.instances, policy);
    }
    let program = compiler.lower_phase2(cli.instances, policy)?;

    match cli.emit {
        EmitStage::Text => print!("{}", program),
        EmitStage::Json => {
            let json = serde_json::to_string_pretty(&program)
                .map_err(|e| Diagnostic::error(format!("json serialization failed: {}", e)))?;
            println!("{}", json);
        }
        EmitStage::Dot => {}
    }

    if cli.digest {
        eprintln!("digest: {}", schedule_digest(&program));
    }
    Ok(())
}

// ── Demo algorithms ────────────────────────────────────────────────────────

fn input(rank: usize, index: usize, size: usize) -> ChunkRef {
    ChunkRef::new(rank, BufferId::Input, index, size)
}

fn scratch(rank: usize, index: usize) -> ChunkRef {
    ChunkRef::new(rank, BufferId::Named("recv".into()), index, 1)
}

/// Each rank sends input chunk 0 to its right neighbor's scratch buffer,
/// then copies the received chunk to its own output.
fn build_exchange(ranks: usize) -> Result<Compiler, Diagnostic> {
    let mut buffers = Vec::with_capacity(ranks);
    for _ in 0..ranks {
        let mut rb = RankBuffers::new(1, 1);
        rb.declare_scratch("recv", 1);
        buffers.push(rb);
    }
    let mut compiler = Compiler::new(buffers);

    for r in 0..ranks {
        compiler.add_start(r, BufferId::Input, 0, input(r, 0, 1))?;
    }
    let mut sends = Vec::with_capacity(ranks);
    for r in 0..ranks {
        let peer = (r + 1) % ranks;
        let send = compiler.add_send(r, input(r, 0, 1), scratch(peer, 0), 0, 0, ChannelType::Sm)?;
        sends.push(send);
    }
    for r in 0..ranks {
        let from = (r + ranks - 1) % ranks;
        compiler.add_recv(
            r,
            input(from, 0, 1),
            scratch(r, 0),
            0,
            0,
            ChannelType::Sm,
            sends[from],
        )?;
    }
    for r in 0..ranks {
        compiler.add_copy(
            r,
            scratch(r, 0),
            ChunkRef::new(r, BufferId::Output, 0, 1),
            0,
            0,
            ChannelType::Sm,
        )?;
    }
    Ok(compiler)
}

/// In-place ring all-reduce over `ranks` chunks: n-1 reduce-scatter steps
/// followed by n-1 allgather steps. The optimizer collapses the resulting
/// recv/send chains into the fused pipeline kinds.
fn build_ring_all_reduce(ranks: usize) -> Result<Compiler, Diagnostic> {
    let n = ranks;
    let buffers = (0..n).map(|_| RankBuffers::new(n, n)).collect();
    let mut compiler = Compiler::new(buffers);

    for r in 0..n {
        for i in 0..n {
            compiler.add_start(r, BufferId::Input, i, input(r, i, 1))?;
        }
    }

    // Reduce-scatter: at step s, rank r sends chunk (r - s) mod n to its
    // right neighbor, which reduces it into the same chunk.
    for s in 0..n - 1 {
        for r in 0..n {
            let next = (r + 1) % n;
            let idx = (r + n - s) % n;
            let send =
                compiler.add_send(r, input(r, idx, 1), input(next, idx, 1), 0, 0, ChannelType::Sm)?;
            compiler.add_recv_reduce_copy(
                next,
                input(r, idx, 1),
                input(next, idx, 1),
                0,
                0,
                ChannelType::Sm,
                send,
            )?;
        }
    }

    // Allgather: at step s, rank r forwards chunk (r + 1 - s) mod n.
    for s in 0..n - 1 {
        for r in 0..n {
            let next = (r + 1) % n;
            let idx = (r + 1 + n - s) % n;
            let send =
                compiler.add_send(r, input(r, idx, 1), input(next, idx, 1), 0, 0, ChannelType::Sm)?;
            compiler.add_recv(
                next,
                input(r, idx, 1),
                input(next, idx, 1),
                0,
                0,
                ChannelType::Sm,
                send,
            )?;
        }
    }

    Ok(compiler)
}
