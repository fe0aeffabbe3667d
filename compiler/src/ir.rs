// ir.rs — Core data model for collective-communication schedules
//
// Shared vocabulary types (buffers, chunk references, instruction kinds,
// channels) plus the lowered output IR: a self-contained, pre-resolved
// representation of the compiled schedule. Downstream serializers read a
// `Program` and emit the wire format without consulting any upstream phase.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::Serialize;

// ── Participants ───────────────────────────────────────────────────────────

/// Integer identifier of a participant (GPU). Fixed for the compilation.
pub type Rank = usize;

// ── Buffers ────────────────────────────────────────────────────────────────

/// Identifies a buffer on some rank.
///
/// `Input` and `Output` are globally fixed-size per rank. `Named` buffers are
/// rank-local logical scratch regions; buffer lowering maps every `Named`
/// reference into the single global `Scratch` region.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferId {
    Input,
    Output,
    Scratch,
    Named(String),
}

impl BufferId {
    /// True for rank-local logical scratch regions (not yet globalized).
    pub fn is_local_scratch(&self) -> bool {
        matches!(self, BufferId::Named(_))
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferId::Input => write!(f, "input"),
            BufferId::Output => write!(f, "output"),
            BufferId::Scratch => write!(f, "scratch"),
            BufferId::Named(name) => write!(f, "{}", name),
        }
    }
}

// ── Chunk references ───────────────────────────────────────────────────────

/// A reference to a contiguous run of `size` slots — the operand type of
/// every instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkRef {
    pub rank: Rank,
    pub buffer: BufferId,
    pub index: usize,
    pub size: usize,
}

impl ChunkRef {
    pub fn new(rank: Rank, buffer: BufferId, index: usize, size: usize) -> Self {
        ChunkRef {
            rank,
            buffer,
            index,
            size,
        }
    }
}

impl fmt::Display for ChunkRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "r{} {}[{}..{})",
            self.rank,
            self.buffer,
            self.index,
            self.index + self.size
        )
    }
}

// ── Instruction kinds ──────────────────────────────────────────────────────

/// The instruction kind of a schedule node.
///
/// `Start` nodes are synthetic roots seeding the hazard graph; they never
/// appear in the lowered output. The fused kinds are produced by the
/// optimizer from adjacent recv/send pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Instruction {
    Start,
    Copy,
    Reduce,
    Send,
    Recv,
    RecvCopySend,
    RecvReduceSend,
    RecvReduceCopy,
    RecvReduceCopySend,
}

impl Instruction {
    /// True for kinds that transmit data to a paired receiver.
    pub fn is_send(self) -> bool {
        matches!(
            self,
            Instruction::Send
                | Instruction::RecvCopySend
                | Instruction::RecvReduceSend
                | Instruction::RecvReduceCopySend
        )
    }

    /// True for kinds that consume data from a paired sender.
    pub fn is_recv(self) -> bool {
        matches!(
            self,
            Instruction::Recv
                | Instruction::RecvCopySend
                | Instruction::RecvReduceSend
                | Instruction::RecvReduceCopy
                | Instruction::RecvReduceCopySend
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Instruction::Start => "start",
            Instruction::Copy => "copy",
            Instruction::Reduce => "reduce",
            Instruction::Send => "send",
            Instruction::Recv => "recv",
            Instruction::RecvCopySend => "recv_copy_send",
            Instruction::RecvReduceSend => "recv_reduce_send",
            Instruction::RecvReduceCopy => "recv_reduce_copy",
            Instruction::RecvReduceCopySend => "recv_reduce_copy_send",
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ── Channels ───────────────────────────────────────────────────────────────

/// Transport class of the channel an instruction is issued on. Carried
/// through the pipeline unchanged; only the downstream emitter interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    None,
    Sm,
    Proxy,
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelType::None => write!(f, "none"),
            ChannelType::Sm => write!(f, "sm"),
            ChannelType::Proxy => write!(f, "proxy"),
        }
    }
}

// ── Replication ────────────────────────────────────────────────────────────

/// How input/output chunk indices are remapped when the schedule is
/// replicated N ways.
///
/// `Interleaved` keeps the chunks destined for a specific rank contiguous per
/// replica (required for rank-addressed collectives); `Batched` appends whole
/// buffer-length blocks per instance. Scratch buffers always replicate
/// batched regardless of policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationPolicy {
    Interleaved,
    Batched,
}

// ── Lowered output IR ──────────────────────────────────────────────────────

/// A dependency on another execution unit: wait until `tb` has executed its
/// op at `step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct DepRef {
    pub tb: u32,
    pub step: u32,
}

/// A fully annotated, fully lowered instruction.
#[derive(Debug, Clone, Serialize)]
pub struct LoweredOp {
    pub inst: Instruction,
    pub rank: Rank,
    pub src: ChunkRef,
    pub dst: ChunkRef,
    /// Extended source list for multi-operand instructions (usually empty).
    pub srcs: Vec<ChunkRef>,
    /// Extended destination list for multi-operand instructions (usually empty).
    pub dsts: Vec<ChunkRef>,
    pub tb: u32,
    pub channel: u32,
    pub channel_type: ChannelType,
    pub step: u32,
    pub chunk_step: i32,
    pub priority: i32,
    pub depends: Vec<DepRef>,
}

/// An ordered, channel-bound instruction sequence on one rank.
#[derive(Debug, Clone, Serialize)]
pub struct LoweredTb {
    pub id: u32,
    pub channel: u32,
    pub send_peer: Option<Rank>,
    pub recv_peer: Option<Rank>,
    pub ops: Vec<LoweredOp>,
}

/// One rank's compiled schedule: its ordered execution units.
#[derive(Debug, Clone, Serialize)]
pub struct Gpu {
    pub rank: Rank,
    pub threadblocks: Vec<LoweredTb>,
}

/// The final artifact handed to serialization.
#[derive(Debug, Clone, Serialize)]
pub struct Program {
    pub gpus: Vec<Gpu>,
}

// ── Display ────────────────────────────────────────────────────────────────

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Program ({} gpus)", self.gpus.len())?;
        for gpu in &self.gpus {
            writeln!(
                f,
                "  gpu {}: {} threadblocks",
                gpu.rank,
                gpu.threadblocks.len()
            )?;
            for tb in &gpu.threadblocks {
                writeln!(
                    f,
                    "    tb {} ch={} send={} recv={}",
                    tb.id,
                    tb.channel,
                    fmt_peer(tb.send_peer),
                    fmt_peer(tb.recv_peer)
                )?;
                for op in &tb.ops {
                    fmt_lowered_op(f, op)?;
                }
            }
        }
        Ok(())
    }
}

fn fmt_peer(peer: Option<Rank>) -> String {
    match peer {
        Some(r) => r.to_string(),
        None => "-".to_string(),
    }
}

fn fmt_lowered_op(f: &mut fmt::Formatter<'_>, op: &LoweredOp) -> fmt::Result {
    write!(
        f,
        "      {}: {} {} -> {} cs={} pri={}",
        op.step, op.inst, op.src, op.dst, op.chunk_step, op.priority
    )?;
    if !op.depends.is_empty() {
        let deps: Vec<String> = op
            .depends
            .iter()
            .map(|d| format!("tb{}.{}", d.tb, d.step))
            .collect();
        write!(f, " deps=[{}]", deps.join(", "))?;
    }
    writeln!(f)
}

// ── Tests ──────────────────────────────────────────────────────────────────
