// dag.rs — Instruction DAG construction over buffer slots
//
// Builds the fine-grained data-hazard graph: one constructor per instruction
// kind, each decomposing into slot reads/writes against the per-slot
// last-writer / active-readers bookkeeping. Nodes live in an arena addressed
// by `OpId` handles; adjacency is stored as ordered sets of handles so node
// excision cannot leave dangling references and every traversal is
// deterministic.
//
// Preconditions: ranks are within the compilation's fixed range (enforced by
//                the pipeline driver).
// Postconditions: the graph is acyclic and every pairing is mutual (checked
//                 by `verify_dag`).
// Failure modes: read-before-write / reduce-into-unwritten slots and
//                unit/channel/peer conflicts → `Diagnostic` error.
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use crate::diag::{codes, Diagnostic};
use crate::ir::{BufferId, ChannelType, ChunkRef, Instruction, Rank};
use crate::pass::StageCert;

// ── Public types ────────────────────────────────────────────────────────────

/// Opaque handle of an instruction node. Handles are allocated in
/// construction order and never reused; excised nodes stay retired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpId(pub u32);

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op{}", self.0)
    }
}

/// Unit of data-hazard tracking: one addressable buffer slot.
pub type Slot = (Rank, BufferId, usize);

/// An instruction node in the arena.
#[derive(Debug, Clone)]
pub struct OpNode {
    pub inst: Instruction,
    pub rank: Rank,
    pub src: ChunkRef,
    pub dst: ChunkRef,
    /// Extended operand lists for multi-operand instructions (usually empty).
    pub srcs: Vec<ChunkRef>,
    pub dsts: Vec<ChunkRef>,
    /// Owning execution unit. `None` for synthetic start nodes.
    pub tb: Option<u32>,
    pub channel: u32,
    pub channel_type: ChannelType,
    /// Sequence position within the owning unit.
    pub step: u32,
    /// Forward distance from the start nodes (start itself sits at -1).
    pub chunk_step: i32,
    /// Scheduling priority used by the downstream emitter.
    pub priority: i32,
    pub prev: BTreeSet<OpId>,
    pub next: BTreeSet<OpId>,
    /// Filtered cross-unit dependency list, populated by inference.
    pub depends: Vec<OpId>,
    /// On recv-family nodes: the paired send on the peer rank.
    pub send_match: Option<OpId>,
    /// On send-family nodes: the paired recv on the peer rank.
    pub recv_match: Option<OpId>,
    pub retired: bool,
}

/// An execution unit: an ordered, channel-bound op sequence on one rank.
#[derive(Debug, Clone)]
pub struct Threadblock {
    pub channel: u32,
    pub send_peer: Option<Rank>,
    pub recv_peer: Option<Rank>,
    pub ops: Vec<OpId>,
}

impl Threadblock {
    fn new(channel: u32) -> Self {
        Threadblock {
            channel,
            send_peer: None,
            recv_peer: None,
            ops: Vec::new(),
        }
    }
}

// ── The DAG ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct InstructionDag {
    num_ranks: usize,
    nodes: Vec<OpNode>,
    /// Slot → the first op that ever wrote it (graph roots for traversal).
    operations: BTreeMap<Slot, OpId>,
    last_writer: BTreeMap<Slot, OpId>,
    last_readers: BTreeMap<Slot, Vec<OpId>>,
    /// Per rank: unit id → unit.
    tbs: Vec<BTreeMap<u32, Threadblock>>,
    /// Per rank: 1 + highest channel id observed.
    num_channels: Vec<u32>,
}

impl InstructionDag {
    pub fn new(num_ranks: usize) -> Self {
        InstructionDag {
            num_ranks,
            nodes: Vec::new(),
            operations: BTreeMap::new(),
            last_writer: BTreeMap::new(),
            last_readers: BTreeMap::new(),
            tbs: vec![BTreeMap::new(); num_ranks],
            num_channels: vec![1; num_ranks],
        }
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn num_ranks(&self) -> usize {
        self.num_ranks
    }

    pub fn node(&self, id: OpId) -> &OpNode {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: OpId) -> &mut OpNode {
        &mut self.nodes[id.0 as usize]
    }

    /// All non-retired ops in creation order — the canonical deterministic
    /// visitation order for every pass.
    pub fn live_ops(&self) -> Vec<OpId> {
        (0..self.nodes.len() as u32)
            .map(OpId)
            .filter(|id| !self.nodes[id.0 as usize].retired)
            .collect()
    }

    pub fn tbs(&self, rank: Rank) -> &BTreeMap<u32, Threadblock> {
        &self.tbs[rank]
    }

    pub fn threadblock(&self, rank: Rank, tb: u32) -> Option<&Threadblock> {
        self.tbs[rank].get(&tb)
    }

    pub fn channel_count(&self, rank: Rank) -> u32 {
        self.num_channels[rank]
    }

    /// Largest per-rank channel count across all ranks.
    pub fn max_channel_count(&self) -> u32 {
        self.num_channels.iter().copied().max().unwrap_or(1)
    }

    // ── Graph builder ───────────────────────────────────────────────────

    /// Seed one slot with a synthetic root. The front end calls this once
    /// per initially-valid slot before any op reads it.
    pub fn add_start(&mut self, rank: Rank, buffer: BufferId, index: usize, chunk: ChunkRef) -> OpId {
        let op = self.alloc(
            Instruction::Start,
            rank,
            chunk.clone(),
            chunk,
            None,
            0,
            ChannelType::None,
        );
        let slot: Slot = (rank, buffer, index);
        self.operations.insert(slot.clone(), op);
        self.last_writer.insert(slot, op);
        op
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
        let op = self.alloc(
            Instruction::Copy,
            rank,
            src.clone(),
            dst.clone(),
            Some(tb),
            channel,
            channel_type,
        );
        self.enroll(op, rank, tb, channel)?;
        let size = dst.size;
        self.record_read(rank, &src.buffer, src.index, size, op)?;
        self.record_write(rank, &dst.buffer, dst.index, size, op, false)?;
        Ok(op)
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
        let op = self.alloc(
            Instruction::Reduce,
            rank,
            src.clone(),
            dst.clone(),
            Some(tb),
            channel,
            channel_type,
        );
        self.enroll(op, rank, tb, channel)?;
        let size = dst.size;
        self.record_read(rank, &src.buffer, src.index, size, op)?;
        self.record_write(rank, &dst.buffer, dst.index, size, op, true)?;
        Ok(op)
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
        let peer = dst.rank;
        let op = self.alloc(
            Instruction::Send,
            rank,
            src.clone(),
            dst,
            Some(tb),
            channel,
            channel_type,
        );
        self.enroll(op, rank, tb, channel)?;
        self.set_send_peer(rank, tb, peer)?;
        self.record_read(rank, &src.buffer, src.index, src.size, op)?;
        Ok(op)
    }

    /// The caller must have already built the matching send on the peer rank;
    /// the pairing is wired in both directions here.
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
        self.check_pairing(send_match)?;
        let peer = src.rank;
        let op = self.alloc(
            Instruction::Recv,
            rank,
            src,
            dst.clone(),
            Some(tb),
            channel,
            channel_type,
        );
        self.enroll(op, rank, tb, channel)?;
        self.set_recv_peer(rank, tb, peer)?;
        self.record_write(rank, &dst.buffer, dst.index, dst.size, op, false)?;
        self.nodes[op.0 as usize].send_match = Some(send_match);
        self.nodes[send_match.0 as usize].recv_match = Some(op);
        Ok(op)
    }

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
        self.check_pairing(send_match)?;
        let peer = src.rank;
        let op = self.alloc(
            Instruction::RecvReduceCopy,
            rank,
            src,
            dst.clone(),
            Some(tb),
            channel,
            channel_type,
        );
        self.enroll(op, rank, tb, channel)?;
        self.set_recv_peer(rank, tb, peer)?;
        self.record_write(rank, &dst.buffer, dst.index, dst.size, op, true)?;
        self.nodes[op.0 as usize].send_match = Some(send_match);
        self.nodes[send_match.0 as usize].recv_match = Some(op);
        Ok(op)
    }

    // ── Slot tracker ────────────────────────────────────────────────────

    /// Record a write covering `size` slots. Predecessors are the active
    /// readers since the prior write, else the prior writer, else none.
    /// `rmw` marks reduce-type writes, which require a pre-existing writer.
    fn record_write(
        &mut self,
        rank: Rank,
        buffer: &BufferId,
        index: usize,
        size: usize,
        op: OpId,
        rmw: bool,
    ) -> Result<(), Diagnostic> {
        let mut prev_ops: BTreeSet<OpId> = BTreeSet::new();
        for i in index..index + size {
            let slot: Slot = (rank, buffer.clone(), i);
            if rmw && !self.last_writer.contains_key(&slot) {
                return Err(Diagnostic::error(format!(
                    "{} reduces into a slot that was never written",
                    self.nodes[op.0 as usize].inst
                ))
                .with_code(codes::REDUCE_BEFORE_WRITE)
                .with_slot(rank, buffer.clone(), i));
            }

            // First write to this slot roots the traversals here.
            self.operations.entry(slot.clone()).or_insert(op);

            let readers = self
                .last_readers
                .get(&slot)
                .map(|v| v.as_slice())
                .unwrap_or(&[]);
            if !readers.is_empty() {
                prev_ops.extend(readers.iter().copied());
            } else if let Some(&writer) = self.last_writer.get(&slot) {
                prev_ops.insert(writer);
            }

            self.last_writer.insert(slot.clone(), op);
            self.last_readers.insert(slot, Vec::new());
        }
        self.wire(prev_ops, op);
        Ok(())
    }

    /// Record a read covering `size` slots. Every covered slot must already
    /// have a writer; the read depends on it and joins the active readers.
    fn record_read(
        &mut self,
        rank: Rank,
        buffer: &BufferId,
        index: usize,
        size: usize,
        op: OpId,
    ) -> Result<(), Diagnostic> {
        let mut prev_ops: BTreeSet<OpId> = BTreeSet::new();
        for i in index..index + size {
            let slot: Slot = (rank, buffer.clone(), i);
            let Some(&writer) = self.last_writer.get(&slot) else {
                return Err(Diagnostic::error(format!(
                    "{} reads a slot that was never written",
                    self.nodes[op.0 as usize].inst
                ))
                .with_code(codes::READ_BEFORE_WRITE)
                .with_slot(rank, buffer.clone(), i));
            };
            prev_ops.insert(writer);
            self.last_readers.entry(slot).or_default().push(op);
        }
        self.wire(prev_ops, op);
        Ok(())
    }

    fn wire(&mut self, prev_ops: BTreeSet<OpId>, op: OpId) {
        for p in prev_ops {
            if p == op {
                continue;
            }
            self.nodes[p.0 as usize].next.insert(op);
            self.nodes[op.0 as usize].prev.insert(p);
        }
    }

    // ── Internal bookkeeping ────────────────────────────────────────────

    fn alloc(
        &mut self,
        inst: Instruction,
        rank: Rank,
        src: ChunkRef,
        dst: ChunkRef,
        tb: Option<u32>,
        channel: u32,
        channel_type: ChannelType,
    ) -> OpId {
        let id = OpId(self.nodes.len() as u32);
        self.nodes.push(OpNode {
            inst,
            rank,
            src,
            dst,
            srcs: Vec::new(),
            dsts: Vec::new(),
            tb,
            channel,
            channel_type,
            step: 0,
            chunk_step: -1,
            priority: 0,
            prev: BTreeSet::new(),
            next: BTreeSet::new(),
            depends: Vec::new(),
            send_match: None,
            recv_match: None,
            retired: false,
        });
        id
    }

    /// Register an op into its execution unit, assigning its sequence step
    /// and updating the rank's channel count.
    fn enroll(&mut self, op: OpId, rank: Rank, tb: u32, channel: u32) -> Result<(), Diagnostic> {
        if channel + 1 > self.num_channels[rank] {
            self.num_channels[rank] = channel + 1;
        }
        let block = self.tbs[rank]
            .entry(tb)
            .or_insert_with(|| Threadblock::new(channel));
        if block.channel != channel {
            return Err(Diagnostic::error(format!(
                "threadblock {} on rank {} is bound to channel {} but op uses channel {}",
                tb, rank, block.channel, channel
            ))
            .with_code(codes::CHANNEL_CONFLICT));
        }
        let step = block.ops.len() as u32;
        block.ops.push(op);
        self.nodes[op.0 as usize].step = step;
        Ok(())
    }

    fn set_send_peer(&mut self, rank: Rank, tb: u32, peer: Rank) -> Result<(), Diagnostic> {
        let block = self.tbs[rank].get_mut(&tb).ok_or_else(|| {
            Diagnostic::error(format!("threadblock {} on rank {} not registered", tb, rank))
        })?;
        match block.send_peer {
            None => block.send_peer = Some(peer),
            Some(existing) if existing == peer => {}
            Some(existing) => {
                return Err(Diagnostic::error(format!(
                    "threadblock {} on rank {} sends to rank {} but already sends to rank {}",
                    tb, rank, peer, existing
                ))
                .with_code(codes::PEER_CONFLICT));
            }
        }
        Ok(())
    }

    fn set_recv_peer(&mut self, rank: Rank, tb: u32, peer: Rank) -> Result<(), Diagnostic> {
        let block = self.tbs[rank].get_mut(&tb).ok_or_else(|| {
            Diagnostic::error(format!("threadblock {} on rank {} not registered", tb, rank))
        })?;
        match block.recv_peer {
            None => block.recv_peer = Some(peer),
            Some(existing) if existing == peer => {}
            Some(existing) => {
                return Err(Diagnostic::error(format!(
                    "threadblock {} on rank {} receives from rank {} but already receives from rank {}",
                    tb, rank, peer, existing
                ))
                .with_code(codes::PEER_CONFLICT));
            }
        }
        Ok(())
    }

    fn check_pairing(&self, send: OpId) -> Result<(), Diagnostic> {
        let node = &self.nodes[send.0 as usize];
        if !node.inst.is_send() {
            return Err(Diagnostic::error(format!(
                "{} paired with a {} node; the match must be send-family",
                send, node.inst
            ))
            .with_code(codes::BAD_PAIRING));
        }
        Ok(())
    }

    // ── Rewrite support ─────────────────────────────────────────────────

    /// Splice `drop` out of the graph, redirecting every structural
    /// reference to `keep`: predecessors connect straight to successors
    /// (deduplicated), the drop's unit is compacted and re-stepped, and any
    /// pairing or depends entry naming `drop` now names `keep`. The handle
    /// is retired, never reused.
    pub fn excise(&mut self, drop: OpId, keep: OpId) {
        let prevs: Vec<OpId> = self.nodes[drop.0 as usize].prev.iter().copied().collect();
        let nexts: Vec<OpId> = self.nodes[drop.0 as usize].next.iter().copied().collect();

        for &p in &prevs {
            let node = &mut self.nodes[p.0 as usize];
            node.next.remove(&drop);
            for &s in &nexts {
                if s != p {
                    node.next.insert(s);
                }
            }
        }
        for &s in &nexts {
            let node = &mut self.nodes[s.0 as usize];
            node.prev.remove(&drop);
            for &p in &prevs {
                if p != s {
                    node.prev.insert(p);
                }
            }
        }

        let (rank, tb) = {
            let node = &mut self.nodes[drop.0 as usize];
            node.prev.clear();
            node.next.clear();
            node.depends.clear();
            node.send_match = None;
            node.recv_match = None;
            node.retired = true;
            (node.rank, node.tb)
        };

        if let Some(tb) = tb {
            let renumber: Vec<OpId> = match self.tbs[rank].get_mut(&tb) {
                Some(block) => {
                    block.ops.retain(|&o| o != drop);
                    block.ops.clone()
                }
                None => Vec::new(),
            };
            for (i, o) in renumber.iter().enumerate() {
                self.nodes[o.0 as usize].step = i as u32;
            }
        }

        for node in &mut self.nodes {
            if node.retired {
                continue;
            }
            if node.send_match == Some(drop) {
                node.send_match = Some(keep);
            }
            if node.recv_match == Some(drop) {
                node.recv_match = Some(keep);
            }
            for dep in &mut node.depends {
                if *dep == drop {
                    *dep = keep;
                }
            }
        }
    }

    /// Would merging `drop` into `keep` close a cycle? Walks forward from
    /// both nodes' successors (minus the edge being collapsed); revisiting
    /// either original node means the rewrite must be skipped.
    pub fn would_form_cycle(&self, keep: OpId, drop: OpId) -> bool {
        let mut seen: BTreeSet<OpId> = BTreeSet::new();
        let mut frontier: VecDeque<OpId> = VecDeque::new();
        for &n in &self.nodes[keep.0 as usize].next {
            if n != drop && seen.insert(n) {
                frontier.push_back(n);
            }
        }
        for &n in &self.nodes[drop.0 as usize].next {
            if seen.insert(n) {
                frontier.push_back(n);
            }
        }
        while let Some(cur) = frontier.pop_front() {
            if cur == keep || cur == drop {
                return true;
            }
            for &n in &self.nodes[cur.0 as usize].next {
                if seen.insert(n) {
                    frontier.push_back(n);
                }
            }
        }
        false
    }

    // ── Traversal helpers ───────────────────────────────────────────────

    /// Forward edges of a node: hazard successors plus, for send-family
    /// nodes, the pairing edge to the peer recv.
    pub fn successors(&self, id: OpId) -> Vec<OpId> {
        let node = &self.nodes[id.0 as usize];
        let mut succ: Vec<OpId> = node.next.iter().copied().collect();
        if node.inst.is_send() {
            if let Some(m) = node.recv_match {
                succ.push(m);
            }
        }
        succ
    }

    /// True when the graph (including pairing edges) has no cycle.
    pub fn is_acyclic(&self) -> bool {
        const UNSEEN: u8 = 0;
        const ACTIVE: u8 = 1;
        const DONE: u8 = 2;
        let mut state = vec![UNSEEN; self.nodes.len()];

        for root in 0..self.nodes.len() {
            if self.nodes[root].retired || state[root] != UNSEEN {
                continue;
            }
            let mut stack: Vec<(OpId, Vec<OpId>, usize)> = Vec::new();
            state[root] = ACTIVE;
            let root_id = OpId(root as u32);
            stack.push((root_id, self.successors(root_id), 0));

            while let Some((id, succs, idx)) = stack.pop() {
                if idx < succs.len() {
                    let target = succs[idx];
                    stack.push((id, succs, idx + 1));
                    let t = target.0 as usize;
                    if self.nodes[t].retired {
                        continue;
                    }
                    match state[t] {
                        ACTIVE => return false,
                        UNSEEN => {
                            state[t] = ACTIVE;
                            stack.push((target, self.successors(target), 0));
                        }
                        _ => {}
                    }
                } else {
                    state[id.0 as usize] = DONE;
                }
            }
        }
        true
    }
}

// ── Verification ────────────────────────────────────────────────────────────

/// Machine-checkable evidence for DAG invariants (C1-C2).
#[derive(Debug, Clone)]
pub struct DagCert {
    /// C1: No cycle over hazard edges plus pairing edges.
    pub c1_acyclic: bool,
    /// C2: Every pairing is mutual (A.match == B implies B.match == A).
    pub c2_pairing_mutual: bool,
}

impl StageCert for DagCert {
    fn all_pass(&self) -> bool {
        self.c1_acyclic && self.c2_pairing_mutual
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("C1_acyclic", self.c1_acyclic),
            ("C2_pairing_mutual", self.c2_pairing_mutual),
        ]
    }
}

/// Verify DAG invariants.
pub fn verify_dag(dag: &InstructionDag) -> DagCert {
    DagCert {
        c1_acyclic: dag.is_acyclic(),
        c2_pairing_mutual: verify_pairing_mutual(dag),
    }
}

fn verify_pairing_mutual(dag: &InstructionDag) -> bool {
    for id in dag.live_ops() {
        let node = dag.node(id);
        if let Some(m) = node.send_match {
            let peer = dag.node(m);
            if peer.retired || !peer.inst.is_send() || peer.recv_match != Some(id) {
                return false;
            }
        }
        if let Some(m) = node.recv_match {
            let peer = dag.node(m);
            if peer.retired || !peer.inst.is_recv() || peer.send_match != Some(id) {
                return false;
            }
        }
    }
    true
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn input(rank: Rank, index: usize, size: usize) -> ChunkRef {
        ChunkRef::new(rank, BufferId::Input, index, size)
    }

    fn output(rank: Rank, index: usize, size: usize) -> ChunkRef {
        ChunkRef::new(rank, BufferId::Output, index, size)
    }

    fn scratch(rank: Rank, name: &str, index: usize, size: usize) -> ChunkRef {
        ChunkRef::new(rank, BufferId::Named(name.into()), index, size)
    }

    fn seeded(num_ranks: usize, slots: usize) -> InstructionDag {
        let mut dag = InstructionDag::new(num_ranks);
        for r in 0..num_ranks {
            for i in 0..slots {
                dag.add_start(r, BufferId::Input, i, input(r, i, 1));
            }
        }
        dag
    }

    #[test]
    fn copy_depends_on_slot_writer() {
        let mut dag = seeded(1, 1);
        let cp = dag
            .add_copy(0, input(0, 0, 1), output(0, 0, 1), 0, 0, ChannelType::Sm)
            .unwrap();
        let start = dag.operations[&(0, BufferId::Input, 0)];
        assert!(dag.node(cp).prev.contains(&start));
        assert!(dag.node(start).next.contains(&cp));
    }

    #[test]
    fn write_after_read_depends_on_readers() {
        let mut dag = seeded(2, 1);
        // Two reads of input[0], then an overwrite of the same slot.
        let s1 = dag
            .add_send(0, input(0, 0, 1), scratch(1, "s", 0, 1), 0, 0, ChannelType::Sm)
            .unwrap();
        let s2 = dag
            .add_send(0, input(0, 0, 1), scratch(1, "s", 1, 1), 1, 1, ChannelType::Sm)
            .unwrap();
        let cp = dag
            .add_copy(0, input(0, 0, 1), input(0, 0, 1), 2, 2, ChannelType::Sm)
            .unwrap();
        // The copy also reads the slot, so its predecessor from the read side
        // is the start node; the write side must order it after both sends.
        assert!(dag.node(cp).prev.contains(&s1));
        assert!(dag.node(cp).prev.contains(&s2));
        assert!(dag.node(s1).next.contains(&cp));
        assert!(dag.node(s2).next.contains(&cp));
    }

    #[test]
    fn write_after_write_depends_on_prior_writer() {
        let mut dag = seeded(2, 1);
        let send = dag
            .add_send(1, input(1, 0, 1), scratch(0, "s", 0, 1), 0, 0, ChannelType::Sm)
            .unwrap();
        let r1 = dag
            .add_recv(0, input(1, 0, 1), scratch(0, "s", 0, 1), 0, 0, ChannelType::Sm, send)
            .unwrap();
        let send2 = dag
            .add_send(1, input(1, 0, 1), scratch(0, "s", 0, 1), 0, 0, ChannelType::Sm)
            .unwrap();
        let r2 = dag
            .add_recv(0, input(1, 0, 1), scratch(0, "s", 0, 1), 0, 0, ChannelType::Sm, send2)
            .unwrap();
        // No reads between the two writes: write-after-write edge.
        assert!(dag.node(r2).prev.contains(&r1));
    }

    #[test]
    fn read_before_write_is_fatal() {
        let mut dag = InstructionDag::new(1);
        let err = dag
            .add_copy(0, input(0, 0, 1), output(0, 0, 1), 0, 0, ChannelType::Sm)
            .unwrap_err();
        assert_eq!(err.code, Some(codes::READ_BEFORE_WRITE));
        assert!(err.slot.is_some());
    }

    #[test]
    fn reduce_into_unwritten_is_fatal() {
        let mut dag = seeded(1, 1);
        let err = dag
            .add_reduce(0, input(0, 0, 1), output(0, 0, 1), 0, 0, ChannelType::Sm)
            .unwrap_err();
        assert_eq!(err.code, Some(codes::REDUCE_BEFORE_WRITE));
    }

    #[test]
    fn unit_bound_to_one_channel() {
        let mut dag = seeded(1, 2);
        dag.add_copy(0, input(0, 0, 1), output(0, 0, 1), 0, 0, ChannelType::Sm)
            .unwrap();
        let err = dag
            .add_copy(0, input(0, 1, 1), output(0, 1, 1), 0, 1, ChannelType::Sm)
            .unwrap_err();
        assert_eq!(err.code, Some(codes::CHANNEL_CONFLICT));
    }

    #[test]
    fn unit_peer_conflict_detected() {
        let mut dag = seeded(3, 2);
        dag.add_send(0, input(0, 0, 1), scratch(1, "s", 0, 1), 0, 0, ChannelType::Sm)
            .unwrap();
        let err = dag
            .add_send(0, input(0, 1, 1), scratch(2, "s", 0, 1), 0, 0, ChannelType::Sm)
            .unwrap_err();
        assert_eq!(err.code, Some(codes::PEER_CONFLICT));
    }

    #[test]
    fn pairing_is_mutual() {
        let mut dag = seeded(2, 1);
        let send = dag
            .add_send(0, input(0, 0, 1), scratch(1, "s", 0, 1), 0, 0, ChannelType::Sm)
            .unwrap();
        let recv = dag
            .add_recv(1, input(0, 0, 1), scratch(1, "s", 0, 1), 0, 0, ChannelType::Sm, send)
            .unwrap();
        assert_eq!(dag.node(recv).send_match, Some(send));
        assert_eq!(dag.node(send).recv_match, Some(recv));
        let cert = verify_dag(&dag);
        assert!(cert.all_pass(), "obligations: {:?}", cert.obligations());
    }

    #[test]
    fn pairing_with_non_send_rejected() {
        let mut dag = seeded(2, 1);
        let cp = dag
            .add_copy(0, input(0, 0, 1), output(0, 0, 1), 0, 0, ChannelType::Sm)
            .unwrap();
        let err = dag
            .add_recv(1, input(0, 0, 1), scratch(1, "s", 0, 1), 0, 0, ChannelType::Sm, cp)
            .unwrap_err();
        assert_eq!(err.code, Some(codes::BAD_PAIRING));
    }

    #[test]
    fn steps_count_per_unit() {
        let mut dag = seeded(1, 3);
        let a = dag
            .add_copy(0, input(0, 0, 1), output(0, 0, 1), 0, 0, ChannelType::Sm)
            .unwrap();
        let b = dag
            .add_copy(0, input(0, 1, 1), output(0, 1, 1), 0, 0, ChannelType::Sm)
            .unwrap();
        let c = dag
            .add_copy(0, input(0, 2, 1), output(0, 2, 1), 1, 1, ChannelType::Sm)
            .unwrap();
        assert_eq!(dag.node(a).step, 0);
        assert_eq!(dag.node(b).step, 1);
        assert_eq!(dag.node(c).step, 0);
        assert_eq!(dag.channel_count(0), 2);
        assert_eq!(dag.max_channel_count(), 2);
    }

    #[test]
    fn excise_splices_and_renumbers() {
        let mut dag = seeded(1, 1);
        // Chain over the same output slot: a writes, b overwrites, c overwrites.
        let a = dag
            .add_copy(0, input(0, 0, 1), output(0, 0, 1), 0, 0, ChannelType::Sm)
            .unwrap();
        let b = dag
            .add_copy(0, input(0, 0, 1), output(0, 0, 1), 0, 0, ChannelType::Sm)
            .unwrap();
        let c = dag
            .add_copy(0, input(0, 0, 1), output(0, 0, 1), 0, 0, ChannelType::Sm)
            .unwrap();
        assert!(dag.node(b).prev.contains(&a));
        assert!(dag.node(c).prev.contains(&b));

        dag.excise(b, a);
        assert!(dag.node(b).retired);
        assert!(dag.node(a).next.contains(&c));
        assert!(dag.node(c).prev.contains(&a));
        assert!(!dag.node(c).prev.contains(&b));
        // Unit compacted: a at step 0, c now at step 1.
        assert_eq!(dag.node(a).step, 0);
        assert_eq!(dag.node(c).step, 1);
        assert_eq!(dag.threadblock(0, 0).map(|t| t.ops.len()), Some(2));
    }

    #[test]
    fn cycle_gate_detects_back_edge() {
        let mut dag = seeded(1, 1);
        let a = dag
            .add_copy(0, input(0, 0, 1), output(0, 0, 1), 0, 0, ChannelType::Sm)
            .unwrap();
        let b = dag
            .add_copy(0, input(0, 0, 1), output(0, 0, 1), 0, 0, ChannelType::Sm)
            .unwrap();
        assert!(!dag.would_form_cycle(a, b));
        // Inject a back edge b -> a; merging would now close a loop.
        dag.node_mut(b).next.insert(a);
        dag.node_mut(a).prev.insert(b);
        assert!(dag.would_form_cycle(a, b));
        assert!(!dag.is_acyclic());
    }

    #[test]
    fn builder_graphs_are_acyclic() {
        let mut dag = seeded(2, 2);
        let send = dag
            .add_send(0, input(0, 0, 1), scratch(1, "s", 0, 1), 0, 0, ChannelType::Sm)
            .unwrap();
        dag.add_recv(1, input(0, 0, 1), scratch(1, "s", 0, 1), 0, 0, ChannelType::Sm, send)
            .unwrap();
        dag.add_copy(1, scratch(1, "s", 0, 1), output(1, 0, 1), 0, 0, ChannelType::Sm)
            .unwrap();
        assert!(dag.is_acyclic());
    }
}
