//! # Task-graph node state machine
//!
//! A single long-running megakernel, launched with a fixed grid of `B`
//! blocks of `T` lanes, consumes a pre-sorted DAG of nodes. Blocks
//! coordinate only through atomics and one grid-wide init barrier, so
//! node transitions are observable across the entire grid.
//!
//! ## Node lifecycle
//!
//! | State     | Entry                                         |
//! |-----------|-----------------------------------------------|
//! | Dormant   | initial; counters untouched                   |
//! | Draining  | a leader published `total_num_invocations > 0`|
//! | Finishing | every slot claimed (`cur_offset >= total`)    |
//! | Retired   | `num_remaining` reached zero; one-way         |
//!
//! ## Ordering guarantees
//!
//! * `cur_node_idx` uses acquire/release ordering to fence publication of
//!   the next node's counters: the retirer stores the counters relaxed,
//!   then publishes the index with release; blocks observe it with
//!   acquire in `update_block_state`.
//! * `num_remaining` uses acquire-release subtraction so the retirer
//!   observes every prior relaxed bump of `cur_offset` on that node.
//! * `cur_offset` is relaxed; causality is already established through
//!   `num_remaining`.
//! * Block state is private to its block's worker; other blocks never
//!   read it.
//!
//! There are no blocking operations: a block either makes progress, spins
//! through `Loop` with a brief yield, or exits.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier};

use crate::engine::alloc::{HostAllocator, TmpAllocator};
use crate::engine::state::StateManager;
use crate::engine::types::WARP_WIDTH;
use crate::tracing::device::{DeviceTracing, TraceEvent};
use crate::tracing::print::HostPrint;

use super::consts::GridConfig;
use super::node::{Node, NodeData, TaskFn};

/// Index of a node in the sorted DAG.
pub type NodeID = u32;

/// Outcome of one work-acquisition attempt by a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Every node is retired; the block leaves the megakernel loop.
    Exit,

    /// No work is claimable right now; yield and retry.
    Loop,

    /// The block holds a claim; lane assignments are readable through
    /// [`BlockState::lane_state`].
    Run,
}

/// Per-lane view of a block's current claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneState {
    /// The lane executes the invocation at `offset`.
    Run {
        /// Invocation offset assigned to this lane.
        offset: u32,
    },

    /// The lane's offset fell past the end of the node. It does not
    /// execute but still participates in completion accounting.
    PartialRun,
}

/// Per-block scratch: the currently executing node, its cached invocation
/// parameters, and the block's claim bases.
///
/// Transient state, re-derived on every node transition. Modeled as an
/// explicit context object owned by the block's worker rather than
/// ambient shared memory.
pub struct BlockState {
    pub(crate) block_idx: u32,
    pub(crate) threads_per_block: u32,
    /// Index of the cached node; -1 before the first assignment.
    pub(crate) node_idx: i64,
    pub(crate) total_num_invocations: u32,
    pub(crate) func_id: u32,
    pub(crate) data_idx: u32,
    pub(crate) threads_per_invocation: u32,
    /// Base offset of the block's current claim; -1 means no assignment.
    pub(crate) init_offset: i64,
    warp_bases: Vec<i64>,
    new_node_claim: bool,
}

impl BlockState {
    /// Creates the scratch state for one block of the grid.
    pub fn new(block_idx: u32, threads_per_block: u32) -> Self {
        let num_warps = (threads_per_block / WARP_WIDTH) as usize;
        Self {
            block_idx,
            threads_per_block,
            node_idx: -1,
            total_num_invocations: 0,
            func_id: 0,
            data_idx: 0,
            threads_per_invocation: 1,
            init_offset: -1,
            warp_bases: vec![-1; num_warps],
            new_node_claim: false,
        }
    }

    /// Index of the block this state belongs to.
    #[inline]
    pub fn block_idx(&self) -> u32 {
        self.block_idx
    }

    /// Index of the node the block is currently assigned to, if any.
    #[inline]
    pub fn node_idx(&self) -> Option<NodeID> {
        (self.node_idx >= 0).then_some(self.node_idx as NodeID)
    }

    #[inline]
    fn num_warps(&self) -> usize {
        self.warp_bases.len()
    }

    /// Spreads a block-sized claim across the warps so the chunk
    /// `[base, base + T/tpi)` is covered with no skipped offsets.
    fn spread_block_claim(&mut self, base: i64) {
        let tpi = self.threads_per_invocation as i64;
        for w in 0..self.num_warps() {
            self.warp_bases[w] = base + (w as i64 * WARP_WIDTH as i64) / tpi;
        }
    }

    #[inline]
    fn has_runnable_warp(&self) -> bool {
        let total = self.total_num_invocations as i64;
        self.warp_bases.iter().any(|&b| b >= 0 && b < total)
    }

    #[inline]
    fn warp_has_claim(&self, warp: usize) -> bool {
        let base = self.warp_bases[warp];
        base >= 0 && base < self.total_num_invocations as i64
    }

    /// Resolves one lane's assignment under the block's current claim.
    ///
    /// `None` means the lane's warp holds no claim for this round (it
    /// neither executes nor participates in completion accounting).
    pub fn lane_state(&self, lane: u32) -> Option<LaneState> {
        debug_assert!(lane < self.threads_per_block);
        let warp = (lane / WARP_WIDTH) as usize;
        if !self.warp_has_claim(warp) {
            return None;
        }

        let base = self.warp_bases[warp];
        let offset = base + ((lane % WARP_WIDTH) / self.threads_per_invocation) as i64;
        if offset >= self.total_num_invocations as i64 {
            Some(LaneState::PartialRun)
        } else {
            Some(LaneState::Run {
                offset: offset as u32,
            })
        }
    }
}

/// Persistent megakernel scheduler over a pre-sorted DAG of nodes.
pub struct TaskGraph {
    pub(crate) sorted_nodes: Vec<Node>,
    pub(crate) node_datas: Vec<NodeData>,
    pub(crate) funcs: Vec<TaskFn>,
    pub(crate) cur_node_idx: AtomicU32,
    pub(crate) init_barrier: Barrier,
    pub(crate) config: GridConfig,
    pub(crate) state: Arc<StateManager>,
    pub(crate) tracing: Arc<DeviceTracing>,
    pub(crate) tmp: TmpAllocator,
    pub(crate) print: HostPrint,
    pub(crate) pool: rayon::ThreadPool,
    // Column and scratch reservations must outlive the graph.
    #[allow(dead_code)]
    pub(crate) alloc: Arc<HostAllocator>,
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("num_nodes", &self.sorted_nodes.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TaskGraph {
    /// Number of nodes in the sorted DAG.
    #[inline]
    pub fn num_nodes(&self) -> u32 {
        self.sorted_nodes.len() as u32
    }

    /// Returns the node at `idx` in the sorted list.
    #[inline]
    pub fn node(&self, idx: NodeID) -> &Node {
        &self.sorted_nodes[idx as usize]
    }

    /// Returns the payload at `data_idx` in the node-data arena.
    #[inline]
    pub fn node_data(&self, data_idx: u32) -> &NodeData {
        &self.node_datas[data_idx as usize]
    }

    /// The shared state manager.
    #[inline]
    pub fn state(&self) -> &StateManager {
        &self.state
    }

    /// The device tracing sink.
    #[inline]
    pub fn tracing(&self) -> &DeviceTracing {
        &self.tracing
    }

    /// Grid configuration the graph was built for.
    #[inline]
    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    /// The per-run scratch arena.
    #[inline]
    pub fn tmp(&self) -> &TmpAllocator {
        &self.tmp
    }

    /// The kernel print channel.
    #[inline]
    pub fn print(&self) -> &HostPrint {
        &self.print
    }

    /// Invocation count of a node at node-start time: the fixed count if
    /// non-zero, otherwise the payload header's dynamic count.
    pub fn compute_num_invocations(&self, node_idx: NodeID) -> u32 {
        let node = &self.sorted_nodes[node_idx as usize];
        if node.fixed_count == 0 {
            self.node_datas[node.data_idx as usize].dynamic_count()
        } else {
            node.fixed_count
        }
    }

    /// Per-run initialization.
    ///
    /// Exactly one block (block 0) resets the tracing ring, logs the
    /// calibration record, seeds the first node's counters, and publishes
    /// `cur_node_idx = 0`. The grid-wide barrier ensures every block
    /// observes initialization before proceeding; each block then resets
    /// its own scratch.
    pub fn init(&self, block: &mut BlockState) {
        if block.block_idx == 0 {
            self.tracing.reset();
            self.tracing.log(TraceEvent::Calibration, 0, 0, 0);
            self.tmp.reset();

            if self.num_nodes() > 0 {
                let count = self.compute_num_invocations(0);
                assert!(count != 0, "first node has zero invocations");

                let first = &self.sorted_nodes[0];
                first.cur_offset.store(0, Ordering::Relaxed);
                first.num_remaining.store(count, Ordering::Relaxed);
                first.total_num_invocations.store(count, Ordering::Relaxed);
                self.tracing
                    .log(TraceEvent::NodeStart, first.func_id, count, 0);
            }

            self.cur_node_idx.store(0, Ordering::Release);
        }

        self.init_barrier.wait();

        block.node_idx = -1;
        block.init_offset = -1;
    }

    /// Re-reads the grid's current node and claims a block-sized chunk.
    ///
    /// Runs on behalf of the whole block. Observing `num_nodes` parks the
    /// block in the Exit state; observing its own cached node means
    /// another block is still advancing, so the claim is withheld
    /// (`init_offset = -1`).
    fn update_block_state(&self, block: &mut BlockState) {
        let node_idx = self.cur_node_idx.load(Ordering::Acquire);
        if node_idx == self.num_nodes() {
            block.node_idx = node_idx as i64;
            return;
        }

        if node_idx as i64 == block.node_idx {
            block.init_offset = -1;
            return;
        }

        let node = &self.sorted_nodes[node_idx as usize];
        let tpi = node.num_threads_per_invocation;

        block.node_idx = node_idx as i64;
        block.total_num_invocations = node.total_num_invocations.load(Ordering::Relaxed);
        block.func_id = node.func_id;
        block.data_idx = node.data_idx;
        block.threads_per_invocation = tpi;
        block.init_offset = node
            .cur_offset
            .fetch_add(block.threads_per_block / tpi, Ordering::Relaxed)
            as i64;
    }

    fn block_get_next_node(&self, block: &mut BlockState) -> WorkerState {
        self.update_block_state(block);

        if block.node_idx == self.num_nodes() as i64 {
            return WorkerState::Exit;
        }

        if block.init_offset < 0 {
            return WorkerState::Loop;
        }

        block.spread_block_claim(block.init_offset);
        block.new_node_claim = true;
        WorkerState::Run
    }

    /// Acquires the block's next round of work.
    ///
    /// ## Behavior
    /// - No current assignment (`init_offset == -1`): re-enter through
    ///   `block_get_next_node`.
    /// - Wide invocations (`tpi > 32`): one block-sized re-claim published
    ///   to all lanes.
    /// - Narrow invocations (`tpi <= 32`): each warp independently claims
    ///   a warp-sized chunk.
    /// - A claim entirely past the end retries `block_get_next_node`
    ///   once; still past, the block loops.
    ///
    /// After `Run`, every lane's assignment is readable through
    /// [`BlockState::lane_state`]; lanes past the end report
    /// [`LaneState::PartialRun`] and must still be fed into
    /// [`TaskGraph::finish_work`].
    pub fn get_work(&self, block: &mut BlockState) -> WorkerState {
        block.new_node_claim = false;

        if block.init_offset < 0 {
            match self.block_get_next_node(block) {
                WorkerState::Run => {}
                other => return other,
            }
        } else {
            let node = &self.sorted_nodes[block.node_idx as usize];
            let total = block.total_num_invocations as i64;
            let tpi = block.threads_per_invocation;

            if tpi > WARP_WIDTH {
                let chunk = block.threads_per_block / tpi;
                let base = node.cur_offset.fetch_add(chunk, Ordering::Relaxed) as i64;
                block.init_offset = base;
                block.spread_block_claim(base);

                if base >= total {
                    match self.block_get_next_node(block) {
                        WorkerState::Run => {}
                        other => return other,
                    }
                }
            } else {
                let chunk = WARP_WIDTH / tpi;
                let mut any_runnable = false;
                for w in 0..block.num_warps() {
                    let base = node.cur_offset.fetch_add(chunk, Ordering::Relaxed) as i64;
                    block.warp_bases[w] = base;
                    if base < total {
                        any_runnable = true;
                    }
                }
                block.init_offset = block.warp_bases[0];

                if !any_runnable {
                    match self.block_get_next_node(block) {
                        WorkerState::Run => {}
                        other => return other,
                    }
                }
            }
        }

        if !block.has_runnable_warp() {
            return WorkerState::Loop;
        }

        if block.new_node_claim && block.threads_per_invocation <= WARP_WIDTH {
            self.tracing.log(
                TraceEvent::BlockStart,
                block.func_id,
                block.init_offset as u32,
                block.node_idx as u32,
            );
        }

        WorkerState::Run
    }

    /// Accounts a completed round of work.
    ///
    /// `executed[lane]` records whether the lane ran its invocation.
    /// Wide nodes account block-wide under the block leader; narrow nodes
    /// account per warp under each warp leader, using the warp's ballot
    /// popcount divided by the invocation width. The subtracted count is
    /// always the number of invocations that actually executed.
    pub fn finish_work(&self, block: &mut BlockState, executed: &[bool]) {
        debug_assert_eq!(executed.len(), block.threads_per_block as usize);

        let tpi = block.threads_per_invocation;
        let node_idx = block.node_idx as u32;

        if tpi > WARP_WIDTH {
            self.tracing.log(
                TraceEvent::BlockWait,
                block.func_id,
                block.init_offset as u32,
                node_idx,
            );

            let finished_lanes = executed.iter().filter(|e| **e).count() as u32;
            let num_finished = finished_lanes / tpi;
            if num_finished > 0 {
                self.retire(block, num_finished);
            }
        } else {
            for w in 0..block.num_warps() {
                if !block.warp_has_claim(w) {
                    continue;
                }

                self.tracing.log(
                    TraceEvent::BlockWait,
                    block.func_id,
                    block.warp_bases[w] as u32,
                    node_idx,
                );

                let warp_lanes =
                    &executed[w * WARP_WIDTH as usize..(w + 1) * WARP_WIDTH as usize];
                let ballot = warp_lanes.iter().filter(|e| **e).count() as u32;
                let num_finished = ballot / tpi;
                if num_finished > 0 {
                    self.retire(block, num_finished);
                }
            }
        }
    }

    /// Subtracts finished invocations; the leader whose subtraction
    /// drains `num_remaining` becomes the grid-wide retirer and advances
    /// `cur_node_idx`, skipping successors whose invocation count is
    /// zero.
    fn retire(&self, block: &BlockState, num_finished: u32) {
        let node_idx = block.node_idx as u32;
        let node = &self.sorted_nodes[node_idx as usize];

        let prev_remaining = node.num_remaining.fetch_sub(num_finished, Ordering::AcqRel);
        debug_assert!(prev_remaining >= num_finished);
        if prev_remaining != num_finished {
            return;
        }

        self.tracing.log(
            TraceEvent::NodeFinish,
            block.func_id,
            block.total_num_invocations,
            node_idx,
        );

        let mut next_node_idx = node_idx + 1;
        loop {
            if next_node_idx < self.num_nodes() {
                let count = self.compute_num_invocations(next_node_idx);
                if count == 0 {
                    next_node_idx += 1;
                    continue;
                }

                let next = &self.sorted_nodes[next_node_idx as usize];
                next.cur_offset.store(0, Ordering::Relaxed);
                next.num_remaining.store(count, Ordering::Relaxed);
                next.total_num_invocations.store(count, Ordering::Relaxed);

                self.tracing
                    .log(TraceEvent::NodeStart, next.func_id, count, next_node_idx);
            }

            self.cur_node_idx.store(next_node_idx, Ordering::Release);
            break;
        }
    }
}
