//! Grid launch: persistent block workers draining the DAG.
//!
//! `launch` broadcasts one worker per pool thread; each worker owns one
//! block and runs the megakernel loop until it observes `Exit`. Within a
//! block, lanes execute in lockstep: the worker resolves every lane's
//! assignment from the block's claim, dispatches the running lanes, and
//! feeds the executed mask into completion accounting.

use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;

use crate::tracing::device::TraceEvent;
use crate::tracing::host::{self, HostEvent};

use super::graph::{BlockState, LaneState, TaskGraph, WorkerState};
use super::node::TaskContext;

/// Aggregate lane statistics of one megakernel run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaunchStats {
    /// Lanes that received an invocation and executed it.
    pub lanes_run: u64,

    /// Lanes whose offset fell past the end of a node (participated in
    /// completion accounting without executing).
    pub lanes_partial: u64,
}

impl TaskGraph {
    /// Runs the megakernel to completion.
    ///
    /// Blocks the caller until every node is retired and every block has
    /// exited. The graph can be launched again afterwards; per-run state
    /// is re-initialized by block 0.
    ///
    /// ## Faults
    /// A panicking kernel abandons the run: the faulting block forces the
    /// Exit state grid-wide, the remaining blocks drain out, and the
    /// panic propagates to the caller. There is no rollback.
    pub fn launch(&self) -> LaunchStats {
        host::record(HostEvent::MegakernelStart);
        log::info!(
            "megakernel launch: {} nodes, {} blocks x {} threads",
            self.num_nodes(),
            self.config.num_blocks,
            self.config.threads_per_block
        );

        let per_block = self
            .pool
            .broadcast(|ctx| self.run_block(ctx.index() as u32));

        host::record(HostEvent::MegakernelEnd);

        let mut stats = LaunchStats::default();
        for block_stats in per_block {
            stats.lanes_run += block_stats.lanes_run;
            stats.lanes_partial += block_stats.lanes_partial;
        }
        stats
    }

    fn run_block(&self, block_idx: u32) -> LaunchStats {
        let threads = self.config.threads_per_block;
        let mut block = BlockState::new(block_idx, threads);

        self.init(&mut block);

        let mut executed = vec![false; threads as usize];
        let mut stats = LaunchStats::default();

        loop {
            match self.get_work(&mut block) {
                WorkerState::Exit => {
                    self.tracing.log(
                        TraceEvent::BlockExit,
                        block.func_id,
                        block.init_offset as u32,
                        block.node_idx as u32,
                    );
                    break;
                }

                WorkerState::Loop => {
                    std::thread::yield_now();
                }

                WorkerState::Run => {
                    executed.fill(false);

                    let wide = block.threads_per_invocation > crate::engine::types::WARP_WIDTH;
                    if wide {
                        self.tracing.log(
                            TraceEvent::BlockStart,
                            block.func_id,
                            block.init_offset as u32,
                            block.node_idx as u32,
                        );
                    }

                    let func = self.funcs[block.func_id as usize];
                    let data = &self.node_datas[block.data_idx as usize];
                    let ctx = TaskContext {
                        state: &self.state,
                        tmp: &self.tmp,
                        print: &self.print,
                        tracing: &self.tracing,
                        node_datas: &self.node_datas,
                        block_idx,
                        node_idx: block.node_idx as u32,
                    };

                    for lane in 0..threads {
                        match block.lane_state(lane) {
                            None => {}
                            Some(LaneState::PartialRun) => {
                                stats.lanes_partial += 1;
                            }
                            Some(LaneState::Run { offset }) => {
                                match catch_unwind(AssertUnwindSafe(|| func(&ctx, data, offset))) {
                                    Ok(()) => {
                                        executed[lane as usize] = true;
                                        stats.lanes_run += 1;
                                    }
                                    Err(payload) => {
                                        log::error!(
                                            "kernel fault at node {} offset {offset}: run abandoned",
                                            block.node_idx
                                        );
                                        self.cur_node_idx
                                            .store(self.num_nodes(), Ordering::Release);
                                        resume_unwind(payload);
                                    }
                                }
                            }
                        }
                    }

                    self.finish_work(&mut block, &executed);
                }
            }
        }

        stats
    }
}
