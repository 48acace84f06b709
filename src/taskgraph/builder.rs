//! Task-graph assembly.
//!
//! The builder collects the function table, the node-data arena, and the
//! topologically-sorted node list, validates the grid shape, and
//! produces a launchable [`TaskGraph`]. Nodes are appended in execution
//! order; the caller provides the sort.

use std::sync::atomic::AtomicU32;
use std::sync::{Arc, Barrier};

use crate::engine::alloc::{HostAllocator, TmpAllocator};
use crate::engine::error::BuildError;
use crate::engine::state::StateManager;
use crate::engine::types::{FuncID, WARP_WIDTH};
use crate::tracing::device::DeviceTracing;
use crate::tracing::print::HostPrint;

use super::consts::GridConfig;
use super::graph::{NodeID, TaskGraph};
use super::node::{Node, NodeData, TaskFn};

/// Default capacity of the per-run scratch arena.
const TMP_ARENA_BYTES: u64 = 16 * 1024 * 1024;

/// Collects nodes, payloads, and kernels into a launchable graph.
pub struct TaskGraphBuilder {
    funcs: Vec<TaskFn>,
    node_datas: Vec<NodeData>,
    nodes: Vec<Node>,
}

impl Default for TaskGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskGraphBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self {
            funcs: Vec::new(),
            node_datas: Vec::new(),
            nodes: Vec::new(),
        }
    }

    /// Registers a kernel in the dispatch table and returns its id.
    pub fn register_func(&mut self, func: TaskFn) -> FuncID {
        let id = self.funcs.len() as FuncID;
        self.funcs.push(func);
        id
    }

    /// Appends a payload to the node-data arena and returns its index.
    ///
    /// A payload may be shared by several nodes, e.g. a producer that
    /// stores the dynamic count a successor reads at node-start time.
    pub fn add_node_data(&mut self, data: NodeData) -> u32 {
        let idx = self.node_datas.len() as u32;
        self.node_datas.push(data);
        idx
    }

    /// Appends a node to the sorted list and returns its index.
    ///
    /// `fixed_count == 0` selects the dynamic count from the payload
    /// header at node-start time. Nodes must be appended in topological
    /// order: for any edge `u -> v`, `u` is appended before `v`.
    pub fn add_node(
        &mut self,
        func_id: FuncID,
        data_idx: u32,
        fixed_count: u32,
        threads_per_invocation: u32,
    ) -> NodeID {
        let idx = self.nodes.len() as NodeID;
        self.nodes.push(Node::new(
            func_id,
            data_idx,
            fixed_count,
            threads_per_invocation,
        ));
        idx
    }

    /// Validates the grid shape and produces a launchable graph.
    ///
    /// ## Errors
    /// Returns [`BuildError`] for a degenerate grid, a node whose
    /// invocation width does not divide the warp width (or is not a
    /// multiple of it), or a node referencing an unregistered function
    /// or out-of-range payload.
    pub fn build(
        self,
        state: Arc<StateManager>,
        alloc: Arc<HostAllocator>,
        config: GridConfig,
    ) -> Result<TaskGraph, BuildError> {
        if config.num_blocks == 0 {
            return Err(BuildError::EmptyGrid);
        }

        let threads = config.threads_per_block;
        if threads == 0 || threads % WARP_WIDTH != 0 {
            return Err(BuildError::BlockWidth {
                threads_per_block: threads,
            });
        }

        for (idx, node) in self.nodes.iter().enumerate() {
            let tpi = node.num_threads_per_invocation;
            let divides_warp = tpi != 0 && WARP_WIDTH % tpi == 0;
            let spans_warps = tpi != 0 && tpi % WARP_WIDTH == 0 && tpi <= threads;
            if !(divides_warp || spans_warps) {
                return Err(BuildError::InvocationWidth {
                    node: idx as u32,
                    threads_per_invocation: tpi,
                    threads_per_block: threads,
                });
            }

            if node.func_id as usize >= self.funcs.len() {
                return Err(BuildError::UnknownFunc {
                    node: idx as u32,
                    func_id: node.func_id,
                });
            }

            if node.data_idx as usize >= self.node_datas.len() {
                return Err(BuildError::UnknownData {
                    node: idx as u32,
                    data_idx: node.data_idx,
                });
            }
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_blocks as usize)
            .thread_name(|i| format!("gridsim-block-{i}"))
            .build()?;

        let tmp = TmpAllocator::new(&alloc, TMP_ARENA_BYTES).unwrap_or_else(|e| {
            log::error!("scratch arena reservation failed: {e}");
            panic!("scratch arena reservation failed");
        });

        let num_nodes = self.nodes.len() as u32;
        Ok(TaskGraph {
            sorted_nodes: self.nodes,
            node_datas: self.node_datas,
            funcs: self.funcs,
            cur_node_idx: AtomicU32::new(num_nodes),
            init_barrier: Barrier::new(config.num_blocks as usize),
            config,
            state,
            tracing: Arc::new(DeviceTracing::new()),
            tmp,
            print: HostPrint::new(),
            pool,
            alloc,
        })
    }
}
