//! Task-graph nodes, node payloads, and the kernel dispatch surface.
//!
//! A node is a schedulable unit of work: a function id into the graph's
//! dispatch table, a payload index into the node-data arena, and a count
//! of parallel invocations. Dispatch indirects through the function table
//! built at graph compile time; payloads are tagged values behind a
//! common header carrying the dynamic invocation count.

use std::any::Any;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::engine::alloc::TmpAllocator;
use crate::engine::state::StateManager;
use crate::tracing::device::DeviceTracing;
use crate::tracing::print::HostPrint;

use super::graph::NodeID;

/// Kernel entry point: one call per invocation offset.
///
/// The function receives the execution context, its node's payload, and
/// the invocation offset in `[0, total_num_invocations)`.
pub type TaskFn = fn(&TaskContext<'_>, &NodeData, u32);

/// Scheduling record for one DAG node.
///
/// The three counters are the node's live state machine: a node is
/// dormant until a retirer (or init) stores `total_num_invocations`,
/// draining while `cur_offset` is below it, finishing once every slot is
/// claimed, and retired when `num_remaining` reaches zero. Retirement is
/// one-way.
pub struct Node {
    /// Index into the graph's function table.
    pub func_id: u32,

    /// Index into the graph's node-data arena.
    pub data_idx: u32,

    /// Static invocation count; 0 selects the dynamic count from the
    /// node's payload header at node-start time.
    pub fixed_count: u32,

    /// Number of lanes cooperating on one invocation.
    pub num_threads_per_invocation: u32,

    /// Next unclaimed invocation offset. Relaxed; causality is carried by
    /// `num_remaining`.
    pub cur_offset: AtomicU32,

    /// Invocations not yet accounted finished. AcqRel on subtraction so
    /// the retirer observes every prior claim.
    pub num_remaining: AtomicU32,

    /// Total invocations for the current run; valid once published via
    /// `cur_node_idx`.
    pub total_num_invocations: AtomicU32,
}

impl Node {
    pub(crate) fn new(
        func_id: u32,
        data_idx: u32,
        fixed_count: u32,
        num_threads_per_invocation: u32,
    ) -> Self {
        Self {
            func_id,
            data_idx,
            fixed_count,
            num_threads_per_invocation,
            cur_offset: AtomicU32::new(0),
            num_remaining: AtomicU32::new(0),
            total_num_invocations: AtomicU32::new(0),
        }
    }
}

/// Payload of one node: the dynamic-count header plus a type-erased user
/// value.
///
/// The header is read exactly once per run, at node-start time, and must
/// stay stable while its node is active. Earlier nodes may store a count
/// here (through [`TaskContext::node_data`]) to size a successor
/// dynamically; a dynamic count of zero makes the retirer skip the node
/// entirely.
pub struct NodeData {
    num_dynamic_invocations: AtomicU32,
    user: Box<dyn Any + Send + Sync>,
}

impl NodeData {
    /// Creates a payload with the given initial dynamic count.
    pub fn new<T: Any + Send + Sync>(num_dynamic_invocations: u32, user: T) -> Self {
        Self {
            num_dynamic_invocations: AtomicU32::new(num_dynamic_invocations),
            user: Box::new(user),
        }
    }

    /// Current dynamic invocation count.
    #[inline]
    pub fn dynamic_count(&self) -> u32 {
        self.num_dynamic_invocations.load(Ordering::Relaxed)
    }

    /// Stores a new dynamic invocation count.
    ///
    /// Must happen before the owning node starts; completion accounting
    /// of the writing node orders the store for the retirer.
    #[inline]
    pub fn set_dynamic_count(&self, count: u32) {
        self.num_dynamic_invocations.store(count, Ordering::Relaxed);
    }

    /// Downcasts the user payload.
    #[inline]
    pub fn user<T: Any>(&self) -> Option<&T> {
        self.user.downcast_ref::<T>()
    }
}

/// Execution context handed to every kernel invocation.
///
/// Explicit rather than ambient: the context carries every collaborator a
/// kernel may touch, so kernels stay plain functions.
pub struct TaskContext<'g> {
    pub(crate) state: &'g StateManager,
    pub(crate) tmp: &'g TmpAllocator,
    pub(crate) print: &'g HostPrint,
    pub(crate) tracing: &'g DeviceTracing,
    pub(crate) node_datas: &'g [NodeData],
    pub(crate) block_idx: u32,
    pub(crate) node_idx: NodeID,
}

impl<'g> TaskContext<'g> {
    /// The shared state manager.
    #[inline]
    pub fn state(&self) -> &'g StateManager {
        self.state
    }

    /// Per-run scratch arena.
    #[inline]
    pub fn tmp(&self) -> &'g TmpAllocator {
        self.tmp
    }

    /// Host print channel.
    #[inline]
    pub fn print(&self) -> &'g HostPrint {
        self.print
    }

    /// Device tracing sink.
    #[inline]
    pub fn tracing(&self) -> &'g DeviceTracing {
        self.tracing
    }

    /// Payload of an arbitrary node, typically a successor whose dynamic
    /// count this kernel produces.
    #[inline]
    pub fn node_data(&self, data_idx: u32) -> &'g NodeData {
        &self.node_datas[data_idx as usize]
    }

    /// Index of the block executing this invocation.
    #[inline]
    pub fn block_idx(&self) -> u32 {
        self.block_idx
    }

    /// Index of the node being executed.
    #[inline]
    pub fn node_idx(&self) -> NodeID {
        self.node_idx
    }
}
