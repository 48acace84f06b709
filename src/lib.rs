//! # gridsim
//!
//! Massively-parallel Entity-Component-System execution core for many-world
//! simulation, driven by a cooperative task-graph megakernel.
//!
//! ## Design Goals
//! - Columnar, reservation-backed archetype storage
//! - Pre-compiled multi-component queries with lock-free reads
//! - A persistent, cooperatively-scheduled megakernel that drains a sorted
//!   DAG of compute nodes across a fixed grid of blocks and lanes
//! - Concurrency contracts expressed through explicit atomic orderings
//!
//! The grid abstraction mirrors wide-SIMD hardware: a *lane* is one thread,
//! 32 lanes form a *warp*, a configurable number of warps form a *block*,
//! and the set of all blocks forms the *grid*. On the host, each block is
//! executed by one persistent worker thread in lane-lockstep.

#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![allow(clippy::module_inception)]
#![deny(dead_code)]

pub mod engine;
pub mod taskgraph;
pub mod tracing;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

// Core ECS types

pub use engine::state::StateManager;

pub use engine::entity::{
    Entity,
    EntityLocation,
    EntityStore,
    WorldId,
};

pub use engine::alloc::{
    HostAllocator,
    TmpAllocator,
};

pub use engine::query::{
    QueryMatch,
    QueryMatches,
    QueryRef,
};

pub use engine::error::{
    AllocError,
    BuildError,
    CapacityError,
    StaleEntityError,
};

pub use engine::types::{
    ArchetypeID,
    ComponentID,
    FuncID,
    RowID,
    TypeInfo,
};

// Task-graph scheduler

pub use taskgraph::builder::TaskGraphBuilder;
pub use taskgraph::consts::{compute_constants, ExecLayout, GridConfig};
pub use taskgraph::graph::{BlockState, LaneState, NodeID, TaskGraph, WorkerState};
pub use taskgraph::megakernel::LaunchStats;
pub use taskgraph::node::{Node, NodeData, TaskContext, TaskFn};

pub use tracing::device::{DeviceTracing, TraceEvent, TraceRecord};

// ─────────────────────────────────────────────────────────────────────────────
// Prelude (Optional but recommended)
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used core types.
///
/// Import with:
/// ```rust
/// use gridsim::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Entity,
        GridConfig,
        HostAllocator,
        NodeData,
        QueryRef,
        StateManager,
        TaskContext,
        TaskGraph,
        TaskGraphBuilder,
        WorldId,
    };
}
