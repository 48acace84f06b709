//! # Task-graph megakernel scheduler
//!
//! A persistent, cooperatively-scheduled work distributor that drives a
//! pre-sorted DAG of compute nodes across a fixed grid of blocks and
//! lanes in a single long-running launch.
//!
//! Control flow: the host assembles the sorted node list through
//! [`builder::TaskGraphBuilder`] and launches through
//! [`graph::TaskGraph::launch`]. Each block repeatedly asks the scheduler
//! for work, which resolves invocation offsets into archetype row ranges
//! managed by the state manager.

pub mod node;
pub mod graph;
pub mod builder;
pub mod megakernel;
pub mod consts;
