//! Grid configuration and the packed constant layout.
//!
//! The constant layout mirrors how the host carves one contiguous buffer
//! into the core's resident regions. Offsets are computed by bumping a
//! cursor and aligning each region to the requirement of the next; the
//! result must be bit-reproducible between host allocation and device
//! interpretation, so the computation is pure arithmetic over fixed
//! sizes and alignments.

use std::mem::{align_of, size_of};

use crate::engine::alloc::{HostAllocator, TmpAllocator};
use crate::engine::state::StateManager;
use crate::engine::types::round_up;
use crate::tracing::device::DeviceTracing;
use crate::tracing::print::HostPrint;

use super::graph::TaskGraph;

/// Grid dimensions and world count for one megakernel launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridConfig {
    /// Total number of blocks in the grid.
    pub num_blocks: u32,

    /// Lanes per block; must be a positive multiple of the warp width.
    pub threads_per_block: u32,

    /// Blocks resident per streaming multiprocessor on the target.
    pub blocks_per_sm: u32,

    /// Number of simulated worlds.
    pub num_worlds: u32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            num_blocks: 4,
            threads_per_block: 256,
            blocks_per_sm: 1,
            num_worlds: 1,
        }
    }
}

/// Packed offset table of the core's resident regions.
///
/// All offsets are relative to the base of one contiguous allocation of
/// `total_bytes` (the second element of [`compute_constants`]'s result).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecLayout {
    /// Task graph region (always offset 0).
    pub task_graph: u64,

    /// State manager region.
    pub state_manager: u64,

    /// Per-world user data region.
    pub world_data: u64,

    /// Host allocator region.
    pub host_allocator: u64,

    /// Host print channel region.
    pub host_print: u64,

    /// Scratch arena region.
    pub tmp_allocator: u64,

    /// Device tracing ring region.
    pub device_tracing: u64,

    /// Bytes of user data per world.
    pub num_world_data_bytes: u32,

    /// Number of simulated worlds.
    pub num_worlds: u32,
}

/// Computes the packed constant layout for `num_worlds` worlds carrying
/// `num_world_data_bytes` of user data each.
///
/// Returns the offset table and the total byte requirement.
pub fn compute_constants(
    num_worlds: u32,
    num_world_data_bytes: u32,
    world_data_alignment: u64,
) -> (ExecLayout, u64) {
    let mut total_bytes = size_of::<TaskGraph>() as u64;

    let state_manager = round_up(total_bytes, align_of::<StateManager>() as u64);
    total_bytes = state_manager + size_of::<StateManager>() as u64;

    let world_data = round_up(total_bytes, world_data_alignment);
    total_bytes = world_data + num_world_data_bytes as u64 * num_worlds as u64;

    let host_allocator = round_up(total_bytes, align_of::<HostAllocator>() as u64);
    total_bytes = host_allocator + size_of::<HostAllocator>() as u64;

    let host_print = round_up(total_bytes, align_of::<HostPrint>() as u64);
    total_bytes = host_print + size_of::<HostPrint>() as u64;

    let tmp_allocator = round_up(total_bytes, align_of::<TmpAllocator>() as u64);
    total_bytes = tmp_allocator + size_of::<TmpAllocator>() as u64;

    let device_tracing = round_up(total_bytes, align_of::<DeviceTracing>() as u64);
    total_bytes = device_tracing + size_of::<DeviceTracing>() as u64;

    (
        ExecLayout {
            task_graph: 0,
            state_manager,
            world_data,
            host_allocator,
            host_print,
            tmp_allocator,
            device_tracing,
            num_world_data_bytes,
            num_worlds,
        },
        total_bytes,
    )
}
