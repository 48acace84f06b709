//! Error types for entity allocation, memory reservation, and graph build.
//!
//! This module declares focused, composable error types used across the
//! execution core. Each error carries enough context to make failures
//! actionable while remaining small and cheap to pass around.
//!
//! ## Goals
//! * **Specificity:** Each error type models a single failure mode (slot
//!   exhaustion, stale entity handles, refused reservations, invalid graph
//!   shapes).
//! * **Ergonomics:** All errors implement [`std::error::Error`] and
//!   [`fmt::Display`].
//! * **Actionability:** Structured fields (requested vs. available
//!   capacity, offending widths) make logs useful without reproducing the
//!   issue.
//!
//! ## Policy
//! The core does not retry and does not surface recoverable errors beyond
//! entity exhaustion and stale-handle resolution. Registration conflicts,
//! row oversubscription, and reservation exhaustion are programmer errors
//! or fatal resource failures: they are logged out-of-band and abort the
//! run at the call site.

use std::fmt;

/// Returned when the entity store cannot satisfy an allocation because
/// every slot is live.
///
/// ### Fields
/// * `entities_needed` — Total number of entities the operation attempted
///   to accommodate.
/// * `capacity` — The fixed slot capacity that prevented the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityError {
    /// Total entities the operation attempted to allocate.
    pub entities_needed: u64,

    /// Fixed capacity limiting the operation.
    pub capacity: u64,
}

impl fmt::Display for CapacityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "entity limit reached ({} needed; capacity {})",
            self.entities_needed, self.capacity
        )
    }
}

impl std::error::Error for CapacityError {}

/// Returned when an entity handle is no longer valid, typically because it
/// was freed and its generation no longer matches the slot.
///
/// Use this to prevent use-after-free style logic errors at the API
/// boundary. Stale resolution is the one non-fatal failure the core
/// reports through a result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleEntityError;

impl fmt::Display for StaleEntityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("stale or dead entity reference")
    }
}

impl std::error::Error for StaleEntityError {}

/// Returned when the host allocator refuses a virtual reservation.
///
/// Reservation exhaustion is fatal for the run: callers log the error and
/// abort rather than attempting recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocError {
    /// Reservation size that was requested, in bytes (granule-rounded).
    pub requested_bytes: u64,

    /// Initial commit size that was requested, in bytes (granule-rounded).
    pub committed_bytes: u64,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "memory reservation refused ({} bytes reserved, {} committed)",
            self.requested_bytes, self.committed_bytes
        )
    }
}

impl std::error::Error for AllocError {}

/// Errors detected while assembling a task graph.
///
/// ## Context
/// `TaskGraphBuilder::build` validates the grid shape and every node's
/// invocation width before the megakernel can launch. These are
/// construction-time programmer errors; none of them can occur once a
/// graph is running.
#[derive(Debug)]
pub enum BuildError {
    /// A node's `threads_per_invocation` does not divide the warp width,
    /// is not a multiple of it, or exceeds the block width.
    InvocationWidth {
        /// Index of the offending node in the sorted list.
        node: u32,

        /// Declared threads per invocation.
        threads_per_invocation: u32,

        /// Threads per block the grid was configured with.
        threads_per_block: u32,
    },

    /// The configured block width is zero or not a multiple of the warp
    /// width.
    BlockWidth {
        /// Configured threads per block.
        threads_per_block: u32,
    },

    /// The configured grid has no blocks.
    EmptyGrid,

    /// A node references a function id that was never registered.
    UnknownFunc {
        /// Index of the offending node in the sorted list.
        node: u32,

        /// The unregistered function id.
        func_id: u32,
    },

    /// A node references a data index outside the node-data arena.
    UnknownData {
        /// Index of the offending node in the sorted list.
        node: u32,

        /// The out-of-range data index.
        data_idx: u32,
    },

    /// The dedicated worker pool for the grid could not be created.
    WorkerPool(rayon::ThreadPoolBuildError),
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::InvocationWidth {
                node,
                threads_per_invocation,
                threads_per_block,
            } => write!(
                f,
                "node {} has invalid invocation width {} for block width {} \
                 (must divide the warp width or be a multiple of it)",
                node, threads_per_invocation, threads_per_block
            ),

            BuildError::BlockWidth { threads_per_block } => write!(
                f,
                "block width {} is not a positive multiple of the warp width",
                threads_per_block
            ),

            BuildError::EmptyGrid => f.write_str("grid has no blocks"),

            BuildError::UnknownFunc { node, func_id } => {
                write!(f, "node {} references unregistered function {}", node, func_id)
            }

            BuildError::UnknownData { node, data_idx } => {
                write!(f, "node {} references out-of-range data index {}", node, data_idx)
            }

            BuildError::WorkerPool(e) => write!(f, "failed to build worker pool: {e}"),
        }
    }
}

impl std::error::Error for BuildError {}

impl From<rayon::ThreadPoolBuildError> for BuildError {
    fn from(e: rayon::ThreadPoolBuildError) -> Self {
        BuildError::WorkerPool(e)
    }
}
