//! Reserve-commit memory for archetype columns and transient scratch.
//!
//! ## Purpose
//! Archetype columns are sized for the worst case (`MAX_ROWS_PER_TABLE`
//! rows) but only a small prefix is ever touched early in a run. The
//! [`HostAllocator`] hands out *reservations*: stable base addresses over
//! the full worst-case range with a small initial commit. The backing is
//! zeroed heap pages that the operating system commits on first touch,
//! which is the portable equivalent of reserve/commit virtual memory.
//!
//! ## Contract
//! - `round_up_reservation` / `round_up_alloc` align sizes to the
//!   reservation and commit granules.
//! - `reserve` returns a base address that never moves for the lifetime
//!   of the allocator; the first `init_commit_bytes` are committed
//!   immediately, the rest on demand.
//! - Reservation failure is fatal upward. The core never recovers.
//!
//! The allocator owns every reservation it hands out and releases them
//! when dropped, so column pointers must not outlive it. `StateManager`
//! keeps the allocator alive through an `Arc` for exactly this reason.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::engine::error::AllocError;
use crate::engine::types::round_up;

/// Granule every reservation size is rounded up to (64 KiB).
pub const RESERVATION_GRANULE: u64 = 64 * 1024;
/// Granule every commit size is rounded up to (4 KiB).
pub const ALLOC_GRANULE: u64 = 4 * 1024;

struct Reservation {
    base: usize,
    layout: Layout,
}

/// Reserve-commit allocator backing archetype column storage.
pub struct HostAllocator {
    reservations: Mutex<Vec<Reservation>>,
}

impl Default for HostAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl HostAllocator {
    /// Creates an allocator with no outstanding reservations.
    pub fn new() -> Self {
        Self {
            reservations: Mutex::new(Vec::new()),
        }
    }

    /// Rounds `bytes` up to the reservation granule.
    #[inline]
    pub fn round_up_reservation(&self, bytes: u64) -> u64 {
        round_up(bytes, RESERVATION_GRANULE)
    }

    /// Rounds `bytes` up to the commit granule.
    #[inline]
    pub fn round_up_alloc(&self, bytes: u64) -> u64 {
        round_up(bytes, ALLOC_GRANULE)
    }

    /// Reserves `reserve_bytes` of address space and commits the first
    /// `init_commit_bytes`.
    ///
    /// ## Behavior
    /// The returned base address is stable until the allocator is
    /// dropped. Pages beyond the initial commit are committed by the
    /// operating system on first touch.
    ///
    /// ## Errors
    /// Returns [`AllocError`] when the reservation is refused. Callers
    /// treat this as fatal.
    pub fn reserve(
        &self,
        reserve_bytes: u64,
        init_commit_bytes: u64,
    ) -> Result<NonNull<u8>, AllocError> {
        let reserve_bytes = self.round_up_reservation(reserve_bytes.max(1));
        let init_commit_bytes = self.round_up_alloc(init_commit_bytes).min(reserve_bytes);

        let layout = Layout::from_size_align(reserve_bytes as usize, ALLOC_GRANULE as usize)
            .map_err(|_| AllocError {
                requested_bytes: reserve_bytes,
                committed_bytes: init_commit_bytes,
            })?;

        // SAFETY: layout has non-zero, granule-rounded size.
        let raw = unsafe { alloc_zeroed(layout) };
        let base = NonNull::new(raw).ok_or(AllocError {
            requested_bytes: reserve_bytes,
            committed_bytes: init_commit_bytes,
        })?;

        if init_commit_bytes > 0 {
            // Touch the initial commit so its pages are resident before
            // the first row write.
            // SAFETY: init_commit_bytes <= reserve_bytes, freshly allocated.
            unsafe {
                std::ptr::write_bytes(base.as_ptr(), 0, init_commit_bytes as usize);
            }
        }

        self.reservations.lock().unwrap().push(Reservation {
            base: base.as_ptr() as usize,
            layout,
        });

        Ok(base)
    }

    /// Returns the number of outstanding reservations.
    pub fn reservation_count(&self) -> usize {
        self.reservations.lock().unwrap().len()
    }
}

impl Drop for HostAllocator {
    fn drop(&mut self) {
        let reservations = std::mem::take(&mut *self.reservations.lock().unwrap());
        for r in reservations {
            // SAFETY: each entry was returned by alloc_zeroed with this
            // exact layout and is released exactly once.
            unsafe { dealloc(r.base as *mut u8, r.layout) };
        }
    }
}

/// Bump arena for transient per-run scratch.
///
/// ## Purpose
/// User kernels occasionally need short-lived buffers whose lifetime is
/// one megakernel run. The arena bumps a relaxed atomic cursor over a
/// single reservation; `reset` recycles the whole region between runs.
///
/// Allocation never blocks and never frees individually.
pub struct TmpAllocator {
    base: NonNull<u8>,
    capacity: u64,
    offset: AtomicU64,
}

// SAFETY: the arena hands out disjoint ranges via the atomic cursor; the
// base pointer itself is never mutated.
unsafe impl Send for TmpAllocator {}
unsafe impl Sync for TmpAllocator {}

impl TmpAllocator {
    /// Creates an arena over a fresh reservation of `capacity` bytes.
    pub fn new(alloc: &HostAllocator, capacity: u64) -> Result<Self, AllocError> {
        let capacity = alloc.round_up_reservation(capacity);
        let base = alloc.reserve(capacity, 0)?;
        Ok(Self {
            base,
            capacity,
            offset: AtomicU64::new(0),
        })
    }

    /// Bumps out `bytes` of scratch, aligned to the commit granule.
    ///
    /// Returns `None` once the arena is exhausted for this run.
    pub fn alloc(&self, bytes: u64) -> Option<NonNull<u8>> {
        let bytes = round_up(bytes.max(1), ALLOC_GRANULE);
        let start = self.offset.fetch_add(bytes, Ordering::Relaxed);
        if start + bytes > self.capacity {
            return None;
        }
        // SAFETY: start + bytes <= capacity, so the offset stays inside
        // the reservation.
        Some(unsafe { NonNull::new_unchecked(self.base.as_ptr().add(start as usize)) })
    }

    /// Recycles the whole arena. Outstanding scratch must be dead.
    pub fn reset(&self) {
        self.offset.store(0, Ordering::Relaxed);
    }

    /// Bytes handed out since the last reset (granule-rounded).
    pub fn used(&self) -> u64 {
        self.offset.load(Ordering::Relaxed).min(self.capacity)
    }
}
