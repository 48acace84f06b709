//! # Entity Management
//!
//! This module defines the entity identity, lifecycle, and slot-table
//! storage used by the execution core.
//!
//! ## Purpose
//! Entities are lightweight, opaque identifiers that reference rows in
//! archetype storage. This module is responsible for:
//!
//! - Generating stable entity identifiers
//! - Tracking entity liveness via generations
//! - Mapping entities to `(archetype, row)` positions
//! - Managing slot reuse through a free-list
//!
//! ## Entity Model
//! An [`Entity`] is a structural pair of:
//!
//! - A **slot index**, identifying the slot within the fixed store
//! - A **generation**, used to detect stale handles after freeing
//!
//! A handle is *live* iff the store's slot at `idx` currently holds `gen`.
//! Freeing increments the slot generation, which invalidates every
//! previously issued handle for that slot at once.
//!
//! ## Invariants
//! - A slot's generation is monotonically non-decreasing across any
//!   interleaving of allocate/free.
//! - Any live handle resolves to exactly one `(archetype, row)` pair.
//! - The free-list and the live set partition the slot space.
//! - A slot's location fields are only observable through a successful
//!   generation check; freshly allocated slots carry no location until
//!   [`EntityStore::set_location`] records one.
//!
//! ## Concurrency
//! - The free-list is guarded by a mutex; generation checks and location
//!   reads are lock-free per-slot atomics.
//! - Double-free races are resolved by a generation compare-exchange: at
//!   most one `free` per generation succeeds.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::engine::error::{CapacityError, StaleEntityError};
use crate::engine::types::{ArchetypeID, RowID, MAX_ENTITIES};

/// Opaque, generational identifier for an entity.
///
/// `Entity` values are cheap to copy and compare, safe to pass across
/// threads, and stored verbatim as column 0 of every archetype table.
/// Equality is structural: two handles with the same slot but different
/// generations are distinct.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Entity {
    /// Generation the handle was issued under.
    pub gen: u32,

    /// Slot index within the entity store.
    pub idx: u32,
}

/// Index of the world an entity (or row) belongs to.
///
/// Stored verbatim as column 1 of every archetype table.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct WorldId(pub u32);

/// Physical storage position of an entity within archetype storage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntityLocation {
    /// Archetype containing the entity's row.
    pub archetype: ArchetypeID,

    /// Row index within the archetype table.
    pub row: RowID,
}

struct Slot {
    gen: AtomicU32,
    archetype: AtomicU32,
    row: AtomicU32,
}

/// Fixed-capacity generational slot table.
///
/// ## Design
/// - Capacity is the compile-time constant [`MAX_ENTITIES`].
/// - All slots start at generation 0 with the free-list holding the full
///   index range, handed out in ascending order.
/// - `resolve` is constant-time: one slot read guarded by a generation
///   check on both sides of the location read.
///
/// ## Failure semantics
/// Exhaustion surfaces as [`CapacityError`]; stale handles surface as
/// [`StaleEntityError`]. Freeing a stale handle is a detected no-op.
pub struct EntityStore {
    slots: Box<[Slot]>,
    free: Mutex<Vec<u32>>,
    live: AtomicU32,
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore {
    /// Creates a store with every slot free at generation 0.
    pub fn new() -> Self {
        let slots = (0..MAX_ENTITIES)
            .map(|_| Slot {
                gen: AtomicU32::new(0),
                archetype: AtomicU32::new(0),
                row: AtomicU32::new(0),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        // Reversed so pop() hands out ascending indices.
        let free = (0..MAX_ENTITIES as u32).rev().collect();

        Self {
            slots,
            free: Mutex::new(free),
            live: AtomicU32::new(0),
        }
    }

    /// Allocates a fresh entity handle.
    ///
    /// ## Behavior
    /// Pops a slot from the free-list and issues a handle carrying the
    /// slot's current generation. The slot's location is unspecified until
    /// [`EntityStore::set_location`] records one.
    ///
    /// ## Errors
    /// Returns [`CapacityError`] when no slots remain.
    pub fn allocate(&self) -> Result<Entity, CapacityError> {
        let idx = {
            let mut free = self.free.lock().unwrap();
            free.pop().ok_or(CapacityError {
                entities_needed: MAX_ENTITIES as u64 + 1,
                capacity: MAX_ENTITIES as u64,
            })?
        };

        self.live.fetch_add(1, Ordering::Relaxed);
        let gen = self.slots[idx as usize].gen.load(Ordering::Acquire);
        Ok(Entity { gen, idx })
    }

    /// Frees an entity handle, invalidating it and every copy of it.
    ///
    /// ## Behavior
    /// - Verifies liveness through a generation compare-exchange, so at
    ///   most one free per generation succeeds under races.
    /// - Increments the slot generation and returns the slot to the
    ///   free-list.
    ///
    /// ## Returns
    /// `true` if the handle was live and is now freed; `false` for a
    /// stale handle (detected no-op).
    pub fn free(&self, entity: Entity) -> bool {
        let Some(slot) = self.slots.get(entity.idx as usize) else {
            return false;
        };

        let bumped = entity.gen.wrapping_add(1);
        if slot
            .gen
            .compare_exchange(entity.gen, bumped, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }

        self.live.fetch_sub(1, Ordering::Relaxed);
        self.free.lock().unwrap().push(entity.idx);
        true
    }

    /// Resolves a handle to its stored `(archetype, row)` position.
    ///
    /// ## Behavior
    /// Constant-time lookup. The generation is checked before and after
    /// the location read so a concurrently freed slot can never leak a
    /// half-updated location.
    ///
    /// ## Errors
    /// Returns [`StaleEntityError`] when the handle's generation does not
    /// match the slot.
    pub fn resolve(&self, entity: Entity) -> Result<EntityLocation, StaleEntityError> {
        let slot = self
            .slots
            .get(entity.idx as usize)
            .ok_or(StaleEntityError)?;

        if slot.gen.load(Ordering::Acquire) != entity.gen {
            return Err(StaleEntityError);
        }

        let archetype = slot.archetype.load(Ordering::Acquire);
        let row = slot.row.load(Ordering::Acquire);

        if slot.gen.load(Ordering::Acquire) != entity.gen {
            return Err(StaleEntityError);
        }

        Ok(EntityLocation { archetype, row })
    }

    /// Records the archetype position of a live entity.
    ///
    /// ## Errors
    /// Returns [`StaleEntityError`] when the handle's generation does not
    /// match the slot. Callers must not race `set_location` with `free`
    /// for the same handle; placement happens while the handle is owned.
    pub fn set_location(
        &self,
        entity: Entity,
        location: EntityLocation,
    ) -> Result<(), StaleEntityError> {
        let slot = self
            .slots
            .get(entity.idx as usize)
            .ok_or(StaleEntityError)?;

        if slot.gen.load(Ordering::Acquire) != entity.gen {
            return Err(StaleEntityError);
        }

        slot.archetype.store(location.archetype, Ordering::Release);
        slot.row.store(location.row, Ordering::Release);
        Ok(())
    }

    /// Returns the number of live entities.
    #[inline]
    pub fn live_count(&self) -> u32 {
        self.live.load(Ordering::Relaxed)
    }
}
