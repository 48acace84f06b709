//! # Archetype tables and columnar storage
//!
//! This module defines the columnar storage layer of the core:
//!
//! * [`Column`] — one component's values across all rows of a table,
//!   backed by a reserved virtual region,
//! * [`Table`] — the per-archetype row cursor plus its columns,
//! * [`ArchetypeStore`] — the registration record tying a column list to
//!   its component-id lookup.
//!
//! ## Layout
//! Every archetype table carries the two implicit columns first —
//! `Entity` at column 0 and `WorldId` at column 1 — followed by the
//! user-declared components in registration order. Each column is
//! reserved for `MAX_ROWS_PER_TABLE` rows up front with an initial commit
//! covering one row per world, so row writes never move memory.
//!
//! ## Concurrency model
//!
//! * The row cursor advances through a relaxed `fetch_add`; causality for
//!   row contents is established by the scheduler's node retirement
//!   ordering, not by the cursor.
//! * Two workers may write disjoint rows of the same column concurrently;
//!   they must never write the same row. The scheduler guarantees at most
//!   one node is draining at a time, so kernels only coordinate within a
//!   node.
//!
//! ## Unsafe code
//!
//! This module contains `unsafe` code for typed views over raw column
//! bytes. Callers of the row accessors must uphold the disjoint-row
//! contract above and match the column's registered element type.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::engine::alloc::HostAllocator;
use crate::engine::error::AllocError;
use crate::engine::types::{ComponentID, IntegerMap, RowID, TypeInfo, MAX_ROWS_PER_TABLE};

/// A typed, reserved virtual-memory region holding one component's values
/// across all rows of an archetype table.
///
/// The base address is stable for the lifetime of the owning
/// [`HostAllocator`]; committed pages grow on demand behind it.
pub struct Column {
    base: NonNull<u8>,
    type_info: TypeInfo,
}

// SAFETY: rows are only accessed through the disjoint-row contract; the
// base pointer and type info are immutable after construction.
unsafe impl Send for Column {}
unsafe impl Sync for Column {}

impl Column {
    fn reserve(
        alloc: &HostAllocator,
        type_info: TypeInfo,
        num_worlds: u32,
    ) -> Result<Self, AllocError> {
        let reserve_bytes = type_info.num_bytes as u64 * MAX_ROWS_PER_TABLE as u64;
        let reserve_bytes = alloc.round_up_reservation(reserve_bytes);

        let init_bytes = type_info.num_bytes as u64 * num_worlds as u64;
        let init_bytes = alloc.round_up_alloc(init_bytes);

        let base = alloc.reserve(reserve_bytes, init_bytes)?;
        Ok(Self { base, type_info })
    }

    /// Returns the element size and alignment of this column.
    #[inline]
    pub fn type_info(&self) -> TypeInfo {
        self.type_info
    }

    /// Returns the stable base pointer of the column region.
    #[inline]
    pub fn base_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// Returns a raw pointer to the start of `row`.
    ///
    /// ## Safety
    /// `row` must be below [`MAX_ROWS_PER_TABLE`].
    #[inline]
    pub unsafe fn row_ptr(&self, row: RowID) -> *mut u8 {
        debug_assert!(row < MAX_ROWS_PER_TABLE);
        // SAFETY: row is inside the reservation per the caller contract.
        unsafe {
            self.base
                .as_ptr()
                .add(row as usize * self.type_info.num_bytes as usize)
        }
    }

    /// Reads the value stored at `row`.
    ///
    /// ## Safety
    /// `T` must match the column's registered component type, `row` must
    /// hold an initialized value, and no writer may target `row`
    /// concurrently.
    #[inline]
    pub unsafe fn read<T: Copy>(&self, row: RowID) -> T {
        debug_assert_eq!(std::mem::size_of::<T>(), self.type_info.num_bytes as usize);
        // SAFETY: upheld by the caller per above.
        unsafe { (self.row_ptr(row) as *const T).read() }
    }

    /// Writes `value` into `row`.
    ///
    /// ## Safety
    /// `T` must match the column's registered component type and no other
    /// worker may read or write `row` concurrently.
    #[inline]
    pub unsafe fn write<T>(&self, row: RowID, value: T) {
        debug_assert_eq!(std::mem::size_of::<T>(), self.type_info.num_bytes as usize);
        // SAFETY: upheld by the caller per above.
        unsafe { (self.row_ptr(row) as *mut T).write(value) }
    }

    /// Returns a typed view over the first `num_rows` rows.
    ///
    /// ## Safety
    /// `T` must match the column's registered component type, all
    /// `num_rows` rows must be initialized, and no writer may target them
    /// for the lifetime of the slice.
    #[inline]
    pub unsafe fn rows<T>(&self, num_rows: u32) -> &[T] {
        debug_assert_eq!(std::mem::size_of::<T>(), self.type_info.num_bytes as usize);
        debug_assert!(num_rows <= MAX_ROWS_PER_TABLE);
        // SAFETY: upheld by the caller per above.
        unsafe { std::slice::from_raw_parts(self.base.as_ptr() as *const T, num_rows as usize) }
    }
}

/// Columnar table of one archetype: the atomic row cursor plus one
/// reserved column per component.
pub struct Table {
    num_rows: AtomicU32,
    columns: Vec<Column>,
}

impl Table {
    fn new(
        alloc: &HostAllocator,
        type_infos: &[TypeInfo],
        num_worlds: u32,
    ) -> Result<Self, AllocError> {
        let mut columns = Vec::with_capacity(type_infos.len());
        for info in type_infos {
            columns.push(Column::reserve(alloc, *info, num_worlds)?);
        }
        Ok(Self {
            num_rows: AtomicU32::new(0),
            columns,
        })
    }

    /// Claims `count` fresh rows and returns the first row index.
    ///
    /// ## Behavior
    /// The cursor advances through a relaxed `fetch_add`; two concurrent
    /// claims receive disjoint ranges.
    ///
    /// ## Aborts
    /// Crossing [`MAX_ROWS_PER_TABLE`] is a fatal invariant violation.
    pub fn allocate_rows(&self, count: u32) -> RowID {
        let first = self.num_rows.fetch_add(count, Ordering::Relaxed);
        if first as u64 + count as u64 > MAX_ROWS_PER_TABLE as u64 {
            log::error!(
                "archetype table oversubscribed: {} rows requested at row {}, capacity {}",
                count,
                first,
                MAX_ROWS_PER_TABLE
            );
            panic!("archetype table oversubscribed");
        }
        first
    }

    /// Returns the current row count.
    #[inline]
    pub fn num_rows(&self) -> u32 {
        self.num_rows.load(Ordering::Relaxed).min(MAX_ROWS_PER_TABLE)
    }

    /// Resets the row cursor to zero. Column memory stays committed; row
    /// slots are reused on the next allocation cycle.
    #[inline]
    pub fn clear(&self) {
        self.num_rows.store(0, Ordering::Relaxed);
    }

    /// Returns the column at `index`.
    ///
    /// ## Panics
    /// Panics if `index` is out of range for this table.
    #[inline]
    pub fn column(&self, index: u32) -> &Column {
        &self.columns[index as usize]
    }

    /// Returns the number of columns, implicit columns included.
    #[inline]
    pub fn num_columns(&self) -> u32 {
        self.columns.len() as u32
    }
}

/// Registration record of one archetype: its slice of the shared
/// component arena, its table, and its column lookup.
pub struct ArchetypeStore {
    component_offset: u32,
    num_user_components: u32,
    /// The archetype's columnar table.
    pub tbl: Table,
    column_lookup: IntegerMap,
}

impl ArchetypeStore {
    /// Builds the store and reserves every column buffer.
    pub(crate) fn new(
        alloc: &HostAllocator,
        component_offset: u32,
        num_user_components: u32,
        type_infos: &[TypeInfo],
        lookup_pairs: &[(ComponentID, u32)],
        num_worlds: u32,
    ) -> Result<Self, AllocError> {
        Ok(Self {
            component_offset,
            num_user_components,
            tbl: Table::new(alloc, type_infos, num_worlds)?,
            column_lookup: IntegerMap::new(lookup_pairs),
        })
    }

    /// Offset of this archetype's user component list in the shared
    /// component arena.
    #[inline]
    pub fn component_offset(&self) -> u32 {
        self.component_offset
    }

    /// Number of user-declared components (implicit columns excluded).
    #[inline]
    pub fn num_user_components(&self) -> u32 {
        self.num_user_components
    }

    /// Resolves a user component id to its column index.
    #[inline]
    pub fn column_index(&self, component: ComponentID) -> Option<u32> {
        self.column_lookup.get(component)
    }

    /// Returns `true` if this archetype declares `component`.
    #[inline]
    pub fn has_component(&self, component: ComponentID) -> bool {
        self.column_lookup.contains(component)
    }
}
