//! Compiled query references and match iteration.
//!
//! A query is compiled once into the state manager's shared query-data
//! arena and then read lock-free for the rest of the run. This module
//! provides the two halves of that contract:
//!
//! * [`QueryRef`] — the caller-owned compiled-query handle. It starts in
//!   the *uncompiled* state and is filled in exactly once by
//!   `StateManager::make_query`; the sentinel field doubles as the
//!   publication flag.
//! * [`QueryMatches`] — an iterator over the per-archetype records the
//!   compile emitted.
//!
//! ## Publication protocol
//! The compiler stores `offset` and `num_components` with relaxed
//! ordering and then stores `num_matching_archetypes` with release
//! ordering. Readers acquire-load `num_matching_archetypes`; any reader
//! that observes a non-sentinel value therefore observes all three fields
//! and every arena slot the compile wrote. Once compiled, a query's data
//! is immutable.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::engine::types::{ArchetypeID, QUERY_UNCOMPILED};

/// Caller-owned handle to a compiled query.
///
/// `QueryRef` is const-constructible so callers can keep one per query
/// site in a `static` and let whichever worker arrives first pay the
/// compile. All observers see identical
/// `(offset, num_matching_archetypes, num_components)`.
pub struct QueryRef {
    pub(crate) offset: AtomicU32,
    pub(crate) num_matching_archetypes: AtomicU32,
    pub(crate) num_components: AtomicU32,
}

impl Default for QueryRef {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryRef {
    /// Creates an uncompiled query reference.
    pub const fn new() -> Self {
        Self {
            offset: AtomicU32::new(0),
            num_matching_archetypes: AtomicU32::new(QUERY_UNCOMPILED),
            num_components: AtomicU32::new(0),
        }
    }

    /// Returns `true` once a compile has been published.
    #[inline]
    pub fn is_compiled(&self) -> bool {
        self.num_matching_archetypes.load(Ordering::Acquire) != QUERY_UNCOMPILED
    }

    /// Offset of this query's records in the shared query-data arena.
    #[inline]
    pub fn offset(&self) -> u32 {
        self.offset.load(Ordering::Relaxed)
    }

    /// Number of archetypes the compile matched.
    ///
    /// Returns the sentinel value while uncompiled.
    #[inline]
    pub fn num_matching_archetypes(&self) -> u32 {
        self.num_matching_archetypes.load(Ordering::Acquire)
    }

    /// Number of components the query requested.
    #[inline]
    pub fn num_components(&self) -> u32 {
        self.num_components.load(Ordering::Relaxed)
    }
}

/// One compiled match: an archetype id plus the pre-resolved column index
/// for every requested component, in the caller's request order.
pub struct QueryMatch<'a> {
    archetype_id: ArchetypeID,
    columns: &'a [AtomicU32],
}

impl QueryMatch<'_> {
    /// Id of the matching archetype.
    #[inline]
    pub fn archetype_id(&self) -> ArchetypeID {
        self.archetype_id
    }

    /// Column index resolved for the `i`-th requested component.
    #[inline]
    pub fn column(&self, i: u32) -> u32 {
        self.columns[i as usize].load(Ordering::Relaxed)
    }

    /// Number of per-component column indices in this record.
    #[inline]
    pub fn num_columns(&self) -> u32 {
        self.columns.len() as u32
    }
}

/// Iterator over a compiled query's matches, in ascending archetype-id
/// order (the order the compile scanned).
pub struct QueryMatches<'a> {
    pub(crate) data: &'a [AtomicU32],
    pub(crate) num_components: usize,
    pub(crate) remaining: u32,
    pub(crate) cursor: usize,
}

impl<'a> Iterator for QueryMatches<'a> {
    type Item = QueryMatch<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let archetype_id = self.data[self.cursor].load(Ordering::Relaxed);
        let columns = &self.data[self.cursor + 1..self.cursor + 1 + self.num_components];
        self.cursor += 1 + self.num_components;

        Some(QueryMatch {
            archetype_id,
            columns,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining as usize, Some(self.remaining as usize))
    }
}

impl ExactSizeIterator for QueryMatches<'_> {}
