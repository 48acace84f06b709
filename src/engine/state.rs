//! # State manager
//!
//! Central registry of the ECS core: component descriptors, archetype
//! tables, the shared query-data arena, and the entity store.
//!
//! ## Lifecycle
//! Registration (`register_component`, `register_archetype`) happens
//! host-side before the megakernel launches and is externally serialized
//! (`&mut self`). Everything else — query compilation, row allocation,
//! entity placement, temporary clears — runs concurrently from kernel
//! workers through `&self`.
//!
//! ## Failure semantics
//! Registration conflicts and unregistered ids are programmer errors and
//! abort with a message. Query compilation never fails on semantic
//! grounds: a query matching zero archetypes is valid.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::engine::alloc::HostAllocator;
use crate::engine::archetype::ArchetypeStore;
use crate::engine::entity::{Entity, EntityLocation, EntityStore, WorldId};
use crate::engine::error::CapacityError;
use crate::engine::query::{QueryMatches, QueryRef};
use crate::engine::types::{
    ArchetypeID, ComponentID, TypeInfo, COMPONENT_ENTITY, COMPONENT_WORLD_ID,
    MAX_ARCHETYPES, MAX_ARCHETYPE_COMPONENTS, MAX_COMPONENTS, MAX_QUERY_SLOTS,
    QUERY_UNCOMPILED, USER_COMPONENT_OFFSET,
};

/// Registry and owner of all archetype state for one simulation.
pub struct StateManager {
    components: Vec<Option<TypeInfo>>,
    archetypes: Vec<Option<ArchetypeStore>>,
    num_archetypes: u32,
    archetype_components: Vec<ComponentID>,
    query_data: Box<[AtomicU32]>,
    query_cursor: Mutex<u32>,
    entities: EntityStore,
    alloc: Arc<HostAllocator>,
    num_worlds: u32,
}

impl StateManager {
    /// Creates a manager for `num_worlds` worlds over `alloc`.
    ///
    /// The implicit `Entity` and `WorldId` components are registered at
    /// construction as ids 0 and 1.
    pub fn new(num_worlds: u32, alloc: Arc<HostAllocator>) -> Self {
        let mut mgr = Self {
            components: (0..MAX_COMPONENTS).map(|_| None).collect(),
            archetypes: (0..MAX_ARCHETYPES).map(|_| None).collect(),
            num_archetypes: 0,
            archetype_components: Vec::new(),
            query_data: (0..MAX_QUERY_SLOTS)
                .map(|_| AtomicU32::new(0))
                .collect::<Vec<_>>()
                .into_boxed_slice(),
            query_cursor: Mutex::new(0),
            entities: EntityStore::new(),
            alloc,
            num_worlds,
        };

        let entity_info = TypeInfo::of::<Entity>();
        mgr.register_component(COMPONENT_ENTITY, entity_info.alignment, entity_info.num_bytes);
        let world_info = TypeInfo::of::<WorldId>();
        mgr.register_component(COMPONENT_WORLD_ID, world_info.alignment, world_info.num_bytes);

        mgr
    }

    /// Registers component `id` with the given alignment and size.
    ///
    /// Registration is write-once append: a descriptor is never mutated
    /// after it is emplaced.
    ///
    /// ## Aborts
    /// Out-of-range or duplicate ids are programmer errors.
    pub fn register_component(&mut self, id: ComponentID, alignment: u32, num_bytes: u32) {
        assert!(
            (id as usize) < MAX_COMPONENTS,
            "component id {id} out of range"
        );
        assert!(
            self.components[id as usize].is_none(),
            "component id {id} registered twice"
        );
        assert!(alignment.is_power_of_two(), "component {id} alignment must be a power of two");

        log::debug!("register_component id={id} align={alignment} bytes={num_bytes}");
        self.components[id as usize] = Some(TypeInfo {
            alignment,
            num_bytes,
        });
    }

    /// Registers archetype `id` over the given user component list.
    ///
    /// ## Behavior
    /// - Appends the user component ids to the shared component arena,
    ///   recording the offset.
    /// - Assembles the column list as `[Entity, WorldId, user...]` and
    ///   numbers user columns starting at [`USER_COMPONENT_OFFSET`].
    /// - Reserves every column buffer for the worst-case row count with
    ///   an initial commit of one row per world.
    ///
    /// ## Aborts
    /// Duplicate archetype ids, unregistered component ids, too many
    /// components, and refused reservations all abort.
    pub fn register_archetype(&mut self, id: ArchetypeID, user_components: &[ComponentID]) {
        assert!(
            (id as usize) < MAX_ARCHETYPES,
            "archetype id {id} out of range"
        );
        assert!(
            self.archetypes[id as usize].is_none(),
            "archetype id {id} registered twice"
        );
        assert!(
            user_components.len() <= MAX_ARCHETYPE_COMPONENTS - USER_COMPONENT_OFFSET as usize,
            "archetype {id} declares too many components"
        );

        let offset = self.archetype_components.len() as u32;

        let mut type_infos = Vec::with_capacity(user_components.len() + 2);
        type_infos.push(self.component_info(COMPONENT_ENTITY));
        type_infos.push(self.component_info(COMPONENT_WORLD_ID));

        let mut lookup_pairs = Vec::with_capacity(user_components.len());
        for (i, &component) in user_components.iter().enumerate() {
            type_infos.push(self.component_info(component));
            lookup_pairs.push((component, i as u32 + USER_COMPONENT_OFFSET));
            self.archetype_components.push(component);
        }

        let store = ArchetypeStore::new(
            &self.alloc,
            offset,
            user_components.len() as u32,
            &type_infos,
            &lookup_pairs,
            self.num_worlds,
        )
        .unwrap_or_else(|e| {
            log::error!("archetype {id} column reservation failed: {e}");
            panic!("archetype {id} column reservation failed");
        });

        log::debug!(
            "register_archetype id={id} user_components={} arena_offset={offset}",
            user_components.len()
        );
        self.archetypes[id as usize] = Some(store);
        self.num_archetypes = self.num_archetypes.max(id + 1);
    }

    fn component_info(&self, id: ComponentID) -> TypeInfo {
        match self.components.get(id as usize) {
            Some(Some(info)) => *info,
            _ => panic!("component id {id} is not registered"),
        }
    }

    /// Compiles `query_ref` over the requested component list.
    ///
    /// ## Behavior
    /// Idempotent under a single mutex. The fast path returns immediately
    /// when another worker already published a compile. Otherwise every
    /// archetype is scanned in ascending id order; the implicit `Entity`
    /// and `WorldId` components are treated as always present. Each match
    /// appends `[archetype_id, col...]` to the arena with column order
    /// following the caller's list.
    ///
    /// The sentinel establishes publication order: `offset` and
    /// `num_components` are stored relaxed, then
    /// `num_matching_archetypes` is stored release, so readers that see
    /// any non-sentinel value see all three fields consistently.
    ///
    /// ## Aborts
    /// Referencing an unregistered component id or overflowing the
    /// query-data arena aborts.
    pub fn make_query(&self, components: &[ComponentID], query_ref: &QueryRef) {
        let mut cursor = self.query_cursor.lock().unwrap();

        if query_ref.num_matching_archetypes.load(Ordering::Acquire) != QUERY_UNCOMPILED {
            return;
        }

        for &component in components {
            assert!(
                matches!(self.components.get(component as usize), Some(Some(_))),
                "query references unregistered component {component}"
            );
        }

        let query_offset = *cursor;
        let mut write = query_offset as usize;
        let mut num_matching = 0u32;

        for archetype_idx in 0..self.num_archetypes {
            let Some(archetype) = &self.archetypes[archetype_idx as usize] else {
                continue;
            };

            let has_components = components.iter().all(|&component| {
                component == COMPONENT_ENTITY
                    || component == COMPONENT_WORLD_ID
                    || archetype.has_component(component)
            });
            if !has_components {
                continue;
            }

            assert!(
                write + 1 + components.len() <= MAX_QUERY_SLOTS,
                "query-data arena overflow"
            );

            num_matching += 1;
            self.query_data[write].store(archetype_idx, Ordering::Relaxed);
            write += 1;

            for &component in components {
                let col = if component == COMPONENT_ENTITY {
                    0
                } else if component == COMPONENT_WORLD_ID {
                    1
                } else {
                    // Registered and present: checked above.
                    archetype.column_index(component).unwrap()
                };
                self.query_data[write].store(col, Ordering::Relaxed);
                write += 1;
            }
        }

        query_ref.offset.store(query_offset, Ordering::Relaxed);
        query_ref
            .num_components
            .store(components.len() as u32, Ordering::Relaxed);
        query_ref
            .num_matching_archetypes
            .store(num_matching, Ordering::Release);

        *cursor = write as u32;
    }

    /// Iterates a compiled query's matches.
    ///
    /// ## Panics
    /// Panics if `query_ref` has not been compiled yet.
    pub fn query_matches<'a>(&'a self, query_ref: &QueryRef) -> QueryMatches<'a> {
        let num_matching = query_ref.num_matching_archetypes.load(Ordering::Acquire);
        assert!(num_matching != QUERY_UNCOMPILED, "query is not compiled");

        QueryMatches {
            data: &self.query_data,
            num_components: query_ref.num_components.load(Ordering::Relaxed) as usize,
            remaining: num_matching,
            cursor: query_ref.offset.load(Ordering::Relaxed) as usize,
        }
    }

    /// Resets the row cursor of an archetype's table to zero.
    ///
    /// Column memory stays committed; row slots are reused on the next
    /// allocation cycle.
    pub fn clear_temporaries(&self, archetype_id: ArchetypeID) {
        self.archetype(archetype_id).tbl.clear();
    }

    /// Returns the registered archetype `id`.
    ///
    /// ## Panics
    /// Panics if `id` was never registered.
    #[inline]
    pub fn archetype(&self, id: ArchetypeID) -> &ArchetypeStore {
        self.archetypes
            .get(id as usize)
            .and_then(|a| a.as_ref())
            .unwrap_or_else(|| panic!("archetype id {id} is not registered"))
    }

    /// Returns the type info registered for `id`, if any.
    #[inline]
    pub fn component_type(&self, id: ComponentID) -> Option<TypeInfo> {
        self.components.get(id as usize).copied().flatten()
    }

    /// The user component ids of `id`, in registration order.
    pub fn archetype_components(&self, id: ArchetypeID) -> &[ComponentID] {
        let archetype = self.archetype(id);
        let offset = archetype.component_offset() as usize;
        let len = archetype.num_user_components() as usize;
        &self.archetype_components[offset..offset + len]
    }

    /// Returns the entity store.
    #[inline]
    pub fn entities(&self) -> &EntityStore {
        &self.entities
    }

    /// Number of worlds this manager was sized for.
    #[inline]
    pub fn num_worlds(&self) -> u32 {
        self.num_worlds
    }

    /// Allocates a row in `archetype_id` for a fresh entity of `world`.
    ///
    /// Writes the implicit `Entity` and `WorldId` columns and records the
    /// entity's location.
    ///
    /// ## Errors
    /// Returns [`CapacityError`] when the entity store is exhausted.
    pub fn spawn_row(
        &self,
        archetype_id: ArchetypeID,
        world: WorldId,
    ) -> Result<Entity, CapacityError> {
        let archetype = self.archetype(archetype_id);
        let row = archetype.tbl.allocate_rows(1);
        let entity = self.entities.allocate()?;

        let _placed = self.entities.set_location(
            entity,
            EntityLocation {
                archetype: archetype_id,
                row,
            },
        );
        debug_assert!(_placed.is_ok());

        // SAFETY: the row was just claimed by this caller; columns 0 and 1
        // are the implicit Entity and WorldId columns of every table.
        unsafe {
            archetype.tbl.column(0).write::<Entity>(row, entity);
            archetype.tbl.column(1).write::<WorldId>(row, world);
        }

        Ok(entity)
    }

    /// Frees the entity slot for `entity`. The table row is not
    /// compacted; rows are recycled through [`StateManager::clear_temporaries`].
    pub fn despawn(&self, entity: Entity) -> bool {
        self.entities.free(entity)
    }
}
