use std::sync::Arc;

use gridsim::engine::types::{COMPONENT_ENTITY, COMPONENT_WORLD_ID, QUERY_UNCOMPILED};
use gridsim::{Entity, HostAllocator, QueryRef, StateManager, TypeInfo, WorldId};

#[derive(Clone, Copy, Debug, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Velocity {
    dx: f32,
    dy: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Health(u32);

const POSITION: u32 = 2;
const VELOCITY: u32 = 3;
const HEALTH: u32 = 4;

const ARCHETYPE_X: u32 = 0;
const ARCHETYPE_Y: u32 = 1;

fn make_state(num_worlds: u32) -> StateManager {
    let _ = env_logger::builder().is_test(true).try_init();

    let alloc = Arc::new(HostAllocator::new());
    let mut state = StateManager::new(num_worlds, alloc);

    let position = TypeInfo::of::<Position>();
    state.register_component(POSITION, position.alignment, position.num_bytes);
    let velocity = TypeInfo::of::<Velocity>();
    state.register_component(VELOCITY, velocity.alignment, velocity.num_bytes);
    let health = TypeInfo::of::<Health>();
    state.register_component(HEALTH, health.alignment, health.num_bytes);

    state.register_archetype(ARCHETYPE_X, &[POSITION, VELOCITY, HEALTH]);
    state.register_archetype(ARCHETYPE_Y, &[POSITION, HEALTH]);

    state
}

#[test]
fn query_matches_only_archetypes_with_every_component() {
    let state = make_state(1);

    let query = QueryRef::new();
    assert!(!query.is_compiled());

    state.make_query(&[POSITION, VELOCITY], &query);
    assert!(query.is_compiled());
    assert_eq!(query.num_matching_archetypes(), 1);
    assert_eq!(query.num_components(), 2);

    let mut matches = state.query_matches(&query);
    let record = matches.next().unwrap();
    assert_eq!(record.archetype_id(), ARCHETYPE_X);
    assert_eq!(record.column(0), 2, "Position column in X");
    assert_eq!(record.column(1), 3, "Velocity column in X");
    assert!(matches.next().is_none());
}

#[test]
fn match_list_is_ordered_by_ascending_archetype_id() {
    let state = make_state(1);

    let query = QueryRef::new();
    state.make_query(&[POSITION], &query);
    assert_eq!(query.num_matching_archetypes(), 2);

    let ids: Vec<u32> = state
        .query_matches(&query)
        .map(|m| m.archetype_id())
        .collect();
    assert_eq!(ids, vec![ARCHETYPE_X, ARCHETYPE_Y]);

    let cols: Vec<u32> = state.query_matches(&query).map(|m| m.column(0)).collect();
    assert_eq!(cols, vec![2, 2], "Position is the first user column in both");
}

#[test]
fn implicit_components_resolve_to_fixed_columns() {
    let state = make_state(1);

    let query = QueryRef::new();
    state.make_query(&[COMPONENT_ENTITY, COMPONENT_WORLD_ID, HEALTH], &query);
    assert_eq!(query.num_matching_archetypes(), 2);

    for record in state.query_matches(&query) {
        assert_eq!(record.column(0), 0, "Entity is always column 0");
        assert_eq!(record.column(1), 1, "WorldId is always column 1");
    }

    let health_cols: Vec<u32> = state.query_matches(&query).map(|m| m.column(2)).collect();
    assert_eq!(health_cols, vec![4, 3]);
}

#[test]
fn zero_match_query_is_valid() {
    let mut state = make_state(1);

    // Registered but not used by any archetype.
    state.register_component(9, 4, 4);

    let query = QueryRef::new();
    state.make_query(&[9], &query);
    assert!(query.is_compiled());
    assert_eq!(query.num_matching_archetypes(), 0);
    assert_eq!(state.query_matches(&query).count(), 0);
}

#[test]
fn compilation_is_idempotent_across_threads() {
    let state = Arc::new(make_state(1));
    let query = Arc::new(QueryRef::new());

    let mut workers = Vec::new();
    for _ in 0..8 {
        let state = Arc::clone(&state);
        let query = Arc::clone(&query);
        workers.push(std::thread::spawn(move || {
            state.make_query(&[POSITION, HEALTH], &query);
            (
                query.offset(),
                query.num_matching_archetypes(),
                query.num_components(),
            )
        }));
    }

    let mut observations = Vec::new();
    for w in workers {
        observations.push(w.join().unwrap());
    }

    let first = observations[0];
    assert_ne!(first.1, QUERY_UNCOMPILED);
    for o in &observations {
        assert_eq!(*o, first, "all observers must see one compile");
    }

    // A second query compiles directly after the first record set: the
    // racing compiles above appended to the arena exactly once.
    let followup = QueryRef::new();
    state.make_query(&[POSITION, HEALTH], &followup);
    let record_len = 1 + 2;
    assert_eq!(followup.offset(), first.0 + 2 * record_len);
}

#[test]
fn spawn_row_writes_implicit_columns() {
    let state = make_state(4);

    let entity = state.spawn_row(ARCHETYPE_Y, WorldId(3)).unwrap();
    let location = state.entities().resolve(entity).unwrap();
    assert_eq!(location.archetype, ARCHETYPE_Y);
    assert_eq!(location.row, 0);

    let table = &state.archetype(ARCHETYPE_Y).tbl;
    assert_eq!(table.num_rows(), 1);

    let stored_entity = unsafe { table.column(0).read::<Entity>(location.row) };
    let stored_world = unsafe { table.column(1).read::<WorldId>(location.row) };
    assert_eq!(stored_entity, entity);
    assert_eq!(stored_world, WorldId(3));

    assert!(state.despawn(entity));
    assert!(state.entities().resolve(entity).is_err());
}

#[test]
fn clear_temporaries_resets_rows_without_touching_registration() {
    let state = make_state(2);

    for i in 0..10u32 {
        let entity = state.spawn_row(ARCHETYPE_X, WorldId(i % 2)).unwrap();
        state.despawn(entity);
    }
    assert_eq!(state.archetype(ARCHETYPE_X).tbl.num_rows(), 10);

    state.clear_temporaries(ARCHETYPE_X);
    assert_eq!(state.archetype(ARCHETYPE_X).tbl.num_rows(), 0);

    // Row slots are reused on the next cycle.
    let entity = state.spawn_row(ARCHETYPE_X, WorldId(0)).unwrap();
    assert_eq!(state.entities().resolve(entity).unwrap().row, 0);
}

#[test]
fn archetype_component_lists_are_recorded_in_registration_order() {
    let state = make_state(1);

    assert_eq!(
        state.archetype_components(ARCHETYPE_X),
        &[POSITION, VELOCITY, HEALTH]
    );
    assert_eq!(state.archetype_components(ARCHETYPE_Y), &[POSITION, HEALTH]);

    let x = state.archetype(ARCHETYPE_X);
    assert_eq!(x.num_user_components(), 3);
    assert_eq!(x.column_index(VELOCITY), Some(3));
    assert_eq!(x.column_index(9), None);
}
