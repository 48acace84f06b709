use gridsim::engine::types::MAX_ENTITIES;
use gridsim::{Entity, EntityLocation, EntityStore};

#[test]
fn allocate_resolve_roundtrip() {
    let store = EntityStore::new();

    let entity = store.allocate().unwrap();
    assert_eq!(entity.gen, 0);

    let location = EntityLocation {
        archetype: 3,
        row: 41,
    };
    store.set_location(entity, location).unwrap();

    assert_eq!(store.resolve(entity).unwrap(), location);
    assert_eq!(store.live_count(), 1);
}

#[test]
fn freed_handle_goes_stale_and_slot_is_reused() {
    let store = EntityStore::new();

    let first = store.allocate().unwrap();
    store
        .set_location(first, EntityLocation { archetype: 0, row: 7 })
        .unwrap();
    assert!(store.resolve(first).is_ok());

    assert!(store.free(first));
    assert!(store.resolve(first).is_err(), "freed handle must be stale");

    // The free-list returns the slot; the new handle carries a bumped
    // generation and resolves independently of the old one.
    let second = store.allocate().unwrap();
    assert_eq!(second.idx, first.idx, "slot should be recycled");
    assert_eq!(second.gen, first.gen + 1);

    store
        .set_location(second, EntityLocation { archetype: 1, row: 9 })
        .unwrap();
    assert_eq!(
        store.resolve(second).unwrap(),
        EntityLocation { archetype: 1, row: 9 }
    );
    assert!(store.resolve(first).is_err(), "old handle stays stale");
}

#[test]
fn free_of_stale_handle_is_detected_noop() {
    let store = EntityStore::new();

    let entity = store.allocate().unwrap();
    assert!(store.free(entity));
    assert!(!store.free(entity), "double free must be rejected");

    let fabricated = Entity {
        gen: 99,
        idx: entity.idx,
    };
    assert!(!store.free(fabricated));
    assert_eq!(store.live_count(), 0);
}

#[test]
fn set_location_rejects_stale_handles() {
    let store = EntityStore::new();

    let entity = store.allocate().unwrap();
    store.free(entity);

    let result = store.set_location(entity, EntityLocation { archetype: 0, row: 0 });
    assert!(result.is_err());
}

#[test]
fn generation_is_monotonic_across_reuse() {
    let store = EntityStore::new();

    let mut last_gen = None;
    let mut slot = None;
    for _ in 0..10 {
        let entity = store.allocate().unwrap();
        if let Some(idx) = slot {
            assert_eq!(entity.idx, idx, "LIFO free-list should recycle one slot");
        }
        slot = Some(entity.idx);

        if let Some(prev) = last_gen {
            assert!(entity.gen > prev, "generation must not decrease");
        }
        last_gen = Some(entity.gen);

        assert!(store.free(entity));
    }
}

#[test]
fn allocation_order_is_ascending_from_fresh_store() {
    let store = EntityStore::new();

    let a = store.allocate().unwrap();
    let b = store.allocate().unwrap();
    let c = store.allocate().unwrap();
    assert_eq!((a.idx, b.idx, c.idx), (0, 1, 2));
}

#[test]
fn exhaustion_is_reported() {
    let store = EntityStore::new();

    let mut handles = Vec::with_capacity(MAX_ENTITIES);
    for _ in 0..MAX_ENTITIES {
        handles.push(store.allocate().unwrap());
    }

    let err = store.allocate().unwrap_err();
    assert_eq!(err.capacity, MAX_ENTITIES as u64);

    // Freeing one slot makes allocation possible again.
    assert!(store.free(handles.pop().unwrap()));
    assert!(store.allocate().is_ok());
}

#[test]
fn concurrent_allocate_free_keeps_generations_monotonic() {
    use std::sync::Arc;

    let store = Arc::new(EntityStore::new());

    let mut workers = Vec::new();
    for _ in 0..8 {
        let store = Arc::clone(&store);
        workers.push(std::thread::spawn(move || {
            for _ in 0..2000 {
                let entity = store.allocate().unwrap();
                assert!(store.free(entity));
                assert!(store.resolve(entity).is_err());
            }
        }));
    }
    for w in workers {
        w.join().unwrap();
    }

    assert_eq!(store.live_count(), 0);
}
