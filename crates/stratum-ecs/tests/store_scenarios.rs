//! End-to-end scenarios against the public store API.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use stratum_ecs::prelude::*;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
struct Position {
    x: f32,
    y: f32,
    z: f32,
}
impl Component for Position {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Name(String);
impl Component for Name {}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
struct Faction(u8);
impl Component for Faction {}
impl IndexedComponent for Faction {
    type Value = u8;
    fn index_value(&self) -> u8 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
struct ChildOf {
    parent: u32,
}
impl Component for ChildOf {}
impl Relation for ChildOf {
    type Key = u32;
    fn relation_key(&self) -> u32 {
        self.parent
    }
}

struct Selected;
impl Tag for Selected {}

fn registry() -> Arc<TypeRegistry> {
    let mut registry = TypeRegistry::new();
    registry.register_component::<Position>("position");
    registry.register_cloneable_component::<Name>("name");
    registry.register_indexed_component::<Faction>("faction");
    registry.register_relation::<ChildOf>("child_of");
    registry.register_tag::<Selected>("Selected");
    Arc::new(registry)
}

fn store() -> EntityStore {
    EntityStore::new(registry())
}

#[test]
fn disabled_entities_need_opt_in() {
    let mut store = store();
    let registry = store.registry().clone();
    let e = store
        .create_entity_with_components(
            ComponentBundle::new().with(&registry, Position { x: 1.0, y: 1.0, z: 1.0 }),
        )
        .unwrap()
        .id();
    store.add_tag::<Disabled>(e).unwrap();

    let opted_in = store
        .query::<(&Position,)>()
        .with_disabled()
        .build()
        .unwrap();
    assert_eq!(opted_in.entities(&store).unwrap(), vec![e]);

    let mut plain = store.query::<(&Position,)>().build().unwrap();
    assert!(plain.entities(&store).unwrap().is_empty());

    store.remove_tag::<Disabled>(e).unwrap();
    plain.refresh(&store).unwrap();
    assert_eq!(plain.entities(&store).unwrap(), vec![e]);
}

#[test]
fn capacity_shrinks_after_mass_delete() {
    let mut store = store();
    let ids: Vec<EntityId> = (0..10_000)
        .map(|i| {
            let id = store.create_entity().unwrap().id();
            store
                .add_component(id, Position { x: i as f32, y: 0.0, z: 0.0 })
                .unwrap();
            id
        })
        .collect();
    // root archetype at the floor, the position archetype grown to 2^14
    assert_eq!(store.capacity_sum_archetypes(), 512 + 16_384);

    for id in ids {
        store.delete_entity(id).unwrap();
    }
    assert_eq!(store.count(), 0);
    // shrinking stops one halving above the 512 floor
    assert_eq!(store.capacity_sum_archetypes(), 1536);
}

#[test]
fn relation_owners_follow_add_and_remove() {
    let mut store = store();
    let a = store.create_entity().unwrap().id();
    let b = store.create_entity().unwrap().id();

    store.add_relation(a, ChildOf { parent: b.raw() }).unwrap();
    assert_eq!(store.relation_owners::<ChildOf>(&b.raw()), &[a]);
    assert_eq!(store.relations::<ChildOf>(a).unwrap(), &[ChildOf { parent: b.raw() }]);

    assert!(store.remove_relation::<ChildOf>(a, &b.raw()).unwrap());
    assert!(store.relation_owners::<ChildOf>(&b.raw()).is_empty());
    assert!(!store.has_component::<ChildOf>(a));
}

#[test]
fn relation_cannot_go_through_component_api() {
    let mut store = store();
    let a = store.create_entity().unwrap().id();
    let err = store.add_component(a, ChildOf { parent: 9 }).unwrap_err();
    assert!(matches!(err, StoreError::InvalidOperation(_)));
}

#[test]
fn value_index_tracks_every_change() {
    let mut store = store();
    let a = store.create_entity().unwrap().id();
    let b = store.create_entity().unwrap().id();
    store.add_component(a, Faction(1)).unwrap();
    store.add_component(b, Faction(1)).unwrap();
    store.add_component(b, Faction(2)).unwrap();

    let index = store.value_index::<Faction>().unwrap();
    assert_eq!(index.get(&1), &[a]);
    assert_eq!(index.get(&2), &[b]);

    store.delete_entity(a).unwrap();
    store.remove_component::<Faction>(b).unwrap();
    assert!(store.value_index::<Faction>().unwrap().is_empty());
}

#[test]
fn has_value_conditions_are_unioned() {
    let mut store = store();
    let ids: Vec<EntityId> = (0..6u8)
        .map(|i| {
            let id = store.create_entity().unwrap().id();
            store.add_component(id, Faction(i % 3)).unwrap();
            id
        })
        .collect();

    let query = store
        .query::<(&Faction,)>()
        .has_value::<Faction>(0)
        .has_value::<Faction>(2)
        .build()
        .unwrap();
    let mut found = query.entities(&store).unwrap();
    found.sort();
    assert_eq!(found, vec![ids[0], ids[2], ids[3], ids[5]]);
}

#[test]
fn clone_copies_components_and_tags() {
    let mut store = store();
    let src = store.create_entity().unwrap();
    store
        .add_component(src.id(), Position { x: 3.0, y: 4.0, z: 5.0 })
        .unwrap();
    store.add_component(src.id(), Name("scout".into())).unwrap();
    store.add_tag::<Selected>(src.id()).unwrap();

    let copy = store.clone_entity(src).unwrap();
    assert_ne!(copy.id(), src.id());
    assert_eq!(
        store.get_component::<Name>(copy.id()),
        Some(&Name("scout".into()))
    );
    assert!(store.has_tag::<Selected>(copy.id()));
    assert_eq!(
        store.signature_of(copy.id()).unwrap(),
        store.signature_of(src.id()).unwrap()
    );
}

#[test]
fn out_of_range_id_reports_bounds() {
    let store = store();
    let err = store.get_by_id(EntityId::new(128)).unwrap_err();
    assert_eq!(err.to_string(), "id: 128. expect in [0, current max id: 127]");
    assert_eq!(store.get_by_id(EntityId::new(5)).unwrap(), None);
}

#[test]
fn entity_from_other_store_is_rejected() {
    let mut first = store();
    let mut second = store();
    let e = first.create_entity().unwrap();
    second.create_entity().unwrap();
    let err = second.clone_entity(e).unwrap_err();
    assert!(err.to_string().contains("entity is owned by a different store"));
}

#[test]
fn pid_lookup_misses_gracefully() {
    let config = StoreConfig {
        pid_mode: PidMode::RandomPids,
        pid_seed: 42,
        ..StoreConfig::default()
    };
    let mut store = EntityStore::with_config(registry(), config);
    let e = store.create_entity().unwrap().id();
    let pid = store.pid_of(e).unwrap();
    assert!(pid > 0);
    assert_eq!(store.by_pid(pid), Some(e));

    store.delete_entity(e).unwrap();
    assert_eq!(store.by_pid(pid), None);
    assert_eq!(store.by_pid(-1), None);
}

#[test]
fn delete_commits_before_handler_error_surfaces() {
    let mut store = store();
    let e = store.create_entity().unwrap().id();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    store.on_entity_deleted(move |store, event| {
        sink.lock().unwrap().push(store.is_alive(event.entity));
        Err("handler refused".into())
    });

    let err = store.delete_entity(e).unwrap_err();
    assert!(matches!(err, StoreError::Handler(_)));
    // handler saw the live entity, but the delete went through anyway
    assert_eq!(*seen.lock().unwrap(), vec![true]);
    assert!(!store.is_alive(e));
    assert_eq!(store.count(), 0);
}

#[test]
fn command_buffer_plays_back_by_key() {
    let mut store = store();
    let e = store.create_entity().unwrap().id();
    let mut commands = CommandBuffer::new();
    commands.add_component(e, "position", serde_json::json!({ "x": 1.0, "y": 2.0, "z": 3.0 }));
    commands.add_tag(e, "Selected");
    commands.add_component(e, "missing", serde_json::json!(null));

    let report = commands.playback(&mut store);
    assert_eq!(report.applied, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(
        store.get_component::<Position>(e),
        Some(&Position { x: 1.0, y: 2.0, z: 3.0 })
    );
    assert!(store.has_tag::<Selected>(e));
}
