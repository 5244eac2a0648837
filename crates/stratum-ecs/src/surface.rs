//! The narrow surface used by external collaborators: component values as
//! JSON by type id or external key, and archetype enumeration.

use serde_json::Value;

use crate::archetype::ArchetypeId;
use crate::component::{ComponentTypeId, SchemaTypeKind};
use crate::entity::EntityId;
use crate::event::ComponentChangeAction;
use crate::graph::Edge;
use crate::signature::Signature;
use crate::store::EntityStore;
use crate::StoreError;

/// Summary of one archetype.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArchetypeInfo {
    pub id: ArchetypeId,
    pub signature: Signature,
    /// Live entities.
    pub count: usize,
    /// Rows allocated per heap, padding excluded.
    pub capacity: usize,
}

impl EntityStore {
    fn component_or_unknown(
        &self,
        type_id: ComponentTypeId,
    ) -> Result<(SchemaTypeKind, String), StoreError> {
        self.registry
            .try_metadata(type_id)
            .map(|info| (info.kind, info.key.clone()))
            .ok_or_else(|| self.unknown_type(&format!("{:?}", type_id)))
    }

    /// Deserialize `value` into component `type_id` of `id`, adding the
    /// component when absent. Relation types add (or replace) one record.
    /// Returns `true` when the signature changed.
    ///
    /// On a deserialization error the entity is left as it was.
    pub fn read_component_json(
        &mut self,
        id: EntityId,
        type_id: ComponentTypeId,
        value: &Value,
    ) -> Result<bool, StoreError> {
        let (kind, key) = self.component_or_unknown(type_id)?;
        let loc = self.location(id)?;
        let deserialize = |e: serde_json::Error| StoreError::Deserialize {
            key: key.clone(),
            details: e.to_string(),
        };

        if kind == SchemaTypeKind::Relation {
            let old_signature = self.signature_at(loc);
            let Some(Some(table)) = self.relations.get_mut(type_id.index()) else {
                return Err(StoreError::InvalidOperation(format!("no relation table for '{key}'")));
            };
            let inserted = table.read_json(id, value).map_err(deserialize)?;
            self.after_relation_added(id, loc, type_id, inserted)?;
            return Ok(!old_signature.has_component(type_id));
        }

        let old_signature = self.signature_at(loc);
        if old_signature.has_component(type_id) {
            self.index_value(id, loc, type_id, false);
            let result = match self.graph.get_mut(loc.archetype_id).heap_mut(type_id) {
                Some(heap) => heap.read_json(loc.row, value).map_err(deserialize),
                None => Ok(()),
            };
            self.index_value(id, loc, type_id, true);
            result?;
            self.raise_component_changed(
                id,
                type_id,
                ComponentChangeAction::Updated,
                old_signature,
                old_signature,
            )?;
            return Ok(false);
        }

        let new_loc = self.follow_edge(id, loc, Edge::AddComponent(type_id));
        let result = match self.graph.get_mut(new_loc.archetype_id).heap_mut(type_id) {
            Some(heap) => heap.read_json(new_loc.row, value).map_err(deserialize),
            None => Ok(()),
        };
        if let Err(e) = result {
            self.follow_edge(id, new_loc, Edge::RemoveComponent(type_id));
            return Err(e);
        }
        self.index_value(id, new_loc, type_id, true);
        let new_signature = self.signature_at(new_loc);
        self.raise_component_changed(
            id,
            type_id,
            ComponentChangeAction::Added,
            old_signature,
            new_signature,
        )?;
        Ok(true)
    }

    /// [`read_component_json`](Self::read_component_json) by external key.
    pub fn read_component_json_by_key(
        &mut self,
        id: EntityId,
        key: &str,
        value: &Value,
    ) -> Result<bool, StoreError> {
        let type_id = self
            .registry
            .component_by_key(key)
            .ok_or_else(|| self.unknown_type(key))?;
        self.read_component_json(id, type_id, value)
    }

    /// Serialize component `type_id` of `id`. `None` when the entity does not
    /// hold it. Relation types serialize as an array of records.
    pub fn write_component_json(
        &self,
        id: EntityId,
        type_id: ComponentTypeId,
    ) -> Result<Option<Value>, StoreError> {
        let (kind, key) = self.component_or_unknown(type_id)?;
        let loc = self.location(id)?;
        if !self.signature_at(loc).has_component(type_id) {
            return Ok(None);
        }
        let serialize = |e: serde_json::Error| StoreError::Serialize {
            key: key.clone(),
            details: e.to_string(),
        };
        let value = if kind == SchemaTypeKind::Relation {
            match self.relations.get(type_id.index()) {
                Some(Some(table)) => table.write_json(id).map_err(serialize)?,
                _ => Value::Array(Vec::new()),
            }
        } else {
            match self.graph.get(loc.archetype_id).heap(type_id) {
                Some(heap) => heap.write_json(loc.row).map_err(serialize)?,
                None => return Ok(None),
            }
        };
        Ok(Some(value))
    }

    /// All components of `id` as `key -> value`, in type id order.
    pub fn write_entity_json(
        &self,
        id: EntityId,
    ) -> Result<serde_json::Map<String, Value>, StoreError> {
        let signature = self.signature_of(id)?;
        let mut map = serde_json::Map::new();
        for type_id in signature.component_ids() {
            if let Some(value) = self.write_component_json(id, type_id)? {
                map.insert(self.registry.metadata(type_id).key.clone(), value);
            }
        }
        Ok(map)
    }

    /// Every archetype of the store, including empty ones.
    pub fn archetypes(&self) -> impl Iterator<Item = ArchetypeInfo> + '_ {
        self.graph.iter().map(|archetype| ArchetypeInfo {
            id: archetype.id(),
            signature: *archetype.signature(),
            count: archetype.count(),
            capacity: archetype.capacity(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Component, IndexedComponent, Relation};
    use crate::registry::TypeRegistry;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
    struct Pos {
        x: f32,
        y: f32,
    }
    impl Component for Pos {}

    #[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
    struct Team(u32);
    impl Component for Team {}
    impl IndexedComponent for Team {
        type Value = u32;
        fn index_value(&self) -> u32 {
            self.0
        }
    }

    #[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
    struct Link {
        target: u32,
    }
    impl Component for Link {}
    impl Relation for Link {
        type Key = u32;
        fn relation_key(&self) -> u32 {
            self.target
        }
    }

    fn setup_store() -> EntityStore {
        let mut registry = TypeRegistry::new();
        registry.register_component::<Pos>("pos");
        registry.register_indexed_component::<Team>("team");
        registry.register_relation::<Link>("link");
        EntityStore::new(Arc::new(registry))
    }

    #[test]
    fn read_adds_then_updates() {
        let mut store = setup_store();
        let pos = store.registry().component_id::<Pos>().unwrap();
        let e = store.create_entity().unwrap().id();
        assert!(store.read_component_json(e, pos, &json!({"x": 1.0, "y": 2.0})).unwrap());
        assert!(!store.read_component_json(e, pos, &json!({"x": 3.0, "y": 2.0})).unwrap());
        assert_eq!(store.get_component::<Pos>(e), Some(&Pos { x: 3.0, y: 2.0 }));
        assert_eq!(
            store.write_component_json(e, pos).unwrap(),
            Some(json!({"x": 3.0, "y": 2.0}))
        );
    }

    #[test]
    fn failed_read_leaves_entity_unchanged() {
        let mut store = setup_store();
        let pos = store.registry().component_id::<Pos>().unwrap();
        let e = store.create_entity().unwrap().id();
        let err = store.read_component_json(e, pos, &json!("nope")).unwrap_err();
        assert!(matches!(err, StoreError::Deserialize { ref key, .. } if key == "pos"));
        assert!(store.signature_of(e).unwrap().is_empty());

        store.add_component(e, Pos { x: 1.0, y: 1.0 }).unwrap();
        assert!(store.read_component_json(e, pos, &json!([1])).is_err());
        assert_eq!(store.get_component::<Pos>(e), Some(&Pos { x: 1.0, y: 1.0 }));
    }

    #[test]
    fn read_by_key_keeps_index_in_step() {
        let mut store = setup_store();
        let e = store.create_entity().unwrap().id();
        store.read_component_json_by_key(e, "team", &json!(4)).unwrap();
        store.read_component_json_by_key(e, "team", &json!(5)).unwrap();
        let index = store.value_index::<Team>().unwrap();
        assert!(index.get(&4).is_empty());
        assert_eq!(index.get(&5), &[e]);
        assert!(matches!(
            store.read_component_json_by_key(e, "missing", &json!(1)),
            Err(StoreError::UnknownType { .. })
        ));
    }

    #[test]
    fn relations_through_json() {
        let mut store = setup_store();
        let link = store.registry().component_id::<Link>().unwrap();
        let e = store.create_entity().unwrap().id();
        assert!(store.read_component_json(e, link, &json!({"target": 2})).unwrap());
        assert!(!store.read_component_json(e, link, &json!({"target": 3})).unwrap());
        assert_eq!(
            store.write_component_json(e, link).unwrap(),
            Some(json!([{"target": 2}, {"target": 3}]))
        );
    }

    #[test]
    fn write_entity_json_lists_components() {
        let mut store = setup_store();
        let e = store.create_entity().unwrap().id();
        store.add_component(e, Pos::default()).unwrap();
        store.add_component(e, Team(1)).unwrap();
        let map = store.write_entity_json(e).unwrap();
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["pos", "team"]);
        assert_eq!(map["team"], json!(1));
    }

    #[test]
    fn archetype_enumeration() {
        let mut store = setup_store();
        let e = store.create_entity().unwrap().id();
        store.add_component(e, Pos::default()).unwrap();
        let infos: Vec<ArchetypeInfo> = store.archetypes().collect();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].count, 0);
        assert_eq!(infos[1].count, 1);
        let capacity: usize = infos.iter().map(|i| i.capacity).sum();
        assert_eq!(capacity, store.capacity_sum_archetypes());
    }
}
