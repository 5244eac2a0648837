//! Value indexes for [`IndexedComponent`] types.
//!
//! A [`ValueIndex<T>`] maps every distinct indexed value to the entities
//! currently holding it. The store keeps one per indexed type and updates it
//! synchronously on add, update, remove, clone and delete, so
//! `index.get(v)` always equals the set of entities whose component maps to `v`.

use std::any::Any;
use std::collections::HashMap;

use crate::component::IndexedComponent;
use crate::entity::EntityId;

/// Entities under one value, with each entity's slot tracked for O(1)
/// membership and swap-removal.
#[derive(Debug, Default)]
struct Bucket {
    ids: Vec<EntityId>,
    slots: HashMap<EntityId, usize>,
}

impl Bucket {
    fn insert(&mut self, entity: EntityId) {
        if self.slots.contains_key(&entity) {
            return;
        }
        self.slots.insert(entity, self.ids.len());
        self.ids.push(entity);
    }

    fn remove(&mut self, entity: EntityId) {
        let Some(slot) = self.slots.remove(&entity) else {
            return;
        };
        self.ids.swap_remove(slot);
        if let Some(moved) = self.ids.get(slot) {
            self.slots.insert(*moved, slot);
        }
    }
}

/// Map from indexed value to the entities holding it.
#[derive(Debug)]
pub struct ValueIndex<T: IndexedComponent> {
    map: HashMap<T::Value, Bucket>,
}

impl<T: IndexedComponent> ValueIndex<T> {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Entities whose component is indexed under `value`. Insertion order
    /// holds until the first removal under that value.
    pub fn get(&self, value: &T::Value) -> &[EntityId] {
        self.map
            .get(value)
            .map(|bucket| bucket.ids.as_slice())
            .unwrap_or(&[])
    }

    pub fn contains(&self, value: &T::Value, entity: EntityId) -> bool {
        self.map
            .get(value)
            .is_some_and(|bucket| bucket.slots.contains_key(&entity))
    }

    /// Every distinct value currently indexed.
    pub fn values(&self) -> impl Iterator<Item = &T::Value> {
        self.map.keys()
    }

    /// Number of distinct values.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub(crate) fn insert(&mut self, entity: EntityId, component: &T) {
        self.map
            .entry(component.index_value())
            .or_default()
            .insert(entity);
    }

    pub(crate) fn remove(&mut self, entity: EntityId, component: &T) {
        let value = component.index_value();
        if let Some(bucket) = self.map.get_mut(&value) {
            bucket.remove(entity);
            if bucket.ids.is_empty() {
                self.map.remove(&value);
            }
        }
    }
}

impl<T: IndexedComponent> Default for ValueIndex<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Erased access
// ---------------------------------------------------------------------------

/// Type-erased index, driven by the store with heap values seen as `&dyn Any`.
pub(crate) trait ErasedIndex: Send + Sync {
    fn insert(&mut self, entity: EntityId, component: &dyn Any);
    fn remove(&mut self, entity: EntityId, component: &dyn Any);
    fn as_any(&self) -> &dyn Any;
}

impl<T: IndexedComponent> ErasedIndex for ValueIndex<T> {
    fn insert(&mut self, entity: EntityId, component: &dyn Any) {
        if let Some(component) = component.downcast_ref::<T>() {
            ValueIndex::insert(self, entity, component);
        }
    }

    fn remove(&mut self, entity: EntityId, component: &dyn Any) {
        if let Some(component) = component.downcast_ref::<T>() {
            ValueIndex::remove(self, entity, component);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
