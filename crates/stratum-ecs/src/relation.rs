//! Relation storage.
//!
//! A [`Relation`] type lets one entity own several records of the same type,
//! distinguished by [`Relation::relation_key`]. Records live in a per-store
//! [`RelationTable`] keyed by owner, contiguous per owner, plus a reverse
//! key -> owners index. The owner's signature carries the relation's
//! component bit while it has at least one record, so queries can filter on
//! relation presence like on any component.

use std::any::Any;
use std::collections::HashMap;

use crate::component::{ComponentTypeId, Relation};
use crate::entity::EntityId;

/// All records of one relation type in one store.
#[derive(Debug)]
pub struct RelationTable<R: Relation> {
    type_id: ComponentTypeId,
    records: HashMap<EntityId, Vec<R>>,
    owners_by_key: HashMap<R::Key, Vec<EntityId>>,
}

impl<R: Relation> RelationTable<R> {
    pub fn new(type_id: ComponentTypeId) -> Self {
        Self {
            type_id,
            records: HashMap::new(),
            owners_by_key: HashMap::new(),
        }
    }

    pub fn component_type(&self) -> ComponentTypeId {
        self.type_id
    }

    /// The records owned by `owner`.
    pub fn relations(&self, owner: EntityId) -> &[R] {
        self.records.get(&owner).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The record of `owner` with the given key.
    pub fn get(&self, owner: EntityId, key: &R::Key) -> Option<&R> {
        self.relations(owner)
            .iter()
            .find(|record| record.relation_key() == *key)
    }

    /// Owners holding a record with `key`.
    pub fn owners(&self, key: &R::Key) -> &[EntityId] {
        self.owners_by_key
            .get(key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of entities owning at least one record.
    pub fn owner_count(&self) -> usize {
        self.records.len()
    }

    /// Insert or replace the record with the same key. Returns `true` when a
    /// new record was inserted.
    pub(crate) fn add(&mut self, owner: EntityId, record: R) -> bool {
        let key = record.relation_key();
        let records = self.records.entry(owner).or_default();
        if let Some(existing) = records.iter_mut().find(|r| r.relation_key() == key) {
            *existing = record;
            return false;
        }
        records.push(record);
        self.owners_by_key.entry(key).or_default().push(owner);
        true
    }

    /// Remove the record with exactly this key. Returns `None` when there was
    /// none, otherwise the number of records the owner has left.
    pub(crate) fn remove(&mut self, owner: EntityId, key: &R::Key) -> Option<usize> {
        let records = self.records.get_mut(&owner)?;
        let pos = records.iter().position(|r| r.relation_key() == *key)?;
        records.remove(pos);
        let remaining = records.len();
        if remaining == 0 {
            self.records.remove(&owner);
        }
        self.unlink_owner(key, owner);
        Some(remaining)
    }

    fn unlink_owner(&mut self, key: &R::Key, owner: EntityId) {
        if let Some(owners) = self.owners_by_key.get_mut(key) {
            if let Some(pos) = owners.iter().position(|o| *o == owner) {
                owners.remove(pos);
            }
            if owners.is_empty() {
                self.owners_by_key.remove(key);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Erased access
// ---------------------------------------------------------------------------

/// Type-erased relation table, used where only the [`ComponentTypeId`] is known.
pub(crate) trait ErasedRelations: Send + Sync {
    /// Drop every record of `owner`. Returns the number removed.
    fn remove_all(&mut self, owner: EntityId) -> usize;
    /// Clone every record of `from` onto `to`. Returns the number copied.
    fn copy_all(&mut self, from: EntityId, to: EntityId) -> usize;
    fn count(&self, owner: EntityId) -> usize;
    /// Records of `owner` as a JSON array.
    fn write_json(&self, owner: EntityId) -> Result<serde_json::Value, serde_json::Error>;
    /// Deserialize one record and add it. Returns `true` when inserted.
    fn read_json(
        &mut self,
        owner: EntityId,
        value: &serde_json::Value,
    ) -> Result<bool, serde_json::Error>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<R: Relation + Clone> ErasedRelations for RelationTable<R> {
    fn remove_all(&mut self, owner: EntityId) -> usize {
        let Some(records) = self.records.remove(&owner) else {
            return 0;
        };
        for record in &records {
            self.unlink_owner(&record.relation_key(), owner);
        }
        records.len()
    }

    fn copy_all(&mut self, from: EntityId, to: EntityId) -> usize {
        let copies: Vec<R> = self.relations(from).to_vec();
        let count = copies.len();
        for record in copies {
            self.add(to, record);
        }
        count
    }

    fn count(&self, owner: EntityId) -> usize {
        self.relations(owner).len()
    }

    fn write_json(&self, owner: EntityId) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self.relations(owner))
    }

    fn read_json(
        &mut self,
        owner: EntityId,
        value: &serde_json::Value,
    ) -> Result<bool, serde_json::Error> {
        let record = R::deserialize(value)?;
        Ok(self.add(owner, record))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
