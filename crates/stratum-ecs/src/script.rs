//! Side table for script objects.
//!
//! Scripts are reference-type extension objects attached to entities. They
//! never live in archetype heaps; a [`ScriptTable`] owned by the caller keeps
//! them per entity, keyed by [`ScriptTypeId`]. The table does not observe the
//! store: call [`ScriptTable::remove_entity`] when deleting an entity, or use
//! [`ScriptTable::clone_entity`] to clone an entity together with its scripts.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::component::{Script, ScriptTypeId};
use crate::entity::{Entity, EntityId};
use crate::registry::TypeRegistry;
use crate::store::EntityStore;
use crate::StoreError;

type ScriptBox = Box<dyn Any + Send + Sync>;

/// Script objects per entity, at most one per script type.
pub struct ScriptTable {
    registry: Arc<TypeRegistry>,
    scripts: HashMap<EntityId, Vec<(ScriptTypeId, ScriptBox)>>,
}

impl ScriptTable {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            scripts: HashMap::new(),
        }
    }

    fn script_type<S: Script>(&self) -> Result<ScriptTypeId, StoreError> {
        self.registry.script_id::<S>().ok_or_else(|| StoreError::UnknownType {
            name: std::any::type_name::<S>().to_owned(),
            registered: self.registry.registered_keys().join(", "),
        })
    }

    /// Attach `script` to `entity`, replacing a script of the same type.
    /// Returns the replaced script.
    pub fn add<S: Script>(&mut self, entity: EntityId, script: S) -> Result<Option<S>, StoreError> {
        let type_id = self.script_type::<S>()?;
        let slots = self.scripts.entry(entity).or_default();
        match slots.iter_mut().find(|(id, _)| *id == type_id) {
            Some((_, slot)) => {
                let old = std::mem::replace(slot, Box::new(script));
                Ok(old.downcast::<S>().ok().map(|old| *old))
            }
            None => {
                slots.push((type_id, Box::new(script)));
                Ok(None)
            }
        }
    }

    pub fn get<S: Script>(&self, entity: EntityId) -> Option<&S> {
        let type_id = self.registry.script_id::<S>()?;
        self.scripts
            .get(&entity)?
            .iter()
            .find(|(id, _)| *id == type_id)
            .and_then(|(_, script)| script.downcast_ref::<S>())
    }

    pub fn get_mut<S: Script>(&mut self, entity: EntityId) -> Option<&mut S> {
        let type_id = self.registry.script_id::<S>()?;
        self.scripts
            .get_mut(&entity)?
            .iter_mut()
            .find(|(id, _)| *id == type_id)
            .and_then(|(_, script)| script.downcast_mut::<S>())
    }

    /// Detach and return the `S` script of `entity`.
    pub fn remove<S: Script>(&mut self, entity: EntityId) -> Option<S> {
        let type_id = self.registry.script_id::<S>()?;
        let slots = self.scripts.get_mut(&entity)?;
        let pos = slots.iter().position(|(id, _)| *id == type_id)?;
        let (_, script) = slots.remove(pos);
        if slots.is_empty() {
            self.scripts.remove(&entity);
        }
        script.downcast::<S>().ok().map(|script| *script)
    }

    /// Script types attached to `entity`, in attach order.
    pub fn scripts_of(&self, entity: EntityId) -> impl Iterator<Item = ScriptTypeId> + '_ {
        self.scripts
            .get(&entity)
            .into_iter()
            .flat_map(|slots| slots.iter().map(|(id, _)| *id))
    }

    /// Drop every script of `entity`. Returns how many were dropped.
    pub fn remove_entity(&mut self, entity: EntityId) -> usize {
        self.scripts.remove(&entity).map_or(0, |slots| slots.len())
    }

    /// Check that every script of `entity` can be copied.
    fn check_copyable(&self, entity: EntityId) -> Result<(), StoreError> {
        for type_id in self.scripts_of(entity) {
            if self.registry.script_copy(type_id).is_none() {
                return Err(StoreError::MissingCopyCapability {
                    type_name: self.registry.script_info(type_id).type_name.to_owned(),
                });
            }
        }
        Ok(())
    }

    /// Copy every script of `from` onto `to`, replacing scripts of the same
    /// type. Nothing is copied when one of them has no copy strategy.
    pub fn clone_scripts(&mut self, from: EntityId, to: EntityId) -> Result<usize, StoreError> {
        self.check_copyable(from)?;
        let mut copies = Vec::new();
        for (type_id, script) in self.scripts.get(&from).into_iter().flatten() {
            let copy = self.registry.script_copy(*type_id).and_then(|copy| copy(&**script));
            if let Some(copy) = copy {
                copies.push((*type_id, copy));
            }
        }
        let count = copies.len();
        let slots = self.scripts.entry(to).or_default();
        for (type_id, copy) in copies {
            match slots.iter_mut().find(|(id, _)| *id == type_id) {
                Some((_, slot)) => *slot = copy,
                None => slots.push((type_id, copy)),
            }
        }
        if slots.is_empty() {
            self.scripts.remove(&to);
        }
        Ok(count)
    }

    /// Clone `source` in `store` together with its scripts. Fails before
    /// touching the store when a script cannot be copied.
    pub fn clone_entity(
        &mut self,
        store: &mut EntityStore,
        source: Entity,
    ) -> Result<Entity, StoreError> {
        self.check_copyable(source.id())?;
        let clone = store.clone_entity(source)?;
        self.clone_scripts(source.id(), clone.id())?;
        Ok(clone)
    }

    /// Number of entities with at least one script.
    pub fn entity_count(&self) -> usize {
        self.scripts.len()
    }
}

impl std::fmt::Debug for ScriptTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptTable")
            .field("entities", &self.scripts.len())
            .finish()
    }
}
