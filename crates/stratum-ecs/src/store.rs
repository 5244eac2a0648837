//! The [`EntityStore`]: entity ids, archetype storage and the structural
//! change protocol.
//!
//! Every entity id maps to exactly one `(archetype, row)` node. A structural
//! change (adding or removing a component or tag) resolves the target
//! archetype through the [`ArchetypeGraph`], moves the entity's row across
//! and patches the node of whichever entity got swapped into the vacated row.
//! Value indexes and relation tables are kept in step on the same call, and
//! event handlers run once the change is committed.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::archetype::ArchetypeId;
use crate::component::{
    Component, ComponentTypeId, IndexedComponent, Relation, SchemaTypeKind, Tag, TagTypeId,
};
use crate::config::StoreConfig;
use crate::entity::{Entity, EntityAllocator, EntityId, EntityLocation, StoreId};
use crate::event::{
    dispatch, ComponentChangeAction, ComponentChanged, EntityCreated, EntityDeleted, EventHub,
    HandlerError, HandlerId, TagsChanged,
};
use crate::graph::{ArchetypeGraph, Edge};
use crate::heap::{typed_mut, ComponentHeap};
use crate::index::{ErasedIndex, ValueIndex};
use crate::pid::{PidMap, PidMode};
use crate::registry::TypeRegistry;
use crate::relation::{ErasedRelations, RelationTable};
use crate::signature::{Signature, TagSet};
use crate::StoreError;

// ---------------------------------------------------------------------------
// ComponentBundle
// ---------------------------------------------------------------------------

trait BundleValue: Send {
    fn write(self: Box<Self>, heap: &mut dyn ComponentHeap, row: usize);
}

impl<T: Component> BundleValue for T {
    fn write(self: Box<Self>, heap: &mut dyn ComponentHeap, row: usize) {
        if let Some(heap) = typed_mut::<T>(heap) {
            heap.set(row, *self);
        }
    }
}

/// Components and tags for [`EntityStore::create_entity_with_components`].
///
/// ```ignore
/// let bundle = ComponentBundle::new()
///     .with(store.registry(), Position { x: 0.0, y: 0.0 })
///     .with_tag::<Enemy>(store.registry());
/// let entity = store.create_entity_with_components(bundle)?;
/// ```
pub struct ComponentBundle {
    components: Vec<(ComponentTypeId, Box<dyn BundleValue>)>,
    tags: TagSet,
}

impl ComponentBundle {
    pub fn new() -> Self {
        Self {
            components: Vec::new(),
            tags: TagSet::new(),
        }
    }

    /// Add a component value.
    ///
    /// # Panics
    ///
    /// If `T` is not registered as a (non-relation) component, or was already
    /// added to this bundle.
    pub fn with<T: Component>(mut self, registry: &TypeRegistry, value: T) -> Self {
        let type_id = registry.component_id::<T>().unwrap_or_else(|| {
            panic!(
                "component type '{}' not registered",
                std::any::type_name::<T>()
            )
        });
        assert!(
            registry.metadata(type_id).kind == SchemaTypeKind::Component,
            "relations cannot be bundled; use EntityStore::add_relation"
        );
        assert!(
            !self.components.iter().any(|(id, _)| *id == type_id),
            "duplicate component type {:?} in ComponentBundle",
            type_id
        );
        self.components.push((type_id, Box::new(value)));
        self
    }

    /// Add a tag.
    ///
    /// # Panics
    ///
    /// If `T` is not registered as a tag.
    pub fn with_tag<T: Tag>(mut self, registry: &TypeRegistry) -> Self {
        let tag = registry.tag_id::<T>().unwrap_or_else(|| {
            panic!("tag type '{}' not registered", std::any::type_name::<T>())
        });
        self.tags.insert(tag);
        self
    }

    pub fn signature(&self) -> Signature {
        self.components
            .iter()
            .fold(Signature::new(), |sig, (id, _)| sig.with_component(*id))
            .with_tags(&self.tags)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty() && self.tags.is_empty()
    }
}

impl Default for ComponentBundle {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// EntityStore
// ---------------------------------------------------------------------------

/// In-memory store of entities grouped into archetypes.
pub struct EntityStore {
    pub(crate) id: StoreId,
    pub(crate) registry: Arc<TypeRegistry>,
    pub(crate) config: StoreConfig,
    pub(crate) graph: ArchetypeGraph,
    /// Indexed by entity id. `None` for free ids and the null id.
    pub(crate) nodes: Vec<Option<EntityLocation>>,
    allocator: EntityAllocator,
    pids: PidMap,
    /// Indexed by component type id; `Some` for indexed components.
    pub(crate) indexes: Vec<Option<Box<dyn ErasedIndex>>>,
    /// Indexed by component type id; `Some` for relation types.
    pub(crate) relations: Vec<Option<Box<dyn ErasedRelations>>>,
    pub(crate) events: EventHub,
    count: usize,
}

impl EntityStore {
    /// Create a store with the default configuration.
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self::with_config(registry, StoreConfig::default())
    }

    pub fn with_config(registry: Arc<TypeRegistry>, config: StoreConfig) -> Self {
        let slots = registry.component_count() + 1;
        let mut indexes: Vec<Option<Box<dyn ErasedIndex>>> = (0..slots).map(|_| None).collect();
        let mut relations: Vec<Option<Box<dyn ErasedRelations>>> =
            (0..slots).map(|_| None).collect();
        for info in registry.components() {
            let vtable = registry.vtable(info.id);
            indexes[info.id.index()] = vtable.new_index.map(|new_index| new_index());
            relations[info.id.index()] =
                vtable.new_relations.map(|new_relations| new_relations(info.id));
        }
        let graph = ArchetypeGraph::new(
            &registry,
            config.archetype_min_capacity(&registry),
            config.shrink_ratio_threshold,
        );
        let pids = PidMap::new(config.pid_mode, config.pid_seed);
        let nodes = vec![None; config.initial_entity_capacity.max(1)];
        Self {
            id: StoreId::next(),
            registry,
            config,
            graph,
            nodes,
            allocator: EntityAllocator::new(),
            pids,
            indexes,
            relations,
            events: EventHub::new(),
            count: 0,
        }
    }

    #[inline]
    pub fn id(&self) -> StoreId {
        self.id
    }

    #[inline]
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    #[inline]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn pid_mode(&self) -> PidMode {
        self.pids.mode()
    }

    // -- lookup helpers -----------------------------------------------------

    pub(crate) fn location(&self, id: EntityId) -> Result<EntityLocation, StoreError> {
        match self.nodes.get(id.index()) {
            None => Err(StoreError::OutOfRange {
                id: id.raw(),
                max_id: self.nodes.len().saturating_sub(1) as u32,
            }),
            Some(None) => Err(StoreError::NotFound { id }),
            Some(Some(loc)) => Ok(*loc),
        }
    }

    /// Validate that `entity` belongs to this store and is alive.
    pub fn resolve(&self, entity: Entity) -> Result<EntityId, StoreError> {
        if entity.store() != self.id {
            return Err(StoreError::CrossStoreOperation {
                expected: self.id,
                actual: entity.store(),
            });
        }
        self.location(entity.id())?;
        Ok(entity.id())
    }

    pub(crate) fn unknown_type(&self, name: &str) -> StoreError {
        StoreError::UnknownType {
            name: name.to_owned(),
            registered: self.registry.registered_keys().join(", "),
        }
    }

    fn component_type<T: Component>(&self) -> Result<ComponentTypeId, StoreError> {
        self.registry
            .component_id::<T>()
            .ok_or_else(|| self.unknown_type(std::any::type_name::<T>()))
    }

    /// Id of a non-relation component type.
    fn data_component_type<T: Component>(&self) -> Result<ComponentTypeId, StoreError> {
        let type_id = self.component_type::<T>()?;
        self.check_data_component(type_id)?;
        Ok(type_id)
    }

    pub(crate) fn check_data_component(&self, type_id: ComponentTypeId) -> Result<(), StoreError> {
        let info = self
            .registry
            .try_metadata(type_id)
            .ok_or_else(|| self.unknown_type(&format!("{:?}", type_id)))?;
        if info.kind == SchemaTypeKind::Relation {
            return Err(StoreError::InvalidOperation(format!(
                "relation '{}' must be changed with add_relation / remove_relation",
                info.key
            )));
        }
        Ok(())
    }

    fn relation_type<R: Relation>(&self) -> Result<ComponentTypeId, StoreError> {
        let type_id = self.component_type::<R>()?;
        if self.registry.metadata(type_id).kind != SchemaTypeKind::Relation {
            return Err(StoreError::InvalidOperation(format!(
                "'{}' is not registered as a relation",
                std::any::type_name::<R>()
            )));
        }
        Ok(type_id)
    }

    fn tag_type<T: Tag>(&self) -> Result<TagTypeId, StoreError> {
        self.registry
            .tag_id::<T>()
            .ok_or_else(|| self.unknown_type(std::any::type_name::<T>()))
    }

    fn check_tags(&self, tags: &TagSet) -> Result<(), StoreError> {
        match tags.iter().find(|t| t.index() > self.registry.tag_count()) {
            Some(tag) => Err(self.unknown_type(&format!("{:?}", tag))),
            None => Ok(()),
        }
    }

    // -- id allocation ------------------------------------------------------

    fn allocate_id(&mut self) -> EntityId {
        let nodes = &self.nodes;
        self.allocator
            .allocate(|raw| matches!(nodes.get(raw as usize), Some(Some(_))))
    }

    fn ensure_node(&mut self, id: EntityId) {
        if id.index() >= self.nodes.len() {
            let len = (self.nodes.len() * 2).max(id.index() + 1);
            debug!(from = self.nodes.len(), to = len, "growing entity node table");
            self.nodes.resize(len, None);
        }
    }

    /// Grow the node table so ids up to `capacity - 1` are in range.
    /// Returns the resulting capacity.
    pub fn ensure_capacity(&mut self, capacity: usize) -> usize {
        if capacity > self.nodes.len() {
            self.nodes.resize(capacity, None);
        }
        self.nodes.len()
    }

    /// Place `id` into `archetype`, assign its PID and raise `EntityCreated`.
    /// The PID is bound first so a rejected PID leaves the store untouched.
    fn spawn(
        &mut self,
        id: EntityId,
        archetype: ArchetypeId,
        pid: Option<i64>,
    ) -> Result<EntityLocation, StoreError> {
        match pid {
            Some(pid) => self.pids.assign_explicit(id, pid)?,
            None => {
                self.pids.assign(id);
            }
        }
        self.ensure_node(id);
        let row = self.graph.get_mut(archetype).allocate_slot(id);
        let loc = EntityLocation {
            archetype_id: archetype,
            row,
        };
        self.nodes[id.index()] = Some(loc);
        self.count += 1;
        trace!(entity = %id, archetype = ?archetype, "created entity");
        Ok(loc)
    }

    fn raise_created(&self, id: EntityId, loc: EntityLocation) -> Result<(), StoreError> {
        if self.events.created.is_empty() {
            return Ok(());
        }
        let event = EntityCreated {
            entity: id,
            store: self.id,
            signature: *self.graph.get(loc.archetype_id).signature(),
        };
        dispatch(&self.events.created, self, &event)
    }

    // -- creation -----------------------------------------------------------

    /// Create an entity without components or tags.
    pub fn create_entity(&mut self) -> Result<Entity, StoreError> {
        let id = self.allocate_id();
        let loc = self.spawn(id, ArchetypeId::EMPTY, None)?;
        self.raise_created(id, loc)?;
        Ok(Entity::new(id, self.id))
    }

    /// Create an entity with the given signature; components start at their
    /// default values.
    pub fn create_entity_with(&mut self, signature: &Signature) -> Result<Entity, StoreError> {
        for type_id in signature.component_ids() {
            self.check_data_component(type_id)?;
        }
        self.check_tags(&signature.tags())?;
        let archetype = self.graph.get_or_create(&self.registry, *signature);
        let id = self.allocate_id();
        let loc = self.spawn(id, archetype, None)?;
        self.index_row(id, loc, true);
        self.raise_created(id, loc)?;
        Ok(Entity::new(id, self.id))
    }

    /// Create an entity from a bundle of component values and tags.
    pub fn create_entity_with_components(
        &mut self,
        bundle: ComponentBundle,
    ) -> Result<Entity, StoreError> {
        let signature = bundle.signature();
        self.check_tags(&signature.tags())?;
        let archetype = self.graph.get_or_create(&self.registry, signature);
        let id = self.allocate_id();
        let loc = self.spawn(id, archetype, None)?;
        let target = self.graph.get_mut(archetype);
        for (type_id, value) in bundle.components {
            if let Some(heap) = target.heap_mut(type_id) {
                value.write(heap, loc.row);
            }
        }
        self.index_row(id, loc, true);
        self.raise_created(id, loc)?;
        Ok(Entity::new(id, self.id))
    }

    /// Create an entity with an explicit id.
    pub fn create_entity_with_id(&mut self, id: EntityId) -> Result<Entity, StoreError> {
        if id.is_null() {
            return Err(StoreError::InvalidOperation("invalid entity id: 0".to_string()));
        }
        if self.is_alive(id) {
            return Err(StoreError::InvalidOperation(format!(
                "id already in use in EntityStore. id: {id}"
            )));
        }
        self.allocator.reserve(id);
        let loc = self.spawn(id, ArchetypeId::EMPTY, None)?;
        self.raise_created(id, loc)?;
        Ok(Entity::new(id, self.id))
    }

    /// Create an entity known by `pid`. With [`PidMode::UsePidAsId`] this is
    /// [`create_entity_with_id`](Self::create_entity_with_id).
    pub fn create_entity_with_pid(&mut self, pid: i64) -> Result<Entity, StoreError> {
        match self.pids.mode() {
            PidMode::UsePidAsId => {
                let raw = u32::try_from(pid).map_err(|_| {
                    StoreError::InvalidOperation(format!("pid out of id range. pid: {pid}"))
                })?;
                self.create_entity_with_id(EntityId::new(raw))
            }
            PidMode::RandomPids => {
                if pid <= 0 || self.pids.contains_pid(pid) {
                    return Err(StoreError::InvalidOperation(format!(
                        "pid not available. pid: {pid}"
                    )));
                }
                let id = self.allocate_id();
                let loc = self.spawn(id, ArchetypeId::EMPTY, Some(pid))?;
                self.raise_created(id, loc)?;
                Ok(Entity::new(id, self.id))
            }
        }
    }

    /// Create a copy of `source`: components (through their copy strategies),
    /// tags, relation records and value-index entries.
    pub fn clone_entity(&mut self, source: Entity) -> Result<Entity, StoreError> {
        let src = self.resolve(source)?;
        let loc = self.location(src)?;
        let archetype = self.graph.get(loc.archetype_id);
        for type_id in archetype.heap_types() {
            if self.registry.vtable(*type_id).copy_row.is_none() {
                return Err(StoreError::MissingCopyCapability {
                    type_name: self.registry.metadata(*type_id).type_name.to_owned(),
                });
            }
        }
        let signature = *archetype.signature();

        let id = self.allocate_id();
        let new_loc = self.spawn(id, loc.archetype_id, None)?;
        let registry = &self.registry;
        self.graph
            .get_mut(loc.archetype_id)
            .copy_row(registry, loc.row, new_loc.row);
        self.index_row(id, new_loc, true);
        for type_id in signature.component_ids() {
            if let Some(Some(table)) = self.relations.get_mut(type_id.index()) {
                table.copy_all(src, id);
            }
        }
        self.raise_created(id, new_loc)?;
        Ok(Entity::new(id, self.id))
    }

    // -- deletion -----------------------------------------------------------

    /// Delete an entity.
    ///
    /// `EntityDeleted` handlers run first and can still read the entity. The
    /// deletion is committed even when a handler fails; that error is returned
    /// afterwards.
    pub fn delete_entity(&mut self, id: EntityId) -> Result<(), StoreError> {
        let loc = self.location(id)?;
        let signature = *self.graph.get(loc.archetype_id).signature();
        let handled = if self.events.deleted.is_empty() {
            Ok(())
        } else {
            let event = EntityDeleted {
                entity: id,
                store: self.id,
                signature,
            };
            dispatch(&self.events.deleted, self, &event)
        };

        self.index_row(id, loc, false);
        for type_id in signature.component_ids() {
            if let Some(Some(table)) = self.relations.get_mut(type_id.index()) {
                table.remove_all(id);
            }
        }
        let moved = self.graph.get_mut(loc.archetype_id).release_slot(loc.row);
        if let Some(moved) = moved {
            self.nodes[moved.index()] = Some(loc);
        }
        self.nodes[id.index()] = None;
        self.allocator.free(id);
        self.pids.release(id);
        self.count -= 1;
        trace!(entity = %id, archetype = ?loc.archetype_id, "deleted entity");
        handled
    }

    // -- structural moves ---------------------------------------------------

    /// Move `id` from `loc` into `target` and patch the swapped entity.
    fn move_entity(
        &mut self,
        id: EntityId,
        loc: EntityLocation,
        target: ArchetypeId,
    ) -> EntityLocation {
        if target == loc.archetype_id {
            return loc;
        }
        let (src, dst) = self.graph.pair_mut(loc.archetype_id, target);
        let (row, moved) = src.move_entity_to(loc.row, dst);
        if let Some(moved) = moved {
            self.nodes[moved.index()] = Some(loc);
        }
        let new_loc = EntityLocation {
            archetype_id: target,
            row,
        };
        self.nodes[id.index()] = Some(new_loc);
        trace!(entity = %id, from = ?loc.archetype_id, to = ?target, "moved entity");
        new_loc
    }

    pub(crate) fn follow_edge(
        &mut self,
        id: EntityId,
        loc: EntityLocation,
        edge: Edge,
    ) -> EntityLocation {
        let target = self.graph.resolve_edge(&self.registry, loc.archetype_id, edge);
        self.move_entity(id, loc, target)
    }

    /// Insert into (or remove from) the value index of `type_id` using the
    /// value currently stored at `loc`.
    pub(crate) fn index_value(
        &mut self,
        id: EntityId,
        loc: EntityLocation,
        type_id: ComponentTypeId,
        insert: bool,
    ) {
        let Some(Some(index)) = self.indexes.get_mut(type_id.index()) else {
            return;
        };
        let Some(heap) = self.graph.get(loc.archetype_id).heap(type_id) else {
            return;
        };
        let value = heap.value_any(loc.row);
        if insert {
            index.insert(id, value);
        } else {
            index.remove(id, value);
        }
    }

    /// Index (or unindex) every indexed component of the row at `loc`.
    fn index_row(&mut self, id: EntityId, loc: EntityLocation, insert: bool) {
        let archetype = self.graph.get(loc.archetype_id);
        for type_id in archetype.heap_types() {
            let Some(Some(index)) = self.indexes.get_mut(type_id.index()) else {
                continue;
            };
            if let Some(heap) = archetype.heap(*type_id) {
                if insert {
                    index.insert(id, heap.value_any(loc.row));
                } else {
                    index.remove(id, heap.value_any(loc.row));
                }
            }
        }
    }

    pub(crate) fn raise_component_changed(
        &self,
        id: EntityId,
        component: ComponentTypeId,
        action: ComponentChangeAction,
        old_signature: Signature,
        new_signature: Signature,
    ) -> Result<(), StoreError> {
        if self.events.component_changed.is_empty() {
            return Ok(());
        }
        let event = ComponentChanged {
            entity: id,
            store: self.id,
            component,
            action,
            old_signature,
            new_signature,
        };
        dispatch(&self.events.component_changed, self, &event)
    }

    fn raise_tags_changed(
        &self,
        id: EntityId,
        old_signature: Signature,
        new_signature: Signature,
    ) -> Result<(), StoreError> {
        if self.events.tags_changed.is_empty() {
            return Ok(());
        }
        let event = TagsChanged {
            entity: id,
            store: self.id,
            old_signature,
            new_signature,
        };
        dispatch(&self.events.tags_changed, self, &event)
    }

    pub(crate) fn signature_at(&self, loc: EntityLocation) -> Signature {
        *self.graph.get(loc.archetype_id).signature()
    }

    // -- components ---------------------------------------------------------

    /// Add `value` to `id`, or overwrite it in place when already present.
    /// Returns `true` when the signature changed.
    pub fn add_component<T: Component>(
        &mut self,
        id: EntityId,
        value: T,
    ) -> Result<bool, StoreError> {
        let type_id = self.data_component_type::<T>()?;
        let loc = self.location(id)?;
        let old_signature = self.signature_at(loc);

        if old_signature.has_component(type_id) {
            self.index_value(id, loc, type_id, false);
            let archetype = self.graph.get_mut(loc.archetype_id);
            if let Some(slot) = archetype.get_mut::<T>(type_id, loc.row) {
                *slot = value;
            }
            self.index_value(id, loc, type_id, true);
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
        let archetype = self.graph.get_mut(new_loc.archetype_id);
        if let Some(slot) = archetype.get_mut::<T>(type_id, new_loc.row) {
            *slot = value;
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

    /// Remove component `T`. Returns `false` when it was not present.
    pub fn remove_component<T: Component>(&mut self, id: EntityId) -> Result<bool, StoreError> {
        let type_id = self.component_type::<T>()?;
        self.remove_component_by_id(id, type_id)
    }

    /// Remove a component by type id.
    pub fn remove_component_by_id(
        &mut self,
        id: EntityId,
        type_id: ComponentTypeId,
    ) -> Result<bool, StoreError> {
        self.check_data_component(type_id)?;
        let loc = self.location(id)?;
        let old_signature = self.signature_at(loc);
        if !old_signature.has_component(type_id) {
            return Ok(false);
        }
        self.index_value(id, loc, type_id, false);
        let new_loc = self.follow_edge(id, loc, Edge::RemoveComponent(type_id));
        let new_signature = self.signature_at(new_loc);
        self.raise_component_changed(
            id,
            type_id,
            ComponentChangeAction::Removed,
            old_signature,
            new_signature,
        )?;
        Ok(true)
    }

    /// Add the default value of a component by type id. Returns `false` when
    /// already present.
    pub fn add_default_component(
        &mut self,
        id: EntityId,
        type_id: ComponentTypeId,
    ) -> Result<bool, StoreError> {
        self.check_data_component(type_id)?;
        let loc = self.location(id)?;
        let old_signature = self.signature_at(loc);
        if old_signature.has_component(type_id) {
            return Ok(false);
        }
        let new_loc = self.follow_edge(id, loc, Edge::AddComponent(type_id));
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

    pub fn get_component<T: Component>(&self, id: EntityId) -> Option<&T> {
        let type_id = self.registry.component_id::<T>()?;
        let loc = self.location(id).ok()?;
        self.graph.get(loc.archetype_id).get::<T>(type_id, loc.row)
    }

    /// Mutable access to a component. Indexed components must be changed
    /// through [`add_component`](Self::add_component) so their index stays
    /// in step.
    pub fn get_component_mut<T: Component>(
        &mut self,
        id: EntityId,
    ) -> Result<Option<&mut T>, StoreError> {
        let type_id = self.data_component_type::<T>()?;
        if self.registry.metadata(type_id).is_indexed {
            return Err(StoreError::InvalidOperation(format!(
                "indexed component '{}' must be updated with add_component",
                self.registry.metadata(type_id).key
            )));
        }
        let loc = self.location(id)?;
        Ok(self.graph.get_mut(loc.archetype_id).get_mut::<T>(type_id, loc.row))
    }

    pub fn has_component<T: Component>(&self, id: EntityId) -> bool {
        match (self.registry.component_id::<T>(), self.location(id)) {
            (Some(type_id), Ok(loc)) => self.signature_at(loc).has_component(type_id),
            _ => false,
        }
    }

    pub fn signature_of(&self, id: EntityId) -> Result<Signature, StoreError> {
        Ok(self.signature_at(self.location(id)?))
    }

    // -- tags ---------------------------------------------------------------

    pub fn add_tag<T: Tag>(&mut self, id: EntityId) -> Result<bool, StoreError> {
        let tag = self.tag_type::<T>()?;
        self.add_tags(id, &TagSet::new().with(tag))
    }

    pub fn remove_tag<T: Tag>(&mut self, id: EntityId) -> Result<bool, StoreError> {
        let tag = self.tag_type::<T>()?;
        self.remove_tags(id, &TagSet::new().with(tag))
    }

    /// Add every tag in `tags`. Returns `true` when at least one was new.
    pub fn add_tags(&mut self, id: EntityId, tags: &TagSet) -> Result<bool, StoreError> {
        self.check_tags(tags)?;
        let loc = self.location(id)?;
        let old_signature = self.signature_at(loc);
        let new_signature = old_signature.with_tags(tags);
        self.change_tags(id, loc, old_signature, new_signature, tags)
    }

    /// Remove every tag in `tags`. Returns `true` when at least one was present.
    pub fn remove_tags(&mut self, id: EntityId, tags: &TagSet) -> Result<bool, StoreError> {
        self.check_tags(tags)?;
        let loc = self.location(id)?;
        let old_signature = self.signature_at(loc);
        let new_signature = old_signature.without_tags(tags);
        self.change_tags(id, loc, old_signature, new_signature, tags)
    }

    fn change_tags(
        &mut self,
        id: EntityId,
        loc: EntityLocation,
        old_signature: Signature,
        new_signature: Signature,
        tags: &TagSet,
    ) -> Result<bool, StoreError> {
        if new_signature == old_signature {
            return Ok(false);
        }
        let target = if tags.len() == 1 {
            let tag = tags.iter().next().unwrap_or(TagTypeId::NONE);
            let edge = if new_signature.has_tag(tag) {
                Edge::AddTag(tag)
            } else {
                Edge::RemoveTag(tag)
            };
            self.graph.resolve_edge(&self.registry, loc.archetype_id, edge)
        } else {
            self.graph.get_or_create(&self.registry, new_signature)
        };
        self.move_entity(id, loc, target);
        self.raise_tags_changed(id, old_signature, new_signature)?;
        Ok(true)
    }

    pub fn has_tag<T: Tag>(&self, id: EntityId) -> bool {
        match (self.registry.tag_id::<T>(), self.location(id)) {
            (Some(tag), Ok(loc)) => self.signature_at(loc).has_tag(tag),
            _ => false,
        }
    }

    // -- relations ----------------------------------------------------------

    fn relation_table_mut<R: Relation>(
        &mut self,
        type_id: ComponentTypeId,
    ) -> Option<&mut RelationTable<R>> {
        self.relations
            .get_mut(type_id.index())?
            .as_mut()?
            .as_any_mut()
            .downcast_mut::<RelationTable<R>>()
    }

    /// The table holding every `R` record of this store.
    pub fn relation_table<R: Relation>(&self) -> Option<&RelationTable<R>> {
        let type_id = self.registry.component_id::<R>()?;
        self.relations
            .get(type_id.index())?
            .as_ref()?
            .as_any()
            .downcast_ref::<RelationTable<R>>()
    }

    /// Add a relation record to `id`, replacing the record with the same key.
    /// Returns `true` when a new record was inserted.
    pub fn add_relation<R: Relation>(
        &mut self,
        id: EntityId,
        relation: R,
    ) -> Result<bool, StoreError> {
        let type_id = self.relation_type::<R>()?;
        let loc = self.location(id)?;
        let table = self
            .relation_table_mut::<R>(type_id)
            .ok_or_else(|| {
                StoreError::InvalidOperation(format!("no relation table for {:?}", type_id))
            })?;
        let inserted = table.add(id, relation);
        self.after_relation_added(id, loc, type_id, inserted)?;
        Ok(inserted)
    }

    /// Set the relation bit on the first record and raise the change event.
    pub(crate) fn after_relation_added(
        &mut self,
        id: EntityId,
        loc: EntityLocation,
        type_id: ComponentTypeId,
        inserted: bool,
    ) -> Result<(), StoreError> {
        let old_signature = self.signature_at(loc);
        let new_loc = if old_signature.has_component(type_id) {
            loc
        } else {
            self.follow_edge(id, loc, Edge::AddComponent(type_id))
        };
        let new_signature = self.signature_at(new_loc);
        let action = if inserted {
            ComponentChangeAction::Added
        } else {
            ComponentChangeAction::Updated
        };
        self.raise_component_changed(id, type_id, action, old_signature, new_signature)
    }

    /// Remove the record of `id` whose key equals `key`. Returns `false` when
    /// there is none.
    pub fn remove_relation<R: Relation>(
        &mut self,
        id: EntityId,
        key: &R::Key,
    ) -> Result<bool, StoreError> {
        let type_id = self.relation_type::<R>()?;
        let loc = self.location(id)?;
        let Some(table) = self.relation_table_mut::<R>(type_id) else {
            return Ok(false);
        };
        let Some(remaining) = table.remove(id, key) else {
            return Ok(false);
        };
        let old_signature = self.signature_at(loc);
        let new_loc = if remaining == 0 {
            self.follow_edge(id, loc, Edge::RemoveComponent(type_id))
        } else {
            loc
        };
        let new_signature = self.signature_at(new_loc);
        self.raise_component_changed(
            id,
            type_id,
            ComponentChangeAction::Removed,
            old_signature,
            new_signature,
        )?;
        Ok(true)
    }

    /// The `R` records of `id`.
    pub fn relations<R: Relation>(&self, id: EntityId) -> Result<&[R], StoreError> {
        self.relation_type::<R>()?;
        self.location(id)?;
        Ok(self
            .relation_table::<R>()
            .map(|table| table.relations(id))
            .unwrap_or(&[]))
    }

    /// Entities holding an `R` record with `key`.
    pub fn relation_owners<R: Relation>(&self, key: &R::Key) -> &[EntityId] {
        self.relation_table::<R>()
            .map(|table| table.owners(key))
            .unwrap_or(&[])
    }

    // -- value index --------------------------------------------------------

    /// The value index of `T`, when `T` was registered as indexed.
    pub fn value_index<T: IndexedComponent>(&self) -> Option<&ValueIndex<T>> {
        let type_id = self.registry.component_id::<T>()?;
        self.indexes
            .get(type_id.index())?
            .as_ref()?
            .as_any()
            .downcast_ref::<ValueIndex<T>>()
    }

    // -- id lookup ----------------------------------------------------------

    /// The live entity with `id`. `Ok(None)` for unused ids in range.
    pub fn get_by_id(&self, id: EntityId) -> Result<Option<Entity>, StoreError> {
        match self.location(id) {
            Ok(_) => Ok(Some(Entity::new(id, self.id))),
            Err(StoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn try_get_by_id(&self, id: EntityId) -> Option<Entity> {
        self.get_by_id(id).ok().flatten()
    }

    /// The live entity with `id`, or `NotFound` / `OutOfRange`.
    pub fn entity(&self, id: EntityId) -> Result<Entity, StoreError> {
        self.location(id)?;
        Ok(Entity::new(id, self.id))
    }

    pub fn is_alive(&self, id: EntityId) -> bool {
        matches!(self.nodes.get(id.index()), Some(Some(_)))
    }

    pub fn pid_of(&self, id: EntityId) -> Result<i64, StoreError> {
        self.location(id)?;
        Ok(self.pids.pid_of(id))
    }

    /// The live entity known by `pid`.
    pub fn by_pid(&self, pid: i64) -> Option<EntityId> {
        self.pids.id_of(pid).filter(|id| self.is_alive(*id))
    }

    // -- counts -------------------------------------------------------------

    /// Number of live entities.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Length of the node table; valid ids are `[0, capacity)`.
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    pub fn capacity_sum_archetypes(&self) -> usize {
        self.graph.capacity_sum()
    }

    pub fn archetype_count(&self) -> usize {
        self.graph.len()
    }

    /// Ids of all live entities, archetype by archetype.
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.graph.iter().flat_map(|a| a.entities().iter().copied())
    }

    // -- events -------------------------------------------------------------

    pub fn on_entity_created<F>(&mut self, handler: F) -> HandlerId
    where
        F: Fn(&EntityStore, &EntityCreated) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let id = self.events.next_id();
        self.events.created.push((id, Box::new(handler)));
        id
    }

    pub fn on_entity_deleted<F>(&mut self, handler: F) -> HandlerId
    where
        F: Fn(&EntityStore, &EntityDeleted) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let id = self.events.next_id();
        self.events.deleted.push((id, Box::new(handler)));
        id
    }

    pub fn on_component_changed<F>(&mut self, handler: F) -> HandlerId
    where
        F: Fn(&EntityStore, &ComponentChanged) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let id = self.events.next_id();
        self.events.component_changed.push((id, Box::new(handler)));
        id
    }

    pub fn on_tags_changed<F>(&mut self, handler: F) -> HandlerId
    where
        F: Fn(&EntityStore, &TagsChanged) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let id = self.events.next_id();
        self.events.tags_changed.push((id, Box::new(handler)));
        id
    }

    /// Unregister a handler. Returns `false` when it was not registered.
    pub fn remove_handler(&mut self, id: HandlerId) -> bool {
        self.events.remove(id)
    }
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("id", &self.id)
            .field("count", &self.count)
            .field("capacity", &self.nodes.len())
            .field("archetypes", &self.graph.len())
            .field("pid_mode", &self.pids.mode())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Disabled;
    use serde::{Deserialize, Serialize};
    use std::sync::Mutex;

    #[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
    struct Pos {
        x: f32,
        y: f32,
    }
    impl Component for Pos {}

    #[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
    struct Vel {
        dx: f32,
        dy: f32,
    }
    impl Component for Vel {}

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Health(u32);
    impl Component for Health {}

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Secret(String);
    impl Component for Secret {}

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
    struct Follows {
        target: u32,
    }
    impl Component for Follows {}
    impl Relation for Follows {
        type Key = u32;
        fn relation_key(&self) -> u32 {
            self.target
        }
    }

    struct Enemy;
    impl Tag for Enemy {}

    struct Player;
    impl Tag for Player {}

    fn setup_registry() -> Arc<TypeRegistry> {
        let mut registry = TypeRegistry::new();
        registry.register_component::<Pos>("pos");
        registry.register_component::<Vel>("vel");
        registry.register_cloneable_component::<Health>("health");
        registry.register_opaque_component::<Secret>("secret");
        registry.register_indexed_component::<Team>("team");
        registry.register_relation::<Follows>("follows");
        registry.register_tag::<Enemy>("Enemy");
        registry.register_tag::<Player>("Player");
        Arc::new(registry)
    }

    fn setup_store() -> EntityStore {
        EntityStore::new(setup_registry())
    }

    #[test]
    fn create_assigns_sequential_ids() {
        let mut store = setup_store();
        let a = store.create_entity().unwrap();
        let b = store.create_entity().unwrap();
        assert_eq!(a.id(), EntityId::new(1));
        assert_eq!(b.id(), EntityId::new(2));
        assert_eq!(store.count(), 2);
        assert!(store.signature_of(a.id()).unwrap().is_empty());
    }

    #[test]
    fn deleted_ids_are_recycled() {
        let mut store = setup_store();
        let a = store.create_entity().unwrap().id();
        store.create_entity().unwrap();
        store.delete_entity(a).unwrap();
        assert_eq!(store.create_entity().unwrap().id(), a);
    }

    #[test]
    fn add_component_is_structural_once() {
        let mut store = setup_store();
        let e = store.create_entity().unwrap().id();
        assert!(store.add_component(e, Pos { x: 1.0, y: 2.0 }).unwrap());
        assert!(!store.add_component(e, Pos { x: 3.0, y: 4.0 }).unwrap());
        assert_eq!(store.get_component::<Pos>(e), Some(&Pos { x: 3.0, y: 4.0 }));
        assert!(store.has_component::<Pos>(e));
        assert!(!store.has_component::<Vel>(e));
    }

    #[test]
    fn remove_component_is_idempotent() {
        let mut store = setup_store();
        let e = store.create_entity().unwrap().id();
        store.add_component(e, Pos::default()).unwrap();
        assert!(store.remove_component::<Pos>(e).unwrap());
        let sig = store.signature_of(e).unwrap();
        assert!(!store.remove_component::<Pos>(e).unwrap());
        assert_eq!(store.signature_of(e).unwrap(), sig);
    }

    #[test]
    fn moves_keep_other_components() {
        let mut store = setup_store();
        let e = store.create_entity().unwrap().id();
        store.add_component(e, Pos { x: 1.0, y: 1.0 }).unwrap();
        store.add_component(e, Health(7)).unwrap();
        store.add_component(e, Vel { dx: 2.0, dy: 0.0 }).unwrap();
        store.remove_component::<Pos>(e).unwrap();
        assert_eq!(store.get_component::<Health>(e), Some(&Health(7)));
        assert_eq!(store.get_component::<Vel>(e), Some(&Vel { dx: 2.0, dy: 0.0 }));
        assert_eq!(store.get_component::<Pos>(e), None);
    }

    #[test]
    fn swap_remove_patches_moved_entity() {
        let mut store = setup_store();
        let ids: Vec<EntityId> = (0..3)
            .map(|i| {
                let id = store.create_entity().unwrap().id();
                store.add_component(id, Health(i)).unwrap();
                id
            })
            .collect();
        store.delete_entity(ids[0]).unwrap();
        assert_eq!(store.get_component::<Health>(ids[2]), Some(&Health(2)));
        assert_eq!(store.get_component::<Health>(ids[1]), Some(&Health(1)));
        let loc = store.location(ids[2]).unwrap();
        assert_eq!(loc.row, 0);
    }

    #[test]
    fn get_by_id_ranges() {
        let store = setup_store();
        assert_eq!(store.capacity(), 128);
        assert!(store.get_by_id(EntityId::new(5)).unwrap().is_none());
        let err = store.get_by_id(EntityId::new(128)).unwrap_err();
        assert_eq!(err.to_string(), "id: 128. expect in [0, current max id: 127]");
        assert!(store.try_get_by_id(EntityId::new(500)).is_none());
    }

    #[test]
    fn node_table_grows() {
        let mut store = setup_store();
        store.create_entity_with_id(EntityId::new(300)).unwrap();
        assert!(store.capacity() >= 301);
        assert!(store.is_alive(EntityId::new(300)));
        assert_eq!(store.ensure_capacity(1000), 1000);
    }

    #[test]
    fn explicit_ids() {
        let mut store = setup_store();
        store.create_entity_with_id(EntityId::new(2)).unwrap();
        let err = store.create_entity_with_id(EntityId::new(2)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidOperation(_)));
        assert!(store.create_entity_with_id(EntityId::NULL).is_err());
        // sequential allocation skips the taken id
        assert_eq!(store.create_entity().unwrap().id(), EntityId::new(1));
        assert_eq!(store.create_entity().unwrap().id(), EntityId::new(3));
    }

    #[test]
    fn relation_through_component_api_is_rejected() {
        let mut store = setup_store();
        let e = store.create_entity().unwrap().id();
        let err = store.add_component(e, Follows { target: 1 }).unwrap_err();
        assert!(matches!(err, StoreError::InvalidOperation(_)));
        assert!(store.remove_component::<Follows>(e).is_err());
    }

    #[test]
    fn unknown_component_type() {
        #[derive(Debug, Default, Serialize, Deserialize)]
        struct Unregistered;
        impl Component for Unregistered {}

        let mut store = setup_store();
        let e = store.create_entity().unwrap().id();
        let err = store.add_component(e, Unregistered).unwrap_err();
        assert!(matches!(err, StoreError::UnknownType { .. }));
    }

    #[test]
    fn dead_entity_errors() {
        let mut store = setup_store();
        let e = store.create_entity().unwrap().id();
        store.delete_entity(e).unwrap();
        assert!(matches!(
            store.add_component(e, Pos::default()),
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(store.delete_entity(e), Err(StoreError::NotFound { .. })));
        assert!(store.get_component::<Pos>(e).is_none());
    }

    #[test]
    fn tags() {
        let mut store = setup_store();
        let e = store.create_entity().unwrap().id();
        assert!(store.add_tag::<Enemy>(e).unwrap());
        assert!(!store.add_tag::<Enemy>(e).unwrap());
        assert!(store.has_tag::<Enemy>(e));
        let tags: TagSet = [
            store.registry().tag_id::<Enemy>().unwrap(),
            store.registry().tag_id::<Player>().unwrap(),
        ]
        .into_iter()
        .collect();
        assert!(store.add_tags(e, &tags).unwrap());
        assert!(store.has_tag::<Player>(e));
        assert!(store.remove_tags(e, &tags).unwrap());
        assert!(!store.remove_tags(e, &tags).unwrap());
        assert!(store.signature_of(e).unwrap().is_empty());
    }

    #[test]
    fn bundle_creation() {
        let mut store = setup_store();
        let registry = store.registry().clone();
        let bundle = ComponentBundle::new()
            .with(&registry, Pos { x: 1.0, y: 2.0 })
            .with(&registry, Team(3))
            .with_tag::<Enemy>(&registry);
        let e = store.create_entity_with_components(bundle).unwrap().id();
        assert_eq!(store.get_component::<Pos>(e), Some(&Pos { x: 1.0, y: 2.0 }));
        assert!(store.has_tag::<Enemy>(e));
        assert_eq!(store.value_index::<Team>().unwrap().get(&3), &[e]);
    }

    #[test]
    fn create_with_signature_defaults() {
        let mut store = setup_store();
        let registry = store.registry().clone();
        let sig = Signature::new()
            .with_component(registry.component_id::<Health>().unwrap())
            .with_tag(registry.tag_id::<Player>().unwrap());
        let e = store.create_entity_with(&sig).unwrap().id();
        assert_eq!(store.get_component::<Health>(e), Some(&Health(0)));
        assert_eq!(store.signature_of(e).unwrap(), sig);

        let follows = registry.component_id::<Follows>().unwrap();
        let with_relation = Signature::new().with_component(follows);
        assert!(store.create_entity_with(&with_relation).is_err());
    }

    #[test]
    fn indexed_component_lifecycle() {
        let mut store = setup_store();
        let a = store.create_entity().unwrap().id();
        let b = store.create_entity().unwrap().id();
        store.add_component(a, Team(1)).unwrap();
        store.add_component(b, Team(1)).unwrap();
        assert_eq!(store.value_index::<Team>().unwrap().get(&1), &[a, b]);

        store.add_component(a, Team(2)).unwrap();
        let index = store.value_index::<Team>().unwrap();
        assert_eq!(index.get(&1), &[b]);
        assert_eq!(index.get(&2), &[a]);

        store.remove_component::<Team>(b).unwrap();
        assert!(store.value_index::<Team>().unwrap().get(&1).is_empty());

        store.delete_entity(a).unwrap();
        assert!(store.value_index::<Team>().unwrap().is_empty());
    }

    #[test]
    fn indexed_component_is_not_mutable_in_place() {
        let mut store = setup_store();
        let e = store.create_entity().unwrap().id();
        store.add_component(e, Team(1)).unwrap();
        assert!(matches!(
            store.get_component_mut::<Team>(e),
            Err(StoreError::InvalidOperation(_))
        ));
        store.add_component(e, Pos::default()).unwrap();
        store.get_component_mut::<Pos>(e).unwrap().unwrap().x = 5.0;
        assert_eq!(store.get_component::<Pos>(e).unwrap().x, 5.0);
        assert!(store.get_component_mut::<Vel>(e).unwrap().is_none());
    }

    #[test]
    fn clone_copies_components_tags_and_index() {
        let mut store = setup_store();
        let e = store.create_entity().unwrap();
        store.add_component(e.id(), Pos { x: 1.0, y: 2.0 }).unwrap();
        store.add_component(e.id(), Health(4)).unwrap();
        store.add_component(e.id(), Team(9)).unwrap();
        store.add_tag::<Enemy>(e.id()).unwrap();
        store.add_relation(e.id(), Follows { target: 5 }).unwrap();

        let c = store.clone_entity(e).unwrap();
        assert_ne!(c.id(), e.id());
        assert_eq!(store.signature_of(c.id()).unwrap(), store.signature_of(e.id()).unwrap());
        assert_eq!(store.get_component::<Health>(c.id()), Some(&Health(4)));
        assert_eq!(store.value_index::<Team>().unwrap().get(&9), &[e.id(), c.id()]);
        assert_eq!(store.relations::<Follows>(c.id()).unwrap(), &[Follows { target: 5 }]);
    }

    #[test]
    fn clone_without_copy_strategy_fails() {
        let mut store = setup_store();
        let e = store.create_entity().unwrap();
        store.add_component(e.id(), Secret("x".into())).unwrap();
        let err = store.clone_entity(e).unwrap_err();
        assert!(matches!(err, StoreError::MissingCopyCapability { .. }));
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn foreign_handles_are_rejected() {
        let registry = setup_registry();
        let mut a = EntityStore::new(registry.clone());
        let mut b = EntityStore::new(registry);
        let e = a.create_entity().unwrap();
        b.create_entity().unwrap();
        let err = b.clone_entity(e).unwrap_err();
        assert!(matches!(err, StoreError::CrossStoreOperation { .. }));
        assert!(err.to_string().contains("entity is owned by a different store"));
    }

    #[test]
    fn relations_toggle_signature_bit() {
        let mut store = setup_store();
        let follows = store.registry().component_id::<Follows>().unwrap();
        let e = store.create_entity().unwrap().id();
        assert!(store.add_relation(e, Follows { target: 10 }).unwrap());
        assert!(store.signature_of(e).unwrap().has_component(follows));
        assert!(store.add_relation(e, Follows { target: 11 }).unwrap());
        assert!(!store.add_relation(e, Follows { target: 11 }).unwrap());
        assert_eq!(store.relations::<Follows>(e).unwrap().len(), 2);

        assert!(!store.remove_relation::<Follows>(e, &99).unwrap());
        assert!(store.remove_relation::<Follows>(e, &10).unwrap());
        assert!(store.signature_of(e).unwrap().has_component(follows));
        assert!(store.remove_relation::<Follows>(e, &11).unwrap());
        assert!(!store.signature_of(e).unwrap().has_component(follows));
    }

    #[test]
    fn deleting_owner_drops_relations() {
        let mut store = setup_store();
        let a = store.create_entity().unwrap().id();
        let b = store.create_entity().unwrap().id();
        store.add_relation(a, Follows { target: 7 }).unwrap();
        store.add_relation(b, Follows { target: 7 }).unwrap();
        assert_eq!(store.relation_owners::<Follows>(&7), &[a, b]);
        store.delete_entity(a).unwrap();
        assert_eq!(store.relation_owners::<Follows>(&7), &[b]);
    }

    #[test]
    fn pid_as_id_lookup() {
        let mut store = setup_store();
        let e = store.create_entity().unwrap().id();
        assert_eq!(store.pid_of(e).unwrap(), 1);
        assert_eq!(store.by_pid(1), Some(e));
        for pid in [0, -1, 2, i64::MAX] {
            assert_eq!(store.by_pid(pid), None);
        }
    }

    #[test]
    fn random_pids() {
        let config = StoreConfig {
            pid_mode: PidMode::RandomPids,
            pid_seed: 3,
            ..StoreConfig::default()
        };
        let mut store = EntityStore::with_config(setup_registry(), config);
        let e = store.create_entity().unwrap().id();
        let pid = store.pid_of(e).unwrap();
        assert!(pid > 0);
        assert_eq!(store.by_pid(pid), Some(e));
        let f = store.create_entity_with_pid(1234).unwrap().id();
        assert_eq!(store.pid_of(f).unwrap(), 1234);
        assert!(store.create_entity_with_pid(1234).is_err());
        store.delete_entity(f).unwrap();
        assert_eq!(store.by_pid(1234), None);
    }

    #[test]
    fn rejected_pid_leaves_store_untouched() {
        let config = StoreConfig {
            pid_mode: PidMode::RandomPids,
            pid_seed: 5,
            ..StoreConfig::default()
        };
        let mut store = EntityStore::with_config(setup_registry(), config);
        let e = store.create_entity_with_pid(77).unwrap().id();
        let free = EntityId::new(40);

        for pid in [77, 0, -3] {
            assert!(store.spawn(free, ArchetypeId::EMPTY, Some(pid)).is_err());
            assert_eq!(store.count(), 1);
            assert!(!store.is_alive(free));
            assert_eq!(store.graph.get(ArchetypeId::EMPTY).count(), 1);
        }
        assert_eq!(store.by_pid(77), Some(e));
    }

    #[test]
    fn padded_column_fits_with_odd_min_capacity() {
        #[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
        struct Rgb([f32; 3]);
        impl Component for Rgb {}

        let mut registry = TypeRegistry::new();
        let rgb = registry.register_component::<Rgb>("rgb");
        let config = StoreConfig {
            min_archetype_capacity: 3,
            ..StoreConfig::default()
        };
        let mut store = EntityStore::with_config(Arc::new(registry), config);
        let e = store.create_entity().unwrap().id();
        store.add_component(e, Rgb([1.0, 2.0, 3.0])).unwrap();

        let loc = store.location(e).unwrap();
        let archetype = store.graph.get(loc.archetype_id);
        // 12-byte rows round up to 16 elements
        assert_eq!(archetype.capacity(), 16);
        let padded = archetype.padded_column::<Rgb>(&store.registry, rgb).unwrap();
        assert_eq!(padded.len(), 16);
        assert_eq!(padded[0], Rgb([1.0, 2.0, 3.0]));
        assert_eq!(padded[15], Rgb::default());
    }

    #[test]
    fn delete_handler_sees_data_and_error_is_after_commit() {
        let mut store = setup_store();
        let e = store.create_entity().unwrap().id();
        store.add_component(e, Health(3)).unwrap();
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        store.on_entity_deleted(move |store, event| {
            *sink.lock().unwrap() = store.get_component::<Health>(event.entity).cloned();
            Err("handler failed".into())
        });
        let err = store.delete_entity(e).unwrap_err();
        assert!(matches!(err, StoreError::Handler(_)));
        assert_eq!(*seen.lock().unwrap(), Some(Health(3)));
        assert_eq!(store.count(), 0);
        assert!(!store.is_alive(e));
    }

    #[test]
    fn events_run_in_registration_order() {
        let mut store = setup_store();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (l1, l2, l3) = (log.clone(), log.clone(), log.clone());
        store.on_entity_created(move |_, event| {
            l1.lock().unwrap().push(format!("first {}", event.entity));
            Ok(())
        });
        let second = store.on_entity_created(move |_, event| {
            l2.lock().unwrap().push(format!("second {}", event.entity));
            Ok(())
        });
        store.on_component_changed(move |_, event| {
            l3.lock().unwrap().push(format!("{:?}", event.action));
            Ok(())
        });
        let e = store.create_entity().unwrap().id();
        store.add_component(e, Pos::default()).unwrap();
        store.add_component(e, Pos::default()).unwrap();
        store.remove_component::<Pos>(e).unwrap();
        assert!(store.remove_handler(second));
        store.create_entity().unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["first 1", "second 1", "Added", "Updated", "Removed", "first 2"]
        );
    }

    #[test]
    fn tag_events_report_diff() {
        let mut store = setup_store();
        let e = store.create_entity().unwrap().id();
        let added = Arc::new(Mutex::new(Vec::new()));
        let sink = added.clone();
        store.on_tags_changed(move |_, event| {
            sink.lock().unwrap().extend(event.added().iter());
            Ok(())
        });
        store.add_tag::<Disabled>(e).unwrap();
        store.add_tag::<Disabled>(e).unwrap();
        assert_eq!(*added.lock().unwrap(), vec![TagTypeId(1)]);
    }

    #[test]
    fn capacity_sum_and_shrink() {
        let config = StoreConfig {
            shrink_ratio_threshold: 0.0,
            ..StoreConfig::default()
        };
        let mut store = EntityStore::with_config(setup_registry(), config);
        let ids: Vec<EntityId> = (0..1000)
            .map(|_| {
                let id = store.create_entity().unwrap().id();
                store.add_component(id, Pos::default()).unwrap();
                id
            })
            .collect();
        assert_eq!(store.capacity_sum_archetypes(), 512 + 1024);
        for id in ids {
            store.delete_entity(id).unwrap();
        }
        // the position archetype is already at twice the minimum
        assert_eq!(store.capacity_sum_archetypes(), 512 + 1024);
    }
}
