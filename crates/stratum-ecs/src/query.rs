//! Queries over archetypes.
//!
//! A query is built from a [`QueryBuilder`] (`store.query::<Q>()`), where `Q`
//! is a tuple of `&T` / `&mut T` items, or `()` for a filter-only query.
//! [`QueryBuilder::build`] resolves the matching archetypes once; archetypes
//! created afterwards are picked up by [`ArchetypeQuery::refresh`].
//!
//! Iteration walks archetype columns directly. Read-only queries borrow the
//! store shared; queries with `&mut T` items go through
//! [`ArchetypeQuery::iter_mut`], which borrows the store exclusively and
//! splits each archetype into disjoint heap borrows.
//!
//! Entities tagged [`Disabled`](crate::component::Disabled) are skipped unless
//! the query opts in with [`QueryBuilder::with_disabled`] or requires the tag.

use std::collections::HashSet;
use std::marker::PhantomData;

use crate::archetype::{Archetype, ArchetypeId};
use crate::component::{Component, ComponentTypeId, IndexedComponent, SchemaTypeKind, Tag};
use crate::entity::{EntityId, StoreId};
use crate::graph::ArchetypeGraph;
pub use crate::heap::HeapAccess;
use crate::heap::{typed, typed_mut, ComponentHeap};
use crate::registry::TypeRegistry;
use crate::signature::Signature;
use crate::store::EntityStore;
use crate::StoreError;

// ---------------------------------------------------------------------------
// QueryItem -- one element of a query tuple
// ---------------------------------------------------------------------------

/// A single element of a query: `&T` (read) or `&mut T` (write).
pub trait QueryItem {
    /// The value yielded per row.
    type Item<'a>;
    /// The live rows of one archetype, consumed front to back.
    type Column<'a>;
    /// Whether this item borrows mutably.
    const MUTABLE: bool;

    fn component_type_id(registry: &TypeRegistry) -> Option<ComponentTypeId>;

    /// The first `count` rows of `heap`. `None` when the heap holds another
    /// type or a mutable item only got shared access.
    fn column<'a>(heap: HeapAccess<'a>, count: usize) -> Option<Self::Column<'a>>;

    fn next<'a>(column: &mut Self::Column<'a>) -> Option<Self::Item<'a>>;
}

impl<T: Component> QueryItem for &T {
    type Item<'a> = &'a T;
    type Column<'a> = &'a [T];
    const MUTABLE: bool = false;

    fn component_type_id(registry: &TypeRegistry) -> Option<ComponentTypeId> {
        registry.component_id::<T>()
    }

    fn column<'a>(heap: HeapAccess<'a>, count: usize) -> Option<&'a [T]> {
        let heap: &'a dyn ComponentHeap = match heap {
            HeapAccess::Shared(heap) => heap,
            HeapAccess::Exclusive(heap) => heap,
        };
        typed::<T>(heap).map(|heap| heap.slice(count))
    }

    fn next<'a>(column: &mut Self::Column<'a>) -> Option<Self::Item<'a>> {
        let (first, rest) = column.split_first()?;
        *column = rest;
        Some(first)
    }
}

impl<T: Component> QueryItem for &mut T {
    type Item<'a> = &'a mut T;
    type Column<'a> = &'a mut [T];
    const MUTABLE: bool = true;

    fn component_type_id(registry: &TypeRegistry) -> Option<ComponentTypeId> {
        registry.component_id::<T>()
    }

    fn column<'a>(heap: HeapAccess<'a>, count: usize) -> Option<&'a mut [T]> {
        match heap {
            HeapAccess::Exclusive(heap) => typed_mut::<T>(heap).map(|heap| heap.slice_mut(count)),
            HeapAccess::Shared(_) => None,
        }
    }

    fn next<'a>(column: &mut Self::Column<'a>) -> Option<Self::Item<'a>> {
        let slice = std::mem::take(column);
        let (first, rest) = slice.split_first_mut()?;
        *column = rest;
        Some(first)
    }
}

// ---------------------------------------------------------------------------
// Query -- a tuple of QueryItems
// ---------------------------------------------------------------------------

/// A tuple of query items: `(&A,)`, `(&mut A, &B)`, ... up to four, or `()`.
pub trait Query {
    type Item<'a>;
    type Columns<'a>;
    /// Whether any item borrows mutably.
    const HAS_MUTABLE: bool;

    /// `(type id, mutable)` per item, in tuple order. `None` when an item
    /// type is not registered.
    fn access(registry: &TypeRegistry) -> Option<Vec<(ComponentTypeId, bool)>>;

    /// Build the columns of one archetype from heaps given in item order.
    fn columns<'a>(
        heaps: &mut std::vec::IntoIter<HeapAccess<'a>>,
        count: usize,
    ) -> Option<Self::Columns<'a>>;

    fn next<'a>(columns: &mut Self::Columns<'a>) -> Option<Self::Item<'a>>;
}

impl Query for () {
    type Item<'a> = ();
    /// Rows left in the archetype.
    type Columns<'a> = usize;
    const HAS_MUTABLE: bool = false;

    fn access(_registry: &TypeRegistry) -> Option<Vec<(ComponentTypeId, bool)>> {
        Some(Vec::new())
    }

    fn columns<'a>(_heaps: &mut std::vec::IntoIter<HeapAccess<'a>>, count: usize) -> Option<usize> {
        Some(count)
    }

    fn next<'a>(remaining: &mut Self::Columns<'a>) -> Option<Self::Item<'a>> {
        *remaining = remaining.checked_sub(1)?;
        Some(())
    }
}

macro_rules! impl_query_tuple {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: QueryItem),+> Query for ($($name,)+) {
            type Item<'a> = ($($name::Item<'a>,)+);
            type Columns<'a> = ($($name::Column<'a>,)+);
            const HAS_MUTABLE: bool = false $(|| $name::MUTABLE)+;

            fn access(registry: &TypeRegistry) -> Option<Vec<(ComponentTypeId, bool)>> {
                Some(vec![$(($name::component_type_id(registry)?, $name::MUTABLE)),+])
            }

            fn columns<'a>(
                heaps: &mut std::vec::IntoIter<HeapAccess<'a>>,
                count: usize,
            ) -> Option<Self::Columns<'a>> {
                Some(($($name::column(heaps.next()?, count)?,)+))
            }

            fn next<'a>(columns: &mut Self::Columns<'a>) -> Option<Self::Item<'a>> {
                Some(($($name::next(&mut columns.$idx)?,)+))
            }
        }
    };
}

impl_query_tuple!(A: 0);
impl_query_tuple!(A: 0, B: 1);
impl_query_tuple!(A: 0, B: 1, C: 2);
impl_query_tuple!(A: 0, B: 1, C: 2, D: 3);

/// Reject a type that is written through one item and also read or written
/// through another.
fn validate_no_access_conflicts(access: &[(ComponentTypeId, bool)]) {
    for (i, (type_id, mutable)) in access.iter().enumerate() {
        for (other, other_mutable) in &access[i + 1..] {
            if type_id == other && (*mutable || *other_mutable) {
                panic!(
                    "query contains overlapping read and mutable access to the same component type"
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// QueryFilter
// ---------------------------------------------------------------------------

/// Signature constraints of a query.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QueryFilter {
    /// Components and tags every matching archetype holds.
    pub all: Signature,
    /// Components and tags no matching archetype holds.
    pub none: Signature,
    pub include_disabled: bool,
}

impl QueryFilter {
    pub fn matches(&self, signature: &Signature) -> bool {
        signature.contains_all(&self.all) && !signature.intersects(&self.none)
    }
}

/// A `has_value` condition: resolves to the entities holding the value.
struct ValueCondition {
    type_id: ComponentTypeId,
    lookup: Box<dyn Fn(&EntityStore) -> Vec<EntityId> + Send + Sync>,
}

fn scan_values<T: IndexedComponent>(
    store: &EntityStore,
    type_id: ComponentTypeId,
    value: &T::Value,
) -> Vec<EntityId> {
    let mut found = Vec::new();
    for archetype in store.graph.iter() {
        let Some(column) = archetype.column::<T>(type_id) else {
            continue;
        };
        found.extend(
            archetype
                .entities()
                .iter()
                .zip(column)
                .filter(|(_, component)| component.index_value() == *value)
                .map(|(entity, _)| *entity),
        );
    }
    found
}

// ---------------------------------------------------------------------------
// QueryBuilder
// ---------------------------------------------------------------------------

/// Collects the filter of a query. Errors (unregistered types) are kept and
/// reported by [`build`](Self::build).
pub struct QueryBuilder<'s, Q: Query> {
    store: &'s EntityStore,
    filter: QueryFilter,
    conditions: Vec<ValueCondition>,
    error: Option<StoreError>,
    _marker: PhantomData<fn() -> Q>,
}

impl<'s, Q: Query> QueryBuilder<'s, Q> {
    fn component<T: Component>(&mut self) -> Option<ComponentTypeId> {
        let id = self.store.registry.component_id::<T>();
        if id.is_none() && self.error.is_none() {
            self.error = Some(self.store.unknown_type(std::any::type_name::<T>()));
        }
        id
    }

    fn tag<T: Tag>(&mut self) -> Option<crate::component::TagTypeId> {
        let id = self.store.registry.tag_id::<T>();
        if id.is_none() && self.error.is_none() {
            self.error = Some(self.store.unknown_type(std::any::type_name::<T>()));
        }
        id
    }

    /// Require component (or relation) `T`.
    pub fn with<T: Component>(mut self) -> Self {
        if let Some(id) = self.component::<T>() {
            self.filter.all = self.filter.all.with_component(id);
        }
        self
    }

    /// Exclude entities holding component (or relation) `T`.
    pub fn without<T: Component>(mut self) -> Self {
        if let Some(id) = self.component::<T>() {
            self.filter.none = self.filter.none.with_component(id);
        }
        self
    }

    pub fn with_tag<T: Tag>(mut self) -> Self {
        if let Some(id) = self.tag::<T>() {
            self.filter.all = self.filter.all.with_tag(id);
        }
        self
    }

    pub fn without_tag<T: Tag>(mut self) -> Self {
        if let Some(id) = self.tag::<T>() {
            self.filter.none = self.filter.none.with_tag(id);
        }
        self
    }

    /// Include entities tagged `Disabled`.
    pub fn with_disabled(mut self) -> Self {
        self.filter.include_disabled = true;
        self
    }

    /// Keep only entities whose `T` has `value`. Uses the value index when
    /// `T` is registered as indexed, a column scan otherwise. Several
    /// conditions match entities satisfying any of them.
    pub fn has_value<T: IndexedComponent>(mut self, value: T::Value) -> Self {
        let Some(type_id) = self.component::<T>() else {
            return self;
        };
        self.filter.all = self.filter.all.with_component(type_id);
        self.conditions.push(ValueCondition {
            type_id,
            lookup: Box::new(move |store: &EntityStore| match store.value_index::<T>() {
                Some(index) => index.get(&value).to_vec(),
                None => scan_values::<T>(store, type_id, &value),
            }),
        });
        self
    }

    /// Resolve the matching archetypes.
    pub fn build(self) -> Result<ArchetypeQuery<Q>, StoreError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        let registry = &self.store.registry;
        let access = Q::access(registry)
            .ok_or_else(|| self.store.unknown_type(std::any::type_name::<Q>()))?;
        if Q::HAS_MUTABLE {
            validate_no_access_conflicts(&access);
        }

        let mut filter = self.filter;
        for (type_id, _) in &access {
            if registry.metadata(*type_id).kind == SchemaTypeKind::Relation {
                return Err(StoreError::InvalidOperation(format!(
                    "relation '{}' has no column; use with::<R>() and EntityStore::relations",
                    registry.metadata(*type_id).key
                )));
            }
            filter.all = filter.all.with_component(*type_id);
        }
        let disabled = registry.disabled_tag();
        if !filter.include_disabled && !filter.all.has_tag(disabled) {
            filter.none = filter.none.with_tag(disabled);
        }

        let mut query = ArchetypeQuery {
            store_id: self.store.id(),
            filter,
            type_ids: access.iter().map(|(id, _)| *id).collect(),
            mutable: access.iter().map(|(_, mutable)| *mutable).collect(),
            archetypes: Vec::new(),
            resolved: 0,
            conditions: self.conditions,
            _marker: PhantomData,
        };
        query.refresh(self.store)?;
        Ok(query)
    }
}

impl EntityStore {
    /// Start a query for items `Q`.
    ///
    /// ```ignore
    /// let query = store.query::<(&mut Pos, &Vel)>().without_tag::<Frozen>().build()?;
    /// for (entity, (pos, vel)) in query.iter_mut(&mut store)? {
    ///     pos.x += vel.dx;
    /// }
    /// ```
    pub fn query<Q: Query>(&self) -> QueryBuilder<'_, Q> {
        QueryBuilder {
            store: self,
            filter: QueryFilter::default(),
            conditions: Vec::new(),
            error: None,
            _marker: PhantomData,
        }
    }
}

// ---------------------------------------------------------------------------
// ArchetypeQuery
// ---------------------------------------------------------------------------

/// A resolved query: the filter plus the archetypes matching it at the time
/// of [`refresh`](Self::refresh).
pub struct ArchetypeQuery<Q: Query> {
    store_id: StoreId,
    filter: QueryFilter,
    type_ids: Vec<ComponentTypeId>,
    mutable: Vec<bool>,
    /// Sorted.
    archetypes: Vec<ArchetypeId>,
    /// Archetype count of the graph when last resolved.
    resolved: usize,
    conditions: Vec<ValueCondition>,
    _marker: PhantomData<fn() -> Q>,
}

impl<Q: Query> ArchetypeQuery<Q> {
    fn check_store(&self, store: &EntityStore) -> Result<(), StoreError> {
        if store.id() != self.store_id {
            return Err(StoreError::CrossStoreOperation {
                expected: self.store_id,
                actual: store.id(),
            });
        }
        Ok(())
    }

    /// Pick up archetypes created since the last resolve.
    pub fn refresh(&mut self, store: &EntityStore) -> Result<(), StoreError> {
        self.check_store(store)?;
        for archetype in store.graph.iter().skip(self.resolved) {
            if self.filter.matches(archetype.signature()) {
                self.archetypes.push(archetype.id());
            }
        }
        self.resolved = store.graph.len();
        Ok(())
    }

    pub fn filter(&self) -> &QueryFilter {
        &self.filter
    }

    /// The matching archetypes.
    pub fn archetypes(&self) -> &[ArchetypeId] {
        &self.archetypes
    }

    pub fn has_value_conditions(&self) -> bool {
        !self.conditions.is_empty()
    }

    /// Union of all value conditions, or `None` without conditions.
    fn candidates(&self, store: &EntityStore) -> Option<HashSet<EntityId>> {
        if self.conditions.is_empty() {
            return None;
        }
        let mut set = HashSet::new();
        for condition in &self.conditions {
            set.extend((condition.lookup)(store));
        }
        Some(set)
    }

    /// Matching archetypes, narrowed to those holding a candidate.
    fn visit_list(
        &self,
        store: &EntityStore,
        candidates: Option<&HashSet<EntityId>>,
    ) -> Vec<ArchetypeId> {
        match candidates {
            None => self.archetypes.clone(),
            Some(candidates) => {
                let holding: HashSet<ArchetypeId> = candidates
                    .iter()
                    .filter_map(|id| store.location(*id).ok())
                    .map(|loc| loc.archetype_id)
                    .collect();
                self.archetypes
                    .iter()
                    .copied()
                    .filter(|id| holding.contains(id))
                    .collect()
            }
        }
    }

    fn check_mutable_items(&self, store: &EntityStore) -> Result<(), StoreError> {
        for (type_id, mutable) in self.type_ids.iter().zip(&self.mutable) {
            let info = store.registry.metadata(*type_id);
            if *mutable && info.is_indexed {
                return Err(StoreError::InvalidOperation(format!(
                    "indexed component '{}' cannot be queried mutably; use add_component",
                    info.key
                )));
            }
        }
        Ok(())
    }

    /// Number of matching entities.
    pub fn count(&self, store: &EntityStore) -> Result<usize, StoreError> {
        self.check_store(store)?;
        let count = match self.candidates(store) {
            None => self
                .archetypes
                .iter()
                .map(|id| store.graph.get(*id).count())
                .sum(),
            Some(candidates) => candidates
                .iter()
                .filter_map(|id| store.location(*id).ok())
                .filter(|loc| self.archetypes.binary_search(&loc.archetype_id).is_ok())
                .count(),
        };
        Ok(count)
    }

    /// Iterate read-only.
    ///
    /// # Panics
    ///
    /// If `Q` contains `&mut T` items; use [`iter_mut`](Self::iter_mut).
    pub fn iter<'a>(&'a self, store: &'a EntityStore) -> Result<QueryIter<'a, Q>, StoreError> {
        assert!(
            !Q::HAS_MUTABLE,
            "ArchetypeQuery::iter() cannot be used with mutable query items (&mut T). \
             Use ArchetypeQuery::iter_mut() instead, which requires &mut EntityStore."
        );
        self.check_store(store)?;
        let candidates = self.candidates(store);
        let archetypes = self.visit_list(store, candidates.as_ref());
        Ok(QueryIter {
            graph: &store.graph,
            type_ids: &self.type_ids,
            archetypes: archetypes.into_iter(),
            candidates,
            current: None,
        })
    }

    /// Iterate with mutable items.
    pub fn iter_mut<'a>(
        &'a self,
        store: &'a mut EntityStore,
    ) -> Result<QueryIterMut<'a, Q>, StoreError> {
        self.check_store(store)?;
        self.check_mutable_items(store)?;
        let candidates = self.candidates(store);
        let visit = self.visit_list(store, candidates.as_ref());
        let archetypes: Vec<&'a mut Archetype> = store
            .graph
            .iter_mut()
            .filter(|archetype| visit.binary_search(&archetype.id()).is_ok())
            .collect();
        Ok(QueryIterMut {
            type_ids: &self.type_ids,
            archetypes: archetypes.into_iter(),
            candidates,
            current: None,
        })
    }

    /// Call `f` for every matching entity with mutable items.
    pub fn for_each_mut<'a, F>(
        &'a self,
        store: &'a mut EntityStore,
        mut f: F,
    ) -> Result<(), StoreError>
    where
        F: FnMut(EntityId, Q::Item<'a>),
    {
        for (entity, item) in self.iter_mut(store)? {
            f(entity, item);
        }
        Ok(())
    }

    /// Column slices of `T` per non-empty matching archetype, with the entity
    /// ids of each row.
    pub fn chunks<'a, T: Component>(
        &self,
        store: &'a EntityStore,
    ) -> Result<Vec<(&'a [EntityId], &'a [T])>, StoreError> {
        self.check_store(store)?;
        if !self.conditions.is_empty() {
            return Err(StoreError::InvalidOperation(
                "chunks() is not available for queries with has_value conditions".to_string(),
            ));
        }
        let type_id = store
            .registry
            .component_id::<T>()
            .ok_or_else(|| store.unknown_type(std::any::type_name::<T>()))?;
        let mut chunks = Vec::with_capacity(self.archetypes.len());
        for id in &self.archetypes {
            let archetype = store.graph.get(*id);
            if archetype.is_empty() {
                continue;
            }
            if let Some(column) = archetype.column::<T>(type_id) {
                chunks.push((archetype.entities(), column));
            }
        }
        Ok(chunks)
    }

    /// Ids of all matching entities.
    pub fn entities(&self, store: &EntityStore) -> Result<Vec<EntityId>, StoreError> {
        self.check_store(store)?;
        let candidates = self.candidates(store);
        let mut ids = Vec::new();
        for id in self.visit_list(store, candidates.as_ref()) {
            let entities = store.graph.get(id).entities();
            match &candidates {
                None => ids.extend_from_slice(entities),
                Some(candidates) => ids.extend(entities.iter().filter(|e| candidates.contains(e))),
            }
        }
        Ok(ids)
    }

    /// Component types of the value conditions.
    pub fn value_condition_types(&self) -> impl Iterator<Item = ComponentTypeId> + '_ {
        self.conditions.iter().map(|c| c.type_id)
    }
}

impl<Q: Query> std::fmt::Debug for ArchetypeQuery<Q> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchetypeQuery")
            .field("store", &self.store_id)
            .field("filter", &self.filter)
            .field("archetypes", &self.archetypes)
            .field("conditions", &self.conditions.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// QueryIter (read-only)
// ---------------------------------------------------------------------------

/// Yields `(EntityId, Q::Item)` for every matching entity.
pub struct QueryIter<'a, Q: Query> {
    graph: &'a ArchetypeGraph,
    type_ids: &'a [ComponentTypeId],
    archetypes: std::vec::IntoIter<ArchetypeId>,
    candidates: Option<HashSet<EntityId>>,
    /// Entity ids, next row and columns of the current archetype.
    current: Option<(&'a [EntityId], usize, Q::Columns<'a>)>,
}

impl<'a, Q: Query> Iterator for QueryIter<'a, Q> {
    type Item = (EntityId, Q::Item<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((entities, row, columns)) = &mut self.current {
                if let Some(item) = Q::next(columns) {
                    let entity = entities[*row];
                    *row += 1;
                    if self.candidates.as_ref().map_or(true, |c| c.contains(&entity)) {
                        return Some((entity, item));
                    }
                    continue;
                }
            }
            let archetype = self.graph.get(self.archetypes.next()?);
            let heaps: Option<Vec<HeapAccess<'a>>> = self
                .type_ids
                .iter()
                .map(|id| archetype.heap(*id).map(HeapAccess::Shared))
                .collect();
            self.current = heaps
                .and_then(|heaps| Q::columns(&mut heaps.into_iter(), archetype.count()))
                .map(|columns| (archetype.entities(), 0, columns));
        }
    }
}

// ---------------------------------------------------------------------------
// QueryIterMut
// ---------------------------------------------------------------------------

/// Yields `(EntityId, Q::Item)` with mutable items. Holds the store's
/// archetypes exclusively.
pub struct QueryIterMut<'a, Q: Query> {
    type_ids: &'a [ComponentTypeId],
    archetypes: std::vec::IntoIter<&'a mut Archetype>,
    candidates: Option<HashSet<EntityId>>,
    current: Option<(&'a [EntityId], usize, Q::Columns<'a>)>,
}

impl<'a, Q: Query> Iterator for QueryIterMut<'a, Q> {
    type Item = (EntityId, Q::Item<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((entities, row, columns)) = &mut self.current {
                if let Some(item) = Q::next(columns) {
                    let entity = entities[*row];
                    *row += 1;
                    if self.candidates.as_ref().map_or(true, |c| c.contains(&entity)) {
                        return Some((entity, item));
                    }
                    continue;
                }
            }
            let archetype = self.archetypes.next()?;
            let count = archetype.count();
            let (entities, heaps) = archetype.split_for_query(self.type_ids);
            let heaps: Option<Vec<HeapAccess<'a>>> = heaps.into_iter().collect();
            self.current = heaps
                .and_then(|heaps| Q::columns(&mut heaps.into_iter(), count))
                .map(|columns| (entities, 0, columns));
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
