//! Archetype storage.
//!
//! An [`Archetype`] stores all entities sharing one exact [`Signature`].
//! Components are laid out Structure-of-Arrays: one heap per (non-relation)
//! component type, sorted by [`ComponentTypeId`], plus a parallel entity id
//! array. Live rows are dense in `[0, count)`; every heap is
//! `capacity + padding` long and rows past `count` hold default values.
//!
//! Removal is swap-remove: the last row moves into the hole, so exactly one
//! other entity changes slot and the caller patches its location.

use tracing::debug;

use crate::component::{Component, ComponentTypeId, SchemaTypeKind};
use crate::entity::EntityId;
use crate::heap::{typed, typed_mut, ComponentHeap, HeapAccess};
use crate::registry::TypeRegistry;
use crate::signature::Signature;

// ---------------------------------------------------------------------------
// ArchetypeId
// ---------------------------------------------------------------------------

/// Identifies an archetype within a store. Indexes `ArchetypeGraph::archetypes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchetypeId(pub(crate) u32);

impl ArchetypeId {
    /// The archetype of entities without components or tags.
    pub const EMPTY: ArchetypeId = ArchetypeId(0);

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// ---------------------------------------------------------------------------
// Archetype
// ---------------------------------------------------------------------------

/// Entities sharing one signature, stored column-wise.
pub struct Archetype {
    id: ArchetypeId,
    signature: Signature,
    /// Sorted by component type. Invariant: `heap_types[i] == heaps[i].component_type()`.
    heap_types: Vec<ComponentTypeId>,
    heaps: Vec<Box<dyn ComponentHeap>>,
    /// Entity at each live row. `entities.len()` is the archetype's count.
    entities: Vec<EntityId>,
    capacity: usize,
    min_capacity: usize,
    shrink_ratio: f64,
}

impl Archetype {
    /// Create an empty archetype with `min_capacity` rows per heap.
    /// Relation components in `signature` get no heap.
    pub fn new(
        id: ArchetypeId,
        signature: Signature,
        registry: &TypeRegistry,
        min_capacity: usize,
        shrink_ratio: f64,
    ) -> Self {
        let mut heap_types = Vec::new();
        let mut heaps = Vec::new();
        // component_ids() is ascending, so heaps come out sorted.
        for type_id in signature.component_ids() {
            let info = registry.metadata(type_id);
            if info.kind != SchemaTypeKind::Component {
                continue;
            }
            let vtable = registry.vtable(type_id);
            heaps.push((vtable.new_heap)(type_id, min_capacity, info.padding.pad_count_512));
            heap_types.push(type_id);
        }
        Self {
            id,
            signature,
            heap_types,
            heaps,
            entities: Vec::with_capacity(min_capacity),
            capacity: min_capacity,
            min_capacity,
            shrink_ratio,
        }
    }

    #[inline]
    fn heap_index(&self, type_id: ComponentTypeId) -> Option<usize> {
        self.heap_types.binary_search(&type_id).ok()
    }

    #[inline]
    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Component types that have a heap here, ascending.
    #[inline]
    pub fn heap_types(&self) -> &[ComponentTypeId] {
        &self.heap_types
    }

    /// Number of live entities.
    #[inline]
    pub fn count(&self) -> usize {
        self.entities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Rows allocated per heap, excluding padding.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The entity ids of the live rows.
    #[inline]
    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    // -- structural operations ---------------------------------------------

    /// Append `entity` as a new row of default values. Doubles every heap when
    /// full. Returns the row.
    pub fn allocate_slot(&mut self, entity: EntityId) -> usize {
        if self.entities.len() == self.capacity {
            self.set_capacity(self.capacity * 2);
        }
        self.entities.push(entity);
        self.entities.len() - 1
    }

    /// Swap-remove `row`. Returns the entity moved into `row`, if any.
    /// The vacated tail row is reset to default values.
    pub fn release_slot(&mut self, row: usize) -> Option<EntityId> {
        let last = self.entities.len() - 1;
        for heap in &mut self.heaps {
            heap.swap_remove_row(row, last);
        }
        self.entities.swap_remove(row);
        let moved = if row < last {
            Some(self.entities[row])
        } else {
            None
        };
        self.shrink_if_sparse();
        moved
    }

    /// Move the entity at `row` into `target`: shared components are moved,
    /// components only in `self` are dropped, components only in `target`
    /// stay default. Returns `(target_row, moved)` where `moved` is the entity
    /// that took over `row` here.
    pub fn move_entity_to(
        &mut self,
        row: usize,
        target: &mut Archetype,
    ) -> (usize, Option<EntityId>) {
        let entity = self.entities[row];
        let target_row = target.allocate_slot(entity);
        for (type_id, heap) in self.heap_types.iter().zip(self.heaps.iter_mut()) {
            if let Some(t) = target.heap_index(*type_id) {
                heap.move_row_to(row, target.heaps[t].as_mut(), target_row);
            }
        }
        let moved = self.release_slot(row);
        (target_row, moved)
    }

    /// Copy every component of `from` into the fresh row `to` using the
    /// registered copy strategies. The caller checked all of them exist.
    pub(crate) fn copy_row(&mut self, registry: &TypeRegistry, from: usize, to: usize) {
        for (type_id, heap) in self.heap_types.iter().zip(self.heaps.iter_mut()) {
            if let Some(copy) = registry.vtable(*type_id).copy_row {
                copy(heap.as_mut(), from, to);
            }
        }
    }

    /// Halve the capacity while the live rows still fit twice over. A grown
    /// archetype never drops below twice the minimum capacity.
    fn shrink_if_sparse(&mut self) {
        let count = self.entities.len();
        let floor = self.min_capacity * 2;
        if self.capacity <= floor {
            return;
        }
        if count as f64 > self.capacity as f64 * self.shrink_ratio {
            return;
        }
        let mut target = self.capacity;
        while target / 2 >= floor && target / 2 >= count * 2 {
            target /= 2;
        }
        if target < self.capacity {
            debug!(
                archetype = ?self.id,
                from = self.capacity,
                to = target,
                count,
                "shrinking archetype"
            );
            self.set_capacity(target);
            self.entities.shrink_to(target);
        }
    }

    fn set_capacity(&mut self, capacity: usize) {
        for heap in &mut self.heaps {
            heap.resize(capacity);
        }
        self.entities.reserve(capacity.saturating_sub(self.entities.len()));
        self.capacity = capacity;
    }

    /// Grow so at least `additional` more rows fit without reallocation.
    pub fn reserve(&mut self, additional: usize) {
        let needed = self.entities.len() + additional;
        if needed > self.capacity {
            self.set_capacity(needed.next_power_of_two());
        }
    }

    // -- component access ---------------------------------------------------

    pub fn heap(&self, type_id: ComponentTypeId) -> Option<&dyn ComponentHeap> {
        self.heap_index(type_id).map(|i| self.heaps[i].as_ref())
    }

    pub fn heap_mut(&mut self, type_id: ComponentTypeId) -> Option<&mut dyn ComponentHeap> {
        let i = self.heap_index(type_id)?;
        Some(self.heaps[i].as_mut())
    }

    /// The live rows of component `T`.
    pub fn column<T: Component>(&self, type_id: ComponentTypeId) -> Option<&[T]> {
        let count = self.count();
        self.heap(type_id)
            .and_then(typed::<T>)
            .map(|heap| heap.slice(count))
    }

    pub fn column_mut<T: Component>(&mut self, type_id: ComponentTypeId) -> Option<&mut [T]> {
        let count = self.count();
        self.heap_mut(type_id)
            .and_then(typed_mut::<T>)
            .map(|heap| heap.slice_mut(count))
    }

    /// The live rows of `T` rounded up to the type's component multiple, for
    /// lane-wise processing without a remainder loop. The extra rows hold
    /// default values. Falls back to the live rows when the type has no
    /// component multiple. `None` when the heap is too short for the rounded
    /// length, which a store-built archetype never is.
    pub fn padded_column<T: Component>(
        &self,
        registry: &TypeRegistry,
        type_id: ComponentTypeId,
    ) -> Option<&[T]> {
        let multiple = registry.metadata(type_id).padding.component_multiple;
        let count = self.count();
        let heap = self.heap(type_id).and_then(typed::<T>)?;
        let padded = heap.padded();
        let len = if multiple == 0 {
            count
        } else {
            count.div_ceil(multiple) * multiple
        };
        padded.get(..len)
    }

    pub fn get<T: Component>(&self, type_id: ComponentTypeId, row: usize) -> Option<&T> {
        if row >= self.count() {
            return None;
        }
        self.heap(type_id).and_then(typed::<T>).map(|heap| heap.get(row))
    }

    pub fn get_mut<T: Component>(
        &mut self,
        type_id: ComponentTypeId,
        row: usize,
    ) -> Option<&mut T> {
        if row >= self.count() {
            return None;
        }
        self.heap_mut(type_id)
            .and_then(typed_mut::<T>)
            .map(|heap| heap.get_mut(row))
    }

    /// Borrow the heaps for `type_ids` (any order) plus the entity ids, for
    /// column-wise query iteration. A type listed once gets an exclusive
    /// borrow; a type listed several times gets shared borrows in every slot.
    /// A missing type yields `None`.
    pub(crate) fn split_for_query<'a>(
        &'a mut self,
        type_ids: &[ComponentTypeId],
    ) -> (&'a [EntityId], Vec<Option<HeapAccess<'a>>>) {
        let mut slots: Vec<Option<HeapAccess<'a>>> = type_ids.iter().map(|_| None).collect();
        for (type_id, heap) in self.heap_types.iter().zip(self.heaps.iter_mut()) {
            let positions: Vec<usize> = type_ids
                .iter()
                .enumerate()
                .filter(|(_, t)| *t == type_id)
                .map(|(i, _)| i)
                .collect();
            let heap: &'a mut dyn ComponentHeap = heap.as_mut();
            match positions.as_slice() {
                [] => {}
                [pos] => slots[*pos] = Some(HeapAccess::Exclusive(heap)),
                _ => {
                    let shared: &'a dyn ComponentHeap = heap;
                    for pos in positions {
                        slots[pos] = Some(HeapAccess::Shared(shared));
                    }
                }
            }
        }
        (&self.entities, slots)
    }
}

impl std::fmt::Debug for Archetype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archetype")
            .field("id", &self.id)
            .field("signature", &self.signature)
            .field("count", &self.count())
            .field("capacity", &self.capacity)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
