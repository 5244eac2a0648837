//! Typed component columns ("heaps") and their registration-time vtable.
//!
//! Each archetype owns one [`StructHeap<T>`] per component type in its
//! signature, boxed behind the object-safe [`ComponentHeap`] trait. A heap's
//! physical length is always `capacity + padding`; rows at or beyond the
//! archetype's entity count hold `T::default()`.
//!
//! Generic operations the archetype cannot express through the trait alone
//! (creating a heap for a type id, cloning a row, creating an index or a
//! relation table) go through the [`ComponentVtable`] that the
//! [`TypeRegistry`](crate::registry::TypeRegistry) records per type.

use std::any::Any;

use crate::component::{Component, ComponentTypeId, IndexedComponent, Relation};
use crate::index::{ErasedIndex, ValueIndex};
use crate::relation::{ErasedRelations, RelationTable};

// ---------------------------------------------------------------------------
// ComponentHeap
// ---------------------------------------------------------------------------

/// Object-safe view over a [`StructHeap<T>`].
pub trait ComponentHeap: Send + Sync {
    /// The component type stored in this heap.
    fn component_type(&self) -> ComponentTypeId;

    /// Physical length (`capacity + padding`).
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resize to `capacity + padding` rows. New rows are default values;
    /// truncated rows are dropped.
    fn resize(&mut self, capacity: usize);

    /// Move the value at `last` into `row` and reset `last` to the default.
    /// With `row == last` only the reset happens.
    fn swap_remove_row(&mut self, row: usize, last: usize);

    /// Move the value at `row` into `target_row` of `target`, leaving a
    /// default value behind. `target` must store the same component type.
    fn move_row_to(&mut self, row: usize, target: &mut dyn ComponentHeap, target_row: usize);

    /// Reset `row` to the default value.
    fn reset_row(&mut self, row: usize);

    /// The value at `row` as `&dyn Any` (the concrete `T`).
    fn value_any(&self, row: usize) -> &dyn Any;

    /// Deserialize `value` into `row`.
    fn read_json(&mut self, row: usize, value: &serde_json::Value) -> Result<(), serde_json::Error>;

    /// Serialize the value at `row`.
    fn write_json(&self, row: usize) -> Result<serde_json::Value, serde_json::Error>;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Borrow of one heap handed out for query iteration. A type requested by
/// several read items is handed out `Shared` in each slot.
pub enum HeapAccess<'a> {
    Shared(&'a dyn ComponentHeap),
    Exclusive(&'a mut dyn ComponentHeap),
}

// ---------------------------------------------------------------------------
// StructHeap
// ---------------------------------------------------------------------------

/// Dense column of `T` values.
#[derive(Debug)]
pub struct StructHeap<T: Component> {
    type_id: ComponentTypeId,
    padding: usize,
    components: Vec<T>,
}

impl<T: Component> StructHeap<T> {
    pub fn new(type_id: ComponentTypeId, capacity: usize, padding: usize) -> Self {
        let mut components = Vec::with_capacity(capacity + padding);
        components.resize_with(capacity + padding, T::default);
        Self {
            type_id,
            padding,
            components,
        }
    }

    /// The first `count` rows.
    #[inline]
    pub fn slice(&self, count: usize) -> &[T] {
        &self.components[..count]
    }

    /// The first `count` rows, mutably.
    #[inline]
    pub fn slice_mut(&mut self, count: usize) -> &mut [T] {
        &mut self.components[..count]
    }

    /// All rows including the padding tail.
    #[inline]
    pub fn padded(&self) -> &[T] {
        &self.components
    }

    #[inline]
    pub fn get(&self, row: usize) -> &T {
        &self.components[row]
    }

    #[inline]
    pub fn get_mut(&mut self, row: usize) -> &mut T {
        &mut self.components[row]
    }

    #[inline]
    pub fn set(&mut self, row: usize, value: T) {
        self.components[row] = value;
    }

    pub fn padding(&self) -> usize {
        self.padding
    }
}

impl<T: Component> ComponentHeap for StructHeap<T> {
    fn component_type(&self) -> ComponentTypeId {
        self.type_id
    }

    fn len(&self) -> usize {
        self.components.len()
    }

    fn resize(&mut self, capacity: usize) {
        let len = capacity + self.padding;
        if len < self.components.len() {
            self.components.truncate(len);
            self.components.shrink_to_fit();
        } else {
            self.components.resize_with(len, T::default);
        }
    }

    fn swap_remove_row(&mut self, row: usize, last: usize) {
        if row != last {
            self.components.swap(row, last);
        }
        self.components[last] = T::default();
    }

    fn move_row_to(&mut self, row: usize, target: &mut dyn ComponentHeap, target_row: usize) {
        let value = std::mem::take(&mut self.components[row]);
        match target.as_any_mut().downcast_mut::<StructHeap<T>>() {
            Some(target) => target.components[target_row] = value,
            None => debug_assert!(false, "heap type mismatch for {:?}", self.type_id),
        }
    }

    fn reset_row(&mut self, row: usize) {
        self.components[row] = T::default();
    }

    fn value_any(&self, row: usize) -> &dyn Any {
        &self.components[row]
    }

    fn read_json(
        &mut self,
        row: usize,
        value: &serde_json::Value,
    ) -> Result<(), serde_json::Error> {
        self.components[row] = T::deserialize(value)?;
        Ok(())
    }

    fn write_json(&self, row: usize) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(&self.components[row])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Downcast an erased heap to its concrete column.
#[inline]
pub(crate) fn typed<T: Component>(heap: &dyn ComponentHeap) -> Option<&StructHeap<T>> {
    heap.as_any().downcast_ref::<StructHeap<T>>()
}

#[inline]
pub(crate) fn typed_mut<T: Component>(heap: &mut dyn ComponentHeap) -> Option<&mut StructHeap<T>> {
    heap.as_any_mut().downcast_mut::<StructHeap<T>>()
}

// ---------------------------------------------------------------------------
// ComponentVtable
// ---------------------------------------------------------------------------

/// Registration-time function table for one component or relation type.
///
/// Built by the generic `register_*` calls while the concrete type is still
/// known, then looked up by [`ComponentTypeId`] wherever only the id is
/// available.
#[derive(Clone, Copy)]
pub struct ComponentVtable {
    /// Create an empty heap of the given capacity.
    pub(crate) new_heap: fn(ComponentTypeId, usize, usize) -> Box<dyn ComponentHeap>,
    /// Clone row `from` into row `to` within one heap. `None` when the type
    /// has no copy strategy.
    pub(crate) copy_row: Option<fn(&mut dyn ComponentHeap, usize, usize)>,
    /// Create a value index for an indexed component type.
    pub(crate) new_index: Option<fn() -> Box<dyn ErasedIndex>>,
    /// Create the per-store table for a relation type.
    pub(crate) new_relations: Option<fn(ComponentTypeId) -> Box<dyn ErasedRelations>>,
}

impl std::fmt::Debug for ComponentVtable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentVtable")
            .field("copy_row", &self.copy_row.is_some())
            .field("new_index", &self.new_index.is_some())
            .field("new_relations", &self.new_relations.is_some())
            .finish()
    }
}

fn new_heap_impl<T: Component>(
    type_id: ComponentTypeId,
    capacity: usize,
    padding: usize,
) -> Box<dyn ComponentHeap> {
    Box::new(StructHeap::<T>::new(type_id, capacity, padding))
}

fn copy_row_impl<T: Component + Clone>(heap: &mut dyn ComponentHeap, from: usize, to: usize) {
    if let Some(heap) = typed_mut::<T>(heap) {
        let value = heap.get(from).clone();
        heap.set(to, value);
    }
}

fn new_index_impl<T: IndexedComponent>() -> Box<dyn ErasedIndex> {
    Box::new(ValueIndex::<T>::new())
}

fn new_relations_impl<R: Relation + Clone>(type_id: ComponentTypeId) -> Box<dyn ErasedRelations> {
    Box::new(RelationTable::<R>::new(type_id))
}

impl ComponentVtable {
    /// A type without a copy strategy.
    pub fn opaque<T: Component>() -> Self {
        Self {
            new_heap: new_heap_impl::<T>,
            copy_row: None,
            new_index: None,
            new_relations: None,
        }
    }

    /// A type duplicated with `Clone` (a bitwise copy for `Copy` types).
    pub fn cloneable<T: Component + Clone>() -> Self {
        Self {
            copy_row: Some(copy_row_impl::<T>),
            ..Self::opaque::<T>()
        }
    }

    pub fn indexed<T: IndexedComponent + Clone>() -> Self {
        Self {
            new_index: Some(new_index_impl::<T>),
            ..Self::cloneable::<T>()
        }
    }

    pub fn relation<R: Relation + Clone>() -> Self {
        Self {
            new_relations: Some(new_relations_impl::<R>),
            ..Self::cloneable::<R>()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
