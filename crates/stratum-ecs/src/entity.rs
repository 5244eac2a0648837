//! Entity identifiers, store handles and id allocation.
//!
//! An [`EntityId`] is a dense, reusable `u32`. Id `0` is the null id and is
//! never handed out. Deleted ids go to a FIFO recycle pool and are reused
//! before the next fresh integer.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::archetype::ArchetypeId;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// A dense entity identifier, unique within one store while the entity lives.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub(crate) u32);

impl EntityId {
    /// The reserved null id.
    pub const NULL: EntityId = EntityId(0);

    #[inline]
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// StoreId / Entity
// ---------------------------------------------------------------------------

static NEXT_STORE_ID: AtomicU32 = AtomicU32::new(1);

/// Process-unique identity of an [`EntityStore`](crate::store::EntityStore).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreId(u32);

impl StoreId {
    pub(crate) fn next() -> Self {
        Self(NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store#{}", self.0)
    }
}

/// An entity id bound to the store that created it.
///
/// Store operations taking an `Entity` reject handles from other stores with
/// [`StoreError::CrossStoreOperation`](crate::StoreError::CrossStoreOperation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Entity {
    id: EntityId,
    store: StoreId,
}

impl Entity {
    pub(crate) fn new(id: EntityId, store: StoreId) -> Self {
        Self { id, store }
    }

    #[inline]
    pub fn id(&self) -> EntityId {
        self.id
    }

    #[inline]
    pub fn store(&self) -> StoreId {
        self.store
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "id: {}", self.id.0)
    }
}

// ---------------------------------------------------------------------------
// EntityLocation
// ---------------------------------------------------------------------------

/// Where an entity lives: which archetype and which row within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntityLocation {
    pub archetype_id: ArchetypeId,
    pub row: usize,
}

// ---------------------------------------------------------------------------
// EntityAllocator
// ---------------------------------------------------------------------------

/// Hands out entity ids: recycled ids first (FIFO), then the next integer not
/// already taken by an explicitly chosen id.
#[derive(Debug)]
pub(crate) struct EntityAllocator {
    free_ids: VecDeque<u32>,
    next_id: u32,
}

impl EntityAllocator {
    pub fn new() -> Self {
        Self {
            free_ids: VecDeque::new(),
            next_id: 1,
        }
    }

    /// Allocate an id. `in_use` reports ids claimed through [`reserve`](Self::reserve)
    /// so the sequential counter skips them.
    pub fn allocate(&mut self, in_use: impl Fn(u32) -> bool) -> EntityId {
        // A pooled id may have been handed out again by the counter after an
        // explicit id was freed.
        while let Some(id) = self.free_ids.pop_front() {
            if !in_use(id) {
                return EntityId(id);
            }
        }
        while in_use(self.next_id) {
            self.next_id += 1;
        }
        let id = self.next_id;
        self.next_id += 1;
        EntityId(id)
    }

    /// Claim a specific free id. The caller has checked it is not in use.
    pub fn reserve(&mut self, id: EntityId) {
        if let Some(pos) = self.free_ids.iter().position(|free| *free == id.0) {
            self.free_ids.remove(pos);
        }
    }

    /// Return an id to the recycle pool.
    pub fn free(&mut self, id: EntityId) {
        self.free_ids.push_back(id.0);
    }

    /// Ids currently waiting to be recycled.
    pub fn recycled(&self) -> usize {
        self.free_ids.len()
    }
}

impl Default for EntityAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
