//! Structural change events.
//!
//! Handlers are registered on an [`EntityStore`](crate::store::EntityStore)
//! and run synchronously inside the mutating call, in registration order.
//! They see the store read-only. The first handler error stops the chain and
//! is returned from the mutating call as
//! [`StoreError::Handler`](crate::StoreError::Handler); the mutation itself
//! has already been committed at that point.

use std::fmt;

use crate::component::{ComponentTypeId, TagTypeId};
use crate::entity::{EntityId, StoreId};
use crate::signature::{Signature, TagSet};
use crate::store::EntityStore;
use crate::StoreError;

/// Error type returned by event handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Identifies a registered handler for [`EntityStore::remove_handler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

// ---------------------------------------------------------------------------
// Event payloads
// ---------------------------------------------------------------------------

/// Raised after an entity has been placed in its archetype.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityCreated {
    pub entity: EntityId,
    pub store: StoreId,
    pub signature: Signature,
}

/// Raised before an entity is removed; its data is still readable.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDeleted {
    pub entity: EntityId,
    pub store: StoreId,
    pub signature: Signature,
}

/// What happened to a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentChangeAction {
    /// Newly added; the signature changed.
    Added,
    /// Overwritten in place; the signature is unchanged.
    Updated,
    /// Removed; the signature changed.
    Removed,
}

/// Raised after a component was added, updated or removed.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentChanged {
    pub entity: EntityId,
    pub store: StoreId,
    pub component: ComponentTypeId,
    pub action: ComponentChangeAction,
    pub old_signature: Signature,
    pub new_signature: Signature,
}

/// Raised after one or more tags were added or removed.
#[derive(Debug, Clone, PartialEq)]
pub struct TagsChanged {
    pub entity: EntityId,
    pub store: StoreId,
    pub old_signature: Signature,
    pub new_signature: Signature,
}

impl TagsChanged {
    pub fn added(&self) -> TagSet {
        TagSet(self.new_signature.tags.difference(&self.old_signature.tags))
    }

    pub fn removed(&self) -> TagSet {
        TagSet(self.old_signature.tags.difference(&self.new_signature.tags))
    }

    pub fn has_added(&self, tag: TagTypeId) -> bool {
        self.added().contains(tag)
    }
}

impl fmt::Display for EntityCreated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity: {} - event > EntityCreated", self.entity)
    }
}

impl fmt::Display for EntityDeleted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity: {} - event > EntityDeleted", self.entity)
    }
}

impl fmt::Display for ComponentChanged {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "entity: {} - event > {:?} component {}",
            self.entity,
            self.action,
            self.component.index()
        )
    }
}

impl fmt::Display for TagsChanged {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "entity: {} - event > TagsChanged added: {:?} removed: {:?}",
            self.entity,
            self.added(),
            self.removed()
        )
    }
}

// ---------------------------------------------------------------------------
// EventHub
// ---------------------------------------------------------------------------

pub(crate) type Handler<E> =
    Box<dyn Fn(&EntityStore, &E) -> Result<(), HandlerError> + Send + Sync>;

/// Ordered handler lists for each event type.
pub(crate) struct EventHub {
    next_id: u64,
    pub created: Vec<(HandlerId, Handler<EntityCreated>)>,
    pub deleted: Vec<(HandlerId, Handler<EntityDeleted>)>,
    pub component_changed: Vec<(HandlerId, Handler<ComponentChanged>)>,
    pub tags_changed: Vec<(HandlerId, Handler<TagsChanged>)>,
}

impl EventHub {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            created: Vec::new(),
            deleted: Vec::new(),
            component_changed: Vec::new(),
            tags_changed: Vec::new(),
        }
    }

    pub fn next_id(&mut self) -> HandlerId {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn remove(&mut self, id: HandlerId) -> bool {
        fn take<E>(list: &mut Vec<(HandlerId, Handler<E>)>, id: HandlerId) -> bool {
            match list.iter().position(|(h, _)| *h == id) {
                Some(pos) => {
                    list.remove(pos);
                    true
                }
                None => false,
            }
        }
        take(&mut self.created, id)
            || take(&mut self.deleted, id)
            || take(&mut self.component_changed, id)
            || take(&mut self.tags_changed, id)
    }

    pub fn handler_count(&self) -> usize {
        self.created.len()
            + self.deleted.len()
            + self.component_changed.len()
            + self.tags_changed.len()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `handlers` in order, stopping at the first error.
pub(crate) fn dispatch<E>(
    handlers: &[(HandlerId, Handler<E>)],
    store: &EntityStore,
    event: &E,
) -> Result<(), StoreError> {
    for (_, handler) in handlers {
        handler(store, event).map_err(StoreError::Handler)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
