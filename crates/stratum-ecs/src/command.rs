//! Command buffer for deferred structural changes.
//!
//! A [`CommandBuffer`] records structural changes while the store is borrowed
//! elsewhere (typically during query iteration) and plays them back later in
//! FIFO order. Component and tag types are named by their external key, and
//! component values travel as [`serde_json::Value`], so commands can also come
//! from outside the process.
//!
//! Playback never aborts: a command that fails (dead entity, unknown key, bad
//! JSON) is logged with `warn!`, counted in the [`PlaybackReport`] and skipped.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use stratum_ecs::prelude::*;
//! use stratum_ecs::command::CommandBuffer;
//!
//! #[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Health(u32);
//! impl Component for Health {}
//!
//! let mut registry = TypeRegistry::new();
//! registry.register_component::<Health>("health");
//! let mut store = EntityStore::new(Arc::new(registry));
//! let entity = store.create_entity().unwrap().id();
//!
//! let mut cmds = CommandBuffer::new();
//! cmds.add_component(entity, "health", serde_json::json!(50));
//!
//! let report = cmds.playback(&mut store);
//! assert_eq!(report.applied, 1);
//! assert_eq!(store.get_component::<Health>(entity), Some(&Health(50)));
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::entity::EntityId;
use crate::signature::TagSet;
use crate::store::EntityStore;
use crate::StoreError;

// ---------------------------------------------------------------------------
// CommandKind
// ---------------------------------------------------------------------------

/// The mutation a command performs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandKind {
    /// Add a component, or overwrite it when present.
    AddComponent { key: String, value: serde_json::Value },
    RemoveComponent { key: String },
    AddTag { name: String },
    RemoveTag { name: String },
    DeleteEntity,
    /// Create an entity, then apply the listed components and tags to it.
    CreateEntity {
        components: Vec<(String, serde_json::Value)>,
        tags: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// A single deferred mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Target entity. `None` for `CreateEntity`.
    pub target: Option<EntityId>,
    pub kind: CommandKind,
    /// Position within the buffer.
    pub command_index: u32,
    /// Set by playback for `CreateEntity`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub created_entity: Option<EntityId>,
    /// Set by playback when the command mutated the store.
    #[serde(default)]
    pub applied: bool,
}

// ---------------------------------------------------------------------------
// PlaybackReport
// ---------------------------------------------------------------------------

/// Outcome of [`CommandBuffer::playback`].
#[derive(Debug, Clone, Default)]
pub struct PlaybackReport {
    pub applied: usize,
    pub failed: usize,
    /// `(entity, key)` pairs targeted by more than one component command.
    /// The last command wins.
    pub conflicts: usize,
    /// Entities created by `CreateEntity` commands, in order.
    pub created: Vec<EntityId>,
    /// Every played command with its outcome.
    pub commands: Vec<Command>,
}

// ---------------------------------------------------------------------------
// CommandBuffer
// ---------------------------------------------------------------------------

/// Collects commands and plays them back in insertion order.
#[derive(Debug, Default)]
pub struct CommandBuffer {
    commands: Vec<Command>,
    next_index: u32,
}

impl CommandBuffer {
    /// An empty buffer. Command indexes start at 0.
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            next_index: 0,
        }
    }

    /// Queue adding (or overwriting) component `key` with a JSON value.
    pub fn add_component(&mut self, target: EntityId, key: &str, value: serde_json::Value) {
        self.push(
            Some(target),
            CommandKind::AddComponent {
                key: key.to_owned(),
                value,
            },
        );
    }

    /// Queue removing component `key`. Absent components are not a failure.
    pub fn remove_component(&mut self, target: EntityId, key: &str) {
        self.push(Some(target), CommandKind::RemoveComponent { key: key.to_owned() });
    }

    /// Queue adding the tag registered as `name`.
    pub fn add_tag(&mut self, target: EntityId, name: &str) {
        self.push(Some(target), CommandKind::AddTag { name: name.to_owned() });
    }

    pub fn remove_tag(&mut self, target: EntityId, name: &str) {
        self.push(Some(target), CommandKind::RemoveTag { name: name.to_owned() });
    }

    /// Queue deleting `target`. A target that is already gone counts as failed.
    pub fn delete_entity(&mut self, target: EntityId) {
        self.push(Some(target), CommandKind::DeleteEntity);
    }

    /// Queue creating an entity with the given `(key, value)` components and
    /// tag names.
    pub fn create_entity(
        &mut self,
        components: Vec<(String, serde_json::Value)>,
        tags: Vec<String>,
    ) {
        self.push(None, CommandKind::CreateEntity { components, tags });
    }

    /// Append a pre-built command. Its index is reassigned.
    pub fn push_raw(&mut self, mut cmd: Command) {
        cmd.command_index = self.next_index;
        self.next_index += 1;
        self.commands.push(cmd);
    }

    /// Queued commands in insertion order.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Drop every queued command and restart indexing at 0.
    pub fn clear(&mut self) {
        self.commands.clear();
        self.next_index = 0;
    }

    /// Apply every queued command to `store` in insertion order and clear the
    /// buffer.
    pub fn playback(&mut self, store: &mut EntityStore) -> PlaybackReport {
        let mut commands = std::mem::take(&mut self.commands);
        self.next_index = 0;

        let mut report = PlaybackReport {
            conflicts: count_conflicts(&commands),
            ..PlaybackReport::default()
        };

        for cmd in &mut commands {
            let result = match (&cmd.kind, cmd.target) {
                (CommandKind::CreateEntity { components, tags }, _) => {
                    create(store, cmd.command_index, components, tags).map(|entity| {
                        cmd.created_entity = Some(entity);
                        report.created.push(entity);
                    })
                }
                (kind, Some(target)) => apply(store, target, kind),
                (_, None) => Err(StoreError::InvalidOperation(
                    "command has no target entity".to_string(),
                )),
            };

            match result {
                Ok(()) => {
                    cmd.applied = true;
                    report.applied += 1;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        command_index = cmd.command_index,
                        target = ?cmd.target,
                        error = %e,
                        "command playback failed"
                    );
                }
            }
        }

        report.commands = commands;
        report
    }

    fn push(&mut self, target: Option<EntityId>, kind: CommandKind) {
        let index = self.next_index;
        self.next_index += 1;
        self.commands.push(Command {
            target,
            kind,
            command_index: index,
            created_entity: None,
            applied: false,
        });
    }
}

fn count_conflicts(commands: &[Command]) -> usize {
    let mut seen: HashMap<(EntityId, &str), Vec<u32>> = HashMap::new();
    for cmd in commands {
        let key = match &cmd.kind {
            CommandKind::AddComponent { key, .. } | CommandKind::RemoveComponent { key } => key,
            _ => continue,
        };
        if let Some(target) = cmd.target {
            seen.entry((target, key.as_str()))
                .or_default()
                .push(cmd.command_index);
        }
    }
    let mut conflicts = 0;
    for ((entity, key), indices) in &seen {
        if indices.len() > 1 {
            conflicts += 1;
            warn!(
                entity = %entity,
                component = %key,
                command_indices = ?indices,
                "{} commands target the same entity and component (last write wins)",
                indices.len()
            );
        }
    }
    conflicts
}

fn tag_set(store: &EntityStore, name: &str) -> Result<TagSet, StoreError> {
    store
        .registry()
        .tag_by_name(name)
        .map(|tag| TagSet::new().with(tag))
        .ok_or_else(|| store.unknown_type(name))
}

fn apply(store: &mut EntityStore, target: EntityId, kind: &CommandKind) -> Result<(), StoreError> {
    match kind {
        CommandKind::AddComponent { key, value } => {
            store.read_component_json_by_key(target, key, value)?;
        }
        CommandKind::RemoveComponent { key } => {
            let type_id = store
                .registry()
                .component_by_key(key)
                .ok_or_else(|| store.unknown_type(key))?;
            store.remove_component_by_id(target, type_id)?;
        }
        CommandKind::AddTag { name } => {
            let tags = tag_set(store, name)?;
            store.add_tags(target, &tags)?;
        }
        CommandKind::RemoveTag { name } => {
            let tags = tag_set(store, name)?;
            store.remove_tags(target, &tags)?;
        }
        CommandKind::DeleteEntity => store.delete_entity(target)?,
        CommandKind::CreateEntity { .. } => {
            return Err(StoreError::InvalidOperation(
                "create command cannot target an entity".to_string(),
            ))
        }
    }
    Ok(())
}

/// Create the entity, then apply its components and tags. The entity stays
/// even when one of them fails; those failures are only logged.
fn create(
    store: &mut EntityStore,
    command_index: u32,
    components: &[(String, serde_json::Value)],
    tags: &[String],
) -> Result<EntityId, StoreError> {
    let entity = store.create_entity()?.id();
    for (key, value) in components {
        if let Err(e) = store.read_component_json_by_key(entity, key, value) {
            warn!(
                command_index,
                entity = %entity,
                component = %key,
                error = %e,
                "component of created entity failed (entity was still created)"
            );
        }
    }
    for name in tags {
        if let Err(e) = tag_set(store, name).and_then(|tags| store.add_tags(entity, &tags)) {
            warn!(
                command_index,
                entity = %entity,
                tag = %name,
                error = %e,
                "tag of created entity failed (entity was still created)"
            );
        }
    }
    Ok(entity)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Component, Tag};
    use crate::registry::TypeRegistry;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
    struct Position {
        x: f32,
        y: f32,
    }
    impl Component for Position {}

    #[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
    struct Health(u32);
    impl Component for Health {}

    struct Burning;
    impl Tag for Burning {}

    fn setup_store() -> EntityStore {
        let mut registry = TypeRegistry::new();
        registry.register_component::<Position>("position");
        registry.register_component::<Health>("health");
        registry.register_tag::<Burning>("Burning");
        EntityStore::new(Arc::new(registry))
    }

    #[test]
    fn commands_are_indexed_in_order() {
        let entity = EntityId::new(1);
        let mut buf = CommandBuffer::new();
        buf.add_component(entity, "position", json!({"x": 1.0, "y": 2.0}));
        buf.remove_component(entity, "health");
        buf.delete_entity(entity);
        assert_eq!(buf.len(), 3);
        let indices: Vec<u32> = buf.commands().iter().map(|c| c.command_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(matches!(buf.commands()[2].kind, CommandKind::DeleteEntity));
    }

    #[test]
    fn playback_applies_fifo() {
        let mut store = setup_store();
        let e = store.create_entity().unwrap().id();
        let mut buf = CommandBuffer::new();
        buf.add_component(e, "health", json!(10));
        buf.add_component(e, "health", json!(20));
        buf.add_tag(e, "Burning");
        let report = buf.playback(&mut store);
        assert_eq!(report.applied, 3);
        assert_eq!(report.failed, 0);
        assert_eq!(report.conflicts, 1);
        assert_eq!(store.get_component::<Health>(e), Some(&Health(20)));
        assert!(store.has_tag::<Burning>(e));
        assert!(buf.is_empty());
    }

    #[test]
    fn failures_are_counted_not_fatal() {
        let mut store = setup_store();
        let e = store.create_entity().unwrap().id();
        let mut buf = CommandBuffer::new();
        buf.add_component(e, "unknown", json!(1));
        buf.add_component(e, "health", json!("not a number"));
        buf.delete_entity(e);
        buf.delete_entity(e);
        buf.remove_tag(EntityId::new(9), "Burning");
        let report = buf.playback(&mut store);
        assert_eq!(report.applied, 1);
        assert_eq!(report.failed, 4);
        assert!(report.commands[2].applied);
        assert!(!report.commands[3].applied);
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn create_entity_command() {
        let mut store = setup_store();
        let mut buf = CommandBuffer::new();
        buf.create_entity(
            vec![
                ("position".to_owned(), json!({"x": 3.0, "y": 4.0})),
                ("bogus".to_owned(), json!(0)),
            ],
            vec!["Burning".to_owned()],
        );
        let report = buf.playback(&mut store);
        assert_eq!(report.applied, 1);
        assert_eq!(report.created.len(), 1);
        let e = report.created[0];
        assert_eq!(report.commands[0].created_entity, Some(e));
        assert_eq!(store.get_component::<Position>(e), Some(&Position { x: 3.0, y: 4.0 }));
        assert!(store.has_tag::<Burning>(e));
    }

    #[test]
    fn commands_serialize() {
        let mut buf = CommandBuffer::new();
        buf.add_tag(EntityId::new(3), "Burning");
        let json = serde_json::to_string(buf.commands()).unwrap();
        let back: Vec<Command> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, buf.commands());

        let mut other = CommandBuffer::new();
        other.delete_entity(EntityId::new(1));
        other.push_raw(back[0].clone());
        assert_eq!(other.commands()[1].command_index, 1);
    }
}
