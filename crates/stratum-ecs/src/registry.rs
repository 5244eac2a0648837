//! The schema type registry.
//!
//! A [`TypeRegistry`] assigns dense ids to component, relation, tag and script
//! types and records per-type metadata and vtables. It is built once, wrapped
//! in an `Arc` and shared by every [`EntityStore`](crate::store::EntityStore)
//! created from it. Ids depend only on registration order, so two processes
//! registering the same types in the same order agree on them; compare
//! [`TypeRegistry::schema_hash`] to check.
//!
//! Registration is idempotent per Rust type. Misuse (the same external key for
//! two types, one type registered as two kinds, more than
//! [`MAX_TYPES`](crate::signature::MAX_TYPES) types of a kind) panics.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use crate::component::{
    Component, ComponentInfo, ComponentTypeId, Disabled, IndexedComponent, Relation,
    SchemaType, SchemaTypeKind, Script, ScriptInfo, ScriptTypeId, StructPadding, Symbol,
    SymbolColor, Tag, TagInfo, TagTypeId,
};
use crate::heap::ComponentVtable;
use crate::signature::{Signature, MAX_TYPES};

/// Clone a script object seen as `&dyn Any`.
pub(crate) type ScriptCopyFn = fn(&dyn Any) -> Option<Box<dyn Any + Send + Sync>>;

fn copy_script_impl<S: Script + Clone>(script: &dyn Any) -> Option<Box<dyn Any + Send + Sync>> {
    script
        .downcast_ref::<S>()
        .map(|s| Box::new(s.clone()) as Box<dyn Any + Send + Sync>)
}

/// A registered schema type by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaRef {
    Component(ComponentTypeId),
    Tag(TagTypeId),
    Script(ScriptTypeId),
}

/// Registry of all schema types known to a set of stores.
pub struct TypeRegistry {
    /// Indexed by `ComponentTypeId - 1`.
    components: Vec<ComponentInfo>,
    /// Parallel to `components`.
    vtables: Vec<ComponentVtable>,
    /// Indexed by `TagTypeId - 1`.
    tags: Vec<TagInfo>,
    /// Indexed by `ScriptTypeId - 1`.
    scripts: Vec<ScriptInfo>,
    /// Parallel to `scripts`.
    script_copy: Vec<Option<ScriptCopyFn>>,
    by_type: HashMap<TypeId, SchemaRef>,
    /// Component, relation and script keys.
    by_key: HashMap<String, SchemaRef>,
    tags_by_name: HashMap<String, TagTypeId>,
}

impl TypeRegistry {
    /// Create a registry holding only the built-in [`Disabled`] tag (id 1).
    pub fn new() -> Self {
        let mut registry = Self {
            components: Vec::new(),
            vtables: Vec::new(),
            tags: Vec::new(),
            scripts: Vec::new(),
            script_copy: Vec::new(),
            by_type: HashMap::new(),
            by_key: HashMap::new(),
            tags_by_name: HashMap::new(),
        };
        let disabled = registry.register_tag::<Disabled>("Disabled");
        registry.set_symbol(
            SchemaRef::Tag(disabled),
            "D",
            Some(SymbolColor::new(150, 150, 150)),
        );
        registry
    }

    // -- registration -------------------------------------------------------

    /// Register a blittable component. Clones are bitwise copies.
    pub fn register_component<T: Component + Copy>(&mut self, key: &str) -> ComponentTypeId {
        self.register_entry::<T>(
            key,
            SchemaTypeKind::Component,
            true,
            ComponentVtable::cloneable::<T>(),
        )
    }

    /// Register a component duplicated with `Clone`.
    pub fn register_cloneable_component<T: Component + Clone>(
        &mut self,
        key: &str,
    ) -> ComponentTypeId {
        self.register_entry::<T>(
            key,
            SchemaTypeKind::Component,
            false,
            ComponentVtable::cloneable::<T>(),
        )
    }

    /// Register a component that cannot be duplicated. Cloning an entity
    /// holding it fails with
    /// [`StoreError::MissingCopyCapability`](crate::StoreError::MissingCopyCapability).
    pub fn register_opaque_component<T: Component>(&mut self, key: &str) -> ComponentTypeId {
        self.register_entry::<T>(
            key,
            SchemaTypeKind::Component,
            false,
            ComponentVtable::opaque::<T>(),
        )
    }

    /// Register a component mirrored in a per-store value index.
    pub fn register_indexed_component<T: IndexedComponent + Clone>(
        &mut self,
        key: &str,
    ) -> ComponentTypeId {
        self.register_entry::<T>(
            key,
            SchemaTypeKind::Component,
            false,
            ComponentVtable::indexed::<T>(),
        )
    }

    /// Register a relation type. Relations share the component id space.
    pub fn register_relation<R: Relation + Clone>(&mut self, key: &str) -> ComponentTypeId {
        self.register_entry::<R>(
            key,
            SchemaTypeKind::Relation,
            false,
            ComponentVtable::relation::<R>(),
        )
    }

    fn register_entry<T: Component>(
        &mut self,
        key: &str,
        kind: SchemaTypeKind,
        is_blittable: bool,
        vtable: ComponentVtable,
    ) -> ComponentTypeId {
        let rust_type = TypeId::of::<T>();
        if let Some(existing) = self.by_type.get(&rust_type) {
            return match existing {
                SchemaRef::Component(id) if self.metadata(*id).kind == kind => *id,
                other => panic!(
                    "type '{}' is already registered as {:?}",
                    std::any::type_name::<T>(),
                    other
                ),
            };
        }
        self.claim_key(key);
        assert!(
            self.components.len() + 1 < MAX_TYPES,
            "too many component types (max {})",
            MAX_TYPES - 1
        );

        let id = ComponentTypeId((self.components.len() + 1) as u16);
        let type_name = std::any::type_name::<T>();
        let size = std::mem::size_of::<T>();
        self.components.push(ComponentInfo {
            id,
            kind,
            key: key.to_owned(),
            type_name,
            size,
            align: std::mem::align_of::<T>(),
            is_blittable,
            is_copyable: vtable.copy_row.is_some(),
            is_indexed: vtable.new_index.is_some(),
            padding: StructPadding::for_size(size),
            symbol: Symbol::from_type_name(type_name),
            type_id: rust_type,
        });
        self.vtables.push(vtable);
        self.by_type.insert(rust_type, SchemaRef::Component(id));
        self.by_key.insert(key.to_owned(), SchemaRef::Component(id));
        id
    }

    /// Register a tag type under `name`.
    pub fn register_tag<T: Tag>(&mut self, name: &str) -> TagTypeId {
        let rust_type = TypeId::of::<T>();
        if let Some(existing) = self.by_type.get(&rust_type) {
            return match existing {
                SchemaRef::Tag(id) => *id,
                other => panic!(
                    "type '{}' is already registered as {:?}",
                    std::any::type_name::<T>(),
                    other
                ),
            };
        }
        if self.tags_by_name.contains_key(name) {
            panic!("tag name '{}' is already registered for a different type", name);
        }
        assert!(
            self.tags.len() + 1 < MAX_TYPES,
            "too many tag types (max {})",
            MAX_TYPES - 1
        );

        let id = TagTypeId((self.tags.len() + 1) as u16);
        let type_name = std::any::type_name::<T>();
        self.tags.push(TagInfo {
            id,
            name: name.to_owned(),
            type_name,
            symbol: Symbol::from_type_name(type_name),
            type_id: rust_type,
        });
        self.by_type.insert(rust_type, SchemaRef::Tag(id));
        self.tags_by_name.insert(name.to_owned(), id);
        id
    }

    /// Register a script type that can be cloned along with its entity.
    pub fn register_script<S: Script + Clone>(&mut self, key: &str) -> ScriptTypeId {
        self.register_script_entry::<S>(key, Some(copy_script_impl::<S>))
    }

    /// Register a script type without a copy strategy.
    pub fn register_opaque_script<S: Script>(&mut self, key: &str) -> ScriptTypeId {
        self.register_script_entry::<S>(key, None)
    }

    fn register_script_entry<S: Script>(
        &mut self,
        key: &str,
        copy: Option<ScriptCopyFn>,
    ) -> ScriptTypeId {
        let rust_type = TypeId::of::<S>();
        if let Some(existing) = self.by_type.get(&rust_type) {
            return match existing {
                SchemaRef::Script(id) => *id,
                other => panic!(
                    "type '{}' is already registered as {:?}",
                    std::any::type_name::<S>(),
                    other
                ),
            };
        }
        self.claim_key(key);

        let id = ScriptTypeId((self.scripts.len() + 1) as u16);
        let type_name = std::any::type_name::<S>();
        self.scripts.push(ScriptInfo {
            id,
            key: key.to_owned(),
            type_name,
            size: std::mem::size_of::<S>(),
            is_copyable: copy.is_some(),
            symbol: Symbol::from_type_name(type_name),
            type_id: rust_type,
        });
        self.script_copy.push(copy);
        self.by_type.insert(rust_type, SchemaRef::Script(id));
        self.by_key.insert(key.to_owned(), SchemaRef::Script(id));
        id
    }

    fn claim_key(&self, key: &str) {
        if self.by_key.contains_key(key) {
            panic!("schema key '{}' is already registered for a different type", key);
        }
    }

    /// Override the display symbol of a registered type.
    pub fn set_symbol(&mut self, schema: SchemaRef, name: &str, color: Option<SymbolColor>) {
        let symbol = Symbol {
            name: name.to_owned(),
            color,
        };
        match schema {
            SchemaRef::Component(id) => {
                self.components[Self::slot(id.index(), "component")].symbol = symbol
            }
            SchemaRef::Tag(id) => self.tags[Self::slot(id.index(), "tag")].symbol = symbol,
            SchemaRef::Script(id) => self.scripts[Self::slot(id.index(), "script")].symbol = symbol,
        }
    }

    fn slot(index: usize, kind: &str) -> usize {
        match index.checked_sub(1) {
            Some(slot) => slot,
            None => panic!("{kind} id 0 is reserved"),
        }
    }

    // -- lookup -------------------------------------------------------------

    /// Component or relation id of `T`.
    pub fn component_id<T: 'static>(&self) -> Option<ComponentTypeId> {
        match self.by_type.get(&TypeId::of::<T>()) {
            Some(SchemaRef::Component(id)) => Some(*id),
            _ => None,
        }
    }

    pub fn tag_id<T: 'static>(&self) -> Option<TagTypeId> {
        match self.by_type.get(&TypeId::of::<T>()) {
            Some(SchemaRef::Tag(id)) => Some(*id),
            _ => None,
        }
    }

    pub fn script_id<T: 'static>(&self) -> Option<ScriptTypeId> {
        match self.by_type.get(&TypeId::of::<T>()) {
            Some(SchemaRef::Script(id)) => Some(*id),
            _ => None,
        }
    }

    /// Metadata of a registered component or relation type.
    ///
    /// # Panics
    ///
    /// If `id` was not handed out by this registry.
    pub fn metadata(&self, id: ComponentTypeId) -> &ComponentInfo {
        match self.try_metadata(id) {
            Some(info) => info,
            None => panic!("{:?} is not registered", id),
        }
    }

    pub fn try_metadata(&self, id: ComponentTypeId) -> Option<&ComponentInfo> {
        id.index().checked_sub(1).and_then(|i| self.components.get(i))
    }

    /// # Panics
    ///
    /// If `id` was not handed out by this registry.
    pub fn tag_info(&self, id: TagTypeId) -> &TagInfo {
        match id.index().checked_sub(1).and_then(|i| self.tags.get(i)) {
            Some(info) => info,
            None => panic!("{:?} is not registered", id),
        }
    }

    /// # Panics
    ///
    /// If `id` was not handed out by this registry.
    pub fn script_info(&self, id: ScriptTypeId) -> &ScriptInfo {
        match id.index().checked_sub(1).and_then(|i| self.scripts.get(i)) {
            Some(info) => info,
            None => panic!("{:?} is not registered", id),
        }
    }

    pub(crate) fn vtable(&self, id: ComponentTypeId) -> &ComponentVtable {
        &self.vtables[Self::slot(id.index(), "component")]
    }

    pub(crate) fn script_copy(&self, id: ScriptTypeId) -> Option<ScriptCopyFn> {
        self.script_copy
            .get(Self::slot(id.index(), "script"))
            .copied()
            .flatten()
    }

    /// Look up a component, relation or script by its external key.
    pub fn schema_type_by_key(&self, key: &str) -> Option<SchemaType<'_>> {
        match self.by_key.get(key)? {
            SchemaRef::Component(id) => Some(SchemaType::Component(self.metadata(*id))),
            SchemaRef::Script(id) => Some(SchemaType::Script(self.script_info(*id))),
            SchemaRef::Tag(id) => Some(SchemaType::Tag(self.tag_info(*id))),
        }
    }

    /// Component or relation id registered under `key`.
    pub fn component_by_key(&self, key: &str) -> Option<ComponentTypeId> {
        match self.by_key.get(key) {
            Some(SchemaRef::Component(id)) => Some(*id),
            _ => None,
        }
    }

    pub fn tag_by_name(&self, name: &str) -> Option<TagTypeId> {
        self.tags_by_name.get(name).copied()
    }

    /// Id of the built-in [`Disabled`] tag.
    pub fn disabled_tag(&self) -> TagTypeId {
        TagTypeId(1)
    }

    // -- enumeration --------------------------------------------------------

    pub fn components(&self) -> impl Iterator<Item = &ComponentInfo> {
        self.components.iter()
    }

    pub fn tags(&self) -> impl Iterator<Item = &TagInfo> {
        self.tags.iter()
    }

    pub fn scripts(&self) -> impl Iterator<Item = &ScriptInfo> {
        self.scripts.iter()
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }

    pub fn script_count(&self) -> usize {
        self.scripts.len()
    }

    /// All registered schema types: components and relations, then tags,
    /// then scripts, each in id order.
    pub fn schema_types(&self) -> Vec<SchemaType<'_>> {
        self.components
            .iter()
            .map(SchemaType::Component)
            .chain(self.tags.iter().map(SchemaType::Tag))
            .chain(self.scripts.iter().map(SchemaType::Script))
            .collect()
    }

    /// Keys and tag names of all registered types, sorted.
    pub fn registered_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .by_key
            .keys()
            .chain(self.tags_by_name.keys())
            .map(String::as_str)
            .collect();
        keys.sort_unstable();
        keys
    }

    /// BLAKE3 digest over kind, id, key, type name and size of every
    /// registered type, in id order.
    pub fn schema_hash(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        for schema in self.schema_types() {
            hasher.update(&[schema.kind().code()]);
            hasher.update(&(schema.index() as u16).to_le_bytes());
            hasher.update(schema.key().as_bytes());
            hasher.update(&[0]);
            hasher.update(schema.type_name().as_bytes());
            hasher.update(&[0]);
            hasher.update(&(schema.size() as u64).to_le_bytes());
        }
        *hasher.finalize().as_bytes()
    }

    /// Human-readable signature, e.g. `[Position, Velocity, #Disabled]`.
    pub fn describe(&self, signature: &Signature) -> String {
        let names: Vec<String> = signature
            .component_ids()
            .map(|id| match self.try_metadata(id) {
                Some(info) => info.short_name().to_owned(),
                None => format!("{:?}", id),
            })
            .chain(signature.tag_ids().map(|id| {
                match id.index().checked_sub(1).and_then(|i| self.tags.get(i)) {
                    Some(info) => format!("#{}", info.name),
                    None => format!("{:?}", id),
                }
            }))
            .collect();
        format!("[{}]", names.join(", "))
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("components", &self.components.len())
            .field("tags", &self.tags.len())
            .field("scripts", &self.scripts.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
