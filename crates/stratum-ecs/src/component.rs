//! Component, tag and relation kinds plus their registry metadata.
//!
//! Every type stored in an [`EntityStore`](crate::store::EntityStore) belongs
//! to one [`SchemaTypeKind`]:
//!
//! - **Component**: a fixed-size record stored column-wise in archetype heaps.
//! - **Tag**: a data-less marker that only participates in the signature.
//! - **Relation**: a component additionally keyed by [`Relation::relation_key`];
//!   an entity may own many records of one relation type.
//! - **Script**: a reference-type extension kept outside the archetype heaps
//!   (see [`ScriptTable`](crate::script::ScriptTable)).
//!
//! Types are registered once in a [`TypeRegistry`](crate::registry::TypeRegistry)
//! which hands out the small numeric ids used everywhere else.

use std::any::TypeId;
use std::fmt;
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Kind traits
// ---------------------------------------------------------------------------

/// A data record stored column-wise in archetype heaps.
///
/// `Default` is required because heap rows beyond an archetype's entity count
/// hold default values, and because a component required by a target
/// archetype but absent from the source is default-initialised on a move.
pub trait Component: Default + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// A data-less marker. Tags only affect an entity's [`Signature`](crate::signature::Signature).
pub trait Tag: Send + Sync + 'static {}

/// A component whose value is mirrored in a per-store
/// [`ValueIndex`](crate::index::ValueIndex).
pub trait IndexedComponent: Component {
    /// The indexed value type.
    type Value: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static;

    /// The value this component is indexed under.
    fn index_value(&self) -> Self::Value;
}

/// A component that an entity may hold several times, one record per key.
pub trait Relation: Component {
    /// The key identifying one record among an entity's relations of this type.
    type Key: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static;

    /// The key of this record.
    fn relation_key(&self) -> Self::Key;
}

/// A reference-type extension object. Scripts never live in archetype heaps.
pub trait Script: Send + Sync + 'static {}

/// Built-in tag excluding an entity from queries unless they opt in with
/// [`QueryBuilder::with_disabled`](crate::query::QueryBuilder::with_disabled).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Disabled;

impl Tag for Disabled {}

// ---------------------------------------------------------------------------
// Type ids
// ---------------------------------------------------------------------------

macro_rules! schema_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u16);

        impl $name {
            /// The reserved "none" id.
            pub const NONE: $name = $name(0);

            /// The raw index of this id.
            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }
    };
}

schema_id!(
    /// Identifier of a registered component or relation type. Starts at 1.
    ComponentTypeId
);
schema_id!(
    /// Identifier of a registered tag type. Starts at 1.
    TagTypeId
);
schema_id!(
    /// Identifier of a registered script type. Starts at 1.
    ScriptTypeId
);

/// What kind of schema type a registry entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaTypeKind {
    /// Columnar component.
    Component,
    /// Data-less tag.
    Tag,
    /// Out-of-heap script object.
    Script,
    /// Keyed, multi-valued component.
    Relation,
}

impl SchemaTypeKind {
    pub(crate) fn code(self) -> u8 {
        match self {
            SchemaTypeKind::Component => 1,
            SchemaTypeKind::Tag => 2,
            SchemaTypeKind::Script => 3,
            SchemaTypeKind::Relation => 4,
        }
    }
}

// ---------------------------------------------------------------------------
// Symbols
// ---------------------------------------------------------------------------

/// Display colour used by editor/debug tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl SymbolColor {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Short display symbol for a schema type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub color: Option<SymbolColor>,
}

impl Symbol {
    /// Default symbol: the upper-case letters of the type's short name
    /// (at most two), falling back to its first character.
    pub(crate) fn from_type_name(type_name: &str) -> Self {
        let short = short_type_name(type_name);
        let upper: String = short.chars().filter(|c| c.is_ascii_uppercase()).take(2).collect();
        let name = if upper.is_empty() {
            short.chars().take(1).collect()
        } else {
            upper
        };
        Self { name, color: None }
    }
}

/// Strip module path and generic arguments from `std::any::type_name` output.
pub(crate) fn short_type_name(type_name: &str) -> &str {
    let base = type_name.split('<').next().unwrap_or(type_name);
    base.rsplit("::").next().unwrap_or(base)
}

// ---------------------------------------------------------------------------
// Padding
// ---------------------------------------------------------------------------

/// Upper bound for [`StructPadding::component_multiple`].
pub const MAX_COMPONENT_MULTIPLE: usize = 16;

/// Per-type heap padding, computed once at registration.
///
/// Heaps reserve `pad_count_512` extra default rows so a 64-byte vector load
/// starting at the last live element stays in bounds, and a run of live rows
/// can be rounded up to `component_multiple` elements (a multiple of 64 bytes)
/// and processed without a scalar remainder loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructPadding {
    /// Extra rows for 128-bit (16 byte) lanes.
    pub pad_count_128: usize,
    /// Extra rows for 256-bit (32 byte) lanes.
    pub pad_count_256: usize,
    /// Extra rows for 512-bit (64 byte) lanes.
    pub pad_count_512: usize,
    /// Number of elements spanning a multiple of 64 bytes, or 0 when that
    /// exceeds [`MAX_COMPONENT_MULTIPLE`].
    pub component_multiple: usize,
}

impl StructPadding {
    pub fn for_size(size: usize) -> Self {
        let pad = |lane: usize| {
            if size == 0 || size >= lane {
                0
            } else {
                lane / size - 1
            }
        };
        let component_multiple = if size == 0 {
            0
        } else {
            let multiple = lcm(size, 64) / size;
            if multiple <= MAX_COMPONENT_MULTIPLE {
                multiple
            } else {
                0
            }
        };
        Self {
            pad_count_128: pad(16),
            pad_count_256: pad(32),
            pad_count_512: pad(64),
            component_multiple,
        }
    }
}

fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

fn lcm(a: usize, b: usize) -> usize {
    a / gcd(a, b) * b
}

// ---------------------------------------------------------------------------
// Registry entries
// ---------------------------------------------------------------------------

/// Metadata about a registered component or relation type.
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    pub id: ComponentTypeId,
    /// `Component` or `Relation`.
    pub kind: SchemaTypeKind,
    /// External key used by serializers (e.g. `"pos"`).
    pub key: String,
    /// `std::any::type_name::<T>()`.
    pub type_name: &'static str,
    /// `std::mem::size_of::<T>()`
    pub size: usize,
    /// `std::mem::align_of::<T>()`
    pub align: usize,
    /// Whether values can be duplicated by a plain bitwise copy.
    pub is_blittable: bool,
    /// Whether the type has a registered copy strategy.
    pub is_copyable: bool,
    /// Whether a value index is maintained for this type.
    pub is_indexed: bool,
    pub padding: StructPadding,
    pub symbol: Symbol,
    /// Rust `TypeId` for runtime type checking.
    pub type_id: TypeId,
}

impl ComponentInfo {
    pub fn short_name(&self) -> &str {
        short_type_name(self.type_name)
    }
}

/// Metadata about a registered tag type.
#[derive(Debug, Clone)]
pub struct TagInfo {
    pub id: TagTypeId,
    pub name: String,
    pub type_name: &'static str,
    pub symbol: Symbol,
    pub type_id: TypeId,
}

/// Metadata about a registered script type.
#[derive(Debug, Clone)]
pub struct ScriptInfo {
    pub id: ScriptTypeId,
    pub key: String,
    pub type_name: &'static str,
    pub size: usize,
    pub is_copyable: bool,
    pub symbol: Symbol,
    pub type_id: TypeId,
}

/// A borrowed view over any registry entry, used for schema introspection.
#[derive(Debug, Clone, Copy)]
pub enum SchemaType<'r> {
    Component(&'r ComponentInfo),
    Tag(&'r TagInfo),
    Script(&'r ScriptInfo),
}

impl<'r> SchemaType<'r> {
    pub fn kind(&self) -> SchemaTypeKind {
        match self {
            SchemaType::Component(info) => info.kind,
            SchemaType::Tag(_) => SchemaTypeKind::Tag,
            SchemaType::Script(_) => SchemaTypeKind::Script,
        }
    }

    /// Stable numeric id within the entry's kind.
    pub fn index(&self) -> usize {
        match self {
            SchemaType::Component(info) => info.id.index(),
            SchemaType::Tag(info) => info.id.index(),
            SchemaType::Script(info) => info.id.index(),
        }
    }

    /// External key; the name for tags.
    pub fn key(&self) -> &'r str {
        match self {
            SchemaType::Component(info) => info.key.as_str(),
            SchemaType::Tag(info) => info.name.as_str(),
            SchemaType::Script(info) => info.key.as_str(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            SchemaType::Component(info) => info.type_name,
            SchemaType::Tag(info) => info.type_name,
            SchemaType::Script(info) => info.type_name,
        }
    }

    /// Byte size; tags are always 0.
    pub fn size(&self) -> usize {
        match self {
            SchemaType::Component(info) => info.size,
            SchemaType::Tag(_) => 0,
            SchemaType::Script(info) => info.size,
        }
    }

    pub fn is_blittable(&self) -> bool {
        match self {
            SchemaType::Component(info) => info.is_blittable,
            SchemaType::Tag(_) => true,
            SchemaType::Script(info) => info.is_copyable,
        }
    }

    pub fn symbol(&self) -> &'r Symbol {
        match self {
            SchemaType::Component(info) => &info.symbol,
            SchemaType::Tag(info) => &info.symbol,
            SchemaType::Script(info) => &info.symbol,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_for_small_components() {
        let p = StructPadding::for_size(4);
        assert_eq!(p.pad_count_128, 3);
        assert_eq!(p.pad_count_256, 7);
        assert_eq!(p.pad_count_512, 15);
        assert_eq!(p.component_multiple, 16);
    }

    #[test]
    fn padding_for_odd_sizes() {
        let p = StructPadding::for_size(12);
        assert_eq!(p.pad_count_512, 4);
        // lcm(12, 64) = 192 -> 16 elements
        assert_eq!(p.component_multiple, 16);

        let p = StructPadding::for_size(20);
        // lcm(20, 64) = 320 -> 16 elements
        assert_eq!(p.component_multiple, 16);

        let p = StructPadding::for_size(7);
        // lcm(7, 64) = 448 -> 64 elements, over the limit
        assert_eq!(p.component_multiple, 0);
    }

    #[test]
    fn padding_for_large_and_empty_components() {
        let p = StructPadding::for_size(128);
        assert_eq!(p.pad_count_512, 0);
        assert_eq!(p.component_multiple, 1);

        let p = StructPadding::for_size(0);
        assert_eq!(p.pad_count_512, 0);
        assert_eq!(p.component_multiple, 0);
    }

    #[test]
    fn default_symbols() {
        assert_eq!(Symbol::from_type_name("game::Position").name, "P");
        assert_eq!(Symbol::from_type_name("game::MyComponent1").name, "MC");
        assert_eq!(Symbol::from_type_name("game::health").name, "h");
        assert_eq!(short_type_name("a::b::Wrapper<c::D>"), "Wrapper");
    }

    #[test]
    fn id_debug_format() {
        assert_eq!(format!("{:?}", ComponentTypeId(3)), "ComponentTypeId(3)");
        assert_eq!(TagTypeId::NONE.index(), 0);
    }
}
