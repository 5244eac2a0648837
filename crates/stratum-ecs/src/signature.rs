//! Fixed-width bitsets describing which components and tags an entity holds.
//!
//! A [`Signature`] is the identity of an archetype: two entities share an
//! archetype exactly when their signatures are equal.

use std::fmt;

use crate::component::{ComponentTypeId, TagTypeId};

/// Maximum number of types of one kind (components or tags) a registry may hold,
/// including the reserved id 0.
pub const MAX_TYPES: usize = 256;

const WORDS: usize = MAX_TYPES / 64;

// ---------------------------------------------------------------------------
// TypeBits
// ---------------------------------------------------------------------------

/// A `MAX_TYPES`-bit set indexed by type id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TypeBits {
    words: [u64; WORDS],
}

impl TypeBits {
    pub const EMPTY: TypeBits = TypeBits { words: [0; WORDS] };

    #[inline]
    fn split(index: usize) -> (usize, u64) {
        debug_assert!(index < MAX_TYPES, "type index {index} out of range");
        (index / 64, 1u64 << (index % 64))
    }

    #[inline]
    pub fn set(&mut self, index: usize) {
        let (word, bit) = Self::split(index);
        self.words[word] |= bit;
    }

    #[inline]
    pub fn clear(&mut self, index: usize) {
        let (word, bit) = Self::split(index);
        self.words[word] &= !bit;
    }

    #[inline]
    pub fn has(&self, index: usize) -> bool {
        let (word, bit) = Self::split(index);
        self.words[word] & bit != 0
    }

    /// True when every bit of `other` is set in `self`.
    #[inline]
    pub fn contains_all(&self, other: &TypeBits) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .all(|(a, b)| a & b == *b)
    }

    #[inline]
    pub fn intersects(&self, other: &TypeBits) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .any(|(a, b)| a & b != 0)
    }

    pub fn union(&self, other: &TypeBits) -> TypeBits {
        let mut out = *self;
        for (a, b) in out.words.iter_mut().zip(other.words.iter()) {
            *a |= b;
        }
        out
    }

    pub fn difference(&self, other: &TypeBits) -> TypeBits {
        let mut out = *self;
        for (a, b) in out.words.iter_mut().zip(other.words.iter()) {
            *a &= !b;
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Set indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(w, &word)| {
            let mut bits = word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let tz = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(w * 64 + tz)
            })
        })
    }
}

impl fmt::Debug for TypeBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

// ---------------------------------------------------------------------------
// TagSet
// ---------------------------------------------------------------------------

/// A set of tag ids, used for bulk tag changes and in tag events.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TagSet(pub(crate) TypeBits);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tag: TagTypeId) -> Self {
        self.insert(tag);
        self
    }

    pub fn insert(&mut self, tag: TagTypeId) {
        self.0.set(tag.index());
    }

    pub fn remove(&mut self, tag: TagTypeId) {
        self.0.clear(tag.index());
    }

    pub fn contains(&self, tag: TagTypeId) -> bool {
        self.0.has(tag.index())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = TagTypeId> + '_ {
        self.0.iter().map(|i| TagTypeId(i as u16))
    }
}

impl FromIterator<TagTypeId> for TagSet {
    fn from_iter<I: IntoIterator<Item = TagTypeId>>(iter: I) -> Self {
        let mut set = TagSet::new();
        for tag in iter {
            set.insert(tag);
        }
        set
    }
}

impl fmt::Debug for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// The component ∪ tag set of an entity. Immutable by convention: every
/// modifier returns a new value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Signature {
    pub(crate) components: TypeBits,
    pub(crate) tags: TypeBits,
}

impl Signature {
    /// The signature of entities without components or tags.
    pub const EMPTY: Signature = Signature {
        components: TypeBits::EMPTY,
        tags: TypeBits::EMPTY,
    };

    pub fn new() -> Self {
        Self::EMPTY
    }

    pub fn has_component(&self, id: ComponentTypeId) -> bool {
        self.components.has(id.index())
    }

    pub fn has_tag(&self, id: TagTypeId) -> bool {
        self.tags.has(id.index())
    }

    pub fn with_component(mut self, id: ComponentTypeId) -> Self {
        self.components.set(id.index());
        self
    }

    pub fn without_component(mut self, id: ComponentTypeId) -> Self {
        self.components.clear(id.index());
        self
    }

    pub fn with_tag(mut self, id: TagTypeId) -> Self {
        self.tags.set(id.index());
        self
    }

    pub fn without_tag(mut self, id: TagTypeId) -> Self {
        self.tags.clear(id.index());
        self
    }

    pub fn with_tags(mut self, tags: &TagSet) -> Self {
        self.tags = self.tags.union(&tags.0);
        self
    }

    pub fn without_tags(mut self, tags: &TagSet) -> Self {
        self.tags = self.tags.difference(&tags.0);
        self
    }

    /// Component ids in ascending order.
    pub fn component_ids(&self) -> impl Iterator<Item = ComponentTypeId> + '_ {
        self.components.iter().map(|i| ComponentTypeId(i as u16))
    }

    /// Tag ids in ascending order.
    pub fn tag_ids(&self) -> impl Iterator<Item = TagTypeId> + '_ {
        self.tags.iter().map(|i| TagTypeId(i as u16))
    }

    pub fn tags(&self) -> TagSet {
        TagSet(self.tags)
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty() && self.tags.is_empty()
    }

    /// True when `self` holds every component and tag of `other`.
    pub fn contains_all(&self, other: &Signature) -> bool {
        self.components.contains_all(&other.components) && self.tags.contains_all(&other.tags)
    }

    /// True when `self` shares at least one component or tag with `other`.
    pub fn intersects(&self, other: &Signature) -> bool {
        self.components.intersects(&other.components) || self.tags.intersects(&other.tags)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signature")
            .field("components", &self.components)
            .field("tags", &self.tags)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_set_clear_has() {
        let mut bits = TypeBits::default();
        bits.set(1);
        bits.set(64);
        bits.set(255);
        assert!(bits.has(1) && bits.has(64) && bits.has(255));
        assert!(!bits.has(2));
        assert_eq!(bits.len(), 3);
        bits.clear(64);
        assert!(!bits.has(64));
        assert_eq!(bits.iter().collect::<Vec<_>>(), vec![1, 255]);
    }

    #[test]
    fn contains_all_and_intersects() {
        let mut a = TypeBits::default();
        a.set(1);
        a.set(2);
        let mut b = TypeBits::default();
        b.set(2);
        assert!(a.contains_all(&b));
        assert!(!b.contains_all(&a));
        assert!(a.intersects(&b));
        assert!(a.contains_all(&TypeBits::EMPTY));
        assert!(!a.intersects(&TypeBits::EMPTY));
    }

    #[test]
    fn signature_modifiers_are_pure() {
        let c = ComponentTypeId(3);
        let t = TagTypeId(2);
        let base = Signature::new();
        let with = base.with_component(c).with_tag(t);
        assert!(base.is_empty());
        assert!(with.has_component(c));
        assert!(with.has_tag(t));
        assert_eq!(with.without_component(c).without_tag(t), base);
        assert_eq!(with.component_ids().collect::<Vec<_>>(), vec![c]);
        assert_eq!(with.tag_ids().collect::<Vec<_>>(), vec![t]);
    }

    #[test]
    fn components_and_tags_do_not_alias() {
        let sig = Signature::new().with_component(ComponentTypeId(1));
        assert!(!sig.has_tag(TagTypeId(1)));
        assert_ne!(sig, Signature::new().with_tag(TagTypeId(1)));
    }

    #[test]
    fn tag_set_bulk_ops() {
        let tags: TagSet = [TagTypeId(1), TagTypeId(4)].into_iter().collect();
        let sig = Signature::new().with_tag(TagTypeId(2)).with_tags(&tags);
        assert_eq!(sig.tag_count(), 3);
        let sig = sig.without_tags(&tags);
        assert_eq!(sig.tag_ids().collect::<Vec<_>>(), vec![TagTypeId(2)]);
        assert_eq!(tags.len(), 2);
        assert!(tags.contains(TagTypeId(4)));
    }
}
