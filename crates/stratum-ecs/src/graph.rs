//! The archetype graph: signature -> archetype lookup plus a transition cache.
//!
//! Adding or removing one component or tag is an edge from one archetype to
//! another. Edges are resolved once through the signature map and then
//! cached, so repeated structural changes of the same shape skip hashing the
//! full signature.

use std::collections::HashMap;

use tracing::debug;

use crate::archetype::{Archetype, ArchetypeId};
use crate::component::{ComponentTypeId, TagTypeId};
use crate::registry::TypeRegistry;
use crate::signature::Signature;

/// A single-type signature change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    AddComponent(ComponentTypeId),
    RemoveComponent(ComponentTypeId),
    AddTag(TagTypeId),
    RemoveTag(TagTypeId),
}

impl Edge {
    fn apply(self, signature: Signature) -> Signature {
        match self {
            Edge::AddComponent(id) => signature.with_component(id),
            Edge::RemoveComponent(id) => signature.without_component(id),
            Edge::AddTag(id) => signature.with_tag(id),
            Edge::RemoveTag(id) => signature.without_tag(id),
        }
    }
}

/// All archetypes of one store. Archetypes are never removed.
pub struct ArchetypeGraph {
    archetypes: Vec<Archetype>,
    by_signature: HashMap<Signature, ArchetypeId>,
    edges: HashMap<(ArchetypeId, Edge), ArchetypeId>,
    min_capacity: usize,
    shrink_ratio: f64,
}

impl ArchetypeGraph {
    /// Create a graph holding only the empty archetype (id 0).
    pub fn new(registry: &TypeRegistry, min_capacity: usize, shrink_ratio: f64) -> Self {
        let mut graph = Self {
            archetypes: Vec::new(),
            by_signature: HashMap::new(),
            edges: HashMap::new(),
            min_capacity,
            shrink_ratio,
        };
        graph.get_or_create(registry, Signature::EMPTY);
        graph
    }

    /// The archetype for `signature`, created on first use.
    pub fn get_or_create(
        &mut self,
        registry: &TypeRegistry,
        signature: Signature,
    ) -> ArchetypeId {
        if let Some(&id) = self.by_signature.get(&signature) {
            return id;
        }
        let id = ArchetypeId(self.archetypes.len() as u32);
        debug!(
            archetype = ?id,
            signature = %registry.describe(&signature),
            "creating archetype"
        );
        self.archetypes.push(Archetype::new(
            id,
            signature,
            registry,
            self.min_capacity,
            self.shrink_ratio,
        ));
        self.by_signature.insert(signature, id);
        id
    }

    /// Follow `edge` from `from`, creating the target archetype if needed.
    pub fn resolve_edge(
        &mut self,
        registry: &TypeRegistry,
        from: ArchetypeId,
        edge: Edge,
    ) -> ArchetypeId {
        if let Some(&to) = self.edges.get(&(from, edge)) {
            return to;
        }
        let signature = edge.apply(*self.archetypes[from.index()].signature());
        let to = self.get_or_create(registry, signature);
        self.edges.insert((from, edge), to);
        to
    }

    /// The archetype for `signature` if one was ever created. Never creates.
    pub fn find(&self, signature: &Signature) -> Option<ArchetypeId> {
        self.by_signature.get(signature).copied()
    }

    /// Panics on an id this graph did not hand out.
    #[inline]
    pub fn get(&self, id: ArchetypeId) -> &Archetype {
        &self.archetypes[id.index()]
    }

    #[inline]
    pub fn get_mut(&mut self, id: ArchetypeId) -> &mut Archetype {
        &mut self.archetypes[id.index()]
    }

    /// Mutable access to two distinct archetypes at once.
    pub fn pair_mut(
        &mut self,
        a: ArchetypeId,
        b: ArchetypeId,
    ) -> (&mut Archetype, &mut Archetype) {
        assert_ne!(a, b, "pair_mut needs two distinct archetypes");
        if a.index() < b.index() {
            let (left, right) = self.archetypes.split_at_mut(b.index());
            (&mut left[a.index()], &mut right[0])
        } else {
            let (left, right) = self.archetypes.split_at_mut(a.index());
            (&mut right[0], &mut left[b.index()])
        }
    }

    /// Archetypes in creation order, the empty archetype first.
    pub fn iter(&self) -> std::slice::Iter<'_, Archetype> {
        self.archetypes.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> std::slice::IterMut<'_, Archetype> {
        self.archetypes.iter_mut()
    }

    /// Number of archetypes, including the empty one.
    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    /// Number of cached transitions.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Sum of all archetype capacities.
    pub fn capacity_sum(&self) -> usize {
        self.archetypes.iter().map(Archetype::capacity).sum()
    }
}

impl std::fmt::Debug for ArchetypeGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchetypeGraph")
            .field("archetypes", &self.archetypes.len())
            .field("edges", &self.edges.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Component, Tag};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
    struct Pos {
        x: f32,
        y: f32,
    }
    impl Component for Pos {}

    struct Enemy;
    impl Tag for Enemy {}

    fn setup() -> (TypeRegistry, ComponentTypeId, TagTypeId) {
        let mut registry = TypeRegistry::new();
        let pos = registry.register_component::<Pos>("pos");
        let enemy = registry.register_tag::<Enemy>("Enemy");
        (registry, pos, enemy)
    }

    #[test]
    fn empty_archetype_is_zero() {
        let (registry, _, _) = setup();
        let graph = ArchetypeGraph::new(&registry, 512, 0.0);
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.find(&Signature::EMPTY), Some(ArchetypeId::EMPTY));
        assert!(graph.get(ArchetypeId::EMPTY).signature().is_empty());
    }

    #[test]
    fn one_archetype_per_signature() {
        let (registry, pos, enemy) = setup();
        let mut graph = ArchetypeGraph::new(&registry, 512, 0.0);
        let sig = Signature::new().with_component(pos).with_tag(enemy);
        let a = graph.get_or_create(&registry, sig);
        let b = graph.get_or_create(&registry, sig);
        assert_eq!(a, b);
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn edges_are_cached_and_consistent() {
        let (registry, pos, enemy) = setup();
        let mut graph = ArchetypeGraph::new(&registry, 512, 0.0);
        let with_pos = graph.resolve_edge(&registry, ArchetypeId::EMPTY, Edge::AddComponent(pos));
        let with_both = graph.resolve_edge(&registry, with_pos, Edge::AddTag(enemy));
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(
            graph.resolve_edge(&registry, ArchetypeId::EMPTY, Edge::AddComponent(pos)),
            with_pos
        );
        assert_eq!(graph.edge_count(), 2);

        let back = graph.resolve_edge(&registry, with_both, Edge::RemoveComponent(pos));
        assert_eq!(*graph.get(back).signature(), Signature::new().with_tag(enemy));
        let empty = graph.resolve_edge(&registry, back, Edge::RemoveTag(enemy));
        assert_eq!(empty, ArchetypeId::EMPTY);
    }

    #[test]
    fn pair_mut_in_both_orders() {
        let (registry, pos, _) = setup();
        let mut graph = ArchetypeGraph::new(&registry, 512, 0.0);
        let a = graph.get_or_create(&registry, Signature::new().with_component(pos));
        let (x, y) = graph.pair_mut(ArchetypeId::EMPTY, a);
        assert_eq!((x.id(), y.id()), (ArchetypeId::EMPTY, a));
        let (x, y) = graph.pair_mut(a, ArchetypeId::EMPTY);
        assert_eq!((x.id(), y.id()), (a, ArchetypeId::EMPTY));
    }

    #[test]
    fn capacity_sum_counts_every_archetype() {
        let (registry, pos, _) = setup();
        let mut graph = ArchetypeGraph::new(&registry, 512, 0.0);
        graph.get_or_create(&registry, Signature::new().with_component(pos));
        assert_eq!(graph.capacity_sum(), 1024);
    }
}
