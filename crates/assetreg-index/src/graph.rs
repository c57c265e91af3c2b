//! Dependency graph keyed by asset identifier.
//!
//! Nodes live in a slot arena and refer to each other by [`NodeId`]. Every
//! outgoing edge has a matching referencer entry on its target, and that
//! invariant is maintained by every mutating method here.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use assetreg_core::{
    AssetIdentifier, CategoryMask, DependencyCategory, DependencyProperties, DependencyQuery,
};

/// Handle to a node inside one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Outgoing edge within one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    /// Node the edge points at.
    pub target: NodeId,
    /// Property bits.
    pub properties: DependencyProperties,
}

/// One graph node.
#[derive(Debug, Clone)]
pub struct DependencyNode {
    identifier: AssetIdentifier,
    edges: [Vec<Edge>; DependencyCategory::COUNT],
    referencers: Vec<NodeId>,
}

impl DependencyNode {
    fn new(identifier: AssetIdentifier) -> Self {
        Self {
            identifier,
            edges: Default::default(),
            referencers: Vec::new(),
        }
    }

    /// Identifier of this node.
    pub fn identifier(&self) -> &AssetIdentifier {
        &self.identifier
    }

    /// Outgoing edges of one category.
    pub fn edges(&self, category: DependencyCategory) -> &[Edge] {
        &self.edges[category.index()]
    }

    /// Nodes holding at least one edge to this node.
    pub fn referencers(&self) -> &[NodeId] {
        &self.referencers
    }

    fn has_edges(&self) -> bool {
        self.edges.iter().any(|e| !e.is_empty())
    }

    fn points_to(&self, target: NodeId) -> bool {
        self.edges.iter().flatten().any(|e| e.target == target)
    }
}

/// Canonical, identifier-based form of one edge.
pub type EdgeTuple = (
    AssetIdentifier,
    AssetIdentifier,
    DependencyCategory,
    DependencyProperties,
);

/// Graph of dependency nodes.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<Option<DependencyNode>>,
    lookup: HashMap<AssetIdentifier, NodeId>,
    free: Vec<NodeId>,
    sorted: [bool; DependencyCategory::COUNT],
    referencers_sorted: bool,
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyGraph {
    /// Create an empty graph with sorting enabled everywhere.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            lookup: HashMap::new(),
            free: Vec::new(),
            sorted: [true; DependencyCategory::COUNT],
            referencers_sorted: true,
        }
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    /// Find a node by identifier.
    pub fn find(&self, identifier: &AssetIdentifier) -> Option<NodeId> {
        self.lookup.get(identifier).copied()
    }

    /// Borrow a node.
    pub fn node(&self, id: NodeId) -> Option<&DependencyNode> {
        self.nodes.get(id.index()).and_then(|n| n.as_ref())
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut DependencyNode> {
        self.nodes.get_mut(id.index()).and_then(|n| n.as_mut())
    }

    /// Identifier of a node.
    pub fn identifier(&self, id: NodeId) -> Option<&AssetIdentifier> {
        self.node(id).map(|n| &n.identifier)
    }

    /// Find a node, creating an empty one if needed.
    pub fn create_or_find(&mut self, identifier: &AssetIdentifier) -> NodeId {
        if let Some(id) = self.lookup.get(identifier) {
            return *id;
        }
        let node = DependencyNode::new(identifier.clone());
        let id = match self.free.pop() {
            Some(id) => {
                self.nodes[id.index()] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                NodeId((self.nodes.len() - 1) as u32)
            }
        };
        self.lookup.insert(identifier.clone(), id);
        id
    }

    /// Add an edge. A repeated `(target, category)` edge merges its properties.
    pub fn add_dependency(
        &mut self,
        source: NodeId,
        target: NodeId,
        category: DependencyCategory,
        properties: DependencyProperties,
    ) -> bool {
        if self.node(target).is_none() {
            return false;
        }
        let sorted = self.sorted[category.index()];
        let Some(node) = self.node_mut(source) else {
            return false;
        };
        let list = &mut node.edges[category.index()];
        let position = if sorted {
            list.binary_search_by_key(&target, |e| e.target)
        } else {
            list.iter()
                .position(|e| e.target == target)
                .ok_or(list.len())
        };
        match position {
            Ok(idx) => list[idx].properties |= properties,
            Err(idx) => list.insert(idx, Edge { target, properties }),
        }

        let referencers_sorted = self.referencers_sorted;
        if let Some(target_node) = self.node_mut(target) {
            insert_referencer(&mut target_node.referencers, source, referencers_sorted);
        }
        true
    }

    /// Remove every outgoing edge of `node` in the masked categories.
    ///
    /// The node is dropped from each former target's referencer set unless an
    /// edge in another category still points there.
    pub fn clear_dependencies(&mut self, node: NodeId, mask: CategoryMask) {
        let Some(source) = self.node_mut(node) else {
            return;
        };
        let mut removed_targets = Vec::new();
        for category in mask.categories() {
            removed_targets.extend(source.edges[category.index()].drain(..).map(|e| e.target));
        }
        removed_targets.sort_unstable();
        removed_targets.dedup();

        for target in removed_targets {
            let still_points = self.node(node).is_some_and(|n| n.points_to(target));
            if still_points {
                continue;
            }
            if let Some(target_node) = self.node_mut(target) {
                remove_referencer(&mut target_node.referencers, node);
            }
        }
    }

    /// Drop every outgoing edge while keeping the node's identity and its
    /// referencers, as if it had been re-created empty.
    pub fn reset_node(&mut self, node: NodeId) {
        self.clear_dependencies(node, CategoryMask::all());
    }

    /// Remove a node entirely, including edges that point at it.
    pub fn remove_node(&mut self, node: NodeId) -> bool {
        if self.node(node).is_none() {
            return false;
        }
        self.reset_node(node);
        let referencers = self
            .node(node)
            .map(|n| n.referencers.clone())
            .unwrap_or_default();
        for referencer in referencers {
            if let Some(r) = self.node_mut(referencer) {
                for list in r.edges.iter_mut() {
                    list.retain(|e| e.target != node);
                }
            }
        }
        if let Some(removed) = self.nodes[node.index()].take() {
            self.lookup.remove(&removed.identifier);
            self.free.push(node);
        }
        true
    }

    /// Visit outgoing edges matching `query`.
    pub fn iterate_dependencies(
        &self,
        node: NodeId,
        query: &DependencyQuery,
        mut callback: impl FnMut(&AssetIdentifier, DependencyCategory, DependencyProperties),
    ) {
        let Some(source) = self.node(node) else {
            return;
        };
        for category in query.categories.categories() {
            for edge in &source.edges[category.index()] {
                if !query.matches(category, edge.properties) {
                    continue;
                }
                if let Some(target) = self.identifier(edge.target) {
                    callback(target, category, edge.properties);
                }
            }
        }
    }

    /// Visit referencers whose edge to `node` matches `query`.
    ///
    /// A referencer holding matching edges in several categories is visited
    /// once per category.
    pub fn iterate_referencers(
        &self,
        node: NodeId,
        query: &DependencyQuery,
        mut callback: impl FnMut(&AssetIdentifier, DependencyCategory, DependencyProperties),
    ) {
        let Some(target) = self.node(node) else {
            return;
        };
        for &referencer in &target.referencers {
            let Some(r) = self.node(referencer) else {
                continue;
            };
            for category in query.categories.categories() {
                let edge = r.edges[category.index()].iter().find(|e| e.target == node);
                if let Some(edge) = edge {
                    if query.matches(category, edge.properties) {
                        callback(&r.identifier, category, edge.properties);
                    }
                }
            }
        }
    }

    /// Toggle sorted edge storage for one category.
    ///
    /// Disabling makes bulk insertion append-only; enabling re-sorts every
    /// node's edges of that category in one pass.
    pub fn set_sorting_enabled(&mut self, category: DependencyCategory, enabled: bool) {
        let idx = category.index();
        if self.sorted[idx] == enabled {
            return;
        }
        self.sorted[idx] = enabled;
        if enabled {
            for node in self.nodes.iter_mut().flatten() {
                node.edges[idx].sort_unstable_by_key(|e| e.target);
            }
        }
    }

    /// Toggle sorted referencer storage.
    pub fn set_referencer_sorting_enabled(&mut self, enabled: bool) {
        if self.referencers_sorted == enabled {
            return;
        }
        self.referencers_sorted = enabled;
        if enabled {
            for node in self.nodes.iter_mut().flatten() {
                node.referencers.sort_unstable();
            }
        }
    }

    /// Whether edges of `category` are kept sorted.
    pub fn is_sorting_enabled(&self, category: DependencyCategory) -> bool {
        self.sorted[category.index()]
    }

    /// Remove isolated nodes for which `keep` returns false.
    ///
    /// Returns the number of nodes removed.
    pub fn prune(&mut self, mut keep: impl FnMut(&AssetIdentifier) -> bool) -> usize {
        let doomed: Vec<NodeId> = self
            .lookup
            .values()
            .copied()
            .filter(|id| {
                self.node(*id).is_some_and(|n| {
                    !n.has_edges() && n.referencers.is_empty() && !keep(&n.identifier)
                })
            })
            .collect();
        for id in &doomed {
            self.remove_node(*id);
        }
        doomed.len()
    }

    /// Check the bidirectional edge/referencer invariant.
    pub fn is_consistent(&self) -> bool {
        for (idx, slot) in self.nodes.iter().enumerate() {
            let Some(node) = slot else { continue };
            let id = NodeId(idx as u32);
            for edge in node.edges.iter().flatten() {
                match self.node(edge.target) {
                    Some(target) if target.referencers.contains(&id) => {}
                    _ => return false,
                }
            }
            for referencer in &node.referencers {
                match self.node(*referencer) {
                    Some(r) if r.points_to(id) => {}
                    _ => return false,
                }
            }
            let mut unique = node.referencers.clone();
            unique.sort_unstable();
            unique.dedup();
            if unique.len() != node.referencers.len() {
                return false;
            }
        }
        true
    }

    /// Every edge as identifier tuples, sorted.
    pub fn edges(&self) -> Vec<EdgeTuple> {
        let mut out = Vec::new();
        for node in self.nodes.iter().flatten() {
            for category in [
                DependencyCategory::Content,
                DependencyCategory::SearchableName,
                DependencyCategory::Manage,
            ] {
                for edge in &node.edges[category.index()] {
                    if let Some(target) = self.identifier(edge.target) {
                        out.push((
                            node.identifier.clone(),
                            target.clone(),
                            category,
                            edge.properties,
                        ));
                    }
                }
            }
        }
        out.sort();
        out
    }

    /// Identifiers of every live node.
    pub fn identifiers(&self) -> impl Iterator<Item = &AssetIdentifier> {
        self.lookup.keys()
    }
}

fn insert_referencer(list: &mut Vec<NodeId>, id: NodeId, sorted: bool) {
    if sorted {
        if let Err(idx) = list.binary_search(&id) {
            list.insert(idx, id);
        }
    } else if !list.contains(&id) {
        list.push(id);
    }
}

fn remove_referencer(list: &mut Vec<NodeId>, id: NodeId) {
    if let Some(idx) = list.iter().position(|r| *r == id) {
        list.remove(idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> AssetIdentifier {
        AssetIdentifier::package(name)
    }

    #[test]
    fn test_add_and_iterate() {
        let mut graph = DependencyGraph::new();
        let a = graph.create_or_find(&id("/Game/A"));
        let b = graph.create_or_find(&id("/Game/B"));
        assert_eq!(graph.create_or_find(&id("/Game/A")), a);

        assert!(graph.add_dependency(a, b, DependencyCategory::Content, DependencyProperties::HARD));
        let mut deps = Vec::new();
        graph.iterate_dependencies(a, &DependencyQuery::all(), |t, _, _| deps.push(t.clone()));
        assert_eq!(deps, vec![id("/Game/B")]);

        let mut refs = Vec::new();
        graph.iterate_referencers(b, &DependencyQuery::all(), |r, _, _| refs.push(r.clone()));
        assert_eq!(refs, vec![id("/Game/A")]);
        assert!(graph.is_consistent());
    }

    #[test]
    fn test_duplicate_edge_merges_properties() {
        let mut graph = DependencyGraph::new();
        let a = graph.create_or_find(&id("/Game/A"));
        let b = graph.create_or_find(&id("/Game/B"));
        graph.add_dependency(a, b, DependencyCategory::Content, DependencyProperties::HARD);
        graph.add_dependency(a, b, DependencyCategory::Content, DependencyProperties::GAME);

        let edges = graph.node(a).unwrap().edges(DependencyCategory::Content);
        assert_eq!(edges.len(), 1);
        assert_eq!(
            edges[0].properties,
            DependencyProperties::HARD | DependencyProperties::GAME
        );
        assert_eq!(graph.node(b).unwrap().referencers(), &[a]);
    }

    #[test]
    fn test_clear_keeps_referencer_when_other_category_remains() {
        let mut graph = DependencyGraph::new();
        let a = graph.create_or_find(&id("/Game/A"));
        let b = graph.create_or_find(&id("/Game/B"));
        graph.add_dependency(a, b, DependencyCategory::Content, DependencyProperties::HARD);
        graph.add_dependency(a, b, DependencyCategory::Manage, DependencyProperties::DIRECT);

        graph.clear_dependencies(a, CategoryMask::CONTENT);
        assert_eq!(graph.node(b).unwrap().referencers(), &[a]);
        assert!(graph.is_consistent());

        graph.clear_dependencies(a, CategoryMask::MANAGE);
        assert!(graph.node(b).unwrap().referencers().is_empty());
        assert!(graph.is_consistent());
    }

    #[test]
    fn test_reset_node_preserves_referencers() {
        let mut graph = DependencyGraph::new();
        let a = graph.create_or_find(&id("/Game/A"));
        let b = graph.create_or_find(&id("/Game/B"));
        let c = graph.create_or_find(&id("/Game/C"));
        graph.add_dependency(a, b, DependencyCategory::Content, DependencyProperties::HARD);
        graph.add_dependency(b, c, DependencyCategory::Content, DependencyProperties::empty());

        graph.reset_node(b);
        assert_eq!(graph.find(&id("/Game/B")), Some(b));
        assert_eq!(graph.node(b).unwrap().referencers(), &[a]);
        assert!(graph.node(c).unwrap().referencers().is_empty());
        assert!(graph.is_consistent());
    }

    #[test]
    fn test_unsorted_then_sorted() {
        let mut graph = DependencyGraph::new();
        graph.set_sorting_enabled(DependencyCategory::Content, false);
        let a = graph.create_or_find(&id("/Game/A"));
        let c = graph.create_or_find(&id("/Game/C"));
        let b = graph.create_or_find(&id("/Game/B"));
        graph.add_dependency(a, b, DependencyCategory::Content, DependencyProperties::HARD);
        graph.add_dependency(a, c, DependencyCategory::Content, DependencyProperties::HARD);
        let targets: Vec<_> = graph.node(a).unwrap().edges(DependencyCategory::Content).iter().map(|e| e.target).collect();
        assert_eq!(targets, vec![b, c]);

        graph.set_sorting_enabled(DependencyCategory::Content, true);
        let targets: Vec<_> = graph.node(a).unwrap().edges(DependencyCategory::Content).iter().map(|e| e.target).collect();
        assert_eq!(targets, vec![c, b]);
    }

    #[test]
    fn test_prune_and_slot_reuse() {
        let mut graph = DependencyGraph::new();
        let a = graph.create_or_find(&id("/Game/A"));
        let b = graph.create_or_find(&id("/Game/B"));
        graph.create_or_find(&id("/Game/Lonely"));
        graph.add_dependency(a, b, DependencyCategory::Content, DependencyProperties::HARD);

        assert_eq!(graph.prune(|_| false), 1);
        assert_eq!(graph.len(), 2);
        assert!(graph.find(&id("/Game/Lonely")).is_none());

        let reused = graph.create_or_find(&id("/Game/New"));
        assert_eq!(reused, NodeId(2));
    }

    #[test]
    fn test_remove_node_drops_incoming_edges() {
        let mut graph = DependencyGraph::new();
        let a = graph.create_or_find(&id("/Game/A"));
        let b = graph.create_or_find(&id("/Game/B"));
        graph.add_dependency(a, b, DependencyCategory::Content, DependencyProperties::HARD);

        assert!(graph.remove_node(b));
        assert!(graph.node(a).unwrap().edges(DependencyCategory::Content).is_empty());
        assert!(graph.is_consistent());
        assert!(graph.edges().is_empty());
    }
}
