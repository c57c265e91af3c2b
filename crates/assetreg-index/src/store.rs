//! The in-memory index: records, package data, paths and dependencies.

use std::collections::{BTreeSet, HashMap};

use compact_str::CompactString;
use tracing::{debug, trace};

use assetreg_core::{
    AssetIdentifier, AssetRecord, CategoryMask, DependencyCategory, DependencyProperties,
    DependencyQuery, PackageRecord,
};

use crate::filter::CompiledFilter;
use crate::graph::{DependencyGraph, EdgeTuple};
use crate::path_tree::PathTree;

/// Outgoing edge as seen by callers.
pub type Dependency = (AssetIdentifier, DependencyCategory, DependencyProperties);

type IdSet = BTreeSet<AssetIdentifier>;

/// Record store with secondary indexes.
///
/// Mutators report failure through `bool`/`Option` and leave every index
/// consistent.
#[derive(Debug, Default, Clone)]
pub struct IndexStore {
    assets: HashMap<AssetIdentifier, AssetRecord>,
    by_package: HashMap<CompactString, IdSet>,
    by_path: HashMap<CompactString, IdSet>,
    by_type: HashMap<CompactString, IdSet>,
    packages: HashMap<CompactString, PackageRecord>,
    paths: PathTree,
    graph: DependencyGraph,
}

fn index_insert(index: &mut HashMap<CompactString, IdSet>, key: &str, id: &AssetIdentifier) {
    index.entry(key.into()).or_default().insert(id.clone());
}

fn index_remove(index: &mut HashMap<CompactString, IdSet>, key: &str, id: &AssetIdentifier) {
    if let Some(set) = index.get_mut(key) {
        set.remove(id);
        if set.is_empty() {
            index.remove(key);
        }
    }
}

impl IndexStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of asset records.
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Number of package records.
    pub fn package_count(&self) -> usize {
        self.packages.len()
    }

    fn index(&mut self, id: &AssetIdentifier, record: &AssetRecord) {
        index_insert(&mut self.by_package, &record.package_name, id);
        index_insert(&mut self.by_path, record.package_path(), id);
        index_insert(&mut self.by_type, &record.asset_type, id);
    }

    fn unindex(&mut self, id: &AssetIdentifier, record: &AssetRecord) {
        index_remove(&mut self.by_package, &record.package_name, id);
        index_remove(&mut self.by_path, record.package_path(), id);
        index_remove(&mut self.by_type, &record.asset_type, id);
    }

    /// Add a record. Returns `false` if its identifier is already present.
    pub fn add_asset_data(&mut self, record: AssetRecord) -> bool {
        let id = record.identifier();
        if self.assets.contains_key(&id) {
            return false;
        }
        self.index(&id, &record);
        trace!(asset = %id, "Added asset");
        self.assets.insert(id, record);
        true
    }

    /// Replace the record stored under `id`.
    ///
    /// With `keep_removed_tags`, tags present on the old record but absent
    /// from `new` are carried over. The record may move to a new identifier.
    /// Returns `false` if `id` is not present.
    pub fn update_asset_data(
        &mut self,
        id: &AssetIdentifier,
        mut new: AssetRecord,
        keep_removed_tags: bool,
    ) -> bool {
        let Some(old) = self.assets.remove(id) else {
            return false;
        };
        self.unindex(id, &old);
        if keep_removed_tags {
            new.merge_missing_tags(&old);
        }
        let new_id = new.identifier();
        if new_id != *id {
            // A record already living under the target identifier is replaced.
            if let Some(displaced) = self.assets.remove(&new_id) {
                self.unindex(&new_id, &displaced);
            }
        }
        self.index(&new_id, &new);
        self.assets.insert(new_id, new);
        true
    }

    /// Remove a record.
    pub fn remove_asset_data(&mut self, id: &AssetIdentifier) -> Option<AssetRecord> {
        let record = self.assets.remove(id)?;
        self.unindex(id, &record);
        trace!(asset = %id, "Removed asset");
        Some(record)
    }

    /// Look up a record.
    pub fn asset(&self, id: &AssetIdentifier) -> Option<&AssetRecord> {
        self.assets.get(id)
    }

    /// Every record, in no particular order.
    pub fn records(&self) -> impl Iterator<Item = &AssetRecord> {
        self.assets.values()
    }

    fn visit(&self, ids: &IdSet, callback: &mut impl FnMut(&AssetRecord) -> bool) -> bool {
        for id in ids {
            if let Some(record) = self.assets.get(id) {
                if !callback(record) {
                    return false;
                }
            }
        }
        true
    }

    /// Visit records inside one container in identifier order.
    ///
    /// The callback returns `false` to stop.
    pub fn enumerate_by_package(&self, package: &str, mut callback: impl FnMut(&AssetRecord) -> bool) {
        if let Some(ids) = self.by_package.get(package) {
            self.visit(ids, &mut callback);
        }
    }

    /// Visit records whose container lives in `path` (or below it).
    pub fn enumerate_by_path(
        &self,
        path: &str,
        recursive: bool,
        mut callback: impl FnMut(&AssetRecord) -> bool,
    ) {
        let path = assetreg_core::normalize_path(path);
        if !recursive {
            if let Some(ids) = self.by_path.get(&path) {
                self.visit(ids, &mut callback);
            }
            return;
        }
        let mut dirs: Vec<&CompactString> = self
            .by_path
            .keys()
            .filter(|dir| {
                *dir == &path
                    || dir
                        .strip_prefix(path.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .collect();
        dirs.sort();
        for dir in dirs {
            if !self.visit(&self.by_path[dir], &mut callback) {
                return;
            }
        }
    }

    /// Visit records matching a compiled filter.
    ///
    /// Candidates come from the narrowest available index.
    pub fn enumerate_by_filter(
        &self,
        filter: &CompiledFilter,
        mut callback: impl FnMut(&AssetRecord) -> bool,
    ) {
        let mut gate = |record: &AssetRecord| !filter.matches(record) || callback(record);

        if let Some(names) = &filter.package_names {
            for name in names {
                if let Some(ids) = self.by_package.get(name) {
                    if !self.visit(ids, &mut gate) {
                        return;
                    }
                }
            }
            return;
        }
        if let Some(types) = &filter.types {
            for ty in types {
                if let Some(ids) = self.by_type.get(ty) {
                    if !self.visit(ids, &mut gate) {
                        return;
                    }
                }
            }
            return;
        }
        for record in self.assets.values() {
            if !gate(record) {
                return;
            }
        }
    }

    /// Records matching a filter, sorted by identifier.
    pub fn collect_by_filter(&self, filter: &CompiledFilter) -> Vec<AssetRecord> {
        let mut out = Vec::new();
        self.enumerate_by_filter(filter, |record| {
            out.push(record.clone());
            true
        });
        out.sort_by_key(|r| r.identifier());
        out
    }

    /// Package data for a container.
    pub fn package_data(&self, name: &str) -> Option<&PackageRecord> {
        self.packages.get(name)
    }

    /// Package data for a container, inserting an empty record if missing.
    pub fn create_or_get_package_data(&mut self, name: &str) -> &mut PackageRecord {
        self.packages
            .entry(name.into())
            .or_insert_with(|| PackageRecord::new(name))
    }

    /// Every package record, in no particular order.
    pub fn packages(&self) -> impl Iterator<Item = &PackageRecord> {
        self.packages.values()
    }

    /// Names of containers that hold records or package data, sorted.
    pub fn package_names(&self) -> Vec<CompactString> {
        let mut names: BTreeSet<CompactString> = self.by_package.keys().cloned().collect();
        names.extend(self.packages.keys().cloned());
        names.into_iter().collect()
    }

    /// Remove a container: its records, its package data and its outgoing
    /// dependencies.
    ///
    /// Edges other containers hold to it stay in place, so their dependency
    /// lists still name it. Returns the removed records in identifier order.
    pub fn remove_package(&mut self, name: &str) -> Vec<AssetRecord> {
        let ids: Vec<AssetIdentifier> = self
            .by_package
            .get(name)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        let removed: Vec<AssetRecord> = ids
            .iter()
            .filter_map(|id| self.remove_asset_data(id))
            .collect();
        self.packages.remove(name);

        let package_id = AssetIdentifier::package(name);
        if let Some(node) = self.graph.find(&package_id) {
            self.graph.reset_node(node);
            let orphaned = self
                .graph
                .node(node)
                .is_some_and(|n| n.referencers().is_empty());
            if orphaned {
                self.graph.remove_node(node);
            }
        }
        debug!(package = name, assets = removed.len(), "Removed package");
        removed
    }

    /// Replace the dependencies of `source` in the masked categories.
    ///
    /// Returns `true` if the resulting edge list differs from the old one.
    pub fn set_package_dependencies(
        &mut self,
        source: &AssetIdentifier,
        mask: CategoryMask,
        edges: impl IntoIterator<Item = Dependency>,
    ) -> bool {
        let query = DependencyQuery {
            categories: mask,
            ..DependencyQuery::all()
        };
        let before = self.dependencies(source, &query);
        let node = self.graph.create_or_find(source);
        self.graph.clear_dependencies(node, mask);
        for (target, category, properties) in edges {
            if !mask.includes(category) {
                continue;
            }
            let target = self.graph.create_or_find(&target);
            self.graph.add_dependency(node, target, category, properties);
        }
        let after = self.dependencies(source, &query);
        before != after
    }

    /// Add a single edge, creating nodes as needed.
    pub fn add_dependency(
        &mut self,
        source: &AssetIdentifier,
        target: &AssetIdentifier,
        category: DependencyCategory,
        properties: DependencyProperties,
    ) -> bool {
        let source = self.graph.create_or_find(source);
        let target = self.graph.create_or_find(target);
        self.graph.add_dependency(source, target, category, properties)
    }

    /// Outgoing edges of `id` matching `query`, sorted.
    pub fn dependencies(&self, id: &AssetIdentifier, query: &DependencyQuery) -> Vec<Dependency> {
        let mut out = Vec::new();
        if let Some(node) = self.graph.find(id) {
            self.graph.iterate_dependencies(node, query, |target, category, props| {
                out.push((target.clone(), category, props));
            });
        }
        out.sort();
        out
    }

    /// Nodes holding an edge to `id` that matches `query`, sorted and unique.
    pub fn referencers(&self, id: &AssetIdentifier, query: &DependencyQuery) -> Vec<AssetIdentifier> {
        let mut out = BTreeSet::new();
        if let Some(node) = self.graph.find(id) {
            self.graph.iterate_referencers(node, query, |referencer, _, _| {
                out.insert(referencer.clone());
            });
        }
        out.into_iter().collect()
    }

    /// The dependency graph.
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Mutable access to the dependency graph.
    pub fn graph_mut(&mut self) -> &mut DependencyGraph {
        &mut self.graph
    }

    /// Every edge as identifier tuples, sorted.
    pub fn edges(&self) -> Vec<EdgeTuple> {
        self.graph.edges()
    }

    /// Add a directory path. Returns `false` if already present.
    pub fn add_path(&mut self, path: &str) -> bool {
        self.paths.add(path)
    }

    /// Remove a directory path, reporting every removed path.
    ///
    /// Unless `even_if_children_exist` is set, fails while subpaths or
    /// records remain under `path`. Records are never removed here.
    pub fn remove_path_with(
        &mut self,
        path: &str,
        even_if_children_exist: bool,
        on_removed: impl FnMut(&str),
    ) -> bool {
        if !even_if_children_exist && self.has_records_under(path) {
            debug!(path, "Path still holds records");
            return false;
        }
        self.paths.remove_with(path, even_if_children_exist, on_removed)
    }

    /// Whether any record lives at or below `path`.
    pub fn has_records_under(&self, path: &str) -> bool {
        let mut found = false;
        self.enumerate_by_path(path, true, |_| {
            found = true;
            false
        });
        found
    }

    /// Whether a directory path was added.
    pub fn path_exists(&self, path: &str) -> bool {
        self.paths.path_exists(path)
    }

    /// Existing paths below `path`.
    pub fn subpaths(&self, path: &str, recursive: bool) -> Vec<CompactString> {
        self.paths.enumerate_subpaths(path, recursive)
    }

    /// The path tree.
    pub fn path_tree(&self) -> &PathTree {
        &self.paths
    }

    /// Drop every dependency edge and graph node.
    pub fn clear_dependencies(&mut self) {
        self.graph = DependencyGraph::new();
    }

    /// Drop every package record.
    pub fn clear_package_data(&mut self) {
        self.packages.clear();
    }
}

impl PartialEq for IndexStore {
    fn eq(&self, other: &Self) -> bool {
        self.assets == other.assets
            && self.packages == other.packages
            && self.paths.paths() == other.paths.paths()
            && self.graph.edges() == other.graph.edges()
    }
}

impl Eq for IndexStore {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::TypeHierarchy;
    use assetreg_core::AssetFilter;

    fn record(package: &str, object: &str, ty: &str) -> AssetRecord {
        AssetRecord::new(package, object, ty)
    }

    #[test]
    fn test_add_duplicate_rejected() {
        let mut store = IndexStore::new();
        assert!(store.add_asset_data(record("/Game/A", "A", "Mesh")));
        assert!(!store.add_asset_data(record("/Game/A", "A", "Texture")));
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.asset(&AssetIdentifier::object("/Game/A", "A")).unwrap().asset_type,
            "Mesh"
        );
    }

    #[test]
    fn test_update_reindexes_type() {
        let mut store = IndexStore::new();
        store.add_asset_data(record("/Game/A", "A", "Mesh"));
        let id = AssetIdentifier::object("/Game/A", "A");

        assert!(store.update_asset_data(&id, record("/Game/A", "A", "Texture"), false));
        let filter = AssetFilter::new().with_type("Texture", false);
        let compiled = CompiledFilter::compile(&filter, &TypeHierarchy::new()).unwrap();
        assert_eq!(store.collect_by_filter(&compiled).len(), 1);

        let missing = AssetIdentifier::object("/Game/B", "B");
        assert!(!store.update_asset_data(&missing, record("/Game/B", "B", "Mesh"), false));
    }

    #[test]
    fn test_enumerate_by_path() {
        let mut store = IndexStore::new();
        store.add_asset_data(record("/Game/Maps/L1", "L1", "World"));
        store.add_asset_data(record("/Game/Maps/Sub/L2", "L2", "World"));
        store.add_asset_data(record("/Game/Props/Chair", "Chair", "Mesh"));

        let mut direct = Vec::new();
        store.enumerate_by_path("/Game/Maps", false, |r| {
            direct.push(r.object_name.clone());
            true
        });
        assert_eq!(direct, vec!["L1"]);

        let mut all = Vec::new();
        store.enumerate_by_path("/Game/Maps", true, |r| {
            all.push(r.object_name.clone());
            true
        });
        assert_eq!(all, vec!["L1", "L2"]);

        let mut first = 0;
        store.enumerate_by_path("/Game", true, |_| {
            first += 1;
            false
        });
        assert_eq!(first, 1);
    }

    #[test]
    fn test_remove_path_blocked_by_records() {
        let mut store = IndexStore::new();
        store.add_path("/Game/Maps");
        store.add_path("/Game/Maps/Sub");
        store.add_asset_data(record("/Game/Maps/Sub/L2", "L2", "World"));

        assert!(store.has_records_under("/Game/Maps"));
        assert!(!store.remove_path_with("/Game/Maps/Sub", false, |_| {}));
        assert!(store.path_exists("/Game/Maps/Sub"));

        let mut removed = Vec::new();
        assert!(store.remove_path_with("/Game/Maps", true, |p| removed.push(p.to_string())));
        assert!(!store.path_exists("/Game/Maps"));
        assert!(store.subpaths("/Game/Maps", true).is_empty());
        assert!(removed.contains(&"/Game/Maps/Sub".to_string()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_set_package_dependencies_replaces() {
        let mut store = IndexStore::new();
        let a = AssetIdentifier::package("/Game/A");
        let b = AssetIdentifier::package("/Game/B");
        let c = AssetIdentifier::package("/Game/C");

        let hard = DependencyProperties::HARD;
        assert!(store.set_package_dependencies(
            &a,
            CategoryMask::all(),
            [(b.clone(), DependencyCategory::Content, hard)]
        ));
        assert!(!store.set_package_dependencies(
            &a,
            CategoryMask::all(),
            [(b.clone(), DependencyCategory::Content, hard)]
        ));
        assert!(store.set_package_dependencies(
            &a,
            CategoryMask::all(),
            [(c.clone(), DependencyCategory::Content, hard)]
        ));

        assert_eq!(store.referencers(&b, &DependencyQuery::all()), Vec::<AssetIdentifier>::new());
        assert_eq!(store.referencers(&c, &DependencyQuery::all()), vec![a]);
        assert!(store.graph().is_consistent());
    }

    #[test]
    fn test_equality_ignores_insertion_order() {
        let mut left = IndexStore::new();
        let mut right = IndexStore::new();
        left.add_asset_data(record("/Game/A", "A", "Mesh"));
        left.add_asset_data(record("/Game/B", "B", "Mesh"));
        right.add_asset_data(record("/Game/B", "B", "Mesh"));
        right.add_asset_data(record("/Game/A", "A", "Mesh"));
        assert_eq!(left, right);

        right.add_path("/Game");
        assert_ne!(left, right);
    }
}
