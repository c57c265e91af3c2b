//! Cached view of type inheritance.
//!
//! Native types come from the live [`TypeRegistry`]; dynamic types are
//! declared by gathered records. Both are merged into one type → parent map
//! plus a reverse children map, rebuilt lazily when either side changes.

use std::collections::{HashMap, HashSet, VecDeque};

use compact_str::CompactString;
use tracing::{debug, error};

use assetreg_core::TypeRegistry;

/// Hard cap on ancestor walks and subclass expansion depth.
pub const MAX_INHERITANCE_DEPTH: usize = 256;

#[derive(Debug, Default, Clone)]
pub struct TypeHierarchy {
    native: HashMap<CompactString, Option<CompactString>>,
    dynamic: HashMap<CompactString, CompactString>,
    parents: HashMap<CompactString, Option<CompactString>>,
    children: HashMap<CompactString, Vec<CompactString>>,
    native_version: Option<u64>,
    dirty: bool,
}

impl TypeHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the merged view is stale relative to `registry`.
    pub fn needs_rebuild(&self, registry: &dyn TypeRegistry) -> bool {
        self.dirty || self.native_version != Some(registry.version())
    }

    /// Rebuild the merged view if stale. Returns `true` if it was rebuilt.
    pub fn ensure_current(&mut self, registry: &dyn TypeRegistry) -> bool {
        let version = registry.version();
        if self.native_version != Some(version) {
            self.native = registry.native_types().into_iter().collect();
            self.native_version = Some(version);
            self.dirty = true;
        }
        if !self.dirty {
            return false;
        }
        self.rebuild();
        true
    }

    fn rebuild(&mut self) {
        let mut parents = self.native.clone();
        for (name, parent) in &self.dynamic {
            // Native declarations win over gathered ones.
            parents
                .entry(name.clone())
                .or_insert_with(|| Some(parent.clone()));
        }
        let mut children: HashMap<CompactString, Vec<CompactString>> = HashMap::new();
        for (name, parent) in &parents {
            if let Some(parent) = parent {
                children.entry(parent.clone()).or_default().push(name.clone());
            }
        }
        for list in children.values_mut() {
            list.sort();
        }
        debug!(
            native = self.native.len(),
            dynamic = self.dynamic.len(),
            "Rebuilt type hierarchy"
        );
        self.parents = parents;
        self.children = children;
        self.dirty = false;
    }

    /// Record a type declared by gathered content.
    ///
    /// Returns `true` if the declaration is new or changed.
    pub fn record_dynamic_type(&mut self, name: &str, parent: &str) -> bool {
        if self.dynamic.get(name).is_some_and(|p| p == parent) {
            return false;
        }
        self.dynamic.insert(name.into(), parent.into());
        self.dirty = true;
        true
    }

    /// Forget every dynamic declaration.
    pub fn clear_dynamic_types(&mut self) {
        if !self.dynamic.is_empty() {
            self.dynamic.clear();
            self.dirty = true;
        }
    }

    /// Whether the type is known to the merged view.
    pub fn contains(&self, name: &str) -> bool {
        self.parents.contains_key(name)
    }

    /// Direct parent of a type.
    pub fn parent(&self, name: &str) -> Option<&str> {
        self.parents.get(name).and_then(|p| p.as_deref())
    }

    /// Ancestors of `name`, nearest first.
    ///
    /// Returns `None` for unknown types and for chains that loop or exceed
    /// [`MAX_INHERITANCE_DEPTH`].
    pub fn ancestor_chain(&self, name: &str) -> Option<Vec<CompactString>> {
        if !self.contains(name) {
            return None;
        }
        let mut chain = Vec::new();
        let mut seen: HashSet<&str> = HashSet::from([name]);
        let mut current = name;
        while let Some(parent) = self.parent(current) {
            if !seen.insert(parent) {
                error!(type_name = name, repeated = parent, "Inheritance chain is cyclic");
                return None;
            }
            if chain.len() >= MAX_INHERITANCE_DEPTH {
                error!(
                    type_name = name,
                    limit = MAX_INHERITANCE_DEPTH,
                    "Inheritance chain is too deep"
                );
                return None;
            }
            chain.push(CompactString::from(parent));
            current = parent;
        }
        Some(chain)
    }

    /// `types` plus every transitive subclass, skipping `excluded` and
    /// everything below it.
    pub fn subclasses<'a>(
        &self,
        types: impl IntoIterator<Item = &'a str>,
        excluded: &HashSet<CompactString>,
    ) -> HashSet<CompactString> {
        let mut out = HashSet::new();
        let mut queue: VecDeque<(CompactString, usize)> = types
            .into_iter()
            .map(|t| (CompactString::from(t), 0))
            .collect();
        while let Some((name, depth)) = queue.pop_front() {
            if excluded.contains(&name) || !out.insert(name.clone()) {
                continue;
            }
            if depth >= MAX_INHERITANCE_DEPTH {
                error!(type_name = %name, "Subclass expansion exceeded depth cap");
                continue;
            }
            if let Some(children) = self.children.get(&name) {
                for child in children {
                    if !out.contains(child) {
                        queue.push_back((child.clone(), depth + 1));
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assetreg_core::StaticTypeRegistry;

    fn registry() -> StaticTypeRegistry {
        StaticTypeRegistry::with_types([
            ("Object", None),
            ("Mesh", Some("Object")),
            ("SkeletalMesh", Some("Mesh")),
            ("Texture", Some("Object")),
        ])
    }

    #[test]
    fn test_ancestor_chain() {
        let reg = registry();
        let mut hierarchy = TypeHierarchy::new();
        assert!(hierarchy.ensure_current(&reg));
        assert!(!hierarchy.ensure_current(&reg));

        let chain = hierarchy.ancestor_chain("SkeletalMesh").unwrap();
        assert_eq!(chain, vec!["Mesh", "Object"]);
        assert_eq!(hierarchy.ancestor_chain("Object").unwrap().len(), 0);
        assert!(hierarchy.ancestor_chain("Nope").is_none());
    }

    #[test]
    fn test_version_bump_triggers_rebuild() {
        let reg = registry();
        let mut hierarchy = TypeHierarchy::new();
        hierarchy.ensure_current(&reg);

        reg.register("Cloth", Some("Mesh"));
        assert!(hierarchy.needs_rebuild(&reg));
        hierarchy.ensure_current(&reg);
        assert_eq!(hierarchy.parent("Cloth"), Some("Mesh"));
    }

    #[test]
    fn test_dynamic_types_merge() {
        let reg = registry();
        let mut hierarchy = TypeHierarchy::new();
        assert!(hierarchy.record_dynamic_type("Chair_C", "Mesh"));
        assert!(!hierarchy.record_dynamic_type("Chair_C", "Mesh"));
        // Native wins over a conflicting dynamic declaration.
        hierarchy.record_dynamic_type("Texture", "Mesh");
        hierarchy.ensure_current(&reg);

        assert_eq!(hierarchy.parent("Chair_C"), Some("Mesh"));
        assert_eq!(hierarchy.parent("Texture"), Some("Object"));
    }

    #[test]
    fn test_cycle_reports_not_found() {
        let reg = StaticTypeRegistry::with_types([("A", Some("B")), ("B", Some("A"))]);
        let mut hierarchy = TypeHierarchy::new();
        hierarchy.ensure_current(&reg);
        assert!(hierarchy.ancestor_chain("A").is_none());

        // Expansion still terminates and visits each type once.
        let subs = hierarchy.subclasses(["A"], &HashSet::new());
        assert_eq!(subs.len(), 2);
    }

    #[test]
    fn test_cycle_away_from_start_reports_not_found() {
        let reg = StaticTypeRegistry::with_types([
            ("A", Some("B")),
            ("B", Some("C")),
            ("C", Some("B")),
            ("D", Some("A")),
        ]);
        let mut hierarchy = TypeHierarchy::new();
        hierarchy.ensure_current(&reg);
        assert!(hierarchy.ancestor_chain("A").is_none());
        assert!(hierarchy.ancestor_chain("D").is_none());
        assert!(hierarchy.ancestor_chain("C").is_none());

        let subs = hierarchy.subclasses(["B"], &HashSet::new());
        assert_eq!(subs.len(), 4);
    }

    #[test]
    fn test_deep_chain_hits_cap() {
        let names: Vec<String> = (0..=MAX_INHERITANCE_DEPTH + 1).map(|i| format!("T{i}")).collect();
        let reg = StaticTypeRegistry::new();
        reg.register(&names[0], None);
        for pair in names.windows(2) {
            reg.register(&pair[1], Some(pair[0].as_str()));
        }
        let mut hierarchy = TypeHierarchy::new();
        hierarchy.ensure_current(&reg);

        assert!(hierarchy.ancestor_chain(&names[MAX_INHERITANCE_DEPTH + 1]).is_none());
        let chain = hierarchy.ancestor_chain(&names[MAX_INHERITANCE_DEPTH]).unwrap();
        assert_eq!(chain.len(), MAX_INHERITANCE_DEPTH);
    }

    #[test]
    fn test_subclasses_with_exclusion() {
        let reg = registry();
        let mut hierarchy = TypeHierarchy::new();
        hierarchy.ensure_current(&reg);

        let all = hierarchy.subclasses(["Object"], &HashSet::new());
        assert_eq!(all.len(), 4);

        let excluded = HashSet::from([CompactString::new("Mesh")]);
        let some = hierarchy.subclasses(["Object"], &excluded);
        let mut names: Vec<_> = some.into_iter().collect();
        names.sort();
        assert_eq!(names, vec!["Object", "Texture"]);
    }
}
