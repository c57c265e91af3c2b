//! Hierarchical cache of container directory paths.

use std::collections::BTreeMap;

use compact_str::CompactString;

use assetreg_core::normalize_path;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct PathNode {
    /// Explicitly added, independent of having children.
    exists: bool,
    children: BTreeMap<CompactString, PathNode>,
}

impl PathNode {
    fn has_existing_descendant(&self) -> bool {
        self.children
            .values()
            .any(|c| c.exists || c.has_existing_descendant())
    }

    fn collect(&self, prefix: &str, recursive: bool, out: &mut Vec<CompactString>) {
        for (segment, child) in &self.children {
            let mut path = CompactString::new(prefix);
            path.push('/');
            path.push_str(segment);
            if recursive {
                child.collect(&path, true, out);
            }
            if child.exists {
                out.push(path);
            } else if !recursive {
                // Implicit intermediate directories still count as subpaths
                // when one of their descendants exists.
                if child.has_existing_descendant() {
                    out.push(path);
                }
            }
        }
    }
}

/// Trie of namespace directory segments.
///
/// Each node records whether it was added explicitly, so removing a leaf
/// never disturbs ancestors that were added on their own.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PathTree {
    root: PathNode,
    count: usize,
}

fn segments(path: &str) -> Vec<CompactString> {
    normalize_path(path)
        .split('/')
        .filter(|s| !s.is_empty())
        .map(CompactString::from)
        .collect()
}

impl PathTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of explicitly added paths.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether no path has been added.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Add a path. Returns `false` if it was already present.
    pub fn add(&mut self, path: &str) -> bool {
        let segs = segments(path);
        if segs.is_empty() {
            return false;
        }
        let mut node = &mut self.root;
        for seg in segs {
            node = node.children.entry(seg).or_default();
        }
        if node.exists {
            return false;
        }
        node.exists = true;
        self.count += 1;
        true
    }

    /// Whether a path was explicitly added.
    pub fn path_exists(&self, path: &str) -> bool {
        self.find(path).is_some_and(|n| n.exists)
    }

    fn find(&self, path: &str) -> Option<&PathNode> {
        let segs = segments(path);
        if segs.is_empty() {
            return None;
        }
        let mut node = &self.root;
        for seg in &segs {
            node = node.children.get(seg)?;
        }
        Some(node)
    }

    /// Remove a path.
    ///
    /// Fails when the path is absent, or when it still has existing
    /// descendants and `even_if_children_exist` is false. A forced removal
    /// drops the whole subtree.
    pub fn remove(&mut self, path: &str, even_if_children_exist: bool) -> bool {
        self.remove_with(path, even_if_children_exist, |_| {})
    }

    /// Like [`remove`](Self::remove), reporting every existing path removed.
    pub fn remove_with(
        &mut self,
        path: &str,
        even_if_children_exist: bool,
        mut on_removed: impl FnMut(&str),
    ) -> bool {
        let segs = segments(path);
        let Some((last, parents)) = segs.split_last() else {
            return false;
        };
        let Some(node) = self.find(path) else {
            return false;
        };
        if !node.exists {
            return false;
        }
        if node.has_existing_descendant() && !even_if_children_exist {
            return false;
        }

        // Walk down, remembering the chain so empty ancestors can be pruned.
        let mut parent = &mut self.root;
        for seg in parents {
            let Some(next) = parent.children.get_mut(seg) else {
                return false;
            };
            parent = next;
        }
        let Some(removed) = parent.children.remove(last) else {
            return false;
        };

        let prefix = normalize_path(path);
        let mut removed_paths = Vec::new();
        removed.collect(&prefix, true, &mut removed_paths);
        removed_paths.push(prefix);
        self.count -= removed_paths.len();
        for p in &removed_paths {
            on_removed(p.as_str());
        }

        self.prune_empty(parents);
        true
    }

    /// Drop implicit ancestors left with no children.
    fn prune_empty(&mut self, chain: &[CompactString]) {
        for depth in (0..chain.len()).rev() {
            let mut node = &mut self.root;
            for seg in &chain[..depth] {
                match node.children.get_mut(seg) {
                    Some(next) => node = next,
                    None => return,
                }
            }
            let seg = &chain[depth];
            let prunable = node
                .children
                .get(seg)
                .is_some_and(|c| !c.exists && c.children.is_empty());
            if !prunable {
                return;
            }
            node.children.remove(seg);
        }
    }

    /// Existing paths below `path`.
    ///
    /// Non-recursive enumeration returns direct children, including implicit
    /// directories that lead to existing paths. Results are sorted.
    pub fn enumerate_subpaths(&self, path: &str, recursive: bool) -> Vec<CompactString> {
        let prefix = normalize_path(path);
        let node = if prefix.is_empty() {
            Some(&self.root)
        } else {
            self.find(&prefix)
        };
        let mut out = Vec::new();
        if let Some(node) = node {
            node.collect(&prefix, recursive, &mut out);
        }
        out.sort();
        out
    }

    /// Every existing path, sorted.
    pub fn paths(&self) -> Vec<CompactString> {
        self.enumerate_subpaths("/", true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_twice() {
        let mut tree = PathTree::new();
        assert!(tree.add("/Game/Maps"));
        assert!(!tree.add("/Game/Maps/"));
        assert_eq!(tree.len(), 1);
        assert!(tree.path_exists("/Game/Maps"));
        assert!(!tree.path_exists("/Game"));
    }

    #[test]
    fn test_remove_refuses_with_children() {
        let mut tree = PathTree::new();
        tree.add("/Game");
        tree.add("/Game/Maps");

        assert!(!tree.remove("/Game", false));
        assert!(tree.path_exists("/Game"));

        let mut removed = Vec::new();
        assert!(tree.remove_with("/Game", true, |p| removed.push(p.to_string())));
        removed.sort();
        assert_eq!(removed, vec!["/Game", "/Game/Maps"]);
        assert!(!tree.path_exists("/Game"));
        assert!(tree.enumerate_subpaths("/Game", true).is_empty());
        assert!(tree.is_empty());
    }

    #[test]
    fn test_remove_leaf_keeps_ancestor() {
        let mut tree = PathTree::new();
        tree.add("/Game");
        tree.add("/Game/Maps/Arena");

        assert!(tree.remove("/Game/Maps/Arena", false));
        assert!(tree.path_exists("/Game"));
        assert_eq!(tree.paths(), vec![CompactString::new("/Game")]);
    }

    #[test]
    fn test_remove_missing() {
        let mut tree = PathTree::new();
        tree.add("/Game/Maps/Arena");
        assert!(!tree.remove("/Game/Maps", true));
        assert!(!tree.remove("/Nope", true));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_enumerate_subpaths() {
        let mut tree = PathTree::new();
        tree.add("/Game/Maps");
        tree.add("/Game/Maps/Arena");
        tree.add("/Game/Props/Chairs");

        let direct = tree.enumerate_subpaths("/Game", false);
        assert_eq!(direct, vec!["/Game/Maps", "/Game/Props"]);

        let all = tree.enumerate_subpaths("/Game", true);
        assert_eq!(
            all,
            vec!["/Game/Maps", "/Game/Maps/Arena", "/Game/Props/Chairs"]
        );
    }
}
